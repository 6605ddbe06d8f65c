#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Umbrella error returned by the public entry points.
#[derive(Debug, Error)]
pub enum FuigoError {
    #[error("Configuration error:\n{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error("Error while building the website.\n{0}")]
    Build(#[from] BuildError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Problems with the shape of the task graph itself. These are always fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error("Task '{0}' is not defined")]
    UnknownTask(String),

    #[error("Task '{task}' depends on '{dependency}', which is not defined")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{0}' is defined more than once")]
    DuplicateTask(String),

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("'{0}' can't be combined with other tasks")]
    Exclusive(String),
}

/// Errors reported by a single transformer.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Couldn't access '{path}'.\n{source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("{path}: {message}")]
    Syntax { path: Utf8PathBuf, message: String },

    #[cfg(feature = "image")]
    #[error("Image '{path}': {source}")]
    Image {
        path: Utf8PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TransformError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn syntax(path: impl Into<Utf8PathBuf>, message: impl ToString) -> Self {
        Self::Syntax {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Malformed input is recoverable, a broken filesystem is not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Syntax { .. } => true,
            #[cfg(feature = "image")]
            Self::Image { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error("Task '{0}':\n{1}")]
    Task(String, TransformError),

    #[error("Task '{0}' panicked: {1}")]
    Panic(String, String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read '{0}'.\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse '{0}'.\n{1}")]
    Toml(Utf8PathBuf, toml::de::Error),

    #[error("Couldn't parse '{0}'.\n{1}")]
    Json(Utf8PathBuf, serde_json::Error),

    #[error("Invalid browser query: {0}")]
    Browsers(String),

    #[error("Invalid script target: {0}")]
    ScriptTarget(String),

    #[error("Invalid glob in configuration.\n{0}")]
    Pattern(#[from] glob::PatternError),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}
