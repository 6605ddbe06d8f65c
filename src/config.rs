use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::ErrorPolicy;
use crate::error::ConfigError;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "fuigo.toml";

/// Cache id used when neither the configuration nor `package.json` name one.
pub const FALLBACK_CACHE_ID: &str = "fuigo";

/// Everything a project can tweak about the build recipe.
///
/// Every field has a default, so an empty `fuigo.toml` (or none at all)
/// describes the stock project layout. Entry points left unset live under
/// `source`, read them through [`scripts`](Self::scripts),
/// [`styles`](Self::styles) and [`runtime_caching`](Self::runtime_caching).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Source tree.
    pub source: Utf8PathBuf,
    /// Final output tree.
    pub dist: Utf8PathBuf,
    /// Intermediate output, served before `dist`.
    pub tmp: Utf8PathBuf,
    pub error_policy: ErrorPolicy,
    /// Scripts concatenated into the bundle, in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scripts: Option<Vec<String>>,
    pub script_output: String,
    /// ECMAScript version the bundle is lowered to.
    pub script_target: String,
    /// Stylesheet entry points.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styles: Option<Vec<String>>,
    /// Browserslist queries used for vendor prefixes.
    pub browsers: Vec<String>,
    /// Entries of `dist` that survive `clean`.
    pub keep: Vec<String>,
    pub server: ServerConfig,
    pub service_worker: ServiceWorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub port: u16,
    /// Pause between a re-run and the reload broadcast.
    pub reload_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceWorkerConfig {
    pub cache_id: Option<String>,
    /// Helper library imported first by the worker.
    pub toolbox: Utf8PathBuf,
    /// Caching routes, imported after the toolbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_caching: Option<Utf8PathBuf>,
    /// The one font format worth precaching.
    pub font_format: String,
    pub output: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: "app".into(),
            dist: "dist".into(),
            tmp: ".tmp".into(),
            error_policy: ErrorPolicy::default(),
            scripts: None,
            script_output: "main.js".into(),
            script_target: "es2015".into(),
            styles: None,
            browsers: vec!["> 1%".into()],
            keep: vec![".git".into()],
            server: ServerConfig::default(),
            service_worker: ServiceWorkerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            reload_delay_ms: 800,
        }
    }
}

impl Default for ServiceWorkerConfig {
    fn default() -> Self {
        Self {
            cache_id: None,
            toolbox: "node_modules/sw-toolbox/sw-toolbox.js".into(),
            runtime_caching: None,
            font_format: "woff".into(),
            output: "service-worker.js".into(),
        }
    }
}

#[derive(Deserialize)]
struct PackageJson {
    name: Option<String>,
}

impl PipelineConfig {
    /// Reads the configuration for the project in `root`.
    ///
    /// An explicit `path` must exist. Without one, `fuigo.toml` in the root
    /// is used if present and the defaults otherwise.
    pub fn load(root: &Utf8Path, path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (root.join(path), true),
            None => (root.join(CONFIG_FILE), false),
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound && !required => {
                tracing::debug!("no {CONFIG_FILE} found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(path, e)),
        };

        toml::from_str(&text).map_err(|e| ConfigError::Toml(path, e))
    }

    pub fn scripts(&self) -> Vec<String> {
        match &self.scripts {
            Some(scripts) => scripts.clone(),
            None => vec![format!("{}/scripts/main.js", self.source)],
        }
    }

    pub fn styles(&self) -> Vec<String> {
        match &self.styles {
            Some(styles) => styles.clone(),
            None => vec![format!("{}/styles/main.css", self.source)],
        }
    }

    pub fn runtime_caching(&self) -> Utf8PathBuf {
        match &self.service_worker.runtime_caching {
            Some(path) => path.clone(),
            None => self.source.join("scripts/sw/runtime-caching.js"),
        }
    }

    /// The service worker cache id: configured value, then the `name` field
    /// of `package.json`, then [`FALLBACK_CACHE_ID`].
    pub fn cache_id(&self, root: &Utf8Path) -> Result<String, ConfigError> {
        if let Some(id) = &self.service_worker.cache_id {
            return Ok(id.clone());
        }

        let path = root.join("package.json");
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FALLBACK_CACHE_ID.into()),
            Err(e) => return Err(ConfigError::Io(path, e)),
        };

        let package: PackageJson =
            serde_json::from_str(&text).map_err(|e| ConfigError::Json(path, e))?;

        Ok(package
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_CACHE_ID.into()))
    }
}
