//! Asset transformers.
//!
//! Each transformer owns its inputs (a [`FileSet`](crate::FileSet)), its
//! destination directory and whatever options its library needs. Tasks in
//! the graph hold nothing but an `Arc<dyn Transformer>`, so a task only ever
//! sees the one transformation it was constructed with.

pub mod clean;
pub mod copy;
pub mod html;
#[cfg(feature = "image")]
pub mod image;
pub mod scripts;
pub mod styles;

use std::fmt::Display;
use std::fs;

use camino::Utf8Path;
use indicatif::HumanBytes;

use crate::TaskContext;
use crate::error::TransformError;

pub use clean::CleanOutput;
pub use copy::CopyFiles;
pub use html::HtmlProcessor;
#[cfg(feature = "image")]
pub use image::ImageOptimizer;
pub use scripts::ScriptBundler;
pub use styles::StyleProcessor;

/// A single step of the build: reads some files, writes some files.
pub trait Transformer: Send + Sync {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError>;
}

/// Size metric reported by every transformer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub title: String,
    pub files: usize,
    pub bytes: u64,
}

impl TaskReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub(crate) fn add(&mut self, bytes: usize) {
        self.files += 1;
        self.bytes += bytes as u64;
    }
}

impl Display for TaskReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.title,
            self.files,
            if self.files == 1 { "file" } else { "files" },
            HumanBytes(self.bytes)
        )
    }
}

/// Writes `data` to `path`, creating parent directories as needed.
pub(crate) fn emit(path: &Utf8Path, data: impl AsRef<[u8]>) -> Result<usize, TransformError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| TransformError::io(dir, e))?;
    }

    let data = data.as_ref();
    fs::write(path, data).map_err(|e| TransformError::io(path, e))?;

    Ok(data.len())
}

pub(crate) fn read(path: &Utf8Path) -> Result<Vec<u8>, TransformError> {
    fs::read(path).map_err(|e| TransformError::io(path, e))
}

pub(crate) fn read_to_string(path: &Utf8Path) -> Result<String, TransformError> {
    fs::read_to_string(path).map_err(|e| TransformError::io(path, e))
}

#[cfg(test)]
pub(crate) mod testing {
    use camino::Utf8PathBuf;

    use crate::{Environment, TaskContext};

    pub fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    pub fn write(root: &camino::Utf8Path, path: &str, data: impl AsRef<[u8]>) {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    pub fn context<'a>(env: &'a Environment) -> TaskContext<'a> {
        TaskContext {
            name: "test",
            env,
            span: tracing::Span::none(),
        }
    }
}
