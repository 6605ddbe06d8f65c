use std::fs;
use std::io::ErrorKind;

use camino::Utf8PathBuf;

use crate::TaskContext;
use crate::error::TransformError;
use crate::transform::{TaskReport, Transformer};

/// Removes stale output before a build.
///
/// `remove` directories are deleted outright, `empty` directories lose their
/// contents but survive, except for entries listed in `keep` (a checked-out
/// deploy repository in `dist/.git`, for example).
pub struct CleanOutput {
    remove: Vec<Utf8PathBuf>,
    empty: Utf8PathBuf,
    keep: Vec<String>,
}

impl CleanOutput {
    pub fn new(
        remove: impl IntoIterator<Item = Utf8PathBuf>,
        empty: impl Into<Utf8PathBuf>,
        keep: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            remove: remove.into_iter().collect(),
            empty: empty.into(),
            keep: keep.into_iter().collect(),
        }
    }
}

impl Transformer for CleanOutput {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
        let mut report = TaskReport::new("clean");

        for dir in &self.remove {
            let dir = ctx.path(dir);
            match fs::remove_dir_all(&dir) {
                Ok(()) => report.files += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(TransformError::io(dir, e)),
            }
        }

        let empty = ctx.path(&self.empty);
        let entries = match fs::read_dir(&empty) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(TransformError::io(empty, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| TransformError::io(&empty, e))?;
            let name = entry.file_name();

            if self.keep.iter().any(|keep| name.to_str() == Some(keep.as_str())) {
                continue;
            }

            let path = entry.path();
            let kind = entry.file_type().map_err(|e| TransformError::io(&empty, e))?;
            let result = if kind.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };

            result.map_err(|e| TransformError::io(empty.join(name.to_string_lossy().as_ref()), e))?;
            report.files += 1;
        }

        Ok(report)
    }
}
