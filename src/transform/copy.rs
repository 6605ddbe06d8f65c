use camino::Utf8PathBuf;

use crate::error::TransformError;
use crate::transform::{TaskReport, Transformer, emit, read};
use crate::{FileSet, TaskContext};

/// Copies files verbatim, keeping their path relative to the glob base.
pub struct CopyFiles {
    title: String,
    files: FileSet,
    dest: Utf8PathBuf,
}

impl CopyFiles {
    pub fn new(title: impl Into<String>, files: FileSet, dest: impl Into<Utf8PathBuf>) -> Self {
        Self {
            title: title.into(),
            files,
            dest: dest.into(),
        }
    }
}

impl Transformer for CopyFiles {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
        let mut report = TaskReport::new(&self.title);
        let dest = ctx.path(&self.dest);

        for file in self.files.resolve(&ctx.env.root)? {
            let data = read(&file.path)?;
            report.add(emit(&dest.join(&file.relative), data)?);
        }

        Ok(report)
    }
}
