use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::bundler::{Bundler, FileProvider};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use crate::error::{ConfigError, TransformError};
use crate::transform::{TaskReport, Transformer, emit};
use crate::{FileSet, TaskContext};

/// Compiles stylesheet entry points.
///
/// Every entry has its `@import`s inlined, gets vendor prefixes for the
/// configured browser query and is minified. Custom properties are left as
/// they are. Entries ending in `.scss` or `.sass` go through `grass` first.
pub struct StyleProcessor {
    files: FileSet,
    dest: Utf8PathBuf,
    browsers: Option<Browsers>,
}

impl StyleProcessor {
    pub fn new<S: AsRef<str>>(
        files: FileSet,
        dest: impl Into<Utf8PathBuf>,
        browsers: &[S],
    ) -> Result<Self, ConfigError> {
        let browsers = if browsers.is_empty() {
            None
        } else {
            Browsers::from_browserslist(browsers.iter().map(AsRef::as_ref))
                .map_err(|e| ConfigError::Browsers(e.to_string()))?
        };

        Ok(Self {
            files,
            dest: dest.into(),
            browsers,
        })
    }

    fn targets(&self) -> Targets {
        Targets {
            browsers: self.browsers,
            ..Targets::default()
        }
    }

    fn compile(&self, path: &Utf8Path) -> Result<String, TransformError> {
        #[cfg(feature = "grass")]
        if matches!(path.extension(), Some("scss" | "sass")) {
            let css = grass::from_path(path, &grass::Options::default())
                .map_err(|e| TransformError::syntax(path, e))?;
            let options = ParserOptions {
                filename: path.to_string(),
                ..ParserOptions::default()
            };
            let sheet =
                StyleSheet::parse(&css, options).map_err(|e| TransformError::syntax(path, e))?;

            return self.print(path, sheet);
        }

        let fs = FileProvider::new();
        let mut bundler = Bundler::new(&fs, None, ParserOptions::default());
        let sheet = bundler
            .bundle(path.as_std_path())
            .map_err(|e| TransformError::syntax(path, e))?;

        self.print(path, sheet)
    }

    fn print(
        &self,
        path: &Utf8Path,
        mut sheet: StyleSheet<'_>,
    ) -> Result<String, TransformError> {
        let targets = self.targets();

        sheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| TransformError::syntax(path, e))?;

        let result = sheet
            .to_css(PrinterOptions {
                minify: true,
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| TransformError::syntax(path, e))?;

        Ok(result.code)
    }
}

impl Transformer for StyleProcessor {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
        let mut report = TaskReport::new("styles");
        let dest = ctx.path(&self.dest);

        // Compile everything first, a broken entry leaves no partial output.
        let mut compiled = Vec::new();
        for file in self.files.resolve(&ctx.env.root)? {
            let css = self.compile(&file.path)?;
            compiled.push((file.relative.with_extension("css"), css));
        }

        for (relative, css) in compiled {
            report.add(emit(&dest.join(relative), css)?);
        }

        Ok(report)
    }
}
