//! Script bundling with `oxc`.
//!
//! Scripts are classic browser scripts, not modules: they are concatenated
//! in File Set order, lowered to the configured ECMAScript target and, for
//! production, compressed and mangled. Top-level names are never mangled
//! because markup may call them directly.

use camino::{Utf8Path, Utf8PathBuf};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions, LegalComment};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::semantic::SemanticBuilder;
use oxc::span::SourceType;
use oxc::transformer::{TransformOptions, Transformer as OxcTransformer};

use crate::error::{ConfigError, TransformError};
use crate::transform::{TaskReport, Transformer, emit, read_to_string};
use crate::{FileSet, TaskContext};

/// Concatenates, transpiles and optionally minifies scripts into one file.
pub struct ScriptBundler {
    title: String,
    files: FileSet,
    dest: Utf8PathBuf,
    output: String,
    target: TransformOptions,
    minify: bool,
}

impl ScriptBundler {
    pub fn new(
        title: impl Into<String>,
        files: FileSet,
        dest: impl Into<Utf8PathBuf>,
        output: impl Into<String>,
        target: &str,
    ) -> Result<Self, ConfigError> {
        let target = TransformOptions::from_target(target).map_err(ConfigError::ScriptTarget)?;

        Ok(Self {
            title: title.into(),
            files,
            dest: dest.into(),
            output: output.into(),
            target,
            minify: false,
        })
    }

    /// Compress and mangle the bundle.
    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    fn compile(&self, path: &Utf8Path, source: &str) -> Result<String, TransformError> {
        let allocator = Allocator::default();
        let source_type = SourceType::cjs();

        let ret = Parser::new(&allocator, source, source_type).parse();
        if let Some(error) = ret.errors.first() {
            return Err(TransformError::syntax(path, error));
        }

        let mut program = ret.program;

        let scoping = SemanticBuilder::new()
            .build(&program)
            .semantic
            .into_scoping();

        let ret = OxcTransformer::new(&allocator, path.as_std_path(), &self.target)
            .build_with_scoping(scoping, &mut program);
        if let Some(error) = ret.errors.first() {
            return Err(TransformError::syntax(path, error));
        }

        if !self.minify {
            return Ok(Codegen::new().build(&program).code);
        }

        let options = MinifierOptions {
            mangle: Some(MangleOptions {
                top_level: Some(false),
                ..MangleOptions::default()
            }),
            compress: Some(CompressOptions::smallest()),
        };
        let ret = Minifier::new(options).minify(&allocator, &mut program);

        let code = Codegen::new()
            .with_options(CodegenOptions {
                minify: true,
                // `/*!`, `@license` and `@preserve` comments survive.
                comments: CommentOptions {
                    legal: LegalComment::Inline,
                    ..CommentOptions::disabled()
                },
                ..CodegenOptions::default()
            })
            .with_scoping(ret.scoping)
            .build(&program)
            .code;

        Ok(code)
    }
}

impl Transformer for ScriptBundler {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
        let mut report = TaskReport::new(&self.title);
        let files = self.files.resolve(&ctx.env.root)?;

        if files.is_empty() {
            return Ok(report);
        }

        let mut bundle = String::new();
        for file in &files {
            if !bundle.is_empty() {
                bundle.push('\n');
            }
            bundle.push_str(&read_to_string(&file.path)?);
        }

        let path = ctx.path(&self.dest).join(&self.output);
        let code = self.compile(&path, &bundle)?;
        report.add(emit(&path, code)?);

        Ok(report)
    }
}
