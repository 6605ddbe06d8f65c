//! HTML reference rewriting.
//!
//! Pages mark groups of asset references with build comments:
//!
//! ```html
//! <!-- build:js scripts/main.min.js -->
//! <script src="scripts/a.js"></script>
//! <script src="scripts/b.js"></script>
//! <!-- endbuild -->
//! ```
//!
//! The whole block is replaced by a single reference to the named path. The
//! referenced assets are produced by other tasks, nothing is concatenated
//! here. `build:remove` blocks disappear without a replacement.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TransformError;
use crate::transform::{TaskReport, Transformer, emit, read_to_string};
use crate::{FileSet, TaskContext};

const OPEN: &str = "<!--";
const CLOSE: &str = "-->";

#[derive(Debug, PartialEq, Eq)]
enum BlockKind {
    Js,
    Css,
    Remove,
}

#[derive(Debug, PartialEq, Eq)]
struct Block<'a> {
    kind: BlockKind,
    target: Option<&'a str>,
}

impl<'a> Block<'a> {
    fn parse(directive: &'a str) -> Option<Self> {
        let (head, target) = match directive.split_once(char::is_whitespace) {
            Some((head, target)) => (head, Some(target.trim()).filter(|t| !t.is_empty())),
            None => (directive, None),
        };

        // `js(app)` names an alternate search path, which only matters when
        // assets are concatenated.
        let kind = match head.split_once('(') {
            Some((kind, alt)) => alt.strip_suffix(')').map(|_| kind)?,
            None => head,
        };

        let kind = match kind {
            "js" => BlockKind::Js,
            "css" => BlockKind::Css,
            "remove" => BlockKind::Remove,
            _ => return None,
        };

        if kind != BlockKind::Remove && target.is_none() {
            return None;
        }

        Some(Self { kind, target })
    }

    fn tag(&self) -> String {
        match (&self.kind, self.target) {
            (BlockKind::Js, Some(target)) => format!(r#"<script src="{target}"></script>"#),
            (BlockKind::Css, Some(target)) => format!(r#"<link rel="stylesheet" href="{target}">"#),
            _ => String::new(),
        }
    }
}

/// Finds the next comment, returning its byte range and trimmed content.
fn next_comment(html: &str) -> Option<(usize, usize, &str)> {
    let start = html.find(OPEN)?;
    let body = start + OPEN.len();

    // `<!-->` and `<!--->` are closed, empty comments.
    for abrupt in [">", "->"] {
        if html[body..].starts_with(abrupt) {
            return Some((start, body + abrupt.len(), ""));
        }
    }

    let end = body + html[body..].find(CLOSE)?;
    Some((start, end + CLOSE.len(), html[body..end].trim()))
}

/// Replaces every build block with its single reference tag.
fn rewrite(path: &Utf8Path, html: &str) -> Result<String, TransformError> {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some((start, end, content)) = next_comment(rest) {
        let Some(directive) = content.strip_prefix("build:") else {
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        };

        let block = Block::parse(directive.trim()).ok_or_else(|| {
            TransformError::syntax(path, format!("malformed build block '{content}'"))
        })?;

        let mut tail = &rest[end..];
        let mut skipped = end;
        loop {
            let Some((_, close, content)) = next_comment(tail) else {
                return Err(TransformError::syntax(
                    path,
                    format!("build block '{content}' has no matching endbuild"),
                ));
            };

            tail = &tail[close..];
            skipped += close;

            if content == "endbuild" {
                break;
            }
        }

        out.push_str(&rest[..start]);
        out.push_str(&block.tag());
        rest = &rest[skipped..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Adds the live-reload client right before `</body>`.
fn inject(html: &mut String, script: &str) {
    let tag = format!("<script>{script}</script>");
    match html.rfind("</body>") {
        Some(index) => html.insert_str(index, &tag),
        None => html.push_str(&tag),
    }
}

fn minify(html: &str) -> Vec<u8> {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_comments = false;
    cfg.minify_css = true;
    cfg.minify_js = true;
    minify_html::minify(html.as_bytes(), &cfg)
}

/// Rewrites build blocks in HTML pages, optionally minifying them.
pub struct HtmlProcessor {
    files: FileSet,
    dest: Utf8PathBuf,
    minify: bool,
}

impl HtmlProcessor {
    pub fn new(files: FileSet, dest: impl Into<Utf8PathBuf>) -> Self {
        Self {
            files,
            dest: dest.into(),
            minify: false,
        }
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }
}

impl Transformer for HtmlProcessor {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
        let mut report = TaskReport::new("html");
        let dest = ctx.path(&self.dest);
        let script = ctx.env.get_refresh_script();

        let mut pages = Vec::new();
        for file in self.files.resolve(&ctx.env.root)? {
            let mut html = rewrite(&file.path, &read_to_string(&file.path)?)?;

            if let Some(script) = &script {
                inject(&mut html, script);
            }

            let html = match self.minify {
                true => minify(&html),
                false => html.into_bytes(),
            };

            pages.push((file.relative, html));
        }

        for (relative, html) in pages {
            report.add(emit(&dest.join(relative), html)?);
        }

        Ok(report)
    }
}
