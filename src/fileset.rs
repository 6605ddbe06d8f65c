//! Ordered glob lists describing the inputs of a transformer.
//!
//! A [`FileSet`] is written the way build recipes usually spell their
//! sources: a list of globs relative to the project root, where a leading `!`
//! excludes matches of the preceding patterns.
//!
//! ```text
//! app/images/**/*.png
//! app/images/**/*.jpg
//! !app/images/sprite/*
//! ```
//!
//! Order is preserved, which matters for transformers that concatenate.

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::TransformError;

#[derive(Debug, Clone)]
struct Glob {
    raw: String,
    pattern: Pattern,
}

/// An ordered list of include/exclude glob patterns.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    include: Vec<Glob>,
    exclude: Vec<Glob>,
    dot: bool,
}

/// A file matched by a [`FileSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path on disk (root joined).
    pub path: Utf8PathBuf,
    /// Path relative to the static base of the glob that matched it.
    pub relative: Utf8PathBuf,
}

impl FileSet {
    pub fn new<I, S>(globs: I) -> Result<Self, glob::PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();

        for glob in globs {
            let glob = glob.as_ref();
            let (negated, raw) = match glob.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, glob),
            };
            let raw = raw.trim_start_matches("./").to_string();
            let glob = Glob {
                pattern: Pattern::new(&raw)?,
                raw,
            };

            if negated {
                set.exclude.push(glob);
            } else {
                set.include.push(glob);
            }
        }

        Ok(set)
    }

    /// Let wildcards match names starting with a dot.
    pub fn dot(mut self, dot: bool) -> Self {
        self.dot = dot;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    /// The include patterns, in order.
    pub fn globs(&self) -> impl Iterator<Item = &str> {
        self.include.iter().map(|glob| glob.raw.as_str())
    }

    fn options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: !self.dot,
        }
    }

    fn is_excluded(&self, relative: &Utf8Path) -> bool {
        let options = MatchOptions {
            require_literal_leading_dot: false,
            ..self.options()
        };

        self.exclude
            .iter()
            .any(|glob| glob.pattern.matches_with(relative.as_str(), options))
    }

    /// Checks a root-relative path against the set.
    pub fn matches(&self, relative: impl AsRef<Utf8Path>) -> bool {
        let relative = relative.as_ref();
        let options = self.options();

        self.include
            .iter()
            .any(|glob| glob.pattern.matches_with(relative.as_str(), options))
            && !self.is_excluded(relative)
    }

    /// Expands the set against `root`.
    ///
    /// Directories are skipped, duplicates keep their first position. A
    /// pattern without wildcards names a required file: if it is missing the
    /// read error is returned instead of an empty match.
    pub fn resolve(&self, root: &Utf8Path) -> Result<Vec<SourceFile>, TransformError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let prefix = Pattern::escape(root.as_str());

        for glob in &self.include {
            let base = root.join(glob_base(&glob.raw));

            if is_literal(&glob.raw) {
                let path = root.join(&glob.raw);
                std::fs::metadata(&path).map_err(|e| TransformError::io(&path, e))?;
            }

            let pattern = format!("{}/{}", prefix.trim_end_matches('/'), glob.raw);

            for path in glob::glob_with(&pattern, self.options())? {
                let path = Utf8PathBuf::try_from(path?)?;

                if !path.is_file() {
                    continue;
                }

                let Ok(from_root) = path.strip_prefix(root) else {
                    continue;
                };

                if self.is_excluded(from_root) || !seen.insert(path.clone()) {
                    continue;
                }

                let relative = path
                    .strip_prefix(&base)
                    .map(Utf8Path::to_path_buf)
                    .unwrap_or_else(|_| from_root.to_path_buf());

                files.push(SourceFile { path, relative });
            }
        }

        Ok(files)
    }

    /// Static directories that contain every possible match, used as watch
    /// roots.
    pub fn roots(&self) -> Vec<Utf8PathBuf> {
        self.include.iter().map(|glob| glob_base(&glob.raw)).collect()
    }
}

fn is_literal(glob: &str) -> bool {
    !glob.contains(['*', '?', '['])
}

/// Splits off the static part of a glob.
///
/// Everything before the first component containing a wildcard is the base,
/// for a pattern without wildcards the base is the parent directory.
pub fn glob_base(glob: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(glob);
    let components: Vec<_> = path.components().collect();

    match components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
    {
        Some(split) => components.iter().take(split).collect(),
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}
