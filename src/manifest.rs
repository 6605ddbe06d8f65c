//! Service worker generation.
//!
//! After every other task has written its output, the finished `dist` tree is
//! enumerated and a `service-worker.js` is written that precaches each static
//! file under its URL, keyed by a content hash. Runtime caching is left to
//! the two bootstrap scripts the worker imports.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::core::Hash32;
use crate::error::TransformError;
use crate::transform::{TaskReport, Transformer, emit};
use crate::{FileSet, TaskContext};

/// The scripts a worker imports before anything else.
///
/// The toolbox defines the helpers the runtime caching script calls, so the
/// two are kept as separate fields and always emitted in this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapScripts {
    pub toolbox: String,
    pub runtime: String,
}

impl BootstrapScripts {
    pub fn new(toolbox: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            toolbox: toolbox.into(),
            runtime: runtime.into(),
        }
    }

    pub fn ordered(&self) -> [&str; 2] {
        [&self.toolbox, &self.runtime]
    }
}

/// One precached file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecacheEntry {
    pub url: String,
    pub revision: String,
}

/// The descriptor embedded in the generated worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheManifest {
    pub cache_id: String,
    pub import_scripts: Vec<String>,
    pub static_file_globs: Vec<String>,
    pub strip_prefix: String,
    pub precache: Vec<PrecacheEntry>,
}

/// Writes the service worker for a finished output tree.
pub struct ManifestGenerator {
    dist: Utf8PathBuf,
    cache_id: String,
    scripts: BootstrapScripts,
    globs: FileSet,
    output: String,
}

impl ManifestGenerator {
    /// Precaches the usual static assets of `dist`: images, fonts of one
    /// format, scripts, styles and top-level HTML and JSON files.
    pub fn new(
        dist: impl Into<Utf8PathBuf>,
        cache_id: impl Into<String>,
        scripts: BootstrapScripts,
        font_format: &str,
    ) -> Result<Self, glob::PatternError> {
        let dist = dist.into();
        let globs = FileSet::new([
            format!("{dist}/images/**/*"),
            format!("{dist}/fonts/**/*.{font_format}"),
            format!("{dist}/scripts/**/*.js"),
            format!("{dist}/styles/**/*.css"),
            format!("{dist}/*.html"),
            format!("{dist}/*.json"),
        ])?;

        Ok(Self {
            dist,
            cache_id: cache_id.into(),
            scripts,
            globs,
            output: "service-worker.js".into(),
        })
    }

    /// File name of the worker inside `dist`.
    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Enumerates `dist` under `root`.
    pub fn manifest(&self, root: &Utf8Path) -> Result<CacheManifest, TransformError> {
        let strip_prefix = format!("{}/", self.dist);
        let mut precache = Vec::new();

        for file in self.globs.resolve(root)? {
            let Ok(relative) = file.path.strip_prefix(root.join(&self.dist)) else {
                continue;
            };

            let url = relative.components().map(|c| c.as_str()).collect::<Vec<_>>().join("/");
            if url == self.output {
                continue;
            }

            let revision = Hash32::hash_file(&file.path)
                .map_err(|e| TransformError::io(&file.path, e))?
                .to_hex();

            precache.push(PrecacheEntry { url, revision });
        }

        precache.sort_by(|a, b| a.url.cmp(&b.url));
        precache.dedup_by(|a, b| a.url == b.url);

        Ok(CacheManifest {
            cache_id: self.cache_id.clone(),
            import_scripts: self.scripts.ordered().map(String::from).to_vec(),
            static_file_globs: self.globs.globs().map(String::from).collect(),
            strip_prefix,
            precache,
        })
    }
}

/// Query parameter carrying the revision in precache keys.
pub const REVISION_PARAM: &str = "__rev";

/// Renders the worker source around a manifest.
pub fn render(manifest: &CacheManifest) -> Result<String, TransformError> {
    let json = serde_json::to_string_pretty(manifest)?;
    let imports = serde_json::to_string(&manifest.import_scripts)?;
    let param = serde_json::to_string(REVISION_PARAM)?;

    Ok(format!(
        r#"// Generated by fuigo, do not edit.
"use strict";

const manifest = {json};

importScripts(...{imports});

const cacheName = manifest.cache_id + "-precache";
const revisionParam = {param};

// The Cache API ignores fragments, revisions go into the query string.
const keyOf = entry => {{
  const url = new URL(entry.url, self.location);
  url.searchParams.set(revisionParam, entry.revision);
  return url.href;
}};

const precached = new Map(
  manifest.precache.map(entry => [new URL(entry.url, self.location).href, entry])
);
const current = new Set(manifest.precache.map(keyOf));

self.addEventListener("install", event => {{
  event.waitUntil(
    caches.open(cacheName).then(cache =>
      Promise.all(
        manifest.precache.map(entry =>
          cache.match(keyOf(entry)).then(hit =>
            hit || fetch(entry.url, {{ cache: "reload" }}).then(response => {{
              if (!response.ok) throw new Error("precaching " + entry.url + " failed");
              return cache.put(keyOf(entry), response);
            }})
          )
        )
      )
    ).then(() => self.skipWaiting())
  );
}});

self.addEventListener("activate", event => {{
  event.waitUntil(
    caches.open(cacheName).then(cache =>
      cache.keys().then(requests =>
        Promise.all(
          requests
            .filter(request => !current.has(request.url))
            .map(request => cache.delete(request))
        )
      )
    ).then(() => self.clients.claim())
  );
}});

self.addEventListener("fetch", event => {{
  if (event.request.method !== "GET") return;

  const url = new URL(event.request.url);
  url.hash = "";
  url.search = "";
  const entry = precached.get(url.href);
  if (!entry) return;

  event.respondWith(
    caches.open(cacheName).then(cache =>
      cache.match(keyOf(entry)).then(hit => hit || fetch(event.request))
    )
  );
}});
"#
    ))
}

impl Transformer for ManifestGenerator {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
        let mut report = TaskReport::new("service-worker");
        let manifest = self.manifest(&ctx.env.root)?;

        tracing::debug!(
            cache_id = %manifest.cache_id,
            files = manifest.precache.len(),
            "precache manifest"
        );

        let path = ctx.path(&self.dist).join(&self.output);
        report.add(emit(&path, render(&manifest)?)?);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Environment;
    use crate::transform::testing::{context, tempdir, write};

    fn generator() -> ManifestGenerator {
        let scripts = BootstrapScripts::new("scripts/sw/sw-toolbox.js", "scripts/sw/runtime-caching.js");
        ManifestGenerator::new("dist", "demo", scripts, "woff").unwrap()
    }

    #[test]
    fn test_toolbox_is_imported_first() {
        let (_dir, root) = tempdir();
        let manifest = generator().manifest(&root).unwrap();
        assert_eq!(
            manifest.import_scripts,
            ["scripts/sw/sw-toolbox.js", "scripts/sw/runtime-caching.js"]
        );

        let js = render(&manifest).unwrap();
        let toolbox = js.find("importScripts(...[\"scripts/sw/sw-toolbox.js\"").unwrap();
        assert!(toolbox < js.find("runtime-caching.js\"]").unwrap());
    }

    #[test]
    fn test_precaches_matching_files_only() {
        let (_dir, root) = tempdir();
        write(&root, "dist/index.html", "<html></html>");
        write(&root, "dist/manifest.json", "{}");
        write(&root, "dist/styles/main.css", "a{}");
        write(&root, "dist/scripts/main.js", "1");
        write(&root, "dist/images/logo.png", "png");
        write(&root, "dist/fonts/a.woff", "woff");
        write(&root, "dist/fonts/a.ttf", "ttf");
        write(&root, "dist/robots.txt", "txt");
        write(&root, "dist/nested/page.html", "<html></html>");
        write(&root, "dist/service-worker.js", "old");

        let manifest = generator().manifest(&root).unwrap();
        let urls: Vec<_> = manifest.precache.iter().map(|e| e.url.as_str()).collect();

        assert_eq!(
            urls,
            [
                "fonts/a.woff",
                "images/logo.png",
                "index.html",
                "manifest.json",
                "scripts/main.js",
                "styles/main.css",
            ]
        );
        assert_eq!(manifest.strip_prefix, "dist/");
        assert_eq!(manifest.static_file_globs.len(), 6);
        assert!(manifest.precache.iter().all(|e| e.revision.len() == 64));
    }

    #[test]
    fn test_output_is_deterministic() {
        let (_dir, root) = tempdir();
        write(&root, "dist/index.html", "<html></html>");
        write(&root, "dist/styles/main.css", "a{}");

        let env = Environment::new(&root);
        generator().run(&context(&env)).unwrap();
        let first = std::fs::read(root.join("dist/service-worker.js")).unwrap();

        generator().run(&context(&env)).unwrap();
        let second = std::fs::read(root.join("dist/service-worker.js")).unwrap();

        assert_eq!(first, second);
        let js = String::from_utf8(first).unwrap();
        assert!(js.contains(r#""cache_id": "demo""#));
    }

    #[test]
    fn test_revision_follows_content() {
        let (_dir, root) = tempdir();
        write(&root, "dist/index.html", "one");
        let before = generator().manifest(&root).unwrap();

        write(&root, "dist/index.html", "two");
        let after = generator().manifest(&root).unwrap();

        assert_ne!(before.precache[0].revision, after.precache[0].revision);
    }

    #[test]
    fn test_precache_keys_carry_the_revision_in_the_query() {
        let (_dir, root) = tempdir();
        write(&root, "dist/index.html", "<html></html>");

        let js = render(&generator().manifest(&root).unwrap()).unwrap();

        assert!(!js.contains(r##""#""##));
        assert!(js.contains(r#"const revisionParam = "__rev";"#));
        assert!(js.contains("url.searchParams.set(revisionParam, entry.revision)"));
        assert_eq!(js.matches("cache.match(keyOf(entry))").count(), 2);
        assert!(js.contains("cache.put(keyOf(entry), response)"));
        assert!(js.contains(".filter(request => !current.has(request.url))"));
    }
}
