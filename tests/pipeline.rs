use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use fuigo::{
    BuildError, ErrorPolicy, FuigoError, OrchestrationError, PipelineConfig, Profile, Project,
    TaskOutcome,
};

const INDEX: &str = r#"<!doctype html>
<html>
<head>
  <title>Fixture</title>
  <!-- build:css styles/main.css -->
  <link rel="stylesheet" href="styles/a.css">
  <link rel="stylesheet" href="styles/main.css">
  <!-- endbuild -->
</head>
<body>
  <h1>Hello</h1>
  <!-- build:js scripts/main.js -->
  <script src="scripts/vendor.js"></script>
  <script src="scripts/main.js"></script>
  <!-- endbuild -->
</body>
</html>
"#;

const MAIN_JS: &str = r#"
function toggleNavigation(element) {
  const className = "open";
  element.classList.toggle(className);
  return element;
}

window.toggleNavigation = toggleNavigation;
"#;

fn write(root: &Utf8Path, path: &str, data: &str) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn fixture() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

    write(&root, "package.json", r#"{ "name": "fixture-app" }"#);
    write(&root, "app/index.html", INDEX);
    write(&root, "app/manifest.json", r#"{ "name": "Fixture" }"#);
    write(&root, "app/.htaccess", "Options -Indexes\n");
    write(&root, "app/robots.txt", "User-agent: *\n");
    write(&root, "app/scripts/main.js", MAIN_JS);
    write(&root, "app/scripts/sw/runtime-caching.js", "// runtime caching\n");
    write(&root, "app/styles/a.css", ".x { color: red; }\n");
    write(&root, "app/styles/main.css", "@import \"a.css\";\n\nbody { margin: 0; }\n");
    write(
        &root,
        "app/images/logo.svg",
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1"/>"#,
    );
    write(&root, "node_modules/sw-toolbox/sw-toolbox.js", "// toolbox\n");

    (dir, root)
}

/// Every file under `dir`, keyed by its path relative to `dir`.
fn snapshot(dir: &Utf8Path) -> BTreeMap<Utf8PathBuf, Vec<u8>> {
    fn walk(base: &Utf8Path, dir: &Utf8Path, acc: &mut BTreeMap<Utf8PathBuf, Vec<u8>>) {
        for entry in dir.read_dir_utf8().unwrap() {
            let path = entry.unwrap().into_path();
            if path.is_dir() {
                walk(base, &path, acc);
            } else {
                let relative = path.strip_prefix(base).unwrap().to_path_buf();
                acc.insert(relative, fs::read(&path).unwrap());
            }
        }
    }

    let mut acc = BTreeMap::new();
    walk(dir, dir, &mut acc);
    acc
}

fn read(root: &Utf8Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

#[test]
fn test_development_build_produces_the_output_tree() {
    let (_dir, root) = fixture();
    let project = Project::new(&root, PipelineConfig::default()).unwrap();

    let diagnostics = project.build(Profile::Development).unwrap();
    assert_eq!(diagnostics.absorbed().count(), 0);

    let dist = snapshot(&root.join("dist"));
    for path in [
        "index.html",
        "manifest.json",
        ".htaccess",
        "robots.txt",
        "images/logo.svg",
        "styles/main.css",
        "scripts/main.js",
        "scripts/sw/sw-toolbox.js",
        "scripts/sw/runtime-caching.js",
        "service-worker.js",
    ] {
        assert!(dist.contains_key(Utf8Path::new(path)), "missing {path}");
    }

    let html = read(&root, "dist/index.html");
    assert!(!html.contains("build:"));
    assert!(!html.contains("vendor.js"));
    assert_eq!(html.matches(r#"<script src="scripts/main.js"></script>"#).count(), 1);
    assert_eq!(html.matches("<link").count(), 1);

    // Development scripts keep their names.
    assert!(read(&root, "dist/scripts/main.js").contains("toggleNavigation"));
    assert!(read(&root, "dist/scripts/main.js").contains("className"));
}

#[test]
fn test_styles_inline_their_imports() {
    let (_dir, root) = fixture();
    let project = Project::new(&root, PipelineConfig::default()).unwrap();
    project.build(Profile::Development).unwrap();

    let css = read(&root, "dist/styles/main.css");
    assert!(css.contains(".x{color:red}"), "{css}");
    assert!(css.find(".x{").unwrap() < css.find("body{").unwrap());
}

#[test]
fn test_production_build_minifies() {
    let (_dir, root) = fixture();
    let project = Project::new(&root, PipelineConfig::default()).unwrap();

    project.build(Profile::Production).unwrap();

    let html = read(&root, "dist/index.html");
    assert!(!html.contains("<!--"));
    assert!(html.contains("scripts/main.js"));
    assert!(html.len() < INDEX.len());

    let js = read(&root, "dist/scripts/main.js");
    assert!(js.contains("toggleNavigation"));
    assert!(!js.contains("className"));
    assert!(js.len() < MAIN_JS.len());

    assert!(root.join("dist/images/logo.svg").is_file());
    assert!(root.join("dist/styles/main.css").is_file());
    assert!(root.join("dist/robots.txt").is_file());
}

#[test]
fn test_rebuilding_is_byte_identical() {
    let (_dir, root) = fixture();
    let project = Project::new(&root, PipelineConfig::default()).unwrap();

    for profile in [Profile::Development, Profile::Production] {
        project.build(profile).unwrap();
        let first = snapshot(&root.join("dist"));
        project.build(profile).unwrap();
        let second = snapshot(&root.join("dist"));

        assert_eq!(first, second, "{profile:?}");
    }
}

#[test]
fn test_clean_empties_dist_but_keeps_git() {
    let (_dir, root) = fixture();
    write(&root, "dist/stale.txt", "old");
    write(&root, "dist/.git/HEAD", "ref: refs/heads/main\n");
    write(&root, ".tmp/styles/main.css", "");

    let project = Project::new(&root, PipelineConfig::default()).unwrap();
    project.run(&["clean"]).unwrap();

    assert!(!root.join("dist/stale.txt").exists());
    assert!(root.join("dist/.git/HEAD").is_file());
    assert!(!root.join(".tmp").exists());
}

#[test]
fn test_service_worker_imports_toolbox_before_runtime_caching() {
    let (_dir, root) = fixture();
    let project = Project::new(&root, PipelineConfig::default()).unwrap();
    project.build(Profile::Production).unwrap();

    let worker = read(&root, "dist/service-worker.js");
    assert!(worker.contains(
        r#"importScripts(...["scripts/sw/sw-toolbox.js","scripts/sw/runtime-caching.js"]);"#
    ));
    assert!(worker.contains("fixture-app"));
    assert!(worker.contains(r#""url": "index.html""#));
    assert!(worker.contains(r#""url": "styles/main.css""#));
    assert!(!worker.contains(r#""url": "service-worker.js""#));
}

#[test]
fn test_empty_file_set_writes_nothing_and_the_build_continues() {
    let (_dir, root) = fixture();
    let config = PipelineConfig {
        scripts: Some(vec!["app/scripts/none/*.js".into()]),
        ..PipelineConfig::default()
    };
    let project = Project::new(&root, config).unwrap();

    project.build(Profile::Development).unwrap();

    assert!(!root.join("dist/scripts/main.js").exists());
    assert!(root.join("dist/styles/main.css").is_file());
    assert!(root.join("dist/service-worker.js").is_file());
}

#[test]
fn test_best_effort_absorbs_malformed_styles() {
    let (_dir, root) = fixture();
    write(&root, "app/styles/main.css", "@import \"missing.css\";\n");
    let project = Project::new(&root, PipelineConfig::default()).unwrap();

    let diagnostics = project.build(Profile::Development).unwrap();

    let absorbed: Vec<_> = diagnostics.absorbed().map(|(task, _)| task).collect();
    assert_eq!(absorbed, ["styles"]);
    assert!(matches!(
        diagnostics.executions["styles"].outcome,
        TaskOutcome::Absorbed(_)
    ));
    assert!(!root.join("dist/styles/main.css").exists());
    assert!(root.join("dist/service-worker.js").is_file());
}

#[test]
fn test_fail_fast_surfaces_malformed_styles() {
    let (_dir, root) = fixture();
    write(&root, "app/styles/main.css", "@import \"missing.css\";\n");
    let config = PipelineConfig {
        error_policy: ErrorPolicy::FailFast,
        ..PipelineConfig::default()
    };
    let project = Project::new(&root, config).unwrap();

    let err = project.build(Profile::Development).unwrap_err();

    assert!(matches!(err, BuildError::Task(ref task, _) if task == "styles"));
    // Later groups never start.
    assert!(!root.join("dist/service-worker.js").exists());
}

#[test]
fn test_missing_bootstrap_script_is_fatal() {
    let (_dir, root) = fixture();
    fs::remove_file(root.join("node_modules/sw-toolbox/sw-toolbox.js")).unwrap();
    let project = Project::new(&root, PipelineConfig::default()).unwrap();

    let err = project.build(Profile::Development).unwrap_err();
    assert!(matches!(err, BuildError::Task(ref task, _) if task == "copy-sw-scripts"));
}

#[test]
fn test_unknown_task_is_rejected_before_anything_runs() {
    let (_dir, root) = fixture();
    write(&root, "dist/stale.txt", "old");
    let project = Project::new(&root, PipelineConfig::default()).unwrap();

    let err = project.run(&["clean", "deploy"]).unwrap_err();

    assert!(matches!(
        err,
        BuildError::Orchestration(OrchestrationError::UnknownTask(ref name)) if name == "deploy"
    ));
    assert!(root.join("dist/stale.txt").exists());
}

#[test]
fn test_single_task_runs_with_prerequisites() {
    let (_dir, root) = fixture();
    let project = Project::new(&root, PipelineConfig::default()).unwrap();

    let diagnostics = project.run(&["generate-service-worker"]).unwrap();

    let ran: Vec<_> = diagnostics.executions.keys().map(String::as_str).collect();
    assert_eq!(ran, ["copy-sw-scripts", "generate-service-worker"]);
    assert!(root.join("dist/scripts/sw/sw-toolbox.js").is_file());
}

#[test]
fn test_configuration_file_moves_the_output() {
    let (_dir, root) = fixture();
    write(
        &root,
        "fuigo.toml",
        r#"
dist = "public"
error-policy = "fail-fast"

[service-worker]
cache-id = "configured"
"#,
    );

    let project = Project::load(&root, None).unwrap();
    assert_eq!(project.config().error_policy, ErrorPolicy::FailFast);

    project.build(Profile::Development).unwrap();

    assert!(root.join("public/index.html").is_file());
    assert!(!root.join("dist").exists());
    assert!(read(&root, "public/service-worker.js").contains("configured"));
}

#[test]
fn test_source_directory_moves_the_entry_points() {
    let (_dir, root) = fixture();
    fs::rename(root.join("app"), root.join("web")).unwrap();
    write(&root, "fuigo.toml", "source = \"web\"\n");

    let project = Project::load(&root, None).unwrap();
    let diagnostics = project.build(Profile::Development).unwrap();

    assert_eq!(diagnostics.absorbed().count(), 0);
    assert!(read(&root, "dist/scripts/main.js").contains("toggleNavigation"));
    assert!(read(&root, "dist/styles/main.css").contains(".x{color:red}"));
    assert!(root.join("dist/scripts/sw/runtime-caching.js").is_file());
    assert!(root.join("dist/index.html").is_file());
}

#[test]
fn test_explicit_configuration_file_must_exist() {
    let (_dir, root) = fixture();

    let err = Project::load(&root, Some(Utf8Path::new("missing.toml")))
        .err()
        .unwrap();
    assert!(matches!(err, FuigoError::Config(_)));
}
