//! The stock build recipe.
//!
//! | task                      | prerequisites     | does                                  |
//! |---------------------------|-------------------|---------------------------------------|
//! | `clean`                   |                   | removes `.tmp`, empties `dist`        |
//! | `copy-images`             |                   | copies images as they are             |
//! | `images`                  |                   | optimizes images, adds WebP siblings  |
//! | `styles`                  |                   | bundles, prefixes and minifies CSS    |
//! | `copy-scripts`            |                   | copies top-level scripts              |
//! | `scripts`                 |                   | concatenates and transpiles scripts   |
//! | `scripts-prod`            | `copy-scripts`    | same, then minifies                   |
//! | `html`                    |                   | rewrites build blocks in pages        |
//! | `html-min`                |                   | same, then minifies                   |
//! | `copy`                    |                   | copies top-level files except pages   |
//! | `copy-sw-scripts`         |                   | copies the worker's bootstrap scripts |
//! | `generate-service-worker` | `copy-sw-scripts` | writes `service-worker.js`            |

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::PipelineConfig;
use crate::engine::Diagnostics;
use crate::error::{BuildError, ConfigError, FuigoError, OrchestrationError};
use crate::manifest::{BootstrapScripts, ManifestGenerator};
use crate::transform::{CleanOutput, CopyFiles, HtmlProcessor, ScriptBundler, StyleProcessor};
use crate::{Blueprint, Environment, FileSet, Pipeline, Schedule};

/// Which variant of the recipe to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Production,
}

impl Profile {
    pub fn schedule(self) -> Schedule {
        match self {
            Profile::Development => Schedule::new()
                .then(["clean"])
                .then(["html", "scripts", "copy-images", "styles"])
                .then(["copy"])
                .then(["generate-service-worker"]),
            Profile::Production => Schedule::new()
                .then(["clean"])
                .then(["html-min", "scripts-prod", "images", "styles"])
                .then(["copy"])
                .then(["generate-service-worker"]),
        }
    }
}

/// What a command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Development build, then the dev server.
    Serve,
    /// A schedule to run once.
    Run(Schedule),
}

impl Invocation {
    /// Reads a list of names given on the command line.
    ///
    /// `default` and `build` expand to the groups of their profile, every
    /// run of other names becomes one group, in the order given. No names at
    /// all means `default`. `serve` never returns and must stand alone.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, OrchestrationError> {
        let names: Vec<&str> = names.iter().map(|name| name.as_ref()).collect();

        match names.as_slice() {
            [] => return Ok(Self::Run(Profile::Development.schedule())),
            ["serve"] => return Ok(Self::Serve),
            _ if names.contains(&"serve") => {
                return Err(OrchestrationError::Exclusive("serve".into()));
            }
            _ => {}
        }

        let mut groups = Vec::new();
        let mut pending = Vec::new();

        for name in names {
            let profile = match name {
                "default" => Profile::Development,
                "build" => Profile::Production,
                task => {
                    pending.push(task.to_string());
                    continue;
                }
            };

            if !pending.is_empty() {
                groups.push(std::mem::take(&mut pending));
            }
            groups.extend(profile.schedule().groups().iter().cloned());
        }

        if !pending.is_empty() {
            groups.push(pending);
        }

        let schedule = groups
            .into_iter()
            .fold(Schedule::new(), |schedule, group| schedule.then(group));

        Ok(Self::Run(schedule))
    }
}

fn glob(base: &Utf8Path, pattern: &str) -> String {
    format!("{base}/{pattern}")
}

/// Declares every task of the recipe.
pub fn blueprint(root: &Utf8Path, config: &PipelineConfig) -> Result<Blueprint, ConfigError> {
    let src = &config.source;
    let dist = &config.dist;
    let sw = &config.service_worker;
    let images = FileSet::new([glob(src, "images/**/*")])?;

    let mut blueprint = Blueprint::new();

    blueprint.task("clean").run(CleanOutput::new(
        [config.tmp.clone()],
        dist.clone(),
        config.keep.iter().cloned(),
    ));

    blueprint.task("copy-images").run(CopyFiles::new(
        "copy-images",
        images.clone().dot(true),
        dist.join("images"),
    ));

    #[cfg(feature = "image")]
    blueprint
        .task("images")
        .run(crate::transform::ImageOptimizer::new(images, dist.join("images")));
    #[cfg(not(feature = "image"))]
    blueprint
        .task("images")
        .run(CopyFiles::new("images", images, dist.join("images")));

    blueprint.task("styles").run(StyleProcessor::new(
        FileSet::new(config.styles())?,
        dist.join("styles"),
        &config.browsers,
    )?);

    blueprint.task("copy-scripts").run(CopyFiles::new(
        "copy-scripts",
        FileSet::new([glob(src, "scripts/*")])?,
        dist.join("scripts"),
    ));

    let scripts = |title: &str| -> Result<ScriptBundler, ConfigError> {
        ScriptBundler::new(
            title,
            FileSet::new(config.scripts())?,
            dist.join("scripts"),
            config.script_output.as_str(),
            &config.script_target,
        )
    };

    blueprint.task("scripts").run(scripts("scripts")?);
    blueprint
        .task("scripts-prod")
        .depends_on(["copy-scripts"])
        .run(scripts("scripts-prod")?.minify(true));

    let pages = FileSet::new([glob(src, "**/*.html")])?;
    blueprint
        .task("html")
        .run(HtmlProcessor::new(pages.clone(), dist.clone()));
    blueprint
        .task("html-min")
        .run(HtmlProcessor::new(pages, dist.clone()).minify(true));

    blueprint.task("copy").run(CopyFiles::new(
        "copy",
        FileSet::new([glob(src, "*"), format!("!{}", glob(src, "*.html"))])?.dot(true),
        dist.clone(),
    ));

    let sw_dir = Utf8Path::new("scripts/sw");
    let runtime_caching = config.runtime_caching();
    blueprint.task("copy-sw-scripts").run(CopyFiles::new(
        "copy-sw-scripts",
        FileSet::new([sw.toolbox.as_str(), runtime_caching.as_str()])?,
        dist.join(sw_dir),
    ));

    let url = |path: &Utf8PathBuf| {
        let name = path.file_name().unwrap_or(path.as_str());
        sw_dir.join(name).to_string()
    };
    let generator = ManifestGenerator::new(
        dist.clone(),
        config.cache_id(root)?,
        BootstrapScripts::new(url(&sw.toolbox), url(&runtime_caching)),
        &sw.font_format,
    )?
    .output(sw.output.as_str());

    blueprint
        .task("generate-service-worker")
        .depends_on(["copy-sw-scripts"])
        .run(generator);

    Ok(blueprint)
}

/// Watch rules used by the dev server.
#[cfg(feature = "live")]
pub fn watch_rules(config: &PipelineConfig) -> Result<Vec<crate::WatchRule>, ConfigError> {
    use crate::{Signal, WatchRule};

    let src = &config.source;

    Ok(vec![
        WatchRule::new(FileSet::new([glob(src, "**/*.html")])?, "html", Signal::Reload),
        WatchRule::new(FileSet::new([glob(src, "styles/**/*.css")])?, "styles", Signal::Css),
        WatchRule::new(FileSet::new([glob(src, "scripts/**/*.js")])?, "scripts", Signal::Reload),
        WatchRule::new(
            FileSet::new([
                glob(src, "images/**/*.jpg"),
                glob(src, "images/**/*.png"),
                format!("!{}", glob(src, "images/sprite/*")),
            ])?,
            "images",
            Signal::None,
        ),
    ])
}

/// A project directory together with its configuration and task graph.
pub struct Project {
    root: Utf8PathBuf,
    config: PipelineConfig,
    pipeline: Pipeline,
}

impl Project {
    pub fn new(root: impl Into<Utf8PathBuf>, config: PipelineConfig) -> Result<Self, FuigoError> {
        let root = root.into();
        let pipeline = blueprint(&root, &config)?.finish()?;

        Ok(Self {
            root,
            config,
            pipeline,
        })
    }

    /// Loads `fuigo.toml` (or `path`) from `root`.
    pub fn load(root: impl Into<Utf8PathBuf>, path: Option<&Utf8Path>) -> Result<Self, FuigoError> {
        let root = root.into();
        let config = PipelineConfig::load(&root, path)?;
        Self::new(root, config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn environment(&self) -> Environment {
        let mut env = Environment::new(&self.root);
        env.policy = self.config.error_policy;
        env
    }

    /// Runs one profile's schedule.
    pub fn build(&self, profile: Profile) -> Result<Diagnostics, BuildError> {
        tracing::info!(?profile, root = %self.root, "building");
        self.pipeline
            .run_schedule(&self.environment(), &profile.schedule())
    }

    /// Runs an arbitrary schedule.
    pub fn run_schedule(&self, schedule: &Schedule) -> Result<Diagnostics, BuildError> {
        self.pipeline.run_schedule(&self.environment(), schedule)
    }

    /// Runs individual tasks with their prerequisites.
    pub fn run<S: AsRef<str>>(&self, tasks: &[S]) -> Result<Diagnostics, BuildError> {
        self.pipeline.run(&self.environment(), tasks)
    }

    /// Development build, then the dev server. Only returns on error.
    #[cfg(feature = "live")]
    pub fn serve(&self) -> Result<(), FuigoError> {
        let dispatcher = crate::Dispatcher::new(
            watch_rules(&self.config)?,
            std::time::Duration::from_millis(self.config.server.reload_delay_ms),
        );

        let options = crate::ServeOptions {
            port: self.config.server.port,
            primary: self.config.tmp.clone(),
            fallback: self.config.dist.clone(),
        };

        crate::serve(
            &self.pipeline,
            &Profile::Development.schedule(),
            &dispatcher,
            self.environment(),
            options,
        )?;

        Ok(())
    }
}
