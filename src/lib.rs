#![forbid(unsafe_code)]
//! `fuigo` builds the static assets of a web app: it cleans the output
//! directory, compiles pages, scripts and styles, optimizes images, copies
//! everything else and finally writes a service worker that precaches the
//! result.
//!
//! The work is described as a graph of named tasks. Each task wraps one
//! [`Transformer`] and may name prerequisites; a [`Schedule`] lists groups
//! of tasks which run one after another, tasks inside a group running in
//! parallel.
//!
//! ```no_run
//! use fuigo::{Profile, Project};
//!
//! let project = Project::load(".", None)?;
//! let diagnostics = project.build(Profile::Production)?;
//! println!("{}", diagnostics.render_mermaid(project.pipeline()));
//! # Ok::<(), fuigo::FuigoError>(())
//! ```
//!
//! Custom pipelines are declared with a [`Blueprint`]:
//!
//! ```no_run
//! use fuigo::transform::CopyFiles;
//! use fuigo::{Blueprint, Environment, FileSet};
//!
//! let mut blueprint = Blueprint::new();
//! blueprint
//!     .task("fonts")
//!     .run(CopyFiles::new("fonts", FileSet::new(["app/fonts/**/*"])?, "dist/fonts"));
//! blueprint.task("default").depends_on(["fonts"]).group();
//!
//! let pipeline = blueprint.finish()?;
//! pipeline.run(&Environment::new("."), &["default"])?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod blueprint;
mod config;
mod core;
mod engine;
mod error;
mod fileset;
pub mod manifest;
pub mod recipe;
pub mod transform;
mod utils;

pub use crate::blueprint::{Blueprint, Pipeline, Schedule, TaskDef};
pub use crate::config::{CONFIG_FILE, PipelineConfig, ServerConfig, ServiceWorkerConfig};
pub use crate::core::{Environment, ErrorPolicy, Mode, TaskContext};
pub use crate::engine::{Diagnostics, TaskExecution, TaskOutcome};
pub use crate::error::*;
pub use crate::fileset::{FileSet, SourceFile};
pub use crate::recipe::{Invocation, Profile, Project};
pub use crate::transform::{TaskReport, Transformer};

#[cfg(feature = "live")]
pub use crate::engine::{Dispatcher, Reloader, ServeOptions, ServeState, Signal, WatchRule, serve};

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
