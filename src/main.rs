use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use fuigo::{Diagnostics, ErrorPolicy, Invocation, PipelineConfig, Project};

/// Builds the static assets of a web app.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Project root
    #[arg(long, default_value = ".", value_hint = clap::ValueHint::DirPath)]
    root: Utf8PathBuf,

    /// Config file (default: <root>/fuigo.toml, if present)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    config: Option<Utf8PathBuf>,

    /// What to do with malformed inputs: best-effort or fail-fast
    #[arg(long)]
    policy: Option<ErrorPolicy>,

    /// Write a Mermaid diagram of the run to this file
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    graph: Option<Utf8PathBuf>,

    /// Task names, `default` (development build) and `build` (production
    /// build) may appear among them. `serve` runs alone.
    tasks: Vec<String>,
}

fn main() -> Result<()> {
    #[cfg(feature = "logging")]
    fuigo::init_logging();

    let args = Args::parse();

    let mut config = PipelineConfig::load(&args.root, args.config.as_deref())?;
    if let Some(policy) = args.policy {
        config.error_policy = policy;
    }

    let invocation = Invocation::parse(&args.tasks)?;
    let project = Project::new(&args.root, config)?;

    let diagnostics = match invocation {
        Invocation::Serve => return serve(&project),
        Invocation::Run(schedule) => project.run_schedule(&schedule)?,
    };

    report(&diagnostics);

    if let Some(path) = &args.graph {
        std::fs::write(path, diagnostics.render_mermaid(project.pipeline()))
            .with_context(|| format!("Couldn't write graph to {path}"))?;
    }

    Ok(())
}

fn report(diagnostics: &Diagnostics) {
    let absorbed = diagnostics.absorbed().count();
    if absorbed > 0 {
        tracing::warn!("{absorbed} task(s) skipped malformed input");
    }

    tracing::info!(
        "done, {} written",
        indicatif::HumanBytes(diagnostics.bytes())
    );
}

#[cfg(feature = "live")]
fn serve(project: &Project) -> Result<()> {
    project.serve()?;
    Ok(())
}

#[cfg(not(feature = "live"))]
fn serve(_: &Project) -> Result<()> {
    anyhow::bail!("fuigo was built without the `live` feature")
}
