//! Command-line entry point for the stagewise pipeline runner.

use anyhow::Context;
use clap::{Parser, Subcommand};
use stagewise::config::RunParameters;
use stagewise::metrics::{HttpSink, MetricsSink, NoOpSink};
use stagewise::pipeline::Scheduler;
use stagewise::stages::classifier_registry;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "stagewise", version, about = "Incremental runner for the classifier pipeline")]
struct Cli {
    /// Project root paths are resolved against.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Location document, relative to the project root.
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Parameter document, relative to the project root.
    #[arg(long, default_value = "params.yaml")]
    params: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline, skipping stages whose inputs are unchanged.
    Run,
    /// Run one stage unconditionally, ignoring its staleness.
    Stage {
        /// The stage to run.
        name: String,
    },
    /// Show which stages a run would execute, without executing anything.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stagewise=info")),
        )
        .init();

    let cli = Cli::parse();
    let params = Arc::new(
        RunParameters::load(&cli.root, &cli.config, &cli.params)
            .context("loading configuration")?,
    );

    let sink: Arc<dyn MetricsSink> = match &params.paths().tracking.tracking_uri {
        Some(uri) => Arc::new(HttpSink::new(
            uri.clone(),
            params.paths().tracking.experiment_name.clone(),
        )),
        None => Arc::new(NoOpSink),
    };
    let registry = classifier_registry(&params, sink)?;
    let scheduler = Scheduler::new(params);

    let report = match &cli.command {
        Command::Run => scheduler.run(&registry).await?,
        Command::Stage { name } => scheduler.run_stage(&registry, name).await?,
        Command::Status => scheduler.status(&registry)?,
    };
    println!("{}", report.summary());
    Ok(())
}
