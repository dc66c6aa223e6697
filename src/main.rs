//! Gatebench CLI — sync the policy library and generate benchmark tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use gatebench::config::{self, Config};
use gatebench::library::{LibrarySync, SampleSource};
use gatebench::logging;
use gatebench::manifest::remediate::Remediator;
use gatebench::oracle::delegate::{DelegateConfig, OracleDelegate};
use gatebench::oracle::gemini::GeminiOracle;
use gatebench::pipeline::Pipeline;
use gatebench::report::RunReport;
use gatebench::task::{TaskEmitter, WaitableKinds};

/// Benchmark fixture generator for Gatekeeper policy libraries.
#[derive(Debug, Parser)]
#[command(name = "gatebench", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Clone or update the upstream policy library.
    Sync,

    /// Generate benchmark tasks from the library samples.
    Generate {
        /// Skip the library sync step.
        #[arg(long)]
        no_sync: bool,

        /// Disable oracle delegation for this run.
        #[arg(long)]
        no_oracle: bool,

        /// Override the configured output directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config =
        config::load_or_default(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Sync => {
            logging::init_cli();
            sync_library(&config).await
        }
        Command::Generate {
            no_sync,
            no_oracle,
            output,
        } => {
            let out_dir = output.unwrap_or_else(|| PathBuf::from(&config.output.dir));
            let _guard = logging::init_batch(&out_dir.join("logs"))
                .context("failed to initialise logging")?;
            generate(&config, &out_dir, no_sync, no_oracle).await
        }
    }
}

async fn sync_library(config: &Config) -> Result<()> {
    let sync = LibrarySync::new(
        config.library.repo_url.clone(),
        config.library.local_dir.clone(),
        config.library.sync_timeout(),
    );
    sync.sync().await.context("library sync failed")?;
    Ok(())
}

async fn generate(config: &Config, out_dir: &Path, no_sync: bool, no_oracle: bool) -> Result<()> {
    if !no_sync {
        sync_library(config).await?;
    }

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;

    let source = SampleSource::new(
        config.library.local_dir.clone(),
        config.library.categories.clone(),
        config.library.excluded_policies.clone(),
    );
    let samples = source.discover();
    info!(count = samples.len(), "discovered samples");

    let pipeline = Pipeline::new(Remediator::default(), build_delegate(config, no_oracle));
    let emitter = TaskEmitter::new(
        out_dir,
        config.output.namespace_prefix.clone(),
        config.output.difficulty.clone(),
        WaitableKinds::default(),
    );

    // One sample start-to-finish before the next; a failed sample never
    // aborts the batch.
    let mut report = RunReport::default();
    let mut index: usize = 0;
    for case in &samples {
        let policy_id = format!("{}/{}", case.category, case.policy);
        match pipeline.prepare(case).await {
            None => report.record_skip(&policy_id, &case.sample, "no usable documents"),
            Some(prepared) => match emitter.emit(&prepared, index) {
                Ok(record) => {
                    info!(task = %record.task_name, "generated task");
                    report.record_task(record);
                    index = index.saturating_add(1);
                }
                Err(err) => {
                    warn!(policy = %policy_id, error = %err, "failed to emit task");
                    report.record_skip(&policy_id, &case.sample, format!("emit failed: {err}"));
                }
            },
        }
    }

    report
        .write(&out_dir.join("report.md"))
        .context("failed to write run report")?;
    info!(
        generated = report.generated.len(),
        skipped = report.skipped.len(),
        "generation complete"
    );
    Ok(())
}

fn build_delegate(config: &Config, no_oracle: bool) -> Option<OracleDelegate> {
    if no_oracle || !config.oracle.enabled {
        info!("oracle delegation disabled");
        return None;
    }
    let api_key = std::env::var(&config.oracle.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        warn!(
            var = %config.oracle.api_key_env,
            "API key not set; oracle delegation disabled"
        );
        return None;
    }
    let oracle = Arc::new(GeminiOracle::new(config.oracle.model.clone(), api_key));
    Some(OracleDelegate::new(
        oracle,
        DelegateConfig {
            timeout: config.oracle.timeout(),
            min_call_interval: config.oracle.min_call_interval(),
        },
    ))
}
