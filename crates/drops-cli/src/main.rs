use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use drops_provider::{cancel_pair, CancelHandle, DigitalOcean};
use drops_reconcile::{Config, DesiredStateSource, Orchestrator, YamlFile};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "drops", version, about = "Reconcile DigitalOcean droplets and volumes against a desired-state file")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, default_value = "drops.toml")]
    config: PathBuf,

    /// Desired-state YAML document (overrides the config).
    #[arg(long)]
    desired_state: Option<PathBuf>,

    /// Pause between the volume and droplet phases (overrides the config).
    #[arg(long)]
    settle_seconds: Option<u64>,

    /// Cancel the run after this many seconds; 0 disables (overrides the config).
    #[arg(long)]
    timeout_seconds: Option<u64>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a default configuration file
    Init,

    /// Check every declared droplet and volume without contacting the provider
    Validate,

    /// Show what a pass would change, without changing anything
    Plan,

    /// Run one reconciliation pass
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load_or_default(&cli.config)?;
    if let Some(path) = cli.desired_state {
        cfg.reconcile.desired_state = path;
    }
    if let Some(secs) = cli.settle_seconds {
        cfg.reconcile.settle_seconds = secs;
    }
    if let Some(secs) = cli.timeout_seconds {
        cfg.reconcile.timeout_seconds = secs;
    }

    match cli.cmd {
        Command::Init => {
            if cli.config.exists() {
                bail!("{} already exists", cli.config.display());
            }
            cfg.save_to(&cli.config)?;
            println!("Wrote {}", cli.config.display());
        }
        Command::Validate => {
            let source = YamlFile::new(&cfg.reconcile.desired_state);
            let state = source
                .load()
                .with_context(|| format!("load {}", source.path().display()))?;
            let errors = state.validate();
            for e in &errors {
                println!("invalid: {e}");
            }
            if !errors.is_empty() {
                bail!("{} invalid entit(ies) in {}", errors.len(), source.path().display());
            }
            println!(
                "OK: {} droplet(s), {} volume(s)",
                state.droplets.len(),
                state.volumes.len()
            );
        }
        Command::Plan => {
            let orchestrator = orchestrator(&cfg)?;
            let (handle, cancel) = cancel_pair();
            watch_for_cancel(handle, cfg.timeout());
            let plan = orchestrator.plan(&cancel).await?;
            print!("{plan}");
        }
        Command::Run => {
            let orchestrator = orchestrator(&cfg)?;
            let (handle, cancel) = cancel_pair();
            watch_for_cancel(handle, cfg.timeout());
            let report = orchestrator.run(&cancel).await?;
            println!("{report}");
            for failure in &report.failures {
                println!("failed: {failure}");
            }
            if !report.is_clean() {
                bail!("{} action(s) failed", report.failures.len());
            }
        }
    }

    Ok(())
}

fn orchestrator(cfg: &Config) -> Result<Orchestrator> {
    let token = cfg.token()?;
    let client = DigitalOcean::new(token)
        .with_base_url(cfg.provider.api_url.clone())
        .with_per_page(cfg.provider.per_page)
        .with_retry(cfg.retry_policy());
    info!(
        "api={} desired_state={} settle={}s",
        cfg.provider.api_url,
        cfg.reconcile.desired_state.display(),
        cfg.reconcile.settle_seconds
    );
    let source = YamlFile::new(&cfg.reconcile.desired_state);
    Ok(Orchestrator::new(Arc::new(client), Box::new(source)).with_settle(cfg.settle()))
}

/// Fires `handle` on Ctrl-C or when `timeout` elapses, whichever comes first.
fn watch_for_cancel(handle: CancelHandle, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for ctrl-c: {e:?}");
                std::future::pending::<()>().await;
            }
        };
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = interrupted => warn!("interrupted; cancelling run"),
            _ = deadline => warn!("run timeout reached; cancelling run"),
        }
        handle.cancel();
    });
}
