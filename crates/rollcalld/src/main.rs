use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::{Config, Ledger, OnnxRecognizer, Registry, Session};
use rollcall_hw::V4l2Backend;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

mod presenter;

use presenter::LogPresenter;

#[derive(Parser)]
#[command(name = "rollcalld", about = "Face recognition attendance daemon")]
struct Args {
    /// TOML config file; ROLLCALL_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    tracing::info!(?config, "rollcalld starting");

    let mut recognizer = OnnxRecognizer::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;

    let (registry, skipped) = Registry::load(&config.faces_dir, &mut recognizer)
        .with_context(|| format!("failed to load faces from {}", config.faces_dir.display()))?;
    for s in &skipped {
        tracing::warn!(path = %s.path.display(), error = %s.error, kind = %s.error.kind(), "reference image skipped");
    }
    if registry.is_empty() {
        tracing::warn!("no identities registered; every face will be unknown");
    }

    let ledger = Ledger::open(&config.log_dir, chrono::Local::now().date_naive())
        .with_context(|| format!("failed to open attendance log in {}", config.log_dir.display()))?;

    let mut session = Session::new(V4l2Backend, recognizer, registry, ledger, config.session_config());
    session.start().context("failed to start capture session")?;
    tracing::info!(
        device = ?session.device_index(),
        identities = session.registry().len(),
        present = session.ledger().present_today().len(),
        "rollcalld ready"
    );

    let mut presenter = LogPresenter::default();
    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("failed to listen for shutdown signal")?;
                tracing::info!("shutdown requested");
                break;
            }
            _ = interval.tick() => {
                let report = session.tick(&mut presenter);
                if report.stream_ended {
                    tracing::warn!("capture stream ended, exiting");
                    break;
                }
            }
        }
    }

    session.stop();
    tracing::info!(
        frames = presenter.frames(),
        recorded = presenter.recorded(),
        absent = session.absent().len(),
        "rollcalld stopped"
    );
    Ok(())
}
