use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use rollcall_core::{
    AttendanceLedger, AttendanceTracker, CommandNotifier, IdentityStabilizer, LedgerStore,
    NotificationDispatcher, NotificationThrottle,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod intake;

use config::Config;
use engine::EngineHandle;

#[derive(Parser)]
#[command(name = "rollcalld", about = "Rollcall attendance daemon")]
struct Args {
    /// Read frame reports from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    let today = Local::now().date_naive();

    let ledger = AttendanceLedger::open(
        LedgerStore::new(&config.ledger_dir),
        config.mark_cooldown(),
        today,
    )
    .with_context(|| format!("recovering attendance from {}", config.ledger_dir.display()))?;

    let tracker = AttendanceTracker::new(
        IdentityStabilizer::new(config.stabilizer()),
        ledger,
        build_throttle(&config),
    );
    let engine = engine::spawn_engine(tracker, || Local::now().naive_local())?;

    tracing::info!(
        ledger_dir = %config.ledger_dir.display(),
        threshold = config.acceptance_threshold,
        required_frames = config.required_stable_frames,
        "rollcalld ready"
    );

    tokio::select! {
        result = run_intake(args.input, &engine) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    for user in engine.snapshot().await? {
        tracing::info!(
            user = %user.user_id,
            status = %user.current_status,
            last_marked = %user.last_marked_at,
            "final attendance state"
        );
    }

    // In-flight notifications are abandoned when the runtime shuts down.
    tracing::info!("rollcalld shutting down");
    Ok(())
}

fn build_throttle(config: &Config) -> NotificationThrottle {
    let Some((destination, command)) = config.notify_target() else {
        return NotificationThrottle::new(config.notify_cooldown(), None);
    };
    tracing::info!(
        destination,
        command = %command.display(),
        timeout_secs = config.notify_timeout_secs,
        "notifications enabled"
    );
    let dispatcher = NotificationDispatcher::new(
        tokio::runtime::Handle::current(),
        Arc::new(CommandNotifier::new(command)),
        destination,
        config.notify_timeout(),
        config.notify_max_in_flight,
    );
    NotificationThrottle::new(config.notify_cooldown(), Some(dispatcher))
}

async fn run_intake(input: Option<PathBuf>, engine: &EngineHandle) -> Result<u64> {
    let frames = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening frame input {}", path.display()))?;
            intake::pump(BufReader::new(file), engine).await?
        }
        None => intake::pump(BufReader::new(tokio::io::stdin()), engine).await?,
    };
    Ok(frames)
}
