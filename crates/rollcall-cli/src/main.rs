use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::ledger::{audit_alternation, reconstruct_states, AlternationViolation};
use rollcall_core::notify::{Notifier, DEFAULT_TRANSPORT_TIMEOUT};
use rollcall_core::store::format_row;
use rollcall_core::types::TIME_FORMAT;
use rollcall_core::{
    default_ledger_dir, CommandNotifier, LedgerRecord, LedgerStore, UserAttendanceState,
};
use std::path::PathBuf;
use std::time::Duration;

const TEST_MESSAGE: &str = "Attendance system is ready.";

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance log tools")]
struct Cli {
    /// Directory holding the per-day attendance logs
    #[arg(long, env = "ROLLCALL_LEDGER_DIR", global = true)]
    ledger_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a day's attendance records
    Log {
        /// Day to show (YYYY-MM-DD), default today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Show each person's current status for a day
    Status {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Check that every person's records alternate Entry/Exit
    Check {
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Send a test notification through the configured command
    NotifyTest {
        /// Destination passed to the notify command
        #[arg(long, env = "ROLLCALL_NOTIFY_DESTINATION")]
        destination: String,
        /// Program that delivers the notification
        #[arg(long, env = "ROLLCALL_NOTIFY_COMMAND")]
        command: PathBuf,
        /// Give up after this many seconds
        #[arg(long, default_value_t = DEFAULT_TRANSPORT_TIMEOUT.as_secs())]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = LedgerStore::new(cli.ledger_dir.unwrap_or_else(default_ledger_dir));
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Log { date } => {
            let records = read(&store, date.unwrap_or(today))?;
            if records.is_empty() {
                println!("No attendance recorded");
            }
            for record in &records {
                println!("{}", format_row(record));
            }
        }
        Commands::Status { date } => {
            let records = read(&store, date.unwrap_or(today))?;
            let states = sorted_states(&records);
            if states.is_empty() {
                println!("No attendance recorded");
            }
            for line in states.iter().map(status_line) {
                println!("{line}");
            }
        }
        Commands::Check { date } => {
            let date = date.unwrap_or(today);
            let records = read(&store, date)?;
            let violations = audit_alternation(&records);
            for v in &violations {
                println!("{}", violation_line(v));
            }
            if !violations.is_empty() {
                bail!("{} alternation violation(s) in {}", violations.len(), date);
            }
            println!("{}: {} record(s), alternation OK", date, records.len());
        }
        Commands::NotifyTest {
            destination,
            command,
            timeout_secs,
        } => {
            println!("Sending test notification to {destination}...");
            let notifier = CommandNotifier::new(command);
            match tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                notifier.send(&destination, TEST_MESSAGE),
            )
            .await
            {
                Ok(Ok(())) => println!("Test message sent successfully"),
                Ok(Err(e)) => bail!("notification failed: {e}"),
                Err(_) => bail!("notification timed out after {timeout_secs}s"),
            }
        }
    }

    Ok(())
}

fn read(store: &LedgerStore, date: NaiveDate) -> Result<Vec<LedgerRecord>> {
    store
        .read_day(date)
        .with_context(|| format!("reading {}", store.path_for(date).display()))
}

fn sorted_states(records: &[LedgerRecord]) -> Vec<UserAttendanceState> {
    let mut states: Vec<_> = reconstruct_states(records).into_values().collect();
    states.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    states
}

fn status_line(state: &UserAttendanceState) -> String {
    format!(
        "{:<20} {:<5} since {}",
        state.user_id.as_str(),
        state.current_status.as_str(),
        state.last_marked_at.format(TIME_FORMAT)
    )
}

fn violation_line(v: &AlternationViolation) -> String {
    format!(
        "{}: {} at {} repeats {} at {}",
        v.user_id, v.action, v.repeated_at, v.action, v.first_at
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rollcall_core::store::parse_row;
    use rollcall_core::Action;

    fn rows(lines: &[&str]) -> Vec<LedgerRecord> {
        lines.iter().map(|l| parse_row(l).unwrap()).collect()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_status_uses_last_row_per_user() {
        let records = rows(&[
            "2024-03-05,09:00:00,Bob,Entry,30.00",
            "2024-03-05,09:01:00,Alice,Entry,45.20",
            "2024-03-05,17:30:00,Bob,Exit,31.00",
        ]);
        let states = sorted_states(&records);
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].user_id.as_str(), "Alice");
        assert_eq!(states[1].current_status, Action::Exit);
        assert_eq!(status_line(&states[1]).split_whitespace().collect::<Vec<_>>(), ["Bob", "Exit", "since", "17:30:00"]);
    }

    #[test]
    fn test_violation_line() {
        let records = rows(&[
            "2024-03-05,09:00:00,Bob,Entry,30.00",
            "2024-03-05,09:05:00,Bob,Entry,30.00",
        ]);
        let violations = audit_alternation(&records);
        assert_eq!(violation_line(&violations[0]), "Bob: Entry at 09:05:00 repeats Entry at 09:00:00");
    }
}
