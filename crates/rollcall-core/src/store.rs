//! Per-day, append-only attendance log files.
//!
//! One comma-delimited file per calendar day (`YYYY-MM-DD.csv`) with the
//! header `date,time,name,action,confidence`. Rows are appended in
//! chronological order and are the source of truth for startup recovery.

use crate::types::{Action, LedgerRecord, UserId, DATE_FORMAT, TIME_FORMAT};
use chrono::{NaiveDate, NaiveTime};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

pub const LEDGER_HEADER: &str = "date,time,name,action,confidence";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to append attendance record to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read attendance log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug, PartialEq)]
pub enum RowError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),
    #[error("bad date {0:?}")]
    Date(String),
    #[error("bad time {0:?}")]
    Time(String),
    #[error("bad user: {0}")]
    User(#[from] crate::types::InvalidUserId),
    #[error("bad action: {0}")]
    Action(#[from] crate::types::UnknownAction),
    #[error("bad confidence {0:?}")]
    Confidence(String),
}

/// `$XDG_DATA_HOME/rollcall/attendance`, falling back to `~/.local/share`.
pub fn default_ledger_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/attendance")
}

/// Directory of per-day ledger files.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the log file for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.csv", date.format(DATE_FORMAT)))
    }

    /// Append one record to its day's file, creating the file (with header) if needed.
    ///
    /// Header and row go out in a single write so a fresh file is never left
    /// holding only a header.
    pub fn append(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        let path = self.path_for(record.date);
        let write_err = |source| LedgerError::Write {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(write_err)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(write_err)?;

        let is_new = file.metadata().map_err(write_err)?.len() == 0;
        let mut buf = String::new();
        if is_new {
            buf.push_str(LEDGER_HEADER);
            buf.push('\n');
        }
        buf.push_str(&format_row(record));
        buf.push('\n');

        file.write_all(buf.as_bytes()).map_err(write_err)?;
        file.sync_data().map_err(write_err)?;

        tracing::trace!(path = %path.display(), new_file = is_new, "ledger row appended");
        Ok(())
    }

    /// Read every well-formed record of `date`, in file order.
    ///
    /// A missing file is an empty day. Malformed rows are logged and skipped.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<LedgerRecord>, LedgerError> {
        let path = self.path_for(date);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        let mut records = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || (idx == 0 && line == LEDGER_HEADER) {
                continue;
            }
            match parse_row(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        error = %e,
                        "skipping malformed ledger row"
                    );
                }
            }
        }
        Ok(records)
    }
}

/// Render a record as a ledger row (without line terminator).
pub fn format_row(record: &LedgerRecord) -> String {
    format!(
        "{},{},{},{},{:.2}",
        record.date.format(DATE_FORMAT),
        record.time.format(TIME_FORMAT),
        record.user_id,
        record.action,
        record.confidence_score
    )
}

/// Parse one ledger row.
pub fn parse_row(line: &str) -> Result<LedgerRecord, RowError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let &[date, time, name, action, confidence] = fields.as_slice() else {
        return Err(RowError::FieldCount(fields.len()));
    };

    Ok(LedgerRecord {
        date: NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|_| RowError::Date(date.to_string()))?,
        time: NaiveTime::parse_from_str(time, TIME_FORMAT)
            .map_err(|_| RowError::Time(time.to_string()))?,
        user_id: UserId::new(name)?,
        action: action.parse::<Action>()?,
        confidence_score: confidence
            .parse()
            .map_err(|_| RowError::Confidence(confidence.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, action: Action, h: u32, m: u32, s: u32, conf: f32) -> LedgerRecord {
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap();
        LedgerRecord::new(UserId::new(name).unwrap(), action, conf, at)
    }

    #[test]
    fn test_format_row() {
        let r = record("Alice", Action::Entry, 9, 0, 0, 45.2);
        assert_eq!(format_row(&r), "2024-03-05,09:00:00,Alice,Entry,45.20");
    }

    #[test]
    fn test_parse_row_errors() {
        assert_eq!(parse_row("a,b"), Err(RowError::FieldCount(2)));
        assert!(matches!(
            parse_row("2024-13-05,09:00:00,Alice,Entry,1.0"),
            Err(RowError::Date(_))
        ));
        assert!(matches!(
            parse_row("2024-03-05,09:00:00,Alice,in,1.0"),
            Err(RowError::Action(_))
        ));
        assert!(matches!(
            parse_row("2024-03-05,09:00:00,Alice,Exit,high"),
            Err(RowError::Confidence(_))
        ));
    }

    #[test]
    fn test_default_ledger_dir() {
        assert!(default_ledger_dir().ends_with("rollcall/attendance"));
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("attendance"));
        store.append(&record("Alice", Action::Entry, 9, 0, 0, 45.2)).unwrap();
        store.append(&record("Alice", Action::Exit, 9, 0, 31, 50.0)).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let contents = fs::read_to_string(store.path_for(date)).unwrap();
        assert_eq!(
            contents,
            "date,time,name,action,confidence\n\
             2024-03-05,09:00:00,Alice,Entry,45.20\n\
             2024-03-05,09:00:31,Alice,Exit,50.00\n"
        );
    }

    #[test]
    fn test_read_day_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert!(store.read_day(date).unwrap().is_empty());
    }

    #[test]
    fn test_read_day_skips_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        fs::write(
            store.path_for(date),
            "date,time,name,action,confidence\n\
             2024-03-05,09:00:00,Alice,Entry,45.20\n\
             garbage\n\
             \n\
             2024-03-05,10:00:00,Bob,Entry,30.00\n",
        )
        .unwrap();

        let records = store.read_day(date).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id.as_str(), "Alice");
        assert_eq!(records[1].user_id.as_str(), "Bob");
        assert!((records[0].confidence_score - 45.2).abs() < 1e-4);
    }

    #[test]
    fn test_append_fails_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("attendance");
        fs::write(&blocker, "not a directory").unwrap();
        let store = LedgerStore::new(&blocker);
        let err = store.append(&record("Alice", Action::Entry, 9, 0, 0, 1.0)).unwrap_err();
        assert!(matches!(err, LedgerError::Write { .. }));
    }
}
