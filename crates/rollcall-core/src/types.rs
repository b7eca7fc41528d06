use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Date format used in ledger file names and rows.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Time-of-day format used in ledger rows and notification text.
pub const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidUserId {
    #[error("user id is empty")]
    Empty,
    #[error("user id {0:?} contains a comma or line break")]
    Delimiter(String),
}

/// Stable identifier of an enrolled person (the classifier's label name).
///
/// Must survive a round trip through a comma-delimited ledger row, so commas
/// and line breaks are rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidUserId> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(InvalidUserId::Empty);
        }
        if trimmed.contains([',', '\n', '\r']) {
            return Err(InvalidUserId::Delimiter(name));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = InvalidUserId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Attendance action recorded for an accepted mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Entry,
    Exit,
}

impl Action {
    /// The action that follows this one for the same user.
    pub fn toggled(self) -> Self {
        match self {
            Action::Entry => Action::Exit,
            Action::Exit => Action::Entry,
        }
    }

    /// Action for the next accepted mark given the user's previous status.
    pub fn next_after(previous: Option<Action>) -> Self {
        previous.map_or(Action::Entry, Action::toggled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Entry => "Entry",
            Action::Exit => "Exit",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown attendance action: {0:?}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Entry" => Ok(Action::Entry),
            "Exit" => Ok(Action::Exit),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// One classifier output for one detected face in one processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationEvent {
    /// `None` when the classifier's id has no enrolled name.
    pub candidate_label: Option<UserId>,
    /// Classifier distance. Lower = more similar.
    pub distance_score: f32,
    /// When the frame was processed; an accepted mark is recorded at this time.
    pub timestamp: NaiveDateTime,
}

/// Per-face classifier result as delivered by the recognition pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    #[serde(default)]
    pub label: Option<UserId>,
    pub distance: f32,
}

/// The identity currently being tracked by the stabilizer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StableIdentity {
    pub user_id: Option<UserId>,
    pub streak_count: u32,
    pub last_score: f32,
}

impl StableIdentity {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Debounced identity decision, emitted once per qualifying streak.
#[derive(Debug, Clone, PartialEq)]
pub struct StableDecision {
    pub user_id: UserId,
    pub score: f32,
}

/// In-memory attendance state for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAttendanceState {
    pub user_id: UserId,
    pub current_status: Action,
    pub last_marked_at: NaiveDateTime,
    /// `None` until a notification has been issued (or recovered from the log).
    pub last_notified_at: Option<NaiveDateTime>,
}

/// One durable row of the attendance ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRecord {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub user_id: UserId,
    pub action: Action,
    pub confidence_score: f32,
}

impl LedgerRecord {
    pub fn new(user_id: UserId, action: Action, confidence_score: f32, at: NaiveDateTime) -> Self {
        let at = ceil_to_second(at);
        Self {
            date: at.date(),
            time: at.time(),
            user_id,
            action,
            confidence_score,
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

/// Payload handed to the notification dispatcher for an accepted mark.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub user_id: UserId,
    pub action: Action,
    pub time: NaiveTime,
    pub confidence_score: f32,
}

impl NotificationRequest {
    /// Render the outbound message text.
    pub fn message(&self) -> String {
        format!(
            "Name: {}\nTime: {}\nStatus: {}",
            self.user_id,
            self.time.format(TIME_FORMAT),
            self.action
        )
    }
}

/// Round up to the next whole second; whole seconds are returned unchanged.
///
/// Ledger rows carry whole seconds, so in-memory timestamps use the same
/// resolution. Rounding up keeps a recorded time at or after the real one,
/// so a cooldown measured from it can only get longer.
pub fn ceil_to_second(at: NaiveDateTime) -> NaiveDateTime {
    let whole = at.with_nanosecond(0).unwrap_or(at);
    if whole == at {
        at
    } else {
        whole + chrono::Duration::seconds(1)
    }
}
