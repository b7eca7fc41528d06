//! Attendance ledger state machine.
//!
//! Converts stabilized identities into idempotent Entry/Exit marks. Every
//! accepted mark is made durable before in-memory state moves, so the
//! in-memory status always equals the user's last durable row.

use crate::store::{LedgerError, LedgerStore};
use crate::types::{ceil_to_second, Action, LedgerRecord, UserAttendanceState, UserId};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_MARK_COOLDOWN: Duration = Duration::from_secs(30);

/// Whether at least `cooldown` has passed between `since` and `now`.
///
/// A clock that went backwards counts as not elapsed.
pub fn cooldown_elapsed(since: NaiveDateTime, now: NaiveDateTime, cooldown: Duration) -> bool {
    (now - since)
        .to_std()
        .map_or(false, |elapsed| elapsed >= cooldown)
}

/// Two consecutive rows for the same user carrying the same action.
#[derive(Debug, Clone, PartialEq)]
pub struct AlternationViolation {
    pub user_id: UserId,
    pub action: Action,
    pub first_at: NaiveTime,
    pub repeated_at: NaiveTime,
}

/// Find every place where a user's rows fail to alternate Entry/Exit.
///
/// A user's first row of the day may be either action.
pub fn audit_alternation(records: &[LedgerRecord]) -> Vec<AlternationViolation> {
    let mut last: HashMap<&UserId, &LedgerRecord> = HashMap::new();
    let mut violations = Vec::new();
    for record in records {
        if let Some(prev) = last.insert(&record.user_id, record) {
            if prev.action == record.action {
                violations.push(AlternationViolation {
                    user_id: record.user_id.clone(),
                    action: record.action,
                    first_at: prev.time,
                    repeated_at: record.time,
                });
            }
        }
    }
    violations
}

/// Rebuild per-user state from a day's rows, keeping the last row per user.
pub fn reconstruct_states(records: &[LedgerRecord]) -> HashMap<UserId, UserAttendanceState> {
    let mut users = HashMap::new();
    for record in records {
        let at = record.timestamp();
        users.insert(
            record.user_id.clone(),
            UserAttendanceState {
                user_id: record.user_id.clone(),
                current_status: record.action,
                last_marked_at: at,
                last_notified_at: Some(at),
            },
        );
    }
    users
}

pub struct AttendanceLedger {
    store: LedgerStore,
    cooldown: Duration,
    users: HashMap<UserId, UserAttendanceState>,
}

impl AttendanceLedger {
    /// Open the ledger and recover per-user state from `today`'s log.
    pub fn open(store: LedgerStore, cooldown: Duration, today: NaiveDate) -> Result<Self, LedgerError> {
        let records = store.read_day(today)?;

        for v in audit_alternation(&records) {
            tracing::warn!(
                user = %v.user_id,
                action = %v.action,
                first = %v.first_at,
                repeated = %v.repeated_at,
                "attendance log does not alternate; recovering from last row"
            );
        }

        let users = reconstruct_states(&records);
        tracing::info!(
            path = %store.path_for(today).display(),
            rows = records.len(),
            users = users.len(),
            "attendance state recovered"
        );

        Ok(Self {
            store,
            cooldown,
            users,
        })
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn user(&self, user_id: &UserId) -> Option<&UserAttendanceState> {
        self.users.get(user_id)
    }

    pub fn user_mut(&mut self, user_id: &UserId) -> Option<&mut UserAttendanceState> {
        self.users.get_mut(user_id)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserAttendanceState> {
        self.users.values()
    }

    pub fn status(&self, user_id: &UserId) -> Option<Action> {
        self.users.get(user_id).map(|s| s.current_status)
    }

    /// Whether a mark for `user_id` at `now` would be accepted.
    pub fn can_mark(&self, user_id: &UserId, now: NaiveDateTime) -> bool {
        self.users
            .get(user_id)
            .map_or(true, |s| cooldown_elapsed(s.last_marked_at, now, self.cooldown))
    }

    /// Record an Entry/Exit for `user_id` unless it is inside the mark cooldown.
    ///
    /// Returns `Ok(None)` for a cooldown rejection. On a write failure the
    /// in-memory state is left as it was.
    pub fn mark(
        &mut self,
        user_id: &UserId,
        confidence_score: f32,
        now: NaiveDateTime,
    ) -> Result<Option<Action>, LedgerError> {
        if !self.can_mark(user_id, now) {
            tracing::trace!(user = %user_id, "mark rejected: cooldown");
            return Ok(None);
        }

        let now = ceil_to_second(now);
        let action = Action::next_after(self.status(user_id));
        let record = LedgerRecord::new(user_id.clone(), action, confidence_score, now);

        self.store.append(&record)?;

        match self.users.get_mut(user_id) {
            Some(state) => {
                state.current_status = action;
                state.last_marked_at = now;
            }
            None => {
                self.users.insert(
                    user_id.clone(),
                    UserAttendanceState {
                        user_id: user_id.clone(),
                        current_status: action,
                        last_marked_at: now,
                        last_notified_at: None,
                    },
                );
            }
        }

        tracing::info!(
            user = %user_id,
            action = %action,
            time = %record.time,
            confidence = confidence_score,
            "attendance marked"
        );
        Ok(Some(action))
    }
}
