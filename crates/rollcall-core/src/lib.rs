//! rollcall-core: attendance decision engine.
//!
//! Debounces per-frame face classifications into stable identities, turns
//! them into alternating Entry/Exit marks in a per-day ledger, and announces
//! accepted marks through a throttled, non-blocking notification path.

pub mod ledger;
pub mod notify;
pub mod stabilizer;
pub mod store;
pub mod tracker;
pub mod transport;
pub mod types;

pub use ledger::AttendanceLedger;
pub use notify::{NotificationDispatcher, NotificationThrottle, Notifier};
pub use stabilizer::{IdentityStabilizer, StabilizerConfig};
pub use store::{default_ledger_dir, LedgerError, LedgerStore};
pub use tracker::{AttendanceTracker, FrameOutcome};
pub use transport::CommandNotifier;
pub use types::{Action, FaceObservation, LedgerRecord, UserAttendanceState, UserId};
