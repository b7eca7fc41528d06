//! Notification throttle and asynchronous dispatcher.
//!
//! The throttle decides, per user, whether an accepted mark is announced.
//! The dispatcher hands the message to a transport on the tokio runtime and
//! never lets transport latency or failure reach the frame loop.

use crate::ledger::cooldown_elapsed;
use crate::types::{ceil_to_second, Action, NotificationRequest, UserAttendanceState};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const DEFAULT_NOTIFY_COOLDOWN: Duration = Duration::from_secs(30);
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("transport failed: {0}")]
    Failed(String),
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound message transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError>;
}

/// How a single dispatched notification ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed(String),
    TimedOut,
}

/// Runs transport calls on the tokio runtime with a hard timeout.
#[derive(Clone)]
pub struct NotificationDispatcher {
    runtime: Handle,
    notifier: Arc<dyn Notifier>,
    destination: String,
    timeout: Duration,
    in_flight: Arc<Semaphore>,
}

impl NotificationDispatcher {
    pub fn new(
        runtime: Handle,
        notifier: Arc<dyn Notifier>,
        destination: impl Into<String>,
        timeout: Duration,
        max_in_flight: usize,
    ) -> Self {
        Self {
            runtime,
            notifier,
            destination: destination.into(),
            timeout,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Start delivering `message` in the background and return immediately.
    ///
    /// Returns `None` when the in-flight limit is reached; the message is
    /// dropped rather than queued behind a stalled transport.
    pub fn dispatch(&self, message: String) -> Option<JoinHandle<DispatchOutcome>> {
        let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
            tracing::warn!(
                destination = %self.destination,
                "notification dropped: too many deliveries in flight"
            );
            return None;
        };

        let notifier = Arc::clone(&self.notifier);
        let destination = self.destination.clone();
        let timeout = self.timeout;

        Some(self.runtime.spawn(async move {
            let _permit = permit;
            let outcome =
                match tokio::time::timeout(timeout, notifier.send(&destination, &message)).await {
                    Ok(Ok(())) => DispatchOutcome::Delivered,
                    Ok(Err(e)) => DispatchOutcome::Failed(e.to_string()),
                    Err(_) => DispatchOutcome::TimedOut,
                };

            match &outcome {
                DispatchOutcome::Delivered => {
                    tracing::info!(destination = %destination, "notification delivered");
                }
                DispatchOutcome::Failed(error) => {
                    tracing::warn!(destination = %destination, error = %error, "notification failed");
                }
                DispatchOutcome::TimedOut => {
                    tracing::warn!(
                        destination = %destination,
                        timeout_secs = timeout.as_secs_f32(),
                        "notification timed out"
                    );
                }
            }
            outcome
        }))
    }
}

/// Per-user notification cooldown in front of an optional dispatcher.
pub struct NotificationThrottle {
    cooldown: Duration,
    dispatcher: Option<NotificationDispatcher>,
}

impl NotificationThrottle {
    pub fn new(cooldown: Duration, dispatcher: Option<NotificationDispatcher>) -> Self {
        Self {
            cooldown,
            dispatcher,
        }
    }

    /// Throttle that never sends anything.
    pub fn disabled() -> Self {
        Self::new(DEFAULT_NOTIFY_COOLDOWN, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Announce an accepted mark unless this user was notified within the cooldown.
    ///
    /// `last_notified_at` advances as soon as the message is handed off, so a
    /// failing transport is not retried on every re-confirmation.
    pub fn maybe_notify(
        &self,
        state: &mut UserAttendanceState,
        action: Action,
        confidence_score: f32,
        now: NaiveDateTime,
    ) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        if let Some(last) = state.last_notified_at {
            if !cooldown_elapsed(last, now, self.cooldown) {
                tracing::debug!(user = %state.user_id, "notification suppressed: cooldown");
                return;
            }
        }

        let now = ceil_to_second(now);
        let request = NotificationRequest {
            user_id: state.user_id.clone(),
            action,
            time: now.time(),
            confidence_score,
        };
        // Fire-and-forget.
        let _ = dispatcher.dispatch(request.message());
        state.last_notified_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;
    use chrono::NaiveDate;
    use tokio::sync::mpsc;

    /// Records every message it is asked to send.
    struct Recording {
        tx: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
            let _ = self.tx.send((destination.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn send(&self, _: &str, _: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Failed("chat not found".into()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl Notifier for Stalled {
        async fn send(&self, _: &str, _: &str) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn state(last_notified_at: Option<NaiveDateTime>) -> UserAttendanceState {
        UserAttendanceState {
            user_id: UserId::new("Alice").unwrap(),
            current_status: Action::Entry,
            last_marked_at: t0(),
            last_notified_at,
        }
    }

    fn dispatcher(notifier: Arc<dyn Notifier>, timeout: Duration) -> NotificationDispatcher {
        NotificationDispatcher::new(Handle::current(), notifier, "front-desk", timeout, 4)
    }

    #[tokio::test]
    async fn test_first_notification_is_sent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let throttle = NotificationThrottle::new(
            DEFAULT_NOTIFY_COOLDOWN,
            Some(dispatcher(Arc::new(Recording { tx }), DEFAULT_TRANSPORT_TIMEOUT)),
        );
        let mut s = state(None);
        throttle.maybe_notify(&mut s, Action::Entry, 45.2, t0());

        assert_eq!(s.last_notified_at, Some(t0()));
        let (dest, msg) = rx.recv().await.unwrap();
        assert_eq!(dest, "front-desk");
        assert_eq!(msg, "Name: Alice\nTime: 09:00:00\nStatus: Entry");
    }

    #[tokio::test]
    async fn test_suppressed_inside_cooldown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let throttle = NotificationThrottle::new(
            DEFAULT_NOTIFY_COOLDOWN,
            Some(dispatcher(Arc::new(Recording { tx }), DEFAULT_TRANSPORT_TIMEOUT)),
        );
        let earlier = t0() - chrono::Duration::seconds(10);
        let mut s = state(Some(earlier));
        throttle.maybe_notify(&mut s, Action::Exit, 40.0, t0());

        assert_eq!(s.last_notified_at, Some(earlier));
        // Sender side is owned by the throttle; nothing may be queued.
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sent_after_cooldown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let throttle = NotificationThrottle::new(
            DEFAULT_NOTIFY_COOLDOWN,
            Some(dispatcher(Arc::new(Recording { tx }), DEFAULT_TRANSPORT_TIMEOUT)),
        );
        let mut s = state(Some(t0() - chrono::Duration::seconds(30)));
        throttle.maybe_notify(&mut s, Action::Exit, 40.0, t0());
        assert_eq!(s.last_notified_at, Some(t0()));
        assert!(rx.recv().await.unwrap().1.ends_with("Status: Exit"));
    }

    #[tokio::test]
    async fn test_subsecond_notification_never_shortens_cooldown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let throttle = NotificationThrottle::new(
            DEFAULT_NOTIFY_COOLDOWN,
            Some(dispatcher(Arc::new(Recording { tx }), DEFAULT_TRANSPORT_TIMEOUT)),
        );
        let mut s = state(None);
        throttle.maybe_notify(&mut s, Action::Entry, 45.2, t0() + chrono::Duration::milliseconds(900));
        assert_eq!(s.last_notified_at, Some(t0() + chrono::Duration::seconds(1)));
        assert!(rx.recv().await.unwrap().1.contains("Time: 09:00:01"));

        // 29.1s after the real send time
        throttle.maybe_notify(&mut s, Action::Exit, 45.2, t0() + chrono::Duration::seconds(30));
        assert_eq!(s.last_notified_at, Some(t0() + chrono::Duration::seconds(1)));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let throttle = NotificationThrottle::disabled();
        assert!(!throttle.is_enabled());
        let mut s = state(None);
        throttle.maybe_notify(&mut s, Action::Entry, 45.2, t0());
        assert_eq!(s.last_notified_at, None);
    }

    #[tokio::test]
    async fn test_failure_still_advances_cooldown() {
        let throttle = NotificationThrottle::new(
            DEFAULT_NOTIFY_COOLDOWN,
            Some(dispatcher(Arc::new(Failing), DEFAULT_TRANSPORT_TIMEOUT)),
        );
        let mut s = state(None);
        throttle.maybe_notify(&mut s, Action::Entry, 45.2, t0());
        assert_eq!(s.last_notified_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_dispatch_reports_failure() {
        let d = dispatcher(Arc::new(Failing), DEFAULT_TRANSPORT_TIMEOUT);
        let outcome = d.dispatch("hello".into()).unwrap().await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Failed("transport failed: chat not found".into()));
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let d = dispatcher(Arc::new(Stalled), Duration::from_millis(20));
        let outcome = d.dispatch("hello".into()).unwrap().await.unwrap();
        assert_eq!(outcome, DispatchOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_dispatch_bounded_in_flight() {
        let d = NotificationDispatcher::new(
            Handle::current(),
            Arc::new(Stalled),
            "dest",
            Duration::from_secs(60),
            1,
        );
        let first = d.dispatch("one".into());
        assert!(first.is_some());
        assert!(d.dispatch("two".into()).is_none());
        first.unwrap().abort();
    }
}
