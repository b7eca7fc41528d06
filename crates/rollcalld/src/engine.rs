use chrono::NaiveDateTime;
use rollcall_core::{AttendanceTracker, FaceObservation, UserAttendanceState};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("frame input: {0}")]
    Input(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the async side to the engine thread.
enum EngineRequest {
    Frame {
        faces: Vec<FaceObservation>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<UserAttendanceState>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Queue one processed frame. Waits only for channel capacity.
    pub async fn submit_frame(&self, faces: Vec<FaceObservation>) -> Result<(), EngineError> {
        self.tx
            .send(EngineRequest::Frame { faces })
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Current per-user attendance state, after all previously queued frames.
    pub async fn snapshot(&self) -> Result<Vec<UserAttendanceState>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the tracker outright, so stabilizer and ledger state are
/// only ever touched from one place. `clock` supplies the timestamp for each
/// frame.
pub fn spawn_engine<C>(mut tracker: AttendanceTracker, clock: C) -> Result<EngineHandle, EngineError>
where
    C: Fn() -> NaiveDateTime + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(64);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Frame { faces } => {
                        run_frame(&mut tracker, &faces, clock());
                    }
                    EngineRequest::Snapshot { reply } => {
                        let mut users: Vec<_> = tracker.ledger().users().cloned().collect();
                        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                        let _ = reply.send(users);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Process one frame. Ledger failures are logged; the loop keeps going.
fn run_frame(tracker: &mut AttendanceTracker, faces: &[FaceObservation], now: NaiveDateTime) {
    match tracker.process_frame(faces, now) {
        Ok(outcome) => match (&outcome.decision, outcome.action) {
            (Some(decision), Some(action)) => {
                tracing::info!(
                    user = %decision.user_id,
                    action = %action,
                    score = decision.score,
                    "{} marked: {}",
                    action,
                    decision.user_id
                );
            }
            (Some(decision), None) => {
                tracing::debug!(user = %decision.user_id, "identity re-confirmed inside cooldown");
            }
            _ => {
                tracing::trace!(
                    user = ?outcome.identity.user_id,
                    streak = outcome.identity.streak_count,
                    required = tracker.stabilizer().config().required_stable_frames,
                    "frame processed"
                );
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to record attendance; will retry on next stabilization");
        }
    }
}
