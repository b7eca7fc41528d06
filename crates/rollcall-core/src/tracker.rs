//! Per-frame attendance pipeline: stabilizer → ledger → notification throttle.

use crate::ledger::AttendanceLedger;
use crate::notify::NotificationThrottle;
use crate::stabilizer::IdentityStabilizer;
use crate::store::LedgerError;
use crate::types::{Action, ClassificationEvent, FaceObservation, StableDecision, StableIdentity};
use chrono::NaiveDateTime;

/// What one processed frame produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub decision: Option<StableDecision>,
    /// Set when the decision produced an accepted mark.
    pub action: Option<Action>,
    pub identity: StableIdentity,
}

pub struct AttendanceTracker {
    stabilizer: IdentityStabilizer,
    ledger: AttendanceLedger,
    throttle: NotificationThrottle,
}

impl AttendanceTracker {
    pub fn new(
        stabilizer: IdentityStabilizer,
        ledger: AttendanceLedger,
        throttle: NotificationThrottle,
    ) -> Self {
        Self {
            stabilizer,
            ledger,
            throttle,
        }
    }

    pub fn stabilizer(&self) -> &IdentityStabilizer {
        &self.stabilizer
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    /// Run one frame's faces through the pipeline.
    ///
    /// An empty slice means no face was detected. A ledger write failure is
    /// returned after the stabilizer has consumed the frame; the tracker
    /// remains usable and the mark is retried on a later stabilization.
    pub fn process_frame(
        &mut self,
        faces: &[FaceObservation],
        now: NaiveDateTime,
    ) -> Result<FrameOutcome, LedgerError> {
        let mut decision = None;

        if faces.is_empty() {
            self.stabilizer.observe(None, 0.0, false);
        } else {
            // Faces are observed in order. A decision reached by one face
            // stands even if a later face in the same frame dissents.
            for face in faces {
                let event = ClassificationEvent {
                    candidate_label: face.label.clone(),
                    distance_score: face.distance,
                    timestamp: now,
                };
                if let Some(d) = self.stabilizer.observe_event(&event) {
                    decision = Some((d, event.timestamp));
                }
            }
        }

        let action = match &decision {
            Some((d, at)) => self.on_stable(d, *at)?,
            None => None,
        };

        Ok(FrameOutcome {
            decision: decision.map(|(d, _)| d),
            action,
            identity: self.stabilizer.current().clone(),
        })
    }

    fn on_stable(
        &mut self,
        decision: &StableDecision,
        now: NaiveDateTime,
    ) -> Result<Option<Action>, LedgerError> {
        let Some(action) = self.ledger.mark(&decision.user_id, decision.score, now)? else {
            return Ok(None);
        };
        if let Some(state) = self.ledger.user_mut(&decision.user_id) {
            self.throttle.maybe_notify(state, action, decision.score, now);
        }
        Ok(Some(action))
    }
}
