//! Temporal identity stabilizer.
//!
//! Debounces per-frame classifier output with a streak counter: a run of
//! low-distance votes for the same label builds the streak, dissenting frames
//! decay it, and a sustained absence of faces resets it.

use crate::types::{ClassificationEvent, StableDecision, StableIdentity, UserId};

// --- Defaults (distance units are the classifier's) ---
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 60.0;
pub const DEFAULT_REQUIRED_STABLE_FRAMES: u32 = 10;
/// Roughly one second of frames at 30 fps.
pub const DEFAULT_FACE_LOSS_RESET_FRAMES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizerConfig {
    /// Distances strictly below this count as a vote for the candidate label.
    pub acceptance_threshold: f32,
    /// Streak length at which a decision fires.
    pub required_stable_frames: u32,
    /// Consecutive faceless frames after which the tracked identity is dropped.
    pub face_loss_reset_frames: u32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            required_stable_frames: DEFAULT_REQUIRED_STABLE_FRAMES,
            face_loss_reset_frames: DEFAULT_FACE_LOSS_RESET_FRAMES,
        }
    }
}

pub struct IdentityStabilizer {
    config: StabilizerConfig,
    current: StableIdentity,
    frames_without_face: u32,
    /// Set once the current streak has produced its decision.
    fired: bool,
}

impl IdentityStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            current: StableIdentity::unknown(),
            frames_without_face: 0,
            fired: false,
        }
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Identity currently being tracked (possibly unknown).
    pub fn current(&self) -> &StableIdentity {
        &self.current
    }

    pub fn frames_without_face(&self) -> u32 {
        self.frames_without_face
    }

    /// Feed one classifier result for a detected face.
    pub fn observe_event(&mut self, event: &ClassificationEvent) -> Option<StableDecision> {
        self.observe(event.candidate_label.as_ref(), event.distance_score, true)
    }

    /// Feed one frame's worth of evidence.
    ///
    /// Returns a decision only on the frame where the streak first reaches
    /// `required_stable_frames`; later frames of the same streak return `None`.
    pub fn observe(
        &mut self,
        candidate_label: Option<&UserId>,
        distance_score: f32,
        face_detected: bool,
    ) -> Option<StableDecision> {
        if !face_detected {
            self.frames_without_face = self.frames_without_face.saturating_add(1);
            if self.frames_without_face >= self.config.face_loss_reset_frames
                && !self.current.is_unknown()
            {
                tracing::debug!(
                    user = ?self.current.user_id,
                    frames = self.frames_without_face,
                    "face lost; resetting tracked identity"
                );
                self.reset();
            }
            return None;
        }
        self.frames_without_face = 0;

        match candidate_label {
            Some(label) if distance_score < self.config.acceptance_threshold => {
                self.vote_for(label, distance_score)
            }
            // An unnamed match is treated like a rejection: it must never drive a mark.
            _ => {
                self.dissent();
                None
            }
        }
    }

    /// Force the tracked identity back to unknown.
    pub fn reset(&mut self) {
        self.current = StableIdentity::unknown();
        self.fired = false;
    }

    fn vote_for(&mut self, label: &UserId, distance_score: f32) -> Option<StableDecision> {
        if self.current.user_id.as_ref() == Some(label) {
            self.current.streak_count = self.current.streak_count.saturating_add(1);
            self.current.last_score = distance_score;
        } else {
            if let Some(previous) = &self.current.user_id {
                tracing::trace!(from = %previous, to = %label, "tracked identity replaced");
            }
            self.current = StableIdentity {
                user_id: Some(label.clone()),
                streak_count: 1,
                last_score: distance_score,
            };
            self.fired = false;
        }

        if !self.fired && self.current.streak_count >= self.config.required_stable_frames {
            self.fired = true;
            tracing::debug!(
                user = %label,
                score = distance_score,
                streak = self.current.streak_count,
                "identity stabilized"
            );
            return Some(StableDecision {
                user_id: label.clone(),
                score: distance_score,
            });
        }
        None
    }

    fn dissent(&mut self) {
        self.current.streak_count = self.current.streak_count.saturating_sub(1);
        if self.current.streak_count == 0 && !self.current.is_unknown() {
            self.reset();
        }
    }
}

impl Default for IdentityStabilizer {
    fn default() -> Self {
        Self::new(StabilizerConfig::default())
    }
}
