use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::bounding_box::BoundingBox;
use crate::tracking::domain::track::Track;

/// Decision state of a tracked face.
///
/// `Completed`, `Ignored` and `ManualRejected` are not terminal: a face in
/// any of them is re-evaluated once the attempt throttle allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaceState {
    Detected,
    AutoAccepted,
    ManualReview,
    Ignored,
    ManualAccepted,
    ManualRejected,
    Completed,
}

impl FaceState {
    /// States from which a fresh recognition attempt may start.
    pub fn is_evaluable(self) -> bool {
        matches!(
            self,
            FaceState::Detected
                | FaceState::ManualReview
                | FaceState::Ignored
                | FaceState::ManualRejected
                | FaceState::Completed
        )
    }

    pub fn can_transition_to(self, next: FaceState) -> bool {
        use FaceState::*;
        if self.is_evaluable() && matches!(next, AutoAccepted | ManualReview | Ignored) {
            return true;
        }
        matches!(
            (self, next),
            (AutoAccepted, Completed)
                | (AutoAccepted, Ignored)
                | (ManualReview, ManualAccepted)
                | (ManualReview, ManualRejected)
                | (ManualReview, Completed)
                | (ManualAccepted, Completed)
                | (ManualAccepted, ManualReview)
                | (ManualAccepted, ManualRejected)
        )
    }
}

impl std::fmt::Display for FaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaceState::Detected => "DETECTED",
            FaceState::AutoAccepted => "AUTO_ACCEPTED",
            FaceState::ManualReview => "MANUAL_REVIEW",
            FaceState::Ignored => "IGNORED",
            FaceState::ManualAccepted => "MANUAL_ACCEPTED",
            FaceState::ManualRejected => "MANUAL_REJECTED",
            FaceState::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Decision-bearing wrapper around a confirmed track.
#[derive(Clone, Debug)]
pub struct TrackedFace {
    pub track_id: u32,
    pub bbox: BoundingBox,
    pub seen_frames: u32,
    pub motion: f64,
    state: FaceState,
    pub candidate_id: Option<String>,
    pub candidate_name: Option<String>,
    /// NaN until the recognizer has produced a distance.
    pub last_distance: f64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub manual_prompt_attempts: u32,
    pub manual_prompted: bool,
}

impl TrackedFace {
    pub fn new(track: &Track) -> Self {
        Self {
            track_id: track.id,
            bbox: track.bbox,
            seen_frames: track.seen_frames,
            motion: track.motion,
            state: FaceState::Detected,
            candidate_id: None,
            candidate_name: None,
            last_distance: f64::NAN,
            last_attempt_at: None,
            attempts: 0,
            manual_prompt_attempts: 0,
            manual_prompted: false,
        }
    }

    pub fn state(&self) -> FaceState {
        self.state
    }

    /// Copies the latest geometry from the track.
    pub fn refresh(&mut self, track: &Track) {
        self.bbox = track.bbox;
        self.seen_frames = track.seen_frames;
        self.motion = track.motion;
    }

    /// Moves to `next` if the edge exists. Refused transitions are logged
    /// and leave the state unchanged.
    pub fn transition(&mut self, next: FaceState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            log::warn!(
                "Track {}: refused transition {} -> {}",
                self.track_id,
                self.state,
                next
            );
            return false;
        }
        log::debug!("Track {}: {} -> {}", self.track_id, self.state, next);
        self.state = next;
        true
    }

    pub fn record_attempt(&mut self, at: DateTime<Utc>, distance: f64) {
        self.last_attempt_at = Some(at);
        self.last_distance = distance;
        self.attempts += 1;
    }

    /// Whether the attempt throttle still blocks a new recognition.
    pub fn throttled(&self, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
        self.last_attempt_at
            .is_some_and(|last| now.signed_duration_since(last) < interval)
    }

    pub fn set_candidate(&mut self, id: &str, name: &str) {
        self.candidate_id = Some(id.to_string());
        self.candidate_name = Some(name.to_string());
    }

    pub fn clear_candidate(&mut self) {
        self.candidate_id = None;
        self.candidate_name = None;
    }
}
