use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attendance::submission_pipeline::LateRule;

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    Scheduled,
    SourceExhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Manual => write!(f, "manual"),
            StopReason::Scheduled => write!(f, "scheduled"),
            StopReason::SourceExhausted => write!(f, "source exhausted"),
        }
    }
}

/// Identity, schedule and liveness of one attendance session.
///
/// Identifiers and schedule are fixed at construction. `active` and
/// `last_heartbeat` are maintained by the session controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub section_id: String,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub late_threshold_minutes: u32,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub active: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl SessionState {
    pub const DEFAULT_LATE_THRESHOLD_MINUTES: u32 = 15;

    pub fn new(session_id: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            section_id: section_id.into(),
            scheduled_start: None,
            scheduled_end: None,
            late_threshold_minutes: Self::DEFAULT_LATE_THRESHOLD_MINUTES,
            access_token: None,
            active: false,
            last_heartbeat: None,
        }
    }

    pub fn with_schedule(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.scheduled_start = start;
        self.scheduled_end = end;
        self
    }

    pub fn with_late_threshold(mut self, minutes: u32) -> Self {
        self.late_threshold_minutes = minutes;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn late_rule(&self) -> LateRule {
        LateRule {
            scheduled_start: self.scheduled_start,
            late_threshold_minutes: self.late_threshold_minutes,
        }
    }

    /// True once `now` is past the scheduled end. Sessions without an end
    /// never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_end.is_some_and(|end| now >= end)
    }
}
