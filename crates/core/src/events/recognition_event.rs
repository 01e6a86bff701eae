use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    FaceDetected,
    AutoRejected,
    AttendanceSkipped,
    AttendanceRecorded,
    ManualConfirmationRequired,
    ManualConfirmed,
    ManualRejected,
    Error,
    SessionStarted,
    SessionStopped,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::FaceDetected => "FACE_DETECTED",
            EventType::AutoRejected => "AUTO_REJECTED",
            EventType::AttendanceSkipped => "ATTENDANCE_SKIPPED",
            EventType::AttendanceRecorded => "ATTENDANCE_RECORDED",
            EventType::ManualConfirmationRequired => "MANUAL_CONFIRMATION_REQUIRED",
            EventType::ManualConfirmed => "MANUAL_CONFIRMED",
            EventType::ManualRejected => "MANUAL_REJECTED",
            EventType::Error => "ERROR",
            EventType::SessionStarted => "SESSION_STARTED",
            EventType::SessionStopped => "SESSION_STOPPED",
        };
        f.write_str(name)
    }
}

/// Immutable record of one decision or lifecycle fact.
///
/// `confidence` holds the recognizer distance when one was produced;
/// non-finite distances are stored as unset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub track_id: Option<u32>,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub confidence: Option<f64>,
    pub message: String,
    pub success: bool,
    pub manual: bool,
}

impl RecognitionEvent {
    pub fn new(event_type: EventType, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp,
            track_id: None,
            student_id: None,
            student_name: None,
            confidence: None,
            message: message.into(),
            success: false,
            manual: false,
        }
    }

    pub fn with_track(mut self, track_id: u32) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn with_student(mut self, student_id: &str, student_name: Option<&str>) -> Self {
        self.student_id = Some(student_id.to_string());
        self.student_name = student_name.map(str::to_string);
        self
    }

    pub fn with_confidence(mut self, distance: f64) -> Self {
        self.confidence = distance.is_finite().then_some(distance);
        self
    }

    pub fn succeeded(mut self) -> Self {
        self.success = true;
        self
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}
