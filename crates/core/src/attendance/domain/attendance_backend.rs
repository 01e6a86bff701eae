use thiserror::Error;

use crate::session::domain::session_state::StopReason;

use super::attendance_record::{AttendancePayload, AttendanceRecord};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("backend returned {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("malformed backend response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Remote attendance store for one session.
///
/// Implementations are bound to a single session when constructed and are
/// shared between the submission queue and the lifecycle timers.
pub trait AttendanceBackend: Send + Sync {
    fn submit(&self, payload: &AttendancePayload) -> Result<AttendanceRecord, BackendError>;

    fn fetch_roster(&self) -> Result<Vec<AttendanceRecord>, BackendError>;

    /// Best-effort notification that the session has ended.
    fn notify_stop(&self, reason: StopReason) -> Result<(), BackendError>;

    /// Liveness touch sent on every heartbeat tick.
    fn heartbeat(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
