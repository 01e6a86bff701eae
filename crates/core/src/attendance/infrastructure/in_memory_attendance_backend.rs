use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::attendance::domain::attendance_backend::{AttendanceBackend, BackendError};
use crate::attendance::domain::attendance_record::{AttendancePayload, AttendanceRecord};
use crate::session::domain::session_state::StopReason;

/// Process-local attendance store. Backs replays and offline runs.
#[derive(Debug, Default)]
pub struct InMemoryAttendanceBackend {
    records: Mutex<Vec<AttendanceRecord>>,
    failing: AtomicBool,
    submissions: AtomicUsize,
    heartbeats: AtomicUsize,
    stops: Mutex<Vec<StopReason>>,
}

impl InMemoryAttendanceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<AttendanceRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// While set, every call fails as if the backend were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn stop_reasons(&self) -> Vec<StopReason> {
        self.stops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("in-memory backend set to fail".into()))
        } else {
            Ok(())
        }
    }
}

impl AttendanceBackend for InMemoryAttendanceBackend {
    fn submit(&self, payload: &AttendancePayload) -> Result<AttendanceRecord, BackendError> {
        self.check_available()?;
        self.submissions.fetch_add(1, Ordering::SeqCst);

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let index = match records.iter().position(|r| r.student_id == payload.student_id) {
            Some(i) => i,
            None => {
                records.push(AttendanceRecord {
                    student_id: payload.student_id.clone(),
                    student_name: None,
                    student_number: None,
                    status: None,
                    marked_at: None,
                    method: None,
                    confidence: None,
                });
                records.len() - 1
            }
        };

        let record = &mut records[index];
        record.status = Some(payload.status);
        record.marked_at = Some(payload.marked_at);
        record.method = Some(payload.method);
        record.confidence = payload.confidence;
        Ok(record.clone())
    }

    fn fetch_roster(&self) -> Result<Vec<AttendanceRecord>, BackendError> {
        self.check_available()?;
        Ok(self.records())
    }

    fn notify_stop(&self, reason: StopReason) -> Result<(), BackendError> {
        self.stops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reason);
        self.check_available()
    }

    fn heartbeat(&self) -> Result<(), BackendError> {
        self.check_available()?;
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
