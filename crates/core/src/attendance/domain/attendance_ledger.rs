use std::collections::HashSet;
use std::sync::Mutex;

use super::attendance_record::AttendanceRecord;
use super::roster::{Roster, RosterEntry};

/// Per-session attendance state shared by the frame loop and the
/// submission queue.
///
/// The submitted-set holds every student with an outstanding or recorded
/// submission. The frame loop only ever reserves and releases ids; the
/// submission queue is the single writer of the roster and commits the
/// set according to each write's outcome.
#[derive(Debug, Default)]
pub struct AttendanceLedger {
    submitted: Mutex<HashSet<String>>,
    roster: Mutex<Roster>,
}

impl AttendanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the roster from records fetched at session start. Students
    /// already present or late are marked submitted.
    pub fn load(&self, records: &[AttendanceRecord]) {
        let mut roster = self.roster.lock().unwrap_or_else(|e| e.into_inner());
        let mut submitted = self.submitted.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            let entry = roster.insert_record(record);
            if entry.status.is_attended() {
                submitted.insert(entry.student_id);
            }
        }
    }

    /// Atomically claims `student_id`. Returns `false` if it was already
    /// claimed or recorded.
    pub fn try_reserve(&self, student_id: &str) -> bool {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(student_id.to_string())
    }

    pub fn release(&self, student_id: &str) {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(student_id);
    }

    pub fn is_submitted(&self, student_id: &str) -> bool {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(student_id)
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Applies a successful backend write: merges the roster and keeps the
    /// student in the submitted-set only if the stored status is attended.
    pub fn apply(&self, record: &AttendanceRecord, fallback: &RosterEntry) -> RosterEntry {
        let mut roster = self.roster.lock().unwrap_or_else(|e| e.into_inner());
        let entry = roster.merge(record, fallback);
        let mut submitted = self.submitted.lock().unwrap_or_else(|e| e.into_inner());
        if entry.status.is_attended() {
            submitted.insert(entry.student_id.clone());
        } else {
            submitted.remove(&entry.student_id);
        }
        entry
    }

    pub fn display_name(&self, student_id: &str) -> Option<String> {
        self.roster
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(student_id)
            .map(|e| e.display_name.clone())
    }

    pub fn roster_entry(&self, student_id: &str) -> Option<RosterEntry> {
        self.roster
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(student_id)
            .cloned()
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.roster
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries()
            .to_vec()
    }
}
