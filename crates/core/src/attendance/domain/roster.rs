use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::attendance_record::{AttendanceRecord, AttendanceStatus, MarkingMethod};

/// Per-student attendance projection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RosterEntry {
    pub student_id: String,
    pub display_name: String,
    pub student_number: Option<String>,
    pub status: AttendanceStatus,
    pub marked_at: Option<DateTime<Utc>>,
    pub method: Option<MarkingMethod>,
    pub confidence: Option<f64>,
}

/// Roster view keyed by student id, iterated in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
    index: HashMap<String, usize>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, student_id: &str) -> Option<&RosterEntry> {
        self.index.get(student_id).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// Merges a backend record into the roster, preferring the record's
    /// values and falling back to what the roster already held. `fallback`
    /// fills fields neither side provides (typically the submitted payload).
    pub fn merge(&mut self, record: &AttendanceRecord, fallback: &RosterEntry) -> RosterEntry {
        let prior = self.get(&record.student_id).cloned();
        let prior = prior.as_ref().unwrap_or(fallback);

        let merged = RosterEntry {
            student_id: record.student_id.clone(),
            display_name: record
                .student_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| prior.display_name.clone()),
            student_number: record
                .student_number
                .clone()
                .or_else(|| prior.student_number.clone()),
            status: record.status.unwrap_or(fallback.status),
            marked_at: record.marked_at.or(fallback.marked_at).or(prior.marked_at),
            method: record.method.or(fallback.method).or(prior.method),
            confidence: record
                .confidence
                .or(fallback.confidence)
                .or(prior.confidence),
        };
        self.upsert(merged.clone());
        merged
    }

    /// Adds a record fetched at session start. Missing names fall back to
    /// the student id.
    pub fn insert_record(&mut self, record: &AttendanceRecord) -> RosterEntry {
        let entry = RosterEntry {
            student_id: record.student_id.clone(),
            display_name: record
                .student_name
                .clone()
                .unwrap_or_else(|| record.student_id.clone()),
            student_number: record.student_number.clone(),
            status: record.status.unwrap_or(AttendanceStatus::Pending),
            marked_at: record.marked_at,
            method: record.method,
            confidence: record.confidence,
        };
        self.upsert(entry.clone());
        entry
    }

    fn upsert(&mut self, entry: RosterEntry) {
        match self.index.get(&entry.student_id) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.student_id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}
