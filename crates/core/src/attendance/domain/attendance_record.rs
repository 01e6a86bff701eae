use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Pending,
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    /// Present and late both mean the student has been recorded and must
    /// not be submitted again.
    pub fn is_attended(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceStatus::Pending => write!(f, "pending"),
            AttendanceStatus::Present => write!(f, "present"),
            AttendanceStatus::Late => write!(f, "late"),
            AttendanceStatus::Absent => write!(f, "absent"),
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(AttendanceStatus::Pending),
            "present" => Ok(AttendanceStatus::Present),
            "late" => Ok(AttendanceStatus::Late),
            "absent" => Ok(AttendanceStatus::Absent),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkingMethod {
    Auto,
    Manual,
}

/// Outbound write for one student.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttendancePayload {
    pub session_id: String,
    pub section_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
    pub method: MarkingMethod,
    pub confidence: Option<f64>,
    pub notes: Option<String>,
}

/// Attendance record as returned by the backend. Only `student_id` is
/// guaranteed; everything else may be omitted and is then taken from the
/// roster's prior values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub student_name: Option<String>,
    pub student_number: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub marked_at: Option<DateTime<Utc>>,
    pub method: Option<MarkingMethod>,
    pub confidence: Option<f64>,
}

impl AttendanceRecord {
    pub fn pending(student_id: &str, student_name: &str, student_number: Option<&str>) -> Self {
        Self {
            student_id: student_id.to_string(),
            student_name: Some(student_name.to_string()),
            student_number: student_number.map(str::to_string),
            status: Some(AttendanceStatus::Pending),
            marked_at: None,
            method: None,
            confidence: None,
        }
    }
}
