use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use rollcall_core::attendance::domain::attendance_record::AttendanceRecord;
use rollcall_core::recognition::domain::face_recognizer::{FaceRecognizer, Recognition};
use rollcall_core::session::domain::frame_source::FrameSource;
use rollcall_core::session::domain::session_state::SessionState;
use rollcall_core::shared::bounding_box::BoundingBox;
use rollcall_core::shared::clock::ManualClock;
use rollcall_core::shared::frame::Frame;
use rollcall_core::tracking::domain::face_detector::FaceDetector;

const BACKGROUND: u8 = 128;
const FIRST_MARKER: u8 = 40;
const MARKER_STEP: u8 = 24;
const MAX_FACES_PER_FRAME: usize = 8;

/// Recorded session: per-frame face boxes with what the recognizer said
/// about each of them.
#[derive(Debug, Deserialize)]
pub struct ReplayScript {
    pub session: ScriptSession,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: i64,
    #[serde(default)]
    pub roster: Vec<ScriptStudent>,
    pub frames: Vec<ScriptFrame>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptSession {
    pub session_id: String,
    pub section_id: String,
    pub started_at: DateTime<Utc>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(default = "default_late_threshold")]
    pub late_threshold_minutes: u32,
}

#[derive(Debug, Deserialize)]
pub struct ScriptStudent {
    pub student_id: String,
    pub student_name: String,
    pub student_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScriptFrame {
    /// Dims the whole frame, e.g. to simulate a covered lens.
    pub brightness: Option<u8>,
    #[serde(default)]
    pub faces: Vec<ScriptFace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptFace {
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f64; 4],
    pub identity: Option<String>,
    #[serde(default)]
    pub distance: f64,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_frame_interval() -> i64 {
    100
}

fn default_late_threshold() -> u32 {
    SessionState::DEFAULT_LATE_THRESHOLD_MINUTES
}

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Cannot read script {}: {e}", path.display()))?;
        let script: ReplayScript = serde_json::from_str(&json)
            .map_err(|e| format!("Malformed script {}: {e}", path.display()))?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.width == 0 || self.height == 0 {
            return Err("Script frame size must be non-zero".into());
        }
        if self.frame_interval_ms <= 0 {
            return Err("frame_interval_ms must be positive".into());
        }
        if let Some(i) = self
            .frames
            .iter()
            .position(|f| f.faces.len() > MAX_FACES_PER_FRAME)
        {
            return Err(format!(
                "Frame {i} has more than {MAX_FACES_PER_FRAME} faces"
            )
            .into());
        }
        Ok(())
    }

    pub fn session_state(&self, access_token: Option<String>) -> SessionState {
        let mut state = SessionState::new(&self.session.session_id, &self.session.section_id)
            .with_schedule(self.session.scheduled_start, self.session.scheduled_end)
            .with_late_threshold(self.session.late_threshold_minutes);
        state.access_token = access_token;
        state
    }

    pub fn roster_records(&self) -> Vec<AttendanceRecord> {
        self.roster
            .iter()
            .map(|s| {
                AttendanceRecord::pending(&s.student_id, &s.student_name, s.student_number.as_deref())
            })
            .collect()
    }
}

/// Faces of the frame currently in flight, keyed by the marker value
/// painted at their center.
type CurrentFaces = Arc<Mutex<HashMap<u8, ScriptFace>>>;

/// Builds the scripted source, detector and recognizer. They share the
/// faces of the frame in flight; the frame loop calls them in order on a
/// single thread so no frame's faces leak into another's.
pub fn scripted_capabilities(
    script: ReplayScript,
    clock: Arc<ManualClock>,
) -> (ScriptedFrameSource, ScriptedDetector, ScriptedRecognizer) {
    let current: CurrentFaces = Arc::default();
    let source = ScriptedFrameSource {
        width: script.width,
        height: script.height,
        interval: Duration::milliseconds(script.frame_interval_ms),
        frames: script.frames.into_iter(),
        index: 0,
        clock,
        current: current.clone(),
    };
    (
        source,
        ScriptedDetector {
            current: current.clone(),
        },
        ScriptedRecognizer { current },
    )
}

fn lock(faces: &CurrentFaces) -> std::sync::MutexGuard<'_, HashMap<u8, ScriptFace>> {
    faces.lock().unwrap_or_else(|e| e.into_inner())
}

fn marker(slot: usize) -> u8 {
    FIRST_MARKER + MARKER_STEP * slot as u8
}

/// Renders each scripted frame as a flat gray image with every face box
/// painted in its own marker value, and advances the clock by one frame
/// interval per frame.
pub struct ScriptedFrameSource {
    width: u32,
    height: u32,
    interval: Duration,
    frames: std::vec::IntoIter<ScriptFrame>,
    index: usize,
    clock: Arc<ManualClock>,
    current: CurrentFaces,
}

impl ScriptedFrameSource {
    fn render(&self, frame: &ScriptFrame) -> Frame {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![frame.brightness.unwrap_or(BACKGROUND); w * h * 3];
        for (slot, face) in frame.faces.iter().enumerate() {
            let [x1, y1, x2, y2] = face.bbox;
            let x1 = (x1.max(0.0) as usize).min(w);
            let y1 = (y1.max(0.0) as usize).min(h);
            let x2 = (x2.max(0.0) as usize).min(w);
            let y2 = (y2.max(0.0) as usize).min(h);
            for row in y1..y2 {
                let start = (row * w + x1) * 3;
                let end = (row * w + x2) * 3;
                data[start..end].fill(marker(slot));
            }
        }
        Frame::new(data, self.width, self.height, 3, self.index)
    }
}

impl FrameSource for ScriptedFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let Some(scripted) = self.frames.next() else {
            return Ok(None);
        };
        if self.index > 0 {
            self.clock.advance(self.interval);
        }
        let frame = self.render(&scripted);
        *lock(&self.current) = scripted
            .faces
            .into_iter()
            .enumerate()
            .map(|(slot, face)| (marker(slot), face))
            .collect();
        self.index += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        lock(&self.current).clear();
        log::debug!("Replay source closed after {} frames", self.index);
    }
}

pub struct ScriptedDetector {
    current: CurrentFaces,
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, Box<dyn std::error::Error>> {
        let mut faces: Vec<_> = lock(&self.current)
            .iter()
            .map(|(marker, face)| (*marker, face.bbox))
            .collect();
        faces.sort_by_key(|(marker, _)| *marker);
        Ok(faces
            .into_iter()
            .map(|(_, [x1, y1, x2, y2])| BoundingBox::new(x1, y1, x2, y2, 0.9))
            .collect())
    }
}

/// Identifies a crop by the marker value at its center.
pub struct ScriptedRecognizer {
    current: CurrentFaces,
}

impl FaceRecognizer for ScriptedRecognizer {
    fn recognize(&mut self, crop: &Frame) -> Result<Option<Recognition>, Box<dyn std::error::Error>> {
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(None);
        }
        let (cx, cy) = ((crop.width() / 2) as usize, (crop.height() / 2) as usize);
        let offset = (cy * crop.width() as usize + cx) * crop.channels() as usize;
        let Some(&value) = crop.data().get(offset) else {
            return Ok(None);
        };
        // Resampling may blur the marker by a level or two.
        let faces = lock(&self.current);
        let face = faces
            .iter()
            .filter(|(m, _)| m.abs_diff(value) <= MARKER_STEP / 2)
            .min_by_key(|(m, _)| m.abs_diff(value))
            .map(|(_, face)| face)
            .ok_or_else(|| format!("no scripted face with marker {value}"))?;
        Ok(face
            .identity
            .as_ref()
            .map(|id| Recognition::new(id.clone(), face.distance)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use std::io::Write;

    const SCRIPT: &str = r#"{
        "session": {
            "session_id": "sess-1",
            "section_id": "sec-1",
            "started_at": "2026-03-02T08:00:00Z",
            "scheduled_start": "2026-03-02T08:00:00Z"
        },
        "width": 320,
        "height": 240,
        "frame_interval_ms": 200,
        "roster": [{"student_id": "s-1", "student_name": "Ada"}],
        "frames": [
            {"faces": [
                {"bbox": [20, 20, 100, 120], "identity": "s-1", "distance": 0.3},
                {"bbox": [180, 40, 260, 140], "identity": null}
            ]},
            {"brightness": 5}
        ]
    }"#;

    fn script_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn test_load_applies_defaults() {
        let file = script_file(SCRIPT);
        let script = ReplayScript::load(file.path()).unwrap();

        assert_eq!(script.session.late_threshold_minutes, 15);
        assert_eq!(script.frames.len(), 2);
        let state = script.session_state(Some("tok".into()));
        assert_eq!(state.session_id, "sess-1");
        assert_eq!(state.access_token.as_deref(), Some("tok"));
        assert_eq!(script.roster_records()[0].student_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_load_rejects_malformed_script() {
        let file = script_file("{\"frames\": 3}");
        let err = ReplayScript::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Malformed script"));
    }

    #[test]
    fn test_replay_identifies_each_face() {
        let script: ReplayScript = serde_json::from_str(SCRIPT).unwrap();
        let clock = clock();
        let (mut source, mut detector, mut recognizer) = scripted_capabilities(script, clock);

        let frame = source.next_frame().unwrap().unwrap();
        let boxes = detector.detect(&frame).unwrap();
        assert_eq!(boxes.len(), 2);

        let first = recognizer
            .recognize(&frame.face_crop(&boxes[0], 112).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(first.identity, "s-1");
        assert_relative_eq!(first.distance, 0.3);

        let second = recognizer
            .recognize(&frame.face_crop(&boxes[1], 112).unwrap())
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_source_advances_clock_and_ends() {
        let script: ReplayScript = serde_json::from_str(SCRIPT).unwrap();
        let clock = clock();
        let start = rollcall_core::shared::clock::Clock::now(clock.as_ref());
        let (mut source, mut detector, _) = scripted_capabilities(script, clock.clone());

        source.next_frame().unwrap();
        let dark = source.next_frame().unwrap().unwrap();
        assert!(dark.mean_luma() < 10.0);
        assert!(detector.detect(&dark).unwrap().is_empty());
        assert_eq!(
            rollcall_core::shared::clock::Clock::now(clock.as_ref()) - start,
            Duration::milliseconds(200)
        );
        assert!(source.next_frame().unwrap().is_none());
    }
}
