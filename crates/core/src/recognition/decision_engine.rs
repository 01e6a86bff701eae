use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::attendance::domain::attendance_ledger::AttendanceLedger;
use crate::attendance::domain::roster::RosterEntry;
use crate::attendance::submission_pipeline::{
    SubmissionError, SubmissionRequest, SubmissionTicket, Submitter,
};
use crate::events::event_bus::EventBus;
use crate::events::recognition_event::{EventType, RecognitionEvent};
use crate::shared::clock::Clock;
use crate::shared::constants::UNKNOWN_IDENTITY;
use crate::shared::engine_config::EngineConfig;
use crate::shared::frame::Frame;
use crate::tracking::domain::track::Track;

use super::confirmation_arbiter::{ConfirmationArbiter, Review};
use super::domain::confirmation_ui::ConfirmationUi;
use super::domain::face_overlay::FaceOverlay;
use super::domain::face_recognizer::FaceRecognizer;
use super::domain::tracked_face::{FaceState, TrackedFace};

/// Which path a recognition distance takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceBand {
    AutoAccept,
    ManualReview,
    Reject,
}

impl DistanceBand {
    /// Partitions distances by the two thresholds. Non-finite distances are
    /// rejected.
    pub fn classify(distance: f64, auto_accept_max: f64, manual_review_max: f64) -> Self {
        if !distance.is_finite() {
            DistanceBand::Reject
        } else if distance <= auto_accept_max {
            DistanceBand::AutoAccept
        } else if distance <= manual_review_max {
            DistanceBand::ManualReview
        } else {
            DistanceBand::Reject
        }
    }
}

/// Shared collaborators for the engine and the arbiter.
pub struct DecisionContext {
    pub ledger: Arc<AttendanceLedger>,
    pub submitter: Submitter,
    pub bus: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
}

impl DecisionContext {
    pub fn event(&self, event_type: EventType, message: impl Into<String>) -> RecognitionEvent {
        RecognitionEvent::new(event_type, self.clock.now(), message)
    }

    pub fn publish(&self, event: RecognitionEvent) {
        self.bus.publish(event);
    }
}

/// A submission the engine is waiting on.
pub struct PendingSubmission {
    pub track_id: u32,
    pub student_id: String,
    pub student_name: String,
    pub distance: f64,
    pub manual: bool,
    pub manual_attempts: u32,
    ticket: SubmissionTicket,
}

/// Per-track recognition state machine.
///
/// Driven by the frame loop: `poll_submissions` applies finished writes,
/// `sync_tracks` mirrors the reconciler's confirmed tracks, `evaluate`
/// runs recognition for every eligible face. Submissions run on the
/// pipeline thread; their outcomes are applied on the next poll.
pub struct DecisionEngine {
    config: EngineConfig,
    recognizer: Box<dyn FaceRecognizer>,
    arbiter: ConfirmationArbiter,
    faces: BTreeMap<u32, TrackedFace>,
    pending: Vec<PendingSubmission>,
    excluded: HashSet<String>,
    ctx: DecisionContext,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        recognizer: Box<dyn FaceRecognizer>,
        confirmation: Box<dyn ConfirmationUi>,
        cancelled: Arc<AtomicBool>,
        excluded: HashSet<String>,
        ctx: DecisionContext,
    ) -> Self {
        let arbiter = ConfirmationArbiter::new(confirmation, config.max_manual_prompts, cancelled);
        Self {
            config,
            recognizer,
            arbiter,
            faces: BTreeMap::new(),
            pending: Vec::new(),
            excluded,
            ctx,
        }
    }

    /// Creates faces for newly confirmed tracks, refreshes existing ones and
    /// drops faces whose track was not updated this frame.
    pub fn sync_tracks(&mut self, tracks: &[Track]) {
        let live: HashSet<u32> = tracks.iter().map(|t| t.id).collect();
        self.faces.retain(|id, _| live.contains(id));
        for track in tracks {
            self.faces
                .entry(track.id)
                .and_modify(|face| face.refresh(track))
                .or_insert_with(|| TrackedFace::new(track));
        }
    }

    /// Applies every submission outcome that has arrived.
    pub fn poll_submissions(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for submission in pending {
            match submission.ticket.try_result() {
                Some(result) => self.complete(&submission, result),
                None => self.pending.push(submission),
            }
        }
    }

    /// Blocks until every outstanding submission has resolved.
    pub fn finish(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for submission in pending {
            let result = submission.ticket.wait();
            self.complete(&submission, result);
        }
    }

    /// Runs one decision pass over all live faces. Per-face failures are
    /// reported and do not stop the pass.
    pub fn evaluate(&mut self, frame: &Frame) {
        let now = self.ctx.clock.now();
        let ids: Vec<u32> = self.faces.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.evaluate_face(id, frame, now) {
                log::warn!("Track {id}: evaluation failed: {e}");
                self.ctx.publish(
                    self.ctx
                        .event(EventType::Error, format!("Recognition failed: {e}"))
                        .with_track(id),
                );
            }
        }
    }

    pub fn overlays(&self) -> Vec<FaceOverlay> {
        self.faces.values().map(FaceOverlay::from).collect()
    }

    pub fn faces(&self) -> impl Iterator<Item = &TrackedFace> {
        self.faces.values()
    }

    pub fn face(&self, track_id: u32) -> Option<&TrackedFace> {
        self.faces.get(&track_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn eligible(&self, face: &TrackedFace, now: DateTime<Utc>) -> bool {
        if !face.state().is_evaluable() {
            return false;
        }
        if self.pending.iter().any(|p| p.track_id == face.track_id) {
            return false;
        }
        face.bbox.min_side() >= self.config.min_face_size
            && face.seen_frames >= self.config.min_frames
            && face.motion >= self.config.min_motion
            && !face.throttled(now, self.config.attempt_interval())
    }

    fn evaluate_face(
        &mut self,
        track_id: u32,
        frame: &Frame,
        now: DateTime<Utc>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let Some(face) = self.faces.get(&track_id) else {
            return Ok(());
        };
        if !self.eligible(face, now) {
            return Ok(());
        }
        let Some(crop) = frame.face_crop(&face.bbox, self.config.crop_size) else {
            return Ok(());
        };

        let recognition = self.recognizer.recognize(&crop);
        let Some(face) = self.faces.get_mut(&track_id) else {
            return Ok(());
        };
        let distance = match &recognition {
            Ok(Some(r)) => r.distance,
            _ => f64::NAN,
        };
        face.record_attempt(now, distance);
        let identity = recognition?.map(|r| r.identity).unwrap_or_default();

        if identity.is_empty() || identity == UNKNOWN_IDENTITY || self.excluded.contains(&identity) {
            face.clear_candidate();
            face.transition(FaceState::Ignored);
            let message = if self.excluded.contains(&identity) {
                format!("{identity} is not expected in this session")
            } else {
                "Unrecognized face".to_string()
            };
            self.ctx.publish(
                self.ctx
                    .event(EventType::AutoRejected, message)
                    .with_track(track_id)
                    .with_confidence(distance),
            );
            return Ok(());
        }

        let name = self
            .ctx
            .ledger
            .display_name(&identity)
            .unwrap_or_else(|| identity.clone());
        face.set_candidate(&identity, &name);

        match DistanceBand::classify(
            distance,
            self.config.auto_accept_max_distance,
            self.config.manual_review_max_distance,
        ) {
            DistanceBand::AutoAccept => {
                face.transition(FaceState::AutoAccepted);
                if !self.ctx.ledger.try_reserve(&identity) {
                    face.transition(FaceState::Completed);
                    self.ctx.publish(
                        self.ctx
                            .event(EventType::AttendanceSkipped, format!("{name} already recorded"))
                            .with_track(track_id)
                            .with_student(&identity, Some(&name))
                            .with_confidence(distance),
                    );
                    return Ok(());
                }
                let ticket = self
                    .ctx
                    .submitter
                    .submit(SubmissionRequest::automatic(&identity, distance));
                self.pending.push(PendingSubmission {
                    track_id,
                    student_id: identity,
                    student_name: name,
                    distance,
                    manual: false,
                    manual_attempts: 0,
                    ticket,
                });
            }
            DistanceBand::ManualReview => {
                face.transition(FaceState::ManualReview);
                if let Review::Submitted(ticket) = self.arbiter.review(face, &self.ctx) {
                    let manual_attempts = face.manual_prompt_attempts;
                    self.pending.push(PendingSubmission {
                        track_id,
                        student_id: identity,
                        student_name: name,
                        distance,
                        manual: true,
                        manual_attempts,
                        ticket,
                    });
                }
            }
            DistanceBand::Reject => {
                face.transition(FaceState::Ignored);
                self.ctx.publish(
                    self.ctx
                        .event(EventType::AutoRejected, format!("Match for {name} too weak"))
                        .with_track(track_id)
                        .with_student(&identity, Some(&name))
                        .with_confidence(distance),
                );
            }
        }
        Ok(())
    }

    fn complete(
        &mut self,
        pending: &PendingSubmission,
        result: Result<RosterEntry, SubmissionError>,
    ) {
        let face = self.faces.get_mut(&pending.track_id);
        if pending.manual {
            self.arbiter.complete(face, pending, result, &self.ctx);
            return;
        }

        match result {
            Ok(entry) => {
                if let Some(face) = face {
                    face.transition(FaceState::Completed);
                }
                self.ctx.publish(
                    self.ctx
                        .event(
                            EventType::AttendanceRecorded,
                            format!("{} marked {}", entry.display_name, entry.status),
                        )
                        .with_track(pending.track_id)
                        .with_student(&entry.student_id, Some(&entry.display_name))
                        .with_confidence(pending.distance)
                        .succeeded(),
                );
            }
            Err(e) => {
                log::debug!(
                    "Track {}: releasing {} after failed write: {e}",
                    pending.track_id,
                    pending.student_id
                );
                self.ctx.ledger.release(&pending.student_id);
                if let Some(face) = face {
                    face.transition(FaceState::Ignored);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::domain::attendance_backend::{AttendanceBackend, BackendError};
    use crate::attendance::domain::attendance_record::{AttendancePayload, AttendanceRecord};
    use crate::attendance::submission_pipeline::{LateRule, SubmissionContext, SubmissionPipeline};
    use crate::recognition::domain::confirmation_ui::ConfirmationRequest;
    use crate::recognition::domain::face_recognizer::Recognition;
    use crate::session::domain::session_state::StopReason;
    use crate::shared::bounding_box::BoundingBox;
    use crate::shared::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    // --- Stubs ---

    /// Answers with a fixed recognition per call, repeating the last one.
    struct ScriptedRecognizer {
        answers: VecDeque<Result<Option<Recognition>, String>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedRecognizer {
        fn fixed(identity: &str, distance: f64) -> Self {
            Self::script(vec![Ok(Some(Recognition::new(identity, distance)))])
        }

        fn script(answers: Vec<Result<Option<Recognition>, String>>) -> Self {
            Self {
                answers: answers.into(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FaceRecognizer for ScriptedRecognizer {
        fn recognize(
            &mut self,
            _crop: &Frame,
        ) -> Result<Option<Recognition>, Box<dyn std::error::Error>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = if self.answers.len() > 1 {
                self.answers.pop_front()
            } else {
                self.answers.front().cloned()
            };
            match answer {
                Some(Ok(r)) => Ok(r),
                Some(Err(e)) => Err(e.into()),
                None => Ok(None),
            }
        }
    }

    struct StubConfirmation {
        answer: bool,
        prompts: Arc<Mutex<Vec<ConfirmationRequest>>>,
    }

    impl ConfirmationUi for StubConfirmation {
        fn confirm(&mut self, request: &ConfirmationRequest, _cancelled: &AtomicBool) -> bool {
            self.prompts.lock().unwrap().push(request.clone());
            self.answer
        }
    }

    #[derive(Default)]
    struct StubBackend {
        fail: AtomicBool,
        submissions: AtomicUsize,
    }

    impl AttendanceBackend for StubBackend {
        fn submit(&self, payload: &AttendancePayload) -> Result<AttendanceRecord, BackendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("offline".into()));
            }
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(AttendanceRecord {
                student_id: payload.student_id.clone(),
                student_name: None,
                student_number: None,
                status: Some(payload.status),
                marked_at: Some(payload.marked_at),
                method: Some(payload.method),
                confidence: payload.confidence,
            })
        }

        fn fetch_roster(&self) -> Result<Vec<AttendanceRecord>, BackendError> {
            Ok(Vec::new())
        }

        fn notify_stop(&self, _reason: StopReason) -> Result<(), BackendError> {
            Ok(())
        }
    }

    // --- Harness ---

    struct Harness {
        engine: DecisionEngine,
        pipeline: SubmissionPipeline,
        backend: Arc<StubBackend>,
        ledger: Arc<AttendanceLedger>,
        bus: Arc<EventBus>,
        clock: Arc<ManualClock>,
        prompts: Arc<Mutex<Vec<ConfirmationRequest>>>,
        frame: Frame,
    }

    fn config() -> EngineConfig {
        EngineConfig {
            min_face_size: 40.0,
            min_frames: 2,
            min_motion: 1.0,
            attempt_interval_ms: 1000,
            auto_accept_max_distance: 0.4,
            manual_review_max_distance: 0.6,
            max_manual_prompts: 3,
            crop_size: 16,
            ..EngineConfig::default()
        }
    }

    fn harness(recognizer: ScriptedRecognizer, confirm: bool, excluded: &[&str]) -> Harness {
        let backend = Arc::new(StubBackend::default());
        let ledger = Arc::new(AttendanceLedger::new());
        let bus = Arc::new(EventBus::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        ));
        let pipeline = SubmissionPipeline::start(SubmissionContext {
            session_id: "sess".into(),
            section_id: "sec".into(),
            late_rule: LateRule {
                scheduled_start: None,
                late_threshold_minutes: 15,
            },
            backend: backend.clone(),
            ledger: ledger.clone(),
            bus: bus.clone(),
            clock: clock.clone(),
        })
        .unwrap();
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let engine = DecisionEngine::new(
            config(),
            Box::new(recognizer),
            Box::new(StubConfirmation {
                answer: confirm,
                prompts: prompts.clone(),
            }),
            Arc::new(AtomicBool::new(false)),
            excluded.iter().map(|s| s.to_string()).collect(),
            DecisionContext {
                ledger: ledger.clone(),
                submitter: pipeline.submitter().unwrap(),
                bus: bus.clone(),
                clock: clock.clone(),
            },
        );
        Harness {
            engine,
            pipeline,
            backend,
            ledger,
            bus,
            clock,
            prompts,
            frame: Frame::filled(320, 240, 3, 120, 0),
        }
    }

    fn track(id: u32) -> Track {
        Track {
            id,
            bbox: BoundingBox::new(50.0, 50.0, 130.0, 140.0, 0.9),
            seen_frames: 4,
            motion: 5.0,
            updated: true,
        }
    }

    impl Harness {
        /// One frame: apply outcomes, sync, evaluate, then let the
        /// submission thread finish and apply its outcome.
        fn step(&mut self, tracks: &[Track]) {
            self.engine.poll_submissions();
            self.engine.sync_tracks(tracks);
            self.engine.evaluate(&self.frame);
            self.engine.finish();
        }

        fn next_attempt(&self) {
            self.clock.advance(Duration::milliseconds(1001));
        }

        fn events(&self, event_type: EventType) -> Vec<RecognitionEvent> {
            self.bus
                .snapshot()
                .into_iter()
                .filter(|e| e.event_type == event_type)
                .collect()
        }

        fn state(&self, id: u32) -> FaceState {
            self.engine.face(id).unwrap().state()
        }
    }

    // --- Threshold partition ---

    #[rstest]
    #[case(0.0, DistanceBand::AutoAccept)]
    #[case(0.4, DistanceBand::AutoAccept)]
    #[case(0.4000001, DistanceBand::ManualReview)]
    #[case(0.6, DistanceBand::ManualReview)]
    #[case(0.6000001, DistanceBand::Reject)]
    #[case(5.0, DistanceBand::Reject)]
    #[case(f64::NAN, DistanceBand::Reject)]
    #[case(f64::INFINITY, DistanceBand::Reject)]
    #[case(f64::NEG_INFINITY, DistanceBand::Reject)]
    fn test_distance_partition(#[case] distance: f64, #[case] expected: DistanceBand) {
        assert_eq!(DistanceBand::classify(distance, 0.4, 0.6), expected);
    }

    #[rstest]
    #[case(0.2, FaceState::Completed, EventType::AttendanceRecorded)]
    #[case(0.5, FaceState::Completed, EventType::ManualConfirmed)]
    #[case(0.8, FaceState::Ignored, EventType::AutoRejected)]
    fn test_distance_drives_outcome(
        #[case] distance: f64,
        #[case] state: FaceState,
        #[case] event: EventType,
    ) {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", distance), true, &[]);
        h.step(&[track(1)]);

        assert_eq!(h.state(1), state);
        assert_eq!(h.events(event).len(), 1);
    }

    // --- Gating ---

    #[rstest]
    #[case(Track { bbox: BoundingBox::new(0.0, 0.0, 30.0, 30.0, 0.9), ..track(1) })]
    #[case(Track { seen_frames: 1, ..track(1) })]
    #[case(Track { motion: 0.0, ..track(1) })]
    fn test_gated_faces_are_not_recognized(#[case] t: Track) {
        let recognizer = ScriptedRecognizer::fixed("s-1", 0.1);
        let calls = recognizer.calls.clone();
        let mut h = harness(recognizer, true, &[]);

        h.step(&[t]);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.state(1), FaceState::Detected);
    }

    #[test]
    fn test_attempts_are_throttled() {
        let recognizer = ScriptedRecognizer::fixed("unknown", 0.9);
        let calls = recognizer.calls.clone();
        let mut h = harness(recognizer, true, &[]);

        h.step(&[track(1)]);
        h.step(&[track(1)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        h.next_attempt();
        h.step(&[track(1)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.engine.face(1).unwrap().attempts, 2);
    }

    // --- Rejections ---

    #[test]
    fn test_unknown_identity_is_auto_rejected() {
        let mut h = harness(ScriptedRecognizer::fixed("unknown", 0.1), true, &[]);
        h.step(&[track(1)]);

        assert_eq!(h.state(1), FaceState::Ignored);
        let rejected = h.events(EventType::AutoRejected);
        assert_eq!(rejected[0].confidence, Some(0.1));
        assert!(h.engine.face(1).unwrap().candidate_id.is_none());
    }

    #[test]
    fn test_no_candidate_is_auto_rejected() {
        let mut h = harness(ScriptedRecognizer::script(vec![Ok(None)]), true, &[]);
        h.step(&[track(1)]);

        assert_eq!(h.state(1), FaceState::Ignored);
        assert_eq!(h.events(EventType::AutoRejected)[0].confidence, None);
    }

    #[test]
    fn test_excluded_student_is_never_submitted() {
        let mut h = harness(ScriptedRecognizer::fixed("s-away", 0.1), true, &["s-away"]);
        h.step(&[track(1)]);

        assert_eq!(h.state(1), FaceState::Ignored);
        assert_eq!(h.backend.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(h.events(EventType::AutoRejected).len(), 1);
    }

    #[test]
    fn test_ignored_face_recovers_when_confidence_improves() {
        let recognizer = ScriptedRecognizer::script(vec![
            Ok(Some(Recognition::new("s-1", 0.9))),
            Ok(Some(Recognition::new("s-1", 0.5))),
        ]);
        let mut h = harness(recognizer, true, &[]);

        h.step(&[track(1)]);
        assert_eq!(h.state(1), FaceState::Ignored);

        h.next_attempt();
        h.step(&[track(1)]);
        assert_eq!(h.state(1), FaceState::Completed);
        assert_eq!(h.events(EventType::ManualConfirmed).len(), 1);
    }

    #[test]
    fn test_recognizer_error_is_reported_and_pass_continues() {
        let recognizer = ScriptedRecognizer::script(vec![
            Err("model crashed".into()),
            Ok(Some(Recognition::new("s-2", 0.1))),
        ]);
        let mut h = harness(recognizer, true, &[]);

        h.step(&[track(1), track(2)]);

        let errors = h.events(EventType::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].track_id, Some(1));
        assert_eq!(h.state(2), FaceState::Completed);
    }

    // --- At-most-once ---

    #[test]
    fn test_two_tracks_of_same_student_submit_once() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.1), true, &[]);
        let second = Track {
            bbox: BoundingBox::new(200.0, 50.0, 280.0, 140.0, 0.9),
            ..track(2)
        };

        h.step(&[track(1), second]);

        assert_eq!(h.backend.submissions.load(Ordering::SeqCst), 1);
        assert_eq!(h.events(EventType::AttendanceRecorded).len(), 1);
        assert_eq!(h.events(EventType::AttendanceSkipped).len(), 1);
        assert_eq!(h.state(1), FaceState::Completed);
        assert_eq!(h.state(2), FaceState::Completed);
    }

    #[test]
    fn test_repeat_evaluations_never_resubmit() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.1), true, &[]);
        for _ in 0..5 {
            h.step(&[track(1)]);
            h.next_attempt();
        }

        assert_eq!(h.backend.submissions.load(Ordering::SeqCst), 1);
        assert_eq!(h.events(EventType::AttendanceSkipped).len(), 4);
        assert!(h.ledger.is_submitted("s-1"));
    }

    #[test]
    fn test_failed_auto_submission_releases_and_retries() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.1), true, &[]);
        h.backend.fail.store(true, Ordering::SeqCst);

        h.step(&[track(1)]);
        assert_eq!(h.state(1), FaceState::Ignored);
        assert!(!h.ledger.is_submitted("s-1"));
        assert_eq!(h.events(EventType::Error).len(), 1);

        h.backend.fail.store(false, Ordering::SeqCst);
        h.next_attempt();
        h.step(&[track(1)]);
        assert_eq!(h.state(1), FaceState::Completed);
        assert!(h.ledger.is_submitted("s-1"));
    }

    #[test]
    fn test_outcome_for_vanished_track_still_published() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.1), true, &[]);
        h.engine.sync_tracks(&[track(1)]);
        h.engine.evaluate(&h.frame);
        h.engine.sync_tracks(&[]);
        h.engine.finish();

        assert!(h.engine.face(1).is_none());
        assert_eq!(h.events(EventType::AttendanceRecorded).len(), 1);
    }

    #[test]
    fn test_pending_face_is_not_reevaluated() {
        let recognizer = ScriptedRecognizer::fixed("s-1", 0.1);
        let calls = recognizer.calls.clone();
        let mut h = harness(recognizer, true, &[]);
        h.engine.sync_tracks(&[track(1)]);
        h.engine.evaluate(&h.frame);
        h.next_attempt();
        h.engine.evaluate(&h.frame);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        h.engine.finish();
        assert_eq!(h.engine.pending_count(), 0);
    }

    // --- Manual confirmation ---

    #[test]
    fn test_manual_retry_bound() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.5), false, &[]);
        for _ in 0..3 {
            h.step(&[track(1)]);
            h.next_attempt();
        }
        assert_eq!(h.prompts.lock().unwrap().len(), 3);
        assert_eq!(h.events(EventType::ManualRejected).len(), 3);

        h.step(&[track(1)]);

        assert_eq!(h.prompts.lock().unwrap().len(), 3);
        let rejected = h.events(EventType::ManualRejected);
        assert_eq!(rejected.len(), 4);
        assert!(rejected[3].message.contains("limit reached"));
        assert_eq!(h.state(1), FaceState::ManualRejected);
        assert_eq!(h.backend.submissions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_limit_reached_is_reported_once() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.5), false, &[]);
        for _ in 0..6 {
            h.step(&[track(1)]);
            h.next_attempt();
        }

        let limits = h
            .events(EventType::ManualRejected)
            .into_iter()
            .filter(|e| e.message.contains("limit reached"))
            .count();
        assert_eq!(limits, 1);
        assert_eq!(h.prompts.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_manual_prompt_carries_roster_name() {
        let mut h = harness(ScriptedRecognizer::fixed("s-7", 0.5), true, &[]);
        h.ledger
            .load(&[AttendanceRecord::pending("s-7", "Katherine Johnson", None)]);

        h.step(&[track(1)]);

        let prompts = h.prompts.lock().unwrap();
        assert_eq!(prompts[0].student_name, "Katherine Johnson");
        assert_eq!(prompts[0].track_id, 1);
        drop(prompts);
        let confirmed = h.events(EventType::ManualConfirmed);
        assert!(confirmed[0].manual && confirmed[0].success);
    }

    #[test]
    fn test_manual_skips_already_recorded_student() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.5), true, &[]);
        assert!(h.ledger.try_reserve("s-1"));

        h.step(&[track(1)]);

        assert!(h.prompts.lock().unwrap().is_empty());
        assert_eq!(h.events(EventType::AttendanceSkipped).len(), 1);
        assert_eq!(h.state(1), FaceState::Completed);
    }

    #[test]
    fn test_failed_manual_submission_asks_again() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.5), true, &[]);
        h.backend.fail.store(true, Ordering::SeqCst);

        h.step(&[track(1)]);

        assert_eq!(h.state(1), FaceState::ManualReview);
        assert!(!h.ledger.is_submitted("s-1"));
        assert!(!h.engine.face(1).unwrap().manual_prompted);
        assert_eq!(h.events(EventType::ManualConfirmationRequired).len(), 1);

        h.backend.fail.store(false, Ordering::SeqCst);
        h.next_attempt();
        h.step(&[track(1)]);
        assert_eq!(h.state(1), FaceState::Completed);
        assert_eq!(h.prompts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_manual_submission_on_last_attempt_rejects() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.5), true, &[]);
        h.backend.fail.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            h.step(&[track(1)]);
            h.next_attempt();
        }

        assert_eq!(h.state(1), FaceState::ManualRejected);
        assert_eq!(h.events(EventType::ManualConfirmationRequired).len(), 2);
        let limits = h
            .events(EventType::ManualRejected)
            .into_iter()
            .filter(|e| e.message.contains("limit reached"))
            .count();
        assert_eq!(limits, 1);
    }

    #[test]
    fn test_overlays_mirror_faces() {
        let mut h = harness(ScriptedRecognizer::fixed("s-1", 0.8), true, &[]);
        h.step(&[track(1)]);

        let overlays = h.engine.overlays();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].state, FaceState::Ignored);
        assert_eq!(overlays[0].student_id.as_deref(), Some("s-1"));
        assert_eq!(overlays[0].distance, Some(0.8));
        drop(h.engine);
        h.pipeline.shutdown();
    }
}
