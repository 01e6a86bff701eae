use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::attendance::domain::roster::RosterEntry;
use crate::attendance::submission_pipeline::{SubmissionError, SubmissionRequest, SubmissionTicket};
use crate::events::recognition_event::EventType;

use super::decision_engine::{DecisionContext, PendingSubmission};
use super::domain::confirmation_ui::{ConfirmationRequest, ConfirmationUi};
use super::domain::tracked_face::{FaceState, TrackedFace};

/// Outcome of putting one face in front of the operator.
pub enum Review {
    /// A prompt for this face is already outstanding.
    AlreadyPrompted,
    /// The student was recorded before or during the prompt.
    Skipped,
    LimitReached,
    Declined,
    Submitted(SubmissionTicket),
}

/// Routes ambiguous recognitions through a human operator, bounded by a
/// per-face prompt limit.
///
/// The prompt blocks the calling thread (the frame loop) until the
/// operator answers or `cancelled` is raised.
pub struct ConfirmationArbiter {
    ui: Box<dyn ConfirmationUi>,
    max_prompts: u32,
    cancelled: Arc<AtomicBool>,
    exhausted: HashSet<String>,
}

impl ConfirmationArbiter {
    pub fn new(ui: Box<dyn ConfirmationUi>, max_prompts: u32, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            ui,
            max_prompts,
            cancelled,
            exhausted: HashSet::new(),
        }
    }

    /// Students whose prompt limit was reached this session.
    pub fn is_exhausted(&self, student_id: &str) -> bool {
        self.exhausted.contains(student_id)
    }

    /// `face` must be in `ManualReview` with a candidate set.
    pub fn review(&mut self, face: &mut TrackedFace, ctx: &DecisionContext) -> Review {
        let Some(student_id) = face.candidate_id.clone() else {
            return Review::AlreadyPrompted;
        };
        let name = face
            .candidate_name
            .clone()
            .unwrap_or_else(|| student_id.clone());

        if face.manual_prompted {
            return Review::AlreadyPrompted;
        }

        if ctx.ledger.is_submitted(&student_id) {
            ctx.publish(
                ctx.event(EventType::AttendanceSkipped, format!("{name} already recorded"))
                    .with_track(face.track_id)
                    .with_student(&student_id, Some(&name))
                    .with_confidence(face.last_distance),
            );
            face.transition(FaceState::Completed);
            return Review::Skipped;
        }

        if face.manual_prompt_attempts >= self.max_prompts || self.exhausted.contains(&student_id) {
            face.transition(FaceState::ManualRejected);
            if self.exhausted.insert(student_id.clone()) {
                self.publish_limit_reached(face.track_id, &student_id, &name, face.last_distance, ctx);
            }
            return Review::LimitReached;
        }

        face.manual_prompted = true;
        face.manual_prompt_attempts += 1;
        let request = ConfirmationRequest {
            track_id: face.track_id,
            student_id: student_id.clone(),
            student_name: name.clone(),
            distance: face.last_distance,
        };
        log::info!(
            "Track {}: asking operator to confirm {name} (attempt {}/{})",
            face.track_id,
            face.manual_prompt_attempts,
            self.max_prompts
        );

        if !self.ui.confirm(&request, &self.cancelled) {
            face.manual_prompted = false;
            face.transition(FaceState::ManualRejected);
            ctx.publish(
                ctx.event(EventType::ManualRejected, format!("Operator rejected {name}"))
                    .with_track(face.track_id)
                    .with_student(&student_id, Some(&name))
                    .with_confidence(face.last_distance)
                    .manual(),
            );
            return Review::Declined;
        }

        if !ctx.ledger.try_reserve(&student_id) {
            face.manual_prompted = false;
            face.transition(FaceState::Completed);
            ctx.publish(
                ctx.event(EventType::AttendanceSkipped, format!("{name} already recorded"))
                    .with_track(face.track_id)
                    .with_student(&student_id, Some(&name))
                    .manual(),
            );
            return Review::Skipped;
        }

        face.transition(FaceState::ManualAccepted);
        Review::Submitted(ctx.submitter.submit(SubmissionRequest::confirmed(
            &student_id,
            face.last_distance,
            "confirmed by operator",
        )))
    }

    /// Applies the outcome of a confirmed submission. `face` is `None` when
    /// the track vanished while the write was in flight.
    pub fn complete(
        &mut self,
        face: Option<&mut TrackedFace>,
        pending: &PendingSubmission,
        result: Result<RosterEntry, SubmissionError>,
        ctx: &DecisionContext,
    ) {
        match result {
            Ok(entry) => {
                if let Some(face) = face {
                    face.transition(FaceState::Completed);
                }
                ctx.publish(
                    ctx.event(
                        EventType::ManualConfirmed,
                        format!("{} marked {} (confirmed)", entry.display_name, entry.status),
                    )
                    .with_track(pending.track_id)
                    .with_student(&entry.student_id, Some(&entry.display_name))
                    .with_confidence(pending.distance)
                    .succeeded()
                    .manual(),
                );
            }
            Err(e) => {
                ctx.ledger.release(&pending.student_id);
                let attempts = match face {
                    Some(face) => {
                        face.manual_prompted = false;
                        let retry = face.manual_prompt_attempts < self.max_prompts;
                        face.transition(if retry {
                            FaceState::ManualReview
                        } else {
                            FaceState::ManualRejected
                        });
                        face.manual_prompt_attempts
                    }
                    None => pending.manual_attempts,
                };

                if attempts < self.max_prompts {
                    ctx.publish(
                        ctx.event(
                            EventType::ManualConfirmationRequired,
                            format!("Could not record {}: {e}; confirm again", pending.student_name),
                        )
                        .with_track(pending.track_id)
                        .with_student(&pending.student_id, Some(&pending.student_name))
                        .with_confidence(pending.distance)
                        .manual(),
                    );
                } else if self.exhausted.insert(pending.student_id.clone()) {
                    self.publish_limit_reached(
                        pending.track_id,
                        &pending.student_id,
                        &pending.student_name,
                        pending.distance,
                        ctx,
                    );
                }
            }
        }
    }

    fn publish_limit_reached(
        &self,
        track_id: u32,
        student_id: &str,
        name: &str,
        distance: f64,
        ctx: &DecisionContext,
    ) {
        log::info!("Track {track_id}: confirmation limit reached for {name}");
        ctx.publish(
            ctx.event(
                EventType::ManualRejected,
                format!("Confirmation limit reached for {name}"),
            )
            .with_track(track_id)
            .with_student(student_id, Some(name))
            .with_confidence(distance)
            .manual(),
        );
    }
}
