use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use thiserror::Error;

use crate::events::event_bus::EventBus;
use crate::events::recognition_event::{EventType, RecognitionEvent};
use crate::shared::clock::Clock;

use super::domain::attendance_backend::{AttendanceBackend, BackendError};
use super::domain::attendance_ledger::AttendanceLedger;
use super::domain::attendance_record::{AttendancePayload, AttendanceStatus, MarkingMethod};
use super::domain::roster::RosterEntry;

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("submission queue is closed")]
    Closed,
}

/// Attendance write requested by the decision engine or an operator.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionRequest {
    pub student_id: String,
    pub confidence: Option<f64>,
    pub manual: bool,
    pub notes: Option<String>,
    /// Replaces the computed present/late status, e.g. an operator reset
    /// to absent.
    pub status_override: Option<AttendanceStatus>,
}

impl SubmissionRequest {
    pub fn automatic(student_id: &str, distance: f64) -> Self {
        Self {
            student_id: student_id.to_string(),
            confidence: distance.is_finite().then_some(distance),
            manual: false,
            notes: None,
            status_override: None,
        }
    }

    pub fn confirmed(student_id: &str, distance: f64, notes: &str) -> Self {
        Self {
            manual: true,
            notes: Some(notes.to_string()),
            ..Self::automatic(student_id, distance)
        }
    }
}

/// Schedule data needed to decide between present and late.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LateRule {
    pub scheduled_start: Option<DateTime<Utc>>,
    pub late_threshold_minutes: u32,
}

impl LateRule {
    /// Late only when marked strictly after `start + threshold`; without a
    /// scheduled start every mark is present.
    pub fn status_at(&self, marked_at: DateTime<Utc>) -> AttendanceStatus {
        match self.scheduled_start {
            None => AttendanceStatus::Present,
            Some(start) => {
                let cutoff = start + chrono::Duration::minutes(self.late_threshold_minutes as i64);
                if marked_at > cutoff {
                    AttendanceStatus::Late
                } else {
                    AttendanceStatus::Present
                }
            }
        }
    }
}

type SubmissionResult = Result<RosterEntry, SubmissionError>;

/// Handle to the outcome of one queued submission.
pub struct SubmissionTicket {
    rx: Receiver<SubmissionResult>,
}

impl SubmissionTicket {
    fn closed() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let _ = tx.send(Err(SubmissionError::Closed));
        Self { rx }
    }

    /// Non-blocking poll. `None` while the write is still in flight.
    pub fn try_result(&self) -> Option<SubmissionResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SubmissionError::Closed)),
        }
    }

    pub fn wait(&self) -> SubmissionResult {
        self.rx.recv().unwrap_or(Err(SubmissionError::Closed))
    }
}

struct SubmissionJob {
    request: SubmissionRequest,
    reply: Sender<SubmissionResult>,
}

/// Cloneable producer side of the submission queue.
#[derive(Clone)]
pub struct Submitter {
    tx: Sender<SubmissionJob>,
}

impl Submitter {
    pub fn submit(&self, request: SubmissionRequest) -> SubmissionTicket {
        let (reply, rx) = crossbeam_channel::bounded(1);
        match self.tx.send(SubmissionJob { request, reply }) {
            Ok(()) => SubmissionTicket { rx },
            Err(_) => SubmissionTicket::closed(),
        }
    }
}

/// Everything the writer thread needs to turn a request into a write.
pub struct SubmissionContext {
    pub session_id: String,
    pub section_id: String,
    pub late_rule: LateRule,
    pub backend: Arc<dyn AttendanceBackend>,
    pub ledger: Arc<AttendanceLedger>,
    pub bus: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
}

/// Single-writer queue for a session's attendance writes.
///
/// One dedicated thread performs every outbound call in order, so at most
/// one write is in flight and roster/submitted-set updates never race.
/// The queue drains every job already accepted before the thread exits.
pub struct SubmissionPipeline {
    submitter: Option<Submitter>,
    worker: Option<JoinHandle<()>>,
}

impl SubmissionPipeline {
    pub fn start(context: SubmissionContext) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<SubmissionJob>();
        let worker = thread::Builder::new()
            .name("rollcall-submissions".into())
            .spawn(move || {
                for job in rx {
                    let result = process(&context, &job.request);
                    let _ = job.reply.send(result);
                }
                log::debug!("Submission queue drained");
            })?;

        Ok(Self {
            submitter: Some(Submitter { tx }),
            worker: Some(worker),
        })
    }

    /// A new producer handle, or `None` once shut down.
    pub fn submitter(&self) -> Option<Submitter> {
        self.submitter.clone()
    }

    /// Id of the worker thread, `None` after shutdown.
    pub fn worker_thread(&self) -> Option<thread::ThreadId> {
        self.worker.as_ref().map(|w| w.thread().id())
    }

    pub fn submit(&self, request: SubmissionRequest) -> SubmissionTicket {
        match &self.submitter {
            Some(s) => s.submit(request),
            None => SubmissionTicket::closed(),
        }
    }

    /// Closes the queue and waits for in-flight jobs to drain. Every other
    /// `Submitter` must already be dropped or this blocks until it is.
    pub fn shutdown(&mut self) {
        self.submitter.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Submission thread panicked");
            }
        }
    }
}

impl Drop for SubmissionPipeline {
    fn drop(&mut self) {
        self.submitter.take();
    }
}

fn process(ctx: &SubmissionContext, request: &SubmissionRequest) -> SubmissionResult {
    let marked_at = ctx.clock.now();
    let status = request
        .status_override
        .unwrap_or_else(|| ctx.late_rule.status_at(marked_at));
    let method = if request.manual {
        MarkingMethod::Manual
    } else {
        MarkingMethod::Auto
    };

    let payload = AttendancePayload {
        session_id: ctx.session_id.clone(),
        section_id: ctx.section_id.clone(),
        student_id: request.student_id.clone(),
        status,
        marked_at,
        method,
        confidence: request.confidence,
        notes: request.notes.clone(),
    };

    match ctx.backend.submit(&payload) {
        Ok(record) => {
            let fallback = RosterEntry {
                student_id: payload.student_id.clone(),
                display_name: payload.student_id.clone(),
                student_number: None,
                status,
                marked_at: Some(marked_at),
                method: Some(method),
                confidence: payload.confidence,
            };
            let entry = ctx.ledger.apply(&record, &fallback);
            log::info!(
                "Recorded {} ({}) as {}",
                entry.display_name,
                entry.student_id,
                entry.status
            );
            Ok(entry)
        }
        Err(e) => {
            log::warn!("Attendance write for {} failed: {e}", request.student_id);
            let name = ctx.ledger.display_name(&request.student_id);
            let mut event = RecognitionEvent::new(
                EventType::Error,
                ctx.clock.now(),
                format!("Failed to record attendance: {e}"),
            )
            .with_student(&request.student_id, name.as_deref());
            if let Some(d) = request.confidence {
                event = event.with_confidence(d);
            }
            if request.manual {
                event = event.manual();
            }
            ctx.bus.publish(event);
            Err(SubmissionError::Backend(e))
        }
    }
}
