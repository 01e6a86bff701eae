use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use thiserror::Error;

use crate::attendance::domain::attendance_backend::AttendanceBackend;
use crate::attendance::domain::attendance_ledger::AttendanceLedger;
use crate::attendance::domain::attendance_record::AttendanceStatus;
use crate::attendance::domain::roster::RosterEntry;
use crate::attendance::submission_pipeline::{
    SubmissionContext, SubmissionPipeline, SubmissionRequest, SubmissionTicket,
};
use crate::events::event_bus::EventBus;
use crate::events::recognition_event::{EventType, RecognitionEvent};
use crate::recognition::decision_engine::{DecisionContext, DecisionEngine};
use crate::recognition::domain::confirmation_ui::ConfirmationUi;
use crate::recognition::domain::face_recognizer::FaceRecognizer;
use crate::shared::clock::Clock;
use crate::shared::engine_config::EngineConfig;
use crate::tracking::domain::face_detector::FaceDetector;
use crate::tracking::track_reconciler::TrackReconciler;

use super::domain::frame_source::FrameSource;
use super::domain::session_state::{SessionState, StopReason};
use super::frame_loop::{FrameLoop, LoopExit, OverlayCallback};
use super::frame_loop_logger::FrameLoopLogger;
use super::quality_gate::FrameQualityGate;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{capability} unavailable: {reason}")]
    CapabilityUnavailable {
        capability: &'static str,
        reason: String,
    },
    #[error("session {0} is already stopped")]
    AlreadyStopped(String),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// External collaborators a session runs against.
pub struct SessionDeps {
    pub frame_source: Box<dyn FrameSource>,
    pub detector: Box<dyn FaceDetector>,
    pub recognizer: Box<dyn FaceRecognizer>,
    pub backend: Arc<dyn AttendanceBackend>,
    pub confirmation: Box<dyn ConfirmationUi>,
    pub clock: Arc<dyn Clock>,
    pub on_overlay: Option<OverlayCallback>,
    pub logger: Box<dyn FrameLoopLogger>,
}

type FrameLoopHandle = JoinHandle<(Box<dyn FrameSource>, LoopExit)>;

struct SessionInner {
    state: Mutex<SessionState>,
    bus: Arc<EventBus>,
    ledger: Arc<AttendanceLedger>,
    backend: Arc<dyn AttendanceBackend>,
    clock: Arc<dyn Clock>,
    pipeline: Mutex<SubmissionPipeline>,
    cancelled: Arc<AtomicBool>,
    active: AtomicBool,
    auto_stop_fired: AtomicBool,
    timer_shutdown: Mutex<Option<Sender<()>>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    frame_loop: Mutex<Option<FrameLoopHandle>>,
    frame_loop_thread: Mutex<Option<ThreadId>>,
    submission_thread: Option<ThreadId>,
    loop_exit_rx: Receiver<LoopExit>,
    loop_exit: Mutex<Option<LoopExit>>,
}

/// Starts attendance sessions.
pub struct SessionController;

impl SessionController {
    /// Prepares every capability, loads the roster and starts the frame
    /// loop, submission queue, heartbeat and (with a scheduled end) the
    /// auto-stop timer.
    ///
    /// Fails before any thread starts when a capability cannot be
    /// prepared. A roster fetch failure is reported and the session starts
    /// with an empty roster.
    pub fn start(
        mut state: SessionState,
        config: EngineConfig,
        mut deps: SessionDeps,
        excluded: HashSet<String>,
    ) -> Result<SessionHandle, SessionError> {
        let config = config.sanitized();

        deps.detector
            .warm_up()
            .map_err(|e| unavailable("detector", e))?;
        deps.recognizer
            .warm_up()
            .map_err(|e| unavailable("recognizer", e))?;
        deps.frame_source
            .open()
            .map_err(|e| unavailable("frame source", e))?;

        let bus = Arc::new(EventBus::new(config.event_history));
        let ledger = Arc::new(AttendanceLedger::new());
        let clock = deps.clock.clone();

        match deps.backend.fetch_roster() {
            Ok(records) => {
                ledger.load(&records);
                log::info!(
                    "Loaded {} roster entries, {} already recorded",
                    records.len(),
                    ledger.submitted_count()
                );
            }
            Err(e) => {
                log::warn!("Roster fetch failed: {e}");
                bus.publish(RecognitionEvent::new(
                    EventType::Error,
                    clock.now(),
                    format!("Could not load roster: {e}"),
                ));
            }
        }

        let pipeline = SubmissionPipeline::start(SubmissionContext {
            session_id: state.session_id.clone(),
            section_id: state.section_id.clone(),
            late_rule: state.late_rule(),
            backend: deps.backend.clone(),
            ledger: ledger.clone(),
            bus: bus.clone(),
            clock: clock.clone(),
        })
        .map_err(|source| SessionError::Spawn {
            name: "submission",
            source,
        })?;
        let submission_thread = pipeline.worker_thread();
        let Some(submitter) = pipeline.submitter() else {
            return Err(SessionError::AlreadyStopped(state.session_id));
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let engine = DecisionEngine::new(
            config.clone(),
            deps.recognizer,
            deps.confirmation,
            cancelled.clone(),
            excluded,
            DecisionContext {
                ledger: ledger.clone(),
                submitter,
                bus: bus.clone(),
                clock: clock.clone(),
            },
        );
        let frame_loop = FrameLoop {
            source: deps.frame_source,
            detector: deps.detector,
            reconciler: TrackReconciler::from_config(&config, bus.clone(), clock.clone()),
            engine,
            gate: FrameQualityGate::from_config(&config),
            logger: deps.logger,
            on_overlay: deps.on_overlay,
            bus: bus.clone(),
            clock: clock.clone(),
            cancelled: cancelled.clone(),
        };

        state.active = true;
        state.last_heartbeat = None;
        let scheduled_end = state.scheduled_end;
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let (loop_exit_tx, loop_exit_rx) = crossbeam_channel::bounded(1);

        let handle = SessionHandle {
            inner: Arc::new(SessionInner {
                state: Mutex::new(state),
                bus,
                ledger,
                backend: deps.backend,
                clock,
                pipeline: Mutex::new(pipeline),
                cancelled,
                active: AtomicBool::new(true),
                auto_stop_fired: AtomicBool::new(false),
                timer_shutdown: Mutex::new(Some(shutdown_tx)),
                timers: Mutex::new(Vec::new()),
                frame_loop: Mutex::new(None),
                frame_loop_thread: Mutex::new(None),
                submission_thread,
                loop_exit_rx,
                loop_exit: Mutex::new(None),
            }),
        };

        let session_id = handle.session_id();
        log::info!("Session {session_id} started");
        handle.inner.bus.publish(
            RecognitionEvent::new(
                EventType::SessionStarted,
                handle.inner.clock.now(),
                format!("Session {session_id} started"),
            )
            .succeeded(),
        );

        let frame_thread = thread::Builder::new()
            .name("rollcall-frames".into())
            .spawn(move || {
                let result = frame_loop.run();
                let _ = loop_exit_tx.send(result.1);
                result
            });
        let frame_thread = match frame_thread {
            Ok(h) => h,
            Err(source) => {
                handle.stop();
                return Err(SessionError::Spawn {
                    name: "frame loop",
                    source,
                });
            }
        };
        *lock(&handle.inner.frame_loop_thread) = Some(frame_thread.thread().id());
        *lock(&handle.inner.frame_loop) = Some(frame_thread);

        let weak = Arc::downgrade(&handle.inner);
        let mut timers = Vec::new();
        let heartbeat = spawn_heartbeat(
            weak.clone(),
            shutdown_rx.clone(),
            config.heartbeat_interval(),
        );
        let auto_stop = scheduled_end
            .map(|end| spawn_auto_stop(weak, shutdown_rx, end, config.auto_stop_poll_interval()));
        for spawned in std::iter::once(heartbeat).chain(auto_stop) {
            match spawned {
                Ok(h) => timers.push(h),
                Err(source) => {
                    lock(&handle.inner.timers).extend(timers);
                    handle.stop();
                    return Err(SessionError::Spawn {
                        name: "timer",
                        source,
                    });
                }
            }
        }
        lock(&handle.inner.timers).extend(timers);

        Ok(handle)
    }
}

/// Owner-side handle of a running session. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub fn bus(&self) -> Arc<EventBus> {
        self.inner.bus.clone()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.state).clone()
    }

    pub fn session_id(&self) -> String {
        lock(&self.inner.state).session_id.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Roster in first-seen order.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.inner.ledger.roster()
    }

    pub fn is_submitted(&self, student_id: &str) -> bool {
        self.inner.ledger.is_submitted(student_id)
    }

    /// Operator override: writes `status` for `student_id` through the
    /// submission queue, e.g. to reset a mistaken mark to absent.
    pub fn mark_student(
        &self,
        student_id: &str,
        status: AttendanceStatus,
        notes: Option<String>,
    ) -> Result<SubmissionTicket, SessionError> {
        if !self.is_active() {
            return Err(SessionError::AlreadyStopped(self.session_id()));
        }
        log::info!("Operator marks {student_id} as {status}");
        Ok(lock(&self.inner.pipeline).submit(SubmissionRequest {
            student_id: student_id.to_string(),
            confidence: None,
            manual: true,
            notes,
            status_override: Some(status),
        }))
    }

    /// Blocks until the frame loop has returned.
    pub fn wait_for_pipeline(&self) -> LoopExit {
        let mut cached = lock(&self.inner.loop_exit);
        if let Some(exit) = *cached {
            return exit;
        }
        let exit = self
            .inner
            .loop_exit_rx
            .recv()
            .unwrap_or(LoopExit::Cancelled);
        *cached = Some(exit);
        exit
    }

    pub fn pipeline_finished(&self) -> bool {
        lock(&self.inner.frame_loop)
            .as_ref()
            .map_or(true, |h| h.is_finished())
    }

    /// Manual stop. Returns `false` if the session was already stopped.
    pub fn stop(&self) -> bool {
        self.stop_with(StopReason::Manual)
    }

    /// Scheduled-end trigger. Fires at most once per session however many
    /// timer ticks race for it.
    pub fn handle_auto_stop(&self) -> bool {
        if self
            .inner
            .auto_stop_fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        log::info!("Scheduled end reached for session {}", self.session_id());
        self.stop_with(StopReason::Scheduled)
    }

    /// Stops the session. Idempotent: only the first call does anything.
    ///
    /// Order: mark inactive, cancel timers, stop the frame loop, close the
    /// frame source, notify the backend, drain the submission queue, then
    /// publish `SESSION_STOPPED` and drop all subscribers.
    pub fn stop_with(&self, reason: StopReason) -> bool {
        if self
            .inner
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        lock(&self.inner.state).active = false;
        self.inner.cancelled.store(true, Ordering::SeqCst);

        // The frame loop and submission threads cannot join themselves;
        // finish the teardown elsewhere.
        if self.on_worker_thread() {
            let handle = self.clone();
            let spawned = thread::Builder::new()
                .name("rollcall-stop".into())
                .spawn(move || handle.teardown(reason));
            if let Err(e) = spawned {
                log::warn!("Could not spawn teardown thread: {e}");
            }
            return true;
        }
        self.teardown(reason);
        true
    }

    fn on_worker_thread(&self) -> bool {
        let current = thread::current().id();
        *lock(&self.inner.frame_loop_thread) == Some(current)
            || self.inner.submission_thread == Some(current)
    }

    fn teardown(&self, reason: StopReason) {
        let inner = &self.inner;
        let session_id = self.session_id();

        lock(&inner.timer_shutdown).take();
        let current = thread::current().id();
        let timers: Vec<_> = lock(&inner.timers).drain(..).collect();
        for timer in timers {
            if timer.thread().id() == current {
                continue;
            }
            if timer.join().is_err() {
                log::warn!("Timer thread panicked");
            }
        }

        let frame_loop = lock(&inner.frame_loop).take();
        let source = match frame_loop.map(|h| h.join()) {
            Some(Ok((source, _exit))) => Some(source),
            Some(Err(_)) => {
                log::warn!("Frame loop thread panicked");
                None
            }
            None => None,
        };

        if let Some(mut source) = source {
            source.close();
        }

        if let Err(e) = inner.backend.notify_stop(reason) {
            log::warn!("Stop notification for session {session_id} failed: {e}");
            inner.bus.publish(RecognitionEvent::new(
                EventType::Error,
                inner.clock.now(),
                format!("Could not notify backend of stop: {e}"),
            ));
        }

        lock(&inner.pipeline).shutdown();

        log::info!("Session {session_id} stopped ({reason})");
        inner.bus.publish(
            RecognitionEvent::new(
                EventType::SessionStopped,
                inner.clock.now(),
                format!("Session {session_id} stopped ({reason})"),
            )
            .succeeded(),
        );
        inner.bus.unsubscribe_all();
    }

    /// One keep-alive round: stamps `last_heartbeat` and pings the backend.
    /// No-op once the session is stopped. The heartbeat thread calls this on
    /// every interval.
    pub fn heartbeat_tick(&self) {
        if !self.is_active() {
            return;
        }
        let now = self.inner.clock.now();
        lock(&self.inner.state).last_heartbeat = Some(now);
        if let Err(e) = self.inner.backend.heartbeat() {
            log::warn!("Heartbeat failed: {e}");
        }
    }
}

fn unavailable(capability: &'static str, e: Box<dyn std::error::Error>) -> SessionError {
    SessionError::CapabilityUnavailable {
        capability,
        reason: e.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn spawn_heartbeat(
    session: Weak<SessionInner>,
    shutdown: Receiver<()>,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("rollcall-heartbeat".into())
        .spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            loop {
                select! {
                    recv(shutdown) -> _ => break,
                    recv(ticker) -> _ => {
                        let Some(inner) = session.upgrade() else { break };
                        SessionHandle { inner }.heartbeat_tick();
                    }
                }
            }
        })
}

/// Polls until the scheduled end, never sleeping past it.
fn spawn_auto_stop(
    session: Weak<SessionInner>,
    shutdown: Receiver<()>,
    end: chrono::DateTime<chrono::Utc>,
    poll: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("rollcall-auto-stop".into())
        .spawn(move || loop {
            let wait = {
                let Some(inner) = session.upgrade() else { break };
                let handle = SessionHandle { inner };
                let now = handle.inner.clock.now();
                if now >= end {
                    handle.handle_auto_stop();
                    break;
                }
                (end - now).to_std().unwrap_or_default().min(poll)
            };
            select! {
                recv(shutdown) -> _ => break,
                recv(crossbeam_channel::after(wait)) -> _ => {}
            }
        })
}
