use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::events::event_bus::EventBus;
use crate::events::recognition_event::{EventType, RecognitionEvent};
use crate::recognition::decision_engine::DecisionEngine;
use crate::recognition::domain::face_overlay::FaceOverlay;
use crate::shared::clock::Clock;
use crate::shared::constants::MAX_CONSECUTIVE_SOURCE_ERRORS;
use crate::shared::frame::Frame;
use crate::tracking::domain::face_detector::FaceDetector;
use crate::tracking::track_reconciler::TrackReconciler;

use super::domain::frame_source::FrameSource;
use super::frame_loop_logger::FrameLoopLogger;
use super::quality_gate::FrameQualityGate;

/// Receives the frame index and the live faces after every processed frame.
pub type OverlayCallback = Box<dyn FnMut(usize, &[FaceOverlay]) + Send>;

/// Why the frame loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    SourceExhausted,
    SourceFailed,
}

/// Sequential capture, detect, reconcile, decide loop for one session.
///
/// Runs on its own thread. Never waits on the network: attendance writes go
/// through the submission queue and their outcomes are picked up at the
/// start of the next iteration. The only deliberate stall is an operator
/// confirmation prompt.
pub struct FrameLoop {
    pub(crate) source: Box<dyn FrameSource>,
    pub(crate) detector: Box<dyn FaceDetector>,
    pub(crate) reconciler: TrackReconciler,
    pub(crate) engine: DecisionEngine,
    pub(crate) gate: FrameQualityGate,
    pub(crate) logger: Box<dyn FrameLoopLogger>,
    pub(crate) on_overlay: Option<OverlayCallback>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl FrameLoop {
    /// Runs until cancelled or the source ends, then drains outstanding
    /// submissions. Hands the source back so the owner can close it.
    pub fn run(mut self) -> (Box<dyn FrameSource>, LoopExit) {
        let mut consecutive_errors = 0usize;

        let exit = loop {
            if self.cancelled.load(Ordering::Relaxed) {
                break LoopExit::Cancelled;
            }
            self.engine.poll_submissions();

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    frame
                }
                Ok(None) => break LoopExit::SourceExhausted,
                Err(e) => {
                    consecutive_errors += 1;
                    self.report_error(format!("Frame acquisition failed: {e}"));
                    if consecutive_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                        log::warn!("Giving up after {consecutive_errors} consecutive source errors");
                        break LoopExit::SourceFailed;
                    }
                    continue;
                }
            };

            if self.cancelled.load(Ordering::Relaxed) {
                break LoopExit::Cancelled;
            }
            self.process(&frame);
        };

        log::info!("Frame loop finished: {exit:?}");
        self.engine.finish();
        self.logger.summary();
        (self.source, exit)
    }

    fn process(&mut self, frame: &Frame) {
        self.logger.frame(frame.index());
        if !self.gate.accepts(frame) {
            self.logger.skipped();
            log::debug!("Frame {} rejected by quality gate", frame.index());
            return;
        }

        let t0 = Instant::now();
        let detections = match self.detector.detect(frame) {
            Ok(d) => d,
            Err(e) => {
                self.report_error(format!("Detection failed on frame {}: {e}", frame.index()));
                return;
            }
        };
        let t1 = Instant::now();
        self.logger
            .timing("detect", t1.duration_since(t0).as_secs_f64() * 1000.0);

        let reconciliation = self
            .reconciler
            .reconcile(&detections, frame.width(), frame.height());
        self.engine.sync_tracks(&reconciliation.confirmed);
        let t2 = Instant::now();
        self.logger
            .timing("reconcile", t2.duration_since(t1).as_secs_f64() * 1000.0);

        self.engine.evaluate(frame);
        self.logger
            .timing("evaluate", t2.elapsed().as_secs_f64() * 1000.0);

        if let Some(callback) = self.on_overlay.as_mut() {
            callback(frame.index(), &self.engine.overlays());
        }
    }

    fn report_error(&self, message: String) {
        log::warn!("{message}");
        self.bus
            .publish(RecognitionEvent::new(EventType::Error, self.clock.now(), message));
    }
}
