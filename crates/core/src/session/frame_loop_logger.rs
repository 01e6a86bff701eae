use std::collections::BTreeMap;
use std::time::Instant;

/// Observes frame loop throughput without coupling the loop to an output.
pub trait FrameLoopLogger: Send {
    /// Called once per acquired frame, skipped or not.
    fn frame(&mut self, index: usize);

    /// Duration of one stage (detect, reconcile, evaluate) for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Frames dropped by the quality gate.
    fn skipped(&mut self);

    /// End-of-session report. Default: no-op.
    fn summary(&self) {}
}

/// Discards everything. Used by tests and embedders with their own metrics.
pub struct NullFrameLoopLogger;

impl FrameLoopLogger for NullFrameLoopLogger {
    fn frame(&mut self, _index: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn skipped(&mut self) {}
}

#[derive(Default)]
struct StageStats {
    count: usize,
    total_ms: f64,
    max_ms: f64,
}

/// Aggregates stage timings and writes progress through `log` every
/// `every_frames` frames, plus a summary when the loop ends.
pub struct LogFrameLoopLogger {
    every_frames: usize,
    frames: usize,
    skipped: usize,
    stages: BTreeMap<String, StageStats>,
    started: Instant,
}

impl LogFrameLoopLogger {
    pub fn new(every_frames: usize) -> Self {
        Self {
            every_frames: every_frames.max(1),
            frames: 0,
            skipped: 0,
            stages: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    /// Mean duration of `stage` in milliseconds.
    pub fn average_ms(&self, stage: &str) -> Option<f64> {
        self.stages
            .get(stage)
            .filter(|s| s.count > 0)
            .map(|s| s.total_ms / s.count as f64)
    }

    /// `None` until at least one frame was seen.
    pub fn summary_string(&self) -> Option<String> {
        if self.frames == 0 {
            return None;
        }
        let secs = self.started.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Frame loop summary ({} frames, {} skipped, {secs:.1}s):",
            self.frames, self.skipped
        )];
        for (stage, stats) in &self.stages {
            let avg = stats.total_ms / stats.count.max(1) as f64;
            lines.push(format!(
                "  {stage:10}: avg {avg:6.1}ms  max {:6.1}ms",
                stats.max_ms
            ));
        }
        if secs > 0.0 {
            lines.push(format!("  Throughput: {:.1} fps", self.frames as f64 / secs));
        }
        Some(lines.join("\n"))
    }
}

impl Default for LogFrameLoopLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl FrameLoopLogger for LogFrameLoopLogger {
    fn frame(&mut self, index: usize) {
        self.frames += 1;
        if self.frames % self.every_frames == 0 {
            log::info!("Processed {} frames (last index {index})", self.frames);
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        let stats = self.stages.entry(stage.to_string()).or_default();
        stats.count += 1;
        stats.total_ms += duration_ms;
        stats.max_ms = stats.max_ms.max(duration_ms);
    }

    fn skipped(&mut self) {
        self.skipped += 1;
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_logger_accepts_everything() {
        let mut logger = NullFrameLoopLogger;
        logger.frame(0);
        logger.timing("detect", 3.0);
        logger.skipped();
        logger.summary();
    }

    #[test]
    fn test_stage_averages() {
        let mut logger = LogFrameLoopLogger::new(10);
        logger.timing("detect", 10.0);
        logger.timing("detect", 30.0);
        logger.timing("evaluate", 4.0);

        assert_relative_eq!(logger.average_ms("detect").unwrap(), 20.0);
        assert_relative_eq!(logger.average_ms("evaluate").unwrap(), 4.0);
        assert!(logger.average_ms("recognize").is_none());
    }

    #[test]
    fn test_summary_counts_frames_and_skips() {
        let mut logger = LogFrameLoopLogger::new(2);
        for i in 0..5 {
            logger.frame(i);
        }
        logger.skipped();
        logger.timing("detect", 8.0);

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("5 frames, 1 skipped"));
        assert!(summary.contains("detect"));
        assert_eq!(logger.frames(), 5);
        assert_eq!(logger.skipped_frames(), 1);
    }

    #[test]
    fn test_empty_summary_is_none() {
        assert!(LogFrameLoopLogger::default().summary_string().is_none());
    }
}
