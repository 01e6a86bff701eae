use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_CROP_SIZE, EVENT_HISTORY_CAPACITY,
    MIN_TIMER_INTERVAL_SECS, WARM_UP_MAX_FRAMES, WARM_UP_MIN_FRAMES,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Thresholds and timing constants for one capture session.
///
/// Distances follow recognizer convention: lower means more confident.
/// Every field falls back to its default when missing from the JSON file;
/// [`EngineConfig::sanitized`] also replaces values that are present but
/// unusable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shorter box side, in pixels, below which a face is not evaluated.
    pub min_face_size: f64,
    /// Boxes with a shorter side below this are dropped before tracking.
    pub min_detection_size: f64,
    pub min_frames: u32,
    /// Accumulated center displacement, in pixels, required before a face
    /// is evaluated. Rejects static photos held up to the camera.
    pub min_motion: f64,
    pub attempt_interval_ms: u64,
    pub auto_accept_max_distance: f64,
    pub manual_review_max_distance: f64,
    pub max_manual_prompts: u32,
    pub crop_size: u32,
    pub heartbeat_interval_secs: u64,
    pub auto_stop_poll_secs: u64,
    pub event_history: usize,
    pub tracker_max_lost: usize,
    pub min_brightness: f64,
    pub max_brightness: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub max_frame_coverage: f64,
    /// Unset means the operator prompt waits indefinitely.
    pub confirmation_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_face_size: 60.0,
            min_detection_size: 24.0,
            min_frames: 3,
            min_motion: 2.0,
            attempt_interval_ms: 1000,
            auto_accept_max_distance: 0.45,
            manual_review_max_distance: 0.6,
            max_manual_prompts: 3,
            crop_size: DEFAULT_CROP_SIZE,
            heartbeat_interval_secs: MIN_TIMER_INTERVAL_SECS,
            auto_stop_poll_secs: MIN_TIMER_INTERVAL_SECS,
            event_history: EVENT_HISTORY_CAPACITY,
            tracker_max_lost: 0,
            min_brightness: 20.0,
            max_brightness: 235.0,
            min_aspect_ratio: 0.5,
            max_aspect_ratio: 2.0,
            max_frame_coverage: 0.6,
            confirmation_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file. Missing fields take their defaults; the
    /// result is sanitized.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config.sanitized())
    }

    /// Loads `<config_dir>/Rollcall/engine.json`, or defaults when the file
    /// is absent or unreadable.
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{e}; using default engine config");
                Self::default()
            }
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Replaces each unusable value with its default, logging every
    /// replacement.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        fix_f64(&mut self.min_face_size, defaults.min_face_size, "min_face_size", |v| v >= 0.0);
        fix_f64(
            &mut self.min_detection_size,
            defaults.min_detection_size,
            "min_detection_size",
            |v| v >= 0.0,
        );
        fix_f64(&mut self.min_motion, defaults.min_motion, "min_motion", |v| v >= 0.0);
        fix_f64(
            &mut self.auto_accept_max_distance,
            defaults.auto_accept_max_distance,
            "auto_accept_max_distance",
            |v| v >= 0.0,
        );
        fix_f64(
            &mut self.manual_review_max_distance,
            defaults.manual_review_max_distance,
            "manual_review_max_distance",
            |v| v >= 0.0,
        );
        if self.auto_accept_max_distance > self.manual_review_max_distance {
            log::warn!(
                "auto_accept_max_distance {} exceeds manual_review_max_distance {}; using defaults",
                self.auto_accept_max_distance,
                self.manual_review_max_distance
            );
            self.auto_accept_max_distance = defaults.auto_accept_max_distance;
            self.manual_review_max_distance = defaults.manual_review_max_distance;
        }
        fix_f64(&mut self.min_brightness, defaults.min_brightness, "min_brightness", |v| {
            (0.0..=255.0).contains(&v)
        });
        fix_f64(&mut self.max_brightness, defaults.max_brightness, "max_brightness", |v| {
            (0.0..=255.0).contains(&v)
        });
        if self.min_brightness > self.max_brightness {
            log::warn!("min_brightness exceeds max_brightness; using defaults");
            self.min_brightness = defaults.min_brightness;
            self.max_brightness = defaults.max_brightness;
        }
        fix_f64(&mut self.min_aspect_ratio, defaults.min_aspect_ratio, "min_aspect_ratio", |v| {
            v > 0.0
        });
        fix_f64(&mut self.max_aspect_ratio, defaults.max_aspect_ratio, "max_aspect_ratio", |v| {
            v > 0.0
        });
        if self.min_aspect_ratio > self.max_aspect_ratio {
            log::warn!("min_aspect_ratio exceeds max_aspect_ratio; using defaults");
            self.min_aspect_ratio = defaults.min_aspect_ratio;
            self.max_aspect_ratio = defaults.max_aspect_ratio;
        }
        fix_f64(
            &mut self.max_frame_coverage,
            defaults.max_frame_coverage,
            "max_frame_coverage",
            |v| v > 0.0 && v <= 1.0,
        );

        if self.min_frames == 0 {
            log::warn!("min_frames must be at least 1; using {}", defaults.min_frames);
            self.min_frames = defaults.min_frames;
        }
        if self.attempt_interval_ms == 0 {
            log::warn!(
                "attempt_interval_ms must be positive; using {}",
                defaults.attempt_interval_ms
            );
            self.attempt_interval_ms = defaults.attempt_interval_ms;
        }
        if self.max_manual_prompts == 0 {
            log::warn!(
                "max_manual_prompts must be positive; using {}",
                defaults.max_manual_prompts
            );
            self.max_manual_prompts = defaults.max_manual_prompts;
        }
        if self.crop_size == 0 {
            self.crop_size = defaults.crop_size;
        }
        if self.event_history == 0 {
            self.event_history = defaults.event_history;
        }
        if self.heartbeat_interval_secs < MIN_TIMER_INTERVAL_SECS {
            log::warn!("heartbeat_interval_secs below {MIN_TIMER_INTERVAL_SECS}; clamping");
            self.heartbeat_interval_secs = MIN_TIMER_INTERVAL_SECS;
        }
        if self.auto_stop_poll_secs < MIN_TIMER_INTERVAL_SECS {
            log::warn!("auto_stop_poll_secs below {MIN_TIMER_INTERVAL_SECS}; clamping");
            self.auto_stop_poll_secs = MIN_TIMER_INTERVAL_SECS;
        }
        if self.confirmation_timeout_secs == Some(0) {
            self.confirmation_timeout_secs = None;
        }
        self
    }

    /// Frames a track must be seen before it becomes a decision candidate:
    /// `min(min_frames, 5)`, never below 2.
    pub fn warm_up_frames(&self) -> u32 {
        self.min_frames
            .min(WARM_UP_MAX_FRAMES)
            .max(WARM_UP_MIN_FRAMES)
    }

    pub fn attempt_interval(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.attempt_interval_ms as i64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(MIN_TIMER_INTERVAL_SECS))
    }

    pub fn auto_stop_poll_interval(&self) -> Duration {
        Duration::from_secs(self.auto_stop_poll_secs.max(MIN_TIMER_INTERVAL_SECS))
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }
}

fn fix_f64(value: &mut f64, default: f64, name: &str, valid: impl Fn(f64) -> bool) {
    if !value.is_finite() || !valid(*value) {
        log::warn!("invalid {name} {value}; using {default}");
        *value = default;
    }
}
