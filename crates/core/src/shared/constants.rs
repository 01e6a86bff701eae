/// Events retained by the bus for late subscribers and snapshots.
pub const EVENT_HISTORY_CAPACITY: usize = 256;

/// Hard cap on the warm-up gate, whatever `min_frames` is configured to.
pub const WARM_UP_MAX_FRAMES: u32 = 5;

/// Floor of the warm-up gate.
pub const WARM_UP_MIN_FRAMES: u32 = 2;

/// Heartbeat and auto-stop timers never tick faster than this.
pub const MIN_TIMER_INTERVAL_SECS: u64 = 5;

/// Identity the recognizer reports for faces it cannot match.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Default crop edge fed to the recognizer (ArcFace-style input).
pub const DEFAULT_CROP_SIZE: u32 = 112;

pub const CONFIG_DIR_NAME: &str = "Rollcall";
pub const CONFIG_FILE_NAME: &str = "engine.json";

/// Consecutive frame acquisition failures after which the frame loop gives
/// up on its source.
pub const MAX_CONSECUTIVE_SOURCE_ERRORS: usize = 30;
