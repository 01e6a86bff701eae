use crate::shared::engine_config::EngineConfig;
use crate::shared::frame::Frame;

/// Rejects frames too dark or too washed out to be worth detecting on.
#[derive(Clone, Copy, Debug)]
pub struct FrameQualityGate {
    min_brightness: f64,
    max_brightness: f64,
}

impl FrameQualityGate {
    pub fn new(min_brightness: f64, max_brightness: f64) -> Self {
        Self {
            min_brightness,
            max_brightness,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.min_brightness, config.max_brightness)
    }

    pub fn accepts(&self, frame: &Frame) -> bool {
        if frame.width() == 0 || frame.height() == 0 {
            return false;
        }
        let luma = frame.mean_luma();
        luma >= self.min_brightness && luma <= self.max_brightness
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, false)]
    #[case(19, false)]
    #[case(21, true)]
    #[case(128, true)]
    #[case(234, true)]
    #[case(250, false)]
    fn test_brightness_band(#[case] value: u8, #[case] accepted: bool) {
        let gate = FrameQualityGate::new(20.0, 235.0);
        assert_eq!(gate.accepts(&Frame::filled(8, 8, 3, value, 0)), accepted);
    }

    #[test]
    fn test_empty_frame_is_rejected() {
        let gate = FrameQualityGate::from_config(&EngineConfig::default());
        assert!(!gate.accepts(&Frame::new(Vec::new(), 0, 0, 3, 0)));
    }
}
