use crate::shared::bounding_box::BoundingBox;
use crate::shared::engine_config::EngineConfig;

/// Geometry filter applied to raw detector output before tracking.
///
/// Drops boxes that are too small to ever be evaluated, whose aspect ratio
/// (width / height) is implausible for a face, or that cover more of the
/// frame than a face at kiosk distance can.
#[derive(Clone, Debug)]
pub struct DetectionFilter {
    min_size: f64,
    min_aspect_ratio: f64,
    max_aspect_ratio: f64,
    max_frame_coverage: f64,
}

impl DetectionFilter {
    pub fn new(
        min_size: f64,
        min_aspect_ratio: f64,
        max_aspect_ratio: f64,
        max_frame_coverage: f64,
    ) -> Self {
        Self {
            min_size,
            min_aspect_ratio,
            max_aspect_ratio,
            max_frame_coverage,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.min_detection_size,
            config.min_aspect_ratio,
            config.max_aspect_ratio,
            config.max_frame_coverage,
        )
    }

    pub fn apply(&self, boxes: &[BoundingBox], frame_w: u32, frame_h: u32) -> Vec<BoundingBox> {
        let frame_area = frame_w as f64 * frame_h as f64;
        boxes
            .iter()
            .filter(|b| self.accepts(b, frame_area))
            .copied()
            .collect()
    }

    fn accepts(&self, bbox: &BoundingBox, frame_area: f64) -> bool {
        if bbox.min_side() < self.min_size || bbox.height() <= 0.0 {
            return false;
        }
        let aspect = bbox.width() / bbox.height();
        if aspect < self.min_aspect_ratio || aspect > self.max_aspect_ratio {
            return false;
        }
        frame_area <= 0.0 || bbox.area() / frame_area <= self.max_frame_coverage
    }
}
