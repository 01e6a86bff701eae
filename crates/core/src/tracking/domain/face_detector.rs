use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Capability interface for face detection.
///
/// Implementations may keep state across frames, hence `&mut self`.
pub trait FaceDetector: Send {
    /// Loads models or otherwise prepares the detector. An error here is
    /// fatal to session start.
    fn warm_up(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, Box<dyn std::error::Error>>;
}
