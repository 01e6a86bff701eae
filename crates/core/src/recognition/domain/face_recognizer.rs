use crate::shared::frame::Frame;

/// Best match for a face crop. Lower `distance` means a closer match.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    pub identity: String,
    pub distance: f64,
}

impl Recognition {
    pub fn new(identity: impl Into<String>, distance: f64) -> Self {
        Self {
            identity: identity.into(),
            distance,
        }
    }
}

/// Capability interface for face recognition.
pub trait FaceRecognizer: Send {
    /// Loads models or enrolled embeddings. An error here is fatal to
    /// session start.
    fn warm_up(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }

    /// Returns `Ok(None)` when the recognizer produced no candidate at all.
    fn recognize(&mut self, crop: &Frame) -> Result<Option<Recognition>, Box<dyn std::error::Error>>;
}
