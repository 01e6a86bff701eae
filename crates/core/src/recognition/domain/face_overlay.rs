use serde::Serialize;

use crate::shared::bounding_box::BoundingBox;

use super::tracked_face::{FaceState, TrackedFace};

/// Presentation-free snapshot of one live face, published after every
/// processed frame. Renderers pick colors and labels from `state`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceOverlay {
    pub track_id: u32,
    pub bbox: BoundingBox,
    pub state: FaceState,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub distance: Option<f64>,
}

impl From<&TrackedFace> for FaceOverlay {
    fn from(face: &TrackedFace) -> Self {
        Self {
            track_id: face.track_id,
            bbox: face.bbox,
            state: face.state(),
            student_id: face.candidate_id.clone(),
            student_name: face.candidate_name.clone(),
            distance: face.last_distance.is_finite().then_some(face.last_distance),
        }
    }
}
