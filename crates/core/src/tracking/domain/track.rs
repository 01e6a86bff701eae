use crate::shared::bounding_box::BoundingBox;

/// Per-frame tracking identity produced by the tracker.
///
/// `seen_frames` counts every frame the track was matched in; `motion` is
/// the accumulated center displacement in pixels across those matches.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: u32,
    pub bbox: BoundingBox,
    pub seen_frames: u32,
    pub motion: f64,
    pub updated: bool,
}
