use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::events::event_bus::EventBus;
use crate::events::recognition_event::{EventType, RecognitionEvent};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::clock::Clock;
use crate::shared::engine_config::EngineConfig;

use super::domain::detection_filter::DetectionFilter;
use super::domain::track::Track;
use super::infrastructure::bytetrack_tracker::ByteTracker;

/// Result of reconciling one frame's detections.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Tracks updated this frame that have passed warm-up, in id order.
    pub confirmed: Vec<Track>,
    /// Ids promoted to decision candidates this frame.
    pub promoted: Vec<u32>,
    /// Previously confirmed ids that were not updated this frame.
    pub dropped: Vec<u32>,
}

/// Turns raw per-frame detections into persistent track identities.
///
/// Holds an arena of the tracks updated in the most recent frame. A track
/// becomes a decision candidate once it has been seen for the warm-up
/// frame count, which publishes `FACE_DETECTED`. A track absent from the
/// frame's updated set is removed immediately.
pub struct TrackReconciler {
    tracker: ByteTracker,
    filter: DetectionFilter,
    warm_up_frames: u32,
    arena: BTreeMap<u32, Track>,
    confirmed: HashSet<u32>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl TrackReconciler {
    pub fn new(
        tracker: ByteTracker,
        filter: DetectionFilter,
        warm_up_frames: u32,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            filter,
            warm_up_frames,
            arena: BTreeMap::new(),
            confirmed: HashSet::new(),
            bus,
            clock,
        }
    }

    pub fn from_config(config: &EngineConfig, bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            ByteTracker::new(config.tracker_max_lost),
            DetectionFilter::from_config(config),
            config.warm_up_frames(),
            bus,
            clock,
        )
    }

    pub fn reconcile(
        &mut self,
        detections: &[BoundingBox],
        frame_w: u32,
        frame_h: u32,
    ) -> Reconciliation {
        let filtered = self.filter.apply(detections, frame_w, frame_h);
        let updated = self.tracker.update(&filtered);

        self.arena = updated
            .into_iter()
            .filter(|t| t.updated)
            .map(|t| (t.id, t))
            .collect();

        let mut result = Reconciliation::default();

        let mut dropped: Vec<u32> = self
            .confirmed
            .iter()
            .copied()
            .filter(|id| !self.arena.contains_key(id))
            .collect();
        dropped.sort_unstable();
        for id in &dropped {
            self.confirmed.remove(id);
            log::debug!("Track {id} lost");
        }
        result.dropped = dropped;

        for track in self.arena.values() {
            if track.seen_frames < self.warm_up_frames {
                continue;
            }
            if self.confirmed.insert(track.id) {
                result.promoted.push(track.id);
                self.bus.publish(
                    RecognitionEvent::new(
                        EventType::FaceDetected,
                        self.clock.now(),
                        format!("Face detected (track {})", track.id),
                    )
                    .with_track(track.id),
                );
            }
            result.confirmed.push(track.clone());
        }

        result
    }

    /// Tracks updated in the most recent frame, warm or not.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.arena.values()
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }
}
