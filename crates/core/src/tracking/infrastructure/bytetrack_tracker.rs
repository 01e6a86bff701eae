/// ByteTrack-style IoU tracker.
///
/// Two-stage association: high-confidence detections are matched first,
/// then low-confidence detections fill remaining unmatched tracks. Only
/// high-confidence detections may start a new track. Each track carries a
/// cumulative seen-frame count and the center motion it accumulated, which
/// the reconciler and decision engine use for warm-up and liveness gating.
use std::collections::HashSet;

use crate::shared::bounding_box::BoundingBox;
use crate::tracking::domain::track::Track;

const HIGH_THRESH: f64 = 0.5;
const MATCH_THRESH: f64 = 0.3;

#[derive(Clone, Debug)]
struct TrackState {
    id: u32,
    bbox: BoundingBox,
    seen_frames: u32,
    motion: f64,
    frames_lost: usize,
    matched: bool,
}

pub struct ByteTracker {
    tracks: Vec<TrackState>,
    next_id: u32,
    max_lost: usize,
}

impl ByteTracker {
    /// `max_lost` is how many consecutive unmatched frames a track survives
    /// internally. Zero drops a track the first frame it is not matched.
    pub fn new(max_lost: usize) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            max_lost,
        }
    }

    /// Associates this frame's detections and returns the tracks updated
    /// in this frame.
    pub fn update(&mut self, detections: &[BoundingBox]) -> Vec<Track> {
        let (high, low) = split_by_confidence(detections);

        self.reset_match_flags();
        let num_existing = self.tracks.len();
        let matched_high = self.match_high_confidence(&high);
        self.match_low_confidence(&low);
        self.create_new_tracks(&high, &matched_high);
        self.age_unmatched_tracks(num_existing);

        self.updated_tracks()
    }

    fn reset_match_flags(&mut self) {
        for track in &mut self.tracks {
            track.matched = false;
        }
    }

    fn match_high_confidence(&mut self, high: &[(usize, &BoundingBox)]) -> HashSet<usize> {
        let track_refs: Vec<(usize, BoundingBox)> = self
            .tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.bbox))
            .collect();

        let mut matched_det_indices = HashSet::new();
        for (ti, di, bbox) in greedy_match(&track_refs, high, MATCH_THRESH) {
            self.apply_match(ti, &bbox);
            matched_det_indices.insert(di);
        }
        matched_det_indices
    }

    fn match_low_confidence(&mut self, low: &[(usize, &BoundingBox)]) {
        let unmatched_refs: Vec<(usize, BoundingBox)> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.matched)
            .map(|(i, t)| (i, t.bbox))
            .collect();

        for (ti, _, bbox) in greedy_match(&unmatched_refs, low, MATCH_THRESH) {
            self.apply_match(ti, &bbox);
        }
    }

    fn apply_match(&mut self, track_idx: usize, bbox: &BoundingBox) {
        let track = &mut self.tracks[track_idx];
        track.motion += track.bbox.center_distance(bbox);
        track.bbox = *bbox;
        track.seen_frames += 1;
        track.frames_lost = 0;
        track.matched = true;
    }

    fn create_new_tracks(&mut self, high: &[(usize, &BoundingBox)], matched: &HashSet<usize>) {
        for (di, bbox) in high {
            if !matched.contains(di) {
                self.tracks.push(TrackState {
                    id: self.next_id,
                    bbox: **bbox,
                    seen_frames: 1,
                    motion: 0.0,
                    frames_lost: 0,
                    matched: true,
                });
                self.next_id += 1;
            }
        }
    }

    fn age_unmatched_tracks(&mut self, num_existing: usize) {
        for track in self.tracks.iter_mut().take(num_existing) {
            if !track.matched {
                track.frames_lost += 1;
            }
        }
        let max_lost = self.max_lost;
        self.tracks.retain(|t| t.frames_lost <= max_lost);
    }

    /// Lost tracks stay internal for re-identification; only tracks matched
    /// this frame are reported.
    fn updated_tracks(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .filter(|t| t.matched)
            .map(|t| Track {
                id: t.id,
                bbox: t.bbox,
                seen_frames: t.seen_frames,
                motion: t.motion,
                updated: true,
            })
            .collect()
    }
}

type IndexedBoxes<'a> = Vec<(usize, &'a BoundingBox)>;

fn split_by_confidence(detections: &[BoundingBox]) -> (IndexedBoxes<'_>, IndexedBoxes<'_>) {
    let mut high = Vec::new();
    let mut low = Vec::new();
    for (i, det) in detections.iter().enumerate() {
        if det.score >= HIGH_THRESH {
            high.push((i, det));
        } else {
            low.push((i, det));
        }
    }
    (high, low)
}

/// Greedy IoU matching: pairs sorted by descending IoU, each track and
/// detection used at most once. Returns `(track_idx, det_idx, det_bbox)`.
fn greedy_match(
    tracks: &[(usize, BoundingBox)],
    dets: &[(usize, &BoundingBox)],
    thresh: f64,
) -> Vec<(usize, usize, BoundingBox)> {
    let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
    for (ti, bbox) in tracks {
        for (di, det) in dets {
            let score = bbox.iou(det);
            if score >= thresh {
                pairs.push((*ti, *di, score));
            }
        }
    }
    pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut used_tracks = HashSet::new();
    let mut used_dets = HashSet::new();
    let mut matches = Vec::new();

    for (ti, di, _) in &pairs {
        if !used_tracks.contains(ti) && !used_dets.contains(di) {
            used_tracks.insert(*ti);
            used_dets.insert(*di);
            if let Some((_, det)) = dets.iter().find(|(i, _)| i == di) {
                matches.push((*ti, *di, **det));
            }
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn det(x1: f64, y1: f64, x2: f64, y2: f64, score: f64) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2, score)
    }

    #[test]
    fn test_new_detections_get_unique_ids() {
        let mut tracker = ByteTracker::new(0);
        let tracks = tracker.update(&[
            det(0.0, 0.0, 50.0, 50.0, 0.9),
            det(100.0, 100.0, 150.0, 150.0, 0.8),
        ]);
        assert_eq!(tracks.len(), 2);
        assert_ne!(tracks[0].id, tracks[1].id);
        assert!(tracks.iter().all(|t| t.updated && t.seen_frames == 1));
    }

    #[test]
    fn test_consistent_id_and_seen_count_across_frames() {
        let mut tracker = ByteTracker::new(0);
        let id = tracker.update(&[det(10.0, 10.0, 60.0, 60.0, 0.9)])[0].id;

        tracker.update(&[det(12.0, 12.0, 62.0, 62.0, 0.9)]);
        let t3 = tracker.update(&[det(14.0, 14.0, 64.0, 64.0, 0.9)]);

        assert_eq!(t3.len(), 1);
        assert_eq!(t3[0].id, id);
        assert_eq!(t3[0].seen_frames, 3);
    }

    #[test]
    fn test_motion_accumulates_center_displacement() {
        let mut tracker = ByteTracker::new(0);
        tracker.update(&[det(0.0, 0.0, 50.0, 50.0, 0.9)]);
        tracker.update(&[det(3.0, 4.0, 53.0, 54.0, 0.9)]);
        let t = tracker.update(&[det(6.0, 8.0, 56.0, 58.0, 0.9)]);

        assert_relative_eq!(t[0].motion, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_max_lost_drops_track_immediately() {
        let mut tracker = ByteTracker::new(0);
        let id = tracker.update(&[det(10.0, 10.0, 60.0, 60.0, 0.9)])[0].id;

        assert!(tracker.update(&[]).is_empty());

        let t = tracker.update(&[det(10.0, 10.0, 60.0, 60.0, 0.9)]);
        assert_ne!(t[0].id, id);
        assert_eq!(t[0].seen_frames, 1);
    }

    #[test]
    fn test_track_survives_within_max_lost() {
        let mut tracker = ByteTracker::new(3);
        let id = tracker.update(&[det(10.0, 10.0, 60.0, 60.0, 0.9)])[0].id;

        assert!(tracker.update(&[]).is_empty());
        assert!(tracker.update(&[]).is_empty());

        let t = tracker.update(&[det(12.0, 12.0, 62.0, 62.0, 0.9)]);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].id, id);
        assert_eq!(t[0].seen_frames, 2);
    }

    #[test]
    fn test_low_confidence_matches_existing_track() {
        let mut tracker = ByteTracker::new(0);
        let id = tracker.update(&[det(10.0, 10.0, 60.0, 60.0, 0.9)])[0].id;

        let t = tracker.update(&[det(12.0, 12.0, 62.0, 62.0, 0.3)]);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].id, id);
    }

    #[test]
    fn test_low_confidence_does_not_start_new_track() {
        let mut tracker = ByteTracker::new(0);
        assert!(tracker
            .update(&[det(10.0, 10.0, 60.0, 60.0, 0.3)])
            .is_empty());
    }

    #[test]
    fn test_multiple_tracks_independent() {
        let mut tracker = ByteTracker::new(0);
        let t1 = tracker.update(&[
            det(0.0, 0.0, 50.0, 50.0, 0.9),
            det(200.0, 200.0, 250.0, 250.0, 0.9),
        ]);
        let (id_a, id_b) = (t1[0].id, t1[1].id);

        let t2 = tracker.update(&[
            det(202.0, 202.0, 252.0, 252.0, 0.9),
            det(2.0, 2.0, 52.0, 52.0, 0.9),
        ]);

        let ids: Vec<u32> = t2.iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&id_a));
        assert!(ids.contains(&id_b));
    }
}
