//! Cross-frame face tracking by bounding-box overlap.
//!
//! Detection order within a frame is arbitrary, so a face's index is not a
//! usable smoothing slot. The tracker matches each new box to the track it
//! overlaps most and hands out ids that stay stable while the face stays in
//! view.

use crate::types::BoundingBox;
use std::fmt;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MAX_MISSED: u32 = 5;

/// Stable identifier of a tracked face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "face_{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Track {
    id: TrackId,
    bbox: BoundingBox,
    missed: u32,
}

/// Outcome of feeding one frame's detections to the tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackUpdate {
    /// Track id per input box, in input order.
    pub assigned: Vec<TrackId>,
    /// Tracks dropped during this update.
    pub expired: Vec<TrackId>,
}

/// Greedy IoU tracker.
#[derive(Debug)]
pub struct FaceTracker {
    tracks: Vec<Track>,
    next_id: u64,
    iou_threshold: f32,
    max_missed: u32,
}

impl Default for FaceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_MISSED)
    }
}

impl FaceTracker {
    /// `iou_threshold`: minimum overlap to continue a track.
    /// `max_missed`: consecutive frames a track may go unmatched before it expires.
    pub fn new(iou_threshold: f32, max_missed: u32) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
            iou_threshold,
            max_missed,
        }
    }

    /// Match this frame's boxes against live tracks.
    pub fn update(&mut self, boxes: &[BoundingBox]) -> TrackUpdate {
        // Every (track, box) pair above threshold, best overlap first.
        let mut candidates: Vec<(usize, usize, f32)> = Vec::new();
        for (t, track) in self.tracks.iter().enumerate() {
            for (b, bbox) in boxes.iter().enumerate() {
                let overlap = track.bbox.iou(bbox);
                if overlap >= self.iou_threshold {
                    candidates.push((t, b, overlap));
                }
            }
        }
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut assigned: Vec<Option<TrackId>> = vec![None; boxes.len()];

        for (t, b, _) in candidates {
            if track_matched[t] || assigned[b].is_some() {
                continue;
            }
            track_matched[t] = true;
            assigned[b] = Some(self.tracks[t].id);
            self.tracks[t].bbox = boxes[b];
            self.tracks[t].missed = 0;
        }

        let mut expired = Vec::new();
        let max_missed = self.max_missed;
        let mut idx = 0;
        self.tracks.retain_mut(|track| {
            let matched = track_matched[idx];
            idx += 1;
            if matched {
                return true;
            }
            track.missed += 1;
            if track.missed > max_missed {
                expired.push(track.id);
                false
            } else {
                true
            }
        });

        let assigned = assigned
            .into_iter()
            .zip(boxes)
            .map(|(id, bbox)| match id {
                Some(id) => id,
                None => {
                    let id = TrackId(self.next_id);
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        bbox: *bbox,
                        missed: 0,
                    });
                    tracing::debug!(track = %id, "new face track");
                    id
                }
            })
            .collect();

        for id in &expired {
            tracing::debug!(track = %id, "face track expired");
        }

        TrackUpdate { assigned, expired }
    }

    /// Number of live tracks.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32) -> BoundingBox {
        BoundingBox { x, y, width: 100.0, height: 100.0, confidence: 0.9 }
    }

    #[test]
    fn test_new_boxes_get_fresh_ids() {
        let mut tracker = FaceTracker::default();
        let update = tracker.update(&[make_bbox(0.0, 0.0), make_bbox(300.0, 0.0)]);
        assert_eq!(update.assigned, vec![TrackId(0), TrackId(1)]);
        assert!(update.expired.is_empty());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_ids_follow_faces_when_order_changes() {
        let mut tracker = FaceTracker::default();
        tracker.update(&[make_bbox(0.0, 0.0), make_bbox(300.0, 0.0)]);
        // Same faces, slightly moved, reported in the opposite order.
        let update = tracker.update(&[make_bbox(305.0, 5.0), make_bbox(5.0, 5.0)]);
        assert_eq!(update.assigned, vec![TrackId(1), TrackId(0)]);
    }

    #[test]
    fn test_distant_box_starts_new_track() {
        let mut tracker = FaceTracker::default();
        tracker.update(&[make_bbox(0.0, 0.0)]);
        let update = tracker.update(&[make_bbox(400.0, 300.0)]);
        assert_eq!(update.assigned, vec![TrackId(1)]);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_track_survives_short_gap() {
        let mut tracker = FaceTracker::new(0.3, 2);
        tracker.update(&[make_bbox(0.0, 0.0)]);
        tracker.update(&[]);
        tracker.update(&[]);
        let update = tracker.update(&[make_bbox(2.0, 2.0)]);
        assert_eq!(update.assigned, vec![TrackId(0)]);
    }

    #[test]
    fn test_track_expires_after_max_missed() {
        let mut tracker = FaceTracker::new(0.3, 2);
        tracker.update(&[make_bbox(0.0, 0.0)]);
        assert!(tracker.update(&[]).expired.is_empty());
        assert!(tracker.update(&[]).expired.is_empty());
        assert_eq!(tracker.update(&[]).expired, vec![TrackId(0)]);
        assert!(tracker.is_empty());

        let update = tracker.update(&[make_bbox(0.0, 0.0)]);
        assert_eq!(update.assigned, vec![TrackId(1)]);
    }

    #[test]
    fn test_one_track_per_box() {
        let mut tracker = FaceTracker::default();
        tracker.update(&[make_bbox(0.0, 0.0)]);
        // Two boxes overlap the single track; the better one keeps its id.
        let update = tracker.update(&[make_bbox(40.0, 0.0), make_bbox(5.0, 0.0)]);
        assert_eq!(update.assigned, vec![TrackId(1), TrackId(0)]);
    }

    #[test]
    fn test_display() {
        assert_eq!(TrackId(7).to_string(), "face_7");
    }
}
