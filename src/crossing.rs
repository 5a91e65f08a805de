//! Trajectory-based line-crossing detection.
//!
//! The detector keeps a bounded center-point trajectory per track id and a
//! crossing record per (track, line). A crossing is confirmed when one of
//! the most recent trajectory segments intersects the configured line;
//! direction is classified from the cross-product sign flip around the
//! line. Same-direction repeats inside the debounce window are suppressed;
//! opposite-direction crossings are always accepted. Once the object moves
//! beyond the reset distance from a line its record is dropped, re-arming
//! that line for the track.
//!
//! All state is owned by the processing loop of one stream: no locking.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::config::{CountDirection, LineZoneConfig};
use crate::detect::{BoundingBox, Detection};
use crate::geometry::{cross, distance_to_line, segment_intersection, Point};

/// Bounded trajectory history per track.
pub const MAX_TRAJECTORY_LEN: usize = 50;

/// Distance from a line (px) past which a crossing record is cleared.
pub const DEFAULT_RESET_DISTANCE: f32 = 80.0;

/// Debounce window for repeated same-direction crossings (~0.5 s at 30 fps).
pub const DEFAULT_MIN_FRAMES_SAME_DIRECTION: u32 = 15;

/// Trajectory segments examined per frame, newest first. Checking more than
/// the last segment catches crossings that span dropped frames.
const MAX_SEGMENTS_TO_CHECK: usize = 5;

/// Classified crossing direction.
///
/// Horizontal-dominant lines flip between up/down, vertical-dominant lines
/// between left/right. `In`/`Out` is the generic fallback for ambiguous
/// sign patterns, a coarse approximation for near-diagonal lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    UpToDown,
    DownToUp,
    LeftToRight,
    RightToLeft,
    In,
    Out,
}

/// Which counter a confirmed crossing increments. Counters belong to the
/// event consumer, not to the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountCategory {
    In,
    Out,
}

impl CrossingDirection {
    pub fn count_category(self) -> CountCategory {
        match self {
            CrossingDirection::UpToDown | CrossingDirection::LeftToRight | CrossingDirection::In => {
                CountCategory::In
            }
            CrossingDirection::DownToUp
            | CrossingDirection::RightToLeft
            | CrossingDirection::Out => CountCategory::Out,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CrossingDirection::UpToDown => "up_to_down",
            CrossingDirection::DownToUp => "down_to_up",
            CrossingDirection::LeftToRight => "left_to_right",
            CrossingDirection::RightToLeft => "right_to_left",
            CrossingDirection::In => "in",
            CrossingDirection::Out => "out",
        }
    }
}

impl CountDirection {
    /// Apply the zone's counting-direction filter to a classified crossing.
    pub fn accepts(self, direction: CrossingDirection) -> bool {
        match self {
            CountDirection::Both => true,
            CountDirection::Up => {
                matches!(direction, CrossingDirection::UpToDown | CrossingDirection::In)
            }
            CountDirection::Down => {
                matches!(direction, CrossingDirection::DownToUp | CrossingDirection::Out)
            }
            CountDirection::Left => {
                matches!(direction, CrossingDirection::LeftToRight | CrossingDirection::In)
            }
            CountDirection::Right => {
                matches!(direction, CrossingDirection::RightToLeft | CrossingDirection::Out)
            }
        }
    }
}

/// A confirmed, filter-accepted crossing.
#[derive(Clone, Debug, Serialize)]
pub struct CrossingEvent {
    pub line_id: u32,
    pub line_name: String,
    pub track_id: u64,
    pub object_class: String,
    pub confidence: f32,
    pub direction: CrossingDirection,
    pub crossing_point: Point,
    pub bbox: BoundingBox,
}

struct CrossingState {
    last_direction: CrossingDirection,
    frames_since_cross: u32,
}

/// Crossing counts for one line, kept by the event consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LineCounters {
    pub count_in: u64,
    pub count_out: u64,
}

impl LineCounters {
    pub fn record(&mut self, direction: CrossingDirection) {
        match direction.count_category() {
            CountCategory::In => self.count_in += 1,
            CountCategory::Out => self.count_out += 1,
        }
    }
}

/// Snapshot of detector state for one line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineStatistics {
    /// Crossing records currently held for this line.
    pub active_crossings: usize,
    /// Distinct tracks among those records.
    pub unique_objects: usize,
}

/// Per-stream line-crossing detector.
pub struct LineCrossingDetector {
    trajectories: HashMap<u64, VecDeque<Point>>,
    crossed: HashMap<(u64, u32), CrossingState>,
    max_trajectory_len: usize,
    reset_distance: f32,
    min_frames_between_same_direction: u32,
}

impl Default for LineCrossingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCrossingDetector {
    pub fn new() -> Self {
        Self {
            trajectories: HashMap::new(),
            crossed: HashMap::new(),
            max_trajectory_len: MAX_TRAJECTORY_LEN,
            reset_distance: DEFAULT_RESET_DISTANCE,
            min_frames_between_same_direction: DEFAULT_MIN_FRAMES_SAME_DIRECTION,
        }
    }

    /// Feed one frame of detections and return the accepted crossing events.
    ///
    /// Detections without a track id are skipped: crossings need identity
    /// across frames. Inactive or malformed zones are ignored.
    pub fn observe(
        &mut self,
        detections: &[Detection],
        zones: &[LineZoneConfig],
    ) -> Vec<CrossingEvent> {
        let mut events = Vec::new();
        if zones.is_empty() {
            return events;
        }

        for detection in detections {
            let Some(track_id) = detection.track_id else {
                continue;
            };
            let center = detection.bbox.center();

            let trajectory = self.trajectories.entry(track_id).or_default();
            trajectory.push_back(center);
            if trajectory.len() > self.max_trajectory_len {
                trajectory.pop_front();
            }

            for zone in zones {
                if !zone.is_active {
                    continue;
                }
                let Some((start, end)) = zone.endpoints() else {
                    continue;
                };

                // Age the crossing record, and re-arm once the object has
                // moved far enough from the line.
                let key = (track_id, zone.id);
                if let Some(state) = self.crossed.get_mut(&key) {
                    state.frames_since_cross += 1;
                    let distance = distance_to_line(center, start, end);
                    if distance > self.reset_distance {
                        self.crossed.remove(&key);
                        log::debug!(
                            "track {track_id} moved {distance:.1}px from line {}, re-armed",
                            zone.id
                        );
                    }
                }

                if let Some(event) = self.detect_crossing(track_id, zone, start, end, detection) {
                    if zone.count_direction.accepts(event.direction) {
                        log::info!(
                            "crossing: {} over {} ({})",
                            event.object_class,
                            event.line_name,
                            event.direction.as_str()
                        );
                        events.push(event);
                    }
                }
            }
        }

        events
    }

    fn detect_crossing(
        &mut self,
        track_id: u64,
        zone: &LineZoneConfig,
        start: Point,
        end: Point,
        detection: &Detection,
    ) -> Option<CrossingEvent> {
        let trajectory = self.trajectories.get(&track_id)?;
        if trajectory.len() < 2 {
            return None;
        }

        // Walk segments newest-first and take the first intersection.
        let segments = MAX_SEGMENTS_TO_CHECK.min(trajectory.len() - 1);
        let mut found: Option<(Point, CrossingDirection)> = None;
        for i in 0..segments {
            let prev = trajectory[trajectory.len() - 2 - i];
            let curr = trajectory[trajectory.len() - 1 - i];
            if let Some(hit) = segment_intersection(prev, curr, start, end) {
                found = Some((hit, classify_direction(prev, curr, start, end)));
                break;
            }
        }
        let (crossing_point, direction) = found?;

        let key = (track_id, zone.id);
        if let Some(state) = self.crossed.get(&key) {
            if state.last_direction == direction {
                if state.frames_since_cross < self.min_frames_between_same_direction {
                    log::debug!(
                        "track {track_id}: same-direction crossing suppressed ({} frames since last)",
                        state.frames_since_cross
                    );
                    return None;
                }
                log::info!(
                    "track {track_id}: repeated {} crossing counted after {} frames",
                    direction.as_str(),
                    state.frames_since_cross
                );
            } else {
                log::info!(
                    "track {track_id}: direction changed from {} to {}",
                    state.last_direction.as_str(),
                    direction.as_str()
                );
            }
        }

        self.crossed.insert(
            key,
            CrossingState {
                last_direction: direction,
                frames_since_cross: 0,
            },
        );

        Some(CrossingEvent {
            line_id: zone.id,
            line_name: if zone.name.is_empty() {
                format!("line {}", zone.id)
            } else {
                zone.name.clone()
            },
            track_id,
            object_class: detection.class_label.clone(),
            confidence: detection.confidence,
            direction,
            crossing_point,
            bbox: detection.bbox,
        })
    }

    /// Drop state for one track, or everything when `track_id` is `None`
    /// (stream reset).
    pub fn reset(&mut self, track_id: Option<u64>) {
        match track_id {
            Some(id) => {
                self.crossed.retain(|(track, _), _| *track != id);
                self.trajectories.remove(&id);
            }
            None => {
                self.crossed.clear();
                self.trajectories.clear();
            }
        }
    }

    pub fn line_statistics(&self, line_id: u32) -> LineStatistics {
        let tracks: Vec<u64> = self
            .crossed
            .keys()
            .filter(|(_, line)| *line == line_id)
            .map(|(track, _)| *track)
            .collect();
        let mut unique = tracks.clone();
        unique.sort_unstable();
        unique.dedup();
        LineStatistics {
            active_crossings: tracks.len(),
            unique_objects: unique.len(),
        }
    }

    /// Number of tracks with a live trajectory.
    pub fn tracked_objects(&self) -> usize {
        self.trajectories.len()
    }
}

/// Classify the crossing direction from the side flip around the line.
///
/// Horizontal-dominant lines (|dx| > |dy|) map the flip to up/down,
/// vertical-dominant lines to left/right. Sign patterns that fit neither
/// branch (a point exactly on the line, near-diagonal jitter) fall through
/// to the generic in/out classification.
fn classify_direction(prev: Point, curr: Point, start: Point, end: Point) -> CrossingDirection {
    let prev_side = cross(start, end, prev);
    let curr_side = cross(start, end, curr);
    let dx = end.x - start.x;
    let dy = end.y - start.y;

    if dx.abs() > dy.abs() {
        if prev_side < 0.0 && curr_side > 0.0 {
            return CrossingDirection::UpToDown;
        }
        if prev_side > 0.0 && curr_side < 0.0 {
            return CrossingDirection::DownToUp;
        }
    } else {
        if prev_side < 0.0 && curr_side > 0.0 {
            return CrossingDirection::LeftToRight;
        }
        if prev_side > 0.0 && curr_side < 0.0 {
            return CrossingDirection::RightToLeft;
        }
    }

    // Explicit fallback for ambiguous patterns.
    if prev_side < 0.0 && curr_side > 0.0 {
        CrossingDirection::In
    } else {
        CrossingDirection::Out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LineZoneConfig;

    fn zone(id: u32, a: (f32, f32), b: (f32, f32), filter: CountDirection) -> LineZoneConfig {
        LineZoneConfig {
            id,
            name: format!("zone-{id}"),
            coordinates: vec![a, b],
            count_direction: filter,
            color: "#00FF00".into(),
            is_active: true,
            alert_enabled: true,
        }
    }

    fn person_at(track_id: u64, x: f32, y: f32) -> Detection {
        Detection {
            class_label: "person".into(),
            confidence: 0.85,
            bbox: BoundingBox::new(x - 10.0, y - 10.0, x + 10.0, y + 10.0),
            track_id: Some(track_id),
            class_index: Some(0),
        }
    }

    /// Feed a sequence of center positions for one track, collecting events.
    fn run(
        detector: &mut LineCrossingDetector,
        zones: &[LineZoneConfig],
        path: &[(f32, f32)],
    ) -> Vec<CrossingEvent> {
        let mut events = Vec::new();
        for &(x, y) in path {
            events.extend(detector.observe(&[person_at(1, x, y)], zones));
        }
        events
    }

    #[test]
    fn downward_crossing_emits_one_event_at_intersection() {
        // Horizontal line (0,100)-(200,100), trajectory (100,80)->(100,120).
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        let events = run(&mut detector, &zones, &[(100.0, 80.0), (100.0, 120.0)]);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.direction, CrossingDirection::UpToDown);
        assert!((event.crossing_point.x - 100.0).abs() < 1e-3);
        assert!((event.crossing_point.y - 100.0).abs() < 1e-3);
        assert_eq!(event.track_id, 1);
        assert_eq!(event.object_class, "person");
    }

    #[test]
    fn same_direction_recross_within_window_is_suppressed() {
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        // The lingering trajectory keeps re-intersecting the line for a few
        // frames after the crossing; only the first may count.
        let events = run(
            &mut detector,
            &zones,
            &[(100.0, 80.0), (100.0, 120.0), (100.0, 125.0), (100.0, 130.0)],
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn full_back_and_forth_journey_counts_every_pass() {
        // Down, away past the reset distance, back up, away again, down
        // once more. Every pass is a legitimate crossing, including the
        // final one, which repeats the first direction.
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        let path: Vec<(f32, f32)> = [
            80.0, 120.0, // cross down
            135.0, 150.0, 165.0, 180.0, 200.0, // drift beyond reset (no re-find)
            160.0, 130.0, 90.0, // cross back up
            75.0, 60.0, 45.0, 35.0, 25.0, 10.0, // drift beyond reset again
            40.0, 80.0, 120.0, // cross down a second time
        ]
        .iter()
        .map(|&y| (100.0, y))
        .collect();
        let events = run(&mut detector, &zones, &path);
        let directions: Vec<_> = events.iter().map(|e| e.direction).collect();
        assert_eq!(
            directions,
            vec![
                CrossingDirection::UpToDown,
                CrossingDirection::DownToUp,
                CrossingDirection::UpToDown
            ]
        );
    }

    #[test]
    fn opposite_direction_is_accepted_immediately() {
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        let events = run(
            &mut detector,
            &zones,
            &[(100.0, 80.0), (100.0, 120.0), (100.0, 90.0)],
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].direction, CrossingDirection::UpToDown);
        assert_eq!(events[1].direction, CrossingDirection::DownToUp);
    }

    #[test]
    fn moving_past_reset_distance_rearms_the_line() {
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        // Cross, then wander away (>80 px) so the record is dropped. The
        // re-found crossing on the old segment counts again despite being
        // the same direction within the debounce window.
        let events = run(
            &mut detector,
            &zones,
            &[(100.0, 80.0), (100.0, 120.0), (100.0, 200.0)],
        );
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.direction == CrossingDirection::UpToDown));
    }

    #[test]
    fn vertical_line_classifies_left_right() {
        let zones = [zone(1, (100.0, 0.0), (100.0, 200.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        let events = run(&mut detector, &zones, &[(80.0, 100.0), (120.0, 100.0)]);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].direction,
            CrossingDirection::LeftToRight | CrossingDirection::RightToLeft
        ));
    }

    #[test]
    fn diagonal_line_classifies_on_the_vertical_branch() {
        // 45-degree line: |dx| is not greater than |dy|, so the crossing
        // maps to left/right rather than up/down.
        let zones = [zone(1, (0.0, 0.0), (200.0, 200.0), CountDirection::Left)];
        let mut detector = LineCrossingDetector::new();
        let events = run(&mut detector, &zones, &[(120.0, 80.0), (80.0, 120.0)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, CrossingDirection::LeftToRight);
        assert!((events[0].crossing_point.x - 100.0).abs() < 1e-3);
        assert!((events[0].crossing_point.y - 100.0).abs() < 1e-3);
    }

    #[test]
    fn stopping_exactly_on_the_line_falls_back_to_generic_direction() {
        // The segment endpoint lands on the line itself, so its side sign
        // is zero and neither axis mapping matches; the generic fallback
        // classifies the crossing and the `Down` filter accepts it.
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Down)];
        let mut detector = LineCrossingDetector::new();
        let events = run(&mut detector, &zones, &[(100.0, 80.0), (100.0, 100.0)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, CrossingDirection::Out);
    }

    #[test]
    fn generic_directions_pass_the_axis_filters() {
        assert!(CountDirection::Up.accepts(CrossingDirection::In));
        assert!(CountDirection::Left.accepts(CrossingDirection::In));
        assert!(CountDirection::Down.accepts(CrossingDirection::Out));
        assert!(CountDirection::Right.accepts(CrossingDirection::Out));
        assert!(!CountDirection::Up.accepts(CrossingDirection::Out));
        assert!(!CountDirection::Down.accepts(CrossingDirection::In));
    }

    #[test]
    fn direction_filter_drops_unmatched_crossings() {
        // `Up` keeps up_to_down, rejects down_to_up.
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Up)];
        let mut detector = LineCrossingDetector::new();
        let events = run(
            &mut detector,
            &zones,
            &[(100.0, 80.0), (100.0, 120.0), (100.0, 90.0)],
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, CrossingDirection::UpToDown);
    }

    #[test]
    fn detections_without_track_ids_are_ignored() {
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        let mut untracked = person_at(1, 100.0, 80.0);
        untracked.track_id = None;
        detector.observe(std::slice::from_ref(&untracked), &zones);
        untracked.bbox = BoundingBox::new(90.0, 110.0, 110.0, 130.0);
        let events = detector.observe(&[untracked], &zones);
        assert!(events.is_empty());
        assert_eq!(detector.tracked_objects(), 0);
    }

    #[test]
    fn trajectory_length_is_bounded() {
        let zones = [zone(1, (0.0, 1000.0), (200.0, 1000.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        for i in 0..200 {
            detector.observe(&[person_at(1, 100.0, i as f32)], &zones);
        }
        let trajectory = detector.trajectories.get(&1).unwrap();
        assert_eq!(trajectory.len(), MAX_TRAJECTORY_LEN);
        // Oldest points were evicted first.
        assert!((trajectory.front().unwrap().y - 150.0).abs() < 1e-3);
    }

    #[test]
    fn reset_clears_per_track_and_all_state() {
        let zones = [zone(1, (0.0, 100.0), (200.0, 100.0), CountDirection::Both)];
        let mut detector = LineCrossingDetector::new();
        detector.observe(&[person_at(1, 100.0, 80.0), person_at(2, 50.0, 80.0)], &zones);
        detector.observe(&[person_at(1, 100.0, 120.0), person_at(2, 50.0, 120.0)], &zones);
        assert_eq!(detector.line_statistics(1).unique_objects, 2);

        detector.reset(Some(1));
        assert_eq!(detector.line_statistics(1).unique_objects, 1);
        assert_eq!(detector.tracked_objects(), 1);

        detector.reset(None);
        assert_eq!(detector.line_statistics(1), LineStatistics::default());
        assert_eq!(detector.tracked_objects(), 0);
    }

    #[test]
    fn counters_follow_direction_categories() {
        let mut counters = LineCounters::default();
        counters.record(CrossingDirection::UpToDown);
        counters.record(CrossingDirection::LeftToRight);
        counters.record(CrossingDirection::In);
        counters.record(CrossingDirection::DownToUp);
        counters.record(CrossingDirection::Out);
        assert_eq!(counters.count_in, 3);
        assert_eq!(counters.count_out, 2);
    }
}
