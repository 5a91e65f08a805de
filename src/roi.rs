//! ROI violation evaluation.
//!
//! A detection violates an ROI when its bounding-box center lies inside the
//! ROI polygon. The evaluator is pure and total: malformed polygons are
//! reported as "not contained", never as an error.

use crate::config::RoiConfig;
use crate::detect::{BoundingBox, Detection};
use crate::geometry::{point_in_polygon, Point};

/// Classes that always raise a violation, ROI or not.
pub const ALWAYS_ALERT_CLASSES: [&str; 2] = ["fire", "smoke"];

/// True when the bounding-box center lies inside the polygon.
pub fn roi_contains(roi: &RoiConfig, bbox: &BoundingBox) -> bool {
    point_in_polygon(bbox.center(), &roi.vertices())
}

/// True when `point` lies inside the polygon (degenerate polygons: false).
pub fn roi_contains_point(roi: &RoiConfig, point: Point) -> bool {
    point_in_polygon(point, &roi.vertices())
}

/// True for fire/smoke classes, which alert regardless of ROI membership.
pub fn is_always_alert_class(class_label: &str) -> bool {
    ALWAYS_ALERT_CLASSES
        .iter()
        .any(|class| class.eq_ignore_ascii_case(class_label))
}

/// Select the detections to display under ROI filtering: a detection is
/// kept when its center falls inside any active ROI. With filtering off,
/// everything is kept. Fire/smoke detections are excluded here because the
/// stream handles them on a separate always-alert path.
pub fn filter_for_display<'a>(
    detections: &'a [Detection],
    rois: &[RoiConfig],
    filtering_enabled: bool,
) -> Vec<&'a Detection> {
    detections
        .iter()
        .filter(|detection| !is_always_alert_class(&detection.class_label))
        .filter(|detection| {
            if !filtering_enabled {
                return true;
            }
            rois.iter()
                .any(|roi| roi.is_active && roi_contains(roi, &detection.bbox))
        })
        .collect()
}

/// Count `person` detections inside the first ROI (people-counting feature).
pub fn count_people_in_first_roi(detections: &[Detection], rois: &[RoiConfig]) -> usize {
    let Some(roi) = rois.first() else {
        return 0;
    };
    detections
        .iter()
        .filter(|detection| detection.class_label.eq_ignore_ascii_case("person"))
        .filter(|detection| roi_contains(roi, &detection.bbox))
        .count()
}
