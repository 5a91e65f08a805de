//! Frame annotation.
//!
//! Draws detection boxes, ROI polygons, counting lines and crossing markers
//! directly into packed RGB frames. All primitives clip at the frame edges
//! through the frame's bounds-checked pixel accessors, so callers never
//! need to pre-clip coordinates.

use crate::config::{parse_hex_color, LineZoneConfig, RoiConfig};
use crate::detect::Detection;
use crate::frame::Frame;
use crate::geometry::Point;

const DETECTION_THICKNESS: i32 = 2;
const ZONE_THICKNESS: i32 = 2;
const MARKER_RADIUS: i32 = 6;
const MARKER_COLOR: [u8; 3] = [255, 0, 0];

/// Outline every detection with the given color.
pub fn draw_detections(frame: &mut Frame, detections: &[&Detection], color: [u8; 3]) {
    for detection in detections {
        let b = detection.bbox;
        draw_rect(
            frame,
            b.x1 as i32,
            b.y1 as i32,
            b.x2 as i32,
            b.y2 as i32,
            color,
            DETECTION_THICKNESS,
        );
    }
}

/// Outline active ROI polygons in their configured colors.
pub fn draw_rois(frame: &mut Frame, rois: &[RoiConfig]) {
    for roi in rois.iter().filter(|roi| roi.is_active) {
        let vertices = roi.vertices();
        if vertices.len() < 3 {
            continue;
        }
        draw_polygon(frame, &vertices, parse_hex_color(&roi.color), ZONE_THICKNESS);
    }
}

/// Draw active counting lines in their configured colors.
pub fn draw_line_zones(frame: &mut Frame, zones: &[LineZoneConfig]) {
    for zone in zones.iter().filter(|zone| zone.is_active) {
        if let Some((start, end)) = zone.endpoints() {
            draw_line(
                frame,
                start.x as i32,
                start.y as i32,
                end.x as i32,
                end.y as i32,
                parse_hex_color(&zone.color),
                ZONE_THICKNESS,
            );
        }
    }
}

/// Mark the point where an object crossed a counting line.
pub fn draw_crossing_marker(frame: &mut Frame, point: Point) {
    fill_circle(frame, point.x as i32, point.y as i32, MARKER_RADIUS, MARKER_COLOR);
}

/// Closed polygon outline.
pub fn draw_polygon(frame: &mut Frame, vertices: &[Point], color: [u8; 3], thickness: i32) {
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[(i + 1) % vertices.len()];
        draw_line(
            frame,
            a.x as i32,
            a.y as i32,
            b.x as i32,
            b.y as i32,
            color,
            thickness,
        );
    }
}

/// Axis-aligned rectangle outline.
pub fn draw_rect(
    frame: &mut Frame,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: [u8; 3],
    thickness: i32,
) {
    draw_line(frame, x1, y1, x2, y1, color, thickness);
    draw_line(frame, x2, y1, x2, y2, color, thickness);
    draw_line(frame, x2, y2, x1, y2, color, thickness);
    draw_line(frame, x1, y2, x1, y1, color, thickness);
}

/// Bresenham line with square brush thickness.
pub fn draw_line(
    frame: &mut Frame,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: [u8; 3],
    thickness: i32,
) {
    let dx = (x2 - x1).abs();
    let dy = -(y2 - y1).abs();
    let sx = if x1 < x2 { 1 } else { -1 };
    let sy = if y1 < y2 { 1 } else { -1 };
    let mut err = dx + dy;
    let mut x = x1;
    let mut y = y1;

    loop {
        stamp(frame, x, y, thickness, color);
        if x == x2 && y == y2 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Filled circle, clipped at the frame edges.
pub fn fill_circle(frame: &mut Frame, cx: i32, cy: i32, radius: i32, color: [u8; 3]) {
    let r_sq = radius * radius;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= r_sq {
                put(frame, cx + dx, cy + dy, color);
            }
        }
    }
}

fn stamp(frame: &mut Frame, x: i32, y: i32, thickness: i32, color: [u8; 3]) {
    let half = thickness / 2;
    for dy in -half..=half {
        for dx in -half..=half {
            put(frame, x + dx, y + dy, color);
        }
    }
}

fn put(frame: &mut Frame, x: i32, y: i32, color: [u8; 3]) {
    if x < 0 || y < 0 {
        return;
    }
    frame.put_pixel(x as u32, y as u32, color);
}
