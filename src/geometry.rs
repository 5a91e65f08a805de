//! Pure 2D geometry used by the event engines.
//!
//! Everything here is total: malformed input (degenerate polygons,
//! zero-length lines) yields a negative or fallback result, never an error.

/// A point in pixel space.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Z-component of the cross product of (a − o) and (b − o).
///
/// Positive when `b` is left of the directed line o→a, negative when right.
pub fn cross(o: Point, a: Point, b: Point) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Ray-casting containment test.
///
/// Polygons with fewer than 3 vertices are never contained in. Boundary
/// behavior is deterministic for identical input but otherwise unspecified.
pub fn point_in_polygon(p: Point, vertices: &[Point]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if (vi.y > p.y) != (vj.y > p.y) {
            let dy = vj.y - vi.y;
            // dy is non-zero here because vi.y and vj.y straddle p.y.
            let x_at = vi.x + (p.y - vi.y) * (vj.x - vi.x) / dy;
            if p.x < x_at {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Intersection of segments p1-p2 and p3-p4.
///
/// Solves the parametric 2x2 system; a near-zero determinant means the
/// segments are parallel and never intersect. Returns the intersection
/// point only when it lies within both segments (t, u in [0, 1]).
pub fn segment_intersection(p1: Point, p2: Point, p3: Point, p4: Point) -> Option<Point> {
    let denom = (p1.x - p2.x) * (p3.y - p4.y) - (p1.y - p2.y) * (p3.x - p4.x);
    if denom.abs() < 1e-10 {
        return None;
    }
    let t = ((p1.x - p3.x) * (p3.y - p4.y) - (p1.y - p3.y) * (p3.x - p4.x)) / denom;
    let u = -((p1.x - p2.x) * (p1.y - p3.y) - (p1.y - p2.y) * (p1.x - p3.x)) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(Point::new(p1.x + t * (p2.x - p1.x), p1.y + t * (p2.y - p1.y)))
    } else {
        None
    }
}

/// Perpendicular distance from `p` to the infinite line through `a` and `b`.
///
/// A zero-length line degrades to the distance to that single point.
pub fn distance_to_line(p: Point, a: Point, b: Point) -> f32 {
    let length = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
    if length == 0.0 {
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }
    ((b.y - a.y) * p.x - (b.x - a.x) * p.y + b.x * a.y - b.y * a.x).abs() / length
}
