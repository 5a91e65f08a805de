//! Decaying activity heatmap.
//!
//! A dense intensity field at frame resolution. Every update fades the
//! whole field by the decay rate, then stamps a Gaussian blob at each
//! detection center; the field is clamped so sustained activity cannot grow
//! without bound. Rendering maps the field through a jet colormap and
//! composites it only over pixels with visible activity.

use anyhow::{anyhow, Result};

use crate::detect::Detection;
use crate::frame::Frame;

const DEFAULT_DECAY_RATE: f32 = 0.98;
const MAX_INTENSITY: f32 = 10.0;
const BLOB_AMPLITUDE: f32 = 0.5;
const MIN_BLOB_RADIUS: f32 = 20.0;
const MAX_BLOB_RADIUS: f32 = 100.0;
/// Rendered intensity (0..255) below which the frame is left untouched,
/// so inactive regions are never darkened.
const VISIBILITY_THRESHOLD: u8 = 10;

/// Aggregate field statistics, for health logging and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeatmapStats {
    pub max_intensity: f32,
    pub mean_intensity: f32,
    pub frame_count: u64,
    /// Cells above a small epsilon (0.1).
    pub active_pixels: usize,
}

/// Per-stream decaying intensity field.
pub struct HeatmapField {
    width: u32,
    height: u32,
    field: Vec<f32>,
    decay_rate: f32,
    frame_count: u64,
}

impl HeatmapField {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_decay_rate(width, height, DEFAULT_DECAY_RATE)
    }

    pub fn with_decay_rate(width: u32, height: u32, decay_rate: f32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("heatmap dimensions must be non-zero"));
        }
        if !(0.0..1.0).contains(&decay_rate) || decay_rate == 0.0 {
            return Err(anyhow!("decay rate must be within (0, 1), got {decay_rate}"));
        }
        Ok(Self {
            width,
            height,
            field: vec![0.0; (width as usize) * (height as usize)],
            decay_rate,
            frame_count: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// One update cycle: fade everything, then stamp each detection.
    pub fn update(&mut self, detections: &[Detection]) {
        for cell in &mut self.field {
            *cell *= self.decay_rate;
        }

        for detection in detections {
            let center = detection.bbox.center();
            let cx = (center.x as i64).clamp(0, self.width as i64 - 1);
            let cy = (center.y as i64).clamp(0, self.height as i64 - 1);

            let radius = (detection.bbox.width().max(detection.bbox.height()) * 0.6)
                .clamp(MIN_BLOB_RADIUS, MAX_BLOB_RADIUS);
            let r = radius as i64;
            let sigma = radius / 2.0;
            let two_sigma_sq = 2.0 * sigma * sigma;
            let r_sq = radius * radius;

            let y0 = (cy - r).max(0);
            let y1 = (cy + r).min(self.height as i64 - 1);
            let x0 = (cx - r).max(0);
            let x1 = (cx + r).min(self.width as i64 - 1);

            for y in y0..=y1 {
                for x in x0..=x1 {
                    let dx = (x - cx) as f32;
                    let dy = (y - cy) as f32;
                    let d_sq = dx * dx + dy * dy;
                    if d_sq > r_sq {
                        continue;
                    }
                    let idx = (y as usize) * (self.width as usize) + x as usize;
                    let contribution = (-d_sq / two_sigma_sq).exp() * BLOB_AMPLITUDE;
                    self.field[idx] = (self.field[idx] + contribution).min(MAX_INTENSITY);
                }
            }
        }

        self.frame_count += 1;
    }

    /// Composite the colorized field onto `frame`.
    ///
    /// The field is normalized by its current maximum, mapped through a jet
    /// colormap, and alpha-blended only where the rendered intensity
    /// exceeds the visibility threshold. A frame at a different resolution
    /// is sampled nearest-neighbour.
    pub fn render_overlay(&self, frame: &mut Frame, alpha: f32) {
        let max = self.field.iter().cloned().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return;
        }
        let alpha = alpha.clamp(0.0, 1.0);
        let frame_w = frame.width();
        let frame_h = frame.height();

        for y in 0..frame_h {
            let fy = (y as u64 * self.height as u64 / frame_h as u64) as usize;
            for x in 0..frame_w {
                let fx = (x as u64 * self.width as u64 / frame_w as u64) as usize;
                let value = self.field[fy * self.width as usize + fx];
                let intensity = ((value / max) * 255.0) as u8;
                if intensity <= VISIBILITY_THRESHOLD {
                    continue;
                }
                let heat = jet_color(intensity);
                let base = frame.pixel(x, y);
                let blended = [
                    blend(base[0], heat[0], alpha),
                    blend(base[1], heat[1], alpha),
                    blend(base[2], heat[2], alpha),
                ];
                frame.put_pixel(x, y, blended);
            }
        }
    }

    pub fn reset(&mut self) {
        self.field.fill(0.0);
        self.frame_count = 0;
        log::info!("heatmap reset");
    }

    pub fn stats(&self) -> HeatmapStats {
        let max = self.field.iter().cloned().fold(0.0f32, f32::max);
        let sum: f32 = self.field.iter().sum();
        HeatmapStats {
            max_intensity: max,
            mean_intensity: sum / self.field.len() as f32,
            frame_count: self.frame_count,
            active_pixels: self.field.iter().filter(|&&v| v > 0.1).count(),
        }
    }

    /// Total field intensity; used by decay tests.
    pub fn total_intensity(&self) -> f32 {
        self.field.iter().sum()
    }
}

fn blend(base: u8, overlay: u8, alpha: f32) -> u8 {
    (base as f32 * (1.0 - alpha) + overlay as f32 * alpha) as u8
}

/// Jet colormap: blue through green to red across 0..255.
fn jet_color(intensity: u8) -> [u8; 3] {
    let t = intensity as f32 / 255.0;
    let channel = |offset: f32| ((1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0) * 255.0) as u8;
    [channel(3.0), channel(2.0), channel(1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn detection_at(x: f32, y: f32, size: f32) -> Detection {
        Detection {
            class_label: "person".into(),
            confidence: 0.9,
            bbox: BoundingBox::new(x - size / 2.0, y - size / 2.0, x + size / 2.0, y + size / 2.0),
            track_id: Some(1),
            class_index: None,
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(HeatmapField::with_decay_rate(0, 10, 0.9).is_err());
        assert!(HeatmapField::with_decay_rate(10, 10, 0.0).is_err());
        assert!(HeatmapField::with_decay_rate(10, 10, 1.0).is_err());
        assert!(HeatmapField::with_decay_rate(10, 10, 0.98).is_ok());
    }

    #[test]
    fn intensity_decays_strictly_without_detections() {
        let mut field = HeatmapField::new(320, 240).unwrap();
        field.update(&[detection_at(160.0, 120.0, 60.0)]);
        let mut previous = field.total_intensity();
        assert!(previous > 0.0);
        for _ in 0..50 {
            field.update(&[]);
            let current = field.total_intensity();
            assert!(current < previous, "decay must strictly reduce intensity");
            previous = current;
        }
        // Geometric decay drives the field toward zero.
        for _ in 0..2000 {
            field.update(&[]);
        }
        assert!(field.total_intensity() < 1e-3);
    }

    #[test]
    fn sustained_activity_is_clamped() {
        let mut field = HeatmapField::new(160, 120).unwrap();
        for _ in 0..500 {
            field.update(&[detection_at(80.0, 60.0, 200.0)]);
        }
        assert!(field.stats().max_intensity <= MAX_INTENSITY + 1e-6);
    }

    #[test]
    fn off_frame_centers_are_clamped_into_bounds() {
        let mut field = HeatmapField::new(100, 100).unwrap();
        field.update(&[detection_at(-50.0, -50.0, 40.0), detection_at(500.0, 500.0, 40.0)]);
        assert!(field.total_intensity() > 0.0);
    }

    #[test]
    fn overlay_touches_only_active_pixels() {
        let mut field = HeatmapField::new(100, 100).unwrap();
        for _ in 0..5 {
            field.update(&[detection_at(50.0, 50.0, 30.0)]);
        }
        let mut frame = Frame::new(vec![40u8; 100 * 100 * 3], 100, 100, 0);
        field.render_overlay(&mut frame, 0.5);
        // Hot center changed, far corner untouched.
        assert_ne!(frame.pixel(50, 50), [40, 40, 40]);
        assert_eq!(frame.pixel(2, 2), [40, 40, 40]);
    }

    #[test]
    fn empty_field_renders_nothing() {
        let field = HeatmapField::new(64, 64).unwrap();
        let mut frame = Frame::new(vec![7u8; 64 * 64 * 3], 64, 64, 0);
        field.render_overlay(&mut frame, 0.5);
        assert_eq!(frame.pixel(32, 32), [7, 7, 7]);
    }

    #[test]
    fn overlay_handles_resolution_mismatch() {
        let mut field = HeatmapField::new(100, 100).unwrap();
        for _ in 0..5 {
            field.update(&[detection_at(50.0, 50.0, 30.0)]);
        }
        let mut frame = Frame::new(vec![0u8; 200 * 200 * 3], 200, 200, 0);
        field.render_overlay(&mut frame, 0.5);
        assert_ne!(frame.pixel(100, 100), [0, 0, 0]);
    }

    #[test]
    fn reset_zeroes_the_field() {
        let mut field = HeatmapField::new(64, 64).unwrap();
        field.update(&[detection_at(32.0, 32.0, 30.0)]);
        assert!(field.stats().active_pixels > 0);
        field.reset();
        let stats = field.stats();
        assert_eq!(stats.active_pixels, 0);
        assert_eq!(stats.frame_count, 0);
        assert_eq!(stats.max_intensity, 0.0);
    }

    #[test]
    fn jet_colormap_spans_blue_to_red() {
        let cold = jet_color(20);
        let hot = jet_color(255);
        assert!(cold[2] > cold[0], "low intensity leans blue");
        assert!(hot[0] > hot[2], "high intensity leans red");
    }
}
