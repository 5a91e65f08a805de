//! RGB frame container.
//!
//! Frames are packed RGB24 rows produced by the ingest layer. The processing
//! loop clones them freely: the captured register and the annotated/raw
//! slots all hold owned copies so no lock is held while pixels are touched.

use std::time::Instant;

/// One decoded video frame (packed RGB, row-major, 3 bytes per pixel).
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Monotonic capture instant, used for staleness accounting.
    captured_at: Instant,
    /// Capture-loop sequence number, monotonically increasing per source.
    seq: u64,
}

impl Frame {
    /// Create a frame from packed RGB data. Called by the ingest layer.
    ///
    /// `data.len()` must equal `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, seq: u64) -> Self {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            seq,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// RGB triple at (x, y). Out-of-bounds reads return black.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let i = ((y * self.width + x) * 3) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Write the RGB triple at (x, y). Out-of-bounds writes are dropped.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = ((y * self.width + x) * 3) as usize;
        self.data[i..i + 3].copy_from_slice(&rgb);
    }

    /// Nearest-neighbour downscale to `new_width`, preserving aspect ratio.
    ///
    /// Used by the throttled resource profile to shrink frames before the
    /// detection call. Returns a copy; widths at or below the target are
    /// returned unchanged.
    pub fn resize_to_width(&self, new_width: u32) -> Frame {
        if self.width <= new_width || new_width == 0 {
            return self.clone();
        }
        let scale = new_width as f32 / self.width as f32;
        let new_height = ((self.height as f32 * scale) as u32).max(1);
        let mut data = vec![0u8; (new_width * new_height * 3) as usize];
        for y in 0..new_height {
            let src_y = ((y as f32 / scale) as u32).min(self.height - 1);
            for x in 0..new_width {
                let src_x = ((x as f32 / scale) as u32).min(self.width - 1);
                let src = ((src_y * self.width + src_x) * 3) as usize;
                let dst = ((y * new_width + x) * 3) as usize;
                data[dst..dst + 3].copy_from_slice(&self.data[src..src + 3]);
            }
        }
        Frame {
            data,
            width: new_width,
            height: new_height,
            captured_at: self.captured_at,
            seq: self.seq,
        }
    }
}

/// Encode a frame as JPEG for offline inspection.
#[cfg(feature = "frame-dump")]
pub fn save_jpeg(frame: &Frame, path: &std::path::Path) -> anyhow::Result<()> {
    let image = image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| anyhow::anyhow!("frame buffer does not match its dimensions"))?;
    image.save_with_format(path, image::ImageFormat::Jpeg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&rgb);
        }
        Frame::new(data, width, height, 0)
    }

    #[test]
    fn pixel_roundtrip() {
        let mut frame = solid(4, 4, [0, 0, 0]);
        frame.put_pixel(2, 3, [10, 20, 30]);
        assert_eq!(frame.pixel(2, 3), [10, 20, 30]);
        assert_eq!(frame.pixel(0, 0), [0, 0, 0]);
    }

    #[test]
    fn out_of_bounds_access_is_harmless() {
        let mut frame = solid(4, 4, [1, 2, 3]);
        frame.put_pixel(100, 100, [9, 9, 9]);
        assert_eq!(frame.pixel(100, 100), [0, 0, 0]);
    }

    #[test]
    fn resize_preserves_aspect_and_content() {
        let frame = solid(1280, 720, [50, 60, 70]);
        let small = frame.resize_to_width(640);
        assert_eq!(small.width(), 640);
        assert_eq!(small.height(), 360);
        assert_eq!(small.pixel(320, 180), [50, 60, 70]);
    }

    #[test]
    fn resize_is_noop_at_or_below_target() {
        let frame = solid(320, 240, [1, 1, 1]);
        let same = frame.resize_to_width(640);
        assert_eq!(same.width(), 320);
        assert_eq!(same.height(), 240);
    }
}
