//! RTSP frame source.
//!
//! `RtspSource` decodes frames from IP cameras over RTSP, with a synthetic
//! fallback for `stub://` URLs so the pipeline can run without GStreamer or
//! a physical camera. Both backends produce packed RGB frames paced at the
//! source's target rate; downstream never sees stride padding or non-RGB
//! formats.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::Result;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::Frame;

/// Configuration for one source connection.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Stream URL, `rtsp://...` or `stub://...`.
    pub url: String,
    /// Target capture rate; the source paces or decimates to this.
    pub target_fps: u32,
    /// Frame width for the synthetic backend.
    pub width: u32,
    /// Frame height for the synthetic backend.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 25,
            width: 640,
            height: 480,
        }
    }
}

/// Per-source counters, exposed through [`FrameSource::stats`].
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

/// RTSP frame source with a synthetic backend for `stub://` URLs.
pub struct RtspSource {
    backend: Backend,
}

enum Backend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: Backend::Synthetic(SyntheticSource::new(config)),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: Backend::Gstreamer(GstreamerSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!(
                    "url {:?} requires the rtsp-gstreamer feature",
                    config.url
                )
            }
        }
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            Backend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            Backend::Gstreamer(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            Backend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            Backend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            Backend::Synthetic(_) => true,
            #[cfg(feature = "rtsp-gstreamer")]
            Backend::Gstreamer(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            Backend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            Backend::Gstreamer(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

/// Deterministic scene: a shaded background with a bright block drifting
/// down the frame. Gives annotation and heatmap code something visible to
/// chew on during demos, and paces itself to the configured rate so a
/// daemon running on stubs does not spin a core.
struct SyntheticSource {
    config: RtspConfig,
    frame_count: u64,
    last_emit: Option<Instant>,
}

impl SyntheticSource {
    fn new(config: RtspConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_emit: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.pace();

        let width = self.config.width;
        let height = self.config.height;
        let mut data = vec![0u8; (width * height * 3) as usize];

        // Shaded static background.
        for y in 0..height {
            for x in 0..width {
                let idx = ((y * width + x) * 3) as usize;
                let shade = ((x / 8 + y / 8) % 2 * 24 + 32) as u8;
                data[idx] = shade;
                data[idx + 1] = shade;
                data[idx + 2] = shade;
            }
        }

        let mut frame = Frame::new(data, width, height, self.frame_count);

        // Bright block drifting top to bottom, wrapping.
        let block = 40u32;
        let travel = height + block;
        let top = ((self.frame_count * 4) % travel as u64) as i64 - block as i64;
        let left = width / 2 - block / 2;
        for dy in 0..block {
            let y = top + dy as i64;
            if y < 0 {
                continue;
            }
            for dx in 0..block {
                frame.put_pixel(left + dx, y as u32, [220, 220, 220]);
            }
        }

        self.frame_count += 1;
        self.last_emit = Some(Instant::now());
        Ok(frame)
    }

    fn pace(&mut self) {
        let fps = self.config.target_fps.max(1);
        let interval = Duration::from_secs(1) / fps;
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer backend
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSource {
    /// Pipeline: rtspsrc ! decodebin ! videoconvert ! RGB appsink. The
    /// appsink keeps at most one buffer and drops the rest, so a slow
    /// consumer always reads the latest frame instead of a backlog.
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse_launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.poll_bus();
        if let Some(error) = &self.last_error {
            anyhow::bail!("RTSP stream failed: {error}");
        }

        let sample = self
            .appsink
            .try_pull_sample(self.frame_timeout())
            .context("pull RTSP sample")?
            .ok_or_else(|| anyhow::anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        let frame = Frame::new(pixels, width, height, self.frame_count);
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            500
        } else {
            (1000 / self.config.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(Duration::from_millis(0)) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

/// Copy a sample's pixel rows into a tightly packed RGB buffer, stripping
/// any stride padding the decoder added.
#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride(0) as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> RtspConfig {
        RtspConfig {
            url: "stub://test".to_string(),
            target_fps: 100,
            width: 320,
            height: 240,
        }
    }

    #[test]
    fn stub_source_produces_frames_with_rising_sequence() -> Result<()> {
        let mut source = RtspSource::new(stub_config())?;
        source.connect()?;

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_eq!(first.width(), 320);
        assert_eq!(first.height(), 240);
        assert_eq!(first.seq() + 1, second.seq());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn stub_scene_moves_between_frames() -> Result<()> {
        let mut source = RtspSource::new(stub_config())?;
        source.connect()?;

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_ne!(first.data(), second.data());
        Ok(())
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn real_urls_need_the_gstreamer_feature() {
        let config = RtspConfig {
            url: "rtsp://camera.local/stream".to_string(),
            ..stub_config()
        };
        assert!(RtspSource::new(config).is_err());
    }
}
