//! Frame ingestion sources.
//!
//! Sources produce packed RGB [`Frame`]s for the capture loop:
//! - RTSP streams (IP cameras, feature: rtsp-gstreamer)
//! - Stub source (`stub://` URLs, deterministic synthetic scene)
//!
//! The capture loop owns exactly one source at a time and re-opens it
//! through a [`FrameSourceFactory`] after a run of read failures, so the
//! factory is the reconnection seam and the unit-test seam.

pub mod rtsp;

use anyhow::Result;

use crate::frame::Frame;

pub use rtsp::{RtspConfig, RtspSource, SourceStats};

/// One live connection to a camera or synthetic scene.
pub trait FrameSource: Send {
    /// Establish the connection. Must be called before the first frame.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available and return it.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Liveness signal for health logging.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Opens sources for the capture loop. A fresh source is requested on
/// every (re)connect, so implementations must not share per-connection
/// state between calls.
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self, config: &RtspConfig) -> Result<Box<dyn FrameSource>>;
}

/// Default factory: `stub://` URLs get the synthetic backend, everything
/// else goes through RTSP.
pub struct RtspSourceFactory;

impl FrameSourceFactory for RtspSourceFactory {
    fn open(&self, config: &RtspConfig) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(RtspSource::new(config.clone())?))
    }
}
