//! Sightline video analytics core.
//!
//! This crate implements the per-camera analytics pipeline behind a
//! multi-camera monitoring daemon.
//!
//! # Architecture
//!
//! Each camera runs two loops on dedicated threads:
//!
//! 1. **Capture**: pulls frames from the source, keeps only the latest in a
//!    single-slot register, reconnects after read-failure bursts.
//! 2. **Processing**: consumes the register, runs detection, evaluates ROI
//!    violations and line crossings, maintains the heatmap, and publishes
//!    annotated and raw frames.
//!
//! The loops share nothing but the register, the frame slots and the config
//! snapshot; analytics state (trajectories, debounce, heatmap) is owned by
//! the processing loop alone.
//!
//! # Module Structure
//!
//! - `config`: typed camera/daemon configuration
//! - `ingest`: frame sources (RTSP, stub)
//! - `detect`: detection collaborator interface
//! - `roi`, `crossing`, `heatmap`: the analytics engines
//! - `stream`, `manager`: per-camera loops and the camera registry

pub mod annotate;
pub mod config;
pub mod crossing;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod heatmap;
pub mod ingest;
pub mod manager;
pub mod roi;
pub mod stream;

pub use config::{CameraConfig, DaemonConfig, ModelSelector, ResourceProfile};
pub use crossing::{CrossingDirection, CrossingEvent, LineCounters, LineCrossingDetector};
pub use detect::{BoundingBox, Detection, Detector, DetectorFactory, SyntheticDetectorFactory};
pub use frame::Frame;
pub use heatmap::HeatmapField;
pub use ingest::{FrameSource, FrameSourceFactory, RtspConfig, RtspSource, RtspSourceFactory};
pub use manager::StreamManager;
pub use stream::{StreamStats, VideoStream};

/// Camera identifier, unique within one daemon.
pub type CameraId = u32;

/// One zone violation: a detection whose center landed in an alerting ROI,
/// or an always-alert class seen anywhere in the frame.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ViolationEvent {
    /// "roi_intrusion" or "always_alert".
    pub violation_type: &'static str,
    pub object_class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Violated ROI; `None` for always-alert classes.
    pub roi_name: Option<String>,
}

/// Consumer of analytics events. Implementations must be cheap and
/// non-blocking: the processing loop calls them inline.
pub trait EventSink: Send + Sync {
    fn on_violation(&self, camera_id: CameraId, event: &ViolationEvent);
    fn on_crossing(&self, camera_id: CameraId, event: &CrossingEvent);
}

/// Sink that discards everything.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn on_violation(&self, _camera_id: CameraId, _event: &ViolationEvent) {}
    fn on_crossing(&self, _camera_id: CameraId, _event: &CrossingEvent) {}
}
