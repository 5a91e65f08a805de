//! Detection collaborator interface.
//!
//! The object-detection model is external to this crate. The core consumes
//! it through the [`Detector`] trait: one stateful detector per stream,
//! created by a [`DetectorFactory`]. Track-id stability is an explicit
//! contract: equal ids across consecutive frames denote the same physical
//! object while it remains visible. Ids are opaque, neither monotonic nor
//! small.

mod synthetic;

use anyhow::Result;

use crate::config::ModelSelector;
use crate::frame::Frame;
use crate::geometry::Point;

pub use synthetic::{
    RepeatingDetector, ScriptedDetector, ScriptedStep, SyntheticDetector,
    SyntheticDetectorFactory,
};

/// Axis-aligned bounding box in pixel space, x1 <= x2 and y1 <= y2.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Normalizing constructor: corners may arrive in any order.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// One detection produced by the collaborator for one frame.
///
/// Created fresh per frame, never mutated by the core, discarded after one
/// processing cycle apart from the trajectory point it contributes.
#[derive(Clone, Debug)]
pub struct Detection {
    pub class_label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Persistent track identifier, present when tracking is active.
    pub track_id: Option<u64>,
    pub class_index: Option<usize>,
}

/// Parameters for one detection call, derived from the camera config snapshot.
#[derive(Clone, Debug)]
pub struct DetectRequest<'a> {
    pub model: &'a ModelSelector,
    pub confidence_threshold: f32,
    /// Class allowlist; empty means all classes pass.
    pub allowed_classes: &'a [String],
    /// When set, the detector must return stable track ids.
    pub tracking: bool,
}

impl DetectRequest<'_> {
    /// Shared post-filter: confidence floor plus class allowlist.
    pub fn admits(&self, detection: &Detection) -> bool {
        if detection.confidence < self.confidence_threshold {
            return false;
        }
        self.allowed_classes.is_empty()
            || self
                .allowed_classes
                .iter()
                .any(|class| class.eq_ignore_ascii_case(&detection.class_label))
    }
}

/// Detection collaborator. Implementations may be slow (model inference);
/// the processing loop never holds a lock across this call.
pub trait Detector: Send {
    /// Collaborator identifier, for logs.
    fn name(&self) -> &str;

    /// Run detection on a frame.
    ///
    /// A failure skips the current processing cycle; the stream keeps
    /// running and retries on the next frame.
    fn detect(&mut self, frame: &Frame, request: &DetectRequest<'_>) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds one detector per stream. Detectors hold per-camera tracking
/// state, so they are never shared across streams.
pub trait DetectorFactory: Send + Sync {
    fn create(&self, model: &ModelSelector) -> Result<Box<dyn Detector>>;
}
