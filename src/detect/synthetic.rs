//! Deterministic detectors for tests and demos.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{BoundingBox, DetectRequest, Detection, Detector, DetectorFactory};
use crate::config::ModelSelector;
use crate::frame::Frame;

/// One scripted step: either a set of detections or a simulated failure.
#[derive(Clone, Debug)]
pub enum ScriptedStep {
    Detections(Vec<Detection>),
    Fail(&'static str),
}

/// Replays a fixed script of per-frame detection results.
///
/// After the script runs out it returns empty result sets. The call counter
/// is shared so tests can observe how many cycles actually ran detection.
pub struct ScriptedDetector {
    steps: VecDeque<ScriptedStep>,
    calls: Arc<AtomicU64>,
}

impl ScriptedDetector {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: steps.into(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Script that emits the same detections every frame, forever.
    pub fn repeating(detections: Vec<Detection>) -> RepeatingDetector {
        RepeatingDetector {
            detections,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.calls)
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame, request: &DetectRequest<'_>) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.steps.pop_front() {
            Some(ScriptedStep::Detections(detections)) => Ok(detections
                .into_iter()
                .filter(|d| request.admits(d))
                .collect()),
            Some(ScriptedStep::Fail(reason)) => Err(anyhow!("scripted failure: {reason}")),
            None => Ok(Vec::new()),
        }
    }
}

/// Emits the same detections every call. See [`ScriptedDetector::repeating`].
pub struct RepeatingDetector {
    detections: Vec<Detection>,
    calls: Arc<AtomicU64>,
}

impl RepeatingDetector {
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.calls)
    }
}

impl Detector for RepeatingDetector {
    fn name(&self) -> &str {
        "repeating"
    }

    fn detect(&mut self, _frame: &Frame, request: &DetectRequest<'_>) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .detections
            .iter()
            .filter(|d| request.admits(d))
            .cloned()
            .collect())
    }
}

/// Synthetic detector that walks one "person" straight down the frame,
/// wrapping back to the top with a fresh track id.
///
/// Paired with a `stub://` source this exercises the whole pipeline:
/// ROI containment, line crossings with stable track ids, heatmap growth.
pub struct SyntheticDetector {
    frame_index: u64,
    track_id: u64,
    step_px: f32,
}

impl SyntheticDetector {
    pub fn new() -> Self {
        Self {
            frame_index: 0,
            track_id: 1,
            step_px: 8.0,
        }
    }
}

impl Default for SyntheticDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for SyntheticDetector {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn detect(&mut self, frame: &Frame, request: &DetectRequest<'_>) -> Result<Vec<Detection>> {
        let height = frame.height() as f32;
        let travel = height + 80.0;
        let offset = (self.frame_index as f32 * self.step_px) % travel;
        if self.frame_index > 0 && offset < self.step_px {
            // Wrapped around: a new object enters the scene.
            self.track_id += 1;
        }
        self.frame_index += 1;

        let cx = frame.width() as f32 / 2.0;
        let cy = offset - 40.0;
        let detection = Detection {
            class_label: "person".to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(cx - 25.0, cy - 40.0, cx + 25.0, cy + 40.0),
            track_id: request.tracking.then_some(self.track_id),
            class_index: Some(0),
        };
        Ok(if request.admits(&detection) {
            vec![detection]
        } else {
            Vec::new()
        })
    }
}

/// Factory used by the daemon when no real model integration is wired in.
pub struct SyntheticDetectorFactory;

impl DetectorFactory for SyntheticDetectorFactory {
    fn create(&self, model: &ModelSelector) -> Result<Box<dyn Detector>> {
        if model.is_raw() {
            return Err(anyhow!("raw streams bypass detection; no detector to create"));
        }
        Ok(Box::new(SyntheticDetector::new()))
    }
}
