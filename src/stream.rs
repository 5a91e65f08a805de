//! Per-camera capture and processing loops.
//!
//! A `VideoStream` owns two threads:
//!
//! - The capture loop pulls frames from the source as fast as it delivers
//!   them and overwrites a single-slot register, so the processing loop
//!   always starts from the freshest frame and backlog can never build up.
//! - The processing loop drains the register, runs detection, evaluates ROI
//!   violations and line crossings, maintains the heatmap, and publishes
//!   the annotated and raw frames.
//!
//! Locks guard only the register, the output slots and the config snapshot.
//! No lock is held across a detection call or a source read.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::annotate;
use crate::config::{parse_hex_color, CameraConfig, ResourceProfile};
use crate::crossing::{LineCounters, LineCrossingDetector};
use crate::detect::{DetectRequest, Detection, Detector, DetectorFactory};
use crate::frame::Frame;
use crate::heatmap::HeatmapField;
use crate::ingest::{FrameSource, FrameSourceFactory, RtspConfig};
use crate::roi;
use crate::{CameraId, EventSink, ViolationEvent};

/// Consecutive read failures before the capture loop drops the source and
/// reconnects.
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 10;

/// Pause between dropping a failed source and reopening it.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Read and connect failures since the last good frame before the stream
/// gives up and marks itself offline. A successful read resets the count,
/// so transient glitches are retried indefinitely.
const MAX_TOTAL_FAILURES: u32 = 100;

/// Pause after a failed read that does not yet trigger a reconnect.
const READ_FAILURE_PAUSE: Duration = Duration::from_millis(1);

/// Capture rate is logged every this many frames.
const FPS_LOG_INTERVAL_FRAMES: u64 = 60;

/// How long `stop` waits for the loops before detaching them.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Processing loop idle sleep while the register is empty.
const EMPTY_REGISTER_SLEEP: Duration = Duration::from_millis(5);

/// Heatmap overlay blend weight.
const HEATMAP_ALPHA: f32 = 0.5;

/// Point-in-time stream statistics.
#[derive(Clone, Debug, Default)]
pub struct StreamStats {
    pub camera_id: CameraId,
    /// Cycles that produced a new annotated frame.
    pub frames_processed: u64,
    pub violations_emitted: u64,
    pub crossings_emitted: u64,
    /// Latest people count in the first ROI, when counting is enabled.
    pub people_in_first_roi: usize,
    pub line_counters: HashMap<u32, LineCounters>,
    pub offline: bool,
}

#[derive(Default)]
struct FrameSlots {
    annotated: Option<Frame>,
    raw: Option<Frame>,
}

#[derive(Clone, Default)]
struct StatsInner {
    frames_processed: u64,
    violations_emitted: u64,
    crossings_emitted: u64,
    people_in_first_roi: usize,
    line_counters: HashMap<u32, LineCounters>,
}

struct Shared {
    camera_id: CameraId,
    running: AtomicBool,
    offline: AtomicBool,
    /// Single-slot register between capture and processing.
    captured: Mutex<Option<Frame>>,
    slots: Mutex<FrameSlots>,
    config: Mutex<Arc<CameraConfig>>,
    stats: Mutex<StatsInner>,
}

/// One running camera pipeline.
pub struct VideoStream {
    shared: Arc<Shared>,
    capture: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<()>>,
}

impl VideoStream {
    /// Validate the config, build the detector and start both loops.
    pub fn spawn(
        camera_id: CameraId,
        config: CameraConfig,
        profile: ResourceProfile,
        sources: Arc<dyn FrameSourceFactory>,
        detectors: Arc<dyn DetectorFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let snapshot = config.into_snapshot()?;
        let detector = if snapshot.model.is_raw() {
            None
        } else {
            Some(detectors.create(&snapshot.model)?)
        };

        let shared = Arc::new(Shared {
            camera_id,
            running: AtomicBool::new(true),
            offline: AtomicBool::new(false),
            captured: Mutex::new(None),
            slots: Mutex::new(FrameSlots::default()),
            config: Mutex::new(Arc::clone(&snapshot)),
            stats: Mutex::new(StatsInner::default()),
        });

        let capture = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("capture-{camera_id}"))
                .spawn(move || capture_loop(shared, profile, sources))?
        };
        let processing = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("process-{camera_id}"))
                .spawn(move || processing_loop(shared, profile, detector, sink))?
        };

        log::info!("camera {camera_id}: stream started ({})", snapshot.source_url);
        Ok(Self {
            shared,
            capture: Some(capture),
            processing: Some(processing),
        })
    }

    pub fn camera_id(&self) -> CameraId {
        self.shared.camera_id
    }

    /// Source URL from the current config snapshot.
    pub fn source_url(&self) -> String {
        self.shared
            .config
            .lock()
            .map(|config| config.source_url.clone())
            .unwrap_or_default()
    }

    /// Latest annotated frame, if the pipeline has produced one yet.
    pub fn frame(&self) -> Option<Frame> {
        self.shared.slots.lock().ok()?.annotated.clone()
    }

    /// Latest unannotated frame.
    pub fn raw_frame(&self) -> Option<Frame> {
        self.shared.slots.lock().ok()?.raw.clone()
    }

    /// True once the capture loop has exhausted its failure budget.
    pub fn is_offline(&self) -> bool {
        self.shared.offline.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Swap in a new configuration snapshot. The processing loop picks it
    /// up at its next cycle; analytics state tied to the old zone layout is
    /// discarded there.
    pub fn update_config(&self, config: CameraConfig) -> Result<()> {
        let snapshot = config.into_snapshot()?;
        if let Ok(mut current) = self.shared.config.lock() {
            *current = snapshot;
        }
        log::info!("camera {}: configuration updated", self.shared.camera_id);
        Ok(())
    }

    pub fn stats(&self) -> StreamStats {
        let inner = self
            .shared
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        StreamStats {
            camera_id: self.shared.camera_id,
            frames_processed: inner.frames_processed,
            violations_emitted: inner.violations_emitted,
            crossings_emitted: inner.crossings_emitted,
            people_in_first_roi: inner.people_in_first_roi,
            line_counters: inner.line_counters,
            offline: self.is_offline(),
        }
    }

    /// Signal both loops and wait for them, bounded by the join timeout.
    /// A loop stuck in a blocking source read is detached, not waited on.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        for handle in [self.capture.take(), self.processing.take()].into_iter().flatten() {
            let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::error!("camera {}: worker thread panicked", self.shared.camera_id);
                }
            } else {
                log::warn!(
                    "camera {}: worker did not stop within {:?}, detaching",
                    self.shared.camera_id,
                    STOP_JOIN_TIMEOUT
                );
            }
        }
        log::info!("camera {}: stream stopped", self.shared.camera_id);
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        // Loops observe the flag and exit on their own; drop never blocks.
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Capture loop
// ----------------------------------------------------------------------------

fn capture_loop(
    shared: Arc<Shared>,
    profile: ResourceProfile,
    sources: Arc<dyn FrameSourceFactory>,
) {
    let camera_id = shared.camera_id;
    let mut total_failures: u32 = 0;

    'reconnect: while shared.running.load(Ordering::SeqCst) {
        let source_config = {
            let Ok(config) = shared.config.lock() else {
                break;
            };
            RtspConfig {
                url: config.source_url.clone(),
                target_fps: profile.target_fps(true),
                ..RtspConfig::default()
            }
        };

        let mut source = match open_and_connect(&*sources, &source_config) {
            Ok(source) => source,
            Err(e) => {
                total_failures += 1;
                if give_up(&shared, total_failures) {
                    return;
                }
                log::warn!("camera {camera_id}: connect failed: {e:#}");
                std::thread::sleep(RECONNECT_PAUSE);
                continue;
            }
        };

        let mut consecutive_failures: u32 = 0;
        let mut frames_since_log: u64 = 0;
        let mut log_window_start = Instant::now();

        while shared.running.load(Ordering::SeqCst) {
            match source.next_frame() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    total_failures = 0;
                    if let Ok(mut slot) = shared.captured.lock() {
                        *slot = Some(frame);
                    }

                    frames_since_log += 1;
                    if frames_since_log >= FPS_LOG_INTERVAL_FRAMES {
                        let elapsed = log_window_start.elapsed().as_secs_f64();
                        if elapsed > 0.0 {
                            log::info!(
                                "camera {camera_id}: capturing at {:.1} fps",
                                frames_since_log as f64 / elapsed
                            );
                        }
                        frames_since_log = 0;
                        log_window_start = Instant::now();
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    total_failures += 1;
                    log::debug!(
                        "camera {camera_id}: frame read failed ({consecutive_failures} consecutive): {e:#}"
                    );
                    if give_up(&shared, total_failures) {
                        return;
                    }
                    if consecutive_failures > MAX_CONSECUTIVE_READ_FAILURES {
                        log::warn!(
                            "camera {camera_id}: {consecutive_failures} consecutive read failures, reconnecting"
                        );
                        drop(source);
                        std::thread::sleep(RECONNECT_PAUSE);
                        continue 'reconnect;
                    }
                    std::thread::sleep(READ_FAILURE_PAUSE);
                }
            }
        }
        return;
    }
}

fn open_and_connect(
    sources: &dyn FrameSourceFactory,
    config: &RtspConfig,
) -> Result<Box<dyn FrameSource>> {
    let mut source = sources.open(config)?;
    source.connect()?;
    Ok(source)
}

fn give_up(shared: &Shared, total_failures: u32) -> bool {
    if total_failures <= MAX_TOTAL_FAILURES {
        return false;
    }
    log::error!(
        "camera {}: failure budget exhausted ({total_failures} failures), stream offline",
        shared.camera_id
    );
    shared.offline.store(true, Ordering::SeqCst);
    shared.running.store(false, Ordering::SeqCst);
    true
}

// ----------------------------------------------------------------------------
// Processing loop
// ----------------------------------------------------------------------------

/// Analytics state owned by the processing loop. Rebuilt whenever the
/// config snapshot is replaced, since zone layouts may have changed.
struct Analytics {
    crossings: LineCrossingDetector,
    heatmap: Option<HeatmapField>,
    /// Last alert instant per (class, roi-name) for violation debounce.
    last_alert: HashMap<(String, String), Instant>,
}

impl Analytics {
    fn new() -> Self {
        Self {
            crossings: LineCrossingDetector::new(),
            heatmap: None,
            last_alert: HashMap::new(),
        }
    }
}

fn processing_loop(
    shared: Arc<Shared>,
    profile: ResourceProfile,
    mut detector: Option<Box<dyn Detector>>,
    sink: Arc<dyn EventSink>,
) {
    let camera_id = shared.camera_id;

    if let Some(detector) = detector.as_mut() {
        if let Err(e) = detector.warm_up() {
            log::warn!("camera {camera_id}: detector warm-up failed: {e:#}");
        }
    }

    let mut analytics = Analytics::new();
    let mut current_config = {
        let Ok(config) = shared.config.lock() else {
            return;
        };
        Arc::clone(&*config)
    };
    let mut cycle: u64 = 0;

    while shared.running.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();

        // Pick up config swaps; zone layout changes invalidate trajectories,
        // debounce history and the heatmap.
        {
            let Ok(config) = shared.config.lock() else {
                return;
            };
            if !Arc::ptr_eq(&*config, &current_config) {
                current_config = Arc::clone(&*config);
                analytics = Analytics::new();
                log::info!("camera {camera_id}: analytics state reset after config update");
            }
        }
        let config = Arc::clone(&current_config);

        let frame = match shared.captured.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => return,
        };
        let Some(frame) = frame else {
            std::thread::sleep(EMPTY_REGISTER_SLEEP);
            continue;
        };

        let raw_stream = config.model.is_raw();
        if raw_stream {
            if let Ok(mut slots) = shared.slots.lock() {
                slots.annotated = Some(frame.clone());
                slots.raw = Some(frame);
            }
            if let Ok(mut stats) = shared.stats.lock() {
                stats.frames_processed += 1;
            }
            pace(profile.target_fps(true), cycle_start);
            continue;
        }

        cycle += 1;

        // Throttled profile: run detection only on every Kth frame, reuse
        // the previous annotated output for the rest. Raw keeps updating.
        if cycle % profile.frame_skip() != 0 {
            if let Ok(mut slots) = shared.slots.lock() {
                slots.raw = Some(frame);
            }
            pace(profile.target_fps(false), cycle_start);
            continue;
        }

        let detections = match run_detection(detector.as_mut(), &frame, &config, profile) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("camera {camera_id}: detection failed, skipping cycle: {e:#}");
                if let Ok(mut slots) = shared.slots.lock() {
                    slots.raw = Some(frame);
                }
                pace(profile.target_fps(false), cycle_start);
                continue;
            }
        };

        let raw = frame.clone();
        let mut annotated = frame;

        let violations = evaluate_violations(&detections, &config, &mut analytics.last_alert);
        for violation in &violations {
            sink.on_violation(camera_id, violation);
        }

        let display = roi::filter_for_display(&detections, &config.rois, config.roi_enabled);
        let people = if config.enable_people_counting {
            roi::count_people_in_first_roi(&detections, &config.rois)
        } else {
            0
        };

        let crossing_events = analytics.crossings.observe(&detections, &config.line_zones);
        for event in &crossing_events {
            sink.on_crossing(camera_id, event);
        }

        annotate::draw_rois(&mut annotated, &config.rois);
        annotate::draw_line_zones(&mut annotated, &config.line_zones);
        annotate::draw_detections(&mut annotated, &display, parse_hex_color("#00FF00"));
        for event in &crossing_events {
            annotate::draw_crossing_marker(&mut annotated, event.crossing_point);
        }

        if config.heatmap_enabled {
            let needs_field = analytics
                .heatmap
                .as_ref()
                .map(|f| f.width() != annotated.width() || f.height() != annotated.height())
                .unwrap_or(true);
            if needs_field {
                match HeatmapField::new(annotated.width(), annotated.height()) {
                    Ok(field) => analytics.heatmap = Some(field),
                    Err(e) => log::warn!("camera {camera_id}: heatmap init failed: {e:#}"),
                }
            }
            if let Some(field) = analytics.heatmap.as_mut() {
                field.update(&detections);
                field.render_overlay(&mut annotated, HEATMAP_ALPHA);
            }
        } else if analytics.heatmap.is_some() {
            analytics.heatmap = None;
        }

        if let Ok(mut slots) = shared.slots.lock() {
            slots.annotated = Some(annotated);
            slots.raw = Some(raw);
        }
        if let Ok(mut stats) = shared.stats.lock() {
            stats.frames_processed += 1;
            stats.violations_emitted += violations.len() as u64;
            stats.crossings_emitted += crossing_events.len() as u64;
            stats.people_in_first_roi = people;
            for event in &crossing_events {
                stats
                    .line_counters
                    .entry(event.line_id)
                    .or_default()
                    .record(event.direction);
            }
        }

        pace(profile.target_fps(false), cycle_start);
    }
}

/// Run the detection collaborator, downscaling first under the throttled
/// profile and mapping boxes back to full resolution.
fn run_detection(
    detector: Option<&mut Box<dyn Detector>>,
    frame: &Frame,
    config: &CameraConfig,
    profile: ResourceProfile,
) -> Result<Vec<Detection>> {
    let Some(detector) = detector else {
        return Ok(Vec::new());
    };
    let request = DetectRequest {
        model: &config.model,
        confidence_threshold: config.confidence_threshold,
        allowed_classes: &config.allowed_classes,
        tracking: !config.line_zones.is_empty(),
    };

    match profile.detect_width() {
        Some(width) if frame.width() > width => {
            let small = frame.resize_to_width(width);
            let scale = frame.width() as f32 / small.width() as f32;
            let mut detections = detector.detect(&small, &request)?;
            for detection in &mut detections {
                detection.bbox = crate::detect::BoundingBox::new(
                    detection.bbox.x1 * scale,
                    detection.bbox.y1 * scale,
                    detection.bbox.x2 * scale,
                    detection.bbox.y2 * scale,
                );
            }
            Ok(detections)
        }
        _ => detector.detect(frame, &request),
    }
}

/// Evaluate ROI violations with per-(class, ROI) debounce. Always-alert
/// classes are debounced under a shared pseudo-ROI so they fire anywhere
/// in the frame, at most once per interval.
fn evaluate_violations(
    detections: &[Detection],
    config: &CameraConfig,
    last_alert: &mut HashMap<(String, String), Instant>,
) -> Vec<ViolationEvent> {
    let mut events = Vec::new();
    if !config.alerts_enabled {
        return events;
    }
    let interval = Duration::from_secs(config.detection_interval_secs);
    let now = Instant::now();

    let mut due = |class: &str, roi_name: &str| -> bool {
        let key = (class.to_string(), roi_name.to_string());
        match last_alert.get(&key) {
            Some(last) if now.duration_since(*last) < interval => false,
            _ => {
                last_alert.insert(key, now);
                true
            }
        }
    };

    for detection in detections {
        if roi::is_always_alert_class(&detection.class_label) {
            if due(&detection.class_label, "*") {
                events.push(ViolationEvent {
                    violation_type: "always_alert",
                    object_class: detection.class_label.clone(),
                    confidence: detection.confidence,
                    bbox: detection.bbox,
                    roi_name: None,
                });
            }
            continue;
        }

        for zone in &config.rois {
            if !zone.is_active || !zone.alert_enabled {
                continue;
            }
            if !roi::roi_contains(zone, &detection.bbox) {
                continue;
            }
            if due(&detection.class_label, &zone.name) {
                events.push(ViolationEvent {
                    violation_type: "roi_intrusion",
                    object_class: detection.class_label.clone(),
                    confidence: detection.confidence,
                    bbox: detection.bbox,
                    roi_name: Some(zone.name.clone()),
                });
            }
        }
    }

    events
}

/// Sleep out the remainder of the cycle interval, if any.
fn pace(target_fps: u32, cycle_start: Instant) {
    let fps = target_fps.max(1);
    let interval = Duration::from_secs(1) / fps;
    let elapsed = cycle_start.elapsed();
    if elapsed < interval {
        std::thread::sleep(interval - elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelSelector, RoiConfig};
    use crate::detect::BoundingBox;

    fn person_at(x: f32, y: f32) -> Detection {
        Detection {
            class_label: "person".into(),
            confidence: 0.9,
            bbox: BoundingBox::new(x - 10.0, y - 10.0, x + 10.0, y + 10.0),
            track_id: Some(1),
            class_index: None,
        }
    }

    fn config_with_roi() -> CameraConfig {
        let mut config = CameraConfig::for_source("stub://cam");
        config.rois.push(RoiConfig {
            id: 1,
            name: "dock".into(),
            coordinates: vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            color: "#00FF00".into(),
            is_active: true,
            alert_enabled: true,
        });
        config
    }

    #[test]
    fn repeated_violations_are_debounced() {
        let config = config_with_roi();
        let mut last_alert = HashMap::new();
        let detections = vec![person_at(50.0, 50.0)];

        let first = evaluate_violations(&detections, &config, &mut last_alert);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].violation_type, "roi_intrusion");
        assert_eq!(first[0].roi_name.as_deref(), Some("dock"));

        // Same class, same ROI, inside the interval: suppressed.
        let second = evaluate_violations(&detections, &config, &mut last_alert);
        assert!(second.is_empty());
    }

    #[test]
    fn distinct_classes_debounce_independently() {
        let config = config_with_roi();
        let mut last_alert = HashMap::new();
        let mut car = person_at(50.0, 50.0);
        car.class_label = "car".into();

        assert_eq!(
            evaluate_violations(&[person_at(50.0, 50.0)], &config, &mut last_alert).len(),
            1
        );
        assert_eq!(evaluate_violations(&[car], &config, &mut last_alert).len(), 1);
    }

    #[test]
    fn always_alert_classes_fire_outside_rois() {
        let config = config_with_roi();
        let mut last_alert = HashMap::new();
        let mut fire = person_at(500.0, 500.0);
        fire.class_label = "fire".into();

        let events = evaluate_violations(std::slice::from_ref(&fire), &config, &mut last_alert);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].violation_type, "always_alert");
        assert!(events[0].roi_name.is_none());

        // Debounced like everything else.
        let repeat = evaluate_violations(&[fire], &config, &mut last_alert);
        assert!(repeat.is_empty());
    }

    #[test]
    fn alerts_disabled_suppresses_everything() {
        let mut config = config_with_roi();
        config.alerts_enabled = false;
        let mut last_alert = HashMap::new();
        let events =
            evaluate_violations(&[person_at(50.0, 50.0)], &config, &mut last_alert);
        assert!(events.is_empty());
    }

    #[test]
    fn raw_model_needs_no_detector() {
        let mut config = CameraConfig::for_source("stub://cam");
        config.model = ModelSelector::Raw;
        let detections =
            run_detection(None, &Frame::new(vec![0; 12], 2, 2, 0), &config, ResourceProfile::Gpu)
                .unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn downscaled_detections_are_mapped_back() {
        struct FixedDetector;
        impl Detector for FixedDetector {
            fn name(&self) -> &str {
                "fixed"
            }
            fn detect(
                &mut self,
                frame: &Frame,
                _request: &DetectRequest<'_>,
            ) -> Result<Vec<Detection>> {
                // Reported in the detector's own (downscaled) coordinates.
                assert_eq!(frame.width(), 640);
                Ok(vec![person_at(320.0, 240.0)])
            }
        }

        let config = CameraConfig::for_source("stub://cam");
        let frame = Frame::new(vec![0u8; 1280 * 960 * 3], 1280, 960, 0);
        let mut detector: Box<dyn Detector> = Box::new(FixedDetector);
        let detections =
            run_detection(Some(&mut detector), &frame, &config, ResourceProfile::Cpu).unwrap();
        let center = detections[0].bbox.center();
        assert!((center.x - 640.0).abs() < 1.0);
        assert!((center.y - 480.0).abs() < 1.0);
    }
}
