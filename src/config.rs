//! Typed camera and daemon configuration.
//!
//! Configuration enters the core through this boundary only: recognized
//! fields with explicit defaults, validated before any stream sees them.
//! A running stream treats its `CameraConfig` as an immutable snapshot,
//! swapped atomically by `update_config`.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::geometry::Point;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.31;
const DEFAULT_DETECTION_INTERVAL_SECS: u64 = 5;
const DEFAULT_MODEL: &str = "general_detection";
const DEFAULT_COLOR: &str = "#00FF00";

/// Detection model selector. `Raw` is the explicit zero-overhead bypass:
/// the stream skips the detection collaborator entirely.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ModelSelector {
    Raw,
    Named(String),
}

impl From<String> for ModelSelector {
    fn from(value: String) -> Self {
        match value.as_str() {
            "raw" | "raw_stream" => ModelSelector::Raw,
            _ => ModelSelector::Named(value),
        }
    }
}

impl Default for ModelSelector {
    fn default() -> Self {
        ModelSelector::Named(DEFAULT_MODEL.to_string())
    }
}

impl ModelSelector {
    pub fn is_raw(&self) -> bool {
        matches!(self, ModelSelector::Raw)
    }

    pub fn name(&self) -> &str {
        match self {
            ModelSelector::Raw => "raw",
            ModelSelector::Named(name) => name,
        }
    }
}

/// Resource profile for the processing loop pacing policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceProfile {
    Gpu,
    #[default]
    Cpu,
}

impl ResourceProfile {
    /// Target processing cadence in Hz. Raw bypass streams run faster under
    /// the throttled profile because they skip inference.
    pub fn target_fps(&self, raw_stream: bool) -> u32 {
        match self {
            ResourceProfile::Gpu => 60,
            ResourceProfile::Cpu => {
                if raw_stream {
                    40
                } else {
                    25
                }
            }
        }
    }

    /// Process only every Kth frame under the throttled profile, reusing
    /// the last annotated frame for skipped cycles.
    pub fn frame_skip(&self) -> u64 {
        match self {
            ResourceProfile::Gpu => 1,
            ResourceProfile::Cpu => 2,
        }
    }

    /// Downscale target before the detection call, when set.
    pub fn detect_width(&self) -> Option<u32> {
        match self {
            ResourceProfile::Gpu => None,
            ResourceProfile::Cpu => Some(640),
        }
    }
}

/// Counting-direction filter for a line-crossing zone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountDirection {
    #[default]
    Both,
    Up,
    Down,
    Left,
    Right,
}

/// Region of interest: a simple polygon in pixel space.
#[derive(Clone, Debug, Deserialize)]
pub struct RoiConfig {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    /// Ordered vertex list, at least 3 points.
    pub coordinates: Vec<(f32, f32)>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub alert_enabled: bool,
}

impl RoiConfig {
    pub fn vertices(&self) -> Vec<Point> {
        self.coordinates.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }
}

/// Line-crossing zone: two endpoints plus a direction filter.
///
/// The `count_in`/`count_out` counters live with the event consumer
/// (the stream), not here: the config is an immutable snapshot.
#[derive(Clone, Debug, Deserialize)]
pub struct LineZoneConfig {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    /// Exactly two endpoints.
    pub coordinates: Vec<(f32, f32)>,
    #[serde(default)]
    pub count_direction: CountDirection,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub alert_enabled: bool,
}

impl LineZoneConfig {
    /// Endpoints as points; `None` when the zone is malformed.
    pub fn endpoints(&self) -> Option<(Point, Point)> {
        if self.coordinates.len() != 2 {
            return None;
        }
        Some((self.coordinates[0].into(), self.coordinates[1].into()))
    }
}

/// Per-camera runtime configuration snapshot.
#[derive(Clone, Debug, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub name: String,
    /// Video source URL: `stub://...` for the synthetic source, an RTSP URL
    /// for IP cameras (requires the rtsp-gstreamer feature).
    pub source_url: String,
    #[serde(default)]
    pub model: ModelSelector,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    /// Class allowlist passed to the detector; empty means all classes.
    #[serde(default)]
    pub allowed_classes: Vec<String>,
    #[serde(default)]
    pub rois: Vec<RoiConfig>,
    /// When set, only detections inside an active ROI are kept for display.
    #[serde(default)]
    pub roi_enabled: bool,
    #[serde(default)]
    pub line_zones: Vec<LineZoneConfig>,
    #[serde(default)]
    pub heatmap_enabled: bool,
    /// Debounce window for repeated violations of the same (class, ROI).
    #[serde(default = "default_detection_interval")]
    pub detection_interval_secs: u64,
    #[serde(default)]
    pub enable_people_counting: bool,
    #[serde(default = "default_true")]
    pub alerts_enabled: bool,
}

impl CameraConfig {
    /// Minimal config for a camera with no zones configured.
    pub fn for_source(source_url: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            source_url: source_url.into(),
            model: ModelSelector::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            allowed_classes: Vec::new(),
            rois: Vec::new(),
            roi_enabled: false,
            line_zones: Vec::new(),
            heatmap_enabled: false,
            detection_interval_secs: DEFAULT_DETECTION_INTERVAL_SECS,
            enable_people_counting: false,
            alerts_enabled: true,
        }
    }

    /// Validate a config at the boundary, before it enters the core.
    pub fn validate(&self) -> Result<()> {
        if self.source_url.trim().is_empty() {
            return Err(anyhow!("camera source_url must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        for roi in &self.rois {
            if roi.coordinates.len() < 3 {
                return Err(anyhow!(
                    "roi {} needs at least 3 vertices, got {}",
                    roi.id,
                    roi.coordinates.len()
                ));
            }
        }
        for zone in &self.line_zones {
            if zone.coordinates.len() != 2 {
                return Err(anyhow!(
                    "line zone {} needs exactly 2 endpoints, got {}",
                    zone.id,
                    zone.coordinates.len()
                ));
            }
            if zone.coordinates[0] == zone.coordinates[1] {
                return Err(anyhow!("line zone {} endpoints must be distinct", zone.id));
            }
        }
        Ok(())
    }

    /// Validated, shareable snapshot for the processing loop.
    pub fn into_snapshot(self) -> Result<Arc<CameraConfig>> {
        self.validate()?;
        Ok(Arc::new(self))
    }
}

fn default_confidence() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_detection_interval() -> u64 {
    DEFAULT_DETECTION_INTERVAL_SECS
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_true() -> bool {
    true
}

/// Parse "#RRGGBB" into an RGB triple. Malformed values yield the default
/// overlay green rather than an error.
pub fn parse_hex_color(value: &str) -> [u8; 3] {
    let hex = value.trim_start_matches('#');
    if hex.len() != 6 {
        return [0, 255, 0];
    }
    let parse = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16);
    match (parse(0..2), parse(2..4), parse(4..6)) {
        (Ok(r), Ok(g), Ok(b)) => [r, g, b],
        _ => [0, 255, 0],
    }
}

// ----------------------------------------------------------------------------
// Daemon configuration (sightlined)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DaemonConfigFile {
    profile: Option<ResourceProfile>,
    #[serde(default)]
    cameras: Vec<CameraEntryFile>,
}

#[derive(Debug, Deserialize)]
struct CameraEntryFile {
    id: u32,
    #[serde(flatten)]
    camera: CameraConfig,
}

/// Daemon configuration: the set of cameras to run plus the resource profile.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub profile: ResourceProfile,
    pub cameras: Vec<(u32, CameraConfig)>,
}

impl DaemonConfig {
    /// Load from a TOML file, apply env overrides, validate every camera.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
        let file: DaemonConfigFile = toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;

        let mut profile = file.profile.unwrap_or_default();
        if let Ok(value) = std::env::var("SIGHTLINE_PROFILE") {
            profile = match value.trim().to_lowercase().as_str() {
                "gpu" => ResourceProfile::Gpu,
                "cpu" => ResourceProfile::Cpu,
                "" => profile,
                other => return Err(anyhow!("SIGHTLINE_PROFILE must be gpu or cpu, got {other}")),
            };
        }

        let mut cameras = Vec::with_capacity(file.cameras.len());
        for entry in file.cameras {
            entry
                .camera
                .validate()
                .map_err(|e| anyhow!("camera {}: {}", entry.id, e))?;
            if cameras.iter().any(|(id, _)| *id == entry.id) {
                return Err(anyhow!("duplicate camera id {}", entry.id));
            }
            cameras.push((entry.id, entry.camera));
        }

        Ok(Self { profile, cameras })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_config_defaults() {
        let cfg: CameraConfig = toml::from_str(r#"source_url = "stub://cam""#).unwrap();
        assert_eq!(cfg.model, ModelSelector::Named("general_detection".into()));
        assert!((cfg.confidence_threshold - 0.31).abs() < 1e-6);
        assert_eq!(cfg.detection_interval_secs, 5);
        assert!(!cfg.heatmap_enabled);
        assert!(cfg.alerts_enabled);
        cfg.validate().unwrap();
    }

    #[test]
    fn raw_model_selector_parses() {
        let cfg: CameraConfig =
            toml::from_str("source_url = \"stub://cam\"\nmodel = \"raw\"").unwrap();
        assert!(cfg.model.is_raw());
        let legacy: CameraConfig =
            toml::from_str("source_url = \"stub://cam\"\nmodel = \"raw_stream\"").unwrap();
        assert!(legacy.model.is_raw());
    }

    #[test]
    fn validation_rejects_bad_confidence() {
        let mut cfg = CameraConfig::for_source("stub://cam");
        cfg.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_degenerate_zones() {
        let mut cfg = CameraConfig::for_source("stub://cam");
        cfg.rois.push(RoiConfig {
            id: 1,
            name: "door".into(),
            coordinates: vec![(0.0, 0.0), (10.0, 0.0)],
            color: default_color(),
            is_active: true,
            alert_enabled: true,
        });
        assert!(cfg.validate().is_err());

        let mut cfg = CameraConfig::for_source("stub://cam");
        cfg.line_zones.push(LineZoneConfig {
            id: 1,
            name: "gate".into(),
            coordinates: vec![(5.0, 5.0), (5.0, 5.0)],
            count_direction: CountDirection::Both,
            color: default_color(),
            is_active: true,
            alert_enabled: true,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hex_colors_parse_with_fallback() {
        assert_eq!(parse_hex_color("#FF8000"), [255, 128, 0]);
        assert_eq!(parse_hex_color("00FF00"), [0, 255, 0]);
        assert_eq!(parse_hex_color("#bogus"), [0, 255, 0]);
        assert_eq!(parse_hex_color(""), [0, 255, 0]);
    }

    #[test]
    fn daemon_config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sightline.toml");
        std::fs::write(
            &path,
            r#"
profile = "gpu"

[[cameras]]
id = 1
name = "dock"
source_url = "stub://dock"
heatmap_enabled = true

[[cameras]]
id = 2
source_url = "stub://gate"
model = "raw"
"#,
        )
        .unwrap();
        let cfg = DaemonConfig::load(&path).unwrap();
        assert_eq!(cfg.profile, ResourceProfile::Gpu);
        assert_eq!(cfg.cameras.len(), 2);
        assert!(cfg.cameras[1].1.model.is_raw());
    }

    #[test]
    fn daemon_config_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sightline.toml");
        std::fs::write(
            &path,
            r#"
[[cameras]]
id = 7
source_url = "stub://a"

[[cameras]]
id = 7
source_url = "stub://b"
"#,
        )
        .unwrap();
        assert!(DaemonConfig::load(&path).is_err());
    }
}
