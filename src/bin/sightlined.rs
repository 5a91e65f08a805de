//! sightlined - multi-camera analytics daemon
//!
//! This daemon:
//! 1. Loads the camera set from a TOML config file
//! 2. Starts one capture/processing pipeline per camera
//! 3. Logs zone violations and line-crossing events as they happen
//! 4. Emits a periodic health summary per camera
//! 5. Shuts every stream down cleanly on SIGINT/SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sightline::{
    CameraId, CrossingEvent, EventSink, RtspSourceFactory, StreamManager,
    SyntheticDetectorFactory, ViolationEvent,
};
use sightline::config::DaemonConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera video analytics daemon")]
struct Args {
    /// Path to the daemon configuration file.
    #[arg(long, env = "SIGHTLINE_CONFIG", default_value = "sightline.toml")]
    config: PathBuf,

    /// Seconds between health summary log lines.
    #[arg(long, env = "SIGHTLINE_HEALTH_INTERVAL", default_value_t = 30)]
    health_interval_secs: u64,

    /// Append analytics events to this file as JSON lines, in addition to
    /// the log output.
    #[arg(long, env = "SIGHTLINE_EVENTS_OUT")]
    events_out: Option<PathBuf>,

    /// Directory to periodically dump annotated frames into, one JPEG per
    /// camera (requires the frame-dump feature).
    #[cfg(feature = "frame-dump")]
    #[arg(long, env = "SIGHTLINE_FRAME_DUMP_DIR")]
    frame_dump_dir: Option<PathBuf>,
}

/// Sink that writes analytics events to the log, and optionally appends
/// them to a JSONL file for downstream consumers.
struct LogEventSink {
    events_out: Option<Mutex<File>>,
}

impl LogEventSink {
    fn new(events_out: Option<&PathBuf>) -> Result<Self> {
        let file = match events_out {
            Some(path) => Some(Mutex::new(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("open events file {}", path.display()))?,
            )),
            None => None,
        };
        Ok(Self { events_out: file })
    }

    fn append<E: Serialize>(&self, camera_id: CameraId, kind: &'static str, event: &E) {
        let Some(file) = &self.events_out else {
            return;
        };
        #[derive(Serialize)]
        struct Record<'a, E: Serialize> {
            camera_id: CameraId,
            kind: &'static str,
            #[serde(flatten)]
            event: &'a E,
        }
        let record = Record {
            camera_id,
            kind,
            event,
        };
        match serde_json::to_string(&record) {
            Ok(line) => {
                if let Ok(mut file) = file.lock() {
                    if let Err(e) = writeln!(file, "{line}") {
                        log::warn!("events file write failed: {e}");
                    }
                }
            }
            Err(e) => log::warn!("event serialization failed: {e}"),
        }
    }
}

impl EventSink for LogEventSink {
    fn on_violation(&self, camera_id: CameraId, event: &ViolationEvent) {
        self.append(camera_id, "violation", event);
        log::warn!(
            "camera {camera_id}: {} by {} (confidence {:.2}){}",
            event.violation_type,
            event.object_class,
            event.confidence,
            event
                .roi_name
                .as_deref()
                .map(|name| format!(" in {name}"))
                .unwrap_or_default()
        );
    }

    fn on_crossing(&self, camera_id: CameraId, event: &CrossingEvent) {
        self.append(camera_id, "crossing", event);
        log::info!(
            "camera {camera_id}: {} crossed {} ({})",
            event.object_class,
            event.line_name,
            event.direction.as_str()
        );
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = DaemonConfig::load(&args.config)
        .with_context(|| format!("load config from {}", args.config.display()))?;
    if config.cameras.is_empty() {
        log::warn!("no cameras configured in {}", args.config.display());
    }

    let manager = StreamManager::new(
        config.profile,
        Arc::new(RtspSourceFactory),
        Arc::new(SyntheticDetectorFactory),
        Arc::new(LogEventSink::new(args.events_out.as_ref())?),
    );

    for (camera_id, camera) in config.cameras {
        manager
            .start_stream(camera_id, camera)
            .with_context(|| format!("start camera {camera_id}"))?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("install signal handler")?;
    }

    log::info!(
        "sightlined {} running with profile {:?}",
        env!("CARGO_PKG_VERSION"),
        config.profile
    );

    let health_interval = Duration::from_secs(args.health_interval_secs.max(1));
    let mut last_health_log = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));

        if last_health_log.elapsed() >= health_interval {
            log_health(&manager);
            #[cfg(feature = "frame-dump")]
            if let Some(dir) = &args.frame_dump_dir {
                dump_frames(&manager, dir);
            }
            last_health_log = Instant::now();
        }
    }

    manager.shutdown();
    Ok(())
}

fn log_health(manager: &StreamManager) {
    for camera_id in manager.active_cameras() {
        let Some(stats) = manager.stream_stats(camera_id) else {
            continue;
        };
        let mut counters: Vec<String> = stats
            .line_counters
            .iter()
            .map(|(line_id, c)| format!("line {line_id}: {} in / {} out", c.count_in, c.count_out))
            .collect();
        counters.sort();
        log::info!(
            "camera {camera_id}: {} frames, {} violations, {} crossings{}{}",
            stats.frames_processed,
            stats.violations_emitted,
            stats.crossings_emitted,
            if counters.is_empty() {
                String::new()
            } else {
                format!(" [{}]", counters.join("; "))
            },
            if stats.offline { " OFFLINE" } else { "" }
        );
    }
}

#[cfg(feature = "frame-dump")]
fn dump_frames(manager: &StreamManager, dir: &std::path::Path) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        log::warn!("frame dump dir {}: {e}", dir.display());
        return;
    }
    for camera_id in manager.active_cameras() {
        let Some(frame) = manager.get_frame(camera_id) else {
            continue;
        };
        let path = dir.join(format!("camera-{camera_id}.jpg"));
        if let Err(e) = sightline::frame::save_jpeg(&frame, &path) {
            log::warn!("camera {camera_id}: frame dump failed: {e:#}");
        }
    }
}
