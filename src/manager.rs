//! Camera registry.
//!
//! `StreamManager` owns every running [`VideoStream`] and serializes
//! lifecycle operations behind one lock. Starting a camera that is already
//! running stops the old stream first, so camera ids always map to at most
//! one live pipeline.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{CameraConfig, ResourceProfile};
use crate::detect::DetectorFactory;
use crate::frame::Frame;
use crate::ingest::FrameSourceFactory;
use crate::stream::{StreamStats, VideoStream};
use crate::{CameraId, EventSink};

pub struct StreamManager {
    profile: ResourceProfile,
    sources: Arc<dyn FrameSourceFactory>,
    detectors: Arc<dyn DetectorFactory>,
    sink: Arc<dyn EventSink>,
    streams: Mutex<HashMap<CameraId, VideoStream>>,
}

impl StreamManager {
    pub fn new(
        profile: ResourceProfile,
        sources: Arc<dyn FrameSourceFactory>,
        detectors: Arc<dyn DetectorFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            profile,
            sources,
            detectors,
            sink,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or restart) the stream for a camera. An existing stream under
    /// the same id is stopped before the replacement spawns.
    pub fn start_stream(&self, camera_id: CameraId, config: CameraConfig) -> Result<()> {
        let mut streams = self.lock()?;
        if let Some(mut old) = streams.remove(&camera_id) {
            log::info!("camera {camera_id}: replacing running stream");
            old.stop();
        }
        let stream = VideoStream::spawn(
            camera_id,
            config,
            self.profile,
            Arc::clone(&self.sources),
            Arc::clone(&self.detectors),
            Arc::clone(&self.sink),
        )?;
        streams.insert(camera_id, stream);
        Ok(())
    }

    /// Stop a camera's stream. Unknown ids are a no-op.
    pub fn stop_stream(&self, camera_id: CameraId) -> Result<()> {
        let mut streams = self.lock()?;
        match streams.remove(&camera_id) {
            Some(mut stream) => {
                stream.stop();
                Ok(())
            }
            None => {
                log::debug!("camera {camera_id}: stop requested but no stream running");
                Ok(())
            }
        }
    }

    /// Apply a new configuration to a running stream. A change of source
    /// URL needs a fresh capture connection, so that case restarts the
    /// stream; everything else is swapped in-place.
    pub fn update_config(&self, camera_id: CameraId, config: CameraConfig) -> Result<()> {
        let restart = {
            let streams = self.lock()?;
            let stream = streams
                .get(&camera_id)
                .ok_or_else(|| anyhow!("camera {camera_id} has no running stream"))?;
            let url_changed = stream.source_url() != config.source_url;
            if !url_changed {
                stream.update_config(config.clone())?;
            }
            url_changed
        };
        if restart {
            log::info!("camera {camera_id}: source url changed, restarting stream");
            self.start_stream(camera_id, config)?;
        }
        Ok(())
    }

    /// Latest annotated frame for a camera, if any has been produced.
    pub fn get_frame(&self, camera_id: CameraId) -> Option<Frame> {
        self.lock().ok()?.get(&camera_id)?.frame()
    }

    /// Latest unannotated frame for a camera.
    pub fn get_raw_frame(&self, camera_id: CameraId) -> Option<Frame> {
        self.lock().ok()?.get(&camera_id)?.raw_frame()
    }

    pub fn stream_stats(&self, camera_id: CameraId) -> Option<StreamStats> {
        Some(self.lock().ok()?.get(&camera_id)?.stats())
    }

    /// Ids of all registered cameras, sorted.
    pub fn active_cameras(&self) -> Vec<CameraId> {
        let Ok(streams) = self.lock() else {
            return Vec::new();
        };
        let mut ids: Vec<CameraId> = streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_running(&self, camera_id: CameraId) -> bool {
        self.lock()
            .ok()
            .and_then(|streams| streams.get(&camera_id).map(|s| s.is_running()))
            .unwrap_or(false)
    }

    /// Stop every stream. Called on daemon shutdown.
    pub fn shutdown(&self) {
        let Ok(mut streams) = self.lock() else {
            return;
        };
        let count = streams.len();
        for (_, mut stream) in streams.drain() {
            stream.stop();
        }
        log::info!("stream manager shut down ({count} streams)");
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CameraId, VideoStream>>> {
        self.streams
            .lock()
            .map_err(|_| anyhow!("stream registry lock poisoned"))
    }
}
