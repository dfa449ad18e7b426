//! Per-mission append-only JSONL recorder.
//!
//! Layout: `<root>/<mission-id>/<stream-name>.jsonl`, one JSON document per
//! line. Each stream file is opened lazily on its first write and kept open
//! until the mission closes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::archive::{Archiver, ForwardOutcome};
use crate::error::{GroundError, Result};

/// `strftime` pattern for generated mission ids (UTC)
pub const MISSION_ID_FORMAT: &str = "mission-%Y%m%d-%H%M%S";

const STREAM_EXTENSION: &str = "jsonl";

/// Mission id derived from a wall-clock instant
pub fn default_mission_id(now: DateTime<Utc>) -> String {
    now.format(MISSION_ID_FORMAT).to_string()
}

/// Reject names that are not a single, ordinary path component
pub fn validate_component(kind: &'static str, name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(GroundError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderOptions {
    /// `sync_data` after every record, not just a flush
    pub fsync: bool,
}

type StreamHandle = Arc<Mutex<File>>;

pub struct MissionRecorder {
    mission_id: String,
    dir: PathBuf,
    options: RecorderOptions,
    archiver: Arc<dyn Archiver>,
    streams: Mutex<HashMap<String, StreamHandle>>,
    closed: AtomicBool,
}

impl MissionRecorder {
    /// Create `<root>/<mission-id>/` and return a recorder for it.
    ///
    /// Without an explicit id one is generated from the current UTC time.
    /// An existing directory is reused and its stream files appended to.
    pub async fn open(
        root: impl AsRef<Path>,
        mission_id: Option<String>,
        archiver: Arc<dyn Archiver>,
        options: RecorderOptions,
    ) -> Result<Self> {
        let mission_id = mission_id.unwrap_or_else(|| default_mission_id(Utc::now()));
        validate_component("mission", &mission_id)?;

        let dir = root.as_ref().join(&mission_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(GroundError::io(&dir))?;

        info!(
            mission_id = %mission_id,
            dir = %dir.display(),
            fsync = options.fsync,
            forwarding = archiver.is_enabled(),
            "Mission opened"
        );

        Ok(Self {
            mission_id,
            dir,
            options,
            archiver,
            streams: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn mission_id(&self) -> &str {
        &self.mission_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stream_path(&self, stream: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", stream, STREAM_EXTENSION))
    }

    /// Names of streams with an open file, sorted
    pub async fn open_streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn handle(&self, stream: &str) -> Result<StreamHandle> {
        let mut streams = self.streams.lock().await;
        // Checked under the map lock so close() cannot miss a late open
        if self.is_closed() {
            return Err(GroundError::MissionClosed(self.mission_id.clone()));
        }
        if let Some(handle) = streams.get(stream) {
            return Ok(Arc::clone(handle));
        }

        validate_component("stream", stream)?;
        let path = self.stream_path(stream);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(GroundError::io(&path))?;
        debug!(mission_id = %self.mission_id, stream, path = %path.display(), "Opened stream file");

        let handle = Arc::new(Mutex::new(file));
        streams.insert(stream.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Append `record` as one JSON line to `<stream>.jsonl`.
    ///
    /// The line is flushed (and synced with `fsync`) before this returns.
    pub async fn write<T: Serialize + ?Sized>(&self, stream: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let handle = self.handle(stream).await?;
        let mut file = handle.lock().await;
        let path = || self.stream_path(stream);

        file.write_all(&line).await.map_err(GroundError::io(path()))?;
        file.flush().await.map_err(GroundError::io(path()))?;
        if self.options.fsync {
            file.sync_data().await.map_err(GroundError::io(path()))?;
        }
        Ok(())
    }

    /// Release every stream file, then hand the mission directory to the
    /// archiver once. Release and forwarding failures are logged only.
    ///
    /// Returns `None` when the mission was already closed.
    pub async fn close(&self) -> Option<ForwardOutcome> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(mission_id = %self.mission_id, "Mission already closed");
            return None;
        }

        let handles: Vec<(String, StreamHandle)> = self.streams.lock().await.drain().collect();
        let released = handles.len();
        for (stream, handle) in handles {
            // Waits for any write still holding this stream
            let mut file = handle.lock().await;
            if let Err(e) = file.flush().await {
                warn!(mission_id = %self.mission_id, stream = %stream, error = %e, "Failed to flush stream on close");
            }
            if let Err(e) = file.sync_all().await {
                warn!(mission_id = %self.mission_id, stream = %stream, error = %e, "Failed to sync stream on close");
            }
        }
        info!(mission_id = %self.mission_id, streams = released, "Mission closed");

        if !self.archiver.is_enabled() {
            return Some(ForwardOutcome::default());
        }

        let outcome = self.archiver.forward(&self.mission_id, &self.dir).await;
        if outcome.failed > 0 {
            warn!(
                mission_id = %self.mission_id,
                succeeded = outcome.succeeded,
                failed = outcome.failed,
                "Mission forwarded with failures"
            );
        } else {
            info!(mission_id = %self.mission_id, succeeded = outcome.succeeded, "Mission forwarded");
        }
        Some(outcome)
    }
}
