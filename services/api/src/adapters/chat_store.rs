//! services/api/src/adapters/chat_store.rs
//!
//! A file-backed `ChatHistoryStore`: one JSON document per session, named
//! `perspective-chat-<session id>.json`, under a configured directory.
//!
//! Threads are kept until `prune` removes the ones nobody has written to within the
//! retention window. `prune` also clears staging files a crash left between write and
//! rename; the service calls it once at startup, before any save can be in progress.

use async_trait::async_trait;
use drishti_core::domain::{ChatTurn, SessionId};
use drishti_core::ports::{ChatHistoryStore, PortError, PortResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const THREAD_PREFIX: &str = "perspective-chat-";
const STAGING_SUFFIX: &str = ".json.tmp";

#[derive(Clone, Debug)]
pub struct FileChatStore {
    dir: PathBuf,
}

impl FileChatStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{}{}.json", THREAD_PREFIX, session_id))
    }

    /// Removes leftover staging files and, when `retention` is set, threads last
    /// written longer ago than that. Returns how many files were removed.
    pub async fn prune(&self, retention: Option<Duration>) -> PortResult<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(&self.dir, e)),
        };
        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(THREAD_PREFIX) {
                continue;
            }
            let expired = if name.ends_with(STAGING_SUFFIX) {
                true
            } else if name.ends_with(".json") {
                match (retention, entry.metadata().await.and_then(|m| m.modified())) {
                    (Some(retention), Ok(modified)) => now
                        .duration_since(modified)
                        .map(|age| age > retention)
                        .unwrap_or(false),
                    _ => false,
                }
            } else {
                false
            };
            if !expired {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not prune {}: {}", entry.path().display(), e),
            }
        }
        if removed > 0 {
            info!("Pruned {} chat files from {}", removed, self.dir.display());
        }
        Ok(removed)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PortError {
    PortError::StoreUnavailable(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl ChatHistoryStore for FileChatStore {
    async fn load(&self, session_id: SessionId) -> PortResult<Vec<ChatTurn>> {
        let path = self.path_for(session_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_str(&raw).map_err(|e| {
            PortError::StoreUnavailable(format!("{} is not a chat thread: {}", path.display(), e))
        })
    }

    async fn save(&self, session_id: SessionId, turns: &[ChatTurn]) -> PortResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let path = self.path_for(session_id);
        let json = serde_json::to_string_pretty(turns)
            .map_err(|e| PortError::Validation(e.to_string()))?;

        // Write next to the target and rename, so a crash never leaves half a thread behind.
        let staging = self
            .dir
            .join(format!("{}{}{}", THREAD_PREFIX, session_id, STAGING_SUFFIX));
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| io_error(&staging, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| io_error(&path, e))?;
        debug!("Stored {} chat turns at {}", turns.len(), path.display());
        Ok(())
    }
}
