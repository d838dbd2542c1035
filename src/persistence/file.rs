//! File-backed persistence manager.
//!
//! State lives as UTF-8 JSON files under the configured root:
//! `{root}/consumers/{consumerId}` for offset snapshots and
//! `{root}/requests/{requestId}` for sideline request records. Writes go to
//! a temp file first and rename into place, so readers never observe a
//! partial value.

use super::{PersistenceManager, SidelineRequest, SidelineRequestId};
use crate::config::PersistenceConfig;
use crate::error::{Result, SidelineError};
use crate::offset::OffsetMap;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Durable JSON-file store for consumer state and sideline requests.
#[derive(Debug, Default)]
pub struct FilePersistenceManager {
    root: Option<PathBuf>,
}

impl FilePersistenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn root(&self) -> Result<&Path> {
        self.root
            .as_deref()
            .ok_or_else(|| SidelineError::illegal_state("persistence manager is not open"))
    }

    fn consumer_path(&self, consumer_id: &str) -> Result<PathBuf> {
        Ok(self.root()?.join("consumers").join(consumer_id))
    }

    fn request_path(&self, id: SidelineRequestId) -> Result<PathBuf> {
        Ok(self.root()?.join("requests").join(id.to_string()))
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_if_present(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PersistenceManager for FilePersistenceManager {
    async fn open(&mut self, config: &PersistenceConfig) -> Result<()> {
        let root = config.require_root()?.clone();
        tokio::fs::create_dir_all(root.join("consumers")).await?;
        tokio::fs::create_dir_all(root.join("requests")).await?;
        debug!(root = %root.display(), "file persistence manager opened");
        self.root = Some(root);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.root = None;
        Ok(())
    }

    async fn persist_consumer_state(&self, consumer_id: &str, state: &OffsetMap) -> Result<()> {
        let path = self.consumer_path(consumer_id)?;
        let json = serde_json::to_vec(state)?;
        Self::write_atomic(&path, &json).await?;
        debug!(consumer_id = %consumer_id, partitions = state.size(), "persisted consumer state");
        Ok(())
    }

    async fn retrieve_consumer_state(&self, consumer_id: &str) -> Result<Option<OffsetMap>> {
        let path = self.consumer_path(consumer_id)?;
        match Self::read_optional(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn clear_consumer_state(&self, consumer_id: &str) -> Result<()> {
        Self::remove_if_present(&self.consumer_path(consumer_id)?).await
    }

    async fn persist_sideline_request(&self, request: &SidelineRequest) -> Result<()> {
        let path = self.request_path(request.id)?;
        let json = serde_json::to_vec(request)?;
        Self::write_atomic(&path, &json).await?;
        debug!(request_id = %request.id, sideline_type = %request.sideline_type, "persisted sideline request");
        Ok(())
    }

    async fn retrieve_sideline_request(
        &self,
        id: SidelineRequestId,
    ) -> Result<Option<SidelineRequest>> {
        let path = self.request_path(id)?;
        match Self::read_optional(&path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn clear_sideline_request(&self, id: SidelineRequestId) -> Result<()> {
        Self::remove_if_present(&self.request_path(id)?).await
    }

    async fn list_sideline_requests(&self) -> Result<Vec<SidelineRequest>> {
        let dir = self.root()?.join("requests");
        let mut requests = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            match Self::read_optional(&path).await? {
                Some(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(request) => requests.push(request),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable sideline request");
                    }
                },
                None => continue,
            }
        }
        Ok(requests)
    }
}
