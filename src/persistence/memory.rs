//! In-memory persistence manager for tests and embedded usage.

use super::{PersistenceManager, SidelineRequest, SidelineRequestId};
use crate::config::PersistenceConfig;
use crate::error::{Result, SidelineError};
use crate::offset::OffsetMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Stores {
    consumers: HashMap<String, OffsetMap>,
    requests: HashMap<SidelineRequestId, SidelineRequest>,
}

/// Non-durable manager holding everything in process memory.
///
/// Cloning shares the underlying stores, so a "reopened" clone observes
/// earlier writes the way a freshly opened durable manager would.
#[derive(Debug, Default, Clone)]
pub struct MemoryPersistenceManager {
    stores: Arc<RwLock<Stores>>,
    open: bool,
}

impl MemoryPersistenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(SidelineError::illegal_state("persistence manager is not open"))
        }
    }
}

#[async_trait]
impl PersistenceManager for MemoryPersistenceManager {
    async fn open(&mut self, _config: &PersistenceConfig) -> Result<()> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    async fn persist_consumer_state(&self, consumer_id: &str, state: &OffsetMap) -> Result<()> {
        self.ensure_open()?;
        self.stores
            .write()
            .consumers
            .insert(consumer_id.to_string(), state.clone());
        Ok(())
    }

    async fn retrieve_consumer_state(&self, consumer_id: &str) -> Result<Option<OffsetMap>> {
        self.ensure_open()?;
        Ok(self.stores.read().consumers.get(consumer_id).cloned())
    }

    async fn clear_consumer_state(&self, consumer_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.stores.write().consumers.remove(consumer_id);
        Ok(())
    }

    async fn persist_sideline_request(&self, request: &SidelineRequest) -> Result<()> {
        self.ensure_open()?;
        self.stores
            .write()
            .requests
            .insert(request.id, request.clone());
        Ok(())
    }

    async fn retrieve_sideline_request(
        &self,
        id: SidelineRequestId,
    ) -> Result<Option<SidelineRequest>> {
        self.ensure_open()?;
        Ok(self.stores.read().requests.get(&id).cloned())
    }

    async fn clear_sideline_request(&self, id: SidelineRequestId) -> Result<()> {
        self.ensure_open()?;
        self.stores.write().requests.remove(&id);
        Ok(())
    }

    async fn list_sideline_requests(&self) -> Result<Vec<SidelineRequest>> {
        self.ensure_open()?;
        Ok(self.stores.read().requests.values().cloned().collect())
    }
}
