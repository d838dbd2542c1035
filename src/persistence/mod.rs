//! Durable state store contract.
//!
//! Two kinds of records are persisted: per-consumer offset snapshots keyed
//! by consumer id, and sideline request records keyed by request id. A
//! manager must be opened with its configuration before use; every
//! operation on an unopened manager is an illegal state.
//!
//! Durability contract: once a `persist_*` call returns, a `retrieve_*`
//! from a freshly opened manager with the same root configuration returns
//! the just-written value, and reads observe writes in program order from
//! the same manager instance.

mod file;
mod memory;

pub use file::FilePersistenceManager;
pub use memory::MemoryPersistenceManager;

use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::offset::OffsetMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The trigger kind a sideline request is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SidelineType {
    #[serde(rename = "START")]
    Start,
    #[serde(rename = "RESUME")]
    Resume,
    #[serde(rename = "STOP")]
    Stop,
}

impl fmt::Display for SidelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SidelineType::Start => f.write_str("START"),
            SidelineType::Resume => f.write_str("RESUME"),
            SidelineType::Stop => f.write_str("STOP"),
        }
    }
}

/// Identifies one sideline request across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SidelineRequestId(Uuid);

impl SidelineRequestId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SidelineRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One durable sideline request record.
///
/// Filter steps are carried as an opaque blob: predicates are user-defined,
/// so the persistence layer treats them as bytes and a
/// [`crate::filter::FilterStepCodec`] interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidelineRequest {
    #[serde(rename = "type")]
    pub sideline_type: SidelineType,
    pub id: SidelineRequestId,
    #[serde(rename = "startingState", skip_serializing_if = "Option::is_none", default)]
    pub starting_state: Option<OffsetMap>,
    #[serde(rename = "endingState", skip_serializing_if = "Option::is_none", default)]
    pub ending_state: Option<OffsetMap>,
    #[serde(rename = "filterChainSteps")]
    pub filter_chain_steps: Vec<u8>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl SidelineRequest {
    /// A freshly started sideline: steps installed, starting point
    /// snapshotted, no ending bound yet.
    pub fn started(
        id: SidelineRequestId,
        starting_state: OffsetMap,
        filter_chain_steps: Vec<u8>,
    ) -> Self {
        Self {
            sideline_type: SidelineType::Start,
            id,
            starting_state: Some(starting_state),
            ending_state: None,
            filter_chain_steps,
            created_at: Utc::now(),
        }
    }

    /// Transition this request to STOP with the given ending bound.
    pub fn into_stopped(self, ending_state: OffsetMap) -> Self {
        Self {
            sideline_type: SidelineType::Stop,
            ending_state: Some(ending_state),
            ..self
        }
    }
}

/// Durable store for offset snapshots and sideline requests.
#[async_trait]
pub trait PersistenceManager: Send + Sync {
    /// Open the manager. Must be called before any other operation;
    /// a missing root in the configuration is an illegal state.
    async fn open(&mut self, config: &PersistenceConfig) -> Result<()>;

    /// Release resources. The manager may be reopened afterwards.
    async fn close(&mut self) -> Result<()>;

    /// Persist the offset snapshot for a consumer, replacing any prior one.
    async fn persist_consumer_state(&self, consumer_id: &str, state: &OffsetMap) -> Result<()>;

    /// Retrieve the offset snapshot for a consumer, `None` when absent.
    async fn retrieve_consumer_state(&self, consumer_id: &str) -> Result<Option<OffsetMap>>;

    /// Remove the offset snapshot for a consumer.
    async fn clear_consumer_state(&self, consumer_id: &str) -> Result<()>;

    /// Persist a sideline request record, replacing any prior record with
    /// the same id.
    async fn persist_sideline_request(&self, request: &SidelineRequest) -> Result<()>;

    /// Retrieve one sideline request, `None` when absent.
    async fn retrieve_sideline_request(
        &self,
        id: SidelineRequestId,
    ) -> Result<Option<SidelineRequest>>;

    /// Remove one sideline request.
    async fn clear_sideline_request(&self, id: SidelineRequestId) -> Result<()>;

    /// All persisted sideline requests, used to resume after restart.
    async fn list_sideline_requests(&self) -> Result<Vec<SidelineRequest>>;
}
