//! Contract over the underlying commit-log client.
//!
//! A [`BrokerConsumer`] is owned by exactly one virtual spout worker for its
//! whole life; nothing else ever touches it. The contract is deliberately
//! thin: poll one record, commit an offset, drop a partition from the
//! assignment, snapshot committed positions.
//!
//! Transient faults are the implementation's problem to retry; anything
//! surfaced through [`crate::SidelineError::Broker`] is treated as opaque by
//! the core. `None` from [`BrokerConsumer::next_record`] is not an error, it
//! just means nothing is buffered right now.

mod memory;

pub use memory::{MemoryBrokerConsumer, MemoryBrokerFactory, MemoryLog};

use crate::error::Result;
use crate::message::Record;
use crate::offset::{OffsetMap, TopicPartition};
use async_trait::async_trait;

/// Thin contract over a partitioned commit-log consumer.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Establish the connection and subscription. The owning spout calls
    /// this exactly once, from `open()`.
    async fn connect(&mut self) -> Result<()>;

    /// Next buffered record for the subscribed partitions, or `None` when
    /// nothing is currently available. Never blocks on the broker.
    async fn next_record(&mut self) -> Result<Option<Record>>;

    /// Mark `offset` as the next unconsumed position for `tp` in the
    /// durable group state.
    async fn commit_offset(&mut self, tp: &TopicPartition, offset: i64) -> Result<()>;

    /// Rewind the consume position for `tp` so the record at `offset` is
    /// delivered again on a later poll.
    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<()>;

    /// Remove `tp` from the active assignment. Returns whether the
    /// assignment changed.
    async fn unsubscribe_partition(&mut self, tp: &TopicPartition) -> bool;

    /// Snapshot of committed positions across the assigned partitions.
    fn current_state(&self) -> OffsetMap;

    /// Release resources.
    async fn close(&mut self) -> Result<()>;
}

/// Creates broker consumers for dynamically started spouts.
///
/// When a sideline is stopped, its drain spout needs a fresh consumer
/// positioned at the sideline's starting offsets; the factory is the seam
/// where the host decides how that consumer is built.
pub trait BrokerConsumerFactory: Send + Sync {
    fn create(
        &self,
        consumer_id: &str,
        starting_state: Option<&OffsetMap>,
    ) -> Box<dyn BrokerConsumer>;
}
