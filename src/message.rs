//! Message identity and payload types.
//!
//! A [`Record`] is the raw unit pulled from the broker consumer. Once it
//! survives deserialization, bound checks and filtering, it is emitted as an
//! [`EmittedMessage`] whose [`MessageId`] is the handle the host topology
//! hands back on ack or fail.

use crate::offset::TopicPartition;
use bytes::Bytes;
use std::fmt;

/// Deserialized payload values emitted with a message.
pub type Values = Vec<Bytes>;

/// Raw record as pulled off a partitioned commit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Record key, when one was produced
    pub key: Option<Bytes>,
    /// Record value
    pub value: Bytes,
}

impl Record {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
        }
    }

    /// The `(topic, partition)` this record belongs to.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Identifier for one emitted message: `(topic, partition, offset)` plus the
/// id of the virtual spout that emitted it.
///
/// Structural equality and hashing cover all four fields. The consumer id is
/// what lets the coordinator route an ack or fail back to the originating
/// spout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    topic: String,
    partition: i32,
    offset: i64,
    consumer_id: String,
}

impl MessageId {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            consumer_id: consumer_id.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Id of the virtual spout this message originated from.
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}@{}[{}]",
            self.topic, self.partition, self.offset, self.consumer_id
        )
    }
}

/// A message ready for emission into the host topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedMessage {
    /// Handle returned to the host for later ack/fail
    pub id: MessageId,
    /// Deserialized payload
    pub values: Values,
}

impl EmittedMessage {
    pub fn new(id: MessageId, values: Values) -> Self {
        Self { id, values }
    }

    pub fn topic(&self) -> &str {
        self.id.topic()
    }

    pub fn partition(&self) -> i32 {
        self.id.partition()
    }

    pub fn offset(&self) -> i64 {
        self.id.offset()
    }
}
