//! In-memory commit log and broker consumer.
//!
//! Backs integration tests and embedded usage: a [`MemoryLog`] holds
//! partitioned append-only records, and any number of
//! [`MemoryBrokerConsumer`]s consume from it with independent positions and
//! committed offsets.

use super::BrokerConsumer;
use crate::error::{Result, SidelineError};
use crate::message::Record;
use crate::offset::{OffsetMap, TopicPartition};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Shared, partitioned, append-only in-memory log.
#[derive(Debug, Default)]
pub struct MemoryLog {
    partitions: RwLock<HashMap<TopicPartition, Vec<(Option<Bytes>, Bytes)>>>,
}

impl MemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append one record, returning its offset.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        value: Bytes,
    ) -> i64 {
        let tp = TopicPartition::new(topic, partition);
        let mut partitions = self.partitions.write();
        let log = partitions.entry(tp).or_default();
        log.push((key, value));
        (log.len() - 1) as i64
    }

    /// Latest offset plus one for a partition; zero when empty or unknown.
    pub fn end_offset(&self, tp: &TopicPartition) -> i64 {
        self.partitions
            .read()
            .get(tp)
            .map_or(0, |log| log.len() as i64)
    }

    fn read(&self, tp: &TopicPartition, offset: i64) -> Option<Record> {
        let partitions = self.partitions.read();
        let (key, value) = partitions.get(tp)?.get(usize::try_from(offset).ok()?)?;
        Some(Record::new(
            tp.topic(),
            tp.partition(),
            offset,
            key.clone(),
            value.clone(),
        ))
    }
}

/// Broker consumer over a [`MemoryLog`].
///
/// Partitions are polled round-robin so no assigned partition starves.
pub struct MemoryBrokerConsumer {
    log: Arc<MemoryLog>,
    /// Next offset to consume per assigned partition.
    positions: BTreeMap<TopicPartition, i64>,
    /// Committed positions, reported by `current_state()`.
    committed: BTreeMap<TopicPartition, i64>,
    /// Round-robin cursor over the assignment.
    next_partition: usize,
    connected: bool,
}

impl MemoryBrokerConsumer {
    /// Consumer assigned to `partitions`, starting from the offsets in
    /// `starting_state` (or from the beginning where untracked).
    pub fn new(
        log: Arc<MemoryLog>,
        partitions: impl IntoIterator<Item = TopicPartition>,
        starting_state: Option<&OffsetMap>,
    ) -> Self {
        let positions: BTreeMap<TopicPartition, i64> = partitions
            .into_iter()
            .map(|tp| {
                let start = starting_state.and_then(|s| s.offset(&tp)).unwrap_or(0);
                (tp, start)
            })
            .collect();
        let committed = positions.clone();
        Self {
            log,
            positions,
            committed,
            next_partition: 0,
            connected: false,
        }
    }
}

#[async_trait]
impl BrokerConsumer for MemoryBrokerConsumer {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        debug!(partitions = self.positions.len(), "memory broker consumer connected");
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<Record>> {
        if !self.connected {
            return Err(SidelineError::broker("consumer is not connected"));
        }
        let assigned: Vec<TopicPartition> = self.positions.keys().cloned().collect();
        if assigned.is_empty() {
            return Ok(None);
        }
        // One full round over the assignment, starting at the cursor.
        for i in 0..assigned.len() {
            let tp = &assigned[(self.next_partition + i) % assigned.len()];
            let position = self.positions[tp];
            if let Some(record) = self.log.read(tp, position) {
                self.positions.insert(tp.clone(), position + 1);
                self.next_partition = (self.next_partition + i + 1) % assigned.len();
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn commit_offset(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.committed.insert(tp.clone(), offset);
        Ok(())
    }

    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        match self.positions.get_mut(tp) {
            Some(position) => {
                *position = offset;
                Ok(())
            }
            None => Err(SidelineError::broker(format!(
                "cannot seek unassigned partition {tp}"
            ))),
        }
    }

    async fn unsubscribe_partition(&mut self, tp: &TopicPartition) -> bool {
        self.next_partition = 0;
        self.positions.remove(tp).is_some()
    }

    fn current_state(&self) -> OffsetMap {
        let mut builder = OffsetMap::builder();
        for (tp, offset) in &self.committed {
            builder = builder.with_partition(tp.clone(), *offset);
        }
        builder.build()
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}

/// Factory producing [`MemoryBrokerConsumer`]s over one shared log with a
/// fixed partition assignment.
#[derive(Debug, Clone)]
pub struct MemoryBrokerFactory {
    log: Arc<MemoryLog>,
    partitions: Vec<TopicPartition>,
}

impl MemoryBrokerFactory {
    pub fn new(log: Arc<MemoryLog>, partitions: Vec<TopicPartition>) -> Self {
        Self { log, partitions }
    }
}

impl super::BrokerConsumerFactory for MemoryBrokerFactory {
    fn create(
        &self,
        _consumer_id: &str,
        starting_state: Option<&OffsetMap>,
    ) -> Box<dyn BrokerConsumer> {
        Box::new(MemoryBrokerConsumer::new(
            Arc::clone(&self.log),
            self.partitions.iter().cloned(),
            starting_state,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_log() -> Arc<MemoryLog> {
        let log = MemoryLog::new();
        for i in 0..5 {
            log.produce("orders", 0, None, Bytes::from(format!("m{i}")));
        }
        log
    }

    #[tokio::test]
    async fn test_consumes_in_order() {
        let log = seeded_log();
        let mut consumer =
            MemoryBrokerConsumer::new(log, [TopicPartition::new("orders", 0)], None);
        consumer.connect().await.unwrap();

        for expected in 0..5 {
            let record = consumer.next_record().await.unwrap().unwrap();
            assert_eq!(record.offset, expected);
        }
        assert!(consumer.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_record_requires_connect() {
        let log = seeded_log();
        let mut consumer =
            MemoryBrokerConsumer::new(log, [TopicPartition::new("orders", 0)], None);
        assert!(consumer.next_record().await.is_err());
    }

    #[tokio::test]
    async fn test_starting_state_skips_consumed_prefix() {
        let log = seeded_log();
        let tp = TopicPartition::new("orders", 0);
        let starting = OffsetMap::builder().with_partition(tp.clone(), 3).build();

        let mut consumer = MemoryBrokerConsumer::new(log, [tp], Some(&starting));
        consumer.connect().await.unwrap();

        let record = consumer.next_record().await.unwrap().unwrap();
        assert_eq!(record.offset, 3);
    }

    #[tokio::test]
    async fn test_seek_rewinds() {
        let log = seeded_log();
        let tp = TopicPartition::new("orders", 0);
        let mut consumer = MemoryBrokerConsumer::new(log, [tp.clone()], None);
        consumer.connect().await.unwrap();

        consumer.next_record().await.unwrap();
        consumer.next_record().await.unwrap();
        consumer.seek(&tp, 0).await.unwrap();

        let record = consumer.next_record().await.unwrap().unwrap();
        assert_eq!(record.offset, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let log = seeded_log();
        let tp = TopicPartition::new("orders", 0);
        let mut consumer = MemoryBrokerConsumer::new(log, [tp.clone()], None);
        consumer.connect().await.unwrap();

        assert!(consumer.unsubscribe_partition(&tp).await);
        assert!(!consumer.unsubscribe_partition(&tp).await);
        assert!(consumer.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_reflected_in_current_state() {
        let log = seeded_log();
        let tp = TopicPartition::new("orders", 0);
        let mut consumer = MemoryBrokerConsumer::new(log, [tp.clone()], None);
        consumer.connect().await.unwrap();

        consumer.commit_offset(&tp, 4).await.unwrap();
        assert_eq!(consumer.current_state().offset(&tp), Some(4));
    }

    #[tokio::test]
    async fn test_round_robin_across_partitions() {
        let log = MemoryLog::new();
        log.produce("orders", 0, None, Bytes::from("a"));
        log.produce("orders", 1, None, Bytes::from("b"));

        let mut consumer = MemoryBrokerConsumer::new(
            log,
            [TopicPartition::new("orders", 0), TopicPartition::new("orders", 1)],
            None,
        );
        consumer.connect().await.unwrap();

        let first = consumer.next_record().await.unwrap().unwrap();
        let second = consumer.next_record().await.unwrap().unwrap();
        let mut partitions = vec![first.partition, second.partition];
        partitions.sort_unstable();
        assert_eq!(partitions, vec![0, 1]);
    }
}
