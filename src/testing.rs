//! Test doubles for the broker and deserializer seams.
//!
//! Public so integration tests (and hosts writing their own) can script a
//! broker consumer without a real commit log: queue records up front, run
//! the spout, then assert on the recorded commits, seeks and unsubscribes
//! through the paired [`MockBrokerHandle`].

use crate::broker::BrokerConsumer;
use crate::deserializer::Deserializer;
use crate::error::{Result, SidelineError};
use crate::message::{Record, Values};
use crate::offset::{OffsetMap, TopicPartition};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Default)]
struct MockState {
    records: VecDeque<Record>,
    poll_errors: VecDeque<String>,
    connect_calls: usize,
    close_calls: usize,
    commits: Vec<(TopicPartition, i64)>,
    seeks: Vec<(TopicPartition, i64)>,
    unsubscribes: Vec<TopicPartition>,
    committed: BTreeMap<TopicPartition, i64>,
}

/// Scripted broker consumer.
///
/// Returns queued records in order, then `None` forever. Every contract
/// call is recorded for later inspection.
#[derive(Debug, Default)]
pub struct MockBrokerConsumer {
    state: Arc<Mutex<MockState>>,
}

impl MockBrokerConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one record for a later `next_record` call.
    pub fn enqueue_record(&self, record: Record) -> &Self {
        self.state.lock().records.push_back(record);
        self
    }

    /// Queue a broker fault; it is returned before any remaining records.
    pub fn enqueue_poll_error(&self, message: impl Into<String>) -> &Self {
        self.state.lock().poll_errors.push_back(message.into());
        self
    }

    /// Inspection handle that stays valid after the consumer is moved
    /// into a spout.
    pub fn handle(&self) -> MockBrokerHandle {
        MockBrokerHandle {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl BrokerConsumer for MockBrokerConsumer {
    async fn connect(&mut self) -> Result<()> {
        self.state.lock().connect_calls += 1;
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<Record>> {
        let mut state = self.state.lock();
        if let Some(message) = state.poll_errors.pop_front() {
            return Err(SidelineError::broker(message));
        }
        Ok(state.records.pop_front())
    }

    async fn commit_offset(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        let mut state = self.state.lock();
        state.commits.push((tp.clone(), offset));
        state.committed.insert(tp.clone(), offset);
        Ok(())
    }

    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.state.lock().seeks.push((tp.clone(), offset));
        Ok(())
    }

    async fn unsubscribe_partition(&mut self, tp: &TopicPartition) -> bool {
        let mut state = self.state.lock();
        let first = !state.unsubscribes.contains(tp);
        state.unsubscribes.push(tp.clone());
        first
    }

    fn current_state(&self) -> OffsetMap {
        let state = self.state.lock();
        let mut builder = OffsetMap::builder();
        for (tp, offset) in &state.committed {
            builder = builder.with_partition(tp.clone(), *offset);
        }
        builder.build()
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().close_calls += 1;
        Ok(())
    }
}

/// Assertion-side view of a [`MockBrokerConsumer`].
#[derive(Debug, Clone)]
pub struct MockBrokerHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockBrokerHandle {
    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// `(partition, offset)` pairs in commit order.
    pub fn commits(&self) -> Vec<(TopicPartition, i64)> {
        self.state.lock().commits.clone()
    }

    /// `(partition, offset)` pairs in seek order.
    pub fn seeks(&self) -> Vec<(TopicPartition, i64)> {
        self.state.lock().seeks.clone()
    }

    /// Every unsubscribed partition, in call order (duplicates kept).
    pub fn unsubscribes(&self) -> Vec<TopicPartition> {
        self.state.lock().unsubscribes.clone()
    }

    /// Seed the committed positions reported by `current_state()`.
    pub fn set_committed(&self, state: &OffsetMap) {
        let mut inner = self.state.lock();
        for (tp, offset) in state.entries() {
            inner.committed.insert(tp.clone(), offset);
        }
    }
}

/// Deserializer that rejects every record, marking it poison.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDeserializer;

impl Deserializer for NullDeserializer {
    fn deserialize(
        &self,
        _topic: &str,
        _partition: i32,
        _offset: i64,
        _key: Option<&[u8]>,
        _value: &[u8],
    ) -> Option<Values> {
        None
    }
}
