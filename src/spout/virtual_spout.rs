//! One bounded, filtered, at-least-once virtual consumer.

use super::{Lifecycle, SpoutState};
use crate::broker::BrokerConsumer;
use crate::config::SpoutConfig;
use crate::deserializer::Deserializer;
use crate::error::{Result, SidelineError};
use crate::filter::{FilterChain, FilterStep, SidelineId};
use crate::message::{EmittedMessage, MessageId, Record};
use crate::metrics;
use crate::offset::{OffsetMap, TopicPartition};
use crate::persistence::PersistenceManager;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Shared handle to a spout's filter chain.
///
/// This is the published install/remove operation external writers (the
/// sideline handler) must go through; each call takes and releases the
/// chain lock, so the owning worker observes steps atomically on its next
/// poll.
#[derive(Debug, Clone)]
pub struct FilterChainHandle {
    inner: Arc<RwLock<FilterChain>>,
}

impl FilterChainHandle {
    fn new(chain: FilterChain) -> Self {
        Self {
            inner: Arc::new(RwLock::new(chain)),
        }
    }

    /// Install a step under `id`, replacing any step already keyed by it.
    pub fn install_step(&self, id: SidelineId, step: Arc<dyn FilterStep>) {
        self.inner.write().add_step(id, step);
    }

    /// Remove the step keyed by `id`, returning it when present.
    pub fn remove_step(&self, id: SidelineId) -> Option<Arc<dyn FilterStep>> {
        self.inner.write().remove_step(id)
    }

    /// Copy of the current steps, in installation order.
    pub fn snapshot(&self) -> Vec<(SidelineId, Arc<dyn FilterStep>)> {
        self.inner.read().steps().to_vec()
    }

    fn evaluate(&self, record: &Record) -> bool {
        self.inner.read().evaluate(record)
    }
}

/// A bounded, filtered consumer instance owning one broker consumer.
///
/// Produces zero or one message per [`next_message`](Self::next_message)
/// call and never blocks; the coordinator drives it in a worker loop.
/// When an ending bound is configured, partitions are unsubscribed as they
/// reach it and the spout flags itself finished once the last bounded
/// partition is gone.
pub struct VirtualSpout {
    consumer_id: String,
    config: Arc<SpoutConfig>,
    consumer: Box<dyn BrokerConsumer>,
    deserializer: Arc<dyn Deserializer>,
    persistence: Arc<dyn PersistenceManager>,
    filter_chain: FilterChainHandle,
    /// Exclusive per-partition upper bound, when this spout is bounded.
    ending_state: Option<OffsetMap>,
    /// Bounded partitions not yet unsubscribed; drives finish detection.
    bounded_remaining: HashSet<TopicPartition>,
    /// Un-acked messages and when they were emitted.
    in_flight: HashMap<MessageId, Instant>,
    lifecycle: Arc<Lifecycle>,
    stop_requested: Arc<AtomicBool>,
    /// Whether `open()` ever connected the broker consumer.
    opened: bool,
}

impl VirtualSpout {
    /// An unbounded spout (the firehose, or any plain stream).
    pub fn new(
        consumer_id: impl Into<String>,
        config: Arc<SpoutConfig>,
        consumer: Box<dyn BrokerConsumer>,
        deserializer: Arc<dyn Deserializer>,
        persistence: Arc<dyn PersistenceManager>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            config,
            consumer,
            deserializer,
            persistence,
            filter_chain: FilterChainHandle::new(FilterChain::new()),
            ending_state: None,
            bounded_remaining: HashSet::new(),
            in_flight: HashMap::new(),
            lifecycle: Arc::new(Lifecycle::new()),
            stop_requested: Arc::new(AtomicBool::new(false)),
            opened: false,
        }
    }

    /// Declare an exclusive ending bound. Records at or past the bound are
    /// never emitted; each bounded partition is unsubscribed once reached.
    pub fn with_ending_state(mut self, ending_state: OffsetMap) -> Self {
        self.bounded_remaining = ending_state.partitions().cloned().collect();
        self.ending_state = Some(ending_state);
        self
    }

    /// Seed the filter chain before the spout starts polling.
    pub fn with_filter_steps(
        self,
        steps: impl IntoIterator<Item = (SidelineId, Arc<dyn FilterStep>)>,
    ) -> Self {
        for (id, step) in steps {
            self.filter_chain.install_step(id, step);
        }
        self
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn state(&self) -> SpoutState {
        self.lifecycle.state()
    }

    /// Handle for installing and removing filter steps from outside the
    /// owning worker.
    pub fn filter_chain(&self) -> FilterChainHandle {
        self.filter_chain.clone()
    }

    /// Cross-task stop signal for this spout. The coordinator holds one
    /// per running spout so shutdown never has to wait on a busy worker.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            consumer_id: self.consumer_id.clone(),
            stop: Arc::clone(&self.stop_requested),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Transition `Created → Open` and connect the broker consumer exactly
    /// once. A second call is an illegal state.
    pub async fn open(&mut self) -> Result<()> {
        self.lifecycle.try_open().map_err(|state| {
            SidelineError::illegal_state(format!(
                "virtual spout {} cannot open from state {state:?}",
                self.consumer_id
            ))
        })?;
        self.consumer.connect().await?;
        self.opened = true;
        debug!(consumer_id = %self.consumer_id, "virtual spout opened");
        Ok(())
    }

    /// Produce zero or one message.
    ///
    /// Pulls one record from the broker consumer, deserializes it, checks
    /// the ending bound, evaluates the filter chain, and tracks the result
    /// in flight. Dropped records (poison, filtered, past the bound) are
    /// not committed; the group offset only advances through acks.
    pub async fn next_message(&mut self) -> Result<Option<EmittedMessage>> {
        let state = self.lifecycle.state();
        if state != SpoutState::Open {
            return Err(SidelineError::illegal_state(format!(
                "virtual spout {} polled in state {state:?}",
                self.consumer_id
            )));
        }

        if self.in_flight.len() >= self.config.max_in_flight {
            warn!(
                consumer_id = %self.consumer_id,
                in_flight = self.in_flight.len(),
                "in-flight limit reached, pausing polls until acks arrive"
            );
            return Ok(None);
        }

        let Some(record) = self.consumer.next_record().await? else {
            return Ok(None);
        };

        let Some(values) = self.deserializer.deserialize(
            &record.topic,
            record.partition,
            record.offset,
            record.key.as_deref(),
            &record.value,
        ) else {
            metrics::record_message_poisoned(&self.consumer_id);
            debug!(
                consumer_id = %self.consumer_id,
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "dropping undeserializable record"
            );
            return Ok(None);
        };

        let id = MessageId::new(
            record.topic.clone(),
            record.partition,
            record.offset,
            self.consumer_id.clone(),
        );

        if self.does_message_exceed_ending_offset(&id)? {
            let tp = id.topic_partition();
            self.consumer.unsubscribe_partition(&tp).await;
            self.bounded_remaining.remove(&tp);
            debug!(
                consumer_id = %self.consumer_id,
                partition = %tp,
                offset = id.offset(),
                remaining = self.bounded_remaining.len(),
                "partition reached its ending offset, unsubscribed"
            );
            if self.bounded_remaining.is_empty() {
                // Signal the worker to wind down while staying OPEN:
                // trailing polls must still drain records the broker
                // already buffered past the bound.
                self.stop_requested.store(true, Ordering::Release);
            }
            return Ok(None);
        }

        if self.filter_chain.evaluate(&record) {
            metrics::record_message_filtered(&self.consumer_id);
            return Ok(None);
        }

        self.in_flight.insert(id.clone(), Instant::now());
        metrics::record_message_emitted(&self.consumer_id);
        Ok(Some(EmittedMessage::new(id, values)))
    }

    /// Whether `id` falls at or past the declared ending bound.
    ///
    /// Always false when no bound is configured. When a bound is
    /// configured, a partition absent from it is an illegal state: the
    /// spout is consuming something its configuration never accounted for.
    pub fn does_message_exceed_ending_offset(&self, id: &MessageId) -> Result<bool> {
        let Some(ending_state) = &self.ending_state else {
            return Ok(false);
        };
        let tp = id.topic_partition();
        let ending_offset = ending_state.offset(&tp).ok_or_else(|| {
            SidelineError::illegal_state(format!(
                "partition {tp} has no declared ending offset on spout {}",
                self.consumer_id
            ))
        })?;
        Ok(id.offset() >= ending_offset)
    }

    /// Acknowledge a message by its identifier.
    ///
    /// `None` is silently ignored; a value that is not a [`MessageId`] is
    /// an invalid argument. A valid id commits its offset on the broker
    /// consumer and leaves the in-flight set.
    pub async fn ack(&mut self, id: Option<&dyn Any>) -> Result<()> {
        let Some(raw) = id else {
            return Ok(());
        };
        let id = Self::require_message_id(raw, "ack")?.clone();
        self.consumer
            .commit_offset(&id.topic_partition(), id.offset())
            .await?;
        self.in_flight.remove(&id);
        Ok(())
    }

    /// Record a failed message for redelivery.
    ///
    /// The id leaves the in-flight set and the broker consumer is asked to
    /// seek back to the failed offset so a later poll re-adds it.
    pub async fn fail(&mut self, id: Option<&dyn Any>) -> Result<()> {
        let Some(raw) = id else {
            return Ok(());
        };
        let id = Self::require_message_id(raw, "fail")?.clone();
        warn!(
            consumer_id = %self.consumer_id,
            message = %id,
            "message failed, seeking back for redelivery"
        );
        self.in_flight.remove(&id);
        self.consumer.seek(&id.topic_partition(), id.offset()).await
    }

    fn require_message_id<'a>(raw: &'a dyn Any, op: &str) -> Result<&'a MessageId> {
        raw.downcast_ref::<MessageId>().ok_or_else(|| {
            SidelineError::invalid_argument(format!("{op}() requires a MessageId tuple id"))
        })
    }

    /// Persist the broker consumer's committed positions under this
    /// spout's consumer id.
    pub async fn flush_state(&mut self) -> Result<()> {
        let state = self.consumer.current_state();
        self.persistence
            .persist_consumer_state(&self.consumer_id, &state)
            .await
    }

    /// Snapshot of committed positions, without persisting.
    pub fn current_state(&self) -> OffsetMap {
        self.consumer.current_state()
    }

    /// Ask the spout to wind down; its worker exits within one iteration.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.lifecycle.advance(SpoutState::StopRequested);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// True once an ending bound was declared and every bounded partition
    /// has been unsubscribed (or a stop was requested).
    pub fn is_finished(&self) -> bool {
        self.is_stop_requested() || self.lifecycle.state() >= SpoutState::StopRequested
    }

    /// Messages currently awaiting ack.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Flush state, release the broker consumer, and transition to
    /// `Closed`. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.lifecycle.state() == SpoutState::Closed {
            return Ok(());
        }
        self.request_stop();
        if self.opened {
            if let Err(e) = self.flush_state().await {
                warn!(consumer_id = %self.consumer_id, error = %e, "final state flush failed");
            }
        }
        self.consumer.close().await?;
        self.lifecycle.advance(SpoutState::Closed);
        debug!(consumer_id = %self.consumer_id, "virtual spout closed");
        Ok(())
    }
}

/// Cloneable stop signal for one virtual spout.
#[derive(Debug, Clone)]
pub struct StopHandle {
    consumer_id: String,
    stop: Arc<AtomicBool>,
    lifecycle: Arc<Lifecycle>,
}

impl StopHandle {
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Ask the owning worker to wind down within one iteration.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.lifecycle.advance(SpoutState::StopRequested);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for VirtualSpout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualSpout")
            .field("consumer_id", &self.consumer_id)
            .field("state", &self.lifecycle.state())
            .field("bounded", &self.ending_state.is_some())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deserializer::Utf8Deserializer;
    use crate::filter::StaticMessageFilter;
    use crate::persistence::MemoryPersistenceManager;
    use crate::testing::{MockBrokerConsumer, MockBrokerHandle, NullDeserializer};
    use bytes::Bytes;

    fn test_config() -> Arc<SpoutConfig> {
        Arc::new(SpoutConfig {
            brokers: vec!["localhost:9092".to_string()],
            ..Default::default()
        })
    }

    fn spout_with(
        consumer: MockBrokerConsumer,
        deserializer: Arc<dyn Deserializer>,
    ) -> (VirtualSpout, MockBrokerHandle) {
        let handle = consumer.handle();
        let spout = VirtualSpout::new(
            "MyConsumerId",
            test_config(),
            Box::new(consumer),
            deserializer,
            Arc::new(MemoryPersistenceManager::new()),
        );
        (spout, handle)
    }

    fn sample_record() -> Record {
        Record::new(
            "MyTopic",
            3,
            434323,
            Some(Bytes::from("MyKey")),
            Bytes::from("MyValue"),
        )
    }

    #[tokio::test]
    async fn test_open_connects_exactly_once() {
        let (mut spout, handle) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();
        assert_eq!(handle.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_open_twice_is_illegal_state() {
        let (mut spout, handle) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();

        let err = spout.open().await.unwrap_err();
        assert!(matches!(err, SidelineError::IllegalState(_)));
        assert_eq!(handle.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_next_message_before_open_is_illegal_state() {
        let (mut spout, _) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));
        let err = spout.next_message().await.unwrap_err();
        assert!(matches!(err, SidelineError::IllegalState(_)));
    }

    #[tokio::test]
    async fn test_next_message_after_stop_requested_is_illegal_state() {
        let consumer = MockBrokerConsumer::new();
        consumer.enqueue_record(sample_record());

        let (mut spout, _) = spout_with(consumer, Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();
        spout.request_stop();

        let err = spout.next_message().await.unwrap_err();
        assert!(matches!(err, SidelineError::IllegalState(_)));
    }

    #[tokio::test]
    async fn test_next_message_when_consumer_returns_none() {
        let (mut spout, handle) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();

        assert!(spout.next_message().await.unwrap().is_none());
        assert!(handle.commits().is_empty());
    }

    #[tokio::test]
    async fn test_next_message_when_deserializer_rejects_record() {
        let consumer = MockBrokerConsumer::new();
        consumer.enqueue_record(sample_record());

        let (mut spout, handle) = spout_with(consumer, Arc::new(NullDeserializer));
        spout.open().await.unwrap();

        assert!(spout.next_message().await.unwrap().is_none());
        // The poison record is not committed past.
        assert!(handle.commits().is_empty());
        assert_eq!(spout.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_next_message_returns_none_when_filtered() {
        let consumer = MockBrokerConsumer::new();
        consumer.enqueue_record(sample_record());

        let (mut spout, handle) = spout_with(consumer, Arc::new(Utf8Deserializer));
        spout
            .filter_chain()
            .install_step(SidelineId::random(), Arc::new(StaticMessageFilter::new(true)));
        spout.open().await.unwrap();

        assert!(spout.next_message().await.unwrap().is_none());
        assert!(handle.commits().is_empty());
        assert_eq!(spout.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_next_message_happy_path() {
        let consumer = MockBrokerConsumer::new();
        consumer.enqueue_record(sample_record());

        let (mut spout, _) = spout_with(consumer, Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();

        let message = spout.next_message().await.unwrap().unwrap();
        assert_eq!(message.topic(), "MyTopic");
        assert_eq!(message.partition(), 3);
        assert_eq!(message.offset(), 434323);
        assert_eq!(
            message.values,
            vec![Bytes::from("MyKey"), Bytes::from("MyValue")]
        );
        assert_eq!(message.id.consumer_id(), "MyConsumerId");
        assert_eq!(spout.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_ending_bound_is_exclusive_and_unsubscribes() {
        let ending_offset = 4444i64;
        let tp = TopicPartition::new("MyTopic", 4);

        let consumer = MockBrokerConsumer::new();
        for offset in [ending_offset - 100, ending_offset, ending_offset + 100] {
            consumer.enqueue_record(Record::new(
                "MyTopic",
                4,
                offset,
                Some(Bytes::from("k")),
                Bytes::from("v"),
            ));
        }
        let handle = consumer.handle();

        let mut spout = VirtualSpout::new(
            "ConsumerId",
            test_config(),
            Box::new(consumer),
            Arc::new(Utf8Deserializer),
            Arc::new(MemoryPersistenceManager::new()),
        )
        .with_ending_state(
            OffsetMap::builder()
                .with_partition(tp.clone(), ending_offset)
                .build(),
        );
        spout.open().await.unwrap();

        // Strictly below the bound: emitted.
        let message = spout.next_message().await.unwrap().unwrap();
        assert_eq!(message.offset(), ending_offset - 100);

        // At the bound: dropped, partition unsubscribed.
        assert!(spout.next_message().await.unwrap().is_none());
        // Past the bound: still dropped.
        assert!(spout.next_message().await.unwrap().is_none());

        let unsubscribes = handle.unsubscribes();
        assert!(!unsubscribes.is_empty() && unsubscribes.len() <= 2);
        assert!(unsubscribes.iter().all(|got| *got == tp));

        // The only bounded partition is gone, so the spout is finished.
        assert!(spout.is_finished());
    }

    #[tokio::test]
    async fn test_ack_with_none_is_a_noop() {
        let (mut spout, handle) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));
        spout.ack(None).await.unwrap();
        assert!(handle.commits().is_empty());
    }

    #[tokio::test]
    async fn test_ack_with_stray_value_is_invalid_argument() {
        let (mut spout, handle) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));

        let stray = "not-an-id".to_string();
        let err = spout.ack(Some(&stray)).await.unwrap_err();
        assert!(matches!(err, SidelineError::InvalidArgument(_)));
        assert!(handle.commits().is_empty());
    }

    #[tokio::test]
    async fn test_ack_commits_exactly_once() {
        let (mut spout, handle) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));

        let id = MessageId::new("MyTopic", 33, 313376, "RandomConsumer");
        spout.ack(Some(&id)).await.unwrap();

        assert_eq!(
            handle.commits(),
            vec![(TopicPartition::new("MyTopic", 33), 313376)]
        );
    }

    #[tokio::test]
    async fn test_ack_removes_from_in_flight() {
        let consumer = MockBrokerConsumer::new();
        consumer.enqueue_record(sample_record());

        let (mut spout, _) = spout_with(consumer, Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();

        let message = spout.next_message().await.unwrap().unwrap();
        assert_eq!(spout.in_flight_count(), 1);

        spout.ack(Some(&message.id)).await.unwrap();
        assert_eq!(spout.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_seeks_back_and_clears_in_flight() {
        let consumer = MockBrokerConsumer::new();
        consumer.enqueue_record(sample_record());

        let (mut spout, handle) = spout_with(consumer, Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();

        let message = spout.next_message().await.unwrap().unwrap();
        spout.fail(Some(&message.id)).await.unwrap();

        assert_eq!(spout.in_flight_count(), 0);
        assert_eq!(
            handle.seeks(),
            vec![(TopicPartition::new("MyTopic", 3), 434323)]
        );
    }

    #[tokio::test]
    async fn test_fail_with_stray_value_is_invalid_argument() {
        let (mut spout, _) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));
        let err = spout.fail(Some(&42i32)).await.unwrap_err();
        assert!(matches!(err, SidelineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_exceed_check_without_bound_is_always_false() {
        let (spout, _) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));
        let id = MessageId::new("MyTopic", 1, 31332, "MyConsumerId");
        assert!(!spout.does_message_exceed_ending_offset(&id).unwrap());
    }

    #[tokio::test]
    async fn test_exceed_check_against_configured_bound() {
        let tp = TopicPartition::new("MyTopic", 1);
        let bound = 31332i64;

        let make = |ending: i64| {
            VirtualSpout::new(
                "MyConsumerId",
                test_config(),
                Box::new(MockBrokerConsumer::new()),
                Arc::new(Utf8Deserializer),
                Arc::new(MemoryPersistenceManager::new()),
            )
            .with_ending_state(OffsetMap::builder().with_partition(tp.clone(), ending).build())
        };
        let id = MessageId::new("MyTopic", 1, bound, "MyConsumerId");

        // Equal to the bound: exceeded.
        assert!(make(bound).does_message_exceed_ending_offset(&id).unwrap());
        // Bound behind the message: exceeded.
        assert!(make(bound - 100)
            .does_message_exceed_ending_offset(&id)
            .unwrap());
        // Bound ahead of the message: not exceeded.
        assert!(!make(bound + 100)
            .does_message_exceed_ending_offset(&id)
            .unwrap());
    }

    #[tokio::test]
    async fn test_exceed_check_for_undeclared_partition_is_illegal_state() {
        let spout = VirtualSpout::new(
            "MyConsumerId",
            test_config(),
            Box::new(MockBrokerConsumer::new()),
            Arc::new(Utf8Deserializer),
            Arc::new(MemoryPersistenceManager::new()),
        )
        .with_ending_state(
            OffsetMap::builder()
                .with_partition(TopicPartition::new("MyTopic", 2), 31432)
                .build(),
        );

        let id = MessageId::new("MyTopic", 1, 31332, "MyConsumerId");
        let err = spout.does_message_exceed_ending_offset(&id).unwrap_err();
        assert!(matches!(err, SidelineError::IllegalState(_)));
    }

    #[tokio::test]
    async fn test_flush_state_persists_committed_positions() {
        let consumer = MockBrokerConsumer::new();
        let handle = consumer.handle();

        let mut persistence = MemoryPersistenceManager::new();
        persistence
            .open(&crate::config::PersistenceConfig::default())
            .await
            .unwrap();
        let persistence = Arc::new(persistence);

        let mut spout = VirtualSpout::new(
            "MyConsumerId",
            test_config(),
            Box::new(consumer),
            Arc::new(Utf8Deserializer),
            Arc::clone(&persistence) as Arc<dyn PersistenceManager>,
        );
        spout.open().await.unwrap();

        let committed = OffsetMap::builder()
            .with_partition(TopicPartition::new("MyTopic", 0), 120)
            .build();
        handle.set_committed(&committed);

        spout.flush_state().await.unwrap();
        assert_eq!(
            persistence
                .retrieve_consumer_state("MyConsumerId")
                .await
                .unwrap(),
            Some(committed)
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut spout, handle) = spout_with(MockBrokerConsumer::new(), Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();

        spout.close().await.unwrap();
        spout.close().await.unwrap();

        assert_eq!(handle.close_calls(), 1);
        assert_eq!(spout.state(), SpoutState::Closed);
        assert!(spout.is_finished());
    }

    #[tokio::test]
    async fn test_in_flight_limit_pauses_polling() {
        let consumer = MockBrokerConsumer::new();
        consumer.enqueue_record(sample_record());
        consumer.enqueue_record(Record::new(
            "MyTopic",
            3,
            434324,
            None,
            Bytes::from("next"),
        ));
        let config = Arc::new(SpoutConfig {
            brokers: vec!["localhost:9092".to_string()],
            max_in_flight: 1,
            ..Default::default()
        });

        let mut spout = VirtualSpout::new(
            "MyConsumerId",
            config,
            Box::new(consumer),
            Arc::new(Utf8Deserializer),
            Arc::new(MemoryPersistenceManager::new()),
        );
        spout.open().await.unwrap();

        let first = spout.next_message().await.unwrap().unwrap();
        // The limit is reached, so the second record stays with the broker.
        assert!(spout.next_message().await.unwrap().is_none());

        spout.ack(Some(&first.id)).await.unwrap();
        let second = spout.next_message().await.unwrap().unwrap();
        assert_eq!(second.offset(), 434324);
    }

    #[tokio::test]
    async fn test_broker_error_surfaces_from_poll() {
        let consumer = MockBrokerConsumer::new();
        consumer.enqueue_poll_error("transient fault");
        consumer.enqueue_record(sample_record());

        let (mut spout, _) = spout_with(consumer, Arc::new(Utf8Deserializer));
        spout.open().await.unwrap();

        let err = spout.next_message().await.unwrap_err();
        assert!(matches!(err, SidelineError::Broker(_)));

        // The next iteration recovers.
        assert!(spout.next_message().await.unwrap().is_some());
    }
}
