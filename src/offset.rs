//! Per-partition offset snapshots.
//!
//! An [`OffsetMap`] is an immutable mapping from `(topic, partition)` to the
//! next unconsumed offset, built through an accumulating [`OffsetMapBuilder`].
//! Successive snapshots produced for the same consumer are monotone
//! non-decreasing per partition.
//!
//! The serialized wire form is a flat JSON object whose keys are
//! `"{topic}-{partition}"` and whose values are the offsets; this is the
//! exact layout consumed by the persistence layer.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A topic name paired with a partition number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Immutable snapshot of per-partition offsets.
///
/// Iteration order is sorted by `(topic, partition)` so two equal maps also
/// serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetMap {
    offsets: BTreeMap<TopicPartition, i64>,
}

impl OffsetMap {
    /// Start accumulating a new snapshot.
    pub fn builder() -> OffsetMapBuilder {
        OffsetMapBuilder::default()
    }

    /// Number of partitions tracked.
    pub fn size(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Whether the snapshot tracks this partition.
    pub fn contains(&self, tp: &TopicPartition) -> bool {
        self.offsets.contains_key(tp)
    }

    /// Offset for a partition, or `None` when untracked.
    pub fn offset(&self, tp: &TopicPartition) -> Option<i64> {
        self.offsets.get(tp).copied()
    }

    /// Iterate over `(partition, offset)` entries in sorted order.
    pub fn entries(&self) -> impl Iterator<Item = (&TopicPartition, i64)> {
        self.offsets.iter().map(|(tp, off)| (tp, *off))
    }

    /// Partitions tracked by this snapshot.
    pub fn partitions(&self) -> impl Iterator<Item = &TopicPartition> {
        self.offsets.keys()
    }
}

/// Accumulating builder for [`OffsetMap`].
#[derive(Debug, Default)]
pub struct OffsetMapBuilder {
    offsets: BTreeMap<TopicPartition, i64>,
}

impl OffsetMapBuilder {
    /// Record the offset for a partition. A later call for the same
    /// partition replaces the earlier value.
    pub fn with_partition(mut self, tp: TopicPartition, offset: i64) -> Self {
        self.offsets.insert(tp, offset);
        self
    }

    pub fn build(self) -> OffsetMap {
        OffsetMap {
            offsets: self.offsets,
        }
    }
}

impl Serialize for OffsetMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.offsets.len()))?;
        for (tp, offset) in &self.offsets {
            map.serialize_entry(&tp.to_string(), offset)?;
        }
        map.end()
    }
}

struct OffsetMapVisitor;

impl<'de> Visitor<'de> for OffsetMapVisitor {
    type Value = OffsetMap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of \"topic-partition\" keys to integer offsets")
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut access: A,
    ) -> std::result::Result<Self::Value, A::Error> {
        let mut offsets = BTreeMap::new();
        while let Some((key, offset)) = access.next_entry::<String, i64>()? {
            // The partition number follows the last dash; topics may
            // themselves contain dashes.
            let (topic, partition) = key.rsplit_once('-').ok_or_else(|| {
                serde::de::Error::custom(format!("malformed offset key: {key}"))
            })?;
            let partition: i32 = partition.parse().map_err(|_| {
                serde::de::Error::custom(format!("malformed partition in offset key: {key}"))
            })?;
            offsets.insert(TopicPartition::new(topic, partition), offset);
        }
        Ok(OffsetMap { offsets })
    }
}

impl<'de> Deserialize<'de> for OffsetMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(OffsetMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_queries() {
        let tp0 = TopicPartition::new("MyTopic", 0);
        let tp1 = TopicPartition::new("MyTopic", 1);
        let tp3 = TopicPartition::new("MyTopic", 3);

        let map = OffsetMap::builder()
            .with_partition(tp0.clone(), 0)
            .with_partition(tp1.clone(), 100)
            .with_partition(tp3.clone(), 300)
            .build();

        assert_eq!(map.size(), 3);
        assert!(map.contains(&tp0));
        assert_eq!(map.offset(&tp0), Some(0));
        assert_eq!(map.offset(&tp1), Some(100));
        assert_eq!(map.offset(&tp3), Some(300));
        assert_eq!(map.offset(&TopicPartition::new("MyTopic", 2)), None);
    }

    #[test]
    fn test_builder_replaces_duplicate_partition() {
        let tp = TopicPartition::new("MyTopic", 0);
        let map = OffsetMap::builder()
            .with_partition(tp.clone(), 10)
            .with_partition(tp.clone(), 20)
            .build();
        assert_eq!(map.size(), 1);
        assert_eq!(map.offset(&tp), Some(20));
    }

    #[test]
    fn test_value_equality() {
        let a = OffsetMap::builder()
            .with_partition(TopicPartition::new("t", 0), 5)
            .with_partition(TopicPartition::new("t", 1), 6)
            .build();
        // Insertion order is irrelevant.
        let b = OffsetMap::builder()
            .with_partition(TopicPartition::new("t", 1), 6)
            .with_partition(TopicPartition::new("t", 0), 5)
            .build();
        assert_eq!(a, b);

        let c = OffsetMap::builder()
            .with_partition(TopicPartition::new("t", 0), 7)
            .build();
        assert_ne!(a, c);
    }

    #[test]
    fn test_json_wire_form() {
        let map = OffsetMap::builder()
            .with_partition(TopicPartition::new("MyTopic", 0), 0)
            .with_partition(TopicPartition::new("MyTopic", 3), 300)
            .build();

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"MyTopic-0":0,"MyTopic-3":300}"#);

        let back: OffsetMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_wire_form_topic_with_dashes() {
        let tp = TopicPartition::new("my-dashed-topic", 12);
        let map = OffsetMap::builder().with_partition(tp.clone(), 42).build();

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"my-dashed-topic-12":42}"#);

        let back: OffsetMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.offset(&tp), Some(42));
    }

    #[test]
    fn test_wire_form_rejects_malformed_keys() {
        assert!(serde_json::from_str::<OffsetMap>(r#"{"nopartition":1}"#).is_err());
        assert!(serde_json::from_str::<OffsetMap>(r#"{"topic-notanumber":1}"#).is_err());
    }
}
