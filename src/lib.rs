#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Sideline
//!
//! A sideline-capable message streaming spout: it consumes records from a
//! partitioned commit-log broker and emits them as tuples into a host
//! stream-processing topology, while supporting the *sidelining* of
//! selected record subsets into bounded, resumable sub-streams.
//!
//! ## How sidelining works
//!
//! The main stream (the *firehose*) is one unbounded [`spout::VirtualSpout`].
//! Starting a sideline installs filter steps into the firehose's chain, so
//! matching records are diverted (dropped from emission) from that point
//! on; the firehose's offsets at that instant are persisted as the
//! sideline's starting point. Stopping the sideline removes the steps,
//! persists the ending offsets, and starts a *bounded* virtual spout that
//! replays only the diverted records between the two snapshots. The
//! [`spout::SpoutCoordinator`] runs all of these spouts on parallel
//! workers and fans their messages into a single output queue.
//!
//! ## Delivery semantics
//!
//! At-least-once. Offsets advance only through host acks; failed tuples
//! are sought back and redelivered. Records dropped by filtering or by a
//! failed deserialization are not committed, so a restart may redeliver
//! them until a later ack moves the group offset past them.
//!
//! ## Quick start
//!
//! ```no_run
//! use sideline::broker::{MemoryBrokerConsumer, MemoryLog};
//! use sideline::config::SpoutConfig;
//! use sideline::deserializer::Utf8Deserializer;
//! use sideline::offset::TopicPartition;
//! use sideline::persistence::MemoryPersistenceManager;
//! use sideline::spout::VirtualSpout;
//! use sideline::topology::SidelineSpout;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sideline::Result<()> {
//!     let config = Arc::new(SpoutConfig {
//!         brokers: vec!["localhost:9092".into()],
//!         ..Default::default()
//!     });
//!
//!     let log = MemoryLog::new();
//!     let consumer = MemoryBrokerConsumer::new(
//!         Arc::clone(&log),
//!         [TopicPartition::new("orders", 0)],
//!         None,
//!     );
//!     let firehose = VirtualSpout::new(
//!         "firehose",
//!         Arc::clone(&config),
//!         Box::new(consumer),
//!         Arc::new(Utf8Deserializer),
//!         Arc::new(MemoryPersistenceManager::new()),
//!     );
//!
//!     let mut spout = SidelineSpout::new(config, firehose)?;
//!     spout.open().await?;
//!     while let Some(message) = spout.next_tuple().await? {
//!         // emit into the topology, later ack with message.id
//!         spout.ack(Some(&message.id))?;
//!     }
//!     spout.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`spout`]: virtual spouts, the coordinator, and the sideline handler
//! - [`broker`]: the commit-log consumer contract and an in-memory log
//! - [`filter`]: filter steps, chains, and the step codec
//! - [`persistence`]: durable offset snapshots and sideline requests
//! - [`topology`]: the host-facing spout surface
//! - [`config`]: configuration and tunables
//! - [`metrics`]: metric names recorded through the `metrics` facade
//! - [`testing`]: scripted test doubles

pub mod broker;
pub mod config;
pub mod deserializer;
pub mod error;
pub mod filter;
pub mod message;
pub mod metrics;
pub mod offset;
pub mod persistence;
pub mod spout;
pub mod testing;
pub mod topology;

pub use error::{Result, SidelineError};
pub use message::{EmittedMessage, MessageId, Record};
pub use offset::{OffsetMap, TopicPartition};
