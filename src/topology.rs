//! Host topology surface.
//!
//! [`SidelineSpout`] is the component the host stream-processing topology
//! drives: `open` wires up the coordinator and output queue, `next_tuple`
//! dequeues one message with a short non-blocking wait, and `ack`/`fail`
//! forward tuple ids back to the coordinator.
//!
//! Tuple ids cross this boundary as `&dyn Any` because the host hands back
//! whatever it stored; anything that is not a [`MessageId`] is rejected
//! with an invalid-argument error before it can reach a spout.

use crate::config::SpoutConfig;
use crate::error::{Result, SidelineError};
use crate::message::{EmittedMessage, MessageId};
use crate::spout::{SpoutCoordinator, VirtualSpout};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// How long `next_tuple` waits for a message before reporting none.
const NEXT_TUPLE_WAIT: Duration = Duration::from_millis(10);

/// The spout component exposed to the host topology.
pub struct SidelineSpout {
    config: Arc<SpoutConfig>,
    coordinator: Arc<SpoutCoordinator>,
    output: Option<mpsc::Receiver<EmittedMessage>>,
}

impl SidelineSpout {
    /// Build the spout around a firehose instance. The coordinator is
    /// shared so a [`crate::spout::SidelineHandler`] can drive sideline
    /// triggers against it.
    pub fn new(config: Arc<SpoutConfig>, firehose: VirtualSpout) -> Result<Self> {
        config.validate()?;
        let coordinator = Arc::new(SpoutCoordinator::new(firehose, Arc::clone(&config)));
        Ok(Self {
            config,
            coordinator,
            output: None,
        })
    }

    /// Coordinator handle for sideline trigger plumbing.
    pub fn coordinator(&self) -> Arc<SpoutCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Open the coordinator; returns once every seeded spout is running.
    pub async fn open(&mut self) -> Result<()> {
        if self.output.is_some() {
            return Err(SidelineError::illegal_state("spout is already open"));
        }
        let (tx, rx) = mpsc::channel(self.config.output_queue_capacity);
        self.output = Some(rx);
        self.coordinator.open(tx).await;
        Ok(())
    }

    /// Dequeue one message, waiting briefly when the queue is empty.
    pub async fn next_tuple(&mut self) -> Result<Option<EmittedMessage>> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| SidelineError::illegal_state("spout is not open"))?;
        match tokio::time::timeout(NEXT_TUPLE_WAIT, output.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            // Channel closed: every producer is gone.
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    /// Forward an ack from the host. `None` is ignored; a non-id value is
    /// an invalid argument.
    pub fn ack(&self, tuple_id: Option<&dyn Any>) -> Result<()> {
        if let Some(id) = Self::require_message_id(tuple_id, "ack")? {
            self.coordinator.ack(id);
        }
        Ok(())
    }

    /// Forward a fail from the host.
    pub fn fail(&self, tuple_id: Option<&dyn Any>) -> Result<()> {
        if let Some(id) = Self::require_message_id(tuple_id, "fail")? {
            self.coordinator.fail(id);
        }
        Ok(())
    }

    fn require_message_id(raw: Option<&dyn Any>, op: &str) -> Result<Option<MessageId>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        raw.downcast_ref::<MessageId>()
            .map(|id| Some(id.clone()))
            .ok_or_else(|| {
                SidelineError::invalid_argument(format!("{op}() requires a MessageId tuple id"))
            })
    }

    /// Shut the coordinator down and drop the output queue.
    pub async fn close(&mut self) {
        self.coordinator.close().await;
        self.output = None;
        debug!("sideline spout closed");
    }
}

impl std::fmt::Debug for SidelineSpout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidelineSpout")
            .field("open", &self.output.is_some())
            .field("running_spouts", &self.coordinator.running_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_message_id_accepts_none() {
        assert!(SidelineSpout::require_message_id(None, "ack")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_require_message_id_rejects_stray_values() {
        let stray = "not-a-message-id".to_string();
        let err = SidelineSpout::require_message_id(Some(&stray), "ack").unwrap_err();
        assert!(matches!(err, SidelineError::InvalidArgument(_)));
    }

    #[test]
    fn test_require_message_id_accepts_message_id() {
        let id = MessageId::new("MyTopic", 33, 313376, "RandomConsumer");
        let resolved = SidelineSpout::require_message_id(Some(&id), "ack")
            .unwrap()
            .unwrap();
        assert_eq!(resolved, id);
    }
}
