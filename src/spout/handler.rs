//! Translates sideline triggers into spout lifecycle events.
//!
//! START installs filter steps into the firehose and records where the
//! sideline began. STOP snapshots where it ended, removes the steps, and
//! hands the coordinator a bounded drain spout that replays exactly the
//! diverted records between the two snapshots. RESUME re-installs the
//! steps of every still-active request after a process restart.

use super::coordinator::{SharedSpout, SpoutCoordinator};
use super::virtual_spout::VirtualSpout;
use crate::broker::BrokerConsumerFactory;
use crate::config::SpoutConfig;
use crate::deserializer::Deserializer;
use crate::error::{Result, SidelineError};
use crate::filter::{
    FilterChain, FilterStep, FilterStepCodec, NegatingFilter, SidelineId,
};
use crate::metrics;
use crate::persistence::{
    PersistenceManager, SidelineRequest, SidelineRequestId, SidelineType,
};
use std::sync::Arc;
use tracing::{info, warn};

/// A sideline trigger delivered by the host.
#[derive(Debug)]
pub enum SidelineTrigger {
    /// Begin diverting records matched by these steps.
    Start {
        steps: Vec<(SidelineId, Arc<dyn FilterStep>)>,
    },
    /// Re-install steps for every persisted request still active.
    Resume,
    /// Stop diverting and drain what was sidelined.
    Stop { request_id: SidelineRequestId },
}

/// Drives sideline lifecycle against a coordinator.
pub struct SidelineHandler {
    config: Arc<SpoutConfig>,
    coordinator: Arc<SpoutCoordinator>,
    persistence: Arc<dyn PersistenceManager>,
    consumer_factory: Arc<dyn BrokerConsumerFactory>,
    deserializer: Arc<dyn Deserializer>,
    step_codec: Arc<dyn FilterStepCodec>,
}

impl SidelineHandler {
    pub fn new(
        config: Arc<SpoutConfig>,
        coordinator: Arc<SpoutCoordinator>,
        persistence: Arc<dyn PersistenceManager>,
        consumer_factory: Arc<dyn BrokerConsumerFactory>,
        deserializer: Arc<dyn Deserializer>,
        step_codec: Arc<dyn FilterStepCodec>,
    ) -> Self {
        Self {
            config,
            coordinator,
            persistence,
            consumer_factory,
            deserializer,
            step_codec,
        }
    }

    /// Dispatch one trigger.
    pub async fn handle(&self, trigger: SidelineTrigger) -> Result<Option<SidelineRequestId>> {
        match trigger {
            SidelineTrigger::Start { steps } => self.start_sideline(steps).await.map(Some),
            SidelineTrigger::Resume => {
                self.resume_sidelines().await?;
                Ok(None)
            }
            SidelineTrigger::Stop { request_id } => {
                self.stop_sideline(request_id).await?;
                Ok(Some(request_id))
            }
        }
    }

    /// Begin a sideline: install the steps into the firehose, snapshot its
    /// current offsets as the starting point, and persist the request.
    pub async fn start_sideline(
        &self,
        steps: Vec<(SidelineId, Arc<dyn FilterStep>)>,
    ) -> Result<SidelineRequestId> {
        if steps.is_empty() {
            return Err(SidelineError::invalid_argument(
                "a sideline requires at least one filter step",
            ));
        }
        let blob = self.step_codec.encode(&steps)?;

        let firehose = self.coordinator.firehose();
        let (chain, starting_state) = {
            let spout = firehose.lock().await;
            (spout.filter_chain(), spout.current_state())
        };
        for (id, step) in &steps {
            chain.install_step(*id, Arc::clone(step));
        }

        let request_id = SidelineRequestId::random();
        let request = SidelineRequest::started(request_id, starting_state, blob);
        self.persistence.persist_sideline_request(&request).await?;

        metrics::record_sideline_started();
        info!(request_id = %request_id, steps = steps.len(), "sideline started");
        Ok(request_id)
    }

    /// Re-install filter steps for every persisted request that has not
    /// been stopped. Called once on process restart.
    pub async fn resume_sidelines(&self) -> Result<usize> {
        let requests = self.persistence.list_sideline_requests().await?;
        let firehose = self.coordinator.firehose();
        let chain = firehose.lock().await.filter_chain();

        let mut resumed = 0;
        for request in requests {
            if request.sideline_type == SidelineType::Stop {
                continue;
            }
            let steps = match self.step_codec.decode(&request.filter_chain_steps) {
                Ok(steps) => steps,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "cannot decode persisted filter steps, skipping");
                    continue;
                }
            };
            for (id, step) in steps {
                chain.install_step(id, step);
            }

            let resumed_request = SidelineRequest {
                sideline_type: SidelineType::Resume,
                ..request
            };
            self.persistence
                .persist_sideline_request(&resumed_request)
                .await?;

            metrics::record_sideline_resumed();
            resumed += 1;
        }
        info!(resumed, "sidelines resumed");
        Ok(resumed)
    }

    /// End a sideline: snapshot the firehose offsets as the ending bound,
    /// remove the steps from the firehose, and start a bounded drain spout
    /// covering `[startingOffsets, endingOffsets)` of the diverted subset.
    pub async fn stop_sideline(&self, request_id: SidelineRequestId) -> Result<SharedSpout> {
        let request = self
            .persistence
            .retrieve_sideline_request(request_id)
            .await?
            .ok_or_else(|| {
                SidelineError::invalid_argument(format!("unknown sideline request {request_id}"))
            })?;
        if request.sideline_type == SidelineType::Stop {
            return Err(SidelineError::illegal_state(format!(
                "sideline request {request_id} is already stopped"
            )));
        }
        let steps = self.step_codec.decode(&request.filter_chain_steps)?;

        let firehose = self.coordinator.firehose();
        let (chain, ending_state) = {
            let spout = firehose.lock().await;
            (spout.filter_chain(), spout.current_state())
        };
        for (id, _) in &steps {
            if chain.remove_step(*id).is_none() {
                warn!(request_id = %request_id, sideline_id = %id, "step was not installed on the firehose");
            }
        }

        let request = request.into_stopped(ending_state.clone());
        self.persistence.persist_sideline_request(&request).await?;

        // The drain spout keeps exactly what the firehose was diverting:
        // the stopped steps, negated.
        let mut stopped_chain = FilterChain::new();
        for (id, step) in steps {
            stopped_chain.add_step(id, step);
        }
        let negated: Arc<dyn FilterStep> = Arc::new(NegatingFilter::new(stopped_chain));

        let consumer_id = format!("{}-{}", self.config.consumer_id_prefix, request_id);
        let consumer = self
            .consumer_factory
            .create(&consumer_id, request.starting_state.as_ref());
        let drain = VirtualSpout::new(
            consumer_id.clone(),
            Arc::clone(&self.config),
            consumer,
            Arc::clone(&self.deserializer),
            Arc::clone(&self.persistence),
        )
        .with_ending_state(ending_state)
        .with_filter_steps([(SidelineId::random(), negated)]);

        let shared = self.coordinator.add_spout(drain);
        metrics::record_sideline_stopped();
        info!(request_id = %request_id, consumer_id = %consumer_id, "sideline stopped, drain spout queued");
        Ok(shared)
    }
}
