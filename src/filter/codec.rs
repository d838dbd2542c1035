//! Serialization of filter steps for sideline request persistence.
//!
//! Persisted sideline requests carry their filter steps as an opaque blob;
//! the persistence layer never interprets it. A [`FilterStepCodec`] is the
//! collaborator that produces and consumes that blob. [`JsonStepCodec`]
//! covers the built-in steps; hosts with user-defined predicates supply
//! their own codec.

use super::steps::{KeyPrefixFilter, NegatingFilter, StaticMessageFilter};
use super::{FilterChain, FilterStep, SidelineId};
use crate::error::{Result, SidelineError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Encodes and decodes the steps of a filter chain as opaque bytes.
pub trait FilterStepCodec: Send + Sync {
    fn encode(&self, steps: &[(SidelineId, Arc<dyn FilterStep>)]) -> Result<Vec<u8>>;

    fn decode(&self, blob: &[u8]) -> Result<Vec<(SidelineId, Arc<dyn FilterStep>)>>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StepDescriptor {
    Static { filter: bool },
    KeyPrefix { prefix: Vec<u8> },
    Negated { steps: Vec<StepEntry> },
}

#[derive(Debug, Serialize, Deserialize)]
struct StepEntry {
    id: SidelineId,
    #[serde(flatten)]
    descriptor: StepDescriptor,
}

/// JSON codec for the built-in filter steps.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStepCodec;

impl JsonStepCodec {
    fn descriptor_for(step: &dyn FilterStep) -> Result<StepDescriptor> {
        let any = step.as_any();
        if let Some(s) = any.downcast_ref::<StaticMessageFilter>() {
            return Ok(StepDescriptor::Static { filter: s.answer() });
        }
        if let Some(s) = any.downcast_ref::<KeyPrefixFilter>() {
            return Ok(StepDescriptor::KeyPrefix {
                prefix: s.prefix().to_vec(),
            });
        }
        if let Some(s) = any.downcast_ref::<NegatingFilter>() {
            let steps = s
                .inner()
                .steps()
                .iter()
                .map(|(id, step)| {
                    Ok(StepEntry {
                        id: *id,
                        descriptor: Self::descriptor_for(step.as_ref())?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(StepDescriptor::Negated { steps });
        }
        Err(SidelineError::invalid_argument(format!(
            "step {step:?} is not serializable by the JSON step codec"
        )))
    }

    fn step_for(descriptor: StepDescriptor) -> Arc<dyn FilterStep> {
        match descriptor {
            StepDescriptor::Static { filter } => Arc::new(StaticMessageFilter::new(filter)),
            StepDescriptor::KeyPrefix { prefix } => Arc::new(KeyPrefixFilter::new(prefix)),
            StepDescriptor::Negated { steps } => {
                let mut chain = FilterChain::new();
                for entry in steps {
                    chain.add_step(entry.id, Self::step_for(entry.descriptor));
                }
                Arc::new(NegatingFilter::new(chain))
            }
        }
    }
}

impl FilterStepCodec for JsonStepCodec {
    fn encode(&self, steps: &[(SidelineId, Arc<dyn FilterStep>)]) -> Result<Vec<u8>> {
        let entries = steps
            .iter()
            .map(|(id, step)| {
                Ok(StepEntry {
                    id: *id,
                    descriptor: Self::descriptor_for(step.as_ref())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_vec(&entries)?)
    }

    fn decode(&self, blob: &[u8]) -> Result<Vec<(SidelineId, Arc<dyn FilterStep>)>> {
        let entries: Vec<StepEntry> = serde_json::from_slice(blob)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.id, Self::step_for(entry.descriptor)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Record;
    use bytes::Bytes;

    #[test]
    fn test_roundtrip_builtin_steps() {
        let codec = JsonStepCodec;
        let audit_id = SidelineId::random();
        let static_id = SidelineId::random();

        let steps: Vec<(SidelineId, Arc<dyn FilterStep>)> = vec![
            (audit_id, Arc::new(KeyPrefixFilter::new(b"audit.".to_vec()))),
            (static_id, Arc::new(StaticMessageFilter::new(false))),
        ];

        let blob = codec.encode(&steps).unwrap();
        let decoded = codec.decode(&blob).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0, audit_id);
        assert_eq!(decoded[1].0, static_id);

        let audit = Record::new("t", 0, 1, Some(Bytes::from("audit.x")), Bytes::from("v"));
        assert!(decoded[0].1.should_filter(&audit));
        assert!(!decoded[1].1.should_filter(&audit));
    }

    #[test]
    fn test_roundtrip_negated_chain() {
        let codec = JsonStepCodec;
        let inner_id = SidelineId::random();

        let mut inner = FilterChain::new();
        inner.add_step(inner_id, Arc::new(KeyPrefixFilter::new(b"audit.".to_vec())));

        let negated_id = SidelineId::random();
        let steps: Vec<(SidelineId, Arc<dyn FilterStep>)> =
            vec![(negated_id, Arc::new(NegatingFilter::new(inner)))];

        let blob = codec.encode(&steps).unwrap();
        let decoded = codec.decode(&blob).unwrap();

        let audit = Record::new("t", 0, 1, Some(Bytes::from("audit.x")), Bytes::from("v"));
        let other = Record::new("t", 0, 1, Some(Bytes::from("orders.x")), Bytes::from("v"));
        assert!(!decoded[0].1.should_filter(&audit));
        assert!(decoded[0].1.should_filter(&other));
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        #[derive(Debug)]
        struct Custom;
        impl FilterStep for Custom {
            fn should_filter(&self, _record: &Record) -> bool {
                false
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let codec = JsonStepCodec;
        let steps: Vec<(SidelineId, Arc<dyn FilterStep>)> =
            vec![(SidelineId::random(), Arc::new(Custom))];
        assert!(codec.encode(&steps).is_err());
    }
}
