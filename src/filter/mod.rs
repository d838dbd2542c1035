//! Filter chain evaluated against each raw record.
//!
//! A [`FilterChain`] is an ordered set of steps keyed by [`SidelineId`], at
//! most one step per id. Evaluation short-circuits: the first step that
//! answers "drop" wins. The chain is owned by one virtual spout; external
//! writers (the sideline handler installing or removing steps) go through
//! the spout's published install operation, never through a raw reference.

mod codec;
mod steps;

pub use codec::{FilterStepCodec, JsonStepCodec};
pub use steps::{KeyPrefixFilter, NegatingFilter, StaticMessageFilter};

use crate::message::Record;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifies one sideline and the filter step it installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SidelineId(Uuid);

impl SidelineId {
    /// Generate a fresh identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SidelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Predicate over a raw record. Answering `true` drops the record from the
/// stream that owns the chain.
pub trait FilterStep: Send + Sync + fmt::Debug {
    /// Should this record be dropped?
    fn should_filter(&self, record: &Record) -> bool;

    /// Downcast support for step codecs.
    fn as_any(&self) -> &dyn Any;
}

/// Ordered, keyed collection of filter steps.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    steps: Vec<(SidelineId, Arc<dyn FilterStep>)>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a step under `id`. An existing step with the same id is
    /// replaced in place, keeping its position in the chain.
    pub fn add_step(&mut self, id: SidelineId, step: Arc<dyn FilterStep>) {
        if let Some(existing) = self.steps.iter_mut().find(|(sid, _)| *sid == id) {
            existing.1 = step;
        } else {
            self.steps.push((id, step));
        }
    }

    /// Remove the step installed under `id`, returning it when present.
    pub fn remove_step(&mut self, id: SidelineId) -> Option<Arc<dyn FilterStep>> {
        let pos = self.steps.iter().position(|(sid, _)| *sid == id)?;
        Some(self.steps.remove(pos).1)
    }

    pub fn has_step(&self, id: SidelineId) -> bool {
        self.steps.iter().any(|(sid, _)| *sid == id)
    }

    /// Evaluate the chain against a record: `true` as soon as any step
    /// answers drop, `false` when every step passes.
    pub fn evaluate(&self, record: &Record) -> bool {
        self.steps
            .iter()
            .any(|(_, step)| step.should_filter(record))
    }

    /// Steps in installation order.
    pub fn steps(&self) -> &[(SidelineId, Arc<dyn FilterStep>)] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
