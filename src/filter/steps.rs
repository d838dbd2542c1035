//! Built-in filter steps.

use super::{FilterChain, FilterStep};
use crate::message::Record;
use std::any::Any;

/// Constant-answer filter. Useful as a building block and in tests where a
/// chain must deterministically drop or pass everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticMessageFilter {
    filter: bool,
}

impl StaticMessageFilter {
    pub fn new(filter: bool) -> Self {
        Self { filter }
    }

    pub fn answer(&self) -> bool {
        self.filter
    }
}

impl FilterStep for StaticMessageFilter {
    fn should_filter(&self, _record: &Record) -> bool {
        self.filter
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Drops records whose key starts with the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefixFilter {
    prefix: Vec<u8>,
}

impl KeyPrefixFilter {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }
}

impl FilterStep for KeyPrefixFilter {
    fn should_filter(&self, record: &Record) -> bool {
        record
            .key
            .as_ref()
            .is_some_and(|key| key.starts_with(&self.prefix))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Inverts a chain of steps: drops every record the wrapped chain would
/// have let through.
///
/// This is how a stopped sideline is drained: the bounded spout carries the
/// negation of the stopped steps, so it emits exactly the records the
/// firehose was diverting while the sideline was active.
#[derive(Debug, Clone)]
pub struct NegatingFilter {
    inner: FilterChain,
}

impl NegatingFilter {
    pub fn new(inner: FilterChain) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &FilterChain {
        &self.inner
    }
}

impl FilterStep for NegatingFilter {
    fn should_filter(&self, record: &Record) -> bool {
        !self.inner.evaluate(record)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SidelineId;
    use bytes::Bytes;
    use std::sync::Arc;

    fn record_with_key(key: &str) -> Record {
        Record::new("t", 0, 1, Some(Bytes::copy_from_slice(key.as_bytes())), Bytes::from("v"))
    }

    #[test]
    fn test_static_filter() {
        let record = record_with_key("k");
        assert!(StaticMessageFilter::new(true).should_filter(&record));
        assert!(!StaticMessageFilter::new(false).should_filter(&record));
    }

    #[test]
    fn test_key_prefix_filter() {
        let filter = KeyPrefixFilter::new(b"audit.".to_vec());
        assert!(filter.should_filter(&record_with_key("audit.login")));
        assert!(!filter.should_filter(&record_with_key("orders.created")));

        // Keyless records never match a prefix.
        let keyless = Record::new("t", 0, 1, None, Bytes::from("v"));
        assert!(!filter.should_filter(&keyless));
    }

    #[test]
    fn test_negating_filter_inverts_chain() {
        let mut chain = FilterChain::new();
        chain.add_step(
            SidelineId::random(),
            Arc::new(KeyPrefixFilter::new(b"audit.".to_vec())),
        );
        let negated = NegatingFilter::new(chain);

        // The sidelined records now pass, everything else drops.
        assert!(!negated.should_filter(&record_with_key("audit.login")));
        assert!(negated.should_filter(&record_with_key("orders.created")));
    }
}
