//! Metric definitions and recording helpers.
//!
//! Emitted through the `metrics` facade; the host picks the exporter.

use ::metrics::{counter, gauge};

/// Total number of started sidelines.
pub const SIDELINES_STARTED: &str = "sideline_requests_started_total";
/// Total number of stopped sidelines.
pub const SIDELINES_STOPPED: &str = "sideline_requests_stopped_total";
/// Total number of resumed sidelines after restart.
pub const SIDELINES_RESUMED: &str = "sideline_requests_resumed_total";
/// Messages emitted into the output queue, per virtual spout.
pub const MESSAGES_EMITTED: &str = "sideline_messages_emitted_total";
/// Records dropped by the filter chain, per virtual spout.
pub const MESSAGES_FILTERED: &str = "sideline_messages_filtered_total";
/// Records dropped because the deserializer rejected them.
pub const MESSAGES_POISONED: &str = "sideline_messages_poisoned_total";
/// Virtual spouts currently running under the coordinator.
pub const RUNNING_SPOUTS: &str = "sideline_running_spouts";

pub(crate) fn record_sideline_started() {
    counter!(SIDELINES_STARTED).increment(1);
}

pub(crate) fn record_sideline_stopped() {
    counter!(SIDELINES_STOPPED).increment(1);
}

pub(crate) fn record_sideline_resumed() {
    counter!(SIDELINES_RESUMED).increment(1);
}

pub(crate) fn record_message_emitted(consumer_id: &str) {
    counter!(MESSAGES_EMITTED, "consumer_id" => consumer_id.to_string()).increment(1);
}

pub(crate) fn record_message_filtered(consumer_id: &str) {
    counter!(MESSAGES_FILTERED, "consumer_id" => consumer_id.to_string()).increment(1);
}

pub(crate) fn record_message_poisoned(consumer_id: &str) {
    counter!(MESSAGES_POISONED, "consumer_id" => consumer_id.to_string()).increment(1);
}

pub(crate) fn set_running_spouts(count: usize) {
    gauge!(RUNNING_SPOUTS).set(count as f64);
}
