//! Pluggable payload deserialization.
//!
//! A [`Deserializer`] turns a raw record into the tuple values emitted into
//! the host topology. Returning `None` marks the record as poison: the spout
//! drops it without emitting and without committing past it.

use crate::message::Values;
use bytes::Bytes;

/// Turns raw record bytes into emitted tuple values.
pub trait Deserializer: Send + Sync {
    /// Deserialize one record. `None` means the record cannot be
    /// represented and should be dropped.
    fn deserialize(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> Option<Values>;
}

/// Emits `(key, value)` as two UTF-8 payload fields.
///
/// Bytes pass through unchanged; a missing key becomes an empty field so the
/// tuple shape stays stable.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Deserializer;

impl Deserializer for Utf8Deserializer {
    fn deserialize(
        &self,
        _topic: &str,
        _partition: i32,
        _offset: i64,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> Option<Values> {
        let key = key.map_or_else(Bytes::new, Bytes::copy_from_slice);
        Some(vec![key, Bytes::copy_from_slice(value)])
    }
}
