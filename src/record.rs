//! Record encoding, decoding, and shared types for the collaborative store.
//!
//! This module provides the foundational data types and pure functions that
//! the client, projection, and workflow modules all depend on. No network
//! I/O occurs here.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Record kind for whole-snapshot desktop layout writes.
pub const DESKTOP_STATE_KIND: &str = "desktop_state";

/// Record kind for ticket workflow updates.
pub const UPDATE_REQUEST_KIND: &str = "update_request";

/// Record kind for ticket number counter claims.
pub const TICKET_COUNTER_KIND: &str = "ticket_counter";

/// Current unix time in milliseconds.
///
/// Timestamps in the store are writer-supplied, so this is the only clock
/// the crate consults. A system clock before the unix epoch is treated as
/// an invariant violation.
pub fn now_ms() -> i64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch");
    i64::try_from(elapsed.as_millis()).expect("unix time in ms exceeds i64")
}

/// A record as delivered to projections and workflow code.
///
/// All fields are pre-extracted from the gRPC [`Record`](crate::proto::Record)
/// row: the payload bytes are parsed into a [`serde_json::Value`] and the
/// record ID into a [`Uuid`]. Records are immutable once appended; the store
/// never updates or deletes a row in place.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    /// Client-assigned record ID.
    pub record_id: Uuid,
    /// Namespace the record belongs to (one shared desktop per namespace).
    pub namespace: String,
    /// Record kind, e.g. [`DESKTOP_STATE_KIND`] or [`UPDATE_REQUEST_KIND`].
    pub record_kind: String,
    /// Identity of the writer that appended the record.
    pub writer_id: String,
    /// JSON payload. `Null` for an empty payload.
    pub payload: serde_json::Value,
    /// Writer-supplied creation time, unix milliseconds.
    ///
    /// This is the only ordering signal the store carries. It is
    /// monotonically non-decreasing per writer but carries no cross-writer
    /// guarantee.
    pub created_at: i64,
}

/// Decode a gRPC [`Record`](crate::proto::Record) row into a [`StoreRecord`].
///
/// Returns `None` if:
///
/// - The `record_id` string is not a valid UUID.
/// - The payload bytes are non-empty but not valid UTF-8 JSON.
///
/// Rows written by other (possibly misbehaving) clients are skipped by
/// returning `None` rather than failing the whole query; this is the
/// `MalformedRecord` policy — malformed rows are never fatal to a fold.
///
/// # Arguments
///
/// * `row` - A reference to the proto `Record` from the store server.
///
/// # Returns
///
/// `Some(StoreRecord)` if all required fields parse, `None` otherwise.
pub fn decode_record(row: &crate::proto::Record) -> Option<StoreRecord> {
    let record_id = Uuid::parse_str(&row.record_id).ok()?;

    // Parse payload bytes as JSON; default to null if empty.
    let payload = if row.payload.is_empty() {
        serde_json::Value::Null
    } else {
        let payload_str = std::str::from_utf8(&row.payload).ok()?;
        serde_json::from_str(payload_str).ok()?
    };

    Some(StoreRecord {
        record_id,
        namespace: row.namespace.clone(),
        record_kind: row.record_kind.clone(),
        writer_id: row.writer_id.clone(),
        payload,
        created_at: row.created_at_ms,
    })
}
