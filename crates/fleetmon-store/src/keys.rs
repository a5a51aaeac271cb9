//! Log key encoding and content fingerprinting.
//!
//! Log records are stored in the primary backend under
//! `{nanos:019}{id}`: a fixed-width, zero-padded decimal encoding of the
//! record's nanosecond timestamp concatenated with its identifier.
//! Lexicographic key order therefore equals chronological order, with ties
//! broken by identifier, so ordered scans need no secondary index.

use chrono::{DateTime, Utc};
use fleetmon_core::logs::LogRecord;
use sha2::{Digest, Sha256};

/// Width of the zero-padded nanosecond prefix. Covers every i64 value.
const TS_WIDTH: usize = 19;

/// Length of a derived record identifier (hex characters).
const FINGERPRINT_LEN: usize = 16;

pub(crate) fn nanos(ts: DateTime<Utc>) -> u64 {
    // Pre-epoch and far-future timestamps clamp rather than break the
    // fixed-width encoding.
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX).max(0) as u64
}

/// Encode the storage key for a log record.
pub fn encode_log_key(ts: DateTime<Utc>, id: &str) -> String {
    format!("{:0width$}{}", nanos(ts), id, width = TS_WIDTH)
}

/// The key prefix for a timestamp; every record at or after `ts` sorts at or
/// above this. Used as the exclusive upper bound for retention deletes.
pub fn cutoff_key(ts: DateTime<Utc>) -> String {
    format!("{:0width$}", nanos(ts), width = TS_WIDTH)
}

/// Exclusive upper bound covering every record with timestamp <= `ts`.
pub fn upper_bound_key(ts: DateTime<Utc>) -> String {
    format!("{:0width$}", nanos(ts).saturating_add(1), width = TS_WIDTH)
}

/// Derive a deterministic identifier for a record that arrived without one:
/// a SHA-256 over the identifying fields, truncated to a short hex string.
/// Collisions are treated as negligible; this is the sole dedup mechanism.
pub fn fingerprint(record: &LogRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.agent_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(nanos(record.timestamp).to_be_bytes());
    hasher.update([0x1f]);
    hasher.update(record.kind.as_bytes());
    hasher.update([0x1f]);
    hasher.update(record.target_vm.as_bytes());
    hasher.update([0x1f]);
    hasher.update(record.message.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..FINGERPRINT_LEN / 2])
}

/// Fill in the record's identifier if the source supplied none.
pub fn ensure_id(record: &mut LogRecord) {
    if record.id.is_empty() {
        record.id = fingerprint(record);
    }
}
