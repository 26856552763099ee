//! LeadStore - generic persistent record store
//!
//! Records are serialized as JSON documents in SQLite, one table for all
//! collections. Each record declares a set of indexed fields that are kept in
//! a side table so callers can list by status (or any other field) without
//! deserializing the whole collection.
//!
//! Writes are synchronous; callers that need async access wrap the `Store` in
//! an actor that owns it exclusively.

mod error;
mod filter;
mod record;
mod store;

pub use error::{StoreError, StoreResult};
pub use filter::{Filter, FilterOp, IndexValue};
pub use record::Record;
pub use store::{DB_FILE_NAME, Store};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
