use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::filter::IndexValue;

/// A type that can be persisted in the store
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    /// Stable unique identifier within the collection
    fn id(&self) -> &str;

    /// Last modification time in milliseconds
    fn updated_at(&self) -> i64;

    /// Collection (logical table) the record lives in
    fn collection_name() -> &'static str;

    /// Fields mirrored into the index table for filtering
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
