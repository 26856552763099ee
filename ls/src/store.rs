//! SQLite-backed document store

use std::collections::HashMap;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::filter::{Filter, IndexValue};
use crate::record::Record;

/// File name of the database inside the store directory
pub const DB_FILE_NAME: &str = "leadstore.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(collection, id)
);

CREATE TABLE IF NOT EXISTS record_indexes (
    collection TEXT NOT NULL,
    record_id TEXT NOT NULL,
    field TEXT NOT NULL,
    value,
    PRIMARY KEY(collection, record_id, field)
);

CREATE INDEX IF NOT EXISTS idx_record_indexes_field ON record_indexes(collection, field, value);
";

/// Persistent record store
///
/// Records keep their insertion order: `list` returns them in the order they
/// were first written, and upserts do not move a record.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a store in the given directory
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        debug!(dir = %dir.display(), "open: called");
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join(DB_FILE_NAME))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!(dir = %dir.display(), "Store opened");
        Ok(Self { conn })
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("open_in_memory: called");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a new record; fails if one with the same id exists
    pub fn create<T: Record>(&mut self, record: T) -> StoreResult<String> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(%collection, %id, "create: called");

        let tx = self.conn.transaction()?;
        if exists(&tx, collection, &id)? {
            debug!(%collection, %id, "create: record already exists");
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id,
            });
        }
        let data = serde_json::to_string(&record)?;
        tx.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, data, record.updated_at()],
        )?;
        write_indexes(&tx, collection, &id, &record.indexed_fields())?;
        tx.commit()?;
        Ok(id)
    }

    /// Fetch a record by id
    pub fn get<T: Record>(&self, id: &str) -> StoreResult<Option<T>> {
        let collection = T::collection_name();
        debug!(%collection, %id, "get: called");
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Replace an existing record; fails if it does not exist
    pub fn update<T: Record>(&mut self, record: T) -> StoreResult<()> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(%collection, %id, "update: called");

        let tx = self.conn.transaction()?;
        let data = serde_json::to_string(&record)?;
        let changed = tx.execute(
            "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
            params![collection, id, data, record.updated_at()],
        )?;
        if changed == 0 {
            debug!(%collection, %id, "update: record not found");
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id,
            });
        }
        write_indexes(&tx, collection, &id, &record.indexed_fields())?;
        tx.commit()?;
        Ok(())
    }

    /// Insert or replace a record, keyed by id
    pub fn upsert<T: Record>(&mut self, record: T) -> StoreResult<()> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(%collection, %id, "upsert: called");

        let tx = self.conn.transaction()?;
        let data = serde_json::to_string(&record)?;
        tx.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![collection, id, data, record.updated_at()],
        )?;
        write_indexes(&tx, collection, &id, &record.indexed_fields())?;
        tx.commit()?;
        Ok(())
    }

    /// List records matching every filter, in insertion order
    pub fn list<T: Record>(&self, filters: &[Filter]) -> StoreResult<Vec<T>> {
        let collection = T::collection_name();
        debug!(%collection, filter_count = filters.len(), "list: called");

        let mut sql = String::from("SELECT r.data FROM records r WHERE r.collection = ?1");
        let mut values: Vec<Value> = vec![Value::Text(collection.to_string())];
        for filter in filters {
            values.push(Value::Text(filter.field.clone()));
            let field_idx = values.len();
            values.push(filter.value.to_sql());
            let value_idx = values.len();
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM record_indexes i WHERE i.collection = r.collection \
                 AND i.record_id = r.id AND i.field = ?{} AND i.value {} ?{})",
                field_idx,
                filter.op.as_sql(),
                value_idx
            ));
        }
        sql.push_str(" ORDER BY r.seq");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        debug!(%collection, count = records.len(), "list: done");
        Ok(records)
    }

    /// Recompute the index table for every record of a collection
    pub fn rebuild_indexes<T: Record>(&mut self) -> StoreResult<usize> {
        let collection = T::collection_name();
        debug!(%collection, "rebuild_indexes: called");

        let tx = self.conn.transaction()?;
        let documents: Vec<String> = {
            let mut stmt = tx.prepare("SELECT data FROM records WHERE collection = ?1 ORDER BY seq")?;
            let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        tx.execute("DELETE FROM record_indexes WHERE collection = ?1", params![collection])?;
        for data in &documents {
            let record: T = serde_json::from_str(data)?;
            write_indexes(&tx, collection, record.id(), &record.indexed_fields())?;
        }
        tx.commit()?;
        Ok(documents.len())
    }
}

fn exists(tx: &Transaction<'_>, collection: &str, id: &str) -> StoreResult<bool> {
    let found: Option<i64> = tx
        .query_row(
            "SELECT seq FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn write_indexes(
    tx: &Transaction<'_>,
    collection: &str,
    id: &str,
    fields: &HashMap<String, IndexValue>,
) -> StoreResult<()> {
    tx.execute(
        "DELETE FROM record_indexes WHERE collection = ?1 AND record_id = ?2",
        params![collection, id],
    )?;
    for (field, value) in fields {
        tx.execute(
            "INSERT INTO record_indexes (collection, record_id, field, value) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, field, value.to_sql()],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: String,
        status: String,
        weight: i64,
        updated_at: i64,
    }

    impl Widget {
        fn new(id: &str, status: &str, weight: i64) -> Self {
            Self {
                id: id.to_string(),
                status: status.to_string(),
                weight,
                updated_at: crate::now_ms(),
            }
        }
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }

        fn updated_at(&self) -> i64 {
            self.updated_at
        }

        fn collection_name() -> &'static str {
            "widgets"
        }

        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut fields = HashMap::new();
            fields.insert("status".to_string(), IndexValue::String(self.status.clone()));
            fields.insert("weight".to_string(), IndexValue::Int(self.weight));
            fields
        }
    }

    #[test]
    fn test_create_and_get() {
        let mut store = Store::open_in_memory().unwrap();
        let id = store.create(Widget::new("w1", "new", 1)).unwrap();
        assert_eq!(id, "w1");

        let got: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(got.status, "new");
        assert!(store.get::<Widget>("missing").unwrap().is_none());
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Widget::new("w1", "new", 1)).unwrap();
        let err = store.create(Widget::new("w1", "other", 2)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let got: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(got.status, "new");
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store.update(Widget::new("nope", "new", 1)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_list_filters_follow_updates() {
        let mut store = Store::open_in_memory().unwrap();
        store.create(Widget::new("a", "new", 1)).unwrap();
        store.create(Widget::new("b", "new", 5)).unwrap();
        store.create(Widget::new("c", "done", 9)).unwrap();

        let new: Vec<Widget> = store.list(&[Filter::eq("status", "new")]).unwrap();
        assert_eq!(new.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        store.update(Widget::new("a", "done", 1)).unwrap();
        let new: Vec<Widget> = store.list(&[Filter::eq("status", "new")]).unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].id, "b");

        let heavy: Vec<Widget> = store
            .list(&[Filter {
                field: "weight".to_string(),
                op: FilterOp::Gte,
                value: IndexValue::Int(5),
            }])
            .unwrap();
        assert_eq!(heavy.len(), 2);
    }

    #[test]
    fn test_upsert_keeps_insertion_order() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert(Widget::new("first", "new", 1)).unwrap();
        store.upsert(Widget::new("second", "new", 1)).unwrap();
        store.upsert(Widget::new("first", "new", 2)).unwrap();

        let all: Vec<Widget> = store.list(&[]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "first");
        assert_eq!(all[0].weight, 2);
        assert_eq!(all[1].id, "second");
    }

    #[test]
    fn test_reopen_persists_and_rebuilds() {
        let temp = tempdir().unwrap();
        {
            let mut store = Store::open(temp.path()).unwrap();
            store.create(Widget::new("w1", "new", 1)).unwrap();
            store.create(Widget::new("w2", "done", 1)).unwrap();
        }

        let mut store = Store::open(temp.path()).unwrap();
        assert_eq!(store.rebuild_indexes::<Widget>().unwrap(), 2);
        let done: Vec<Widget> = store.list(&[Filter::eq("status", "done")]).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, "w2");
    }
}
