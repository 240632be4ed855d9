use std::collections::HashMap;
use std::sync::Mutex;

use oml_types::Schema;

use crate::{BackendAdapter, BackendError, BackendFactory, RowInsert};

/// A single inserted row, retained verbatim for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub sender_id: u32,
    pub sequence_number: u64,
    pub client_timestamp: f64,
    pub server_timestamp: f64,
    pub values: Vec<oml_types::TypedValue>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, (Schema, Vec<StoredRow>)>,
    metadata: HashMap<String, String>,
    senders: HashMap<String, u32>,
}

/// A process-local, in-memory [`BackendAdapter`] used by tests. Mirrors the
/// `_experiment_metadata`/`_senders`/per-stream-table shape of §6 without
/// touching a real database; the concrete backends (SQLite, PostgreSQL)
/// are explicitly out of scope (§1).
#[derive(Default)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        InMemoryBackend::default()
    }

    /// Snapshot of a table's rows, for test assertions.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }

    /// The schema a table was created with, for test assertions.
    pub fn schema_of(&self, table: &str) -> Option<Schema> {
        self.inner.lock().unwrap().tables.get(table).map(|(s, _)| s.clone())
    }
}

impl BackendAdapter for InMemoryBackend {
    async fn create_table(&self, schema: &Schema) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .tables
            .entry(schema.name.clone())
            .or_insert_with(|| (schema.clone(), Vec::new()));
        Ok(())
    }

    async fn create_meta_table(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn free_table(&self, table: &str) -> Result<(), BackendError> {
        self.inner.lock().unwrap().tables.remove(table);
        Ok(())
    }

    async fn insert_row(&self, table: &str, row: &RowInsert) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        let (schema, rows) = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;
        if row.values.len() != schema.field_count() {
            return Err(BackendError::TypeMismatch { table: table.to_string(), column: 0 });
        }
        for (i, (value, field)) in row.values.iter().zip(schema.fields()).enumerate() {
            if value.type_tag() != field.type_tag {
                return Err(BackendError::TypeMismatch { table: table.to_string(), column: i + 1 });
            }
        }
        rows.push(StoredRow {
            sender_id: row.sender_id,
            sequence_number: row.sequence_number,
            client_timestamp: row.client_timestamp,
            server_timestamp: row.server_timestamp,
            values: row.values.clone(),
        });
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.inner.lock().unwrap().metadata.get(key).cloned())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.inner
            .lock()
            .unwrap()
            .metadata
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn add_sender(&self, name: &str, id: u32) -> Result<(), BackendError> {
        self.inner.lock().unwrap().senders.insert(name.to_string(), id);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.inner.lock().unwrap().tables.keys().cloned().collect())
    }

    async fn release(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Hands out a fresh [`InMemoryBackend`] per database name; callers are
/// expected to hold onto the registry's reference-counted handle rather
/// than calling [`BackendFactory::open`] more than once per name.
#[derive(Default)]
pub struct InMemoryBackendFactory;

impl InMemoryBackendFactory {
    pub fn new() -> Self {
        InMemoryBackendFactory
    }
}

impl BackendFactory for InMemoryBackendFactory {
    type Backend = InMemoryBackend;

    async fn open(&self, _database: &str) -> Result<InMemoryBackend, BackendError> {
        Ok(InMemoryBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oml_types::{FieldDef, TypeTag, TypedValue};

    fn schema() -> Schema {
        Schema::new("sin", 1, vec![FieldDef::new("value", TypeTag::Double).unwrap()]).unwrap()
    }

    #[tokio::test]
    async fn insert_requires_table_to_exist() {
        let backend = InMemoryBackend::new();
        let row = RowInsert {
            sender_id: 1,
            sequence_number: 1,
            client_timestamp: 0.0,
            server_timestamp: 0.0,
            values: vec![TypedValue::Double(1.0)],
        };
        assert!(backend.insert_row("sin", &row).await.is_err());
    }

    #[tokio::test]
    async fn insert_accumulates_rows_and_rejects_type_mismatch() {
        let backend = InMemoryBackend::new();
        backend.create_table(&schema()).await.unwrap();
        let row = RowInsert {
            sender_id: 1,
            sequence_number: 1,
            client_timestamp: 0.0,
            server_timestamp: 0.0,
            values: vec![TypedValue::Double(1.0)],
        };
        backend.insert_row("sin", &row).await.unwrap();
        assert_eq!(backend.rows("sin").len(), 1);

        let bad_row = RowInsert {
            values: vec![TypedValue::Int32(1)],
            ..row
        };
        assert!(backend.insert_row("sin", &bad_row).await.is_err());
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get_metadata("k").await.unwrap(), None);
        backend.set_metadata("k", "v").await.unwrap();
        assert_eq!(backend.get_metadata("k").await.unwrap(), Some("v".to_string()));
    }
}
