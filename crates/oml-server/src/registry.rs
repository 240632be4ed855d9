use std::collections::HashMap;
use std::sync::Arc;

use oml_backend::{BackendAdapter, BackendError, BackendFactory, RowInsert};
use oml_types::{Schema, SchemaDiff, TypeTag};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Upper bound on `name_2`, `name_3`, ... rename attempts before a schema
/// conflict is surfaced as fatal for that stream (§4.6).
pub const MAX_TABLE_RENAME: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The rename ladder was exhausted without finding a compatible or free
    /// table name.
    RenameLimitExceeded { name: String },
    Backend(String),
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::RenameLimitExceeded { name } => {
                write!(f, "exhausted rename attempts reconciling table '{name}'")
            }
            ReconcileError::Backend(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<BackendError> for ReconcileError {
    fn from(e: BackendError) -> Self {
        ReconcileError::Backend(e.to_string())
    }
}

/// The table a session's stream index is bound to after reconciliation.
#[derive(Debug, Clone)]
pub struct BoundTable {
    pub table_name: String,
    pub schema: Schema,
}

/// Two types are treated as interchangeable for reconciliation purposes
/// even though they differ, to tolerate legacy mismatches (§4.6: "Uint64/blob
/// compatibility exception").
fn columns_compatible(a: TypeTag, b: TypeTag) -> bool {
    let is_wide = |t: TypeTag| matches!(t, TypeTag::UInt64 | TypeTag::Blob);
    is_wide(a) && is_wide(b)
}

struct DatabaseEntry<B> {
    backend: B,
    tables: Mutex<HashMap<String, Schema>>,
    senders: Mutex<HashMap<String, u32>>,
}

/// Process-wide map from database name to `(table name -> (Schema, backend
/// handle))`, reference-counted per database name (§3), and the schema
/// reconciliation algorithm that drives it (§4.6).
pub struct TableRegistry<F: BackendFactory> {
    factory: F,
    databases: RwLock<HashMap<String, Arc<DatabaseEntry<F::Backend>>>>,
}

impl<F: BackendFactory> TableRegistry<F> {
    pub fn new(factory: F) -> Self {
        TableRegistry {
            factory,
            databases: RwLock::new(HashMap::new()),
        }
    }

    async fn database(&self, name: &str) -> Result<Arc<DatabaseEntry<F::Backend>>, BackendError> {
        if let Some(entry) = self.databases.read().await.get(name) {
            return Ok(entry.clone());
        }
        let mut databases = self.databases.write().await;
        if let Some(entry) = databases.get(name) {
            return Ok(entry.clone());
        }
        let backend = self.factory.open(name).await?;
        backend.create_meta_table().await?;
        let entry = Arc::new(DatabaseEntry {
            backend,
            tables: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
        });
        databases.insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    /// Reconciles a declared schema against the backend's existing tables
    /// for `database`, creating or renaming as needed, and returns the table
    /// this session's stream should be bound to.
    pub async fn reconcile(&self, database: &str, proposed: &Schema) -> Result<BoundTable, ReconcileError> {
        let entry = self.database(database).await?;
        let mut candidate = proposed.name.clone();

        for attempt in 1..=MAX_TABLE_RENAME {
            let mut tables = entry.tables.lock().await;
            match tables.get(&candidate) {
                None => {
                    let stored = Schema::new(candidate.clone(), proposed.index, proposed.fields().to_vec())
                        .map_err(|e| ReconcileError::Backend(e.to_string()))?;
                    entry.backend.create_table(&stored).await?;
                    entry
                        .backend
                        .set_metadata(&format!("table_{candidate}"), &stored.to_meta_string())
                        .await?;
                    tables.insert(candidate.clone(), stored.clone());
                    info!(database, table = %candidate, "created table");
                    return Ok(BoundTable { table_name: candidate, schema: stored });
                }
                Some(stored) => match stored.diff(proposed) {
                    SchemaDiff::Equal => {
                        return Ok(BoundTable { table_name: candidate, schema: stored.clone() });
                    }
                    SchemaDiff::DifferAt(k) => {
                        let a = stored.fields()[k - 1].type_tag;
                        let b = proposed.fields().get(k - 1).map(|f| f.type_tag);
                        if b.is_some_and(|b| columns_compatible(a, b)) {
                            return Ok(BoundTable { table_name: candidate, schema: stored.clone() });
                        }
                        drop(tables);
                        candidate = format!("{}_{}", proposed.name, attempt + 1);
                    }
                    SchemaDiff::Invalid => {
                        drop(tables);
                        candidate = format!("{}_{}", proposed.name, attempt + 1);
                    }
                },
            }
        }
        Err(ReconcileError::RenameLimitExceeded { name: proposed.name.clone() })
    }

    /// Resolves the numeric sender id for `sender_name` within `database`,
    /// creating it (`max(existing) + 1`, starting from 1) on first sight
    /// (§4.6 Sender identity).
    pub async fn sender_id(&self, database: &str, sender_name: &str) -> Result<u32, BackendError> {
        let entry = self.database(database).await?;
        let mut senders = entry.senders.lock().await;
        if let Some(&id) = senders.get(sender_name) {
            return Ok(id);
        }
        let key = format!("sender_{sender_name}");
        if let Some(existing) = entry.backend.get_metadata(&key).await? {
            let id: u32 = existing.parse().unwrap_or(1);
            senders.insert(sender_name.to_string(), id);
            return Ok(id);
        }
        let id = senders.values().copied().max().unwrap_or(0) + 1;
        entry.backend.add_sender(sender_name, id).await?;
        entry.backend.set_metadata(&key, &id.to_string()).await?;
        senders.insert(sender_name.to_string(), id);
        Ok(id)
    }

    pub async fn insert_row(&self, database: &str, table: &str, row: &RowInsert) -> Result<(), BackendError> {
        let entry = self.database(database).await?;
        entry.backend.insert_row(table, row).await
    }

    /// Persists a client-supplied metadata key/value pair (§4.2
    /// `inject_metadata`) into `database`'s metadata table.
    pub async fn set_metadata(&self, database: &str, key: &str, value: &str) -> Result<(), BackendError> {
        let entry = self.database(database).await?;
        entry.backend.set_metadata(key, value).await
    }
}
