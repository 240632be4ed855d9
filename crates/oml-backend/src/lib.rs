//! The core's only contract with a concrete storage backend (§6): a small
//! capability interface the server's `TableRegistry` drives, plus an
//! in-memory reference implementation used by tests so the reconciliation
//! algorithm and session state machine can be exercised without SQLite or
//! PostgreSQL (both explicitly out of scope, §1).

mod memory;

pub use memory::{InMemoryBackend, InMemoryBackendFactory};

use oml_types::{Schema, TypedValue};
use std::fmt;
use std::future::Future;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The named table has no backing storage (never created, or freed).
    UnknownTable(String),
    /// A row's values didn't match the bound schema positionally.
    TypeMismatch { table: String, column: usize },
    /// The backend itself failed (connection lost, disk full, etc). Carries
    /// a human-readable cause; concrete backends map their native error
    /// types onto this variant.
    Backend(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::UnknownTable(t) => write!(f, "no such table '{t}'"),
            BackendError::TypeMismatch { table, column } => {
                write!(f, "type mismatch inserting into '{table}' at column {column}")
            }
            BackendError::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// One accepted row, positioned for insertion into a data table per the
/// column layout of §6: `oml_sender_id`, `oml_seq`, `oml_ts_client`,
/// `oml_ts_server`, then the schema fields in order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowInsert {
    pub sender_id: u32,
    pub sequence_number: u64,
    pub client_timestamp: f64,
    /// Wall-clock minus session-start-time, in seconds (§4.6 Insert path).
    pub server_timestamp: f64,
    pub values: Vec<TypedValue>,
}

/// Capability interface consumed by the core's table registry, scoped to a
/// single database/experiment. Every operation is expected to be
/// blocking-in-effect and total: the core owns no state inside the backend
/// and surfaces whatever the concrete adapter reports (§6, §7).
///
/// Modeled as a trait with directly `async fn` methods, matching
/// `oml_client::Transport`'s shape, rather than boxed-future `async_trait`
/// methods, since callers always hold a concrete, generic backend type
/// rather than a `dyn BackendAdapter`.
pub trait BackendAdapter: Send + Sync {
    fn create_table(&self, schema: &Schema) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn create_meta_table(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn free_table(&self, table: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn insert_row(
        &self,
        table: &str,
        row: &RowInsert,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn get_metadata(&self, key: &str) -> impl Future<Output = Result<Option<String>, BackendError>> + Send;

    fn set_metadata(&self, key: &str, value: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn add_sender(&self, name: &str, id: u32) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn list_tables(&self) -> impl Future<Output = Result<Vec<String>, BackendError>> + Send;

    /// Releases any resources the adapter holds (connections, file handles).
    /// Called once when a database's last referencing session closes.
    fn release(&self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Opens (or creates) the backend handle for one database/experiment name.
/// The server's table registry calls this at most once per database name
/// and reference-counts the result (§3 TableRegistry: "Reference-counted
/// per database name").
pub trait BackendFactory: Send + Sync {
    type Backend: BackendAdapter;

    fn open(&self, database: &str) -> impl Future<Output = Result<Self::Backend, BackendError>> + Send;
}
