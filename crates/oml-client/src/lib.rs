//! Client-side injection API: measurement points and streams, the filter
//! chain, per-stream writers, and the buffered egress that carries bytes
//! to the collection server.
//!
//! There is no process-wide singleton: callers get an explicit [`Client`]
//! from [`Client::connect`] and pass it (or the `Arc<MeasurementPoint>`s it
//! hands back) around.

mod client;
mod egress;
mod filter;
mod point;
mod writer;

pub use client::{Client, ClientConfig};
pub use egress::{Egress, Transport};
pub use filter::{Filter, FilterError, Last, Loss};
pub use point::{MeasurementPoint, MeasurementStream, Trigger};
pub use writer::Writer;

use oml_types::{SchemaError, TypeTag};
use std::fmt;

#[derive(Debug)]
pub enum ClientError {
    Filter(FilterError),
    Schema(SchemaError),
    AlreadyRunning(String),
    UnknownMp(String),
    InjectionArity { expected: usize, found: usize },
    InjectionTypeMismatch { field: String, expected: TypeTag, found: TypeTag },
    InvalidMetadataKey(String),
    Io(std::io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Filter(e) => write!(f, "{e}"),
            ClientError::Schema(e) => write!(f, "{e}"),
            ClientError::AlreadyRunning(name) => {
                write!(f, "measurement point '{name}' already has injections; cannot attach more streams")
            }
            ClientError::UnknownMp(name) => write!(f, "no measurement point named '{name}'"),
            ClientError::InjectionArity { expected, found } => {
                write!(f, "expected {expected} values, got {found}")
            }
            ClientError::InjectionTypeMismatch { field, expected, found } => {
                write!(f, "field '{field}' expects {expected}, got {found}")
            }
            ClientError::InvalidMetadataKey(key) => write!(f, "invalid metadata key '{key}'"),
            ClientError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e)
    }
}

impl From<FilterError> for ClientError {
    fn from(e: FilterError) -> Self {
        ClientError::Filter(e)
    }
}

impl From<SchemaError> for ClientError {
    fn from(e: SchemaError) -> Self {
        ClientError::Schema(e)
    }
}
