//! Typed value, field, and schema representation shared by the client and
//! server sides of the measurement pipeline.
//!
//! This is the leaf crate of the workspace: every other crate depends on it,
//! and it depends on nothing.

mod schema;
mod value;

pub use schema::{FieldDef, METADATA_STREAM_INDEX, Schema, SchemaDiff, SchemaError};
pub use value::{OmlString, TypedValue, TypeTag};
