use std::collections::HashSet;
use std::fmt;

use crate::value::TypeTag;

/// Stream index reserved for the key/value metadata stream (§3).
pub const METADATA_STREAM_INDEX: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    EmptyName,
    InvalidName(String),
    DuplicateField(String),
    NoFields,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::EmptyName => write!(f, "name must not be empty"),
            SchemaError::InvalidName(n) => {
                write!(f, "'{n}' does not match [A-Za-z_][A-Za-z0-9_]*")
            }
            SchemaError::DuplicateField(n) => write!(f, "duplicate field name '{n}'"),
            SchemaError::NoFields => write!(f, "schema must declare at least one field"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Checks the identifier grammar shared by schema and field names:
/// `[A-Za-z_][A-Za-z0-9_]*`.
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A name and a type tag drawn from the [`crate::TypedValue`] universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub type_tag: TypeTag,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, type_tag: TypeTag) -> Result<Self, SchemaError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if !is_valid_identifier(&name) {
            return Err(SchemaError::InvalidName(name));
        }
        Ok(FieldDef { name, type_tag })
    }
}

impl fmt::Display for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.type_tag)
    }
}

/// Result of comparing two schemas' field lists column by column, per the
/// reconciliation algorithm of §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDiff {
    /// Field lists match exactly.
    Equal,
    /// Structurally invalid: different field counts, so no single
    /// differing column can be named.
    Invalid,
    /// Index (1-based, matching the C convention this is modeled on) of the
    /// first field whose name or type differs.
    DifferAt(usize),
}

/// An ordered list of [`FieldDef`], a name, and a stream index.
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub index: u32,
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(
        name: impl Into<String>,
        index: u32,
        fields: Vec<FieldDef>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if !is_valid_identifier(&name) {
            return Err(SchemaError::InvalidName(name));
        }
        if fields.is_empty() {
            return Err(SchemaError::NoFields);
        }
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Schema {
            name,
            index,
            fields,
        })
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Renders the `"<stream-index> <name> <field>:<type>[ <field>:<type>]*"`
    /// header-line grammar of §4.4, also used as the meta-string persisted
    /// per §6 so schemas can be rediscovered after a server restart.
    pub fn to_meta_string(&self) -> String {
        let mut out = format!("{} {}", self.index, self.name);
        for field in &self.fields {
            out.push(' ');
            out.push_str(&field.name);
            out.push(':');
            out.push_str(field.type_tag.name());
        }
        out
    }

    /// Parses the grammar produced by [`Schema::to_meta_string`].
    pub fn parse_meta_string(line: &str) -> Result<Schema, SchemaError> {
        let mut parts = line.split_whitespace();
        let index: u32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(SchemaError::InvalidName(line.to_owned()))?;
        let name = parts
            .next()
            .ok_or_else(|| SchemaError::InvalidName(line.to_owned()))?;
        let mut fields = Vec::new();
        for tok in parts {
            let (field_name, type_name) = tok
                .split_once(':')
                .ok_or_else(|| SchemaError::InvalidName(tok.to_owned()))?;
            let type_tag =
                TypeTag::from_name(type_name).ok_or_else(|| SchemaError::InvalidName(tok.to_owned()))?;
            fields.push(FieldDef::new(field_name, type_tag)?);
        }
        Schema::new(name, index, fields)
    }

    /// Structural, column-by-column comparison used by schema reconciliation
    /// (§4.6). Does not apply the uint64/blob compatibility exception;
    /// that is a reconciliation-policy decision made by the caller.
    pub fn diff(&self, other: &Schema) -> SchemaDiff {
        if self.fields.len() != other.fields.len() {
            return SchemaDiff::Invalid;
        }
        for (i, (a, b)) in self.fields.iter().zip(other.fields.iter()).enumerate() {
            if a.name != b.name || a.type_tag != b.type_tag {
                return SchemaDiff::DifferAt(i + 1);
            }
        }
        SchemaDiff::Equal
    }
}

impl PartialEq for Schema {
    /// Value-equal if the name and ordered field list match; the stream
    /// index is a per-session binding, not part of the schema's identity.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.fields == other.fields
    }
}

impl Eq for Schema {}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, tag: TypeTag) -> FieldDef {
        FieldDef::new(name, tag).unwrap()
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let err = Schema::new(
            "sin",
            1,
            vec![field("value", TypeTag::Double), field("value", TypeTag::Double)],
        )
        .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateField("value".to_owned()));
    }

    #[test]
    fn rejects_invalid_identifiers() {
        assert!(FieldDef::new("1bad", TypeTag::Int32).is_err());
        assert!(FieldDef::new("", TypeTag::Int32).is_err());
        assert!(FieldDef::new("ok_name2", TypeTag::Int32).is_ok());
    }

    #[test]
    fn meta_string_round_trips() {
        let schema = Schema::new(
            "sin",
            3,
            vec![
                field("label", TypeTag::String),
                field("angle", TypeTag::Double),
                field("value", TypeTag::Double),
            ],
        )
        .unwrap();
        let meta = schema.to_meta_string();
        assert_eq!(meta, "3 sin label:string angle:double value:double");
        let parsed = Schema::parse_meta_string(&meta).unwrap();
        assert_eq!(parsed, schema);
        assert_eq!(parsed.index, 3);
    }

    #[test]
    fn equality_ignores_stream_index() {
        let a = Schema::new("t", 1, vec![field("id", TypeTag::Int32)]).unwrap();
        let b = Schema::new("t", 7, vec![field("id", TypeTag::Int32)]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn diff_reports_first_differing_column() {
        let a = Schema::new(
            "t",
            1,
            vec![field("id", TypeTag::Int32), field("name", TypeTag::String)],
        )
        .unwrap();
        let b = Schema::new(
            "t",
            1,
            vec![field("id", TypeTag::Int32), field("name", TypeTag::Int32)],
        )
        .unwrap();
        assert_eq!(a.diff(&b), SchemaDiff::DifferAt(2));
        assert_eq!(a.diff(&a.clone()), SchemaDiff::Equal);
    }

    #[test]
    fn diff_reports_invalid_on_field_count_mismatch() {
        let a = Schema::new("t", 1, vec![field("id", TypeTag::Int32)]).unwrap();
        let b = Schema::new(
            "t",
            1,
            vec![field("id", TypeTag::Int32), field("extra", TypeTag::Int32)],
        )
        .unwrap();
        assert_eq!(a.diff(&b), SchemaDiff::Invalid);
    }
}
