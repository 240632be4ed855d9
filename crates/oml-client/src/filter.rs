use oml_types::{FieldDef, OmlString, TypeTag, TypedValue};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// A sampled value's type tag didn't match what the filter was
    /// declared to accept.
    TypeMismatch { expected: TypeTag, found: TypeTag },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::TypeMismatch { expected, found } => {
                write!(f, "expected a {expected} value, got {found}")
            }
        }
    }
}

impl std::error::Error for FilterError {}

/// A stateful per-stream transform: absorbs input samples one at a time
/// and, when driven, emits one or more output values and resets.
pub trait Filter: Send {
    /// Field definitions this filter contributes to its stream's schema,
    /// in the order `process` will emit them.
    fn output_fields(&self) -> Vec<FieldDef>;

    fn sample(&mut self, value: &TypedValue) -> Result<(), FilterError>;

    /// Emits this round's output by appending to `out`, then resets
    /// internal accumulator state.
    fn process(&mut self, out: &mut Vec<TypedValue>);
}

/// Keeps the most recently sampled value and re-emits it unchanged. On
/// string inputs, resets to an empty string after emitting.
pub struct Last {
    type_tag: TypeTag,
    field_name: String,
    current: Option<TypedValue>,
}

impl Last {
    pub fn new(field_name: impl Into<String>, type_tag: TypeTag) -> Self {
        Last {
            type_tag,
            field_name: field_name.into(),
            current: None,
        }
    }
}

impl Filter for Last {
    fn output_fields(&self) -> Vec<FieldDef> {
        vec![FieldDef::new(self.field_name.clone(), self.type_tag).expect("validated at MS registration")]
    }

    fn sample(&mut self, value: &TypedValue) -> Result<(), FilterError> {
        if value.type_tag() != self.type_tag {
            return Err(FilterError::TypeMismatch {
                expected: self.type_tag,
                found: value.type_tag(),
            });
        }
        self.current = Some(value.deep_copy());
        Ok(())
    }

    fn process(&mut self, out: &mut Vec<TypedValue>) {
        let value = self.current.take().unwrap_or_else(|| default_for(self.type_tag));
        let reset_to_empty = matches!(value, TypedValue::String(_));
        out.push(value);
        if reset_to_empty {
            self.current = Some(TypedValue::String(OmlString::Const("")));
        }
    }
}

fn default_for(tag: TypeTag) -> TypedValue {
    match tag {
        TypeTag::Int32 | TypeTag::Long => TypedValue::Int32(0),
        TypeTag::UInt32 => TypedValue::UInt32(0),
        TypeTag::Int64 => TypedValue::Int64(0),
        TypeTag::UInt64 => TypedValue::UInt64(0),
        TypeTag::Double => TypedValue::Double(0.0),
        TypeTag::String => TypedValue::String(OmlString::Const("")),
        TypeTag::Blob => TypedValue::Blob(Vec::new()),
    }
}

/// Tracks gaps and reorderings in a strictly-increasing integer sample
/// stream. Emits `lost`, `out_of_order`, `sample_count` as signed-32
/// counters and resets all three after each `process`.
///
/// Duplicates and reordered-but-already-seen values are both counted as
/// `out_of_order` rather than distinguished (documented limitation: no
/// handling of sequence-space wraparound).
pub struct Loss {
    last_seen: Option<i64>,
    lost: i32,
    out_of_order: i32,
    sample_count: i32,
    /// Reserved for a future wraparound-aware reimplementation: a sequence
    /// space modulus past which a drop below `last_seen` is a wrap, not a
    /// reorder. Unused today; sequence numbers are assumed never to wrap.
    #[allow(dead_code)]
    modulus: Option<i64>,
}

impl Loss {
    pub fn new() -> Self {
        Loss {
            last_seen: None,
            lost: 0,
            out_of_order: 0,
            sample_count: 0,
            modulus: None,
        }
    }

    /// Reserved for a future wraparound-aware reimplementation; has no
    /// effect on `sample`/`process` yet.
    pub fn with_modulus(modulus: i64) -> Self {
        Loss {
            modulus: Some(modulus),
            ..Loss::new()
        }
    }
}

impl Default for Loss {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Loss {
    fn output_fields(&self) -> Vec<FieldDef> {
        vec![
            FieldDef::new("lost", TypeTag::Int32).unwrap(),
            FieldDef::new("out_of_order", TypeTag::Int32).unwrap(),
            FieldDef::new("sample_count", TypeTag::Int32).unwrap(),
        ]
    }

    fn sample(&mut self, value: &TypedValue) -> Result<(), FilterError> {
        let s = value.as_i64().ok_or(FilterError::TypeMismatch {
            expected: TypeTag::Int64,
            found: value.type_tag(),
        })?;
        self.sample_count += 1;
        match self.last_seen {
            None => self.last_seen = Some(s),
            Some(last) if s <= last => self.out_of_order += 1,
            Some(last) => {
                self.lost += (s - last - 1) as i32;
                self.last_seen = Some(s);
            }
        }
        Ok(())
    }

    fn process(&mut self, out: &mut Vec<TypedValue>) {
        out.push(TypedValue::Int32(self.lost));
        out.push(TypedValue::Int32(self.out_of_order));
        out.push(TypedValue::Int32(self.sample_count));
        self.lost = 0;
        self.out_of_order = 0;
        self.sample_count = 0;
    }
}
