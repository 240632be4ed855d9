use std::fmt;

/// Ownership mode for a string-valued [`TypedValue`].
///
/// Mirrors the "borrowed-const vs owned" distinction of the original C
/// client, but as a single tagged type rather than flags scattered across a
/// struct (see the mixed-ownership re-architecture note): a `Const` value
/// points at `'static` literal storage and is never freed; an `Owned` value
/// holds its own buffer. Rust's `String`/`&'static str` already uphold the
/// length-less-than-capacity and drop-on-release invariants the original
/// required bookkeeping for by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OmlString {
    /// Points at immutable literal storage; never freed.
    Const(&'static str),
    /// Owned, heap-allocated string.
    Owned(String),
}

impl OmlString {
    pub fn as_str(&self) -> &str {
        match self {
            OmlString::Const(s) => s,
            OmlString::Owned(s) => s.as_str(),
        }
    }

    /// Deep-copies the contents into a freshly owned string, regardless of
    /// how `self` is stored. Used when a filter must retain a value past the
    /// caller's buffer lifetime (§4.2: "filters own their inputs").
    pub fn to_owned_value(&self) -> OmlString {
        OmlString::Owned(self.as_str().to_owned())
    }
}

impl fmt::Display for OmlString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for OmlString {
    fn from(s: String) -> Self {
        OmlString::Owned(s)
    }
}

impl From<&'static str> for OmlString {
    fn from(s: &'static str) -> Self {
        OmlString::Const(s)
    }
}

/// The primitive type tag drawn from the [`TypedValue`] universe, used by
/// [`crate::FieldDef`] to declare a field's type without carrying a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    Blob,
    /// Platform-long alias, preserved for backward compatibility with the
    /// original wire format's `OML_LONG_VALUE`. Carries the same range as
    /// `Int32` on the wire; kept distinct so legacy senders/receivers that
    /// still tag values this way round-trip unchanged.
    Long,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Int32 => "int32",
            TypeTag::UInt32 => "uint32",
            TypeTag::Int64 => "int64",
            TypeTag::UInt64 => "uint64",
            TypeTag::Double => "double",
            TypeTag::String => "string",
            TypeTag::Blob => "blob",
            TypeTag::Long => "long",
        }
    }

    pub fn from_name(name: &str) -> Option<TypeTag> {
        Some(match name {
            "int32" => TypeTag::Int32,
            "uint32" => TypeTag::UInt32,
            "int64" => TypeTag::Int64,
            "uint64" => TypeTag::UInt64,
            "double" => TypeTag::Double,
            "string" => TypeTag::String,
            "blob" => TypeTag::Blob,
            "long" => TypeTag::Long,
            _ => return None,
        })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A tagged union over the primitive measurement value set.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(OmlString),
    Blob(Vec<u8>),
    /// See [`TypeTag::Long`].
    Long(i32),
}

impl TypedValue {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            TypedValue::Int32(_) => TypeTag::Int32,
            TypedValue::UInt32(_) => TypeTag::UInt32,
            TypedValue::Int64(_) => TypeTag::Int64,
            TypedValue::UInt64(_) => TypeTag::UInt64,
            TypedValue::Double(_) => TypeTag::Double,
            TypedValue::String(_) => TypeTag::String,
            TypedValue::Blob(_) => TypeTag::Blob,
            TypedValue::Long(_) => TypeTag::Long,
        }
    }

    /// Deep-copies the value, allocating fresh storage for string/blob
    /// payloads. Used by filters that must retain an input past the point
    /// the caller is allowed to reuse its buffer (§4.2 step 2).
    pub fn deep_copy(&self) -> TypedValue {
        match self {
            TypedValue::String(s) => TypedValue::String(s.to_owned_value()),
            TypedValue::Blob(b) => TypedValue::Blob(b.clone()),
            other => other.clone(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            TypedValue::Int32(v) => Some(v as i64),
            TypedValue::UInt32(v) => Some(v as i64),
            TypedValue::Int64(v) => Some(v),
            TypedValue::Long(v) => Some(v as i64),
            TypedValue::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Int32(v) => write!(f, "{v}"),
            TypedValue::UInt32(v) => write!(f, "{v}"),
            TypedValue::Int64(v) => write!(f, "{v}"),
            TypedValue::UInt64(v) => write!(f, "{v}"),
            TypedValue::Double(v) => write!(f, "{v}"),
            TypedValue::String(s) => write!(f, "{s}"),
            TypedValue::Blob(b) => write!(f, "<blob:{}B>", b.len()),
            TypedValue::Long(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_copy_detaches_owned_string_from_source() {
        let mut buf = String::from("s-1");
        let v = TypedValue::String(OmlString::Owned(buf.clone()));
        let copy = v.deep_copy();
        buf.push_str("-mutated");
        assert_eq!(copy.as_str(), Some("s-1"));
    }

    #[test]
    fn type_tag_round_trips_through_name() {
        for tag in [
            TypeTag::Int32,
            TypeTag::UInt32,
            TypeTag::Int64,
            TypeTag::UInt64,
            TypeTag::Double,
            TypeTag::String,
            TypeTag::Blob,
            TypeTag::Long,
        ] {
            assert_eq!(TypeTag::from_name(tag.name()), Some(tag));
        }
    }

    #[test]
    fn unknown_type_name_is_rejected() {
        assert_eq!(TypeTag::from_name("nonsense"), None);
    }
}
