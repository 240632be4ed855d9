use oml_buffer::{MBuffer, NOT_FOUND};
use oml_types::{OmlString, Schema, TypeTag, TypedValue};

use crate::{CodecError, Message, ReadOutcome};

fn parse_field(field: &str, type_tag: TypeTag) -> Result<TypedValue, CodecError> {
    let bad = || CodecError::MalformedTextRow(field.to_string());
    Ok(match type_tag {
        TypeTag::Int32 => TypedValue::Int32(field.parse().map_err(|_| bad())?),
        TypeTag::UInt32 => TypedValue::UInt32(field.parse().map_err(|_| bad())?),
        TypeTag::Int64 => TypedValue::Int64(field.parse().map_err(|_| bad())?),
        TypeTag::UInt64 => TypedValue::UInt64(field.parse().map_err(|_| bad())?),
        TypeTag::Long => TypedValue::Long(field.parse().map_err(|_| bad())?),
        TypeTag::Double => TypedValue::Double(field.parse().map_err(|_| bad())?),
        TypeTag::String => TypedValue::String(OmlString::Owned(field.to_string())),
        TypeTag::Blob => {
            if field.len() % 2 != 0 {
                return Err(bad());
            }
            let mut bytes = Vec::with_capacity(field.len() / 2);
            let digits = field.as_bytes();
            for pair in digits.chunks(2) {
                let hex = std::str::from_utf8(pair).map_err(|_| bad())?;
                bytes.push(u8::from_str_radix(hex, 16).map_err(|_| bad())?);
            }
            TypedValue::Blob(bytes)
        }
    })
}

fn render_field(value: &TypedValue) -> String {
    match value {
        TypedValue::Blob(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        other => other.to_string(),
    }
}

/// Reads one line-delimited row out of `mbuf`. Tab-separated fields; the
/// first three are timestamp, stream index, sequence number, followed by
/// one value per schema field in order.
///
/// Returns [`ReadOutcome::NeedMoreData`] if `\n` hasn't arrived yet, leaving
/// `mbuf`'s cursors untouched so the caller can append more bytes and retry.
pub fn read_text_message(mbuf: &mut MBuffer, schema: &Schema) -> Result<ReadOutcome, CodecError> {
    mbuf.begin_message();
    let newline = mbuf.find(b'\n');
    if newline == NOT_FOUND {
        mbuf.reset_read();
        return Ok(ReadOutcome::NeedMoreData);
    }
    let line_len = newline as usize;
    let line_bytes = mbuf.peek(line_len)?;
    let line = std::str::from_utf8(line_bytes)
        .map_err(|_| CodecError::MalformedTextRow("non-utf8 row".to_string()))?
        .to_string();
    mbuf.read(line_len + 1)?;

    let mut fields = line.split('\t');
    let ts_field = fields
        .next()
        .ok_or_else(|| CodecError::MalformedTextRow(line.clone()))?;
    let idx_field = fields
        .next()
        .ok_or_else(|| CodecError::MalformedTextRow(line.clone()))?;
    let seq_field = fields
        .next()
        .ok_or_else(|| CodecError::MalformedTextRow(line.clone()))?;

    let timestamp: f64 = ts_field
        .parse()
        .map_err(|_| CodecError::MalformedTextRow(line.clone()))?;
    let stream_index: u32 = idx_field
        .parse()
        .map_err(|_| CodecError::MalformedTextRow(line.clone()))?;
    let sequence: u64 = seq_field
        .parse()
        .map_err(|_| CodecError::MalformedTextRow(line.clone()))?;

    let mut values = Vec::with_capacity(schema.field_count());
    for field_def in schema.fields() {
        let raw = fields
            .next()
            .ok_or_else(|| CodecError::MalformedTextRow(line.clone()))?;
        values.push(parse_field(raw, field_def.type_tag)?);
    }

    mbuf.consume_message();
    Ok(ReadOutcome::Message(Message {
        stream_index,
        sequence,
        timestamp,
        values,
    }))
}

/// Peeks the stream index (second tab-separated field) of the next
/// line-delimited row without consuming it. See the binary codec's
/// `peek_stream_index` for why a caller needs this before it can pick the
/// right schema to decode with.
pub fn peek_stream_index(mbuf: &mut MBuffer) -> Result<Option<u32>, CodecError> {
    mbuf.begin_message();
    let newline = mbuf.find(b'\n');
    if newline == NOT_FOUND {
        mbuf.reset_read();
        return Ok(None);
    }
    let line_len = newline as usize;
    let line_bytes = mbuf.peek(line_len)?;
    let line = std::str::from_utf8(line_bytes)
        .map_err(|_| CodecError::MalformedTextRow("non-utf8 row".to_string()))?;
    let mut fields = line.split('\t');
    let _timestamp = fields.next();
    let idx_field = fields
        .next()
        .ok_or_else(|| CodecError::MalformedTextRow(line.to_string()))?;
    let stream_index: u32 = idx_field
        .parse()
        .map_err(|_| CodecError::MalformedTextRow(line.to_string()))?;
    mbuf.reset_read();
    Ok(Some(stream_index))
}

/// Renders one row in the same layout [`read_text_message`] parses.
pub fn write_text_message(msg: &Message) -> String {
    let mut out = format!("{}\t{}\t{}", msg.timestamp, msg.stream_index, msg.sequence);
    for value in &msg.values {
        out.push('\t');
        out.push_str(&render_field(value));
    }
    out.push('\n');
    out
}
