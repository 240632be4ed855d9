use oml_buffer::MBuffer;
use oml_types::{OmlString, Schema, TypeTag, TypedValue};

use crate::{CodecError, Message, ReadOutcome};

const SYNC_BYTE: u8 = 0xAA;
const PACKET_SHORT: u8 = 0x01;
const PACKET_LONG: u8 = 0x02;

const TAG_INT32: u8 = 0x01;
const TAG_DOUBLE: u8 = 0x02;
const TAG_INT64: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BLOB: u8 = 0x05;
const TAG_UINT32: u8 = 0x06;
const TAG_UINT64: u8 = 0x07;

/// Scans forward from the read cursor for two consecutive sync bytes,
/// discarding everything before them. Returns `false` (leaving the cursor
/// at the last byte examined) if the tail of the buffered data can't yet
/// contain a full sync sequence and more bytes are needed.
fn find_sync(mbuf: &mut MBuffer) -> bool {
    loop {
        if mbuf.available() < 2 {
            return false;
        }
        let pair = mbuf.peek(2).expect("checked availability above");
        if pair[0] == SYNC_BYTE && pair[1] == SYNC_BYTE {
            return true;
        }
        mbuf.read(1).expect("checked availability above");
    }
}

fn encode_value(value: &TypedValue, out: &mut Vec<u8>) {
    match value {
        TypedValue::Int32(v) | TypedValue::Long(v) => {
            out.push(TAG_INT32);
            out.extend_from_slice(&v.to_be_bytes());
        }
        TypedValue::UInt32(v) => {
            out.push(TAG_UINT32);
            out.extend_from_slice(&v.to_be_bytes());
        }
        TypedValue::Int64(v) => {
            out.push(TAG_INT64);
            out.extend_from_slice(&v.to_be_bytes());
        }
        TypedValue::UInt64(v) => {
            out.push(TAG_UINT64);
            out.extend_from_slice(&v.to_be_bytes());
        }
        TypedValue::Double(v) => {
            out.push(TAG_DOUBLE);
            let (mantissa, exponent) = encode_scaled_double(*v);
            out.push(0x54);
            out.extend_from_slice(&mantissa.to_be_bytes());
            out.push(exponent as u8);
        }
        TypedValue::String(s) => {
            let bytes = s.as_str().as_bytes();
            out.push(TAG_STRING);
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
        TypedValue::Blob(bytes) => {
            out.push(TAG_BLOB);
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
    }
}

/// Encodes `v` as a fixed-point mantissa/exponent pair such that
/// `v == mantissa * 2^exponent / 2^30`. Starts at the nominal scale
/// (`exponent == 0`, i.e. a Q30 fraction) and widens the exponent until the
/// mantissa fits in i32, trading precision for range on large magnitudes.
fn encode_scaled_double(v: f64) -> (i32, i8) {
    let mut exponent: i32 = 0;
    loop {
        let mantissa = v * 2f64.powi(30 - exponent);
        if mantissa.abs() <= i32::MAX as f64 || exponent >= 97 {
            return (mantissa.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32, exponent as i8);
        }
        exponent += 1;
    }
}

fn decode_scaled_double(mantissa: i32, exponent: i8) -> f64 {
    (mantissa as f64) * 2f64.powi(exponent as i32 - 30)
}

fn read_exact<'a>(mbuf: &'a mut MBuffer, n: usize) -> Result<&'a [u8], CodecError> {
    Ok(mbuf.read(n)?)
}

fn decode_value(mbuf: &mut MBuffer) -> Result<TypedValue, CodecError> {
    let tag = read_exact(mbuf, 1)?[0];
    Ok(match tag {
        TAG_INT32 => TypedValue::Int32(i32::from_be_bytes(read_exact(mbuf, 4)?.try_into().unwrap())),
        TAG_UINT32 => TypedValue::UInt32(u32::from_be_bytes(read_exact(mbuf, 4)?.try_into().unwrap())),
        TAG_INT64 => TypedValue::Int64(i64::from_be_bytes(read_exact(mbuf, 8)?.try_into().unwrap())),
        TAG_UINT64 => TypedValue::UInt64(u64::from_be_bytes(read_exact(mbuf, 8)?.try_into().unwrap())),
        TAG_DOUBLE => {
            let _scale = read_exact(mbuf, 1)?[0];
            let mantissa = i32::from_be_bytes(read_exact(mbuf, 4)?.try_into().unwrap());
            let exponent = read_exact(mbuf, 1)?[0] as i8;
            TypedValue::Double(decode_scaled_double(mantissa, exponent))
        }
        TAG_STRING => {
            let len = read_exact(mbuf, 1)?[0] as usize;
            let bytes = read_exact(mbuf, len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| CodecError::MalformedTextRow("non-utf8 string value".to_string()))?;
            TypedValue::String(OmlString::Owned(s.to_string()))
        }
        TAG_BLOB => {
            let len = u32::from_be_bytes(read_exact(mbuf, 4)?.try_into().unwrap()) as usize;
            TypedValue::Blob(read_exact(mbuf, len)?.to_vec())
        }
        other => return Err(CodecError::UnknownTypeTag(other)),
    })
}

/// Decodes one framed message. Returns [`ReadOutcome::NeedMoreData`] when
/// the frame isn't fully buffered yet (including when the sync bytes
/// themselves haven't fully arrived), after first discarding any junk
/// bytes preceding a recovered sync sequence.
pub fn read_binary_message(mbuf: &mut MBuffer, schema: &Schema) -> Result<ReadOutcome, CodecError> {
    mbuf.begin_message();
    if !find_sync(mbuf) {
        mbuf.reset_read();
        return Ok(ReadOutcome::NeedMoreData);
    }
    mbuf.begin_message();

    if mbuf.available() < 3 {
        mbuf.reset_read();
        return Ok(ReadOutcome::NeedMoreData);
    }
    mbuf.read(2)?; // sync bytes
    let packet_type = mbuf.read(1)?[0];

    let header_len = match packet_type {
        PACKET_SHORT => 2,
        PACKET_LONG => 4,
        _ => return Err(CodecError::SyncLost),
    };
    if mbuf.available() < header_len {
        mbuf.reset_read();
        return Ok(ReadOutcome::NeedMoreData);
    }
    let payload_len = match packet_type {
        PACKET_SHORT => u16::from_be_bytes(mbuf.read(2)?.try_into().unwrap()) as u32,
        _ => u32::from_be_bytes(mbuf.read(4)?.try_into().unwrap()),
    };

    if (mbuf.available() as u64) < payload_len as u64 {
        mbuf.reset_read();
        return Ok(ReadOutcome::NeedMoreData);
    }

    let count = mbuf.read(1)?[0];
    let stream_index = mbuf.read(1)?[0] as u32;

    if count as usize != schema.field_count() {
        return Err(CodecError::FieldCountMismatch {
            expected: schema.field_count(),
            found: count,
        });
    }

    let sequence = match decode_value(mbuf)? {
        TypedValue::Int64(v) => v as u64,
        TypedValue::Int32(v) | TypedValue::Long(v) => v as u64,
        _ => return Err(CodecError::SyncLost),
    };
    let timestamp = match decode_value(mbuf)? {
        TypedValue::Double(v) => v,
        _ => return Err(CodecError::SyncLost),
    };

    let mut values = Vec::with_capacity(schema.field_count());
    for _ in 0..count {
        values.push(decode_value(mbuf)?);
    }

    mbuf.consume_message();
    Ok(ReadOutcome::Message(Message {
        stream_index,
        sequence,
        timestamp,
        values,
    }))
}

/// Peeks the stream index of the next frame without consuming it, so a
/// caller that doesn't yet know which schema applies (the wire format only
/// reveals the stream index partway into the frame) can look it up first
/// and then call [`read_binary_message`] with the right one. Leaves `mbuf`
/// exactly as found, except for any junk bytes permanently discarded by the
/// sync scan.
pub fn peek_stream_index(mbuf: &mut MBuffer) -> Result<Option<u32>, CodecError> {
    mbuf.begin_message();
    if !find_sync(mbuf) {
        mbuf.reset_read();
        return Ok(None);
    }
    mbuf.begin_message();

    if mbuf.available() < 3 {
        mbuf.reset_read();
        return Ok(None);
    }
    mbuf.read(2)?;
    let packet_type = mbuf.read(1)?[0];
    let header_len = match packet_type {
        PACKET_SHORT => 2,
        PACKET_LONG => 4,
        _ => {
            mbuf.reset_read();
            return Err(CodecError::SyncLost);
        }
    };
    if mbuf.available() < header_len {
        mbuf.reset_read();
        return Ok(None);
    }
    let payload_len = match packet_type {
        PACKET_SHORT => u16::from_be_bytes(mbuf.read(2)?.try_into().unwrap()) as u32,
        _ => u32::from_be_bytes(mbuf.read(4)?.try_into().unwrap()),
    };
    if (mbuf.available() as u64) < payload_len as u64 || mbuf.available() < 2 {
        mbuf.reset_read();
        return Ok(None);
    }
    let _count = mbuf.read(1)?[0];
    let stream_index = mbuf.read(1)?[0] as u32;
    mbuf.reset_read();
    Ok(Some(stream_index))
}

/// Encodes `msg` using the short-length packet form when the payload fits
/// in 16 bits, falling back to the long-length form otherwise.
pub fn write_binary_message(msg: &Message) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.push(msg.values.len() as u8);
    payload.push(msg.stream_index as u8);
    encode_value(&TypedValue::Int64(msg.sequence as i64), &mut payload);
    encode_value(&TypedValue::Double(msg.timestamp), &mut payload);
    for v in &msg.values {
        encode_value(v, &mut payload);
    }

    let mut out = vec![SYNC_BYTE, SYNC_BYTE];
    if let Ok(len16) = u16::try_from(payload.len()) {
        out.push(PACKET_SHORT);
        out.extend_from_slice(&len16.to_be_bytes());
    } else {
        out.push(PACKET_LONG);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    out.extend_from_slice(&payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use oml_types::FieldDef;

    fn schema() -> Schema {
        Schema::new("sample", 1, vec![FieldDef::new("count", TypeTag::Int32).unwrap()]).unwrap()
    }

    #[test]
    fn round_trips_a_message_through_write_then_read() {
        let msg = Message {
            stream_index: 3,
            sequence: 42,
            timestamp: 99.5,
            values: vec![TypedValue::Int32(7)],
        };
        let encoded = write_binary_message(&msg);
        let mut mbuf = MBuffer::new(64, 0);
        mbuf.write(&encoded).unwrap();
        match read_binary_message(&mut mbuf, &schema()).unwrap() {
            ReadOutcome::Message(got) => {
                assert_eq!(got.stream_index, 3);
                assert_eq!(got.sequence, 42);
                assert_eq!(got.values, vec![TypedValue::Int32(7)]);
            }
            ReadOutcome::NeedMoreData => panic!("expected a complete message"),
        }
    }

    #[test]
    fn recovers_sync_after_junk_prefix() {
        let msg = Message {
            stream_index: 0,
            sequence: 1,
            timestamp: 1.0,
            values: vec![TypedValue::Int32(1)],
        };
        let encoded = write_binary_message(&msg);
        let mut mbuf = MBuffer::new(64, 0);
        mbuf.write(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]).unwrap();
        mbuf.write(&encoded).unwrap();
        match read_binary_message(&mut mbuf, &schema()).unwrap() {
            ReadOutcome::Message(got) => assert_eq!(got.values, vec![TypedValue::Int32(1)]),
            ReadOutcome::NeedMoreData => panic!("junk prefix should be skippable"),
        }
    }

    #[test]
    fn peek_stream_index_does_not_consume_the_frame() {
        let msg = Message {
            stream_index: 5,
            sequence: 1,
            timestamp: 1.0,
            values: vec![TypedValue::Int32(1)],
        };
        let encoded = write_binary_message(&msg);
        let mut mbuf = MBuffer::new(64, 0);
        mbuf.write(&encoded).unwrap();
        assert_eq!(peek_stream_index(&mut mbuf).unwrap(), Some(5));
        match read_binary_message(&mut mbuf, &schema()).unwrap() {
            ReadOutcome::Message(got) => assert_eq!(got.stream_index, 5),
            ReadOutcome::NeedMoreData => panic!("peek should not have consumed the frame"),
        }
    }

    #[test]
    fn truncated_frame_asks_for_more_data() {
        let msg = Message {
            stream_index: 0,
            sequence: 1,
            timestamp: 1.0,
            values: vec![TypedValue::Int32(1)],
        };
        let encoded = write_binary_message(&msg);
        let mut mbuf = MBuffer::new(64, 0);
        mbuf.write(&encoded[..encoded.len() - 2]).unwrap();
        match read_binary_message(&mut mbuf, &schema()).unwrap() {
            ReadOutcome::NeedMoreData => {}
            ReadOutcome::Message(_) => panic!("frame is missing its last bytes"),
        }
    }
}
