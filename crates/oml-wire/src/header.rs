use crate::CodecError;

/// Recognized header tags. `Domain` is also spelled `experiment-id` on the
/// wire for backward compatibility; `StartTime` accepts both `start-time`
/// and `start_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderTag {
    Protocol,
    Domain,
    SenderId,
    AppName,
    Content,
    Schema,
    StartTime,
}

impl HeaderTag {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "protocol" => Some(HeaderTag::Protocol),
            "domain" | "experiment-id" => Some(HeaderTag::Domain),
            "sender-id" => Some(HeaderTag::SenderId),
            "app-name" => Some(HeaderTag::AppName),
            "content" => Some(HeaderTag::Content),
            "schema" => Some(HeaderTag::Schema),
            "start-time" | "start_time" => Some(HeaderTag::StartTime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    pub tag: HeaderTag,
    pub value: String,
}

/// Parses one header line of the form `tag: value` (a space is allowed
/// before the colon; leading whitespace after it is trimmed, trailing
/// whitespace in the value is kept). The line must not include its
/// terminating newline.
///
/// A blank line ends the header block and is not passed to this function.
pub fn parse_header_line(line: &str) -> Result<HeaderLine, CodecError> {
    let colon = line
        .find(':')
        .ok_or_else(|| CodecError::MalformedHeader(line.to_string()))?;
    let name = line[..colon].trim_end();
    let tag =
        HeaderTag::from_name(name).ok_or_else(|| CodecError::MalformedHeader(line.to_string()))?;
    let value = line[colon + 1..].trim_start().to_string();
    if value.is_empty() {
        return Err(CodecError::MalformedHeader(line.to_string()));
    }
    Ok(HeaderLine { tag, value })
}
