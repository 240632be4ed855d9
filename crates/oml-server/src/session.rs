use std::collections::HashMap;
use std::sync::Arc;

use oml_backend::{BackendFactory, RowInsert};
use oml_buffer::MBuffer;
use oml_types::{FieldDef, METADATA_STREAM_INDEX, Schema, TypeTag};
use oml_wire::{ContentMode, HeaderTag, Message, ReadOutcome, parse_header_line};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::registry::{BoundTable, TableRegistry};

/// Per-connection state machine (§4.4). A session is created in [`State::Header`]
/// when the TCP connection is accepted and never leaves [`State::ProtocolError`]
/// once it enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Header,
    Configure,
    Data,
    ProtocolError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    MissingHeader(&'static str),
    InvalidContent(String),
    MalformedHeaderLine(String),
    Codec(String),
    Reconcile(String),
    Backend(String),
    UnboundStream(u32),
    BufferError(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::MissingHeader(name) => write!(f, "missing required header '{name}'"),
            SessionError::InvalidContent(v) => write!(f, "invalid content header value '{v}'"),
            SessionError::MalformedHeaderLine(l) => write!(f, "malformed header line: {l}"),
            SessionError::Codec(e) => write!(f, "{e}"),
            SessionError::Reconcile(e) => write!(f, "{e}"),
            SessionError::Backend(e) => write!(f, "{e}"),
            SessionError::UnboundStream(idx) => write!(f, "stream {idx} was never declared"),
            SessionError::BufferError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// One observable effect of feeding bytes into a [`Session`], surfaced to
/// the caller (typically for logging or test assertions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SchemaBound { stream_index: u32, table: String },
    RowIngested { stream_index: u32, table: String },
    MetadataStored { key: String },
}

enum HeaderStep {
    Line,
    BlankLine,
    NeedMoreData,
}

fn metadata_schema() -> Schema {
    Schema::new(
        "_metadata",
        METADATA_STREAM_INDEX,
        vec![
            FieldDef::new("key", TypeTag::String).unwrap(),
            FieldDef::new("value", TypeTag::String).unwrap(),
        ],
    )
    .expect("fixed, valid schema")
}

/// Per-connection session: receive buffer, parsed headers, negotiated
/// content mode, and the stream-index-to-table bindings established by
/// schema reconciliation (§3 Session, §4.4).
pub struct Session<F: BackendFactory> {
    registry: Arc<TableRegistry<F>>,
    recv: MBuffer,
    state: State,
    header_lines: Vec<oml_wire::HeaderLine>,
    experiment_id: Option<String>,
    sender_name: Option<String>,
    content_mode: Option<ContentMode>,
    streams: HashMap<u32, BoundTable>,
    session_start: Instant,
}

impl<F: BackendFactory> Session<F> {
    pub fn new(registry: Arc<TableRegistry<F>>) -> Self {
        Session {
            registry,
            recv: MBuffer::new(4096, 0),
            state: State::Header,
            header_lines: Vec::new(),
            experiment_id: None,
            sender_name: None,
            content_mode: None,
            streams: HashMap::new(),
            session_start: Instant::now(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Appends newly received bytes and drives the state machine as far as
    /// it can go, returning every event produced along the way. On error
    /// the session transitions to [`State::ProtocolError`] and will refuse
    /// further input.
    pub async fn feed(&mut self, bytes: &[u8]) -> Result<Vec<SessionEvent>, SessionError> {
        if self.state == State::ProtocolError {
            return Err(SessionError::Codec("session is in the terminal error state".to_string()));
        }
        self.recv.write(bytes).map_err(|e| SessionError::BufferError(e.to_string()))?;
        match self.drive().await {
            Ok(events) => Ok(events),
            Err(e) => {
                warn!(error = %e, "session entering protocol-error state");
                self.state = State::ProtocolError;
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        let mut events = Vec::new();
        loop {
            match self.state {
                State::Header => match self.try_parse_header_line()? {
                    HeaderStep::Line => {}
                    HeaderStep::BlankLine => events.extend(self.configure().await?),
                    HeaderStep::NeedMoreData => return Ok(events),
                },
                State::Configure => unreachable!("configure() always advances past this state"),
                State::Data => match self.try_decode_one().await? {
                    Some(event) => events.push(event),
                    None => return Ok(events),
                },
                State::ProtocolError => return Ok(events),
            }
        }
    }

    fn try_parse_header_line(&mut self) -> Result<HeaderStep, SessionError> {
        self.recv.begin_message();
        let newline = self.recv.find(b'\n');
        if newline == oml_buffer::NOT_FOUND {
            self.recv.reset_read();
            return Ok(HeaderStep::NeedMoreData);
        }
        let line_len = newline as usize;
        let raw = self
            .recv
            .peek(line_len)
            .map_err(|e| SessionError::BufferError(e.to_string()))?
            .to_vec();
        self.recv
            .read(line_len + 1)
            .map_err(|e| SessionError::BufferError(e.to_string()))?;
        self.recv.consume_message();

        let mut line = String::from_utf8_lossy(&raw).into_owned();
        if line.ends_with('\r') {
            line.pop();
        }
        if line.is_empty() {
            return Ok(HeaderStep::BlankLine);
        }
        let parsed = parse_header_line(&line).map_err(|_| SessionError::MalformedHeaderLine(line))?;
        self.header_lines.push(parsed);
        Ok(HeaderStep::Line)
    }

    /// `Configure`: validates required headers, selects the codec, and
    /// eagerly reconciles every `schema` header line (§4.4).
    async fn configure(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        let mut domain = None;
        let mut content = None;
        let mut sender = None;
        let mut schema_lines = Vec::new();
        for h in &self.header_lines {
            match h.tag {
                HeaderTag::Domain => domain = Some(h.value.clone()),
                HeaderTag::Content => content = Some(h.value.clone()),
                HeaderTag::SenderId => sender = Some(h.value.clone()),
                HeaderTag::Schema => schema_lines.push(h.value.clone()),
                HeaderTag::Protocol | HeaderTag::AppName | HeaderTag::StartTime => {}
            }
        }

        let domain = domain.ok_or(SessionError::MissingHeader("experiment-id"))?;
        let content_value = content.ok_or(SessionError::MissingHeader("content"))?;
        let content_mode = ContentMode::from_str(&content_value)
            .ok_or_else(|| SessionError::InvalidContent(content_value.clone()))?;

        self.experiment_id = Some(domain.clone());
        self.content_mode = Some(content_mode);
        self.sender_name = sender;

        let mut events = Vec::new();
        for line in schema_lines {
            let schema =
                Schema::parse_meta_string(&line).map_err(|e| SessionError::Reconcile(e.to_string()))?;
            events.push(self.bind_schema(schema).await?);
        }

        info!(experiment = %domain, content = %content_value, "session configured");
        self.state = State::Data;
        Ok(events)
    }

    async fn bind_schema(&mut self, schema: Schema) -> Result<SessionEvent, SessionError> {
        let experiment = self.experiment_id.clone().expect("set during configure");
        let index = schema.index;
        let bound = self
            .registry
            .reconcile(&experiment, &schema)
            .await
            .map_err(|e| SessionError::Reconcile(e.to_string()))?;
        let table = bound.table_name.clone();
        self.streams.insert(index, bound);
        Ok(SessionEvent::SchemaBound { stream_index: index, table })
    }

    /// `Data`: decodes one message if a complete one is buffered, ingesting
    /// it as either a metadata row (stream 0) or a typed data row.
    async fn try_decode_one(&mut self) -> Result<Option<SessionEvent>, SessionError> {
        let mode = self.content_mode.expect("set during configure");
        let stream_index = match mode {
            ContentMode::Text => oml_wire::peek_stream_index_text(&mut self.recv),
            ContentMode::Binary => oml_wire::peek_stream_index_binary(&mut self.recv),
        }
        .map_err(|e| SessionError::Codec(e.to_string()))?;
        let Some(stream_index) = stream_index else {
            return Ok(None);
        };

        let schema = if stream_index == METADATA_STREAM_INDEX {
            metadata_schema()
        } else {
            self.streams
                .get(&stream_index)
                .map(|b| b.schema.clone())
                .ok_or(SessionError::UnboundStream(stream_index))?
        };

        let outcome = match mode {
            ContentMode::Text => oml_wire::read_text_message(&mut self.recv, &schema),
            ContentMode::Binary => oml_wire::read_binary_message(&mut self.recv, &schema),
        }
        .map_err(|e| SessionError::Codec(e.to_string()))?;

        let message = match outcome {
            ReadOutcome::Message(m) => m,
            ReadOutcome::NeedMoreData => return Ok(None),
        };

        if stream_index == METADATA_STREAM_INDEX {
            return self.ingest_metadata(message).await.map(Some);
        }
        self.ingest_row(stream_index, message).await.map(Some)
    }

    /// Stream-0 metadata row routing: a `schema` key declares a new stream
    /// (explicit routing rather than the fan-out the original client-side
    /// source used, per the mixed-ownership/metadata DESIGN NOTES); any
    /// other key is a plain `(key, value)` pair persisted verbatim.
    async fn ingest_metadata(&mut self, message: Message) -> Result<SessionEvent, SessionError> {
        let key = message
            .values
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| SessionError::Codec("metadata row missing key".to_string()))?
            .to_string();
        let value = message
            .values
            .get(1)
            .and_then(|v| v.as_str())
            .ok_or_else(|| SessionError::Codec("metadata row missing value".to_string()))?
            .to_string();

        if key == "schema" {
            let schema =
                Schema::parse_meta_string(&value).map_err(|e| SessionError::Reconcile(e.to_string()))?;
            return self.bind_schema(schema).await;
        }

        let experiment = self.experiment_id.clone().expect("set during configure");
        self.registry
            .set_metadata(&experiment, &key, &value)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(SessionEvent::MetadataStored { key })
    }

    async fn ingest_row(&mut self, stream_index: u32, message: Message) -> Result<SessionEvent, SessionError> {
        let bound = self
            .streams
            .get(&stream_index)
            .cloned()
            .ok_or(SessionError::UnboundStream(stream_index))?;
        let experiment = self.experiment_id.clone().expect("set during configure");
        let sender_name = self.sender_name.clone().unwrap_or_else(|| "unknown".to_string());
        let sender_id = self
            .registry
            .sender_id(&experiment, &sender_name)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        let row = RowInsert {
            sender_id,
            sequence_number: message.sequence,
            client_timestamp: message.timestamp,
            server_timestamp: self.session_start.elapsed().as_secs_f64(),
            values: message.values,
        };
        self.registry
            .insert_row(&experiment, &bound.table_name, &row)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(SessionEvent::RowIngested { stream_index, table: bound.table_name })
    }
}
