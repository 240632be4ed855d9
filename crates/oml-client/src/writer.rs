use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use oml_types::TypedValue;
use oml_wire::{ContentMode, Message, write_binary_message, write_text_message};

use crate::egress::Egress;

/// Per-stream encoder: brackets a row with [`Writer::row_start`]/
/// [`Writer::row_end`], encodes it with the session's content mode, and
/// hands the bytes to the shared [`Egress`].
pub struct Writer {
    egress: Arc<Egress>,
    content_mode: ContentMode,
    sequence: AtomicU64,
    pending: std::sync::Mutex<Option<PendingRow>>,
}

struct PendingRow {
    stream_index: u32,
    timestamp: f64,
    values: Vec<TypedValue>,
}

impl Writer {
    pub fn new(egress: Arc<Egress>, content_mode: ContentMode) -> Self {
        Writer {
            egress,
            content_mode,
            sequence: AtomicU64::new(1),
            pending: std::sync::Mutex::new(None),
        }
    }

    /// Sends raw header/meta bytes through the sidecar buffer, resent on
    /// every reconnect.
    pub async fn write_meta(&self, bytes: &[u8]) {
        self.egress.push_meta(bytes).await;
    }

    pub fn row_start(&self, stream_index: u32, timestamp: f64) {
        *self.pending.lock().unwrap() = Some(PendingRow {
            stream_index,
            timestamp,
            values: Vec::new(),
        });
    }

    pub fn out(&self, values: &[TypedValue]) {
        let mut guard = self.pending.lock().unwrap();
        let row = guard.as_mut().expect("row_start must precede out");
        row.values.extend_from_slice(values);
    }

    pub async fn row_end(&self) {
        let row = self
            .pending
            .lock()
            .unwrap()
            .take()
            .expect("row_start must precede row_end");
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let msg = Message {
            stream_index: row.stream_index,
            sequence,
            timestamp: row.timestamp,
            values: row.values,
        };
        let bytes = match self.content_mode {
            ContentMode::Text => write_text_message(&msg).into_bytes(),
            ContentMode::Binary => write_binary_message(&msg),
        };
        self.egress.push(&bytes).await;
    }
}
