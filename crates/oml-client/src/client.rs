use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use oml_types::{Schema, TypedValue};
use oml_wire::ContentMode;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::egress::{Egress, Transport};
use crate::filter::Filter;
use crate::point::{MeasurementPoint, MeasurementStream, Trigger};
use crate::writer::Writer;
use crate::ClientError;

/// Per-client configuration: the one-time handshake headers and egress
/// sizing. There is no global default; every field must be supplied.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub domain: String,
    pub app_name: String,
    pub sender_id: String,
    pub content_mode: ContentMode,
    pub egress_capacity_bytes: usize,
    pub egress_chunk_bytes: usize,
}

struct TcpTransport {
    addr: String,
    stream: Option<TcpStream>,
}

impl Transport for TcpTransport {
    async fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        use tokio::io::AsyncWriteExt;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| std::io::Error::other("not connected"))?;
        stream.write(buf).await
    }

    async fn reconnect(&mut self) -> std::io::Result<()> {
        self.stream = Some(TcpStream::connect(&self.addr).await?);
        Ok(())
    }
}

/// An explicit handle to one client session: the egress connection, the
/// metadata stream writer, and the set of registered measurement points.
/// Created by [`Client::connect`]; there is no process-wide instance.
pub struct Client {
    config: ClientConfig,
    egress: Arc<Egress>,
    meta_writer: Writer,
    next_stream_index: AtomicU32,
    points: Mutex<HashMap<String, Arc<MeasurementPoint>>>,
}

impl Client {
    pub async fn connect(config: ClientConfig) -> Result<Arc<Self>, ClientError> {
        let transport = TcpTransport {
            addr: config.server_addr.clone(),
            stream: None,
        };
        let egress = Arc::new(Egress::spawn(
            config.egress_capacity_bytes,
            config.egress_chunk_bytes,
            transport,
        ));

        let content_name = match config.content_mode {
            ContentMode::Text => "text",
            ContentMode::Binary => "binary",
        };
        let header = format!(
            "protocol: 4\ndomain: {}\nsender-id: {}\napp-name: {}\ncontent: {}\n\n",
            config.domain, config.sender_id, config.app_name, content_name
        );
        egress.push_meta(header.as_bytes()).await;

        let meta_writer = Writer::new(egress.clone(), config.content_mode);

        Ok(Arc::new(Client {
            config,
            egress,
            meta_writer,
            next_stream_index: AtomicU32::new(1),
            points: Mutex::new(HashMap::new()),
        }))
    }

    /// Registers a measurement point with the given input schema (the
    /// positional types `inject` values must match).
    pub async fn register_mp(&self, name: impl Into<String>, schema: Schema) -> Result<Arc<MeasurementPoint>, ClientError> {
        let name = name.into();
        let mp = MeasurementPoint::new(name.clone(), schema);
        self.points.lock().await.insert(name, mp.clone());
        Ok(mp)
    }

    /// Attaches a stream to `mp`: runs `values` positionally named by
    /// `bindings` through `filters`, firing on `trigger`. Declares the
    /// stream's schema to the server via a `schema` header line.
    pub async fn attach_stream(
        &self,
        mp: &Arc<MeasurementPoint>,
        stream_name: impl Into<String>,
        filters: Vec<Box<dyn Filter>>,
        bindings: Vec<usize>,
        trigger: Trigger,
    ) -> Result<(), ClientError> {
        let stream_index = self.next_stream_index.fetch_add(1, Ordering::Relaxed);
        let writer = Writer::new(self.egress.clone(), self.config.content_mode);
        let ms = MeasurementStream::new(stream_index, filters, bindings, writer, trigger);
        let schema = ms.output_schema(stream_name)?;
        self.egress
            .push_meta(format!("schema: {}\n", schema.to_meta_string()).as_bytes())
            .await;
        mp.attach_stream(ms).await
    }

    /// Samples `values` into `mp`'s attached streams.
    pub async fn inject(&self, mp: &MeasurementPoint, values: &[TypedValue], timestamp: f64) -> Result<(), ClientError> {
        mp.inject(values, timestamp).await
    }

    /// Writes a `(key, value)` metadata row to stream 0. The wire key is
    /// `"{mp_name}_[{field}_]{key}"`.
    pub async fn inject_metadata(
        &self,
        mp_name: &str,
        key: &str,
        value: &str,
        field: Option<&str>,
    ) -> Result<(), ClientError> {
        if !self.points.lock().await.contains_key(mp_name) {
            return Err(ClientError::UnknownMp(mp_name.to_string()));
        }
        if key.is_empty() {
            return Err(ClientError::InvalidMetadataKey(key.to_string()));
        }
        let wire_key = match field {
            Some(f) => format!("{mp_name}_{f}_{key}"),
            None => format!("{mp_name}_{key}"),
        };
        self.meta_writer.row_start(0, 0.0);
        self.meta_writer.out(&[
            oml_types::TypedValue::String(oml_types::OmlString::Owned(wire_key)),
            oml_types::TypedValue::String(oml_types::OmlString::Owned(value.to_string())),
        ]);
        self.meta_writer.row_end().await;
        Ok(())
    }

    pub fn total_dropped_bytes(&self) -> u64 {
        self.egress.total_dropped_bytes()
    }

    pub async fn close(self: Arc<Self>) {
        // `egress` is shared (Arc) by every Writer; closing here is safe
        // once the caller has stopped injecting.
        if let Ok(egress) = Arc::try_unwrap(self).map(|c| c.egress).map_err(|_| ()) {
            let mut egress = match Arc::try_unwrap(egress) {
                Ok(e) => e,
                Err(shared) => {
                    // Other Writers still hold a reference; nothing more we
                    // can do here than drop our handle.
                    drop(shared);
                    return;
                }
            };
            egress.close().await;
        }
    }
}
