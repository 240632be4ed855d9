use std::sync::Arc;
use std::time::Duration;

use oml_types::{Schema, TypedValue};
use tokio::time::Instant;

use crate::ClientError;
use crate::filter::Filter;
use crate::writer::Writer;

/// What fires a [`MeasurementStream`]'s output path.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    /// Emit after this many injections.
    SampleCount(u32),
    /// Emit once at least this much time has elapsed since the last
    /// emission. Checked cooperatively on the next injection rather than
    /// by a background timer, since injection is the only driver of
    /// output in this design.
    Interval(Duration),
}

/// One (filter chain, writer, trigger) attached to an MP. `bindings[i]`
/// is the index into the MP's input schema that `filters[i]` samples.
pub struct MeasurementStream {
    stream_index: u32,
    filters: Vec<Box<dyn Filter>>,
    bindings: Vec<usize>,
    writer: Writer,
    trigger: Trigger,
    samples_since_trigger: u32,
    last_emit: Instant,
}

impl MeasurementStream {
    pub fn new(
        stream_index: u32,
        filters: Vec<Box<dyn Filter>>,
        bindings: Vec<usize>,
        writer: Writer,
        trigger: Trigger,
    ) -> Self {
        MeasurementStream {
            stream_index,
            filters,
            bindings,
            writer,
            trigger,
            samples_since_trigger: 0,
            last_emit: Instant::now(),
        }
    }

    pub fn stream_index(&self) -> u32 {
        self.stream_index
    }

    /// Emitted schema: the concatenation of each filter's declared output
    /// fields, in filter-chain order.
    pub fn output_schema(&self, name: impl Into<String>) -> Result<Schema, oml_types::SchemaError> {
        let fields = self.filters.iter().flat_map(|f| f.output_fields()).collect();
        Schema::new(name, self.stream_index, fields)
    }

    fn should_fire(&self) -> bool {
        match self.trigger {
            Trigger::SampleCount(n) => self.samples_since_trigger >= n,
            Trigger::Interval(period) => self.last_emit.elapsed() >= period,
        }
    }

    async fn sample(&mut self, values: &[TypedValue], timestamp: f64) -> Result<(), ClientError> {
        for (filter, &idx) in self.filters.iter_mut().zip(&self.bindings) {
            let value = values
                .get(idx)
                .ok_or(ClientError::InjectionArity { expected: idx + 1, found: values.len() })?;
            filter.sample(value).map_err(ClientError::Filter)?;
        }
        self.samples_since_trigger += 1;
        if self.should_fire() {
            self.emit(timestamp).await;
        }
        Ok(())
    }

    async fn emit(&mut self, timestamp: f64) {
        let mut out = Vec::new();
        for filter in &mut self.filters {
            filter.process(&mut out);
        }
        self.writer.row_start(self.stream_index, timestamp);
        self.writer.out(&out);
        self.writer.row_end().await;
        self.samples_since_trigger = 0;
        self.last_emit = Instant::now();
    }
}

/// A named, schema-typed injection point. Streams may only be attached
/// before the point starts receiving injections; injections are
/// serialized by the point's mutex.
pub struct MeasurementPoint {
    name: String,
    schema: Schema,
    state: tokio::sync::Mutex<MpState>,
}

struct MpState {
    streams: Vec<MeasurementStream>,
    running: bool,
}

impl MeasurementPoint {
    pub fn new(name: impl Into<String>, schema: Schema) -> Arc<Self> {
        Arc::new(MeasurementPoint {
            name: name.into(),
            schema,
            state: tokio::sync::Mutex::new(MpState {
                streams: Vec::new(),
                running: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Attaches a stream. Fails once the point has received its first
    /// injection.
    pub async fn attach_stream(&self, ms: MeasurementStream) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(ClientError::AlreadyRunning(self.name.clone()));
        }
        state.streams.push(ms);
        Ok(())
    }

    /// Samples `values` (positionally matching the point's schema) into
    /// every attached stream, driving each one's trigger.
    pub async fn inject(&self, values: &[TypedValue], timestamp: f64) -> Result<(), ClientError> {
        if values.len() != self.schema.field_count() {
            return Err(ClientError::InjectionArity {
                expected: self.schema.field_count(),
                found: values.len(),
            });
        }
        for (value, field) in values.iter().zip(self.schema.fields()) {
            if value.type_tag() != field.type_tag {
                return Err(ClientError::InjectionTypeMismatch {
                    field: field.name.clone(),
                    expected: field.type_tag,
                    found: value.type_tag(),
                });
            }
        }

        let mut state = self.state.lock().await;
        state.running = true;
        for ms in &mut state.streams {
            ms.sample(values, timestamp).await?;
        }
        Ok(())
    }
}
