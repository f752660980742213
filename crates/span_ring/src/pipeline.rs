//! The capture pipeline tying recording, resolution and export together.
//!
//! A [`TracingPipeline`] is an ordinary owned value: create one per capture
//! window, share it behind an `Arc`, and call [`record`](TracingPipeline::record)
//! from any thread.
//!
//! ```text
//! record ─► SpanRingBuffer ─► flush ─► TraceTreeBuilder ─► JaegerUiEncoder ─► sink
//!                                └──► forward_pending ─► SpanExporterBoxed
//! ```

use crate::config::{Destination, PipelineConfig};
use crate::error::{ConfigError, ExportError};
use crate::exporter::SpanExporterBoxed;
use crate::jaeger::{JaegerUiEncoder, TraceFormat};
use crate::process::{Process, ProcessResolver, Resource};
use crate::ring_buffer::{BufferMetrics, SpanRingBuffer};
use crate::span::{Span, SpanBatch};
use crate::tag::TagTransformer;
use crate::trace_tree::{TraceTree, TraceTreeBuilder};
use crossbeam_utils::CachePadded;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Owned tracing state: capture buffer, resource and export configuration.
pub struct TracingPipeline {
    config: PipelineConfig,
    transformer: TagTransformer,
    resource: Resource,
    /// Resolved on first export, then read lock-free
    process: OnceLock<Process>,
    /// The capture window, or the pending queue when forwarding
    buffer: SpanRingBuffer,
    exporter: Option<Box<dyn SpanExporterBoxed>>,
    running: AtomicBool,
    dropped: CachePadded<AtomicU64>,
}

impl TracingPipeline {
    /// Creates a stopped pipeline. Call [`start`](Self::start) to begin capturing.
    pub fn new(config: PipelineConfig, resource: Resource) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transformer: config.tag_transformer(),
            buffer: SpanRingBuffer::new(config.ring_buffer_length),
            config,
            resource,
            process: OnceLock::new(),
            exporter: None,
            running: AtomicBool::new(false),
            dropped: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// Creates a stopped pipeline configured from `SPAN_RING_*` variables.
    pub fn from_env(resource: Resource) -> Result<Self, ConfigError> {
        Self::new(PipelineConfig::from_env()?, resource)
    }

    /// Sets the exporter used by [`forward_pending`](Self::forward_pending).
    pub fn with_exporter<E>(mut self, exporter: E) -> Self
    where
        E: SpanExporterBoxed + 'static,
    {
        self.exporter = Some(Box::new(exporter));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Starts accepting spans, discarding anything captured before.
    pub fn start(&self) {
        self.buffer.clear();
        self.running.store(true, Ordering::Release);
        tracing::debug!(
            destination = ?self.config.destination,
            capacity = self.buffer.capacity(),
            "tracing pipeline started"
        );
    }

    /// Stops accepting spans. Already captured spans stay exportable.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        tracing::debug!(held = self.buffer.len(), "tracing pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Records a finished span. Spans recorded while stopped are dropped.
    pub fn record(&self, span: Span) {
        if !self.is_running() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.buffer.insert(span);
    }

    /// Number of spans currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_metrics(&self) -> &BufferMetrics {
        self.buffer.metrics()
    }

    /// Spans dropped because the pipeline was stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The exporting process, resolved from the resource on first use.
    pub fn process(&self) -> &Process {
        self.process
            .get_or_init(|| ProcessResolver::new(self.transformer).resolve(&self.resource))
    }

    /// Flushes the capture window and writes it to `out` in `format`.
    ///
    /// Returns the number of traces written. The window is only flushed once
    /// the format is known to be supported.
    pub fn write_trace_data<W: Write>(&self, out: W, format: TraceFormat) -> Result<usize, ExportError> {
        let trees = self.take_trees(format)?;
        JaegerUiEncoder::new(self.transformer).write(&trees, self.process(), out)?;
        Ok(trees.len())
    }

    /// Like [`write_trace_data`](Self::write_trace_data), writing to an async sink.
    ///
    /// Encoding happens up front; the only suspension point is the write.
    pub async fn write_trace_data_async<W>(&self, out: &mut W, format: TraceFormat) -> Result<usize, ExportError>
    where
        W: AsyncWrite + Unpin,
    {
        let trees = self.take_trees(format)?;
        let json = JaegerUiEncoder::new(self.transformer).to_vec(&trees, self.process())?;
        out.write_all(&json).await?;
        out.flush().await?;
        Ok(trees.len())
    }

    fn take_trees(&self, format: TraceFormat) -> Result<Vec<TraceTree>, ExportError> {
        format.ensure_supported()?;
        if self.config.destination != Destination::InMemory {
            return Err(ExportError::NoInMemoryCapture);
        }

        let spans = self.buffer.flush();
        let span_count = spans.len();
        let trees = TraceTreeBuilder::build(spans);
        tracing::debug!(spans = span_count, traces = trees.len(), %format, "flushed capture window");
        Ok(trees)
    }

    /// Hands every pending span to the exporter.
    ///
    /// Only meaningful for [`Destination::Exporter`]; an in-memory pipeline
    /// keeps its window for [`write_trace_data`](Self::write_trace_data) and
    /// forwards nothing. Returns the number of spans exported. A failed export
    /// loses its batch.
    pub async fn forward_pending(&self) -> Result<usize, ExportError> {
        if self.config.destination != Destination::Exporter {
            return Ok(0);
        }
        let exporter = self.exporter.as_ref().ok_or(ExportError::NoExporter)?;

        let spans = self.buffer.flush();
        if spans.is_empty() {
            return Ok(0);
        }

        let batch = SpanBatch::with_spans(spans);
        let count = batch.len();
        match exporter.export_boxed(batch).await {
            Ok(()) => {
                tracing::debug!(exporter = exporter.name(), spans = count, "forwarded spans");
                Ok(count)
            }
            Err(err) => {
                tracing::warn!(exporter = exporter.name(), spans = count, error = %err, "export failed, batch dropped");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for TracingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingPipeline")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("buffered", &self.buffer.len())
            .field("exporter", &self.exporter.as_ref().map(|e| e.name()))
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::exporter::{FailingExporter, SpanExporter, TestExporter};
    use crate::span::SpanKind;
    use std::sync::Arc;

    fn resource() -> Resource {
        Resource::empty().with_attribute(crate::process::SERVICE_NAME, "pipeline-test")
    }

    fn in_memory(capacity: usize) -> TracingPipeline {
        let pipeline = TracingPipeline::new(
            PipelineConfig::default().with_ring_buffer_length(capacity),
            resource(),
        )
        .unwrap();
        pipeline.start();
        pipeline
    }

    fn span(trace_id: u128, span_id: u64, parent: u64) -> Span {
        Span::new(trace_id, span_id, parent, "op", SpanKind::Internal)
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let result = TracingPipeline::new(PipelineConfig::default().with_ring_buffer_length(0), resource());
        assert!(matches!(result, Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn test_new_pipeline_is_stopped() {
        let pipeline = TracingPipeline::new(PipelineConfig::default(), resource()).unwrap();
        assert!(!pipeline.is_running());
        pipeline.record(span(1, 1, 0));
        assert_eq!(pipeline.buffered(), 0);
        assert_eq!(pipeline.dropped(), 1);
    }

    #[test]
    fn test_write_trace_data() {
        let pipeline = in_memory(16);
        pipeline.record(span(7, 2, 1));
        pipeline.record(span(7, 1, 0));

        let mut out = Vec::new();
        let traces = pipeline.write_trace_data(&mut out, TraceFormat::JaegerUi).unwrap();
        assert_eq!(traces, 1);
        assert_eq!(pipeline.buffered(), 0);

        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["data"][0]["traceID"], "7");
        assert_eq!(json["data"][0]["processes"]["1"]["serviceName"], "pipeline-test");
    }

    #[test]
    fn test_unsupported_format_keeps_window() {
        let pipeline = in_memory(4);
        pipeline.record(span(1, 1, 0));

        let mut out = Vec::new();
        let result = pipeline.write_trace_data(&mut out, TraceFormat::Zipkin);
        assert!(matches!(result, Err(ExportError::UnsupportedFormat(_))));
        assert!(out.is_empty());
        assert_eq!(pipeline.buffered(), 1);
    }

    #[test]
    fn test_stop_keeps_window_exportable() {
        let pipeline = in_memory(4);
        pipeline.record(span(1, 1, 0));
        pipeline.stop();
        pipeline.record(span(2, 2, 0));

        assert_eq!(pipeline.buffered(), 1);
        assert_eq!(pipeline.dropped(), 1);
        let traces = pipeline.write_trace_data(std::io::sink(), TraceFormat::JaegerUi).unwrap();
        assert_eq!(traces, 1);
    }

    #[test]
    fn test_restart_discards_window() {
        let pipeline = in_memory(4);
        pipeline.record(span(1, 1, 0));
        pipeline.stop();
        pipeline.start();
        assert_eq!(pipeline.buffered(), 0);
    }

    #[test]
    fn test_process_resolved_once() {
        let pipeline = in_memory(4);
        let first: *const Process = pipeline.process();
        let second: *const Process = pipeline.process();
        assert_eq!(first, second);
        assert_eq!(pipeline.process().service_name, "pipeline-test");
    }

    #[test]
    fn test_exporter_destination_has_no_window() {
        let pipeline = TracingPipeline::new(
            PipelineConfig::default().with_destination(Destination::Exporter),
            resource(),
        )
        .unwrap();
        pipeline.start();
        pipeline.record(span(1, 1, 0));

        let result = pipeline.write_trace_data(Vec::new(), TraceFormat::JaegerUi);
        assert!(matches!(result, Err(ExportError::NoInMemoryCapture)));
        assert_eq!(pipeline.buffered(), 1);
    }

    #[test]
    fn test_concurrent_record_then_export() {
        let pipeline = Arc::new(in_memory(1000));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let pipeline = Arc::clone(&pipeline);
                std::thread::spawn(move || {
                    let trace_id = u128::from(t) + 1;
                    pipeline.record(span(trace_id, t * 100 + 1, 0));
                    for i in 2..=50 {
                        pipeline.record(span(trace_id, t * 100 + i, t * 100 + 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(pipeline.write_trace_data(&mut out, TraceFormat::JaegerUi).unwrap(), 4);
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let total: usize = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["spans"].as_array().unwrap().len())
            .sum();
        assert_eq!(total, 200);
    }

    #[tokio::test]
    async fn test_write_trace_data_async() {
        let pipeline = in_memory(8);
        pipeline.record(span(3, 1, 0));

        let mut out = Vec::new();
        let traces = pipeline
            .write_trace_data_async(&mut out, TraceFormat::JaegerUi)
            .await
            .unwrap();
        assert_eq!(traces, 1);
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["data"][0]["spans"][0]["spanID"], "1");
    }

    #[tokio::test]
    async fn test_forward_pending() {
        let exporter = Arc::new(TestExporter::new());
        let pipeline = TracingPipeline::new(
            PipelineConfig::default().with_destination(Destination::Exporter),
            resource(),
        )
        .unwrap()
        .with_exporter(SharedExporter(Arc::clone(&exporter)));
        pipeline.start();

        assert_eq!(pipeline.forward_pending().await.unwrap(), 0);
        assert_eq!(exporter.batch_count(), 0);

        pipeline.record(span(1, 1, 0));
        pipeline.record(span(1, 2, 1));
        assert_eq!(pipeline.forward_pending().await.unwrap(), 2);
        assert_eq!(exporter.span_ids(), vec![1, 2]);
        assert_eq!(pipeline.buffered(), 0);
    }

    #[tokio::test]
    async fn test_forward_without_exporter() {
        let pipeline = TracingPipeline::new(
            PipelineConfig::default().with_destination(Destination::Exporter),
            resource(),
        )
        .unwrap();
        pipeline.start();
        pipeline.record(span(1, 1, 0));

        assert!(matches!(pipeline.forward_pending().await, Err(ExportError::NoExporter)));
        assert_eq!(pipeline.buffered(), 1);
    }

    #[tokio::test]
    async fn test_forward_failure_reported() {
        let pipeline = TracingPipeline::new(
            PipelineConfig::default().with_destination(Destination::Exporter),
            resource(),
        )
        .unwrap()
        .with_exporter(FailingExporter);
        pipeline.start();
        pipeline.record(span(1, 1, 0));

        assert!(matches!(pipeline.forward_pending().await, Err(ExportError::Transport(_))));
    }

    #[tokio::test]
    async fn test_in_memory_forwards_nothing() {
        let pipeline = in_memory(4).with_exporter(FailingExporter);
        pipeline.record(span(1, 1, 0));
        assert_eq!(pipeline.forward_pending().await.unwrap(), 0);
        assert_eq!(pipeline.buffered(), 1);
    }

    struct SharedExporter(Arc<TestExporter>);

    impl SpanExporter for SharedExporter {
        async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
            self.0.export(batch).await
        }

        fn name(&self) -> &str {
            "shared"
        }
    }
}
