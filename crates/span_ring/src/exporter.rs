//! Exporter boundary for the forwarding destination.
//!
//! When a pipeline is not capturing into its own window, finished spans are
//! handed over in [`SpanBatch`]es to a [`SpanExporter`]. Network transports
//! live outside this crate and plug in through the same trait.

use crate::error::ExportError;
use crate::jaeger::JaegerUiEncoder;
use crate::process::Process;
use crate::span::SpanBatch;
use crate::tag::TagTransformer;
use crate::trace_tree::TraceTreeBuilder;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

/// Trait for exporting span batches to various backends.
///
/// Uses native async fn in traits instead of `#[async_trait]`.
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// For dynamic dispatch, use `Box<dyn SpanExporterBoxed>`.
pub trait SpanExporter: Send + Sync {
    /// Exports a batch of spans.
    fn export(&self, batch: SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Boxed future returned by [`SpanExporterBoxed::export_boxed`].
pub type ExportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;

/// Object-safe version of SpanExporter for dynamic dispatch.
pub trait SpanExporterBoxed: Send + Sync {
    /// Exports a batch of spans (boxed future for object safety).
    fn export_boxed(&self, batch: SpanBatch) -> ExportFuture<'_>;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any SpanExporter can be used as SpanExporterBoxed
impl<T: SpanExporter> SpanExporterBoxed for T {
    fn export_boxed(&self, batch: SpanBatch) -> ExportFuture<'_> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        SpanExporter::name(self)
    }
}

/// Writes each batch as a Jaeger UI document to a file.
///
/// Every export replaces the file's contents; spans whose root is not in the
/// same batch are dropped like in any other tree build.
pub struct JaegerFileExporter {
    path: PathBuf,
    process: Process,
    encoder: JaegerUiEncoder,
}

impl JaegerFileExporter {
    pub fn new(path: impl Into<PathBuf>, process: Process, transformer: TagTransformer) -> Self {
        Self {
            path: path.into(),
            process,
            encoder: JaegerUiEncoder::new(transformer),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SpanExporter for JaegerFileExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        let spans = batch.len();
        let trees = TraceTreeBuilder::build(batch.spans);
        let json = self.encoder.to_vec(&trees, &self.process)?;

        tokio::fs::write(&self.path, json).await?;

        tracing::debug!(
            path = %self.path.display(),
            spans,
            traces = trees.len(),
            "wrote jaeger document"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "jaeger_file"
    }
}

/// Null exporter that discards all spans (for benchmarking)
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanExporter for NullExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test exporter that records all exported spans for verification
#[cfg(test)]
#[derive(Default)]
pub(crate) struct TestExporter {
    spans: std::sync::Mutex<Vec<crate::span::Span>>,
    batches: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl TestExporter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn exported_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }

    pub(crate) fn batch_count(&self) -> usize {
        self.batches.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub(crate) fn span_ids(&self) -> Vec<u64> {
        self.spans.lock().unwrap().iter().map(|s| s.span_id).collect()
    }
}

#[cfg(test)]
impl SpanExporter for TestExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        self.batches.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.spans.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Exporter whose backend is always down
#[cfg(test)]
pub(crate) struct FailingExporter;

#[cfg(test)]
impl SpanExporter for FailingExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Err(ExportError::Transport("connection refused".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}
