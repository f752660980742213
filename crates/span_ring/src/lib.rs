//! In-process span capture with Jaeger UI export.
//!
//! Instrumented code records finished [`Span`]s into a [`TracingPipeline`],
//! which keeps the most recent ones in a fixed-capacity ring buffer. On
//! request the window is flushed, regrouped into per-trace trees and written
//! out as a document the Jaeger UI can load directly.
//!
//! # Example
//!
//! ```
//! use span_ring::{PipelineConfig, Resource, Span, SpanKind, TraceFormat, TracingPipeline};
//!
//! let pipeline = TracingPipeline::new(
//!     PipelineConfig::default().with_ring_buffer_length(64),
//!     Resource::default().with_service("checkout", None),
//! )?;
//! pipeline.start();
//!
//! pipeline.record(Span::new(0x42, 1, 0, "GET /cart", SpanKind::Server));
//! pipeline.record(Span::new(0x42, 2, 1, "SELECT cart", SpanKind::Client));
//!
//! let mut json = Vec::new();
//! let traces = pipeline.write_trace_data(&mut json, TraceFormat::JaegerUi)?;
//! assert_eq!(traces, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod exporter;
mod invariants;
pub mod jaeger;
pub mod peer_service;
pub mod pipeline;
pub mod process;
pub mod ring_buffer;
pub mod span;
mod sync;
pub mod tag;
pub mod trace_tree;

// Re-export main types
pub use config::{Destination, PipelineConfig};
pub use error::{ConfigError, ExportError};
pub use exporter::{JaegerFileExporter, NullExporter, SpanExporter, SpanExporterBoxed};
pub use jaeger::{JaegerDocument, JaegerUiEncoder, TraceFormat};
pub use peer_service::{PeerService, PeerServiceState};
pub use pipeline::TracingPipeline;
pub use process::{Process, ProcessResolver, Resource};
pub use ring_buffer::{BufferMetrics, SpanRingBuffer};
pub use span::{
    AttributeArray, AttributeValue, DisplayValue, ReferenceType, Span, SpanBatch, SpanEvent, SpanKind,
    SpanStatus,
};
pub use tag::{JaegerTag, TagTransformer, TagValue};
pub use trace_tree::{TraceTree, TraceTreeBuilder};
