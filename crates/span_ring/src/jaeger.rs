//! Jaeger UI JSON encoding.
//!
//! The document produced here is what the Jaeger UI accepts through its
//! "upload JSON" dialog:
//!
//! ```text
//! { "data": [ { "traceID", "spans": [...], "processes": { "1": {...} } } ] }
//! ```
//!
//! Ids are lower-case hex without prefix or padding. Only the low 64 bits of
//! the 128-bit trace id are written. Times are passed through in
//! microseconds.

use crate::error::ExportError;
use crate::peer_service::{PeerServiceState, PEER_SERVICE};
use crate::process::Process;
use crate::span::{Span, SpanEvent, SpanReference, SpanStatus};
use crate::tag::{JaegerTag, TagTransformer, TagValue};
use crate::trace_tree::TraceTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufWriter, Write};
use std::str::FromStr;

pub const STATUS_CODE_KEY: &str = "otel.status_code";
pub const STATUS_DESCRIPTION_KEY: &str = "otel.status_description";
pub const ERROR_KEY: &str = "error";
pub const SPAN_KIND_KEY: &str = "span.kind";
pub const EVENT_KEY: &str = "event";

/// Every span in a document points at this single process entry.
pub const PROCESS_ID: &str = "1";

/// Output formats a trace dump can be requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// Jaeger UI JSON upload format
    JaegerUi,
    /// Zipkin v2 JSON (no encoder)
    Zipkin,
    /// OTLP JSON (no encoder)
    Otlp,
}

impl TraceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JaegerUi => "jaeger-ui",
            Self::Zipkin => "zipkin",
            Self::Otlp => "otlp",
        }
    }

    /// Fails unless an encoder exists for this format.
    pub fn ensure_supported(self) -> Result<(), ExportError> {
        match self {
            Self::JaegerUi => Ok(()),
            other => Err(ExportError::UnsupportedFormat(other.as_str().to_string())),
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jaeger-ui" | "jaegerui" | "jaeger_ui" => Ok(Self::JaegerUi),
            "zipkin" => Ok(Self::Zipkin),
            "otlp" => Ok(Self::Otlp),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Top-level Jaeger UI document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerDocument {
    pub data: Vec<JaegerTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerTrace {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub spans: Vec<JaegerSpan>,
    pub processes: BTreeMap<String, Process>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JaegerSpan {
    #[serde(rename = "processID")]
    pub process_id: String,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    pub flags: u32,
    pub operation_name: String,
    pub parent_span_id: String,
    pub start_time: u64,
    pub duration: u64,
    pub references: Vec<JaegerReference>,
    pub tags: Vec<JaegerTag>,
    pub logs: Vec<JaegerLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerReference {
    #[serde(rename = "refType")]
    pub ref_type: String,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerLog {
    pub timestamp: u64,
    pub fields: Vec<JaegerTag>,
}

/// Lower-case, unpadded hex of the low 64 bits of a trace id.
pub fn trace_id_hex(trace_id: u128) -> String {
    format!("{:x}", trace_id as u64)
}

/// Lower-case, unpadded hex of a span id.
pub fn span_id_hex(span_id: u64) -> String {
    format!("{:x}", span_id)
}

// =============================================================================
// ENCODER
// =============================================================================

/// Encodes trace trees into the Jaeger UI document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaegerUiEncoder {
    transformer: TagTransformer,
}

impl JaegerUiEncoder {
    pub fn new(transformer: TagTransformer) -> Self {
        Self { transformer }
    }

    /// Encodes `trees` and writes the JSON document to `out`. Writes are
    /// buffered and flushed before returning.
    pub fn write<W: Write>(
        &self,
        trees: &[TraceTree],
        process: &Process,
        out: W,
    ) -> Result<(), ExportError> {
        let document = self.encode(trees, process);
        let mut out = BufWriter::new(out);
        serde_json::to_writer(&mut out, &document)?;
        out.flush()?;
        Ok(())
    }

    /// Encodes `trees` into an owned JSON byte buffer.
    pub fn to_vec(&self, trees: &[TraceTree], process: &Process) -> Result<Vec<u8>, ExportError> {
        let mut buf = Vec::new();
        self.write(trees, process, &mut buf)?;
        Ok(buf)
    }

    pub fn encode(&self, trees: &[TraceTree], process: &Process) -> JaegerDocument {
        JaegerDocument {
            data: trees.iter().map(|tree| self.encode_trace(tree, process)).collect(),
        }
    }

    fn encode_trace(&self, tree: &TraceTree, process: &Process) -> JaegerTrace {
        let mut processes = BTreeMap::new();
        processes.insert(PROCESS_ID.to_string(), process.clone());

        JaegerTrace {
            trace_id: trace_id_hex(tree.trace_id()),
            spans: tree.spans().map(|span| self.encode_span(span)).collect(),
            processes,
        }
    }

    pub fn encode_span(&self, span: &Span) -> JaegerSpan {
        JaegerSpan {
            process_id: PROCESS_ID.to_string(),
            trace_id: trace_id_hex(span.trace_id),
            span_id: span_id_hex(span.span_id),
            flags: u32::from(span.flags),
            operation_name: span.name.clone(),
            parent_span_id: span_id_hex(span.parent_span_id),
            start_time: span.start_time,
            duration: span.duration,
            references: span.references.iter().map(encode_reference).collect(),
            tags: self.span_tags(span),
            logs: span.events.iter().map(|event| self.encode_log(event)).collect(),
        }
    }

    /// Builds a span's tag list: transformed attributes plus status, kind and
    /// peer service tags.
    fn span_tags(&self, span: &Span) -> Vec<JaegerTag> {
        let mut tags = Vec::with_capacity(span.attributes.len() + 4);
        let mut peer = PeerServiceState::new();
        let mut status_from_tag = None;
        let mut description_from_tag = None;

        for (key, value) in span.attributes.iter() {
            let Some(tag) = self.transformer.transform(key, value) else {
                tracing::trace!(key = %key, span_id = span.span_id, "dropped attribute that failed to render");
                continue;
            };

            peer.inspect(key, &tag.value);
            if let TagValue::String(s) = &tag.value {
                if key == STATUS_CODE_KEY {
                    status_from_tag = SpanStatus::from_tag_value(s);
                    continue;
                }
                if key == STATUS_DESCRIPTION_KEY {
                    description_from_tag = Some(s.clone());
                    continue;
                }
            }
            tags.push(tag);
        }

        if let Some(peer_service) = peer.resolve() {
            if peer_service.add_as_tag {
                tags.push(JaegerTag::string(PEER_SERVICE, peer_service.name));
            }
        }

        if let Some(kind) = span.kind.as_tag_value() {
            tags.push(JaegerTag::string(SPAN_KIND_KEY, kind));
        }

        let status = match span.status {
            SpanStatus::Unset => status_from_tag.unwrap_or(SpanStatus::Unset),
            explicit => explicit,
        };
        match status {
            SpanStatus::Unset => {}
            SpanStatus::Ok => tags.push(JaegerTag::string(STATUS_CODE_KEY, status.as_tag_value())),
            SpanStatus::Error => {
                tags.push(JaegerTag::string(STATUS_CODE_KEY, status.as_tag_value()));
                tags.push(JaegerTag::bool(ERROR_KEY, true));
                let description = span
                    .status_description
                    .clone()
                    .or(description_from_tag)
                    .filter(|d| !d.is_empty());
                if let Some(description) = description {
                    let description = self
                        .transformer
                        .transform(STATUS_DESCRIPTION_KEY, &description.into());
                    tags.extend(description);
                }
            }
        }

        tags
    }

    fn encode_log(&self, event: &SpanEvent) -> JaegerLog {
        let mut fields = self.transformer.transform_all(&event.attributes);
        fields.push(JaegerTag::string(EVENT_KEY, event.name.clone()));
        JaegerLog {
            timestamp: event.timestamp,
            fields,
        }
    }
}

fn encode_reference(reference: &SpanReference) -> JaegerReference {
    JaegerReference {
        ref_type: reference.ref_type.as_str().to_string(),
        trace_id: trace_id_hex(reference.trace_id),
        span_id: span_id_hex(reference.span_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{ReferenceType, SpanKind};
    use crate::trace_tree::TraceTreeBuilder;

    fn process() -> Process {
        Process {
            service_name: "svc".into(),
            tags: Vec::new(),
        }
    }

    fn tag<'a>(span: &'a JaegerSpan, key: &str) -> Option<&'a TagValue> {
        span.tags.iter().find(|t| t.key == key).map(|t| &t.value)
    }

    #[test]
    fn test_hex_encoding() {
        assert_eq!(span_id_hex(0), "0");
        assert_eq!(span_id_hex(0xab), "ab");
        assert_eq!(span_id_hex(u64::MAX), "ffffffffffffffff");
        assert_eq!(trace_id_hex(0x1_0000_0000_0000_000f), "f");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JaegerUI".parse::<TraceFormat>().unwrap(), TraceFormat::JaegerUi);
        assert_eq!("jaeger-ui".parse::<TraceFormat>().unwrap(), TraceFormat::JaegerUi);
        assert!(matches!(
            "protobuf".parse::<TraceFormat>(),
            Err(ExportError::UnsupportedFormat(name)) if name == "protobuf"
        ));
        assert!(TraceFormat::JaegerUi.ensure_supported().is_ok());
        assert!(matches!(
            TraceFormat::Zipkin.ensure_supported(),
            Err(ExportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_span_fields() {
        let mut span = Span::new(0xabc, 0x10, 0x1, "GET /users", SpanKind::Server)
            .with_timing(1_700_000_000_000_000, 1500);
        span.add_reference(ReferenceType::FollowsFrom, 0xdef, 0x99);

        let encoded = JaegerUiEncoder::default().encode_span(&span);
        assert_eq!(encoded.process_id, "1");
        assert_eq!(encoded.trace_id, "abc");
        assert_eq!(encoded.span_id, "10");
        assert_eq!(encoded.parent_span_id, "1");
        assert_eq!(encoded.flags, 1);
        assert_eq!(encoded.start_time, 1_700_000_000_000_000);
        assert_eq!(encoded.duration, 1500);
        assert_eq!(
            encoded.references,
            vec![JaegerReference {
                ref_type: "FOLLOWS_FROM".into(),
                trace_id: "def".into(),
                span_id: "99".into(),
            }]
        );
        assert_eq!(tag(&encoded, SPAN_KIND_KEY), Some(&TagValue::String("server".into())));
    }

    #[test]
    fn test_internal_kind_has_no_kind_tag() {
        let span = Span::new(1, 2, 0, "op", SpanKind::Internal);
        let encoded = JaegerUiEncoder::default().encode_span(&span);
        assert!(tag(&encoded, SPAN_KIND_KEY).is_none());
        assert!(encoded.tags.is_empty());
    }

    #[test]
    fn test_error_status_tags() {
        let mut span = Span::new(1, 2, 0, "op", SpanKind::Internal);
        span.finish_with_error("connection reset");

        let encoded = JaegerUiEncoder::default().encode_span(&span);
        assert_eq!(tag(&encoded, STATUS_CODE_KEY), Some(&TagValue::String("ERROR".into())));
        assert_eq!(tag(&encoded, ERROR_KEY), Some(&TagValue::Bool(true)));
        assert_eq!(
            tag(&encoded, STATUS_DESCRIPTION_KEY),
            Some(&TagValue::String("connection reset".into()))
        );
    }

    #[test]
    fn test_status_attribute_consumed() {
        let span = Span::new(1, 2, 0, "op", SpanKind::Internal)
            .with_attribute(STATUS_CODE_KEY, "ok")
            .with_attribute(STATUS_DESCRIPTION_KEY, "ignored for ok");

        let encoded = JaegerUiEncoder::default().encode_span(&span);
        assert_eq!(encoded.tags, vec![JaegerTag::string(STATUS_CODE_KEY, "OK")]);
    }

    #[test]
    fn test_explicit_status_beats_status_attribute() {
        let mut span = Span::new(1, 2, 0, "op", SpanKind::Internal).with_attribute(STATUS_CODE_KEY, "ERROR");
        span.finish(SpanStatus::Ok);

        let encoded = JaegerUiEncoder::default().encode_span(&span);
        assert_eq!(tag(&encoded, STATUS_CODE_KEY), Some(&TagValue::String("OK".into())));
        assert!(tag(&encoded, ERROR_KEY).is_none());
    }

    #[test]
    fn test_peer_service_synthesized_tag() {
        let span = Span::new(1, 2, 0, "op", SpanKind::Client)
            .with_attribute("net.peer.name", "Y")
            .with_attribute("net.peer.port", "8080");

        let encoded = JaegerUiEncoder::default().encode_span(&span);
        assert_eq!(tag(&encoded, PEER_SERVICE), Some(&TagValue::String("Y:8080".into())));
    }

    #[test]
    fn test_explicit_peer_service_not_duplicated() {
        let span = Span::new(1, 2, 0, "op", SpanKind::Client)
            .with_attribute("peer.service", "X")
            .with_attribute("net.peer.name", "Y");

        let encoded = JaegerUiEncoder::default().encode_span(&span);
        let peer_tags: Vec<_> = encoded.tags.iter().filter(|t| t.key == PEER_SERVICE).collect();
        assert_eq!(peer_tags.len(), 1);
        assert_eq!(peer_tags[0].value, TagValue::String("X".into()));
    }

    #[test]
    fn test_non_string_peer_service_not_duplicated() {
        let span = Span::new(1, 2, 0, "op", SpanKind::Client)
            .with_attribute("peer.service", 5i64)
            .with_attribute("net.peer.name", "Y");

        let encoded = JaegerUiEncoder::default().encode_span(&span);
        let peer_tags: Vec<_> = encoded.tags.iter().filter(|t| t.key == PEER_SERVICE).collect();
        assert_eq!(peer_tags.len(), 1);
        assert_eq!(peer_tags[0].value, TagValue::Long(5));
    }

    #[test]
    fn test_non_finite_double_document_parses_back() {
        let trees = TraceTreeBuilder::build(vec![
            Span::new(1, 1, 0, "root", SpanKind::Internal).with_attribute("ratio", f64::NAN)
        ]);
        let bytes = JaegerUiEncoder::default().to_vec(&trees, &process()).unwrap();
        let doc: JaegerDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            tag(&doc.data[0].spans[0], "ratio"),
            Some(&TagValue::String("NaN".into()))
        );
    }

    /// Counts the write calls that reach the sink.
    struct CountingWriter {
        writes: usize,
        bytes: Vec<u8>,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes += 1;
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_buffers_sink() {
        let trees = TraceTreeBuilder::build(
            (1..=10u64)
                .map(|id| {
                    Span::new(1, id, if id == 1 { 0 } else { 1 }, "op", SpanKind::Server)
                        .with_attribute("http.method", "GET")
                })
                .collect(),
        );
        let mut sink = CountingWriter {
            writes: 0,
            bytes: Vec::new(),
        };
        JaegerUiEncoder::default()
            .write(&trees, &process(), &mut sink)
            .unwrap();

        assert_eq!(sink.writes, 1);
        assert_eq!(
            sink.bytes,
            JaegerUiEncoder::default().to_vec(&trees, &process()).unwrap()
        );
    }

    #[test]
    fn test_events_become_logs() {
        let mut span = Span::new(1, 2, 0, "op", SpanKind::Internal);
        span.add_event(crate::span::SpanEvent::new(42, "cache.miss").with_attribute("key", "user:7"));

        let encoded = JaegerUiEncoder::default().encode_span(&span);
        assert_eq!(encoded.logs.len(), 1);
        assert_eq!(encoded.logs[0].timestamp, 42);
        assert!(encoded.logs[0].fields.contains(&JaegerTag::string("key", "user:7")));
        assert!(encoded.logs[0].fields.contains(&JaegerTag::string(EVENT_KEY, "cache.miss")));
    }

    #[test]
    fn test_truncation_applies_to_span_tags() {
        let span = Span::new(1, 2, 0, "op", SpanKind::Internal).with_attribute("sql", "SELECT * FROM t");
        let encoded = JaegerUiEncoder::new(TagTransformer::new(Some(6))).encode_span(&span);
        assert_eq!(tag(&encoded, "sql"), Some(&TagValue::String("SELECT".into())));
    }

    #[test]
    fn test_document_shape() {
        let trees = TraceTreeBuilder::build(vec![
            Span::new(0x1f, 0x2, 0x1, "child", SpanKind::Internal).with_timing(20, 5),
            Span::new(0x1f, 0x1, 0, "root", SpanKind::Internal).with_timing(10, 30),
        ]);
        let bytes = JaegerUiEncoder::default().to_vec(&trees, &process()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let trace = &json["data"][0];
        assert_eq!(trace["traceID"], "1f");
        assert_eq!(trace["spans"][0]["spanID"], "1");
        assert_eq!(trace["spans"][0]["parentSpanId"], "0");
        assert_eq!(trace["spans"][1]["parentSpanId"], "1");
        assert_eq!(trace["spans"][1]["startTime"], 20);
        assert_eq!(trace["processes"]["1"]["serviceName"], "svc");
        assert!(trace["spans"][0]["references"].as_array().unwrap().is_empty());
        assert!(trace["spans"][0]["logs"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_empty_document() {
        let bytes = JaegerUiEncoder::default().to_vec(&[], &process()).unwrap();
        assert_eq!(bytes, br#"{"data":[]}"#);
    }
}
