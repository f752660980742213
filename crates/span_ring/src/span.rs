//! Span data model handed over by instrumentation.
//!
//! A [`Span`] is built by an instrumentation adapter, finished, and then moved
//! into the pipeline. From that point on nothing mutates it: the ring buffer
//! owns it until a flush hands it to the tree builder and encoder.
//!
//! All timestamps and durations are **microseconds**; start times are measured
//! from the Unix epoch. The Jaeger UI consumes the same unit, so the encoder
//! writes these values through untouched.

use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Trace flag bit marking a span as sampled.
pub const FLAG_SAMPLED: u8 = 0x01;

/// Represents a single finished distributed tracing span
#[derive(Debug, Clone)]
pub struct Span {
    /// Unique trace identifier (128-bit)
    pub trace_id: u128,
    /// Unique span identifier (64-bit)
    pub span_id: u64,
    /// Parent span identifier (0 if root span)
    pub parent_span_id: u64,
    /// Operation name
    pub name: String,
    /// Span kind
    pub kind: SpanKind,
    /// Trace flags (bit 0 = sampled)
    pub flags: u8,
    /// Span start time (Unix microseconds)
    pub start_time: u64,
    /// Span duration (microseconds)
    pub duration: u64,
    /// Span status
    pub status: SpanStatus,
    /// Optional status description, meaningful for `SpanStatus::Error`
    pub status_description: Option<String>,
    /// Span attributes, unique per key (boxed to keep Span size manageable)
    pub attributes: Box<HashMap<String, AttributeValue>>,
    /// Timestamped events, exported as Jaeger logs
    pub events: Vec<SpanEvent>,
    /// References to other spans
    pub references: Vec<SpanReference>,
}

/// Span execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanStatus {
    /// Span status unknown
    #[default]
    Unset,
    /// Span completed successfully
    Ok,
    /// Span completed with error
    Error,
}

impl SpanStatus {
    /// The `otel.status_code` tag value for this status.
    pub fn as_tag_value(self) -> &'static str {
        match self {
            Self::Unset => "UNSET",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }

    /// Parses an `otel.status_code` tag value (case-insensitive).
    pub fn from_tag_value(value: &str) -> Option<Self> {
        [Self::Unset, Self::Error, Self::Ok]
            .into_iter()
            .find(|status| status.as_tag_value().eq_ignore_ascii_case(value))
    }
}

/// Span kind according to OpenTelemetry specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    /// Internal operation span
    #[default]
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
    /// Producer span (messaging)
    Producer,
    /// Consumer span (messaging)
    Consumer,
}

impl SpanKind {
    /// Value of the `span.kind` tag, `None` for internal spans.
    pub fn as_tag_value(self) -> Option<&'static str> {
        match self {
            Self::Internal => None,
            Self::Server => Some("server"),
            Self::Client => Some("client"),
            Self::Producer => Some("producer"),
            Self::Consumer => Some("consumer"),
        }
    }
}

/// A timestamped event recorded during a span.
#[derive(Debug, Clone)]
pub struct SpanEvent {
    /// Unix microseconds
    pub timestamp: u64,
    pub name: String,
    pub attributes: HashMap<String, AttributeValue>,
}

impl SpanEvent {
    pub fn new(timestamp: u64, name: impl Into<String>) -> Self {
        Self {
            timestamp,
            name: name.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Relationship between a span and the span it references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    ChildOf,
    FollowsFrom,
}

impl ReferenceType {
    /// Jaeger `refType` name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChildOf => "CHILD_OF",
            Self::FollowsFrom => "FOLLOWS_FROM",
        }
    }
}

/// A reference from one span to another, possibly in a different trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanReference {
    pub ref_type: ReferenceType,
    pub trace_id: u128,
    pub span_id: u64,
}

/// Native attribute values supplied by instrumentation.
///
/// These are coerced into Jaeger tags by [`TagTransformer`](crate::TagTransformer).
#[derive(Debug, Clone)]
pub enum AttributeValue {
    String(String),
    Char(char),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
    Array(AttributeArray),
    /// Any other value; only its textual form is exported
    Display(DisplayValue),
}

/// Homogeneous attribute arrays.
#[derive(Debug, Clone)]
pub enum AttributeArray {
    Char(Vec<char>),
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    String(Vec<String>),
    Display(Vec<DisplayValue>),
}

/// An opaque value that can only be rendered as text.
///
/// Rendering goes through [`fmt::Display`], which is allowed to fail; a failed
/// rendering drops the tag that carries it.
#[derive(Clone)]
pub struct DisplayValue(Arc<dyn fmt::Display + Send + Sync>);

impl DisplayValue {
    pub fn new<T>(value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        Self(Arc::new(value))
    }

    /// Renders the value, returning `None` if its `Display` impl fails.
    pub fn render(&self) -> Option<String> {
        use std::fmt::Write;

        let mut out = String::new();
        write!(out, "{}", self.0).ok()?;
        Some(out)
    }
}

impl fmt::Debug for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Some(text) => f.debug_tuple("DisplayValue").field(&text).finish(),
            None => f.write_str("DisplayValue(<unrenderable>)"),
        }
    }
}

macro_rules! impl_from_attribute {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(value: $ty) -> Self {
                    AttributeValue::$variant(value $(as $cast)?)
                }
            }
        )*
    };
}

impl_from_attribute! {
    String => String,
    char => Char,
    bool => Bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u8 => Int as i64,
    u16 => Int as i64,
    u32 => Int as i64,
    u64 => UInt,
    f32 => Float as f64,
    f64 => Float,
    Vec<u8> => Bytes,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<AttributeArray> for AttributeValue {
    fn from(value: AttributeArray) -> Self {
        AttributeValue::Array(value)
    }
}

impl From<DisplayValue> for AttributeValue {
    fn from(value: DisplayValue) -> Self {
        AttributeValue::Display(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::Array(AttributeArray::String(value))
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        AttributeValue::Array(AttributeArray::Int(value))
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(value: Vec<f64>) -> Self {
        AttributeValue::Array(AttributeArray::Float(value))
    }
}

impl From<Vec<bool>> for AttributeValue {
    fn from(value: Vec<bool>) -> Self {
        AttributeValue::Array(AttributeArray::Bool(value))
    }
}

impl Span {
    /// Creates a new span starting now.
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        name: impl Into<String>,
        kind: SpanKind,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
            name: name.into(),
            kind,
            flags: FLAG_SAMPLED,
            start_time: now_micros(),
            duration: 0,
            status: SpanStatus::Unset,
            status_description: None,
            attributes: Box::default(),
            events: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Returns true if the span has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_span_id == 0
    }

    /// Overrides the recorded timing (both in microseconds).
    pub fn with_timing(mut self, start_time: u64, duration: u64) -> Self {
        self.start_time = start_time;
        self.duration = duration;
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Adds an attribute to the span. A later write to the same key wins.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Adds an attribute when a value is present; `None` records nothing.
    pub fn set_optional_attribute<V: Into<AttributeValue>>(
        &mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) {
        if let Some(value) = value {
            self.set_attribute(key, value);
        }
    }

    pub fn add_event(&mut self, event: SpanEvent) {
        self.events.push(event);
    }

    pub fn add_reference(&mut self, ref_type: ReferenceType, trace_id: u128, span_id: u64) {
        self.references.push(SpanReference {
            ref_type,
            trace_id,
            span_id,
        });
    }

    /// Marks the span as completed with the given status, fixing its duration.
    pub fn finish(&mut self, status: SpanStatus) {
        self.duration = now_micros().saturating_sub(self.start_time);
        self.status = status;
    }

    /// Marks the span as failed with a description.
    pub fn finish_with_error(&mut self, description: impl Into<String>) {
        self.finish(SpanStatus::Error);
        self.status_description = Some(description.into());
    }

    /// Low 64 bits of the trace id, as used by the Jaeger UI.
    pub fn trace_id_low(&self) -> u64 {
        self.trace_id as u64
    }
}

/// Batch of spans handed to an exporter
#[derive(Debug)]
pub struct SpanBatch {
    /// All spans in this batch
    pub spans: Vec<Span>,
    /// Batch creation timestamp
    pub timestamp: SystemTime,
}

impl SpanBatch {
    /// Creates a batch with the given spans
    pub fn with_spans(spans: Vec<Span>) -> Self {
        Self {
            spans,
            timestamp: SystemTime::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Current wall-clock time in Unix microseconds.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Generates a random non-zero trace id.
pub fn random_trace_id() -> u128 {
    let mut rng = rand::thread_rng();
    loop {
        let id: u128 = rng.gen();
        if id != 0 {
            return id;
        }
    }
}

/// Generates a random non-zero span id.
pub fn random_span_id() -> u64 {
    let mut rng = rand::thread_rng();
    loop {
        let id: u64 = rng.gen();
        if id != 0 {
            return id;
        }
    }
}
