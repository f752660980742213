//! Pipeline configuration.
//!
//! Values come from code (builders), from any serde format, or from the
//! environment:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `SPAN_RING_DESTINATION` | `memory` or `exporter` | `memory` |
//! | `SPAN_RING_BUFFER_LENGTH` | ring capacity, at least 1 | `100` |
//! | `SPAN_RING_MAX_TAG_LENGTH` | tag value truncation length | unset |

use crate::error::ConfigError;
use crate::tag::TagTransformer;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ENV_DESTINATION: &str = "SPAN_RING_DESTINATION";
pub const ENV_BUFFER_LENGTH: &str = "SPAN_RING_BUFFER_LENGTH";
pub const ENV_MAX_TAG_LENGTH: &str = "SPAN_RING_MAX_TAG_LENGTH";

pub const DEFAULT_RING_BUFFER_LENGTH: usize = 100;

/// Where recorded spans go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// Keep the most recent spans in the pipeline's ring buffer
    #[default]
    #[serde(rename = "memory")]
    InMemory,
    /// Hand spans to an exporter
    Exporter,
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Ok(Self::InMemory),
            "exporter" | "otlp" => Ok(Self::Exporter),
            _ => Err("expected `memory` or `exporter`".to_string()),
        }
    }
}

/// Configuration for a [`TracingPipeline`](crate::TracingPipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture destination.
    ///
    /// Default: in memory
    pub destination: Destination,

    /// Number of spans the in-memory window holds before overwriting.
    ///
    /// Default: 100
    pub ring_buffer_length: usize,

    /// Maximum length, in characters, of string tag values.
    ///
    /// Default: no limit
    pub max_tag_value_length: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            destination: Destination::InMemory,
            ring_buffer_length: DEFAULT_RING_BUFFER_LENGTH,
            max_tag_value_length: None,
        }
    }
}

impl PipelineConfig {
    /// Sets the capture destination.
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Sets the ring buffer length.
    pub fn with_ring_buffer_length(mut self, length: usize) -> Self {
        self.ring_buffer_length = length;
        self
    }

    /// Sets the tag value truncation length.
    pub fn with_max_tag_value_length(mut self, length: usize) -> Self {
        self.max_tag_value_length = Some(length);
        self
    }

    /// Transformer honoring the configured truncation length.
    pub fn tag_transformer(&self) -> TagTransformer {
        TagTransformer::new(self.max_tag_value_length)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_buffer_length == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Loads the configuration from `SPAN_RING_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, starting from defaults.
    ///
    /// Unset and empty variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = non_empty(lookup(ENV_DESTINATION)) {
            config.destination = parse(ENV_DESTINATION, &value)?;
        }
        if let Some(value) = non_empty(lookup(ENV_BUFFER_LENGTH)) {
            config.ring_buffer_length = parse(ENV_BUFFER_LENGTH, &value)?;
        }
        if let Some(value) = non_empty(lookup(ENV_MAX_TAG_LENGTH)) {
            config.max_tag_value_length = Some(parse(ENV_MAX_TAG_LENGTH, &value)?);
        }

        config.validate()?;
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.destination, Destination::InMemory);
        assert_eq!(config.ring_buffer_length, 100);
        assert_eq!(config.max_tag_value_length, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::default()
            .with_destination(Destination::Exporter)
            .with_ring_buffer_length(8)
            .with_max_tag_value_length(64);
        assert_eq!(config.destination, Destination::Exporter);
        assert_eq!(config.ring_buffer_length, 8);
        assert_eq!(config.tag_transformer().max_value_length(), Some(64));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = PipelineConfig::default().with_ring_buffer_length(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
    }

    #[test]
    fn test_from_lookup() {
        let config = PipelineConfig::from_lookup(lookup(&[
            (ENV_DESTINATION, "Exporter"),
            (ENV_BUFFER_LENGTH, " 250 "),
            (ENV_MAX_TAG_LENGTH, "32"),
        ]))
        .unwrap();
        assert_eq!(config.destination, Destination::Exporter);
        assert_eq!(config.ring_buffer_length, 250);
        assert_eq!(config.max_tag_value_length, Some(32));
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[(ENV_BUFFER_LENGTH, "")])).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_BUFFER_LENGTH, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_BUFFER_LENGTH));

        let err = PipelineConfig::from_lookup(lookup(&[(ENV_DESTINATION, "kafka")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref value, .. } if value == "kafka"));

        let err = PipelineConfig::from_lookup(lookup(&[(ENV_BUFFER_LENGTH, "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroCapacity);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"destination":"exporter","max_tag_value_length":10}"#).unwrap();
        assert_eq!(config.destination, Destination::Exporter);
        assert_eq!(config.ring_buffer_length, DEFAULT_RING_BUFFER_LENGTH);
        assert_eq!(config.max_tag_value_length, Some(10));
    }
}
