//! Process identity derived from resource attributes.

use crate::span::{random_trace_id, AttributeValue};
use crate::tag::{JaegerTag, TagTransformer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_NAMESPACE: &str = "service.namespace";
pub const SERVICE_VERSION: &str = "service.version";
pub const SERVICE_INSTANCE_ID: &str = "service.instance.id";
pub const TELEMETRY_SDK_NAME: &str = "telemetry.sdk.name";
pub const TELEMETRY_SDK_LANGUAGE: &str = "telemetry.sdk.language";
pub const TELEMETRY_SDK_VERSION: &str = "telemetry.sdk.version";

/// Attributes describing the process that emits spans.
#[derive(Debug, Clone)]
pub struct Resource {
    attributes: Vec<(String, AttributeValue)>,
}

impl Resource {
    /// An empty resource, without even the SDK attributes.
    pub fn empty() -> Self {
        Self {
            attributes: Vec::new(),
        }
    }

    /// Adds `service.name`, `service.version` and a fresh `service.instance.id`.
    pub fn with_service(self, name: impl Into<String>, version: Option<&str>) -> Self {
        let mut resource = self.with_attribute(SERVICE_NAME, name.into());
        if let Some(version) = version {
            resource = resource.with_attribute(SERVICE_VERSION, version);
        }
        resource.with_attribute(SERVICE_INSTANCE_ID, format!("{:032x}", random_trace_id()))
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn attributes(&self) -> &[(String, AttributeValue)] {
        &self.attributes
    }

    /// Service name used when no `service.name` attribute is present.
    pub fn default_service_name() -> String {
        std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .map_or_else(
                || "unknown_service".to_string(),
                |exe| format!("unknown_service:{}", exe),
            )
    }
}

impl Default for Resource {
    /// The SDK resource: telemetry SDK attributes only.
    fn default() -> Self {
        Self::empty()
            .with_attribute(TELEMETRY_SDK_NAME, env!("CARGO_PKG_NAME"))
            .with_attribute(TELEMETRY_SDK_LANGUAGE, "rust")
            .with_attribute(TELEMETRY_SDK_VERSION, env!("CARGO_PKG_VERSION"))
    }
}

/// The exporting service's identity as written into `processes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    pub tags: Vec<JaegerTag>,
}

/// Resolves a [`Process`] from a [`Resource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessResolver {
    transformer: TagTransformer,
}

impl ProcessResolver {
    pub fn new(transformer: TagTransformer) -> Self {
        Self { transformer }
    }

    pub fn resolve(&self, resource: &Resource) -> Process {
        let mut service_name: Option<&str> = None;
        let mut service_namespace: Option<&str> = None;
        let mut tags: HashMap<&str, JaegerTag> = HashMap::new();

        for (key, value) in resource.attributes() {
            if let AttributeValue::String(s) = value {
                match key.as_str() {
                    SERVICE_NAME => {
                        service_name = Some(s);
                        continue;
                    }
                    SERVICE_NAMESPACE => {
                        service_namespace = Some(s);
                        continue;
                    }
                    _ => {}
                }
            }

            if let Some(tag) = self.transformer.transform(key, value) {
                tags.insert(key, tag);
            }
        }

        let service_name = match service_name.filter(|name| !name.trim().is_empty()) {
            Some(name) => match service_namespace.filter(|ns| !ns.is_empty()) {
                Some(namespace) => format!("{}.{}", namespace, name),
                None => name.to_string(),
            },
            None => {
                let fallback = Resource::default_service_name();
                tracing::warn!(service = %fallback, "resource has no service.name, using default");
                fallback
            }
        };

        let mut tags: Vec<JaegerTag> = tags.into_values().collect();
        tags.sort_by(|a, b| a.key.cmp(&b.key));

        Process { service_name, tags }
    }
}
