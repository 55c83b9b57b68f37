//! Shared types for logbridge
//!
//! This crate contains data structures used across multiple logbridge crates.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Filter Types
// ============================================================================

/// Flat, normalized view of a filter query
///
/// Each list behaves as an insertion-ordered set. When `free_text` is non-empty
/// the structured lists are ignored by every consumer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    /// Container name terms
    pub containers: Vec<String>,

    /// Pod name terms
    pub pods: Vec<String>,

    /// File name terms
    pub files: Vec<String>,

    /// Unstructured text used for a literal search
    pub free_text: String,
}

impl Filter {
    /// Create a filter that searches for the given literal text
    pub fn free_text(text: impl Into<String>) -> Self {
        Self {
            free_text: text.into(),
            ..Default::default()
        }
    }

    /// Add a pod term unless it is already present
    pub fn add_pod(&mut self, pod: impl Into<String>) {
        push_unique(&mut self.pods, pod.into());
    }

    /// Add a container term unless it is already present
    pub fn add_container(&mut self, container: impl Into<String>) {
        push_unique(&mut self.containers, container.into());
    }

    /// Add a file term unless it is already present
    pub fn add_file(&mut self, file: impl Into<String>) {
        push_unique(&mut self.files, file.into());
    }

    /// Check if the filter has free text set
    pub fn has_free_text(&self) -> bool {
        !self.free_text.trim().is_empty()
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        !self.has_free_text()
            && self.containers.is_empty()
            && self.pods.is_empty()
            && self.files.is_empty()
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

// ============================================================================
// Query Types
// ============================================================================

/// Where the log store starts reading a query result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Count from the newest record
    #[default]
    Tail,
    /// Count from the oldest record
    Head,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tail => "tail",
            Self::Head => "head",
        }
    }
}

impl std::str::FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tail" => Ok(Self::Tail),
            "head" => Ok(Self::Head),
            other => Err(format!("unknown position '{}', expected 'tail' or 'head'", other)),
        }
    }
}

/// A compiled query ready to be sent to the log store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Structured query string
    pub query: String,

    /// Read position
    #[serde(rename = "pos")]
    pub position: Position,

    /// Record offset relative to the position
    pub offset: i64,

    /// Maximum number of records
    pub limit: i64,
}

// ============================================================================
// Log Types
// ============================================================================

/// A single log record returned by the log store
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Unix timestamp in nanoseconds
    pub timestamp: u64,

    /// Log message
    pub message: String,

    /// Store tags of the record
    pub tags: String,

    /// Store fields of the record
    pub fields: String,
}

impl LogEvent {
    pub fn new(timestamp: u64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Timestamp as a UTC date
    pub fn time(&self) -> DateTime<Utc> {
        let nanos = i64::try_from(self.timestamp).unwrap_or(i64::MAX);
        Utc.timestamp_nanos(nanos)
    }

    /// Render the event as a single export line (`{"ts":..,"tags":..,"fields":..,"msg":..}`)
    pub fn export_line(&self) -> String {
        let line = ExportLine {
            ts: self.time().to_rfc3339_opts(SecondsFormat::AutoSi, true),
            tags: &self.tags,
            fields: &self.fields,
            msg: &self.message,
        };
        serde_json::to_string(&line).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct ExportLine<'a> {
    ts: String,
    tags: &'a str,
    fields: &'a str,
    msg: &'a str,
}

/// Envelope wrapping every message sent to stream consumers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: String,
}

impl Envelope {
    /// Wrap a log payload in a `data` envelope
    pub fn data(payload: impl Into<String>) -> Self {
        Self {
            kind: "data".to_string(),
            payload: payload.into(),
        }
    }
}

// ============================================================================
// Forwarder Types
// ============================================================================

/// Forwarder entry as stored in the cluster's forwarder ConfigMap (YAML)
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ClusterForwarder {
    #[serde(default)]
    pub metadata: ForwarderMetadata,
    #[serde(default)]
    pub spec: ForwarderSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ForwarderMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ForwarderSpec {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Log store forwarder document (the JSON kept under the forwarder key)
///
/// Fields this crate does not interpret are preserved verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForwarderDocument {
    #[serde(default)]
    pub forwarder: ForwarderConfig,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForwarderConfig {
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single forwarding worker
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkerConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SinkConfig {
    #[serde(default)]
    pub params: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_terms_are_deduplicated_in_order() {
        let mut filter = Filter::default();
        filter.add_pod("b");
        filter.add_pod("a");
        filter.add_pod("b");
        assert_eq!(filter.pods, vec!["b", "a"]);
        assert!(!filter.is_empty());
    }

    #[test]
    fn test_blank_free_text_is_empty() {
        assert!(Filter::free_text("   ").is_empty());
        assert!(!Filter::free_text("boom").is_empty());
    }

    #[test]
    fn test_envelope_json_shape() {
        let json = serde_json::to_string(&Envelope::data("hello")).unwrap();
        assert_eq!(json, r#"{"type":"data","payload":"hello"}"#);
    }

    #[test]
    fn test_export_line() {
        // 2019-01-01T01:01:01Z + 1ns
        let event = LogEvent {
            timestamp: 1_546_304_461_000_000_001,
            message: "hello\n".to_string(),
            tags: String::new(),
            fields: "f1=v1,f2=v2".to_string(),
        };
        assert_eq!(
            event.export_line(),
            r#"{"ts":"2019-01-01T01:01:01.000000001Z","tags":"","fields":"f1=v1,f2=v2","msg":"hello\n"}"#
        );
    }

    #[test]
    fn test_forwarder_document_keeps_unknown_fields() {
        let raw = r#"{"Forwarder":{"Workers":[{"Name":"w1","Sink":{"Type":"syslog","Params":{"RemoteAddr":"a:1"}}}],"SyncWorkersIntervalSec":20},"Transport":{"ListenAddr":"x"}}"#;
        let doc: ForwarderDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.forwarder.workers[0].name, "w1");
        assert_eq!(doc.forwarder.workers[0].sink.extra["Type"], "syslog");
        assert!(doc.extra.contains_key("Transport"));

        let back: Value = serde_json::to_value(&doc).unwrap();
        let original: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(back, original);
    }
}
