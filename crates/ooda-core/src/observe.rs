//! Helpers for writing Observe and Orient collaborators.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Source fan-out
// ---------------------------------------------------------------------------

pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;

/// Fetch every named source concurrently and collect the results into one
/// observation bundle.
///
/// A source that fails or exceeds `per_source_timeout` is recorded as
/// `{"status": "error", "message": ...}` under its name; it does not fail
/// the bundle.
pub async fn gather_sources(sources: Vec<(String, SourceFuture<'_>)>, per_source_timeout: Duration) -> Value {
    let fetches = sources.into_iter().map(|(name, fut)| async move {
        let value = match tokio::time::timeout(per_source_timeout, fut).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                let message = format!("{e:#}");
                warn!(source = %name, error = %message, "observation source failed");
                json!({"status": "error", "message": message})
            }
            Err(_) => {
                let message = format!("timed out after {}s", per_source_timeout.as_secs_f64());
                warn!(source = %name, "observation source timed out");
                json!({"status": "error", "message": message})
            }
        };
        (name, value)
    });

    let mut bundle = Map::new();
    for (name, value) in join_all(fetches).await {
        bundle.insert(name, value);
    }
    Value::Object(bundle)
}

/// Names of the sources in `bundle` that reported an error.
pub fn failed_sources(bundle: &Value) -> Vec<String> {
    bundle
        .as_object()
        .map(|m| {
            m.iter()
                .filter(|(_, v)| v.get("status").and_then(Value::as_str) == Some("error"))
                .map(|(k, _)| k.clone())
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// The conventional shape of an Orient result. Advisory only: the engine
/// stores whatever JSON it is handed, and agents may add their own keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub insights_count: u64,
    #[serde(default)]
    pub patterns: Vec<Value>,
    #[serde(default)]
    pub anomalies: Vec<Value>,
    #[serde(default)]
    pub trends: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Analysis {
    pub fn add_pattern(&mut self, pattern_type: &str, data: Value) {
        self.patterns.push(tagged(json!({"type": pattern_type}), data));
        self.insights_count += 1;
    }

    pub fn add_anomaly(&mut self, anomaly_type: &str, severity: &str, data: Value) {
        self.anomalies
            .push(tagged(json!({"type": anomaly_type, "severity": severity}), data));
        self.insights_count += 1;
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Read the conventional fields out of an arbitrary analysis document;
    /// anything missing defaults to empty.
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(a) => a,
            Err(_) => Self {
                insights_count: value
                    .get("insights_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                patterns: array_at(value, "patterns"),
                anomalies: array_at(value, "anomalies"),
                ..Self::default()
            },
        }
    }
}

fn tagged(head: Value, data: Value) -> Value {
    let mut out = head;
    if let (Some(out_map), Value::Object(extra)) = (out.as_object_mut(), data) {
        for (k, v) in extra {
            out_map.entry(k).or_insert(v);
        }
    }
    out
}

fn array_at(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
