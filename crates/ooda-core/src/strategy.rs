//! Strategy cache: an expensive, generated plan that is only rebuilt when the
//! facts it was built from change.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::action::{action_id, ActionDraft, SubjectRefs};
use crate::config::Config;
use crate::error::{OodaError, Result};
use crate::paths;
use crate::store::{Store, STRATEGIES};
use crate::types::Priority;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// One step of a strategy's structured plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub action_type: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub subject: SubjectRefs,
    #[serde(default)]
    pub recommended_operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

/// What a strategist returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyBody {
    pub headline: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub plan: Vec<PlannedTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub agent_name: String,
    pub headline: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub plan: Vec<PlannedTask>,
    pub data_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Fingerprinting
// ---------------------------------------------------------------------------

/// Canonical form of `inputs`: `ignored_keys` dropped at every depth, object
/// keys sorted, arrays sorted by the canonical text of their elements.
pub fn normalize(inputs: &Value, ignored_keys: &[String]) -> Value {
    match inputs {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !ignored_keys.iter().any(|i| i == *k))
                .collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), normalize(&map[k], ignored_keys));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut normalized: Vec<(String, Value)> = items
                .iter()
                .map(|v| {
                    let n = normalize(v, ignored_keys);
                    (n.to_string(), n)
                })
                .collect();
            normalized.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(normalized.into_iter().map(|(_, v)| v).collect())
        }
        other => other.clone(),
    }
}

/// Hex SHA-256 of the canonical JSON text of an already-normalized value.
pub fn fingerprint(normalized: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Task derivation
// ---------------------------------------------------------------------------

/// Translate a strategy's plan into action drafts for its agent.
///
/// Pure and deterministic: plan order is kept, untitled tasks are skipped and
/// tasks that map to an already-emitted action id are dropped.
pub fn derived_tasks(strategy: &Strategy) -> Vec<ActionDraft> {
    let mut seen = HashSet::new();
    let mut drafts = Vec::new();
    for task in &strategy.plan {
        if task.title.trim().is_empty() {
            continue;
        }
        let id = action_id(&strategy.agent_name, &task.action_type, &task.subject);
        if !seen.insert(id.clone()) {
            continue;
        }
        drafts.push(ActionDraft {
            id: Some(id),
            action_type: task.action_type.clone(),
            priority: task.priority,
            title: task.title.trim().to_string(),
            description: task.description.clone(),
            recommended_operation: task.recommended_operation.clone(),
            subject: task.subject.clone(),
            expected_outcome: task.expected_outcome.clone(),
        });
    }
    drafts
}

// ---------------------------------------------------------------------------
// StrategyCache
// ---------------------------------------------------------------------------

pub struct StrategyCache {
    store: Arc<Store>,
    ignored_keys: Vec<String>,
    timeout: Duration,
}

impl StrategyCache {
    pub fn new(store: Arc<Store>, ignored_keys: Vec<String>, timeout: Duration) -> Self {
        Self {
            store,
            ignored_keys,
            timeout,
        }
    }

    pub fn from_config(store: Arc<Store>, config: &Config) -> Self {
        Self::new(
            store,
            config.strategy.ignored_keys.clone(),
            config.engine.strategist_timeout(),
        )
    }

    /// Return the cached strategy for `agent` when `inputs` fingerprint the
    /// same as the latest row; otherwise invoke `strategist` with the
    /// normalized inputs and persist what it returns.
    pub async fn ensure_strategy<F, Fut>(&self, agent: &str, inputs: &Value, strategist: F) -> Result<Strategy>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = anyhow::Result<StrategyBody>>,
    {
        paths::validate_agent(agent)?;
        let normalized = normalize(inputs, &self.ignored_keys);
        let fp = fingerprint(&normalized);

        let latest = self.latest_strategy(agent)?;
        if let Some(latest) = &latest {
            if latest.data_fingerprint == fp {
                info!(agent, fingerprint = %short(&fp), "strategy cache hit");
                return Ok(latest.clone());
            }
        }

        info!(agent, fingerprint = %short(&fp), "strategy cache miss, invoking strategist");
        let body = match tokio::time::timeout(self.timeout, strategist(normalized)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return Err(OodaError::collaborator("strategist", format!("{e:#}"))),
            Err(_) => {
                return Err(OodaError::collaborator(
                    "strategist",
                    format!("timed out after {}s", self.timeout.as_secs()),
                ))
            }
        };

        let strategy = Strategy {
            id: Uuid::new_v4(),
            agent_name: agent.to_string(),
            headline: body.headline,
            body: body.body,
            plan: body.plan,
            data_fingerprint: fp,
            created_at: next_created_at(latest.as_ref()),
        };
        self.store.append_log(
            STRATEGIES,
            agent,
            strategy.created_at,
            strategy.id,
            &strategy,
        )?;
        info!(
            agent,
            strategy_id = %strategy.id,
            tasks = strategy.plan.len(),
            "strategy stored"
        );
        Ok(strategy)
    }

    /// The authoritative strategy for `agent`, if one was ever generated.
    pub fn latest_strategy(&self, agent: &str) -> Result<Option<Strategy>> {
        self.store.last_log(STRATEGIES, agent)
    }

    /// Every strategy generated for `agent`, newest first.
    pub fn strategy_history(&self, agent: &str) -> Result<Vec<Strategy>> {
        let mut rows: Vec<Strategy> = self.store.scan_log(STRATEGIES, agent)?;
        rows.reverse();
        Ok(rows)
    }
}

/// Log keys order by millisecond, so a regeneration within the same
/// millisecond as the previous row is pushed past it.
fn next_created_at(latest: Option<&Strategy>) -> DateTime<Utc> {
    let now = Utc::now();
    match latest {
        Some(prev) if prev.created_at.timestamp_millis() >= now.timestamp_millis() => {
            prev.created_at + chrono::Duration::milliseconds(1)
        }
        _ => now,
    }
}

fn short(fp: &str) -> &str {
    &fp[..fp.len().min(12)]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
