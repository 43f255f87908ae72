//! Runs the automatic half of a cycle: start, Observe, Orient, Decide.
//!
//! Act and Reflect are not driven from here. Execution is triggered later by
//! a human or an executor, possibly from another process, and feeds back
//! through `CycleEngine::record_action` and `ActionStore::update_action_status`.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::action::{Action, ActionDraft, ActionStore};
use crate::config::EngineConfig;
use crate::cycle::{Cycle, CycleEngine};
use crate::error::{OodaError, Result};
use crate::observe::Analysis;
use crate::types::Priority;

// ---------------------------------------------------------------------------
// PhaseTimeouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PhaseTimeouts {
    pub observe: Duration,
    pub orient: Duration,
    pub decide: Duration,
}

impl PhaseTimeouts {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            observe: Duration::from_secs(cfg.observe_timeout_secs),
            orient: Duration::from_secs(cfg.orient_timeout_secs),
            decide: Duration::from_secs(cfg.decide_timeout_secs),
        }
    }
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// CycleRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub total_actions: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub insights_discovered: u64,
    pub patterns_found: usize,
    pub anomalies_detected: usize,
}

impl CycleSummary {
    fn build(actions: &[Action], analysis: &Value) -> Self {
        let count = |p: Priority| actions.iter().filter(|a| a.priority == p).count();
        let analysis = Analysis::from_value(analysis);
        Self {
            total_actions: actions.len(),
            critical: count(Priority::Critical),
            high: count(Priority::High),
            medium: count(Priority::Medium),
            low: count(Priority::Low),
            insights_discovered: analysis.insights_count,
            patterns_found: analysis.patterns.len(),
            anomalies_detected: analysis.anomalies.len(),
        }
    }
}

/// Result of [`run_cycle`]: the cycle (now `acting`), counts, and the
/// persisted actions in the order Decide proposed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRun {
    pub cycle: Cycle,
    pub summary: CycleSummary,
    pub actions: Vec<Action>,
}

// ---------------------------------------------------------------------------
// run_cycle
// ---------------------------------------------------------------------------

/// Start a cycle for `agent` and drive it through Observe, Orient and Decide.
///
/// Each collaborator runs under its own timeout. A collaborator error or
/// timeout fails the cycle with the message and returns
/// `CollaboratorFailure`; nothing is retried.
pub async fn run_cycle<O, OFut, R, RFut, D, DFut>(
    engine: &CycleEngine,
    actions: &ActionStore,
    agent: &str,
    timeouts: &PhaseTimeouts,
    observe_fn: O,
    orient_fn: R,
    decide_fn: D,
) -> Result<CycleRun>
where
    O: FnOnce() -> OFut,
    OFut: Future<Output = anyhow::Result<Value>>,
    R: FnOnce(Value) -> RFut,
    RFut: Future<Output = anyhow::Result<Value>>,
    D: FnOnce(Value, Value) -> DFut,
    DFut: Future<Output = anyhow::Result<Vec<ActionDraft>>>,
{
    let cycle = engine.start_cycle(agent)?;
    let id = cycle.id;

    let observations = call_phase(engine, id, "observe", timeouts.observe, observe_fn()).await?;
    if let Err(e) = engine.observe(id, observations.clone()) {
        fail_quietly(engine, id, &format!("observe: {e}"));
        return Err(e);
    }

    let analysis = call_phase(engine, id, "orient", timeouts.orient, orient_fn(observations.clone())).await?;
    if let Err(e) = engine.orient(id, analysis.clone()) {
        fail_quietly(engine, id, &format!("orient: {e}"));
        return Err(e);
    }

    let drafts = call_phase(
        engine,
        id,
        "decide",
        timeouts.decide,
        decide_fn(analysis.clone(), observations),
    )
    .await?;

    let cycle = match engine.decide_actions(id, drafts) {
        Ok(cycle) => cycle,
        Err(e) => {
            fail_quietly(engine, id, &format!("decide produced unusable actions: {e}"));
            return Err(e);
        }
    };
    let saved = cycle
        .decisions
        .iter()
        .map(|action_id| actions.get_action(action_id))
        .collect::<Result<Vec<_>>>()?;

    let summary = CycleSummary::build(&saved, &analysis);
    info!(
        agent,
        cycle_number = cycle.cycle_number,
        total_actions = summary.total_actions,
        critical = summary.critical,
        "cycle decided"
    );
    Ok(CycleRun {
        cycle,
        summary,
        actions: saved,
    })
}

async fn call_phase<T>(
    engine: &CycleEngine,
    id: Uuid,
    phase: &'static str,
    limit: Duration,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T> {
    let message = match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => format!("{e:#}"),
        Err(_) => format!("timed out after {}s", limit.as_secs_f64()),
    };
    fail_quietly(engine, id, &format!("{phase}: {message}"));
    Err(OodaError::collaborator(phase, message))
}

fn fail_quietly(engine: &CycleEngine, id: Uuid, message: &str) {
    if let Err(e) = engine.fail_cycle(id, message) {
        warn!(cycle_id = %id, error = %e, "could not mark cycle failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
