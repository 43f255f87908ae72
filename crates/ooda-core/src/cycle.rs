//! The persisted OODA cycle and the engine that advances it.
//!
//! Every phase call is a short, independent unit against the shared store:
//! it loads the cycle, checks the transition, mutates and writes back inside
//! one redb write transaction. Nothing is held in memory between calls, so
//! `decide` may run in a nightly batch and `record_action` days later from a
//! different process.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::action::{self, ActionDraft};
use crate::error::{db_err, OodaError, Result};
use crate::paths;
use crate::store::{self, Store, CYCLES, CYCLE_SEQ, LEARNINGS};
use crate::types::CycleStatus;

// ---------------------------------------------------------------------------
// PhaseTransition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub status: CycleStatus,
    pub entered: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ActionRecord
// ---------------------------------------------------------------------------

/// One entry of a cycle's append-only `actions_taken` log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub result: Value,
    pub executed_at: DateTime<Utc>,
    /// Recorded after the cycle had already completed or failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub after_close: bool,
    /// The action id is not among the cycle's decisions.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unplanned: bool,
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub id: Uuid,
    pub agent_name: String,
    pub cycle_number: u64,
    pub status: CycleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phase_history: Vec<PhaseTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    /// Ids of the actions chosen in the decide phase. Payloads live in the
    /// action store.
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub actions_taken: Vec<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Cycle {
    pub fn new(agent_name: impl Into<String>, cycle_number: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_name: agent_name.into(),
            cycle_number,
            status: CycleStatus::Observing,
            created_at: now,
            updated_at: now,
            completed_at: None,
            phase_history: vec![PhaseTransition {
                status: CycleStatus::Observing,
                entered: now,
                exited: None,
            }],
            observations: None,
            analysis: None,
            decisions: Vec::new(),
            actions_taken: Vec::new(),
            reflection: None,
            error_message: None,
        }
    }

    // ---------------------------------------------------------------------------
    // Phase transitions
    // ---------------------------------------------------------------------------

    /// Check that the cycle is in `from` and may move to its forward successor.
    pub fn can_advance_from(&self, from: CycleStatus) -> Result<CycleStatus> {
        let target = from.next().ok_or_else(|| OodaError::InvalidTransition {
            from: from.to_string(),
            to: "-".to_string(),
            reason: format!("'{from}' has no successor"),
        })?;

        if self.status.is_terminal() {
            return Err(OodaError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: format!("cycle #{} is {} and immutable", self.cycle_number, self.status),
            });
        }

        if self.status != from {
            return Err(OodaError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: format!("expected cycle to be '{from}'"),
            });
        }

        Ok(target)
    }

    /// Move from `from` to its successor, closing the current phase entry.
    pub fn advance(&mut self, from: CycleStatus) -> Result<CycleStatus> {
        let target = self.can_advance_from(from)?;
        self.enter(target);
        Ok(target)
    }

    /// Escape to `Failed` from any non-terminal status.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(OodaError::InvalidTransition {
                from: self.status.to_string(),
                to: CycleStatus::Failed.to_string(),
                reason: format!("cycle #{} is {} and immutable", self.cycle_number, self.status),
            });
        }
        self.error_message = Some(message.into());
        self.enter(CycleStatus::Failed);
        Ok(())
    }

    fn enter(&mut self, target: CycleStatus) {
        let now = Utc::now();
        if let Some(last) = self.phase_history.last_mut() {
            last.exited = Some(now);
        }
        self.status = target;
        self.updated_at = now;
        if target.is_terminal() {
            self.completed_at = Some(now);
        } else {
            self.phase_history.push(PhaseTransition {
                status: target,
                entered: now,
                exited: None,
            });
        }
    }

    /// When the cycle entered `status`, if it ever did.
    pub fn entered_at(&self, status: CycleStatus) -> Option<DateTime<Utc>> {
        self.phase_history
            .iter()
            .find(|p| p.status == status)
            .map(|p| p.entered)
    }

    /// Append to `actions_taken`. Does not change status.
    ///
    /// Legal from `Acting` onwards. Records on a completed or failed cycle
    /// are accepted and flagged `after_close` for audit.
    pub fn push_action_record(&mut self, action_id: &str, data: Value, result: Value) -> Result<ActionRecord> {
        if self.status < CycleStatus::Acting {
            return Err(OodaError::InvalidTransition {
                from: self.status.to_string(),
                to: self.status.to_string(),
                reason: "actions can only be recorded once the cycle has decided".to_string(),
            });
        }
        let now = Utc::now();
        let record = ActionRecord {
            action_id: action_id.to_string(),
            data,
            result,
            executed_at: now,
            after_close: self.status.is_terminal(),
            unplanned: !self.decisions.iter().any(|d| d == action_id),
        };
        self.actions_taken.push(record.clone());
        self.updated_at = now;
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Learnings
// ---------------------------------------------------------------------------

fn default_learning_type() -> String {
    "insight".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

/// A learning supplied to `reflect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningDraft {
    #[serde(rename = "type", default = "default_learning_type")]
    pub learning_type: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub action_taken: Option<String>,
    #[serde(default)]
    pub expected_outcome: Option<Value>,
    #[serde(default)]
    pub actual_outcome: Option<Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl LearningDraft {
    pub fn insight(context: Value) -> Self {
        Self {
            learning_type: default_learning_type(),
            context,
            action_taken: None,
            expected_outcome: None,
            actual_outcome: None,
            confidence: default_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: Uuid,
    pub agent_name: String,
    pub cycle_id: Uuid,
    pub learning_type: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub action_taken: Option<String>,
    #[serde(default)]
    pub expected_outcome: Option<Value>,
    #[serde(default)]
    pub actual_outcome: Option<Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AgentStats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_name: String,
    pub total_cycles: usize,
    pub completed_cycles: usize,
    pub failed_cycles: usize,
    /// Completed cycles as a percentage of all cycles, one decimal place.
    pub success_rate: f64,
    pub total_learnings: usize,
    pub learning_breakdown: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// CycleEngine
// ---------------------------------------------------------------------------

pub struct CycleEngine {
    store: Arc<Store>,
}

impl CycleEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Allocate the next cycle number for `agent` and persist a new cycle in
    /// `Observing`.
    ///
    /// The sequence read, increment and cycle insert share one write
    /// transaction, so concurrent starts against the same store cannot hand
    /// out the same number.
    pub fn start_cycle(&self, agent: &str) -> Result<Cycle> {
        paths::validate_agent(agent)?;
        let cycle = self.store.write(|wt| {
            let mut seq = wt.open_table(CYCLE_SEQ).map_err(db_err)?;
            let last = seq.get(agent).map_err(db_err)?.map(|g| g.value()).unwrap_or(0);
            let cycle = Cycle::new(agent, last + 1);
            seq.insert(agent, cycle.cycle_number).map_err(db_err)?;

            let bytes = store::encode(&cycle)?;
            let mut cycles = wt.open_table(CYCLES).map_err(db_err)?;
            cycles
                .insert(cycle.id.to_string().as_str(), bytes.as_slice())
                .map_err(db_err)?;
            Ok(cycle)
        })?;

        info!(
            agent = %cycle.agent_name,
            cycle_number = cycle.cycle_number,
            cycle_id = %cycle.id,
            "cycle started"
        );
        Ok(cycle)
    }

    /// Store the observation bundle; `Observing → Orienting`.
    pub fn observe(&self, id: Uuid, observations: Value) -> Result<Cycle> {
        let sources = observations.as_object().map(|o| o.len()).unwrap_or(0);
        let cycle = self.mutate(id, |c| {
            c.advance(CycleStatus::Observing)?;
            c.observations = Some(observations);
            Ok(())
        })?;
        info!(
            agent = %cycle.agent_name,
            cycle_number = cycle.cycle_number,
            sources,
            "observe complete"
        );
        Ok(cycle)
    }

    /// Store the analysis; `Orienting → Deciding`.
    pub fn orient(&self, id: Uuid, analysis: Value) -> Result<Cycle> {
        let cycle = self.mutate(id, |c| {
            c.advance(CycleStatus::Orienting)?;
            c.analysis = Some(analysis);
            Ok(())
        })?;
        let insights = cycle
            .analysis
            .as_ref()
            .and_then(|a| a.get("insights_count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        info!(
            agent = %cycle.agent_name,
            cycle_number = cycle.cycle_number,
            insights,
            "orient complete"
        );
        Ok(cycle)
    }

    /// Store references to the chosen actions; `Deciding → Acting`.
    pub fn decide(&self, id: Uuid, action_ids: Vec<String>) -> Result<Cycle> {
        let cycle = self.mutate(id, |c| {
            c.advance(CycleStatus::Deciding)?;
            c.decisions = action_ids;
            Ok(())
        })?;
        info!(
            agent = %cycle.agent_name,
            cycle_number = cycle.cycle_number,
            actions = cycle.decisions.len(),
            "decide complete"
        );
        Ok(cycle)
    }

    /// Save action drafts and record them as the cycle's decisions in one
    /// transaction; `Deciding → Acting`. An out-of-order call or an invalid
    /// draft aborts the whole write, so no action rows are left behind.
    pub fn decide_actions(&self, id: Uuid, drafts: Vec<ActionDraft>) -> Result<Cycle> {
        let key = id.to_string();
        let (cycle, created, refreshed) = self.store.write(|wt| {
            let mut cycles = wt.open_table(CYCLES).map_err(db_err)?;
            let bytes = cycles
                .get(key.as_str())
                .map_err(db_err)?
                .map(|g| g.value().to_vec())
                .ok_or_else(|| OodaError::CycleNotFound(key.clone()))?;
            let mut cycle: Cycle = store::decode(&bytes)?;
            cycle.advance(CycleStatus::Deciding)?;

            let batch = action::prepare_batch(&cycle.agent_name, Some(cycle.id), drafts)?;
            let (created, refreshed) = action::upsert_batch(wt, &batch)?;
            cycle.decisions = batch.into_iter().map(|a| a.id).collect();

            let encoded = store::encode(&cycle)?;
            cycles
                .insert(key.as_str(), encoded.as_slice())
                .map_err(db_err)?;
            Ok((cycle, created, refreshed))
        })?;
        info!(
            agent = %cycle.agent_name,
            cycle_number = cycle.cycle_number,
            actions = cycle.decisions.len(),
            created,
            refreshed,
            "decide complete"
        );
        Ok(cycle)
    }

    /// Append an executed action to the cycle's log without changing status.
    pub fn record_action(&self, id: Uuid, action_id: &str, data: Value, result: Value) -> Result<Cycle> {
        let mut flags = (false, false);
        let cycle = self.mutate(id, |c| {
            let rec = c.push_action_record(action_id, data, result)?;
            flags = (rec.after_close, rec.unplanned);
            Ok(())
        })?;
        let (after_close, unplanned) = flags;
        if after_close {
            warn!(
                agent = %cycle.agent_name,
                cycle_number = cycle.cycle_number,
                action_id,
                status = %cycle.status,
                "action recorded after cycle closed"
            );
        } else if unplanned {
            warn!(
                agent = %cycle.agent_name,
                cycle_number = cycle.cycle_number,
                action_id,
                "recorded action was not among the cycle's decisions"
            );
        } else {
            info!(
                agent = %cycle.agent_name,
                cycle_number = cycle.cycle_number,
                action_id,
                "action recorded"
            );
        }
        Ok(cycle)
    }

    /// Best-effort `record_action` for executors: the external side effect
    /// has already happened, so a store failure is logged and swallowed.
    pub fn try_record_action(&self, id: Uuid, action_id: &str, data: Value, result: Value) -> bool {
        match self.record_action(id, action_id, data, result) {
            Ok(_) => true,
            Err(e) => {
                warn!(cycle_id = %id, action_id, error = %e, "failed to record action");
                false
            }
        }
    }

    /// `Acting → Reflecting`.
    pub fn complete_act_phase(&self, id: Uuid) -> Result<Cycle> {
        let cycle = self.mutate(id, |c| {
            c.advance(CycleStatus::Acting)?;
            Ok(())
        })?;
        info!(
            agent = %cycle.agent_name,
            cycle_number = cycle.cycle_number,
            actions_taken = cycle.actions_taken.len(),
            "act phase complete"
        );
        Ok(cycle)
    }

    /// Store the reflection and learnings; `Reflecting → Completed`.
    ///
    /// The transition and every learning row commit together.
    pub fn reflect(&self, id: Uuid, reflection: Value, learnings: Vec<LearningDraft>) -> Result<Cycle> {
        let key = id.to_string();
        let count = learnings.len();
        let cycle = self.store.write(|wt| {
            let mut cycles = wt.open_table(CYCLES).map_err(db_err)?;
            let bytes = cycles
                .get(key.as_str())
                .map_err(db_err)?
                .map(|g| g.value().to_vec())
                .ok_or_else(|| OodaError::CycleNotFound(key.clone()))?;
            let mut cycle: Cycle = store::decode(&bytes)?;
            cycle.advance(CycleStatus::Reflecting)?;
            cycle.reflection = Some(reflection);
            let encoded = store::encode(&cycle)?;
            cycles
                .insert(key.as_str(), encoded.as_slice())
                .map_err(db_err)?;

            let mut table = wt.open_table(LEARNINGS).map_err(db_err)?;
            let now = Utc::now();
            for draft in learnings {
                let learning = Learning {
                    id: Uuid::new_v4(),
                    agent_name: cycle.agent_name.clone(),
                    cycle_id: cycle.id,
                    learning_type: draft.learning_type,
                    context: draft.context,
                    action_taken: draft.action_taken,
                    expected_outcome: draft.expected_outcome,
                    actual_outcome: draft.actual_outcome,
                    confidence: draft.confidence,
                    created_at: now,
                };
                let lkey = store::log_key(&cycle.agent_name, now, learning.id);
                let lbytes = store::encode(&learning)?;
                table
                    .insert(lkey.as_slice(), lbytes.as_slice())
                    .map_err(db_err)?;
            }
            Ok(cycle)
        })?;
        info!(
            agent = %cycle.agent_name,
            cycle_number = cycle.cycle_number,
            learnings = count,
            "cycle complete"
        );
        Ok(cycle)
    }

    /// Any non-terminal status → `Failed`.
    pub fn fail_cycle(&self, id: Uuid, message: &str) -> Result<Cycle> {
        let cycle = self.mutate(id, |c| c.fail(message))?;
        error!(
            agent = %cycle.agent_name,
            cycle_number = cycle.cycle_number,
            cycle_id = %cycle.id,
            error = message,
            "cycle failed"
        );
        Ok(cycle)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_cycle(&self, id: Uuid) -> Result<Cycle> {
        self.store
            .get_json(CYCLES, &id.to_string())?
            .ok_or_else(|| OodaError::CycleNotFound(id.to_string()))
    }

    /// Cycles newest-first, optionally for one agent.
    pub fn list_cycles(&self, agent: Option<&str>, limit: usize) -> Result<Vec<Cycle>> {
        let mut cycles: Vec<Cycle> = self.store.scan_json(CYCLES)?;
        if let Some(agent) = agent {
            cycles.retain(|c| c.agent_name == agent);
        }
        cycles.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.cycle_number.cmp(&a.cycle_number))
        });
        cycles.truncate(limit);
        Ok(cycles)
    }

    /// The most recent cycle for `agent` that has not completed or failed.
    pub fn current_cycle(&self, agent: &str) -> Result<Option<Cycle>> {
        Ok(self
            .list_cycles(Some(agent), usize::MAX)?
            .into_iter()
            .find(|c| !c.status.is_terminal()))
    }

    /// Learnings for `agent`, newest first.
    pub fn learnings(&self, agent: &str, learning_type: Option<&str>, limit: usize) -> Result<Vec<Learning>> {
        let mut rows: Vec<Learning> = self.store.scan_log(LEARNINGS, agent)?;
        rows.reverse();
        Ok(rows
            .into_iter()
            .filter(|l| learning_type.map_or(true, |t| l.learning_type == t))
            .take(limit)
            .collect())
    }

    pub fn agent_stats(&self, agent: &str) -> Result<AgentStats> {
        let cycles = self.list_cycles(Some(agent), usize::MAX)?;
        let total_cycles = cycles.len();
        let completed_cycles = cycles
            .iter()
            .filter(|c| c.status == CycleStatus::Completed)
            .count();
        let failed_cycles = cycles
            .iter()
            .filter(|c| c.status == CycleStatus::Failed)
            .count();
        let success_rate = if total_cycles > 0 {
            (completed_cycles as f64 / total_cycles as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        let learnings: Vec<Learning> = self.store.scan_log(LEARNINGS, agent)?;
        let mut learning_breakdown = BTreeMap::new();
        for l in &learnings {
            *learning_breakdown.entry(l.learning_type.clone()).or_insert(0) += 1;
        }

        Ok(AgentStats {
            agent_name: agent.to_string(),
            total_cycles,
            completed_cycles,
            failed_cycles,
            success_rate,
            total_learnings: learnings.len(),
            learning_breakdown,
        })
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn mutate(&self, id: Uuid, f: impl FnOnce(&mut Cycle) -> Result<()>) -> Result<Cycle> {
        self.store
            .update_json(CYCLES, &id.to_string(), f)?
            .ok_or_else(|| OodaError::CycleNotFound(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{action_id, ActionStore, SubjectRefs};
    use crate::types::Priority;
    use serde_json::json;
    use tempfile::TempDir;

    fn engine() -> (TempDir, CycleEngine) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, CycleEngine::new(Arc::new(store)))
    }

    fn to_acting(engine: &CycleEngine, agent: &str, decisions: Vec<String>) -> Cycle {
        let c = engine.start_cycle(agent).unwrap();
        engine.observe(c.id, json!({"keywords": []})).unwrap();
        engine.orient(c.id, json!({"patterns": []})).unwrap();
        engine.decide(c.id, decisions).unwrap()
    }

    fn drafts() -> Vec<ActionDraft> {
        vec![
            ActionDraft::new("optimize_content", Priority::Critical, "Fix CRM page")
                .with_subject(SubjectRefs::keyword("crm")),
            ActionDraft::new("create_content", Priority::High, "Write ERP guide")
                .with_subject(SubjectRefs::keyword("erp")),
        ]
    }

    #[test]
    fn decide_actions_saves_drafts_and_advances() {
        let (_dir, engine) = engine();
        let c = engine.start_cycle("seo").unwrap();
        engine.observe(c.id, json!({})).unwrap();
        engine.orient(c.id, json!({})).unwrap();

        let cycle = engine.decide_actions(c.id, drafts()).unwrap();
        assert_eq!(cycle.status, CycleStatus::Acting);
        assert_eq!(
            cycle.decisions,
            vec![
                action_id("seo", "optimize_content", &SubjectRefs::keyword("crm")),
                action_id("seo", "create_content", &SubjectRefs::keyword("erp")),
            ]
        );

        let saved = ActionStore::new(engine.store.clone())
            .get_actions(Some("seo"), None, 10)
            .unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|a| a.cycle_id == Some(c.id)));
    }

    #[test]
    fn decide_out_of_order_persists_nothing() {
        let (_dir, engine) = engine();
        let c = engine.start_cycle("seo").unwrap();

        let err = engine.decide_actions(c.id, drafts()).unwrap_err();
        assert!(matches!(err, OodaError::InvalidTransition { .. }));

        let actions = ActionStore::new(engine.store.clone());
        assert!(actions.get_actions(None, None, 100).unwrap().is_empty());
        let reloaded = engine.get_cycle(c.id).unwrap();
        assert_eq!(reloaded.status, CycleStatus::Observing);
        assert!(reloaded.decisions.is_empty());
    }

    #[test]
    fn decide_with_bad_draft_keeps_cycle_deciding() {
        let (_dir, engine) = engine();
        let c = engine.start_cycle("seo").unwrap();
        engine.observe(c.id, json!({})).unwrap();
        engine.orient(c.id, json!({})).unwrap();

        let mut bad = drafts();
        bad[1].id = Some("seo:create_content:bogus".into());
        let err = engine.decide_actions(c.id, bad).unwrap_err();
        assert!(matches!(err, OodaError::ActionIdMismatch { .. }));

        let actions = ActionStore::new(engine.store.clone());
        assert!(actions.get_actions(None, None, 100).unwrap().is_empty());
        assert_eq!(engine.get_cycle(c.id).unwrap().status, CycleStatus::Deciding);
    }

    #[test]
    fn cycle_numbers_increase_per_agent() {
        let (_dir, engine) = engine();
        let a1 = engine.start_cycle("seo").unwrap();
        let a2 = engine.start_cycle("seo").unwrap();
        let b1 = engine.start_cycle("ads").unwrap();
        let a3 = engine.start_cycle("seo").unwrap();
        assert_eq!(a1.cycle_number, 1);
        assert_eq!(a2.cycle_number, 2);
        assert_eq!(a3.cycle_number, 3);
        assert_eq!(b1.cycle_number, 1);
        assert_eq!(a1.status, CycleStatus::Observing);
    }

    #[test]
    fn start_cycle_rejects_bad_agent_name() {
        let (_dir, engine) = engine();
        let err = engine.start_cycle("SEO Agent").unwrap_err();
        assert!(matches!(err, OodaError::InvalidAgentName(_)));
    }

    #[test]
    fn full_cycle_walks_every_phase() {
        let (_dir, engine) = engine();
        let c = to_acting(&engine, "seo", vec!["seo:a:1".into()]);
        assert_eq!(c.status, CycleStatus::Acting);
        assert_eq!(c.decisions, vec!["seo:a:1".to_string()]);

        let c = engine
            .record_action(c.id, "seo:a:1", json!({"kw": "crm"}), json!({"ok": true}))
            .unwrap();
        assert_eq!(c.status, CycleStatus::Acting);
        assert_eq!(c.actions_taken.len(), 1);
        assert!(!c.actions_taken[0].unplanned);

        let c = engine.complete_act_phase(c.id).unwrap();
        assert_eq!(c.status, CycleStatus::Reflecting);

        let c = engine
            .reflect(
                c.id,
                json!({"summary": "ok"}),
                vec![LearningDraft::insight(json!({"k": "v"}))],
            )
            .unwrap();
        assert_eq!(c.status, CycleStatus::Completed);
        assert!(c.completed_at.is_some());
        assert!(c.entered_at(CycleStatus::Reflecting).is_some());
        assert!(c.phase_history.iter().all(|p| p.exited.is_some()));

        let learnings = engine.learnings("seo", None, 10).unwrap();
        assert_eq!(learnings.len(), 1);
        assert_eq!(learnings[0].learning_type, "insight");
        assert_eq!(learnings[0].cycle_id, c.id);
    }

    #[test]
    fn out_of_order_phase_is_rejected_without_mutation() {
        let (_dir, engine) = engine();
        let c = engine.start_cycle("seo").unwrap();
        let err = engine.orient(c.id, json!({"x": 1})).unwrap_err();
        assert!(matches!(err, OodaError::InvalidTransition { .. }));

        let stored = engine.get_cycle(c.id).unwrap();
        assert_eq!(stored.status, CycleStatus::Observing);
        assert!(stored.analysis.is_none());
    }

    #[test]
    fn phases_cannot_repeat() {
        let (_dir, engine) = engine();
        let c = engine.start_cycle("seo").unwrap();
        engine.observe(c.id, json!({})).unwrap();
        let err = engine.observe(c.id, json!({})).unwrap_err();
        assert!(matches!(err, OodaError::InvalidTransition { .. }));
    }

    #[test]
    fn fail_from_any_non_terminal_state() {
        let (_dir, engine) = engine();
        let c = engine.start_cycle("seo").unwrap();
        engine.observe(c.id, json!({})).unwrap();
        let failed = engine.fail_cycle(c.id, "orient timed out").unwrap();
        assert_eq!(failed.status, CycleStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("orient timed out"));

        // Terminal: no further phase, no second failure.
        assert!(engine.orient(c.id, json!({})).is_err());
        assert!(engine.fail_cycle(c.id, "again").is_err());
        let stored = engine.get_cycle(c.id).unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("orient timed out"));
    }

    #[test]
    fn completed_cycle_is_immutable() {
        let (_dir, engine) = engine();
        let c = to_acting(&engine, "seo", vec![]);
        engine.complete_act_phase(c.id).unwrap();
        engine.reflect(c.id, json!({}), vec![]).unwrap();
        assert!(engine.fail_cycle(c.id, "late").is_err());
        assert!(engine.complete_act_phase(c.id).is_err());
    }

    #[test]
    fn record_action_before_decide_is_rejected() {
        let (_dir, engine) = engine();
        let c = engine.start_cycle("seo").unwrap();
        let err = engine
            .record_action(c.id, "x", json!({}), json!({}))
            .unwrap_err();
        assert!(matches!(err, OodaError::InvalidTransition { .. }));
    }

    #[test]
    fn record_action_after_close_is_flagged() {
        let (_dir, engine) = engine();
        let c = to_acting(&engine, "ads", vec!["ads:budget:1".into()]);
        engine.fail_cycle(c.id, "operator aborted").unwrap();

        let c = engine
            .record_action(c.id, "ads:budget:1", json!({}), json!({"applied": true}))
            .unwrap();
        assert_eq!(c.status, CycleStatus::Failed);
        assert!(c.actions_taken[0].after_close);
    }

    #[test]
    fn unplanned_action_is_flagged() {
        let (_dir, engine) = engine();
        let c = to_acting(&engine, "ads", vec!["ads:budget:1".into()]);
        let c = engine
            .record_action(c.id, "ads:other:2", json!({}), json!({}))
            .unwrap();
        assert!(c.actions_taken[0].unplanned);
    }

    #[test]
    fn try_record_action_swallows_missing_cycle() {
        let (_dir, engine) = engine();
        assert!(!engine.try_record_action(Uuid::new_v4(), "x", json!({}), json!({})));
    }

    #[test]
    fn current_cycle_skips_terminal() {
        let (_dir, engine) = engine();
        let first = engine.start_cycle("seo").unwrap();
        engine.fail_cycle(first.id, "boom").unwrap();
        assert!(engine.current_cycle("seo").unwrap().is_none());

        let second = engine.start_cycle("seo").unwrap();
        let current = engine.current_cycle("seo").unwrap().unwrap();
        assert_eq!(current.id, second.id);
    }

    #[test]
    fn agent_stats_counts() {
        let (_dir, engine) = engine();
        let a = to_acting(&engine, "seo", vec![]);
        engine.complete_act_phase(a.id).unwrap();
        engine
            .reflect(
                a.id,
                json!({}),
                vec![
                    LearningDraft::insight(json!({})),
                    LearningDraft {
                        learning_type: "pattern".into(),
                        ..LearningDraft::insight(json!({}))
                    },
                ],
            )
            .unwrap();
        let b = engine.start_cycle("seo").unwrap();
        engine.fail_cycle(b.id, "x").unwrap();
        engine.start_cycle("seo").unwrap();

        let stats = engine.agent_stats("seo").unwrap();
        assert_eq!(stats.total_cycles, 3);
        assert_eq!(stats.completed_cycles, 1);
        assert_eq!(stats.failed_cycles, 1);
        assert!((stats.success_rate - 33.3).abs() < 1e-9);
        assert_eq!(stats.total_learnings, 2);
        assert_eq!(stats.learning_breakdown.get("pattern"), Some(&1));
    }

    #[test]
    fn learning_draft_defaults_from_json() {
        let d: LearningDraft = serde_json::from_value(json!({"context": {"a": 1}})).unwrap();
        assert_eq!(d.learning_type, "insight");
        assert!((d.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn legacy_cycle_without_new_fields_still_reads() {
        let raw = json!({
            "id": Uuid::new_v4(),
            "agent_name": "seo",
            "cycle_number": 4,
            "status": "acting",
            "created_at": Utc::now(),
            "updated_at": Utc::now()
        });
        let c: Cycle = serde_json::from_value(raw).unwrap();
        assert!(c.decisions.is_empty());
        assert!(c.phase_history.is_empty());
    }
}
