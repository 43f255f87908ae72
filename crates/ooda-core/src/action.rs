//! Proposed actions and the store that owns them.
//!
//! An action's id is derived from what it is about (agent, type and subject),
//! not from when it was proposed. Re-deriving the same recommendation in a
//! later cycle therefore lands on the same row instead of piling up
//! duplicates.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{db_err, OodaError, Result};
use crate::paths;
use crate::store::{self, Store, ACTIONS};
use crate::types::{ActionStatus, Priority};

// ---------------------------------------------------------------------------
// SubjectRefs
// ---------------------------------------------------------------------------

/// What an action is about. Only the refs that apply are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_page: Option<String>,
}

impl SubjectRefs {
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            ..Self::default()
        }
    }

    /// Normalized identity key: trimmed, lowercased refs in a fixed order.
    /// Unset refs keep their slot so `keyword=a` and `campaign=a` differ.
    pub fn key(&self) -> String {
        [
            &self.keyword,
            &self.content_id,
            &self.competitor,
            &self.campaign,
            &self.platform,
            &self.target_page,
        ]
        .iter()
        .map(|r| r.as_deref().map(|s| s.trim().to_lowercase()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("|")
    }
}

/// `"{agent}:{action_type}:{hex16}"`.
pub fn action_id(agent: &str, action_type: &str, subject: &SubjectRefs) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent.as_bytes());
    hasher.update([0x1f]);
    hasher.update(action_type.as_bytes());
    hasher.update([0x1f]);
    hasher.update(subject.key().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{agent}:{action_type}:{}", &digest[..16])
}

// ---------------------------------------------------------------------------
// ActionDraft
// ---------------------------------------------------------------------------

/// An action proposed by a Decide collaborator or derived from a strategy,
/// not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDraft {
    /// Optional caller-supplied id; must equal the computed content address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action_type: String,
    #[serde(default)]
    pub priority: Priority,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommended_operation: String,
    #[serde(default)]
    pub subject: SubjectRefs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

impl ActionDraft {
    pub fn new(action_type: impl Into<String>, priority: Priority, title: impl Into<String>) -> Self {
        Self {
            id: None,
            action_type: action_type.into(),
            priority,
            title: title.into(),
            description: String::new(),
            recommended_operation: String::new(),
            subject: SubjectRefs::default(),
            expected_outcome: None,
        }
    }

    pub fn with_subject(mut self, subject: SubjectRefs) -> Self {
        self.subject = subject;
        self
    }

    /// Compute the content address for `agent`, rejecting a mismatched
    /// caller-supplied id.
    pub fn resolve_id(&self, agent: &str) -> Result<String> {
        let computed = action_id(agent, &self.action_type, &self.subject);
        match &self.id {
            Some(supplied) if *supplied != computed => Err(OodaError::ActionIdMismatch {
                supplied: supplied.clone(),
                computed,
            }),
            _ => Ok(computed),
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub agent_name: String,
    /// Cycle whose Decide phase last proposed this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<Uuid>,
    pub action_type: String,
    #[serde(default)]
    pub priority: Priority,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommended_operation: String,
    #[serde(default)]
    pub subject: SubjectRefs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Action {
    fn from_draft(id: String, agent: &str, cycle_id: Option<Uuid>, draft: ActionDraft) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent_name: agent.to_string(),
            cycle_id,
            action_type: draft.action_type,
            priority: draft.priority,
            title: draft.title,
            description: draft.description,
            recommended_operation: draft.recommended_operation,
            subject: draft.subject,
            expected_outcome: draft.expected_outcome,
            status: ActionStatus::Pending,
            execution_result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
            completed_at: None,
        }
    }

    /// Take the proposal fields from a re-derived copy of the same action.
    fn refresh_from(&mut self, newer: Action) {
        self.cycle_id = newer.cycle_id.or(self.cycle_id);
        self.priority = newer.priority;
        self.title = newer.title;
        self.description = newer.description;
        self.recommended_operation = newer.recommended_operation;
        self.expected_outcome = newer.expected_outcome;
        self.updated_at = newer.updated_at;
    }

    /// Apply a status change, stamping `executed_at` / `completed_at`.
    pub fn transition(&mut self, to: ActionStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(OodaError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
                reason: if self.status.is_terminal() {
                    format!("action '{}' is {} and cannot be reopened", self.id, self.status)
                } else {
                    "actions move pending → executing → completed | failed".to_string()
                },
            });
        }
        let now = Utc::now();
        if to == ActionStatus::Executing && self.status != ActionStatus::Executing {
            self.executed_at = Some(now);
        }
        if to.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

/// Stable sort with the most urgent work first.
pub fn sort_by_priority(actions: &mut [Action]) {
    actions.sort_by_key(|a| a.priority);
}

// ---------------------------------------------------------------------------
// ActionStore
// ---------------------------------------------------------------------------

pub struct ActionStore {
    store: Arc<Store>,
}

impl ActionStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Upsert `drafts` as pending actions for `agent`; returns their ids in
    /// submission order, with in-batch duplicates collapsed.
    pub fn save_actions(&self, agent: &str, drafts: Vec<ActionDraft>) -> Result<Vec<String>> {
        self.save_cycle_actions(agent, None, drafts)
    }

    /// `save_actions`, tagging each row with the cycle that proposed it.
    ///
    /// A pending row is refreshed with the newer proposal. Executing and
    /// terminal rows are left untouched so a re-derived action is never
    /// resurrected.
    pub fn save_cycle_actions(
        &self,
        agent: &str,
        cycle_id: Option<Uuid>,
        drafts: Vec<ActionDraft>,
    ) -> Result<Vec<String>> {
        let batch = prepare_batch(agent, cycle_id, drafts)?;
        let (created, refreshed) = self.store.write(|wt| upsert_batch(wt, &batch))?;

        info!(agent, created, refreshed, total = batch.len(), "actions saved");
        Ok(batch.into_iter().map(|a| a.id).collect())
    }

    pub fn get_action(&self, id: &str) -> Result<Action> {
        self.store
            .get_json(ACTIONS, id)?
            .ok_or_else(|| OodaError::ActionNotFound(id.to_string()))
    }

    /// Actions newest-first, optionally filtered by agent and status.
    pub fn get_actions(
        &self,
        agent: Option<&str>,
        status: Option<ActionStatus>,
        limit: usize,
    ) -> Result<Vec<Action>> {
        let mut actions: Vec<Action> = self.store.scan_json(ACTIONS)?;
        actions.retain(|a| {
            agent.map_or(true, |ag| a.agent_name == ag) && status.map_or(true, |s| a.status == s)
        });
        actions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        actions.truncate(limit);
        Ok(actions)
    }

    /// Pending actions, most urgent first.
    pub fn pending_actions(&self, agent: Option<&str>) -> Result<Vec<Action>> {
        let mut actions = self.get_actions(agent, Some(ActionStatus::Pending), usize::MAX)?;
        sort_by_priority(&mut actions);
        Ok(actions)
    }

    /// Completed actions, most recently finished first.
    pub fn completed_actions(&self, agent: Option<&str>, limit: usize) -> Result<Vec<Action>> {
        let mut actions = self.get_actions(agent, Some(ActionStatus::Completed), usize::MAX)?;
        actions.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        actions.truncate(limit);
        Ok(actions)
    }

    /// Move an action along its lifecycle, recording the executor's result or
    /// error when given.
    pub fn update_action_status(
        &self,
        id: &str,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Action> {
        let action = self
            .store
            .update_json(ACTIONS, id, |a: &mut Action| {
                a.transition(status)?;
                if result.is_some() {
                    a.execution_result = result;
                }
                if error.is_some() {
                    a.error_message = error;
                }
                Ok(())
            })?
            .ok_or_else(|| OodaError::ActionNotFound(id.to_string()))?;
        info!(
            agent = %action.agent_name,
            action_id = %action.id,
            status = %action.status,
            "action status updated"
        );
        Ok(action)
    }

    /// Best-effort `update_action_status` for executors: the side effect has
    /// already happened, so a failure is logged and swallowed.
    pub fn try_update_action_status(
        &self,
        id: &str,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        match self.update_action_status(id, status, result, error) {
            Ok(_) => true,
            Err(e) => {
                warn!(action_id = id, status = %status, error = %e, "failed to persist action status");
                false
            }
        }
    }
}

/// Resolve ids for a batch of drafts, keeping the first draft per id.
pub(crate) fn prepare_batch(
    agent: &str,
    cycle_id: Option<Uuid>,
    drafts: Vec<ActionDraft>,
) -> Result<Vec<Action>> {
    paths::validate_agent(agent)?;

    let mut seen = HashSet::new();
    let mut batch = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let id = draft.resolve_id(agent)?;
        if seen.insert(id.clone()) {
            batch.push(Action::from_draft(id, agent, cycle_id, draft));
        }
    }
    Ok(batch)
}

/// Insert new rows and refresh pending ones inside an open write transaction.
/// Rows that already left `pending` are left untouched. Returns
/// `(created, refreshed)`.
pub(crate) fn upsert_batch(wt: &WriteTransaction, batch: &[Action]) -> Result<(usize, usize)> {
    let mut table = wt.open_table(ACTIONS).map_err(db_err)?;
    let (mut created, mut refreshed) = (0usize, 0usize);
    for action in batch {
        let existing = table
            .get(action.id.as_str())
            .map_err(db_err)?
            .map(|g| g.value().to_vec());
        let row = match existing {
            None => {
                created += 1;
                action.clone()
            }
            Some(bytes) => {
                let mut stored: Action = store::decode(&bytes)?;
                if stored.status != ActionStatus::Pending {
                    continue;
                }
                stored.refresh_from(action.clone());
                refreshed += 1;
                stored
            }
        };
        let encoded = store::encode(&row)?;
        table
            .insert(row.id.as_str(), encoded.as_slice())
            .map_err(db_err)?;
    }
    Ok((created, refreshed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn action_store() -> (TempDir, ActionStore) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, ActionStore::new(Arc::new(store)))
    }

    fn kw_draft(kw: &str, priority: Priority) -> ActionDraft {
        ActionDraft::new("optimize_content", priority, format!("Improve ranking for {kw}"))
            .with_subject(SubjectRefs::keyword(kw))
    }

    #[test]
    fn action_id_is_content_addressed() {
        let a = action_id("seo", "optimize_content", &SubjectRefs::keyword("CRM Software "));
        let b = action_id("seo", "optimize_content", &SubjectRefs::keyword("crm software"));
        let c = action_id("seo", "optimize_content", &SubjectRefs::keyword("erp"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("seo:optimize_content:"));
        assert_eq!(a.rsplit(':').next().unwrap().len(), 16);
    }

    #[test]
    fn subject_slot_matters() {
        let kw = SubjectRefs::keyword("acme");
        let comp = SubjectRefs {
            competitor: Some("acme".into()),
            ..SubjectRefs::default()
        };
        assert_ne!(action_id("seo", "t", &kw), action_id("seo", "t", &comp));
    }

    #[test]
    fn mismatched_supplied_id_is_rejected() {
        let (_dir, store) = action_store();
        let mut draft = kw_draft("crm", Priority::High);
        draft.id = Some("seo:optimize_content:0000000000000000".into());
        let err = store.save_actions("seo", vec![draft]).unwrap_err();
        assert!(matches!(err, OodaError::ActionIdMismatch { .. }));
    }

    #[test]
    fn save_actions_is_idempotent() {
        let (_dir, store) = action_store();
        let drafts = vec![kw_draft("crm", Priority::High), kw_draft("erp", Priority::Low)];
        let first = store.save_actions("seo", drafts.clone()).unwrap();
        let second = store.save_actions("seo", drafts).unwrap();
        assert_eq!(first, second);
        let all = store.get_actions(Some("seo"), None, 100).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|a| a.status == ActionStatus::Pending));
    }

    #[test]
    fn duplicates_within_batch_collapse() {
        let (_dir, store) = action_store();
        let ids = store
            .save_actions(
                "seo",
                vec![kw_draft("crm", Priority::High), kw_draft("crm", Priority::Low)],
            )
            .unwrap();
        assert_eq!(ids.len(), 1);
        let action = store.get_action(&ids[0]).unwrap();
        assert_eq!(action.priority, Priority::High);
    }

    #[test]
    fn resave_refreshes_pending_row() {
        let (_dir, store) = action_store();
        let ids = store
            .save_actions("seo", vec![kw_draft("crm", Priority::Low)])
            .unwrap();
        store
            .save_actions("seo", vec![kw_draft("crm", Priority::Critical)])
            .unwrap();
        assert_eq!(store.get_action(&ids[0]).unwrap().priority, Priority::Critical);
    }

    #[test]
    fn resave_never_resurrects_finished_action() {
        let (_dir, store) = action_store();
        let ids = store
            .save_actions("seo", vec![kw_draft("crm", Priority::High)])
            .unwrap();
        store
            .update_action_status(&ids[0], ActionStatus::Executing, None, None)
            .unwrap();
        store
            .update_action_status(&ids[0], ActionStatus::Completed, Some(json!({"ok": true})), None)
            .unwrap();

        store
            .save_actions("seo", vec![kw_draft("crm", Priority::Low)])
            .unwrap();
        let action = store.get_action(&ids[0]).unwrap();
        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.priority, Priority::High);
    }

    #[test]
    fn status_lifecycle_stamps_timestamps() {
        let (_dir, store) = action_store();
        let ids = store
            .save_actions("ads", vec![kw_draft("shoes", Priority::Medium)])
            .unwrap();
        let a = store
            .update_action_status(&ids[0], ActionStatus::Executing, None, None)
            .unwrap();
        assert!(a.executed_at.is_some());
        assert!(a.completed_at.is_none());

        let a = store
            .update_action_status(&ids[0], ActionStatus::Failed, None, Some("api 500".into()))
            .unwrap();
        assert_eq!(a.status, ActionStatus::Failed);
        assert_eq!(a.error_message.as_deref(), Some("api 500"));
        assert!(a.completed_at.is_some());
    }

    #[test]
    fn terminal_action_cannot_return_to_pending() {
        let (_dir, store) = action_store();
        let ids = store
            .save_actions("ads", vec![kw_draft("shoes", Priority::Medium)])
            .unwrap();
        store
            .update_action_status(&ids[0], ActionStatus::Executing, None, None)
            .unwrap();
        store
            .update_action_status(&ids[0], ActionStatus::Completed, None, None)
            .unwrap();
        let err = store
            .update_action_status(&ids[0], ActionStatus::Pending, None, None)
            .unwrap_err();
        assert!(matches!(err, OodaError::InvalidTransition { .. }));
        assert_eq!(store.get_action(&ids[0]).unwrap().status, ActionStatus::Completed);
    }

    #[test]
    fn try_update_swallows_errors() {
        let (_dir, store) = action_store();
        assert!(!store.try_update_action_status("seo:x:missing", ActionStatus::Executing, None, None));
    }

    #[test]
    fn sorting_by_priority() {
        let (_dir, store) = action_store();
        store
            .save_actions(
                "seo",
                vec![
                    kw_draft("a", Priority::Medium),
                    kw_draft("b", Priority::Critical),
                    kw_draft("c", Priority::Low),
                    kw_draft("d", Priority::High),
                ],
            )
            .unwrap();
        let pending = store.pending_actions(Some("seo")).unwrap();
        let order: Vec<Priority> = pending.iter().map(|a| a.priority).collect();
        assert_eq!(
            order,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn filters_by_agent_and_status() {
        let (_dir, store) = action_store();
        let seo = store
            .save_actions("seo", vec![kw_draft("crm", Priority::High)])
            .unwrap();
        store
            .save_actions("ads", vec![kw_draft("crm", Priority::High)])
            .unwrap();
        store
            .update_action_status(&seo[0], ActionStatus::Executing, None, None)
            .unwrap();

        assert_eq!(store.get_actions(Some("ads"), None, 10).unwrap().len(), 1);
        assert_eq!(
            store
                .get_actions(None, Some(ActionStatus::Executing), 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.get_actions(None, None, 1).unwrap().len(), 1);
        assert!(store.completed_actions(Some("seo"), 10).unwrap().is_empty());
    }
}
