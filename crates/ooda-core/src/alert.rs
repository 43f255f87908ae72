//! Alerts and the approval gate.
//!
//! The gate is policy-agnostic: whoever builds a [`NewAlert`] decides whether
//! it needs a human (see `policy`). The gate only enforces that `pending` is
//! left through an explicit approve or reject, exactly once.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{OodaError, Result};
use crate::store::{Store, ALERTS};
use crate::types::Severity;

// ---------------------------------------------------------------------------
// AlertType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BudgetChange,
    CpcSpike,
    KeywordDrop,
    ReviewNegative,
    PerformanceDrop,
    ApprovalNeeded,
    TaskFailed,
    MetricAnomaly,
}

impl AlertType {
    pub fn all() -> &'static [AlertType] {
        &[
            AlertType::BudgetChange,
            AlertType::CpcSpike,
            AlertType::KeywordDrop,
            AlertType::ReviewNegative,
            AlertType::PerformanceDrop,
            AlertType::ApprovalNeeded,
            AlertType::TaskFailed,
            AlertType::MetricAnomaly,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::BudgetChange => "budget_change",
            AlertType::CpcSpike => "cpc_spike",
            AlertType::KeywordDrop => "keyword_drop",
            AlertType::ReviewNegative => "review_negative",
            AlertType::PerformanceDrop => "performance_drop",
            AlertType::ApprovalNeeded => "approval_needed",
            AlertType::TaskFailed => "task_failed",
            AlertType::MetricAnomaly => "metric_anomaly",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertType {
    type Err = OodaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AlertType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OodaError::invalid("alert type", s))
    }
}

// ---------------------------------------------------------------------------
// AlertStatus
// ---------------------------------------------------------------------------

/// `pending` (approval required) or `sent` on creation; a pending alert
/// ends as `approved` or `rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Sent,
    Approved,
    Rejected,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Sent => "sent",
            AlertStatus::Approved => "approved",
            AlertStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = OodaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AlertStatus::Pending),
            "sent" => Ok(AlertStatus::Sent),
            "approved" => Ok(AlertStatus::Approved),
            "rejected" => Ok(AlertStatus::Rejected),
            _ => Err(OodaError::invalid("alert status", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// NewAlert / Alert
// ---------------------------------------------------------------------------

/// An alert as constructed by a caller, before the gate persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    pub agent: String,
    #[serde(default)]
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    pub agent: String,
    #[serde(default)]
    pub requires_approval: bool,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl Alert {
    fn from_new(new: NewAlert) -> Self {
        let now = Utc::now();
        let status = if new.requires_approval {
            AlertStatus::Pending
        } else {
            AlertStatus::Sent
        };
        Self {
            id: Uuid::new_v4(),
            alert_type: new.alert_type,
            severity: new.severity,
            title: new.title,
            message: new.message,
            data: new.data,
            agent: new.agent,
            requires_approval: new.requires_approval,
            status,
            created_at: now,
            updated_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
        }
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.status != AlertStatus::Pending {
            return Err(OodaError::ApprovalStateConflict {
                id: self.id.to_string(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    pub fn approve(&mut self, by: &str) -> Result<()> {
        self.ensure_pending()?;
        let now = Utc::now();
        self.status = AlertStatus::Approved;
        self.approved_by = Some(by.to_string());
        self.approved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, by: &str, reason: Option<String>) -> Result<()> {
        self.ensure_pending()?;
        let now = Utc::now();
        self.status = AlertStatus::Rejected;
        self.rejected_by = Some(by.to_string());
        self.rejected_at = Some(now);
        self.rejection_reason = reason;
        self.updated_at = now;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AlertGate
// ---------------------------------------------------------------------------

pub struct AlertGate {
    store: Arc<Store>,
}

impl AlertGate {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Persist `new` as pending or sent and log it at its severity's level.
    pub fn send_alert(&self, new: NewAlert) -> Result<Alert> {
        let alert = Alert::from_new(new);
        self.store
            .put_json(ALERTS, &alert.id.to_string(), &alert)?;

        match alert.severity {
            Severity::Info => info!(
                agent = %alert.agent,
                alert_id = %alert.id,
                "[{}] {}: {}", alert.agent, alert.title, alert.message
            ),
            Severity::Warning => warn!(
                agent = %alert.agent,
                alert_id = %alert.id,
                "[{}] {}: {}", alert.agent, alert.title, alert.message
            ),
            Severity::Critical => error!(
                agent = %alert.agent,
                alert_id = %alert.id,
                "[{}] {}: {}", alert.agent, alert.title, alert.message
            ),
        }
        Ok(alert)
    }

    pub fn approve_alert(&self, id: Uuid, approved_by: &str) -> Result<Alert> {
        let alert = self.resolve(id, |a| a.approve(approved_by))?;
        info!(alert_id = %id, approved_by, "alert approved");
        Ok(alert)
    }

    pub fn reject_alert(&self, id: Uuid, rejected_by: &str, reason: Option<String>) -> Result<Alert> {
        let alert = self.resolve(id, |a| a.reject(rejected_by, reason))?;
        info!(alert_id = %id, rejected_by, "alert rejected");
        Ok(alert)
    }

    pub fn get_alert(&self, id: Uuid) -> Result<Alert> {
        self.store
            .get_json(ALERTS, &id.to_string())?
            .ok_or_else(|| OodaError::AlertNotFound(id.to_string()))
    }

    /// Alerts newest-first, optionally filtered by status.
    pub fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self.store.scan_json(ALERTS)?;
        alerts.retain(|a| status.map_or(true, |s| a.status == s));
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    /// Alerts waiting on a human, newest first.
    pub fn pending_approvals(&self) -> Result<Vec<Alert>> {
        Ok(self
            .list_alerts(Some(AlertStatus::Pending), usize::MAX)?
            .into_iter()
            .filter(|a| a.requires_approval)
            .collect())
    }

    fn resolve(&self, id: Uuid, f: impl FnOnce(&mut Alert) -> Result<()>) -> Result<Alert> {
        self.store
            .update_json(ALERTS, &id.to_string(), f)?
            .ok_or_else(|| OodaError::AlertNotFound(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
