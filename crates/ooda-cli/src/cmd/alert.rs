use crate::cmd::{parse_id, read_json, Project};
use crate::output::{print_json, print_table, truncate, ts};
use clap::Subcommand;
use ooda_core::alert::{Alert, AlertGate, AlertStatus, AlertType, NewAlert};
use ooda_core::policy;
use ooda_core::types::Severity;
use serde_json::Value;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum AlertSubcommand {
    /// List alerts, newest first
    List {
        /// Filter by status: pending | sent | approved | rejected
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Alerts waiting for approval
    Pending,

    /// Show one alert
    Show { id: String },

    /// Send an alert
    Send {
        /// budget_change | cpc_spike | keyword_drop | review_negative |
        /// performance_drop | approval_needed | task_failed | metric_anomaly
        #[arg(long = "type", value_name = "TYPE")]
        alert_type: String,
        /// info | warning | critical
        #[arg(long, default_value = "info")]
        severity: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        agent: String,
        /// Hold the alert as pending until approved or rejected
        #[arg(long)]
        requires_approval: bool,
        /// Extra data as JSON (or @file)
        #[arg(long)]
        data: Option<String>,
    },

    /// Approve a pending alert
    Approve {
        id: String,
        #[arg(long)]
        by: String,
    },

    /// Reject a pending alert
    Reject {
        id: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Apply an approval policy and send the alert it produces, if any
    Check {
        #[command(subcommand)]
        check: PolicyCheck,
    },
}

#[derive(Subcommand)]
pub enum PolicyCheck {
    /// Budget moves beyond the configured ratio require approval
    BudgetChange {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        campaign: String,
        #[arg(long)]
        old: f64,
        #[arg(long)]
        new: f64,
    },
    /// Cost-per-click above the configured spike ratio
    CpcSpike {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        current: f64,
        #[arg(long)]
        average: f64,
    },
    /// Ranking fell by more than the configured number of positions
    KeywordDrop {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        keyword: String,
        #[arg(long)]
        old: f64,
        #[arg(long)]
        new: f64,
    },
    /// Review at or below the configured rating
    NegativeReview {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        platform: String,
        #[arg(long)]
        rating: u8,
        #[arg(long)]
        text: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcommand: AlertSubcommand, json: bool) -> anyhow::Result<()> {
    let project = Project::open(root)?;
    let gate = AlertGate::new(project.store.clone());

    match subcommand {
        AlertSubcommand::List { status, limit } => {
            let status: Option<AlertStatus> = status.map(|s| s.parse()).transpose()?;
            list(&gate.list_alerts(status, limit)?, json)
        }

        AlertSubcommand::Pending => list(&gate.pending_approvals()?, json),

        AlertSubcommand::Show { id } => {
            let alert = gate.get_alert(parse_id(&id)?)?;
            if json {
                return print_json(&alert);
            }
            println!("ID:       {}", alert.id);
            println!("Type:     {}", alert.alert_type);
            println!("Severity: {}", alert.severity);
            println!("Status:   {}", alert.status);
            println!("Agent:    {}", alert.agent);
            println!("Title:    {}", alert.title);
            println!("Message:  {}", alert.message);
            println!("Created:  {}", ts(&alert.created_at));
            if let (Some(by), Some(at)) = (&alert.approved_by, &alert.approved_at) {
                println!("Approved: {by} at {}", ts(at));
            }
            if let (Some(by), Some(at)) = (&alert.rejected_by, &alert.rejected_at) {
                println!("Rejected: {by} at {}", ts(at));
                if let Some(reason) = &alert.rejection_reason {
                    println!("Reason:   {reason}");
                }
            }
            if !alert.data.is_null() {
                println!("Data:     {}", alert.data);
            }
            Ok(())
        }

        AlertSubcommand::Send {
            alert_type,
            severity,
            title,
            message,
            agent,
            requires_approval,
            data,
        } => {
            let alert_type: AlertType = alert_type.parse()?;
            let severity: Severity = severity.parse()?;
            let data = match data {
                Some(arg) => read_json(&arg)?,
                None => Value::Null,
            };
            let alert = gate.send_alert(NewAlert {
                alert_type,
                severity,
                title,
                message,
                data,
                agent,
                requires_approval,
            })?;
            sent(&alert, json)
        }

        AlertSubcommand::Approve { id, by } => {
            let alert = gate.approve_alert(parse_id(&id)?, &by)?;
            if json {
                return print_json(&alert);
            }
            println!("approved {} ({})", alert.id, alert.title);
            Ok(())
        }

        AlertSubcommand::Reject { id, by, reason } => {
            let alert = gate.reject_alert(parse_id(&id)?, &by, reason)?;
            if json {
                return print_json(&alert);
            }
            println!("rejected {} ({})", alert.id, alert.title);
            Ok(())
        }

        AlertSubcommand::Check { check } => {
            let cfg = &project.config.approval;
            let candidate = match check {
                PolicyCheck::BudgetChange {
                    agent,
                    campaign,
                    old,
                    new,
                } => policy::budget_change(cfg, &agent, &campaign, old, new),
                PolicyCheck::CpcSpike {
                    agent,
                    current,
                    average,
                } => policy::cpc_spike(cfg, &agent, current, average),
                PolicyCheck::KeywordDrop {
                    agent,
                    keyword,
                    old,
                    new,
                } => policy::keyword_drop(cfg, &agent, &keyword, old, new),
                PolicyCheck::NegativeReview {
                    agent,
                    platform,
                    rating,
                    text,
                } => policy::negative_review(cfg, &agent, &platform, rating, &text),
            };
            match candidate {
                Some(new_alert) => sent(&gate.send_alert(new_alert)?, json),
                None if json => print_json(&Value::Null),
                None => {
                    println!("within thresholds; no alert");
                    Ok(())
                }
            }
        }
    }
}

fn sent(alert: &Alert, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(alert);
    }
    println!("{} {} [{}]: {}", alert.status, alert.id, alert.severity, alert.title);
    Ok(())
}

fn list(alerts: &[Alert], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&alerts);
    }
    if alerts.is_empty() {
        println!("no alerts");
        return Ok(());
    }
    print_table(
        &["ID", "TYPE", "SEVERITY", "STATUS", "AGENT", "TITLE"],
        alerts
            .iter()
            .map(|a| {
                vec![
                    a.id.to_string(),
                    a.alert_type.to_string(),
                    a.severity.to_string(),
                    a.status.to_string(),
                    a.agent.clone(),
                    truncate(&a.title, 48),
                ]
            })
            .collect(),
    );
    Ok(())
}
