//! Caller-side approval policies.
//!
//! Each check compares a proposed change against an [`ApprovalConfig`]
//! threshold and returns the alert to send, if any. The alert gate never
//! consults these; it only enforces the pending → approved | rejected state
//! machine on whatever it is given.

use serde_json::json;

use crate::alert::{AlertType, NewAlert};
use crate::config::ApprovalConfig;
use crate::types::Severity;

/// Budget moves larger than the threshold (either direction) need approval.
pub fn budget_change(
    cfg: &ApprovalConfig,
    agent: &str,
    campaign: &str,
    old_budget: f64,
    new_budget: f64,
) -> Option<NewAlert> {
    if old_budget == 0.0 {
        return None;
    }
    let change = ((new_budget - old_budget) / old_budget).abs();
    if change <= cfg.budget_change_threshold {
        return None;
    }
    Some(NewAlert {
        alert_type: AlertType::BudgetChange,
        severity: Severity::Critical,
        title: format!("Budget Change Approval Required: {campaign}"),
        message: format!(
            "Budget change of {:.1}% (${old_budget:.2} → ${new_budget:.2})",
            change * 100.0
        ),
        data: json!({
            "campaign": campaign,
            "old_budget": old_budget,
            "new_budget": new_budget,
            "change_percentage": change,
        }),
        agent: agent.to_string(),
        requires_approval: true,
    })
}

pub fn cpc_spike(cfg: &ApprovalConfig, agent: &str, current_cpc: f64, avg_cpc: f64) -> Option<NewAlert> {
    if avg_cpc <= 0.0 || current_cpc <= avg_cpc * (1.0 + cfg.cpc_spike_threshold) {
        return None;
    }
    let spike = (current_cpc - avg_cpc) / avg_cpc * 100.0;
    Some(NewAlert {
        alert_type: AlertType::CpcSpike,
        severity: Severity::Warning,
        title: "CPC Spike Detected".to_string(),
        message: format!("CPC increased by {spike:.1}% (${avg_cpc:.2} → ${current_cpc:.2})"),
        data: json!({
            "current_cpc": current_cpc,
            "avg_cpc": avg_cpc,
            "spike_percentage": spike,
        }),
        agent: agent.to_string(),
        requires_approval: false,
    })
}

/// Positions grow as rankings fall, so a drop is `new > old + threshold`.
pub fn keyword_drop(
    cfg: &ApprovalConfig,
    agent: &str,
    keyword: &str,
    old_position: f64,
    new_position: f64,
) -> Option<NewAlert> {
    if new_position <= old_position + cfg.keyword_drop_positions {
        return None;
    }
    let drop = new_position - old_position;
    Some(NewAlert {
        alert_type: AlertType::KeywordDrop,
        severity: Severity::Warning,
        title: format!("Keyword Position Drop: {keyword}"),
        message: format!(
            "Position dropped from {old_position:.1} to {new_position:.1} (-{drop:.1} positions)"
        ),
        data: json!({
            "keyword": keyword,
            "old_position": old_position,
            "new_position": new_position,
            "drop": drop,
        }),
        agent: agent.to_string(),
        requires_approval: false,
    })
}

/// Low ratings need a human response before anything is posted.
pub fn negative_review(
    cfg: &ApprovalConfig,
    agent: &str,
    platform: &str,
    rating: u8,
    review_text: &str,
) -> Option<NewAlert> {
    if rating > cfg.negative_review_max_rating {
        return None;
    }
    let excerpt: String = review_text.chars().take(100).collect();
    Some(NewAlert {
        alert_type: AlertType::ReviewNegative,
        severity: Severity::Critical,
        title: format!("Negative Review on {platform}"),
        message: format!("{rating}-star review: {excerpt}..."),
        data: json!({
            "platform": platform,
            "rating": rating,
            "review_text": review_text,
        }),
        agent: agent.to_string(),
        requires_approval: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_change_over_threshold_requires_approval() {
        let cfg = ApprovalConfig::default();
        let alert = budget_change(&cfg, "ads", "brand", 100.0, 150.0).unwrap();
        assert!(alert.requires_approval);
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.message.contains("50.0%"));

        let cut = budget_change(&cfg, "ads", "brand", 100.0, 60.0).unwrap();
        assert_eq!(cut.alert_type, AlertType::BudgetChange);
    }

    #[test]
    fn small_budget_change_passes() {
        let cfg = ApprovalConfig::default();
        assert!(budget_change(&cfg, "ads", "brand", 100.0, 125.0).is_none());
        assert!(budget_change(&cfg, "ads", "brand", 0.0, 50.0).is_none());
    }

    #[test]
    fn cpc_spike_threshold() {
        let cfg = ApprovalConfig::default();
        assert!(cpc_spike(&cfg, "ads", 1.25, 1.0).is_none());
        let alert = cpc_spike(&cfg, "ads", 1.50, 1.0).unwrap();
        assert!(!alert.requires_approval);
        assert!(alert.message.contains("50.0%"));
    }

    #[test]
    fn keyword_drop_counts_positions() {
        let cfg = ApprovalConfig::default();
        assert!(keyword_drop(&cfg, "seo", "crm", 3.0, 8.0).is_none());
        let alert = keyword_drop(&cfg, "seo", "crm", 3.0, 9.0).unwrap();
        assert_eq!(alert.data["drop"], 6.0);
        // Improving rank never alerts.
        assert!(keyword_drop(&cfg, "seo", "crm", 20.0, 2.0).is_none());
    }

    #[test]
    fn negative_review_truncates_excerpt() {
        let cfg = ApprovalConfig::default();
        assert!(negative_review(&cfg, "reviews", "g2", 3, "meh").is_none());
        let text = "x".repeat(250);
        let alert = negative_review(&cfg, "reviews", "g2", 1, &text).unwrap();
        assert!(alert.requires_approval);
        assert_eq!(alert.message, format!("1-star review: {}...", "x".repeat(100)));
    }
}
