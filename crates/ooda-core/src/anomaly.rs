//! Metric anomaly detection against a historical baseline.
//!
//! Two rules, either of which flags a value: the statistical rule
//! (`|current − mean| > k·stdev`) catches outliers on noisy series, the
//! relative rule (`|current − mean| / mean > threshold`) catches meaningful
//! moves on series that barely vary. The relative rule only applies to a
//! positive baseline.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alert::{Alert, AlertGate, AlertType, NewAlert};
use crate::config::AnomalyConfig;
use crate::error::Result;
use crate::types::Severity;

// ---------------------------------------------------------------------------
// AnomalyRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Statistical,
    Percentage,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyType::Statistical => "statistical",
            AnomalyType::Percentage => "percentage",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Increase => "increase",
            Direction::Decrease => "decrease",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produced once by detection and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub metric: String,
    pub current_value: f64,
    pub baseline_mean: f64,
    pub baseline_stdev: f64,
    /// `|current − mean|`.
    pub deviation: f64,
    /// Relative deviation in percent (0 when the mean is not positive).
    pub deviation_percentage: f64,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub direction: Direction,
    pub detected_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AnomalyDetector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    pub stdev_multiplier: f64,
    pub relative_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::from_config(&AnomalyConfig::default())
    }
}

impl AnomalyDetector {
    pub fn from_config(cfg: &AnomalyConfig) -> Self {
        Self {
            stdev_multiplier: cfg.stdev_multiplier,
            relative_threshold: cfg.relative_threshold,
            critical_threshold: cfg.critical_threshold,
        }
    }

    /// Compare `current` with the baseline formed by `history`.
    ///
    /// Returns `None` when there are fewer than `min_points` observations
    /// (or none at all) and when neither rule fires.
    pub fn detect(&self, metric: &str, history: &[f64], current: f64, min_points: usize) -> Option<AnomalyRecord> {
        if history.is_empty() || history.len() < min_points {
            debug!(metric, points = history.len(), min_points, "insufficient history");
            return None;
        }

        let mean = mean(history);
        let stdev = sample_stdev(history, mean);
        let deviation = (current - mean).abs();
        let relative = if mean > 0.0 { deviation / mean } else { 0.0 };

        let statistical = stdev > 0.0 && deviation > self.stdev_multiplier * stdev;
        let percentage = mean > 0.0 && relative > self.relative_threshold;
        if !statistical && !percentage {
            return None;
        }

        let severity = if relative > self.critical_threshold {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Some(AnomalyRecord {
            metric: metric.to_string(),
            current_value: current,
            baseline_mean: mean,
            baseline_stdev: stdev,
            deviation,
            deviation_percentage: relative * 100.0,
            anomaly_type: if percentage {
                AnomalyType::Percentage
            } else {
                AnomalyType::Statistical
            },
            severity,
            direction: if current > mean {
                Direction::Increase
            } else {
                Direction::Decrease
            },
            detected_at: Utc::now(),
        })
    }
}

/// Detect with the default thresholds (2·stdev, 30% relative, 50% critical).
pub fn detect(metric: &str, history: &[f64], current: f64, min_points: usize) -> Option<AnomalyRecord> {
    AnomalyDetector::default().detect(metric, history, current, min_points)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_stdev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

// ---------------------------------------------------------------------------
// Root cause
// ---------------------------------------------------------------------------

/// Today's related metrics, by name. Missing metrics read as 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSnapshot(pub BTreeMap<String, f64>);

impl MetricSnapshot {
    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub metric: String,
    pub direction: Direction,
    pub potential_causes: Vec<String>,
    pub recommendation: String,
}

/// Map an anomaly and the related metrics to likely causes.
pub fn candidate_causes(record: &AnomalyRecord, snapshot: &MetricSnapshot) -> RootCause {
    let mut causes = Vec::new();
    let below = |metric: &str, avg: &str| snapshot.get(metric) < snapshot.get(avg) * 0.7;

    let recommendation = match (record.metric.as_str(), record.direction) {
        ("sessions", Direction::Decrease) => {
            if below("organic_sessions", "avg_organic_sessions") {
                causes.push("Organic traffic drop: possible SEO issue or search algorithm update".to_string());
            }
            if below("paid_sessions", "avg_paid_sessions") {
                causes.push("Paid traffic drop: check for paused campaigns or depleted budget".to_string());
            }
            "1. Check Search Console for indexing issues\n\
             2. Verify all ad campaigns are active\n\
             3. Check for website downtime or technical issues"
        }
        ("conversion_rate", Direction::Decrease) => {
            if snapshot.get("landing_page_conversion_rate") < 1.0 {
                causes.push("Landing page issue: check for technical problems or poor UX".to_string());
            }
            if below("form_submissions", "avg_form_submissions") {
                causes.push("Form submission issue: possible technical problem with forms".to_string());
            }
            "1. Test landing pages for technical issues\n\
             2. Review recent website changes\n\
             3. Check form functionality\n\
             4. Analyze user session recordings"
        }
        ("ad_spend", Direction::Increase) => {
            if snapshot.get("avg_cpc") > snapshot.get("baseline_cpc") * 1.3 {
                causes.push("CPC spike: increased competition or lower quality score".to_string());
            }
            "1. Review quality scores for all keywords\n\
             2. Check for bid strategy changes\n\
             3. Analyze competitor activity\n\
             4. Consider pausing underperforming campaigns"
        }
        _ => "Manual investigation recommended to identify root cause",
    };

    if causes.is_empty() {
        causes.push("No obvious root cause identified; manual investigation recommended".to_string());
    }

    RootCause {
        metric: record.metric.clone(),
        direction: record.direction,
        potential_causes: causes,
        recommendation: recommendation.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Alert emission
// ---------------------------------------------------------------------------

fn title_case(metric: &str) -> String {
    metric
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The alert an anomaly produces, without root-cause data.
pub fn anomaly_alert(record: &AnomalyRecord, agent: &str) -> Result<NewAlert> {
    let name = title_case(&record.metric);
    Ok(NewAlert {
        alert_type: match record.direction {
            Direction::Decrease => AlertType::PerformanceDrop,
            Direction::Increase => AlertType::MetricAnomaly,
        },
        severity: record.severity,
        title: format!("Anomaly Detected: {name}"),
        message: format!(
            "{name} {}d by {:.1}% ({:.1} → {:.1})",
            record.direction, record.deviation_percentage, record.baseline_mean, record.current_value
        ),
        data: serde_json::to_value(record)?,
        agent: agent.to_string(),
        requires_approval: false,
    })
}

/// Send the alert for `record`, attaching root-cause data when `enrich`
/// finishes within `timeout`. Enrichment failure never blocks the alert.
pub async fn emit_anomaly_alert<Fut>(
    gate: &AlertGate,
    record: &AnomalyRecord,
    agent: &str,
    enrich: Fut,
    timeout: Duration,
) -> Result<Alert>
where
    Fut: Future<Output = anyhow::Result<RootCause>>,
{
    let mut alert = anomaly_alert(record, agent)?;
    match tokio::time::timeout(timeout, enrich).await {
        Ok(Ok(cause)) => {
            if let Some(data) = alert.data.as_object_mut() {
                data.insert("root_cause".to_string(), serde_json::to_value(&cause)?);
            }
        }
        Ok(Err(e)) => {
            let error = format!("{e:#}");
            warn!(metric = %record.metric, error = %error, "root cause analysis failed");
        }
        Err(_) => warn!(
            metric = %record.metric,
            timeout_secs = timeout.as_secs_f64(),
            "root cause analysis timed out"
        ),
    }
    gate.send_alert(alert)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
