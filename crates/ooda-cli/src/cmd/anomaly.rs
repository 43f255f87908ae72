use crate::cmd::Project;
use crate::output::print_json;
use clap::Subcommand;
use ooda_core::alert::AlertGate;
use ooda_core::anomaly::{anomaly_alert, AnomalyDetector};
use serde_json::json;
use std::path::Path;

#[derive(Subcommand)]
pub enum AnomalySubcommand {
    /// Compare a current value against its history
    Detect {
        /// Metric name (e.g. sessions, conversion_rate, ad_spend)
        #[arg(long)]
        metric: String,
        /// Comma-separated historical values, oldest first
        #[arg(long, value_delimiter = ',', num_args = 1.., allow_negative_numbers = true)]
        history: Vec<f64>,
        #[arg(long, allow_negative_numbers = true)]
        current: f64,
        /// Minimum history length (default: anomaly.min_points from config)
        #[arg(long)]
        min_points: Option<usize>,
        /// Send an alert on behalf of this agent when an anomaly is found
        #[arg(long)]
        alert_agent: Option<String>,
    },
}

pub fn run(root: &Path, subcommand: AnomalySubcommand, json: bool) -> anyhow::Result<()> {
    let project = Project::open(root)?;

    match subcommand {
        AnomalySubcommand::Detect {
            metric,
            history,
            current,
            min_points,
            alert_agent,
        } => {
            let cfg = &project.config.anomaly;
            let detector = AnomalyDetector::from_config(cfg);
            let min_points = min_points.unwrap_or(cfg.min_points);
            let record = detector.detect(&metric, &history, current, min_points);

            let alert = match (&record, alert_agent) {
                (Some(r), Some(agent)) => {
                    let gate = AlertGate::new(project.store.clone());
                    Some(gate.send_alert(anomaly_alert(r, &agent)?)?)
                }
                _ => None,
            };

            if json {
                return print_json(&json!({ "anomaly": record, "alert": alert }));
            }
            match &record {
                None if history.len() < min_points => println!(
                    "no anomaly: {} of {min_points} required history points",
                    history.len()
                ),
                None => println!("no anomaly: {metric} within thresholds"),
                Some(r) => {
                    println!(
                        "{} anomaly ({}): {metric} {} by {:.1}%",
                        r.severity, r.anomaly_type, r.direction, r.deviation_percentage
                    );
                    println!(
                        "  baseline {:.2} ± {:.2}, current {:.2}",
                        r.baseline_mean, r.baseline_stdev, r.current_value
                    );
                }
            }
            if let Some(a) = &alert {
                println!("  alert {} sent ({})", a.id, a.status);
            }
            Ok(())
        }
    }
}
