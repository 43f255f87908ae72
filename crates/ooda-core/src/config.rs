use crate::error::{OodaError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Per-collaborator timeouts. The engine never retries; a timeout fails the
/// cycle and the outer scheduler decides whether to start a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_phase_timeout")]
    pub observe_timeout_secs: u64,
    #[serde(default = "default_phase_timeout")]
    pub orient_timeout_secs: u64,
    #[serde(default = "default_phase_timeout")]
    pub decide_timeout_secs: u64,
    #[serde(default = "default_strategist_timeout")]
    pub strategist_timeout_secs: u64,
}

fn default_phase_timeout() -> u64 {
    120
}

fn default_strategist_timeout() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            observe_timeout_secs: default_phase_timeout(),
            orient_timeout_secs: default_phase_timeout(),
            decide_timeout_secs: default_phase_timeout(),
            strategist_timeout_secs: default_strategist_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn strategist_timeout(&self) -> Duration {
        Duration::from_secs(self.strategist_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// AnomalyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    #[serde(default = "default_stdev_multiplier")]
    pub stdev_multiplier: f64,
    #[serde(default = "default_relative_threshold")]
    pub relative_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    #[serde(default = "default_root_cause_timeout")]
    pub root_cause_timeout_secs: u64,
}

fn default_min_points() -> usize {
    7
}

fn default_stdev_multiplier() -> f64 {
    2.0
}

fn default_relative_threshold() -> f64 {
    0.30
}

fn default_critical_threshold() -> f64 {
    0.50
}

fn default_root_cause_timeout() -> u64 {
    10
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_points: default_min_points(),
            stdev_multiplier: default_stdev_multiplier(),
            relative_threshold: default_relative_threshold(),
            critical_threshold: default_critical_threshold(),
            root_cause_timeout_secs: default_root_cause_timeout(),
        }
    }
}

impl AnomalyConfig {
    pub fn root_cause_timeout(&self) -> Duration {
        Duration::from_secs(self.root_cause_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ApprovalConfig
// ---------------------------------------------------------------------------

/// Thresholds used by the caller-side approval policies in `policy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_ratio_threshold")]
    pub budget_change_threshold: f64,
    #[serde(default = "default_ratio_threshold")]
    pub cpc_spike_threshold: f64,
    #[serde(default = "default_keyword_drop")]
    pub keyword_drop_positions: f64,
    #[serde(default = "default_negative_rating")]
    pub negative_review_max_rating: u8,
}

fn default_ratio_threshold() -> f64 {
    0.30
}

fn default_keyword_drop() -> f64 {
    5.0
}

fn default_negative_rating() -> u8 {
    2
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            budget_change_threshold: default_ratio_threshold(),
            cpc_spike_threshold: default_ratio_threshold(),
            keyword_drop_positions: default_keyword_drop(),
            negative_review_max_rating: default_negative_rating(),
        }
    }
}

// ---------------------------------------------------------------------------
// StrategyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Keys dropped at every depth before an input is fingerprinted.
    #[serde(default = "default_ignored_keys")]
    pub ignored_keys: Vec<String>,
}

fn default_ignored_keys() -> Vec<String> {
    ["timestamp", "fetched_at", "updated_at", "created_at"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ignored_keys: default_ignored_keys(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            engine: EngineConfig::default(),
            anomaly: AnomalyConfig::default(),
            approval: ApprovalConfig::default(),
            strategy: StrategyConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(OodaError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let timeouts = [
            ("engine.observe_timeout_secs", self.engine.observe_timeout_secs),
            ("engine.orient_timeout_secs", self.engine.orient_timeout_secs),
            ("engine.decide_timeout_secs", self.engine.decide_timeout_secs),
            (
                "engine.strategist_timeout_secs",
                self.engine.strategist_timeout_secs,
            ),
            (
                "anomaly.root_cause_timeout_secs",
                self.anomaly.root_cause_timeout_secs,
            ),
        ];
        for (key, secs) in timeouts {
            if secs == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{key} is 0; every call would time out immediately"),
                });
            }
        }

        let ratios = [
            ("anomaly.relative_threshold", self.anomaly.relative_threshold),
            ("anomaly.critical_threshold", self.anomaly.critical_threshold),
            (
                "approval.budget_change_threshold",
                self.approval.budget_change_threshold,
            ),
            (
                "approval.cpc_spike_threshold",
                self.approval.cpc_spike_threshold,
            ),
        ];
        for (key, value) in ratios {
            if !(value > 0.0 && value <= 1.0) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("{key}={value} is outside (0, 1]"),
                });
            }
        }

        if self.anomaly.critical_threshold < self.anomaly.relative_threshold {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "anomaly.critical_threshold ({}) is below relative_threshold ({}); \
                     every percentage anomaly will be critical",
                    self.anomaly.critical_threshold, self.anomaly.relative_threshold
                ),
            });
        }

        if self.anomaly.min_points < 2 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "anomaly.min_points={} leaves the statistical rule without a stdev",
                    self.anomaly.min_points
                ),
            });
        }

        if self.anomaly.stdev_multiplier <= 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "anomaly.stdev_multiplier must be positive".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
