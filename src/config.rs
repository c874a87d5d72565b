// src/config.rs - Runtime configuration for the diagnosis engine

use crate::error::{OracleError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest duration accepted from configuration or the knowledge base (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 3600;

/// Hard bounds on the feedback weight
pub const FEEDBACK_WEIGHT_FLOOR: f64 = 0.5;
pub const FEEDBACK_WEIGHT_CEILING: f64 = 1.5;

/// Whole seconds as a chrono duration, capped at [`MAX_DURATION_SECS`]
pub fn duration_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs.min(MAX_DURATION_SECS))
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or_else(|| chrono::Duration::days(365))
}

/// Milliseconds as a chrono duration, capped at [`MAX_DURATION_SECS`]
pub fn duration_millis(ms: u64) -> chrono::Duration {
    i64::try_from(ms.min(MAX_DURATION_SECS * 1000))
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .unwrap_or_else(|| chrono::Duration::days(365))
}

fn check_duration(name: &str, secs: u64) -> Result<()> {
    if secs > MAX_DURATION_SECS {
        return Err(OracleError::Config(format!(
            "{} must not exceed {} seconds",
            name, MAX_DURATION_SECS
        )));
    }
    Ok(())
}

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main genoracle configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Reading ingestion and freshness
    #[serde(default)]
    pub readings: ReadingConfig,

    /// Classifier tuning
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Ranking and verdict thresholds
    #[serde(default)]
    pub diagnosis: DiagnosisConfig,

    /// Feedback weighting
    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// Alarm lifecycle timing
    #[serde(default)]
    pub alarms: AlarmConfig,

    /// Periodic monitor
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Knowledge base file (None = built-in catalog)
    #[serde(default)]
    pub knowledge_base: Option<PathBuf>,
}

impl OracleConfig {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: OracleConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.readings.sampling_interval_ms == 0 {
            return Err(OracleError::Config(
                "readings.sampling_interval_ms must be greater than 0".into(),
            ));
        }
        check_duration("readings.sampling_interval_ms", self.readings.sampling_interval_ms / 1000)?;
        if let Some(ms) = self.readings.freshness_window_ms {
            if ms == 0 {
                return Err(OracleError::Config(
                    "readings.freshness_window_ms must be greater than 0".into(),
                ));
            }
            check_duration("readings.freshness_window_ms", ms / 1000)?;
        }
        if self.readings.history_depth == 0 {
            return Err(OracleError::Config(
                "readings.history_depth must be at least 1".into(),
            ));
        }
        if !(self.classifier.plausibility_margin_ratio >= 0.0) {
            return Err(OracleError::Config(
                "classifier.plausibility_margin_ratio must be non-negative".into(),
            ));
        }
        if self.diagnosis.top_n == 0 {
            return Err(OracleError::Config("diagnosis.top_n must be at least 1".into()));
        }
        let w = &self.diagnosis.severity_weights;
        if !(w.info > 0.0 && w.info <= w.warning && w.warning <= w.critical) {
            return Err(OracleError::Config(
                "diagnosis.severity_weights must satisfy 0 < info <= warning <= critical".into(),
            ));
        }
        let f = &self.feedback;
        if !(f.min_weight >= FEEDBACK_WEIGHT_FLOOR
            && f.min_weight <= 1.0
            && f.max_weight >= 1.0
            && f.max_weight <= FEEDBACK_WEIGHT_CEILING)
        {
            return Err(OracleError::Config(format!(
                "feedback weights must satisfy {} <= min_weight <= 1 <= max_weight <= {}",
                FEEDBACK_WEIGHT_FLOOR, FEEDBACK_WEIGHT_CEILING
            )));
        }
        check_duration("feedback.implicit_grace_secs", f.implicit_grace_secs)?;
        check_duration("alarms.reset_confirmation_secs", self.alarms.reset_confirmation_secs)?;
        if f.window == 0 || f.min_records > f.window {
            return Err(OracleError::Config(
                "feedback.min_records must not exceed a non-zero feedback.window".into(),
            ));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(OracleError::Config(
                "monitor.poll_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION CONFIGURATIONS
// ============================================================================

/// Reading store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingConfig {
    /// Expected sampling cadence of the controller source
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_ms: u64,

    /// Age after which a reading is stale (None = 2x sampling interval)
    #[serde(default)]
    pub freshness_window_ms: Option<u64>,

    /// Readings retained per parameter for audit and hold-time checks
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
}

impl ReadingConfig {
    pub fn freshness_window(&self) -> chrono::Duration {
        let ms = self
            .freshness_window_ms
            .unwrap_or(self.sampling_interval_ms.saturating_mul(2));
        duration_millis(ms)
    }
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: default_sampling_interval(),
            freshness_window_ms: None,
            history_depth: default_history_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Plausibility margin as a fraction of the normal span, used when a
    /// parameter has no explicit margin
    #[serde(default = "default_margin_ratio")]
    pub plausibility_margin_ratio: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            plausibility_margin_ratio: default_margin_ratio(),
        }
    }
}

/// Diagnosis ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisConfig {
    /// Maximum entries returned per diagnosis
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Minimum confidence for a confident verdict
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default)]
    pub severity_weights: SeverityWeights,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            min_confidence: default_min_confidence(),
            severity_weights: SeverityWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityWeights {
    #[serde(default = "default_critical_weight")]
    pub critical: f64,
    #[serde(default = "default_warning_weight")]
    pub warning: f64,
    #[serde(default = "default_info_weight")]
    pub info: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: default_critical_weight(),
            warning: default_warning_weight(),
            info: default_info_weight(),
        }
    }
}

/// Feedback weighting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Number of most recent records in the rolling success ratio
    #[serde(default = "default_feedback_window")]
    pub window: usize,

    /// Records required before the weight moves off neutral
    #[serde(default = "default_min_records")]
    pub min_records: usize,

    #[serde(default = "default_min_weight")]
    pub min_weight: f64,

    #[serde(default = "default_max_weight")]
    pub max_weight: f64,

    /// Time a technician has to override an implicit outcome
    #[serde(default = "default_grace_secs")]
    pub implicit_grace_secs: u64,
}

impl FeedbackConfig {
    pub fn implicit_grace(&self) -> chrono::Duration {
        duration_secs(self.implicit_grace_secs)
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            window: default_feedback_window(),
            min_records: default_min_records(),
            min_weight: default_min_weight(),
            max_weight: default_max_weight(),
            implicit_grace_secs: default_grace_secs(),
        }
    }
}

/// Alarm lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Time allowed for a success indicator after a reset attempt
    #[serde(default = "default_reset_confirmation")]
    pub reset_confirmation_secs: u64,

    /// Archived alarms kept per session
    #[serde(default = "default_archive_limit")]
    pub archive_limit: usize,

    /// Transition history entries kept per session
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl AlarmConfig {
    pub fn reset_confirmation(&self) -> chrono::Duration {
        duration_secs(self.reset_confirmation_secs)
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            reset_confirmation_secs: default_reset_confirmation(),
            archive_limit: default_archive_limit(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_sampling_interval() -> u64 { 2000 }
fn default_history_depth() -> usize { 64 }
fn default_margin_ratio() -> f64 { 0.2 }
fn default_top_n() -> usize { 10 }
fn default_min_confidence() -> f64 { 0.5 }
fn default_critical_weight() -> f64 { 1.0 }
fn default_warning_weight() -> f64 { 0.75 }
fn default_info_weight() -> f64 { 0.5 }
fn default_feedback_window() -> usize { 20 }
fn default_min_records() -> usize { 3 }
fn default_min_weight() -> f64 { 0.5 }
fn default_max_weight() -> f64 { 1.5 }
fn default_grace_secs() -> u64 { 300 }
fn default_reset_confirmation() -> u64 { 120 }
fn default_archive_limit() -> usize { 1000 }
fn default_history_limit() -> usize { 10000 }
fn default_poll_interval() -> u64 { 2000 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = OracleConfig::from_yaml("{}").unwrap();
        assert_eq!(config.readings.sampling_interval_ms, 2000);
        assert_eq!(config.readings.freshness_window(), chrono::Duration::seconds(4));
        assert_eq!(config.diagnosis.top_n, 10);
        assert_eq!(config.feedback.window, 20);
        assert_eq!(config.feedback.min_records, 3);
        assert!(config.knowledge_base.is_none());
    }

    #[test]
    fn test_explicit_freshness_window() {
        let config = OracleConfig::from_yaml(
            "readings:\n  sampling_interval_ms: 1000\n  freshness_window_ms: 5000\n",
        )
        .unwrap();
        assert_eq!(config.readings.freshness_window(), chrono::Duration::seconds(5));
    }

    #[test]
    fn test_validate_rejects_inverted_weights() {
        let result = OracleConfig::from_yaml(
            "diagnosis:\n  severity_weights:\n    critical: 0.4\n    warning: 0.7\n",
        );
        assert!(matches!(result, Err(OracleError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_feedback_bounds() {
        let result = OracleConfig::from_yaml("feedback:\n  min_weight: 1.2\n");
        assert!(matches!(result, Err(OracleError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_weights_outside_fixed_bounds() {
        for yaml in ["feedback:\n  min_weight: 0.2\n", "feedback:\n  max_weight: 3.0\n"] {
            let result = OracleConfig::from_yaml(yaml);
            assert!(matches!(result, Err(OracleError::Config(_))), "{}", yaml);
        }
        assert!(OracleConfig::from_yaml("feedback:\n  min_weight: 0.8\n  max_weight: 1.2\n").is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_durations() {
        for yaml in [
            "alarms:\n  reset_confirmation_secs: 18446744073709551615\n",
            "feedback:\n  implicit_grace_secs: 10000000000000000\n",
            "readings:\n  freshness_window_ms: 18446744073709551615\n",
            "readings:\n  freshness_window_ms: 0\n",
        ] {
            let result = OracleConfig::from_yaml(yaml);
            assert!(matches!(result, Err(OracleError::Config(_))), "{}", yaml);
        }
    }

    #[test]
    fn test_unvalidated_durations_are_capped() {
        let mut config = OracleConfig::default();
        config.alarms.reset_confirmation_secs = u64::MAX;
        config.readings.freshness_window_ms = Some(u64::MAX);
        let cap = chrono::Duration::seconds(MAX_DURATION_SECS as i64);
        assert_eq!(config.alarms.reset_confirmation(), cap);
        assert_eq!(config.readings.freshness_window(), cap);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "diagnosis:\n  top_n: 3\nalarms:\n  reset_confirmation_secs: 30").unwrap();

        let config = OracleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.diagnosis.top_n, 3);
        assert_eq!(config.alarms.reset_confirmation(), chrono::Duration::seconds(30));
    }
}
