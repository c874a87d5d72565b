//! Diagnosis engine.
//!
//! Turns a reading snapshot into a ranked list of fault candidates:
//!
//! 1. classify every fresh reading the controller exposes
//! 2. evaluate the trigger of every applicable fault code
//! 3. score each candidate as `matched/total × severity weight × feedback weight`
//! 4. sort by confidence, then severity, then code
//!
//! The engine holds no session state. It never mutates readings or the
//! knowledge base, so any number of callers may diagnose concurrently.

use crate::classifier::{Classification, Classifier, RequiredStatus, Side, Status};
use crate::config::{DiagnosisConfig, SeverityWeights};
use crate::controller::ControllerProfile;
use crate::fault::{Condition, FaultCategory, FaultCode, Severity};
use crate::ids::{ControllerId, FaultCodeId, ParameterId, SessionId};
use crate::knowledge::KnowledgeBase;
use crate::predictive::{self, MaintenanceTask, PredictedFailure};
use crate::readings::{ReadingSnapshot, ReadingStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// FEEDBACK WEIGHTS
// ============================================================================

/// Source of per-code ranking weights
pub trait WeightSource {
    fn weight(&self, code: &FaultCodeId) -> f64;
}

/// Every code weighted 1.0
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralWeights;

impl WeightSource for NeutralWeights {
    fn weight(&self, _code: &FaultCodeId) -> f64 {
        1.0
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No fresh readings to work with
    InsufficientData,
    /// Every monitored parameter is normal and nothing matched
    Healthy,
    /// Abnormal readings, but no fully matched fault above the confidence floor
    NoConfidentMatch,
    Confident,
}

impl Verdict {
    pub fn message(self) -> &'static str {
        match self {
            Verdict::InsufficientData => "insufficient data",
            Verdict::Healthy => "all monitored parameters normal",
            Verdict::NoConfidentMatch => "no confident match",
            Verdict::Confident => "confident match",
        }
    }
}

/// Classified fresh reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterAssessment {
    pub parameter_id: ParameterId,
    pub label: String,
    pub unit: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

impl ParameterAssessment {
    pub fn classification(&self) -> Classification {
        Classification::new(self.status, self.side)
    }
}

/// Parameter excluded from matching because its reading is missing or stale
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityIssue {
    pub parameter_id: ParameterId,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_observed_at: Option<DateTime<Utc>>,
}

/// Implausible reading and the sensor fault codes that cover it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorFaultReport {
    pub parameter_id: ParameterId,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    pub candidate_codes: Vec<FaultCodeId>,
}

/// Outcome of one trigger term against the snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedParameter {
    pub parameter_id: ParameterId,
    pub required: RequiredStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_side: Option<Side>,
    /// None when the reading is missing or stale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisEntry {
    pub code: FaultCodeId,
    pub title: String,
    pub category: FaultCategory,
    pub base_severity: Severity,
    /// Base severity raised by the observed statuses of matched terms
    pub severity: Severity,
    pub confidence: f64,
    pub matched_conditions: usize,
    pub total_conditions: usize,
    pub fully_matched: bool,
    pub severity_weight: f64,
    pub feedback_weight: f64,
    pub conditions: Vec<MatchedParameter>,
}

impl DiagnosisEntry {
    pub fn matched_parameters(&self) -> impl Iterator<Item = &MatchedParameter> {
        self.conditions.iter().filter(|c| c.matched)
    }

    pub fn is_partial(&self) -> bool {
        !self.fully_matched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGrade {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
    Unknown,
}

/// Overall health across classified readings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    /// 0-100; sensor faults are excluded from the score
    pub score: Option<f64>,
    pub grade: HealthGrade,
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
    pub sensor_fault: usize,
}

impl HealthSummary {
    fn from_readings<'a>(readings: impl Iterator<Item = &'a ParameterAssessment>) -> Self {
        let (mut normal, mut warning, mut critical, mut sensor_fault) = (0, 0, 0, 0);
        for r in readings {
            match r.status {
                Status::Normal => normal += 1,
                Status::Warning => warning += 1,
                Status::Critical => critical += 1,
                Status::SensorFault => sensor_fault += 1,
                Status::Unknown | Status::Stale => {}
            }
        }

        let scored = normal + warning + critical;
        let score = (scored > 0).then(|| {
            (normal as f64 * 100.0 + warning as f64 * 60.0 + critical as f64 * 20.0) / scored as f64
        });
        let grade = match score {
            None => HealthGrade::Unknown,
            Some(s) if s >= 90.0 => HealthGrade::Excellent,
            Some(s) if s >= 75.0 => HealthGrade::Good,
            Some(s) if s >= 50.0 => HealthGrade::Fair,
            Some(s) if s >= 25.0 => HealthGrade::Poor,
            Some(_) => HealthGrade::Critical,
        };

        Self {
            score,
            grade,
            normal,
            warning,
            critical,
            sensor_fault,
        }
    }
}

/// Ranked diagnosis for one session snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisResult {
    pub session_id: SessionId,
    pub controller_id: ControllerId,
    pub firmware: String,
    pub evaluated_at: DateTime<Utc>,
    pub verdict: Verdict,
    pub entries: Vec<DiagnosisEntry>,
    pub parameters: Vec<ParameterAssessment>,
    pub data_quality: Vec<DataQualityIssue>,
    pub sensor_faults: Vec<SensorFaultReport>,
    pub health: HealthSummary,
    pub predicted_failures: Vec<PredictedFailure>,
    pub scheduled_maintenance: Vec<MaintenanceTask>,
    pub immediate_actions: Vec<String>,
}

impl DiagnosisResult {
    pub fn top(&self) -> Option<&DiagnosisEntry> {
        self.entries.first()
    }

    pub fn is_insufficient_data(&self) -> bool {
        self.verdict == Verdict::InsufficientData
    }

    /// One-line summary suitable for display
    pub fn summary(&self) -> String {
        match (self.verdict, self.top()) {
            (Verdict::Confident, Some(top)) => format!(
                "{}: {} {} ({:.0}%)",
                self.verdict.message(),
                top.code,
                top.title,
                top.confidence * 100.0
            ),
            (Verdict::InsufficientData, _) => format!(
                "{}: no fresh readings ({} parameters missing or stale)",
                self.verdict.message(),
                self.data_quality.len()
            ),
            _ => self.verdict.message().to_string(),
        }
    }
}

// ============================================================================
// ASSESSMENT
// ============================================================================

/// Trigger state of an applicable fault against a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Every term holds on fresh data
    Holds,
    /// At least one term fails on fresh data
    Cleared,
    /// No term fails, but some lack fresh data
    Indeterminate,
}

/// Full, untruncated evaluation of a snapshot
#[derive(Debug, Clone)]
pub struct Assessment {
    pub evaluated_at: DateTime<Utc>,
    pub readings: BTreeMap<ParameterId, ParameterAssessment>,
    pub data_quality: Vec<DataQualityIssue>,
    /// Every candidate, ranked
    pub candidates: Vec<DiagnosisEntry>,
    /// Trigger state for every applicable fault code
    pub triggers: BTreeMap<FaultCodeId, TriggerState>,
}

impl Assessment {
    pub fn trigger_state(&self, code: &str) -> Option<TriggerState> {
        self.triggers.get(code).copied()
    }

    pub fn candidate(&self, code: &str) -> Option<&DiagnosisEntry> {
        self.candidates.iter().find(|c| c.code.as_str() == code)
    }
}

/// Stateless diagnosis engine
#[derive(Debug, Clone)]
pub struct DiagnosisEngine {
    classifier: Classifier,
    config: DiagnosisConfig,
}

impl DiagnosisEngine {
    pub fn new(classifier: Classifier, config: DiagnosisConfig) -> Self {
        Self { classifier, config }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn config(&self) -> &DiagnosisConfig {
        &self.config
    }

    /// Classify the snapshot's readings for the parameters the profile exposes
    pub fn classify_snapshot(
        &self,
        kb: &KnowledgeBase,
        profile: &ControllerProfile,
        snapshot: &ReadingSnapshot,
    ) -> (BTreeMap<ParameterId, ParameterAssessment>, Vec<DataQualityIssue>) {
        let mut readings = BTreeMap::new();
        let mut issues = Vec::new();

        for id in &profile.parameter_ids {
            let Some(def) = kb.parameters.get(id.as_str()) else {
                continue;
            };

            if let Some(reading) = snapshot.fresh(id.as_str()) {
                let def = profile.effective_definition(def);
                let c = self.classifier.classify(&def, reading.value);
                readings.insert(
                    id.clone(),
                    ParameterAssessment {
                        parameter_id: id.clone(),
                        label: def.label.clone(),
                        unit: def.unit.clone(),
                        value: reading.value,
                        observed_at: reading.observed_at,
                        status: c.status,
                        side: c.side,
                    },
                );
            } else if let Some(reading) = snapshot.stale(id.as_str()) {
                debug!("Excluding stale reading for {} ({})", id, reading.observed_at);
                issues.push(DataQualityIssue {
                    parameter_id: id.clone(),
                    status: Status::Stale,
                    last_observed_at: Some(reading.observed_at),
                });
            } else {
                issues.push(DataQualityIssue {
                    parameter_id: id.clone(),
                    status: Status::Unknown,
                    last_observed_at: None,
                });
            }
        }

        (readings, issues)
    }

    /// Evaluate every trigger term of `fault` against classified readings
    pub fn evaluate_trigger(
        fault: &FaultCode,
        readings: &BTreeMap<ParameterId, ParameterAssessment>,
    ) -> (TriggerState, Vec<MatchedParameter>) {
        let mut any_failed = false;
        let mut any_missing = false;

        let terms: Vec<MatchedParameter> = fault
            .trigger
            .iter()
            .map(|term| {
                let reading = readings.get(term.parameter.as_str());
                let observed = reading.map(|r| r.classification());
                let matched = observed.map_or(false, |c| term.status.is_met_by(c, term.side));
                match (reading, matched) {
                    (None, _) => any_missing = true,
                    (Some(_), false) => any_failed = true,
                    _ => {}
                }
                MatchedParameter {
                    parameter_id: term.parameter.clone(),
                    required: term.status,
                    required_side: term.side,
                    observed,
                    value: reading.map(|r| r.value),
                    matched,
                }
            })
            .collect();

        let state = if any_failed {
            TriggerState::Cleared
        } else if any_missing {
            TriggerState::Indeterminate
        } else {
            TriggerState::Holds
        };
        (state, terms)
    }

    /// Classify, match and rank without truncation
    pub fn assess(
        &self,
        kb: &KnowledgeBase,
        profile: &ControllerProfile,
        snapshot: &ReadingSnapshot,
        weights: &dyn WeightSource,
    ) -> Assessment {
        let (readings, data_quality) = self.classify_snapshot(kb, profile, snapshot);
        let mut candidates = Vec::new();
        let mut triggers = BTreeMap::new();

        for fault in kb.faults.applicable_to(profile) {
            let (state, conditions) = Self::evaluate_trigger(fault, &readings);
            triggers.insert(fault.code.clone(), state);

            let matched = conditions.iter().filter(|c| c.matched).count();
            let total = conditions.len();
            let abnormal_match = conditions
                .iter()
                .any(|c| c.matched && c.required.is_abnormal());
            if matched == 0 || (matched < total && !abnormal_match) {
                continue;
            }

            let severity = conditions
                .iter()
                .filter(|c| c.matched)
                .filter_map(|c| c.observed.and_then(|o| Severity::from_status(o.status)))
                .fold(fault.severity, Ord::max);
            let severity_weight = severity_weight(&self.config.severity_weights, severity);
            let feedback_weight = weights.weight(&fault.code);
            let confidence = (matched as f64 / total as f64) * severity_weight * feedback_weight;

            candidates.push(DiagnosisEntry {
                code: fault.code.clone(),
                title: fault.title.clone(),
                category: fault.category,
                base_severity: fault.severity,
                severity,
                confidence,
                matched_conditions: matched,
                total_conditions: total,
                fully_matched: matched == total,
                severity_weight,
                feedback_weight,
                conditions,
            });
        }

        candidates.sort_by(rank_order);

        Assessment {
            evaluated_at: snapshot.taken_at,
            readings,
            data_quality,
            candidates,
            triggers,
        }
    }

    /// Ranked, truncated diagnosis for a session snapshot
    pub fn diagnose(
        &self,
        session_id: &SessionId,
        kb: &KnowledgeBase,
        profile: &ControllerProfile,
        firmware: &str,
        snapshot: &ReadingSnapshot,
        weights: &dyn WeightSource,
    ) -> DiagnosisResult {
        let assessment = self.assess(kb, profile, snapshot, weights);
        self.result_from(session_id, kb, profile, firmware, assessment)
    }

    /// Build the caller-facing result from a full assessment
    pub fn result_from(
        &self,
        session_id: &SessionId,
        kb: &KnowledgeBase,
        profile: &ControllerProfile,
        firmware: &str,
        assessment: Assessment,
    ) -> DiagnosisResult {
        let sensor_faults = assessment
            .readings
            .values()
            .filter(|r| r.status == Status::SensorFault)
            .map(|r| SensorFaultReport {
                parameter_id: r.parameter_id.clone(),
                value: r.value,
                side: r.side,
                candidate_codes: kb
                    .faults
                    .applicable_to(profile)
                    .filter(|f| f.is_sensor_fault())
                    .filter(|f| f.trigger.iter().any(|t| t.parameter == r.parameter_id))
                    .map(|f| f.code.clone())
                    .collect(),
            })
            .collect();

        let verdict = self.verdict(&assessment);
        let health = HealthSummary::from_readings(assessment.readings.values());
        let predicted_failures = predictive::predict(&kb.predictive_rules, &assessment.readings);
        let scheduled_maintenance = predictive::schedule(&predicted_failures);

        let mut entries = assessment.candidates;
        entries.truncate(self.config.top_n);
        let immediate_actions = predictive::immediate_actions(&health, &entries, &kb.faults);

        DiagnosisResult {
            session_id: session_id.clone(),
            controller_id: profile.id.clone(),
            firmware: firmware.to_string(),
            evaluated_at: assessment.evaluated_at,
            verdict,
            entries,
            parameters: assessment.readings.into_values().collect(),
            data_quality: assessment.data_quality,
            sensor_faults,
            health,
            predicted_failures,
            scheduled_maintenance,
            immediate_actions,
        }
    }

    fn verdict(&self, assessment: &Assessment) -> Verdict {
        if assessment.readings.is_empty() {
            return Verdict::InsufficientData;
        }
        match assessment.candidates.first() {
            Some(top) if top.fully_matched && top.confidence >= self.config.min_confidence => {
                Verdict::Confident
            }
            Some(_) => Verdict::NoConfidentMatch,
            None if assessment
                .readings
                .values()
                .all(|r| r.status == Status::Normal) =>
            {
                Verdict::Healthy
            }
            None => Verdict::NoConfidentMatch,
        }
    }
}

fn severity_weight(weights: &SeverityWeights, severity: Severity) -> f64 {
    match severity {
        Severity::Critical => weights.critical,
        Severity::Warning => weights.warning,
        Severity::Info => weights.info,
    }
}

/// Confidence descending, then severity descending, then code ascending
fn rank_order(a: &DiagnosisEntry, b: &DiagnosisEntry) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.severity.cmp(&a.severity))
        .then_with(|| a.code.cmp(&b.code))
}

// ============================================================================
// CONDITION EVALUATION
// ============================================================================

/// Evaluates reset-pathway conditions against a session's reading history
pub struct ConditionContext<'a> {
    pub store: &'a ReadingStore,
    pub kb: &'a KnowledgeBase,
    pub profile: &'a ControllerProfile,
    pub classifier: &'a Classifier,
    pub now: DateTime<Utc>,
    pub window: Duration,
}

impl ConditionContext<'_> {
    pub fn holds(&self, condition: &Condition) -> bool {
        self.holds_since(condition, None)
    }

    /// Condition holds on fresh data and, when `after` is given, the latest
    /// reading was observed strictly after that instant. The hold time is
    /// then counted from `after` at the earliest.
    pub fn holds_since(&self, condition: &Condition, after: Option<DateTime<Utc>>) -> bool {
        let parameter = condition.parameter().as_str();

        if let Some(after) = after {
            match self.store.latest(parameter) {
                Some(latest) if latest.observed_at > after => {}
                _ => return false,
            }
        }

        let since = match condition {
            Condition::Status { status, side, .. } => {
                let Some(def) = self.kb.parameters.get(parameter) else {
                    return false;
                };
                let def = self.profile.effective_definition(def);
                self.store.held_since(parameter, self.now, self.window, |r| {
                    status.is_met_by(self.classifier.classify(&def, r.value), *side)
                })
            }
            Condition::Below { value, .. } => {
                self.store
                    .held_since(parameter, self.now, self.window, |r| r.value < *value)
            }
            Condition::Above { value, .. } => {
                self.store
                    .held_since(parameter, self.now, self.window, |r| r.value > *value)
            }
        };

        let since = match (since, after) {
            (Some(since), Some(after)) => Some(since.max(after)),
            (since, _) => since,
        };
        since.map_or(false, |since| self.now.signed_duration_since(since) >= condition.held_for())
    }

    pub fn all_hold(&self, conditions: &[Condition]) -> bool {
        conditions.iter().all(|c| self.holds(c))
    }
}
