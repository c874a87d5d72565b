//! Predictive maintenance rules.
//!
//! A rule names a component that tends to fail when its conditions hold on
//! current readings, e.g. batteries sagging just above the critical band.
//! Rules never raise alarms; they feed the predicted failures, the
//! scheduled maintenance and the immediate actions of a diagnosis.

use crate::diagnosis::{DiagnosisEntry, HealthSummary, ParameterAssessment};
use crate::fault::{Condition, FaultCatalog};
use crate::ids::ParameterId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Immediate actions listed when any reading is critical / warning
const CRITICAL_ACTION_LIMIT: usize = 5;
const WARNING_ACTION_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveRule {
    pub id: String,
    pub component: String,
    /// AND-combined; every parameter needs a fresh reading
    pub conditions: Vec<Condition>,
    /// Free-form horizon, e.g. `1-3 months`
    pub timeframe: String,
    /// Percent, 0-100
    pub probability: u8,
    pub preventive_action: String,
    pub cost_if_ignored: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl PredictiveRule {
    /// True when every condition holds on the classified readings
    pub fn fires(&self, readings: &BTreeMap<ParameterId, ParameterAssessment>) -> bool {
        !self.conditions.is_empty()
            && self.conditions.iter().all(|condition| {
                readings
                    .get(condition.parameter().as_str())
                    .map_or(false, |r| condition_met(condition, r))
            })
    }
}

fn condition_met(condition: &Condition, reading: &ParameterAssessment) -> bool {
    match condition {
        Condition::Status { status, side, .. } => status.is_met_by(reading.classification(), *side),
        Condition::Below { value, .. } => reading.value < *value,
        Condition::Above { value, .. } => reading.value > *value,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictedFailure {
    pub rule_id: String,
    pub component: String,
    pub timeframe: String,
    pub probability: u8,
    pub preventive_action: String,
    pub cost_if_ignored: f64,
    pub currency: String,
    /// Readings the rule fired on
    pub evidence: BTreeMap<ParameterId, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenancePriority {
    Medium,
    High,
    Critical,
}

impl MaintenancePriority {
    pub fn from_probability(probability: u8) -> Self {
        match probability {
            p if p > 70 => MaintenancePriority::Critical,
            p if p > 50 => MaintenancePriority::High,
            _ => MaintenancePriority::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceTask {
    pub component: String,
    pub task: String,
    pub due_in: String,
    pub priority: MaintenancePriority,
}

/// Rules firing on `readings`, most probable first
pub fn predict(
    rules: &[PredictiveRule],
    readings: &BTreeMap<ParameterId, ParameterAssessment>,
) -> Vec<PredictedFailure> {
    let mut predicted: Vec<PredictedFailure> = rules
        .iter()
        .filter(|rule| rule.fires(readings))
        .map(|rule| PredictedFailure {
            rule_id: rule.id.clone(),
            component: rule.component.clone(),
            timeframe: rule.timeframe.clone(),
            probability: rule.probability,
            preventive_action: rule.preventive_action.clone(),
            cost_if_ignored: rule.cost_if_ignored,
            currency: rule.currency.clone(),
            evidence: rule
                .conditions
                .iter()
                .filter_map(|c| readings.get(c.parameter().as_str()))
                .map(|r| (r.parameter_id.clone(), r.value))
                .collect(),
        })
        .collect();

    predicted.sort_by(|a, b| b.probability.cmp(&a.probability).then_with(|| a.rule_id.cmp(&b.rule_id)));
    predicted
}

/// One task per predicted failure
pub fn schedule(predicted: &[PredictedFailure]) -> Vec<MaintenanceTask> {
    predicted
        .iter()
        .map(|p| MaintenanceTask {
            component: p.component.clone(),
            task: p.preventive_action.clone(),
            due_in: p.timeframe.clone(),
            priority: MaintenancePriority::from_probability(p.probability),
        })
        .collect()
}

/// What to do right now, from the worst classified status and the first
/// diagnostic steps of the fully matched entries. Empty without readings.
pub fn immediate_actions(
    health: &HealthSummary,
    entries: &[DiagnosisEntry],
    faults: &FaultCatalog,
) -> Vec<String> {
    let (mut actions, limit): (Vec<String>, usize) = if health.critical > 0 {
        (vec!["Stop the generator to prevent damage".into()], CRITICAL_ACTION_LIMIT)
    } else if health.warning > 0 {
        (
            vec!["Monitor the set closely".into(), "Reduce load if possible".into()],
            WARNING_ACTION_LIMIT,
        )
    } else if health.sensor_fault > 0 {
        (
            vec!["Verify the flagged sensors before relying on their readings".into()],
            WARNING_ACTION_LIMIT,
        )
    } else if health.normal > 0 {
        return vec![
            "Continue normal operation".into(),
            "Keep to the regular service schedule".into(),
        ];
    } else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    let steps = entries
        .iter()
        .filter(|e| e.fully_matched)
        .filter_map(|e| faults.get(e.code.as_str()))
        .flat_map(|f| f.diagnostic_steps.iter().take(2))
        .map(|s| s.action.clone())
        .filter(|action| seen.insert(action.clone()))
        .take(limit);
    actions.extend(steps);
    actions
}

fn default_currency() -> String {
    "USD".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Side, Status};
    use chrono::Utc;

    fn reading(id: &str, value: f64, status: Status, side: Option<Side>) -> (ParameterId, ParameterAssessment) {
        (
            ParameterId::from(id),
            ParameterAssessment {
                parameter_id: ParameterId::from(id),
                label: id.to_string(),
                unit: String::new(),
                value,
                observed_at: Utc::now(),
                status,
                side,
            },
        )
    }

    fn rules() -> Vec<PredictiveRule> {
        serde_yaml::from_str(
            r#"
- id: battery-wear
  component: Batteries
  conditions:
    - { kind: above, parameter: battery_voltage, value: 22 }
    - { kind: below, parameter: battery_voltage, value: 24.5 }
  timeframe: 1-3 months
  probability: 80
  preventive_action: Load-test and replace the starter batteries
  cost_if_ignored: 400
- id: cooling-decline
  component: Cooling System
  conditions:
    - { kind: status, parameter: coolant_temp, status: warning, side: high }
  timeframe: 1-2 months
  probability: 60
  preventive_action: Service the cooling system
  cost_if_ignored: 1200
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_rules_fire_on_matching_readings() {
        let readings: BTreeMap<_, _> = [
            reading("battery_voltage", 23.1, Status::Warning, Some(Side::Low)),
            reading("coolant_temp", 97.0, Status::Warning, Some(Side::High)),
        ]
        .into_iter()
        .collect();

        let predicted = predict(&rules(), &readings);
        let ids: Vec<_> = predicted.iter().map(|p| p.rule_id.as_str()).collect();
        assert_eq!(ids, ["battery-wear", "cooling-decline"]);
        assert_eq!(predicted[0].evidence[&ParameterId::from("battery_voltage")], 23.1);
        assert_eq!(predicted[0].currency, "USD");

        let tasks = schedule(&predicted);
        assert_eq!(tasks[0].priority, MaintenancePriority::Critical);
        assert_eq!(tasks[1].priority, MaintenancePriority::High);
        assert_eq!(tasks[1].due_in, "1-2 months");
    }

    #[test]
    fn test_missing_reading_never_fires() {
        let readings: BTreeMap<_, _> = [reading("battery_voltage", 27.0, Status::Normal, None)]
            .into_iter()
            .collect();
        assert!(predict(&rules(), &readings).is_empty());
        assert!(predict(&rules(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_priority_thresholds() {
        assert_eq!(MaintenancePriority::from_probability(71), MaintenancePriority::Critical);
        assert_eq!(MaintenancePriority::from_probability(70), MaintenancePriority::High);
        assert_eq!(MaintenancePriority::from_probability(50), MaintenancePriority::Medium);
    }
}
