//! Fault rule base: fault codes, their triggers and the repair guidance
//! attached to them.

use crate::classifier::{RequiredStatus, Side, Status};
use crate::config::duration_secs;
use crate::controller::{ControllerProfile, ResetMethod, ANY_FIRMWARE};
use crate::ids::{ControllerId, FaultCodeId, ParameterId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// SEVERITY & CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Severity implied by an observed status, if any
    pub fn from_status(status: Status) -> Option<Severity> {
        match status {
            Status::Warning => Some(Severity::Warning),
            Status::Critical => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    Engine,
    Lubrication,
    Cooling,
    Fuel,
    Electrical,
    Battery,
    Load,
    Control,
    Safety,
    /// Faults of the measurement chain rather than the machine
    Sensor,
}

// ============================================================================
// TRIGGERS & CONDITIONS
// ============================================================================

/// One AND-combined term of a fault trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub parameter: ParameterId,
    pub status: RequiredStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

/// Predicate over current readings, used by reset pathways
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Parameter classified in a status for at least `held_for_secs`
    Status {
        parameter: ParameterId,
        status: RequiredStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side: Option<Side>,
        #[serde(default)]
        held_for_secs: u64,
    },
    /// Raw value strictly below a threshold for at least `held_for_secs`
    Below {
        parameter: ParameterId,
        value: f64,
        #[serde(default)]
        held_for_secs: u64,
    },
    /// Raw value strictly above a threshold for at least `held_for_secs`
    Above {
        parameter: ParameterId,
        value: f64,
        #[serde(default)]
        held_for_secs: u64,
    },
}

impl Condition {
    pub fn parameter(&self) -> &ParameterId {
        match self {
            Condition::Status { parameter, .. }
            | Condition::Below { parameter, .. }
            | Condition::Above { parameter, .. } => parameter,
        }
    }

    pub fn held_for(&self) -> chrono::Duration {
        duration_secs(self.held_for_secs())
    }

    pub fn held_for_secs(&self) -> u64 {
        match self {
            Condition::Status { held_for_secs, .. }
            | Condition::Below { held_for_secs, .. }
            | Condition::Above { held_for_secs, .. } => *held_for_secs,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Status { parameter, status, side, held_for_secs } => {
                write!(f, "{} {:?}", parameter, status)?;
                if let Some(side) = side {
                    write!(f, " ({:?})", side)?;
                }
                if *held_for_secs > 0 {
                    write!(f, " for {}s", held_for_secs)?;
                }
                Ok(())
            }
            Condition::Below { parameter, value, held_for_secs } => {
                write!(f, "{} < {}", parameter, value)?;
                if *held_for_secs > 0 {
                    write!(f, " for {}s", held_for_secs)?;
                }
                Ok(())
            }
            Condition::Above { parameter, value, held_for_secs } => {
                write!(f, "{} > {}", parameter, value)?;
                if *held_for_secs > 0 {
                    write!(f, " for {}s", held_for_secs)?;
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// GUIDANCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Likelihood {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cause {
    pub description: String,
    pub likelihood: Likelihood,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticStep {
    pub action: String,
    pub expected_result: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionTier {
    Easy,
    Moderate,
    Advanced,
    Expert,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeEstimate {
    pub min_minutes: u32,
    pub max_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub min: f64,
    pub max: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub tier: SolutionTier,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub parts: Vec<String>,
    pub time_estimate: TimeEstimate,
    pub cost: CostEstimate,
}

// ============================================================================
// RESET PATHWAYS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetPathway {
    pub id: String,
    pub method: ResetMethod,
    /// Firmware versions this pathway applies to (empty = any)
    #[serde(default)]
    pub applicable_firmware: Vec<String>,
    #[serde(default)]
    pub required_conditions: Vec<Condition>,
    pub steps: Vec<String>,
    pub success_indicator: Condition,
}

impl ResetPathway {
    pub fn applies_to_firmware(&self, version: &str) -> bool {
        self.applicable_firmware.is_empty()
            || self
                .applicable_firmware
                .iter()
                .any(|fw| fw == version || fw == ANY_FIRMWARE)
    }

    /// Pathway applies to the firmware and the firmware offers its method
    pub fn is_available(&self, profile: &ControllerProfile, firmware: &str) -> bool {
        self.applies_to_firmware(firmware) && profile.reset_methods(firmware).contains(&self.method)
    }
}

// ============================================================================
// FAULT CODE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultCode {
    pub code: FaultCodeId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Controllers this code applies to (empty = all)
    #[serde(default)]
    pub applicable_controllers: BTreeSet<ControllerId>,
    pub category: FaultCategory,
    pub severity: Severity,
    pub trigger: Vec<TriggerCondition>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub causes: Vec<Cause>,
    #[serde(default)]
    pub diagnostic_steps: Vec<DiagnosticStep>,
    #[serde(default)]
    pub solutions: Vec<Solution>,
    #[serde(default)]
    pub safety_warnings: Vec<String>,
    #[serde(default)]
    pub preventive_measures: Vec<String>,
    #[serde(default)]
    pub reset_pathways: Vec<ResetPathway>,
}

impl FaultCode {
    /// Applicable when the controller is listed (or none are) and the
    /// controller exposes every trigger parameter
    pub fn applies_to(&self, profile: &ControllerProfile) -> bool {
        (self.applicable_controllers.is_empty() || self.applicable_controllers.contains(&profile.id))
            && self.trigger.iter().all(|c| profile.supports(c.parameter.as_str()))
    }

    pub fn is_sensor_fault(&self) -> bool {
        self.category == FaultCategory::Sensor
    }

    pub fn pathway(&self, id: &str) -> Option<&ResetPathway> {
        self.reset_pathways.iter().find(|p| p.id == id)
    }

    pub fn available_pathways<'a>(
        &'a self,
        profile: &'a ControllerProfile,
        firmware: &'a str,
    ) -> impl Iterator<Item = &'a ResetPathway> + 'a {
        self.reset_pathways
            .iter()
            .filter(move |p| p.is_available(profile, firmware))
    }

    /// Causes ordered most likely first, keeping catalog order within a level
    pub fn causes_by_likelihood(&self) -> Vec<&Cause> {
        let mut causes: Vec<&Cause> = self.causes.iter().collect();
        causes.sort_by_key(|c| c.likelihood);
        causes
    }

    /// Solutions ordered easiest first
    pub fn solutions_by_tier(&self) -> Vec<&Solution> {
        let mut solutions: Vec<&Solution> = self.solutions.iter().collect();
        solutions.sort_by_key(|s| s.tier);
        solutions
    }

    /// Solutions a technician of the given tier can carry out
    pub fn solutions_up_to(&self, tier: SolutionTier) -> Vec<&Solution> {
        self.solutions_by_tier()
            .into_iter()
            .filter(|s| s.tier <= tier)
            .collect()
    }

    pub fn cheapest_solution(&self) -> Option<&Solution> {
        self.solutions
            .iter()
            .min_by(|a, b| a.cost.min.total_cmp(&b.cost.min).then(a.tier.cmp(&b.tier)))
    }
}

/// Immutable fault catalog keyed by code
#[derive(Debug, Clone, Default)]
pub struct FaultCatalog {
    faults: BTreeMap<FaultCodeId, FaultCode>,
}

impl FaultCatalog {
    pub(crate) fn from_codes(codes: impl IntoIterator<Item = FaultCode>) -> Self {
        Self {
            faults: codes.into_iter().map(|f| (f.code.clone(), f)).collect(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&FaultCode> {
        self.faults.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.faults.contains_key(code)
    }

    /// All codes in lexical order
    pub fn iter(&self) -> impl Iterator<Item = &FaultCode> {
        self.faults.values()
    }

    pub fn applicable_to<'a>(
        &'a self,
        profile: &'a ControllerProfile,
    ) -> impl Iterator<Item = &'a FaultCode> + 'a {
        self.faults.values().filter(move |f| f.applies_to(profile))
    }

    pub fn by_category(&self, category: FaultCategory) -> impl Iterator<Item = &FaultCode> {
        self.faults.values().filter(move |f| f.category == category)
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{DisplayConventions, FirmwareSupport};

    fn profile() -> ControllerProfile {
        ControllerProfile {
            id: ControllerId::from("dse-7320"),
            manufacturer: "DSE".into(),
            model: "7320 MKII".into(),
            description: String::new(),
            parameter_ids: ["oil_pressure", "coolant_temp", "rpm"]
                .into_iter()
                .map(ParameterId::from)
                .collect(),
            firmware: vec![
                FirmwareSupport {
                    version: "V7".into(),
                    reset_methods: vec![ResetMethod::Keypad],
                },
                FirmwareSupport {
                    version: "V8".into(),
                    reset_methods: vec![ResetMethod::Keypad, ResetMethod::Software],
                },
            ],
            threshold_overrides: Default::default(),
            display: DisplayConventions::default(),
        }
    }

    fn solution(tier: SolutionTier, min_cost: f64) -> Solution {
        Solution {
            tier,
            title: format!("{:?}", tier),
            steps: vec![],
            tools: vec![],
            parts: vec![],
            time_estimate: TimeEstimate { min_minutes: 10, max_minutes: 30 },
            cost: CostEstimate { min: min_cost, max: min_cost * 2.0, currency: "USD".into() },
        }
    }

    fn fault_yaml() -> &'static str {
        r#"
code: DSE-101
title: Low Oil Pressure Shutdown
applicable_controllers: [dse-7320]
category: lubrication
severity: critical
trigger:
  - { parameter: oil_pressure, status: critical, side: low }
causes:
  - { description: Oil sender failure, likelihood: medium }
  - { description: Low oil level, likelihood: high, verification: Check dipstick }
reset_pathways:
  - id: keypad-reset
    method: keypad
    required_conditions:
      - { kind: below, parameter: rpm, value: 1.0 }
    steps: [Press and hold RESET for 3 seconds]
    success_indicator: { kind: status, parameter: oil_pressure, status: normal, held_for_secs: 10 }
  - id: remote-reset
    method: software
    applicable_firmware: [V8]
    steps: [Send reset from the SCADA link]
    success_indicator: { kind: status, parameter: oil_pressure, status: normal }
"#
    }

    #[test]
    fn test_fault_yaml_shape() {
        let fault: FaultCode = serde_yaml::from_str(fault_yaml()).unwrap();
        assert_eq!(fault.severity, Severity::Critical);
        assert_eq!(fault.trigger[0].side, Some(Side::Low));
        let keypad = fault.pathway("keypad-reset").unwrap();
        assert_eq!(keypad.required_conditions[0].parameter().as_str(), "rpm");
        assert_eq!(keypad.success_indicator.held_for(), chrono::Duration::seconds(10));
        assert_eq!(keypad.success_indicator.to_string(), "oil_pressure Normal for 10s");
    }

    #[test]
    fn test_applicability_requires_listed_controller_and_parameters() {
        let mut fault: FaultCode = serde_yaml::from_str(fault_yaml()).unwrap();
        let profile = profile();
        assert!(fault.applies_to(&profile));

        fault.applicable_controllers.clear();
        assert!(fault.applies_to(&profile));

        fault.trigger.push(TriggerCondition {
            parameter: ParameterId::from("fuel_level"),
            status: RequiredStatus::Warning,
            side: None,
        });
        assert!(!fault.applies_to(&profile));
    }

    #[test]
    fn test_available_pathways_follow_firmware() {
        let fault: FaultCode = serde_yaml::from_str(fault_yaml()).unwrap();
        let profile = profile();
        let v7: Vec<_> = fault.available_pathways(&profile, "V7").map(|p| p.id.as_str()).collect();
        assert_eq!(v7, vec!["keypad-reset"]);
        let v8: Vec<_> = fault.available_pathways(&profile, "V8").map(|p| p.id.as_str()).collect();
        assert_eq!(v8, vec!["keypad-reset", "remote-reset"]);
    }

    #[test]
    fn test_causes_ordered_by_likelihood() {
        let fault: FaultCode = serde_yaml::from_str(fault_yaml()).unwrap();
        let causes = fault.causes_by_likelihood();
        assert_eq!(causes[0].description, "Low oil level");
    }

    #[test]
    fn test_solution_ordering_helpers() {
        let mut fault: FaultCode = serde_yaml::from_str(fault_yaml()).unwrap();
        fault.solutions = vec![
            solution(SolutionTier::Expert, 800.0),
            solution(SolutionTier::Easy, 0.0),
            solution(SolutionTier::Advanced, 150.0),
        ];
        let tiers: Vec<_> = fault.solutions_by_tier().iter().map(|s| s.tier).collect();
        assert_eq!(tiers, vec![SolutionTier::Easy, SolutionTier::Advanced, SolutionTier::Expert]);
        assert_eq!(fault.solutions_up_to(SolutionTier::Moderate).len(), 1);
        assert_eq!(fault.cheapest_solution().unwrap().tier, SolutionTier::Easy);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(Severity::from_status(Status::Critical), Some(Severity::Critical));
        assert_eq!(Severity::from_status(Status::SensorFault), None);
    }
}
