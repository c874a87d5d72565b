//! Knowledge base loading and integrity validation.
//!
//! The knowledge base bundles the parameter catalog, the controller registry
//! and the fault catalog. It is read once at startup. Any integrity problem
//! (duplicate codes, malformed bands, empty triggers, dangling references)
//! fails the load with [`OracleError::CatalogIntegrity`], listing every
//! problem found.

use crate::config::MAX_DURATION_SECS;
use crate::controller::{ControllerProfile, ControllerRegistry};
use crate::error::{OracleError, Result};
use crate::fault::{Condition, FaultCatalog, FaultCode};
use crate::parameter::{ParameterCatalog, ParameterDefinition};
use crate::predictive::PredictiveRule;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{error, info};

const BUILTIN_KNOWLEDGE_BASE: &str = include_str!("../data/knowledge_base.yaml");

/// Serialized form of a knowledge base
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    #[serde(default)]
    pub controllers: Vec<ControllerProfile>,
    #[serde(default)]
    pub faults: Vec<FaultCode>,
    #[serde(default)]
    pub predictive_rules: Vec<PredictiveRule>,
}

/// Validated, read-only knowledge base
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub version: String,
    pub parameters: ParameterCatalog,
    pub controllers: ControllerRegistry,
    pub faults: FaultCatalog,
    pub predictive_rules: Vec<PredictiveRule>,
}

impl KnowledgeBase {
    /// Knowledge base compiled into the crate
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_KNOWLEDGE_BASE)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let document: KnowledgeDocument = serde_yaml::from_str(text)?;
        Self::from_document(document)
    }

    pub fn from_document(document: KnowledgeDocument) -> Result<Self> {
        let problems = integrity_problems(&document);
        if !problems.is_empty() {
            for problem in &problems {
                error!("Knowledge base integrity: {}", problem);
            }
            return Err(OracleError::CatalogIntegrity(problems));
        }

        info!(
            "Loaded knowledge base {} ({} parameters, {} controllers, {} fault codes, {} predictive rules)",
            if document.version.is_empty() { "unversioned" } else { document.version.as_str() },
            document.parameters.len(),
            document.controllers.len(),
            document.faults.len(),
            document.predictive_rules.len()
        );

        Ok(Self {
            version: document.version,
            parameters: ParameterCatalog::from_definitions(document.parameters),
            controllers: ControllerRegistry::from_profiles(document.controllers),
            faults: FaultCatalog::from_codes(document.faults),
            predictive_rules: document.predictive_rules,
        })
    }
}

/// Every integrity problem in a document; empty when the document is sound
pub fn integrity_problems(doc: &KnowledgeDocument) -> Vec<String> {
    let mut problems = Vec::new();

    // Parameters
    let mut parameter_ids = HashSet::new();
    for def in &doc.parameters {
        if !parameter_ids.insert(def.id.as_str()) {
            problems.push(format!("duplicate parameter {}", def.id));
        }
        if let Err(e) = def.bands.check() {
            problems.push(format!("parameter {} has malformed bands: {}", def.id, e));
        }
        if let Some(margin) = def.plausibility_margin {
            if !(margin >= 0.0) {
                problems.push(format!("parameter {} has a negative plausibility margin", def.id));
            }
        }
    }

    // Controllers
    let mut controller_ids = HashSet::new();
    for profile in &doc.controllers {
        if !controller_ids.insert(profile.id.as_str()) {
            problems.push(format!("duplicate controller {}", profile.id));
        }
        if profile.parameter_ids.is_empty() {
            problems.push(format!("controller {} exposes no parameters", profile.id));
        }
        for id in &profile.parameter_ids {
            if !parameter_ids.contains(id.as_str()) {
                problems.push(format!("controller {} references unknown parameter {}", profile.id, id));
            }
        }
        if profile.firmware.is_empty() {
            problems.push(format!("controller {} lists no firmware versions", profile.id));
        }
        let mut versions = HashSet::new();
        for fw in &profile.firmware {
            if !versions.insert(fw.version.as_str()) {
                problems.push(format!("controller {} lists firmware {} twice", profile.id, fw.version));
            }
        }
        for (id, bands) in &profile.threshold_overrides {
            if !profile.parameter_ids.contains(id) {
                problems.push(format!(
                    "controller {} overrides parameter {} it does not expose",
                    profile.id, id
                ));
            }
            if let Err(e) = bands.check() {
                problems.push(format!("controller {} override for {} is malformed: {}", profile.id, id, e));
            }
        }
    }

    // Faults
    let mut codes = HashSet::new();
    for fault in &doc.faults {
        let code = &fault.code;
        if code.as_str().trim().is_empty() {
            problems.push("fault with an empty code".to_string());
        }
        if !codes.insert(code.as_str()) {
            problems.push(format!("duplicate fault code {}", code));
        }
        if fault.trigger.is_empty() {
            problems.push(format!("fault {} has an empty trigger", code));
        }
        let mut trigger_params = HashSet::new();
        for term in &fault.trigger {
            if !parameter_ids.contains(term.parameter.as_str()) {
                problems.push(format!("fault {} triggers on unknown parameter {}", code, term.parameter));
            }
            if !trigger_params.insert(term.parameter.as_str()) {
                problems.push(format!("fault {} lists parameter {} twice in its trigger", code, term.parameter));
            }
        }
        for controller in &fault.applicable_controllers {
            if !controller_ids.contains(controller.as_str()) {
                problems.push(format!("fault {} references unknown controller {}", code, controller));
            }
        }
        for solution in &fault.solutions {
            if solution.time_estimate.min_minutes > solution.time_estimate.max_minutes
                || solution.cost.min > solution.cost.max
            {
                problems.push(format!("fault {} solution '{}' has an inverted estimate", code, solution.title));
            }
        }

        let mut pathway_ids = HashSet::new();
        for pathway in &fault.reset_pathways {
            if !pathway_ids.insert(pathway.id.as_str()) {
                problems.push(format!("fault {} has duplicate reset pathway {}", code, pathway.id));
            }
            let conditions = pathway
                .required_conditions
                .iter()
                .chain(std::iter::once(&pathway.success_indicator));
            for condition in conditions {
                check_condition(code.as_str(), &pathway.id, condition, &parameter_ids, &mut problems);
            }
        }
    }

    // Predictive rules
    let mut rule_ids = HashSet::new();
    for rule in &doc.predictive_rules {
        if !rule_ids.insert(rule.id.as_str()) {
            problems.push(format!("duplicate predictive rule {}", rule.id));
        }
        if rule.conditions.is_empty() {
            problems.push(format!("predictive rule {} has no conditions", rule.id));
        }
        if rule.probability > 100 {
            problems.push(format!("predictive rule {} has probability above 100", rule.id));
        }
        if !(rule.cost_if_ignored.is_finite() && rule.cost_if_ignored >= 0.0) {
            problems.push(format!("predictive rule {} has an invalid cost", rule.id));
        }
        for condition in &rule.conditions {
            let parameter = condition.parameter();
            if !parameter_ids.contains(parameter.as_str()) {
                problems.push(format!("predictive rule {} references unknown parameter {}", rule.id, parameter));
            }
            // Rules see a single snapshot
            if condition.held_for_secs() > 0 {
                problems.push(format!("predictive rule {} uses a hold time on {}", rule.id, parameter));
            }
            if let Condition::Below { value, .. } | Condition::Above { value, .. } = condition {
                if !value.is_finite() {
                    problems.push(format!("predictive rule {} has a non-finite threshold", rule.id));
                }
            }
        }
    }

    problems
}

fn check_condition(
    code: &str,
    pathway: &str,
    condition: &Condition,
    parameter_ids: &HashSet<&str>,
    problems: &mut Vec<String>,
) {
    let parameter = condition.parameter();
    if !parameter_ids.contains(parameter.as_str()) {
        problems.push(format!(
            "fault {} pathway {} references unknown parameter {}",
            code, pathway, parameter
        ));
    }
    if condition.held_for_secs() > MAX_DURATION_SECS {
        problems.push(format!(
            "fault {} pathway {} holds {} for longer than {} seconds",
            code, pathway, parameter, MAX_DURATION_SECS
        ));
    }
    if let Condition::Below { value, .. } | Condition::Above { value, .. } = condition {
        if !value.is_finite() {
            problems.push(format!("fault {} pathway {} has a non-finite threshold", code, pathway));
        }
    }
}
