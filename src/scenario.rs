// src/scenario.rs - Scripted sessions for replay
//
// A scenario fixes a controller and firmware, then lists timed steps. Each
// step may carry readings and a list of actions executed at that instant:
//
//   controller: dse-7320
//   firmware: V7
//   start: 2026-03-01T12:00:00Z
//   steps:
//     - at: 0
//       readings: { oil_pressure: 22, rpm: 1500 }
//       actions: [evaluate]
//     - at: 1
//       actions:
//         - acknowledge: { fault: DSE-100 }

use crate::alarms::AlarmInstance;
use crate::diagnosis::DiagnosisResult;
use crate::error::{OracleError, Result};
use crate::feedback::{FeedbackRecord, Outcome};
use crate::oracle::Oracle;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_session")]
    pub session: String,
    pub controller: String,
    pub firmware: String,
    /// Instant that step offsets are relative to; defaults to load time
    #[serde(default = "default_start")]
    pub start: DateTime<Utc>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Seconds after `start`
    pub at: u64,
    #[serde(default)]
    pub readings: BTreeMap<String, f64>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Diagnose,
    Evaluate,
    Acknowledge { fault: String },
    Reset { fault: String, pathway: String },
    Feedback {
        fault: String,
        outcome: Outcome,
        #[serde(default)]
        notes: String,
    },
    /// Commit implicit feedback that is due
    Flush,
    EndSession,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Diagnose => "diagnose",
            Action::Evaluate => "evaluate",
            Action::Acknowledge { .. } => "acknowledge",
            Action::Reset { .. } => "reset",
            Action::Feedback { .. } => "feedback",
            Action::Flush => "flush",
            Action::EndSession => "end_session",
        }
    }
}

/// Outcome of one replayed action
#[derive(Debug, Clone, Serialize)]
pub struct ReplayEntry {
    pub at: DateTime<Utc>,
    pub action: &'static str,
    pub outcome: ReplayOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayOutcome {
    Diagnosis(DiagnosisResult),
    Alarm(AlarmInstance),
    Feedback(FeedbackRecord),
    Flushed { records: Vec<FeedbackRecord> },
    SessionEnded { archived_alarms: usize },
    /// Refused action; replay continues
    Error { message: String },
}

impl Scenario {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(text)?;
        for step in &scenario.steps {
            scenario.step_time(step)?;
        }
        Ok(scenario)
    }

    /// Absolute instant of a step
    pub fn step_time(&self, step: &Step) -> Result<DateTime<Utc>> {
        i64::try_from(step.at)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|offset| self.start.checked_add_signed(offset))
            .ok_or_else(|| OracleError::Scenario(format!("step offset {}s is out of range", step.at)))
    }

    /// Replay every step against `oracle`.
    ///
    /// Profile selection and readings must be valid for the knowledge base;
    /// refused actions are reported as [`ReplayOutcome::Error`] entries.
    pub fn replay(&self, oracle: &Oracle) -> Result<Vec<ReplayEntry>> {
        let session = self.session.as_str();
        oracle.open_session_with(session, self.start);
        oracle.select_controller_profile(session, &self.controller, &self.firmware)?;
        info!(
            "Replaying {} step(s) on {} firmware {}",
            self.steps.len(),
            self.controller,
            self.firmware
        );

        let mut entries = Vec::new();
        for step in &self.steps {
            let now = self.step_time(step)?;
            for (parameter, value) in &step.readings {
                oracle.set_reading(session, parameter, *value, now)?;
            }

            for action in &step.actions {
                debug!("t+{}s {}", step.at, action.name());
                let outcome = match action {
                    Action::Diagnose => oracle.diagnose_at(session, now).map(ReplayOutcome::Diagnosis),
                    Action::Evaluate => oracle.evaluate_at(session, now).map(ReplayOutcome::Diagnosis),
                    Action::Acknowledge { fault } => oracle
                        .acknowledge_at(session, fault, now)
                        .map(ReplayOutcome::Alarm),
                    Action::Reset { fault, pathway } => oracle
                        .attempt_reset_at(session, fault, pathway, now)
                        .map(ReplayOutcome::Alarm),
                    Action::Feedback { fault, outcome, notes } => oracle
                        .submit_feedback_for_session(session, fault, *outcome, notes, now)
                        .map(ReplayOutcome::Feedback),
                    Action::Flush => Ok(ReplayOutcome::Flushed {
                        records: oracle.flush_implicit(now),
                    }),
                    Action::EndSession => oracle
                        .end_session_at(session, now)
                        .map(|archived_alarms| ReplayOutcome::SessionEnded { archived_alarms }),
                };

                entries.push(ReplayEntry {
                    at: now,
                    action: action.name(),
                    outcome: outcome.unwrap_or_else(|e| ReplayOutcome::Error {
                        message: e.to_string(),
                    }),
                });
            }
        }
        Ok(entries)
    }
}

fn default_session() -> String {
    "replay".to_string()
}

fn default_start() -> DateTime<Utc> {
    Utc::now()
}
