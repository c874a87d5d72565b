// src/alarms.rs - Alarm lifecycle per session
//
// Each open fault moves through
//
//   raised -> acknowledged -> reset_pending -> cleared
//
// with re-escalation back to raised whenever severity rises, and a failed
// reset returning the alarm to raised. Cleared alarms are archived together
// with the reason they cleared.

use crate::config::AlarmConfig;
use crate::diagnosis::{Assessment, ConditionContext, TriggerState};
use crate::error::{OracleError, Result};
use crate::fault::{FaultCode, Severity};
use crate::ids::{FaultCodeId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==========================================
// SECTION 1: ALARM DATA STRUCTURES
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    /// Trigger fired, awaiting acknowledgement
    Raised,
    /// Seen by a technician
    Acknowledged,
    /// A reset pathway is executable, or a reset is awaiting confirmation
    ResetPending,
    /// Terminal
    Cleared,
}

impl AlarmState {
    pub fn as_str(self) -> &'static str {
        match self {
            AlarmState::Raised => "raised",
            AlarmState::Acknowledged => "acknowledged",
            AlarmState::ResetPending => "reset_pending",
            AlarmState::Cleared => "cleared",
        }
    }
}

/// Why an alarm left the open set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    /// Success indicator confirmed after a reset
    Verified,
    /// Session ended with the alarm still open; says nothing about the fault
    SessionEnded,
}

/// An executed reset awaiting its success indicator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetAttempt {
    pub pathway_id: String,
    pub attempted_at: DateTime<Utc>,
    pub severity_before: Severity,
}

/// Runtime alarm instance for one fault code in one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmInstance {
    pub id: Uuid,
    pub session_id: SessionId,
    pub fault_code: FaultCodeId,
    pub title: String,
    pub raised_at: DateTime<Utc>,
    pub severity: Severity,
    pub state: AlarmState,
    pub last_transition: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Instants at which severity increased
    pub escalations: Vec<DateTime<Utc>>,
    /// Pathways whose required conditions held at the last evaluation
    pub ready_pathways: Vec<String>,
    pub reset_attempt: Option<ResetAttempt>,
    pub failed_resets: u32,
    pub cleared_at: Option<DateTime<Utc>>,
    pub clear_reason: Option<ClearReason>,
}

impl AlarmInstance {
    fn new(session_id: &SessionId, fault: &FaultCode, severity: Severity, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.clone(),
            fault_code: fault.code.clone(),
            title: fault.title.clone(),
            raised_at: now,
            severity,
            state: AlarmState::Raised,
            last_transition: now,
            acknowledged_at: None,
            escalations: Vec::new(),
            ready_pathways: Vec::new(),
            reset_attempt: None,
            failed_resets: 0,
            cleared_at: None,
            clear_reason: None,
        }
    }

    /// Reset executed and awaiting confirmation
    pub fn reset_in_flight(&self) -> bool {
        self.reset_attempt.is_some()
    }

    fn transition(&mut self, to: AlarmState, kind: TransitionKind, at: DateTime<Utc>) -> AlarmTransition {
        let from = self.state;
        self.state = to;
        self.last_transition = at;
        AlarmTransition {
            alarm_id: self.id,
            session_id: self.session_id.clone(),
            fault_code: self.fault_code.clone(),
            at,
            from: Some(from),
            to,
            severity: self.severity,
            kind,
        }
    }
}

/// What caused a transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    Raised,
    Escalated { from: Severity, to: Severity },
    Acknowledged,
    ResetReady { pathways: Vec<String> },
    ResetWithdrawn { reason: String },
    ResetAttempted { pathway_id: String },
    ResetFailed { pathway_id: String, reason: String },
    Cleared { reason: ClearReason },
}

/// One recorded lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmTransition {
    pub alarm_id: Uuid,
    pub session_id: SessionId,
    pub fault_code: FaultCodeId,
    pub at: DateTime<Utc>,
    /// `None` when the alarm was created by this transition
    pub from: Option<AlarmState>,
    pub to: AlarmState,
    pub severity: Severity,
    pub kind: TransitionKind,
}

// ==========================================
// SECTION 2: ALARM BOOK
// ==========================================

/// Alarm state for one session.
///
/// The owning session serializes access, so the book itself is a plain
/// single-writer structure. Every transition is appended to the bounded
/// history and to an outbox drained with [`AlarmBook::take_transitions`].
#[derive(Debug)]
pub struct AlarmBook {
    session_id: SessionId,
    config: AlarmConfig,
    open: BTreeMap<FaultCodeId, AlarmInstance>,
    archive: VecDeque<AlarmInstance>,
    history: VecDeque<AlarmTransition>,
    outbox: Vec<AlarmTransition>,
}

impl AlarmBook {
    pub fn new(session_id: SessionId, config: AlarmConfig) -> Self {
        Self {
            session_id,
            config,
            open: BTreeMap::new(),
            archive: VecDeque::new(),
            history: VecDeque::new(),
            outbox: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn get(&self, code: &str) -> Option<&AlarmInstance> {
        self.open.get(code)
    }

    pub fn open_alarms(&self) -> impl Iterator<Item = &AlarmInstance> {
        self.open.values()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Cleared alarms, oldest first
    pub fn archive(&self) -> impl Iterator<Item = &AlarmInstance> {
        self.archive.iter()
    }

    /// Most recent `limit` transitions, oldest first
    pub fn history(&self, limit: usize) -> Vec<AlarmTransition> {
        let start = self.history.len().saturating_sub(limit);
        self.history.iter().skip(start).cloned().collect()
    }

    /// Transitions recorded since the last call
    pub fn take_transitions(&mut self) -> Vec<AlarmTransition> {
        std::mem::take(&mut self.outbox)
    }

    fn log(&mut self, transition: AlarmTransition) {
        info!(
            "Alarm {} [{}]: {} -> {} ({:?})",
            transition.fault_code,
            transition.session_id,
            transition.from.map_or("none", AlarmState::as_str),
            transition.to.as_str(),
            transition.kind
        );
        self.history.push_back(transition.clone());
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        self.outbox.push(transition);
    }

    fn archive_alarm(&mut self, alarm: AlarmInstance) {
        self.archive.push_back(alarm);
        while self.archive.len() > self.config.archive_limit {
            self.archive.pop_front();
        }
    }

    /// Bring open alarms in line with a fresh assessment.
    ///
    /// `ctx` must describe the same instant as the assessment.
    pub fn reconcile(&mut self, assessment: &Assessment, ctx: &ConditionContext<'_>, firmware: &str) {
        let now = ctx.now;

        // Raise
        for (code, state) in &assessment.triggers {
            if *state != TriggerState::Holds || self.open.contains_key(code) {
                continue;
            }
            let Some(fault) = ctx.kb.faults.get(code.as_str()) else {
                continue;
            };
            let severity = assessment
                .candidate(code.as_str())
                .map_or(fault.severity, |c| c.severity);
            let alarm = AlarmInstance::new(&self.session_id, fault, severity, now);
            let transition = AlarmTransition {
                alarm_id: alarm.id,
                session_id: self.session_id.clone(),
                fault_code: code.clone(),
                at: now,
                from: None,
                to: AlarmState::Raised,
                severity,
                kind: TransitionKind::Raised,
            };
            self.open.insert(code.clone(), alarm);
            self.log(transition);

            #[cfg(feature = "metrics")]
            metrics::counter!("genoracle_alarms_raised_total").increment(1);
        }

        // Advance
        let codes: Vec<FaultCodeId> = self.open.keys().cloned().collect();
        for code in codes {
            let Some(fault) = ctx.kb.faults.get(code.as_str()) else {
                continue;
            };
            let trigger = assessment
                .trigger_state(code.as_str())
                .unwrap_or(TriggerState::Indeterminate);
            let observed = assessment.candidate(code.as_str()).map(|c| c.severity);

            let mut transitions = Vec::new();
            let mut cleared = false;
            let Some(alarm) = self.open.get_mut(&code) else {
                continue;
            };

            if let Some(attempt) = alarm.reset_attempt.clone() {
                let pathway = fault.pathway(&attempt.pathway_id);
                // A trigger that still holds fails the reset whatever the indicator says
                let confirmed = trigger != TriggerState::Holds
                    && pathway
                        .map_or(false, |p| ctx.holds_since(&p.success_indicator, Some(attempt.attempted_at)));

                if confirmed {
                    alarm.reset_attempt = None;
                    alarm.ready_pathways.clear();
                    alarm.cleared_at = Some(now);
                    alarm.clear_reason = Some(ClearReason::Verified);
                    transitions.push(alarm.transition(
                        AlarmState::Cleared,
                        TransitionKind::Cleared {
                            reason: ClearReason::Verified,
                        },
                        now,
                    ));
                    cleared = true;
                } else {
                    let reason = if trigger == TriggerState::Holds {
                        Some("trigger returned".to_string())
                    } else if now - attempt.attempted_at >= self.config.reset_confirmation() {
                        Some(format!(
                            "success indicator not confirmed within {}s",
                            self.config.reset_confirmation_secs
                        ))
                    } else {
                        None
                    };
                    if let Some(reason) = reason {
                        alarm.reset_attempt = None;
                        alarm.ready_pathways.clear();
                        alarm.acknowledged_at = None;
                        alarm.failed_resets += 1;
                        alarm.severity = alarm
                            .severity
                            .max(attempt.severity_before)
                            .max(observed.unwrap_or(Severity::Info));
                        warn!("Reset {} for {} failed: {}", attempt.pathway_id, code, reason);
                        transitions.push(alarm.transition(
                            AlarmState::Raised,
                            TransitionKind::ResetFailed {
                                pathway_id: attempt.pathway_id.clone(),
                                reason,
                            },
                            now,
                        ));
                    }
                }
            } else if trigger == TriggerState::Holds {
                match observed {
                    Some(severity) if severity > alarm.severity => {
                        let from = alarm.severity;
                        alarm.severity = severity;
                        alarm.escalations.push(now);
                        alarm.acknowledged_at = None;
                        alarm.ready_pathways.clear();
                        transitions.push(alarm.transition(
                            AlarmState::Raised,
                            TransitionKind::Escalated { from, to: severity },
                            now,
                        ));
                    }
                    _ if alarm.state == AlarmState::ResetPending => {
                        alarm.ready_pathways.clear();
                        transitions.push(alarm.transition(
                            AlarmState::Acknowledged,
                            TransitionKind::ResetWithdrawn {
                                reason: "trigger active".to_string(),
                            },
                            now,
                        ));
                    }
                    _ => {}
                }
            } else if matches!(alarm.state, AlarmState::Acknowledged | AlarmState::ResetPending) {
                let ready: Vec<String> = if trigger == TriggerState::Cleared {
                    fault
                        .available_pathways(ctx.profile, firmware)
                        .filter(|p| ctx.all_hold(&p.required_conditions))
                        .map(|p| p.id.clone())
                        .collect()
                } else {
                    Vec::new()
                };

                match (alarm.state, ready.is_empty()) {
                    (AlarmState::Acknowledged, false) => {
                        alarm.ready_pathways = ready.clone();
                        transitions.push(alarm.transition(
                            AlarmState::ResetPending,
                            TransitionKind::ResetReady { pathways: ready },
                            now,
                        ));
                    }
                    (AlarmState::ResetPending, true) => {
                        alarm.ready_pathways.clear();
                        transitions.push(alarm.transition(
                            AlarmState::Acknowledged,
                            TransitionKind::ResetWithdrawn {
                                reason: "no executable pathway".to_string(),
                            },
                            now,
                        ));
                    }
                    (AlarmState::ResetPending, false) => alarm.ready_pathways = ready,
                    _ => {}
                }
            }

            if cleared {
                if let Some(alarm) = self.open.remove(&code) {
                    self.archive_alarm(alarm);
                }
                #[cfg(feature = "metrics")]
                metrics::counter!("genoracle_alarms_cleared_total").increment(1);
            }
            for t in transitions {
                self.log(t);
            }
        }
    }

    /// Technician acknowledgement; only valid from `raised`
    pub fn acknowledge(&mut self, code: &str, now: DateTime<Utc>) -> Result<AlarmInstance> {
        let alarm = self.open.get_mut(code).ok_or_else(|| OracleError::AlarmNotFound {
            session: self.session_id.to_string(),
            code: code.to_string(),
        })?;
        if alarm.state != AlarmState::Raised {
            return Err(OracleError::InvalidTransition {
                code: code.to_string(),
                action: "acknowledge",
                state: alarm.state.as_str(),
            });
        }

        alarm.acknowledged_at = Some(now);
        let transition = alarm.transition(AlarmState::Acknowledged, TransitionKind::Acknowledged, now);
        let snapshot = alarm.clone();
        self.log(transition);
        Ok(snapshot)
    }

    /// Execute a reset pathway.
    ///
    /// The trigger and the pathway's required conditions are checked again
    /// at this instant. A refused reset leaves the alarm acknowledged.
    pub fn attempt_reset(
        &mut self,
        code: &str,
        pathway_id: &str,
        trigger: Option<TriggerState>,
        ctx: &ConditionContext<'_>,
        firmware: &str,
    ) -> Result<AlarmInstance> {
        let now = ctx.now;
        let alarm = self.open.get_mut(code).ok_or_else(|| OracleError::AlarmNotFound {
            session: self.session_id.to_string(),
            code: code.to_string(),
        })?;

        let resettable = matches!(alarm.state, AlarmState::Acknowledged | AlarmState::ResetPending)
            && !alarm.reset_in_flight();
        if !resettable {
            return Err(OracleError::InvalidTransition {
                code: code.to_string(),
                action: "attempt_reset",
                state: alarm.state.as_str(),
            });
        }

        let fault = ctx
            .kb
            .faults
            .get(code)
            .ok_or_else(|| OracleError::UnknownFaultCode(code.to_string()))?;
        let pathway = fault.pathway(pathway_id).ok_or_else(|| OracleError::UnknownPathway {
            code: code.to_string(),
            pathway: pathway_id.to_string(),
        })?;

        let refusal = if !pathway.is_available(ctx.profile, firmware) {
            Some(format!(
                "{} reset is not offered by {} firmware {}",
                pathway.method, ctx.profile.id, firmware
            ))
        } else if trigger != Some(TriggerState::Cleared) {
            Some(match trigger {
                Some(TriggerState::Holds) => "fault trigger is still active".to_string(),
                _ => "fault trigger cannot be confirmed clear from current readings".to_string(),
            })
        } else {
            pathway
                .required_conditions
                .iter()
                .find(|c| !ctx.holds(c))
                .map(|c| format!("required condition not met: {}", c))
        };

        if let Some(reason) = refusal {
            debug!("Reset {} for {} refused: {}", pathway_id, code, reason);
            let transition = if alarm.state == AlarmState::ResetPending {
                alarm.ready_pathways.clear();
                Some(alarm.transition(
                    AlarmState::Acknowledged,
                    TransitionKind::ResetWithdrawn { reason: reason.clone() },
                    now,
                ))
            } else {
                None
            };
            if let Some(t) = transition {
                self.log(t);
            }
            return Err(OracleError::PreconditionNotMet {
                code: code.to_string(),
                pathway: pathway_id.to_string(),
                reason,
            });
        }

        alarm.reset_attempt = Some(ResetAttempt {
            pathway_id: pathway_id.to_string(),
            attempted_at: now,
            severity_before: alarm.severity,
        });
        alarm.ready_pathways = vec![pathway_id.to_string()];
        let transition = alarm.transition(
            AlarmState::ResetPending,
            TransitionKind::ResetAttempted {
                pathway_id: pathway_id.to_string(),
            },
            now,
        );
        let snapshot = alarm.clone();
        self.log(transition);
        Ok(snapshot)
    }

    /// Archive every open alarm as ended with the session
    pub fn end_session(&mut self, now: DateTime<Utc>) -> usize {
        let open = std::mem::take(&mut self.open);
        let count = open.len();
        for (_, mut alarm) in open {
            alarm.reset_attempt = None;
            alarm.cleared_at = Some(now);
            alarm.clear_reason = Some(ClearReason::SessionEnded);
            let transition = alarm.transition(
                AlarmState::Cleared,
                TransitionKind::Cleared {
                    reason: ClearReason::SessionEnded,
                },
                now,
            );
            self.archive_alarm(alarm);
            self.log(transition);
        }
        count
    }
}
