// src/oracle.rs - Session-facing diagnosis service
//
// Readings flow in through `set_reading`, `diagnose` ranks fault codes for a
// snapshot, `evaluate` additionally reconciles the session's alarms, and
// technician actions (`acknowledge`, `attempt_reset`, `submit_feedback`)
// close the loop back into the feedback weights.

use crate::alarms::{AlarmInstance, AlarmTransition, ClearReason, TransitionKind};
use crate::classifier::{Classification, Classifier};
use crate::config::OracleConfig;
use crate::controller::ControllerProfile;
use crate::diagnosis::{ConditionContext, DiagnosisEngine, DiagnosisResult};
use crate::error::{OracleError, Result};
use crate::fault::FaultCode;
use crate::feedback::{FeedbackRecord, FeedbackStore, Outcome, PendingFeedback};
use crate::ids::{FaultCodeId, ParameterId, SessionId};
use crate::knowledge::KnowledgeBase;
use crate::readings::{Reading, ReadingSnapshot};
use crate::session::{ProfileSelection, Session};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Notifications published on the optional event channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OracleEvent {
    SessionOpened { session_id: SessionId },
    SessionEnded { session_id: SessionId, archived_alarms: usize },
    Alarm(AlarmTransition),
    Feedback(FeedbackRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleStats {
    pub knowledge_base_version: String,
    pub sessions_open: usize,
    pub sessions_closed: usize,
    pub open_alarms: usize,
    pub diagnoses: u64,
    pub feedback_records: usize,
    pub pending_implicit_feedback: usize,
}

/// The diagnosis oracle.
///
/// Cheap to share behind an [`Arc`]; every operation takes `&self`. Sessions
/// never share mutable state except through the feedback store.
///
/// # Examples
///
/// ```rust
/// use chrono::Utc;
/// use genoracle::{KnowledgeBase, Oracle, OracleConfig, Verdict};
///
/// let oracle = Oracle::new(OracleConfig::default(), KnowledgeBase::builtin()?)?;
/// let session = oracle.open_session();
/// oracle.select_controller_profile(&session, "dse-7320", "V7")?;
///
/// let result = oracle.diagnose(&session)?;
/// assert_eq!(result.verdict, Verdict::InsufficientData);
///
/// oracle.set_reading(&session, "emergency_stop", 1.0, Utc::now())?;
/// let result = oracle.diagnose(&session)?;
/// assert_eq!(result.verdict, Verdict::Confident);
/// assert_eq!(result.top().unwrap().code.as_str(), "DSE-201");
/// # Ok::<(), genoracle::OracleError>(())
/// ```
pub struct Oracle {
    config: OracleConfig,
    kb: Arc<KnowledgeBase>,
    engine: DiagnosisEngine,
    sessions: DashMap<SessionId, Arc<Session>>,
    feedback: Arc<FeedbackStore>,
    diagnoses: AtomicU64,
    event_tx: Option<mpsc::Sender<OracleEvent>>,
}

impl Oracle {
    /// Build an oracle over a loaded knowledge base; the config is validated first
    pub fn new(config: OracleConfig, kb: KnowledgeBase) -> Result<Self> {
        config.validate()?;
        let engine = DiagnosisEngine::new(
            Classifier::new(&config.classifier),
            config.diagnosis.clone(),
        );
        info!(
            "Oracle ready: knowledge base {} ({} controllers, {} fault codes)",
            kb.version,
            kb.controllers.len(),
            kb.faults.len()
        );
        Ok(Self {
            feedback: Arc::new(FeedbackStore::new(config.feedback.clone())),
            kb: Arc::new(kb),
            engine,
            sessions: DashMap::new(),
            diagnoses: AtomicU64::new(0),
            event_tx: None,
            config,
        })
    }

    /// Validate the config, then load the configured knowledge base (or the built-in one)
    pub fn from_config(config: OracleConfig) -> Result<Self> {
        config.validate()?;
        let kb = match &config.knowledge_base {
            Some(path) => KnowledgeBase::from_file(path)?,
            None => KnowledgeBase::builtin()?,
        };
        Self::new(config, kb)
    }

    pub fn set_event_channel(&mut self, tx: mpsc::Sender<OracleEvent>) {
        self.event_tx = Some(tx);
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    pub fn feedback(&self) -> &Arc<FeedbackStore> {
        &self.feedback
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    pub fn open_session(&self) -> SessionId {
        let id = SessionId::generate();
        self.ensure_session(&id, Utc::now());
        id
    }

    /// Open a session with a caller-chosen id; existing sessions are reused
    pub fn open_session_with(&self, id: impl Into<SessionId>, now: DateTime<Utc>) -> Arc<Session> {
        self.ensure_session(&id.into(), now)
    }

    fn ensure_session(&self, id: &SessionId, now: DateTime<Utc>) -> Arc<Session> {
        let mut created = false;
        let session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(Session::new(id.clone(), &self.config, now))
            })
            .clone();

        if created {
            debug!("Opened session {}", id);
            self.emit(OracleEvent::SessionOpened {
                session_id: id.clone(),
            });
            #[cfg(feature = "metrics")]
            gauge!("genoracle_sessions_open").increment(1.0);
        }
        session
    }

    pub fn session(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| OracleError::NotFound(id.to_string()))
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Ingest a reading. Unknown sessions are opened implicitly.
    pub fn set_reading(
        &self,
        session_id: &str,
        parameter_id: &str,
        value: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.kb.parameters.contains(parameter_id) {
            return Err(OracleError::UnknownParameter(parameter_id.to_string()));
        }
        let session = self.ensure_session(&SessionId::from(session_id), observed_at);
        session.record(Reading::new(parameter_id, value, observed_at))?;
        trace!("{} {} = {}", session_id, parameter_id, value);
        Ok(())
    }

    pub fn select_controller_profile(
        &self,
        session_id: &str,
        controller_id: &str,
        firmware: &str,
    ) -> Result<()> {
        let profile = self
            .kb
            .controllers
            .get(controller_id)
            .ok_or_else(|| OracleError::UnknownController(controller_id.to_string()))?;
        if profile.firmware(firmware).is_none() {
            return Err(OracleError::UnsupportedFirmware {
                controller: controller_id.to_string(),
                firmware: firmware.to_string(),
            });
        }

        let session = self.ensure_session(&SessionId::from(session_id), Utc::now());
        session.select(ProfileSelection {
            controller_id: profile.id.clone(),
            firmware: firmware.to_string(),
        })?;
        info!(
            "Session {} uses {} {} firmware {}",
            session_id, profile.manufacturer, profile.model, firmware
        );
        Ok(())
    }

    /// End a session: ingestion stops and open alarms are archived as
    /// ended with the session. No feedback is derived from them.
    pub fn end_session(&self, session_id: &str) -> Result<usize> {
        self.end_session_at(session_id, Utc::now())
    }

    pub fn end_session_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let session = self.session(session_id)?;
        let mut alarms = session.alarms();
        if !session.close() {
            return Err(OracleError::SessionClosed(session_id.to_string()));
        }
        let archived = alarms.end_session(now);
        let transitions = alarms.take_transitions();
        drop(alarms);

        self.apply_transitions(transitions, BTreeMap::new(), now);
        info!("Session {} ended; {} open alarm(s) archived", session_id, archived);
        self.emit(OracleEvent::SessionEnded {
            session_id: session.id().clone(),
            archived_alarms: archived,
        });
        #[cfg(feature = "metrics")]
        gauge!("genoracle_sessions_open").decrement(1.0);
        Ok(archived)
    }

    fn profile_for(&self, session: &Session) -> Result<(&ControllerProfile, String)> {
        let selection = session
            .selection()
            .ok_or_else(|| OracleError::ProfileNotSet(session.id().to_string()))?;
        let profile = self
            .kb
            .controllers
            .get(selection.controller_id.as_str())
            .ok_or_else(|| OracleError::UnknownController(selection.controller_id.to_string()))?;
        Ok((profile, selection.firmware))
    }

    // ========================================================================
    // DIAGNOSIS
    // ========================================================================

    pub fn diagnose(&self, session_id: &str) -> Result<DiagnosisResult> {
        self.diagnose_at(session_id, Utc::now())
    }

    /// Ranked diagnosis as of `now`. Read-only; alarms are not touched.
    pub fn diagnose_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<DiagnosisResult> {
        let session = self.session(session_id)?;
        let (profile, firmware) = self.profile_for(&session)?;
        let snapshot = session
            .readings()
            .snapshot(now, self.config.readings.freshness_window());

        let result = self.engine.diagnose(
            session.id(),
            &self.kb,
            profile,
            &firmware,
            &snapshot,
            self.feedback.as_ref(),
        );
        self.count_diagnosis();
        debug!("{}: {}", session_id, result.summary());
        Ok(result)
    }

    pub fn evaluate(&self, session_id: &str) -> Result<DiagnosisResult> {
        self.evaluate_at(session_id, Utc::now())
    }

    /// Diagnose and reconcile the session's alarms with the result
    pub fn evaluate_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<DiagnosisResult> {
        let session = self.session(session_id)?;
        let (profile, firmware) = self.profile_for(&session)?;
        let window = self.config.readings.freshness_window();

        let mut alarms = session.alarms();
        let readings = session.readings();
        let snapshot = readings.snapshot(now, window);
        let assessment = self
            .engine
            .assess(&self.kb, profile, &snapshot, self.feedback.as_ref());

        if !session.is_closed() {
            let ctx = ConditionContext {
                store: &readings,
                kb: &self.kb,
                profile,
                classifier: self.engine.classifier(),
                now,
                window,
            };
            alarms.reconcile(&assessment, &ctx, &firmware);
        }
        let transitions = alarms.take_transitions();
        drop(readings);
        drop(alarms);

        self.apply_transitions(transitions, context_of(&snapshot), now);
        self.count_diagnosis();
        Ok(self
            .engine
            .result_from(session.id(), &self.kb, profile, &firmware, assessment))
    }

    fn count_diagnosis(&self) {
        self.diagnoses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("genoracle_diagnoses_total").increment(1);
    }

    // ========================================================================
    // ALARMS
    // ========================================================================

    pub fn acknowledge(&self, session_id: &str, fault_code: &str) -> Result<AlarmInstance> {
        self.acknowledge_at(session_id, fault_code, Utc::now())
    }

    pub fn acknowledge_at(
        &self,
        session_id: &str,
        fault_code: &str,
        now: DateTime<Utc>,
    ) -> Result<AlarmInstance> {
        let session = self.session(session_id)?;
        session.ensure_open()?;
        self.known_code(fault_code)?;

        let mut alarms = session.alarms();
        let alarm = alarms.acknowledge(fault_code, now)?;
        let transitions = alarms.take_transitions();
        drop(alarms);

        self.apply_transitions(transitions, BTreeMap::new(), now);
        Ok(alarm)
    }

    pub fn attempt_reset(
        &self,
        session_id: &str,
        fault_code: &str,
        pathway_id: &str,
    ) -> Result<AlarmInstance> {
        self.attempt_reset_at(session_id, fault_code, pathway_id, Utc::now())
    }

    /// Execute a reset pathway after re-checking its preconditions at `now`
    pub fn attempt_reset_at(
        &self,
        session_id: &str,
        fault_code: &str,
        pathway_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AlarmInstance> {
        let session = self.session(session_id)?;
        session.ensure_open()?;
        self.known_code(fault_code)?;
        let (profile, firmware) = self.profile_for(&session)?;
        let window = self.config.readings.freshness_window();

        let mut alarms = session.alarms();
        let readings = session.readings();
        let snapshot = readings.snapshot(now, window);
        let assessment = self
            .engine
            .assess(&self.kb, profile, &snapshot, self.feedback.as_ref());
        let ctx = ConditionContext {
            store: &readings,
            kb: &self.kb,
            profile,
            classifier: self.engine.classifier(),
            now,
            window,
        };

        let outcome = alarms.attempt_reset(
            fault_code,
            pathway_id,
            assessment.trigger_state(fault_code),
            &ctx,
            &firmware,
        );
        let transitions = alarms.take_transitions();
        drop(readings);
        drop(alarms);

        self.apply_transitions(transitions, context_of(&snapshot), now);
        outcome
    }

    pub fn active_alarms(&self, session_id: &str) -> Result<Vec<AlarmInstance>> {
        let session = self.session(session_id)?;
        let alarms = session.alarms();
        Ok(alarms.open_alarms().cloned().collect())
    }

    pub fn archived_alarms(&self, session_id: &str) -> Result<Vec<AlarmInstance>> {
        let session = self.session(session_id)?;
        let alarms = session.alarms();
        Ok(alarms.archive().cloned().collect())
    }

    pub fn alarm_history(&self, session_id: &str, limit: usize) -> Result<Vec<AlarmTransition>> {
        let session = self.session(session_id)?;
        let alarms = session.alarms();
        Ok(alarms.history(limit))
    }

    /// Publish transitions and derive implicit feedback from reset outcomes
    fn apply_transitions(
        &self,
        transitions: Vec<AlarmTransition>,
        context: BTreeMap<ParameterId, f64>,
        now: DateTime<Utc>,
    ) {
        for transition in transitions {
            match &transition.kind {
                TransitionKind::Cleared {
                    reason: ClearReason::Verified,
                } => {
                    self.feedback.schedule_implicit(PendingFeedback {
                        fault_code: transition.fault_code.clone(),
                        session_id: transition.session_id.clone(),
                        alarm_id: transition.alarm_id,
                        outcome: Outcome::Worked,
                        context: context.clone(),
                        due_at: now + self.config.feedback.implicit_grace(),
                    });
                }
                TransitionKind::ResetFailed { .. } => {
                    let record = self.feedback.record_implicit(
                        &transition.fault_code,
                        Outcome::Failed,
                        &transition.session_id,
                        context.clone(),
                        now,
                    );
                    self.emit(OracleEvent::Feedback(record));
                }
                _ => {}
            }
            self.emit(OracleEvent::Alarm(transition));
        }
    }

    // ========================================================================
    // FEEDBACK
    // ========================================================================

    pub fn submit_feedback(
        &self,
        fault_code: &str,
        outcome: Outcome,
        notes: &str,
    ) -> Result<FeedbackRecord> {
        let code = self.known_code(fault_code)?;
        let record = self
            .feedback
            .submit(&code, outcome, notes, None, BTreeMap::new(), Utc::now());
        self.emit(OracleEvent::Feedback(record.clone()));
        Ok(record)
    }

    /// Feedback tied to a session, capturing its fresh readings as context
    pub fn submit_feedback_for_session(
        &self,
        session_id: &str,
        fault_code: &str,
        outcome: Outcome,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<FeedbackRecord> {
        let code = self.known_code(fault_code)?;
        let session = self.session(session_id)?;
        let snapshot = session
            .readings()
            .snapshot(now, self.config.readings.freshness_window());

        let record = self.feedback.submit(
            &code,
            outcome,
            notes,
            Some(session.id()),
            context_of(&snapshot),
            now,
        );
        self.emit(OracleEvent::Feedback(record.clone()));
        Ok(record)
    }

    /// Commit implicit outcomes whose grace window has elapsed
    pub fn flush_implicit(&self, now: DateTime<Utc>) -> Vec<FeedbackRecord> {
        let records = self.feedback.flush_due(now);
        for record in &records {
            self.emit(OracleEvent::Feedback(record.clone()));
        }
        records
    }

    pub fn weight(&self, fault_code: &str) -> f64 {
        self.feedback.weight(fault_code)
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    pub fn fault(&self, code: &str) -> Result<&FaultCode> {
        self.kb
            .faults
            .get(code)
            .ok_or_else(|| OracleError::UnknownFaultCode(code.to_string()))
    }

    pub fn faults_for(&self, controller_id: &str) -> Result<Vec<&FaultCode>> {
        let profile = self
            .kb
            .controllers
            .get(controller_id)
            .ok_or_else(|| OracleError::UnknownController(controller_id.to_string()))?;
        Ok(self.kb.faults.applicable_to(profile).collect())
    }

    /// Classify a value, with the controller's threshold override when given
    pub fn classify(
        &self,
        parameter_id: &str,
        value: f64,
        controller_id: Option<&str>,
    ) -> Result<Classification> {
        let def = self
            .kb
            .parameters
            .get(parameter_id)
            .ok_or_else(|| OracleError::UnknownParameter(parameter_id.to_string()))?;
        let classifier = self.engine.classifier();
        match controller_id {
            Some(id) => {
                let profile = self
                    .kb
                    .controllers
                    .get(id)
                    .ok_or_else(|| OracleError::UnknownController(id.to_string()))?;
                Ok(classifier.classify(&profile.effective_definition(def), value))
            }
            None => Ok(classifier.classify(def, value)),
        }
    }

    pub fn stats(&self) -> OracleStats {
        let mut sessions_open = 0;
        let mut sessions_closed = 0;
        let mut open_alarms = 0;
        for entry in self.sessions.iter() {
            if entry.is_closed() {
                sessions_closed += 1;
            } else {
                sessions_open += 1;
            }
            open_alarms += entry.alarms().open_count();
        }

        OracleStats {
            knowledge_base_version: self.kb.version.clone(),
            sessions_open,
            sessions_closed,
            open_alarms,
            diagnoses: self.diagnoses.load(Ordering::Relaxed),
            feedback_records: self.feedback.total_records(),
            pending_implicit_feedback: self.feedback.pending().len(),
        }
    }

    fn known_code(&self, code: &str) -> Result<FaultCodeId> {
        self.fault(code).map(|f| f.code.clone())
    }

    fn emit(&self, event: OracleEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.try_send(event).is_err() {
                warn!("Oracle event channel full or closed");
            }
        }
    }
}

fn context_of(snapshot: &ReadingSnapshot) -> BTreeMap<ParameterId, f64> {
    snapshot
        .fresh
        .iter()
        .map(|(id, r)| (id.clone(), r.value))
        .collect()
}
