// src/feedback.rs - Technician feedback and confidence weights
use crate::config::{FeedbackConfig, FEEDBACK_WEIGHT_CEILING, FEEDBACK_WEIGHT_FLOOR};
use crate::diagnosis::WeightSource;
use crate::ids::{FaultCodeId, ParameterId, SessionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Worked,
    Partial,
    Failed,
}

impl Outcome {
    /// Contribution to the success ratio
    pub fn score(self) -> f64 {
        match self {
            Outcome::Worked => 1.0,
            Outcome::Partial => 0.5,
            Outcome::Failed => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Technician,
    /// Derived from a verified or failed reset
    Implicit,
}

/// Append-only feedback entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub sequence: u64,
    pub fault_code: FaultCodeId,
    pub outcome: Outcome,
    pub source: FeedbackSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub context: BTreeMap<ParameterId, f64>,
    #[serde(default)]
    pub notes: String,
    pub submitted_at: DateTime<Utc>,
}

/// Feedback to be recorded later unless a technician answers first
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFeedback {
    pub fault_code: FaultCodeId,
    pub session_id: SessionId,
    pub alarm_id: Uuid,
    pub outcome: Outcome,
    pub context: BTreeMap<ParameterId, f64>,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackStats {
    pub fault_code: FaultCodeId,
    pub total: usize,
    pub worked: usize,
    pub partial: usize,
    pub failed: usize,
    pub weight: f64,
}

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<FeedbackRecord>,
    worked: usize,
    partial: usize,
    failed: usize,
    weight: Option<f64>,
}

/// Shared feedback store
///
/// Each fault code has its own ledger. Appends take the ledger's map entry
/// lock, so counting and weight recomputation happen as one step even when
/// several technicians report on the same code at once.
pub struct FeedbackStore {
    config: FeedbackConfig,
    ledgers: DashMap<FaultCodeId, Ledger>,
    pending: Mutex<Vec<PendingFeedback>>,
    sequence: AtomicU64,
}

impl FeedbackStore {
    pub fn new(config: FeedbackConfig) -> Self {
        Self {
            config,
            ledgers: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Record technician feedback.
    ///
    /// Cancels any pending implicit outcome for the code (restricted to the
    /// session when one is given).
    pub fn submit(
        &self,
        fault_code: &FaultCodeId,
        outcome: Outcome,
        notes: impl Into<String>,
        session_id: Option<&SessionId>,
        context: BTreeMap<ParameterId, f64>,
        now: DateTime<Utc>,
    ) -> FeedbackRecord {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|p| {
            !(p.fault_code == *fault_code && session_id.map_or(true, |s| p.session_id == *s))
        });
        if pending.len() != before {
            debug!(
                "Technician feedback for {} replaced {} implicit outcome(s)",
                fault_code,
                before - pending.len()
            );
        }

        self.append(
            fault_code,
            outcome,
            FeedbackSource::Technician,
            session_id.cloned(),
            context,
            notes.into(),
            now,
        )
    }

    /// Record an implicit outcome immediately
    pub fn record_implicit(
        &self,
        fault_code: &FaultCodeId,
        outcome: Outcome,
        session_id: &SessionId,
        context: BTreeMap<ParameterId, f64>,
        now: DateTime<Utc>,
    ) -> FeedbackRecord {
        let _pending = self.pending.lock();
        self.append(
            fault_code,
            outcome,
            FeedbackSource::Implicit,
            Some(session_id.clone()),
            context,
            String::new(),
            now,
        )
    }

    /// Queue an implicit outcome to be committed by [`flush_due`](Self::flush_due)
    pub fn schedule_implicit(&self, pending: PendingFeedback) {
        debug!(
            "Implicit {:?} for {} due at {}",
            pending.outcome, pending.fault_code, pending.due_at
        );
        self.pending.lock().push(pending);
    }

    /// Commit every pending implicit outcome due at or before `now`
    pub fn flush_due(&self, now: DateTime<Utc>) -> Vec<FeedbackRecord> {
        let mut pending = self.pending.lock();
        let (due, keep): (Vec<_>, Vec<_>) = pending.drain(..).partition(|p| p.due_at <= now);
        *pending = keep;

        due.into_iter()
            .map(|p| {
                self.append(
                    &p.fault_code,
                    p.outcome,
                    FeedbackSource::Implicit,
                    Some(p.session_id),
                    p.context,
                    format!("implicit outcome for alarm {}", p.alarm_id),
                    now,
                )
            })
            .collect()
    }

    pub fn pending(&self) -> Vec<PendingFeedback> {
        self.pending.lock().clone()
    }

    #[allow(clippy::too_many_arguments)]
    fn append(
        &self,
        fault_code: &FaultCodeId,
        outcome: Outcome,
        source: FeedbackSource,
        session_id: Option<SessionId>,
        context: BTreeMap<ParameterId, f64>,
        notes: String,
        now: DateTime<Utc>,
    ) -> FeedbackRecord {
        let mut ledger = self.ledgers.entry(fault_code.clone()).or_default();

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            fault_code: fault_code.clone(),
            outcome,
            source,
            session_id,
            context,
            notes,
            submitted_at: now,
        };

        match outcome {
            Outcome::Worked => ledger.worked += 1,
            Outcome::Partial => ledger.partial += 1,
            Outcome::Failed => ledger.failed += 1,
        }
        ledger.records.push(record.clone());
        let weight = rolling_weight(&ledger.records, &self.config);
        ledger.weight = Some(weight);

        info!(
            "Feedback {:?} ({:?}) for {}; weight now {:.3}",
            outcome, source, fault_code, weight
        );

        #[cfg(feature = "metrics")]
        metrics::counter!("genoracle_feedback_total").increment(1);

        record
    }

    /// Ranking weight for a code, within the configured bounds
    pub fn weight(&self, fault_code: &str) -> f64 {
        self.ledgers
            .get(fault_code)
            .and_then(|l| l.weight)
            .unwrap_or(1.0)
    }

    /// Records for a code in submission order
    pub fn records(&self, fault_code: &str) -> Vec<FeedbackRecord> {
        self.ledgers
            .get(fault_code)
            .map(|l| l.records.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self, fault_code: &FaultCodeId) -> FeedbackStats {
        match self.ledgers.get(fault_code.as_str()) {
            Some(l) => FeedbackStats {
                fault_code: fault_code.clone(),
                total: l.records.len(),
                worked: l.worked,
                partial: l.partial,
                failed: l.failed,
                weight: l.weight.unwrap_or(1.0),
            },
            None => FeedbackStats {
                fault_code: fault_code.clone(),
                total: 0,
                worked: 0,
                partial: 0,
                failed: 0,
                weight: 1.0,
            },
        }
    }

    /// Total records across all codes
    pub fn total_records(&self) -> usize {
        self.ledgers.iter().map(|l| l.records.len()).sum()
    }
}

impl WeightSource for FeedbackStore {
    fn weight(&self, code: &FaultCodeId) -> f64 {
        FeedbackStore::weight(self, code.as_str())
    }
}

/// Bounded linear map of the success ratio over the last `window` records.
/// Neutral until `min_records` records exist. Never leaves `[0.5, 1.5]`,
/// whatever the configured bounds.
pub fn rolling_weight(records: &[FeedbackRecord], config: &FeedbackConfig) -> f64 {
    let start = records.len().saturating_sub(config.window);
    let recent = &records[start..];
    if recent.is_empty() || recent.len() < config.min_records {
        return 1.0;
    }

    let ratio = recent.iter().map(|r| r.outcome.score()).sum::<f64>() / recent.len() as f64;
    let weight = config.min_weight + ratio * (config.max_weight - config.min_weight);
    weight
        .max(config.min_weight)
        .min(config.max_weight)
        .clamp(FEEDBACK_WEIGHT_FLOOR, FEEDBACK_WEIGHT_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn code() -> FaultCodeId {
        FaultCodeId::from("DSE-101")
    }

    fn submit(store: &FeedbackStore, outcome: Outcome) -> FeedbackRecord {
        store.submit(&code(), outcome, "", None, BTreeMap::new(), t0())
    }

    #[test]
    fn test_neutral_below_min_records() {
        let store = FeedbackStore::new(FeedbackConfig::default());
        assert_eq!(store.weight("DSE-101"), 1.0);
        submit(&store, Outcome::Failed);
        submit(&store, Outcome::Failed);
        assert_eq!(store.weight("DSE-101"), 1.0);
        submit(&store, Outcome::Failed);
        assert_eq!(store.weight("DSE-101"), 0.5);
    }

    #[test]
    fn test_weight_tracks_success_ratio() {
        let store = FeedbackStore::new(FeedbackConfig::default());
        for _ in 0..3 {
            submit(&store, Outcome::Worked);
        }
        assert_eq!(store.weight("DSE-101"), 1.5);
        submit(&store, Outcome::Partial);
        // (3 + 0.5) / 4 = 0.875
        assert!((store.weight("DSE-101") - 1.375).abs() < 1e-12);
    }

    #[test]
    fn test_weight_stays_within_fixed_bounds() {
        let config = FeedbackConfig {
            min_weight: 0.1,
            max_weight: 3.0,
            ..FeedbackConfig::default()
        };
        let failed = FeedbackStore::new(config.clone());
        let worked = FeedbackStore::new(config);
        for _ in 0..5 {
            submit(&failed, Outcome::Failed);
            submit(&worked, Outcome::Worked);
        }
        assert_eq!(failed.weight("DSE-101"), 0.5);
        assert_eq!(worked.weight("DSE-101"), 1.5);
    }

    #[test]
    fn test_window_forgets_old_records() {
        let config = FeedbackConfig {
            window: 4,
            ..FeedbackConfig::default()
        };
        let store = FeedbackStore::new(config);
        for _ in 0..10 {
            submit(&store, Outcome::Failed);
        }
        for _ in 0..4 {
            submit(&store, Outcome::Worked);
        }
        assert_eq!(store.weight("DSE-101"), 1.5);
        assert_eq!(store.records("DSE-101").len(), 14);
        let stats = store.stats(&code());
        assert_eq!((stats.worked, stats.failed, stats.total), (4, 10, 14));
    }

    #[test]
    fn test_sequences_are_strictly_increasing() {
        let store = FeedbackStore::new(FeedbackConfig::default());
        let a = submit(&store, Outcome::Worked);
        let b = store.submit(&FaultCodeId::from("GEN-OV"), Outcome::Failed, "", None, BTreeMap::new(), t0());
        let c = submit(&store, Outcome::Worked);
        assert!(a.sequence < b.sequence && b.sequence < c.sequence);
        assert_eq!(store.total_records(), 3);
    }

    #[test]
    fn test_implicit_outcome_committed_after_grace() {
        let store = FeedbackStore::new(FeedbackConfig::default());
        store.schedule_implicit(PendingFeedback {
            fault_code: code(),
            session_id: SessionId::from("s1"),
            alarm_id: Uuid::new_v4(),
            outcome: Outcome::Worked,
            context: BTreeMap::new(),
            due_at: t0() + Duration::seconds(300),
        });

        assert!(store.flush_due(t0() + Duration::seconds(299)).is_empty());
        let flushed = store.flush_due(t0() + Duration::seconds(300));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].source, FeedbackSource::Implicit);
        assert!(store.pending().is_empty());
    }

    #[test]
    fn test_technician_feedback_cancels_implicit() {
        let store = FeedbackStore::new(FeedbackConfig::default());
        for session in ["s1", "s2"] {
            store.schedule_implicit(PendingFeedback {
                fault_code: code(),
                session_id: SessionId::from(session),
                alarm_id: Uuid::new_v4(),
                outcome: Outcome::Worked,
                context: BTreeMap::new(),
                due_at: t0() + Duration::seconds(300),
            });
        }

        store.submit(&code(), Outcome::Partial, "belt slipping", Some(&SessionId::from("s1")), BTreeMap::new(), t0());
        assert_eq!(store.pending().len(), 1);
        assert_eq!(store.pending()[0].session_id.as_str(), "s2");

        store.submit(&code(), Outcome::Failed, "", None, BTreeMap::new(), t0());
        assert!(store.pending().is_empty());
        assert!(store.flush_due(t0() + Duration::days(1)).is_empty());
        assert_eq!(store.records("DSE-101").len(), 2);
    }

    #[test]
    fn test_concurrent_submissions_are_not_lost() {
        let store = Arc::new(FeedbackStore::new(FeedbackConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let outcome = if i % 2 == 0 { Outcome::Worked } else { Outcome::Failed };
                        store.submit(&code(), outcome, "", None, BTreeMap::new(), t0());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = store.stats(&code());
        assert_eq!(stats.total, 400);
        assert_eq!(stats.worked, 200);
        assert_eq!(stats.failed, 200);
        assert!((0.5..=1.5).contains(&stats.weight));
    }
}
