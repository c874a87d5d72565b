// src/readings.rs - Per-session reading store
use crate::ids::ParameterId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::trace;

/// One observed value of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub parameter_id: ParameterId,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(parameter_id: impl Into<ParameterId>, value: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            parameter_id: parameter_id.into(),
            value,
            observed_at,
        }
    }

    /// A reading is stale once it is older than the freshness window.
    /// Readings stamped in the future count as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.observed_at) <= window
    }
}

/// Freshness state of the latest reading for a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadingState<'a> {
    Fresh(&'a Reading),
    Stale(&'a Reading),
    Unknown,
}

/// Bounded reading history for one session
///
/// Keeps the most recent `depth` readings per parameter, ordered by
/// observation time. Stale readings are kept for audit; they only drop out
/// of matching.
///
/// # Examples
///
/// ```rust
/// use chrono::{Duration, Utc};
/// use genoracle::readings::{Reading, ReadingState, ReadingStore};
///
/// let now = Utc::now();
/// let mut store = ReadingStore::new(16);
/// store.record(Reading::new("oil_pressure", 42.0, now - Duration::seconds(10)));
///
/// let window = Duration::seconds(4);
/// assert!(matches!(store.state("oil_pressure", now, window), ReadingState::Stale(_)));
/// assert!(matches!(store.state("coolant_temp", now, window), ReadingState::Unknown));
/// ```
#[derive(Debug, Clone)]
pub struct ReadingStore {
    series: HashMap<ParameterId, VecDeque<Reading>>,
    depth: usize,
}

impl ReadingStore {
    pub fn new(depth: usize) -> Self {
        Self {
            series: HashMap::new(),
            depth: depth.max(1),
        }
    }

    /// Record a reading. Out-of-order readings are slotted into place and do
    /// not replace a newer latest value.
    pub fn record(&mut self, reading: Reading) {
        trace!(
            "Recording {} = {} at {}",
            reading.parameter_id,
            reading.value,
            reading.observed_at
        );

        let series = self.series.entry(reading.parameter_id.clone()).or_default();
        let pos = series.partition_point(|r| r.observed_at <= reading.observed_at);
        series.insert(pos, reading);

        while series.len() > self.depth {
            series.pop_front();
        }
    }

    pub fn latest(&self, parameter: &str) -> Option<&Reading> {
        self.series.get(parameter).and_then(|s| s.back())
    }

    /// Readings for a parameter, oldest first
    pub fn history(&self, parameter: &str) -> impl Iterator<Item = &Reading> {
        self.series.get(parameter).into_iter().flat_map(|s| s.iter())
    }

    pub fn state(&self, parameter: &str, now: DateTime<Utc>, window: Duration) -> ReadingState<'_> {
        match self.latest(parameter) {
            Some(r) if r.is_fresh(now, window) => ReadingState::Fresh(r),
            Some(r) => ReadingState::Stale(r),
            None => ReadingState::Unknown,
        }
    }

    /// Start of the trailing run of readings satisfying `pred`.
    ///
    /// Returns `None` unless the latest reading is fresh and satisfies the
    /// predicate. The run is broken by the first older reading that fails,
    /// or by a gap between consecutive readings longer than `window`.
    pub fn held_since<F>(
        &self,
        parameter: &str,
        now: DateTime<Utc>,
        window: Duration,
        pred: F,
    ) -> Option<DateTime<Utc>>
    where
        F: Fn(&Reading) -> bool,
    {
        let series = self.series.get(parameter)?;
        let latest = series.back()?;
        if !latest.is_fresh(now, window) || !pred(latest) {
            return None;
        }

        let mut since = latest.observed_at;
        for reading in series.iter().rev().skip(1) {
            if since.signed_duration_since(reading.observed_at) > window || !pred(reading) {
                break;
            }
            since = reading.observed_at;
        }
        Some(since)
    }

    /// Split latest readings into fresh and stale sets at `now`
    pub fn snapshot(&self, now: DateTime<Utc>, window: Duration) -> ReadingSnapshot {
        let mut snapshot = ReadingSnapshot {
            taken_at: now,
            fresh: BTreeMap::new(),
            stale: BTreeMap::new(),
        };
        for (id, series) in &self.series {
            if let Some(latest) = series.back() {
                if latest.is_fresh(now, window) {
                    snapshot.fresh.insert(id.clone(), latest.clone());
                } else {
                    snapshot.stale.insert(id.clone(), latest.clone());
                }
            }
        }
        snapshot
    }

    /// Number of parameters with at least one reading
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Point-in-time view of a session's latest readings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingSnapshot {
    pub taken_at: DateTime<Utc>,
    pub fresh: BTreeMap<ParameterId, Reading>,
    pub stale: BTreeMap<ParameterId, Reading>,
}

impl ReadingSnapshot {
    pub fn fresh(&self, parameter: &str) -> Option<&Reading> {
        self.fresh.get(parameter)
    }

    pub fn stale(&self, parameter: &str) -> Option<&Reading> {
        self.stale.get(parameter)
    }

    pub fn is_empty(&self) -> bool {
        self.fresh.is_empty() && self.stale.is_empty()
    }
}
