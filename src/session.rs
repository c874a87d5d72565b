// src/session.rs - Per-session state
use crate::alarms::AlarmBook;
use crate::config::OracleConfig;
use crate::error::{OracleError, Result};
use crate::ids::{ControllerId, SessionId};
use crate::readings::{Reading, ReadingStore};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Controller and firmware chosen for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSelection {
    pub controller_id: ControllerId,
    pub firmware: String,
}

/// One diagnostic session.
///
/// Readings sit behind a read-write lock so any number of diagnoses can run
/// against the same session. Alarm transitions go through a mutex, making
/// the alarm book single-writer. When both are needed, take `alarms` first.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    opened_at: DateTime<Utc>,
    selection: RwLock<Option<ProfileSelection>>,
    readings: RwLock<ReadingStore>,
    alarms: Mutex<AlarmBook>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: SessionId, config: &OracleConfig, now: DateTime<Utc>) -> Self {
        Self {
            alarms: Mutex::new(AlarmBook::new(id.clone(), config.alarms.clone())),
            readings: RwLock::new(ReadingStore::new(config.readings.history_depth)),
            selection: RwLock::new(None),
            closed: AtomicBool::new(false),
            opened_at: now,
            id,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn selection(&self) -> Option<ProfileSelection> {
        self.selection.read().clone()
    }

    /// Select the controller profile. Re-selecting the current profile is a
    /// no-op; switching to another one requires an empty alarm book.
    pub fn select(&self, selection: ProfileSelection) -> Result<()> {
        self.ensure_open()?;
        let alarms = self.alarms.lock();
        let mut current = self.selection.write();
        let switching = current.as_ref().map_or(false, |c| *c != selection);
        if switching && alarms.open_count() > 0 {
            return Err(OracleError::ProfileLocked {
                session: self.id.to_string(),
                open_alarms: alarms.open_count(),
            });
        }
        *current = Some(selection);
        Ok(())
    }

    /// Store a reading; refused once the session has ended
    pub fn record(&self, reading: Reading) -> Result<()> {
        let mut readings = self.readings.write();
        self.ensure_open()?;
        readings.record(reading);
        Ok(())
    }

    pub fn readings(&self) -> RwLockReadGuard<'_, ReadingStore> {
        self.readings.read()
    }

    pub fn alarms(&self) -> MutexGuard<'_, AlarmBook> {
        self.alarms.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(OracleError::SessionClosed(self.id.to_string()));
        }
        Ok(())
    }

    /// Stop ingestion. Returns false if the session was already closed.
    pub(crate) fn close(&self) -> bool {
        let _readings = self.readings.write();
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_session_refuses_writes() {
        let now = Utc::now();
        let session = Session::new(SessionId::from("s1"), &OracleConfig::default(), now);
        session.record(Reading::new("oil_pressure", 40.0, now)).unwrap();
        assert_eq!(session.readings().len(), 1);

        assert!(session.close());
        assert!(!session.close());
        assert!(matches!(
            session.record(Reading::new("oil_pressure", 41.0, now)),
            Err(OracleError::SessionClosed(_))
        ));
        assert!(session
            .select(ProfileSelection {
                controller_id: ControllerId::from("dse-7320"),
                firmware: "V7".into(),
            })
            .is_err());
        // Audit data is retained
        assert_eq!(session.readings().latest("oil_pressure").unwrap().value, 40.0);
    }
}
