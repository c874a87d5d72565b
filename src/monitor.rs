// src/monitor.rs - Periodic evaluation of open sessions
use crate::error::{OracleError, Result};
use crate::oracle::Oracle;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info};

#[cfg(feature = "metrics")]
use metrics::counter;

#[derive(Clone, Debug, Serialize)]
pub struct MonitorStats {
    pub running: bool,
    pub cycle_count: u64,
    pub error_count: u64,
    pub uptime_secs: u64,
}

/// Evaluates every open session on a fixed cadence and commits implicit
/// feedback once its grace window has passed.
pub struct Monitor {
    oracle: Arc<Oracle>,
    period: Duration,
    running: Arc<AtomicBool>,
    cycle_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    start_time: Instant,
    shutdown_tx: watch::Sender<bool>,
}

impl Monitor {
    pub fn new(oracle: Arc<Oracle>) -> Self {
        let period = oracle.config().monitor.poll_interval();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            oracle,
            period,
            running: Arc::new(AtomicBool::new(false)),
            cycle_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
            shutdown_tx,
        }
    }

    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OracleError::Config("Monitor is already running".into()));
        }
        info!("Starting monitor with poll interval: {}ms", self.period.as_millis());

        // A stop issued before run is honoured; a stopped monitor stays stopped
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            self.running.store(false, Ordering::SeqCst);
            info!("Monitor was stopped before it started");
            return Ok(());
        }
        let mut ticker = interval(self.period);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => self.execute_cycle(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Monitor stopped after {} cycles", self.cycle_count());
        Ok(())
    }

    /// One pass over all open sessions
    pub fn execute_cycle(&self) {
        let now = Utc::now();
        let mut evaluated = 0;

        for id in self.oracle.sessions() {
            if self.oracle.session(id.as_str()).map_or(true, |s| s.is_closed()) {
                continue;
            }
            match self.oracle.evaluate_at(id.as_str(), now) {
                Ok(_) => evaluated += 1,
                // No profile selected yet
                Err(OracleError::ProfileNotSet(_)) => {}
                Err(e) => {
                    let errors = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;
                    error!("Evaluation error #{} for session {}: {}", errors, id, e);
                }
            }
        }

        let flushed = self.oracle.flush_implicit(now);
        let cycle = self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;

        #[cfg(feature = "metrics")]
        counter!("genoracle_monitor_cycles_total").increment(1);

        debug!(
            "Monitor cycle {}: {} session(s) evaluated, {} implicit feedback record(s)",
            cycle,
            evaluated,
            flushed.len()
        );
    }

    pub fn stop(&self) {
        info!("Stopping monitor");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            running: self.is_running(),
            cycle_count: self.cycle_count(),
            error_count: self.error_count.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleConfig;
    use crate::knowledge::KnowledgeBase;

    fn oracle() -> Arc<Oracle> {
        let mut config = OracleConfig::default();
        config.monitor.poll_interval_ms = 10;
        Arc::new(Oracle::new(config, KnowledgeBase::builtin().unwrap()).unwrap())
    }

    #[test]
    fn test_cycle_skips_sessions_without_profile() {
        let oracle = oracle();
        oracle.open_session();
        oracle.select_controller_profile("bay-1", "dse-7320", "V7").unwrap();
        oracle.set_reading("bay-1", "oil_pressure", 22.0, Utc::now()).unwrap();

        let monitor = Monitor::new(oracle.clone());
        monitor.execute_cycle();

        let stats = monitor.stats();
        assert_eq!(stats.cycle_count, 1);
        assert_eq!(stats.error_count, 0);
        assert!(!stats.running);
        assert_eq!(oracle.active_alarms("bay-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_run_is_honoured() {
        let monitor = Monitor::new(oracle());
        monitor.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), monitor.run()).await;
        tokio_test::assert_ok!(tokio_test::assert_ok!(result));
        assert!(!monitor.is_running());
        assert_eq!(monitor.cycle_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_ends_run() {
        let monitor = Arc::new(Monitor::new(oracle()));
        let runner = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.run().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.is_running());
        tokio_test::assert_err!(monitor.run().await);

        monitor.stop();
        tokio_test::assert_ok!(runner.await.unwrap());
        assert!(!monitor.is_running());
        assert!(monitor.cycle_count() >= 1);
    }
}
