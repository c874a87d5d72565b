//! genoracle - parameter-driven fault diagnosis for generator controllers
//!
//! Live readings from a generator controller are classified against
//! threshold bands, matched against a fault-code knowledge base, and ranked
//! by confidence. Open faults are tracked as alarms through acknowledgement
//! and reset, and technician feedback adjusts future ranking.
//!
//! # Examples
//!
//! ```rust
//! use chrono::Utc;
//! use genoracle::{KnowledgeBase, Oracle, OracleConfig};
//!
//! genoracle::init()?;
//!
//! let oracle = Oracle::new(OracleConfig::default(), KnowledgeBase::builtin()?)?;
//! oracle.select_controller_profile("bay-3", "dse-8610", "V2")?;
//! oracle.set_reading("bay-3", "coolant_temp", 98.0, Utc::now())?;
//!
//! let result = oracle.evaluate("bay-3")?;
//! println!("{}", result.summary());
//! assert_eq!(oracle.active_alarms("bay-3")?.len(), 1);
//! # Ok::<(), genoracle::OracleError>(())
//! ```

// ============================================================================
// KNOWLEDGE BASE
// ============================================================================

/// Identifier newtypes
pub mod ids;

/// Monitorable quantities and their threshold bands
pub mod parameter;

/// Controller families, firmware reset methods and threshold overrides
pub mod controller;

/// Fault codes, triggers, guidance and reset pathways
pub mod fault;

/// Loading and integrity validation of the knowledge base
pub mod knowledge;

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error types
pub mod error;

/// YAML configuration with defaults
pub mod config;

/// Reading history with freshness tracking
pub mod readings;

/// Value to status classification
pub mod classifier;

/// Candidate matching and confidence ranking
pub mod diagnosis;

/// Predicted failures and maintenance derived from current readings
pub mod predictive;

/// Alarm lifecycle per session
pub mod alarms;

/// Technician feedback and ranking weights
pub mod feedback;

/// Per-session state
pub mod session;

/// Session-facing service
pub mod oracle;

/// Periodic evaluation loop
pub mod monitor;

/// Scripted sessions for replay
pub mod scenario;

// ============================================================================
// PUBLIC API EXPORTS
// ============================================================================

pub use alarms::{AlarmInstance, AlarmState, AlarmTransition, ClearReason};
pub use classifier::{Classification, Classifier, Status};
pub use config::OracleConfig;
pub use diagnosis::{DiagnosisEngine, DiagnosisEntry, DiagnosisResult, Verdict};
pub use error::{OracleError, Result};
pub use fault::{FaultCode, Severity};
pub use feedback::{FeedbackRecord, Outcome};
pub use ids::{ControllerId, FaultCodeId, ParameterId, SessionId};
pub use knowledge::KnowledgeBase;
pub use monitor::Monitor;
pub use oracle::{Oracle, OracleEvent, OracleStats};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the tracing subscriber and describe metrics.
///
/// Uses `RUST_LOG` when set, `genoracle=info` otherwise. Calling it again
/// is harmless.
pub fn init() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("genoracle=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    // Already initialized; keep the existing subscriber
    let _ = subscriber.try_init();

    #[cfg(feature = "metrics")]
    init_metrics_registry();

    tracing::debug!("genoracle {} initialized", VERSION);
    Ok(())
}

#[cfg(feature = "metrics")]
fn init_metrics_registry() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!("genoracle_diagnoses_total", "Diagnoses and evaluations performed");
    describe_counter!("genoracle_alarms_raised_total", "Alarms raised");
    describe_counter!("genoracle_alarms_cleared_total", "Alarms cleared after a verified reset");
    describe_counter!("genoracle_feedback_total", "Feedback records appended");
    describe_counter!("genoracle_monitor_cycles_total", "Monitor evaluation cycles");
    describe_gauge!("genoracle_sessions_open", "Sessions currently open");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
