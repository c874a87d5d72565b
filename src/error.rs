use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum OracleError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration or knowledge base files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while encoding JSON output
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed scenario script
    #[error("Scenario error: {0}")]
    Scenario(String),

    /// The knowledge base failed validation at load time
    #[error("Catalog integrity error: {}", .0.join("; "))]
    CatalogIntegrity(Vec<String>),

    /// Requested session does not exist
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Session was ended and no longer accepts writes
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Diagnosis requested before a controller profile was selected
    #[error("No controller profile selected for session {0}")]
    ProfileNotSet(String),

    /// Controller profile change refused while alarms raised under the
    /// current profile are still open
    #[error("Session {session} has {open_alarms} open alarm(s); profile change refused")]
    ProfileLocked { session: String, open_alarms: usize },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Unknown controller: {0}")]
    UnknownController(String),

    /// Controller has no reset-method entry for this firmware version
    #[error("Controller {controller} does not support firmware {firmware}")]
    UnsupportedFirmware { controller: String, firmware: String },

    #[error("Unknown fault code: {0}")]
    UnknownFaultCode(String),

    /// No open alarm exists for the fault code in this session
    #[error("No open alarm for {code} in session {session}")]
    AlarmNotFound { session: String, code: String },

    #[error("Fault {code} has no reset pathway {pathway}")]
    UnknownPathway { code: String, pathway: String },

    /// Alarm cannot move from its current state with the requested action
    #[error("Invalid transition for {code}: {action} not allowed while {state}")]
    InvalidTransition {
        code: String,
        action: &'static str,
        state: &'static str,
    },

    /// Reset attempted before the pathway's conditions hold
    #[error("Precondition not met for {code} via {pathway}: {reason}")]
    PreconditionNotMet {
        code: String,
        pathway: String,
        reason: String,
    },
}

/// Convenient alias over [`Result`] using [`OracleError`]
pub type Result<T> = std::result::Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_integrity_message_lists_problems() {
        let err = OracleError::CatalogIntegrity(vec![
            "duplicate fault code DSE-100".to_string(),
            "fault GEN-1 has an empty trigger".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Catalog integrity error: duplicate fault code DSE-100; fault GEN-1 has an empty trigger"
        );
    }
}
