//! Status classification of a single reading against its parameter bands.

use crate::config::ClassifierConfig;
use crate::parameter::{ParameterDefinition, SensorType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed status of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Normal,
    Warning,
    Critical,
    /// Outside physical plausibility; the sensor is suspect, not the machine
    SensorFault,
    /// No reading was ever recorded
    Unknown,
    /// Latest reading is older than the freshness window
    Stale,
}

impl Status {
    /// Unknown and stale readings never take part in fault matching
    pub fn is_matchable(self) -> bool {
        !matches!(self, Status::Unknown | Status::Stale)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Critical => "critical",
            Status::SensorFault => "sensor_fault",
            Status::Unknown => "unknown",
            Status::Stale => "stale",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which side of the normal range a deviation lies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

impl Classification {
    pub const NORMAL: Classification = Classification {
        status: Status::Normal,
        side: None,
    };

    pub fn new(status: Status, side: Option<Side>) -> Self {
        Self { status, side }
    }
}

/// Status a trigger or reset condition asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredStatus {
    Normal,
    /// Warning or worse
    Warning,
    Critical,
    SensorFault,
}

impl RequiredStatus {
    /// Whether an observed classification satisfies this requirement.
    ///
    /// `warning` is met by critical readings as well, since a worsening
    /// parameter keeps the warning-level fault active. A required side must
    /// match the side of the deviation.
    pub fn is_met_by(self, observed: Classification, side: Option<Side>) -> bool {
        let status_ok = match self {
            RequiredStatus::Normal => observed.status == Status::Normal,
            RequiredStatus::Warning => {
                matches!(observed.status, Status::Warning | Status::Critical)
            }
            RequiredStatus::Critical => observed.status == Status::Critical,
            RequiredStatus::SensorFault => observed.status == Status::SensorFault,
        };
        status_ok && side.map_or(true, |s| observed.side == Some(s))
    }

    pub fn is_abnormal(self) -> bool {
        self != RequiredStatus::Normal
    }
}

/// Band classifier with a configurable plausibility margin
#[derive(Debug, Clone)]
pub struct Classifier {
    margin_ratio: f64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            margin_ratio: config.plausibility_margin_ratio,
        }
    }

    /// Plausibility margin applied beyond the critical limits
    pub fn margin(&self, def: &ParameterDefinition) -> f64 {
        def.plausibility_margin
            .unwrap_or_else(|| self.margin_ratio * def.bands.reference_span())
    }

    /// Classify `value` against the bands of `def`.
    ///
    /// Band edges belong to the inner band: a value equal to `warning_high`
    /// is a warning, a value equal to `normal_range.max` is normal.
    pub fn classify(&self, def: &ParameterDefinition, value: f64) -> Classification {
        if !value.is_finite() {
            return Classification::new(Status::SensorFault, None);
        }

        match def.sensor_type {
            SensorType::Digital if value != 0.0 && value != 1.0 => {
                return Classification::new(Status::SensorFault, None);
            }
            SensorType::DerivedCount if value < 0.0 || value.fract() != 0.0 => {
                return Classification::new(Status::SensorFault, None);
            }
            _ => {}
        }

        let bands = &def.bands;
        let margin = self.margin(def);

        if value < bands.critical_low - margin {
            return Classification::new(Status::SensorFault, Some(Side::Low));
        }
        if value > bands.critical_high + margin {
            return Classification::new(Status::SensorFault, Some(Side::High));
        }

        if value >= bands.normal_range.min && value <= bands.normal_range.max {
            Classification::NORMAL
        } else if value < bands.normal_range.min {
            let status = if value >= bands.warning_low {
                Status::Warning
            } else {
                Status::Critical
            };
            Classification::new(status, Some(Side::Low))
        } else {
            let status = if value <= bands.warning_high {
                Status::Warning
            } else {
                Status::Critical
            };
            Classification::new(status, Some(Side::High))
        }
    }
}

/// Classify with the default plausibility margin ratio
pub fn classify(def: &ParameterDefinition, value: f64) -> Classification {
    Classifier::default().classify(def, value)
}
