//! Parameter catalog: the monitorable quantities and their threshold bands.
//!
//! Every definition carries a normal range plus warning and critical limits on
//! both sides. The bands are nested:
//!
//! ```text
//! critical_low <= warning_low <= normal.min <= normal.max <= warning_high <= critical_high
//! ```
//!
//! Definitions are loaded once with the knowledge base and never mutated.

use crate::ids::ParameterId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed interval of normal operation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalRange {
    pub min: f64,
    pub max: f64,
}

/// Threshold bands for one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub normal_range: NormalRange,
    pub warning_low: f64,
    pub warning_high: f64,
    pub critical_low: f64,
    pub critical_high: f64,
}

impl Bands {
    /// Check the nesting invariant, returning a description of the first violation
    pub fn check(&self) -> std::result::Result<(), String> {
        let edges = [
            ("critical_low", self.critical_low),
            ("warning_low", self.warning_low),
            ("normal_range.min", self.normal_range.min),
            ("normal_range.max", self.normal_range.max),
            ("warning_high", self.warning_high),
            ("critical_high", self.critical_high),
        ];

        if let Some((name, _)) = edges.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("{} is not a finite number", name));
        }

        for pair in edges.windows(2) {
            let (lo_name, lo) = pair[0];
            let (hi_name, hi) = pair[1];
            if lo > hi {
                return Err(format!("{} ({}) exceeds {} ({})", lo_name, lo, hi_name, hi));
            }
        }
        Ok(())
    }

    /// Width of the normal range, falling back to the critical span when the
    /// normal range is a single point
    pub fn reference_span(&self) -> f64 {
        let normal = self.normal_range.max - self.normal_range.min;
        if normal > 0.0 {
            normal
        } else {
            self.critical_high - self.critical_low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Analog,
    Digital,
    Calculated,
    DerivedCount,
}

/// Linear display conversion, `value * factor + offset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternateUnit {
    pub unit: String,
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
}

/// Definition of a monitorable quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub id: ParameterId,
    pub label: String,
    pub unit: String,
    #[serde(flatten)]
    pub bands: Bands,
    pub sensor_type: SensorType,

    /// Distance beyond the critical limits still considered physically plausible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plausibility_margin: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_unit: Option<AlternateUnit>,

    #[serde(default)]
    pub description: String,
}

impl ParameterDefinition {
    /// Same definition with different bands, used for controller overrides
    pub fn with_bands(&self, bands: Bands) -> Self {
        Self {
            bands,
            ..self.clone()
        }
    }

    /// Convert a value into the alternate display unit, if one is defined
    pub fn to_alternate_unit(&self, value: f64) -> Option<(f64, &str)> {
        self.alternate_unit
            .as_ref()
            .map(|alt| (value * alt.factor + alt.offset, alt.unit.as_str()))
    }

    /// Convert a value given in the alternate unit back into the canonical unit
    pub fn from_alternate_unit(&self, value: f64) -> Option<f64> {
        self.alternate_unit
            .as_ref()
            .filter(|alt| alt.factor != 0.0)
            .map(|alt| (value - alt.offset) / alt.factor)
    }
}

/// Immutable set of parameter definitions keyed by id
#[derive(Debug, Clone, Default)]
pub struct ParameterCatalog {
    definitions: BTreeMap<ParameterId, ParameterDefinition>,
}

impl ParameterCatalog {
    /// Build from already validated definitions. Later duplicates replace earlier ones,
    /// so callers validate uniqueness first.
    pub(crate) fn from_definitions(defs: impl IntoIterator<Item = ParameterDefinition>) -> Self {
        Self {
            definitions: defs.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ParameterDefinition> {
        self.definitions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn oil_pressure() -> ParameterDefinition {
        ParameterDefinition {
            id: ParameterId::from("oil_pressure"),
            label: "Oil Pressure".into(),
            unit: "PSI".into(),
            bands: Bands {
                normal_range: NormalRange { min: 25.0, max: 80.0 },
                warning_low: 20.0,
                warning_high: 85.0,
                critical_low: 15.0,
                critical_high: 100.0,
            },
            sensor_type: SensorType::Analog,
            plausibility_margin: Some(10.0),
            alternate_unit: Some(AlternateUnit {
                unit: "bar".into(),
                factor: 0.0689476,
                offset: 0.0,
            }),
            description: String::new(),
        }
    }

    #[test]
    fn test_valid_bands_pass() {
        assert!(oil_pressure().bands.check().is_ok());
    }

    #[test]
    fn test_inverted_bands_rejected() {
        let mut bands = oil_pressure().bands;
        bands.warning_high = 75.0;
        let err = bands.check().unwrap_err();
        assert!(err.contains("normal_range.max"));
        assert!(err.contains("warning_high"));
    }

    #[test]
    fn test_nan_edge_rejected() {
        let mut bands = oil_pressure().bands;
        bands.critical_low = f64::NAN;
        assert!(bands.check().unwrap_err().contains("critical_low"));
    }

    #[test]
    fn test_reference_span_falls_back_to_critical() {
        let bands = Bands {
            normal_range: NormalRange { min: 0.0, max: 0.0 },
            warning_low: 0.0,
            warning_high: 0.0,
            critical_low: 0.0,
            critical_high: 1.0,
        };
        assert_eq!(bands.reference_span(), 1.0);
        assert_eq!(oil_pressure().bands.reference_span(), 55.0);
    }

    #[test]
    fn test_psi_to_bar_conversion() {
        let def = oil_pressure();
        let (bar, unit) = def.to_alternate_unit(100.0).unwrap();
        assert_eq!(unit, "bar");
        assert!((bar - 6.89476).abs() < 1e-9);
        let back = def.from_alternate_unit(bar).unwrap();
        assert!((back - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_celsius_to_fahrenheit_offset() {
        let mut def = oil_pressure();
        def.alternate_unit = Some(AlternateUnit {
            unit: "°F".into(),
            factor: 1.8,
            offset: 32.0,
        });
        assert_eq!(def.to_alternate_unit(100.0), Some((212.0, "°F")));
    }

    #[test]
    fn test_flattened_yaml_shape() {
        let yaml = r#"
id: battery_voltage
label: Battery Voltage
unit: V
normal_range: { min: 24.8, max: 28.8 }
warning_low: 23.5
warning_high: 29.5
critical_low: 22.0
critical_high: 31.0
sensor_type: analog
"#;
        let def: ParameterDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.bands.normal_range.max, 28.8);
        assert_eq!(def.sensor_type, SensorType::Analog);
        assert!(def.plausibility_margin.is_none());
    }
}
