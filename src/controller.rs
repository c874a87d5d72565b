//! Controller profile registry.
//!
//! Controller families are plain data: the parameters they expose, optional
//! threshold overrides, and which reset methods each firmware version offers.
//! Adding a controller is a knowledge-base change, not a code change.

use crate::ids::{ControllerId, ParameterId};
use crate::parameter::{Bands, ParameterDefinition};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Firmware version key matching any version
pub const ANY_FIRMWARE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMethod {
    Automatic,
    Manual,
    Keypad,
    Software,
}

impl fmt::Display for ResetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResetMethod::Automatic => "automatic",
            ResetMethod::Manual => "manual",
            ResetMethod::Keypad => "keypad",
            ResetMethod::Software => "software",
        };
        f.pad(name)
    }
}

/// Reset methods available on one firmware version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareSupport {
    pub version: String,
    pub reset_methods: Vec<ResetMethod>,
}

/// Presentation hints; the engine never reads these
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConventions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_code_format: Option<String>,
    #[serde(default)]
    pub alarm_led: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerProfile {
    pub id: ControllerId,
    pub manufacturer: String,
    pub model: String,
    #[serde(default)]
    pub description: String,
    pub parameter_ids: BTreeSet<ParameterId>,
    pub firmware: Vec<FirmwareSupport>,
    #[serde(default)]
    pub threshold_overrides: BTreeMap<ParameterId, Bands>,
    #[serde(default)]
    pub display: DisplayConventions,
}

impl ControllerProfile {
    pub fn supports(&self, parameter: &str) -> bool {
        self.parameter_ids.contains(parameter)
    }

    /// Firmware entry for a version; an exact match wins over the wildcard
    pub fn firmware(&self, version: &str) -> Option<&FirmwareSupport> {
        self.firmware
            .iter()
            .find(|fw| fw.version == version)
            .or_else(|| self.firmware.iter().find(|fw| fw.version == ANY_FIRMWARE))
    }

    pub fn reset_methods(&self, version: &str) -> &[ResetMethod] {
        self.firmware(version)
            .map(|fw| fw.reset_methods.as_slice())
            .unwrap_or(&[])
    }

    /// Definition with this controller's threshold override applied, if any
    pub fn effective_definition<'a>(
        &self,
        def: &'a ParameterDefinition,
    ) -> Cow<'a, ParameterDefinition> {
        match self.threshold_overrides.get(&def.id) {
            Some(bands) => Cow::Owned(def.with_bands(*bands)),
            None => Cow::Borrowed(def),
        }
    }
}

/// Read-only registry of controller profiles
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry {
    profiles: BTreeMap<ControllerId, ControllerProfile>,
}

impl ControllerRegistry {
    pub(crate) fn from_profiles(profiles: impl IntoIterator<Item = ControllerProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ControllerProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControllerProfile> {
        self.profiles.values()
    }

    pub fn by_manufacturer<'a>(
        &'a self,
        manufacturer: &'a str,
    ) -> impl Iterator<Item = &'a ControllerProfile> + 'a {
        self.profiles
            .values()
            .filter(move |p| p.manufacturer.eq_ignore_ascii_case(manufacturer))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::tests::oil_pressure;
    use crate::parameter::NormalRange;

    fn intelisys() -> ControllerProfile {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            ParameterId::from("oil_pressure"),
            Bands {
                normal_range: NormalRange { min: 25.0, max: 90.0 },
                warning_low: 20.0,
                warning_high: 95.0,
                critical_low: 12.0,
                critical_high: 110.0,
            },
        );
        ControllerProfile {
            id: ControllerId::from("comap-intelisys-ntc"),
            manufacturer: "ComAp".into(),
            model: "InteliSys NTC".into(),
            description: String::new(),
            parameter_ids: ["oil_pressure", "coolant_temp"]
                .into_iter()
                .map(ParameterId::from)
                .collect(),
            firmware: vec![
                FirmwareSupport {
                    version: "3.1".into(),
                    reset_methods: vec![ResetMethod::Keypad, ResetMethod::Software],
                },
                FirmwareSupport {
                    version: ANY_FIRMWARE.into(),
                    reset_methods: vec![ResetMethod::Keypad],
                },
            ],
            threshold_overrides: overrides,
            display: DisplayConventions::default(),
        }
    }

    #[test]
    fn test_firmware_exact_match_beats_wildcard() {
        let profile = intelisys();
        assert_eq!(
            profile.reset_methods("3.1"),
            &[ResetMethod::Keypad, ResetMethod::Software]
        );
        assert_eq!(profile.reset_methods("2.0"), &[ResetMethod::Keypad]);
    }

    #[test]
    fn test_no_firmware_entry_means_no_methods() {
        let mut profile = intelisys();
        profile.firmware.retain(|fw| fw.version != ANY_FIRMWARE);
        assert!(profile.firmware("2.0").is_none());
        assert!(profile.reset_methods("2.0").is_empty());
    }

    #[test]
    fn test_effective_definition_applies_override() {
        let profile = intelisys();
        let def = oil_pressure();
        let effective = profile.effective_definition(&def);
        assert_eq!(effective.bands.critical_low, 12.0);
        assert_eq!(effective.label, def.label);

        let mut other = def.clone();
        other.id = ParameterId::from("fuel_level");
        assert!(matches!(profile.effective_definition(&other), Cow::Borrowed(_)));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ControllerRegistry::from_profiles(vec![intelisys()]);
        assert!(registry.contains("comap-intelisys-ntc"));
        assert!(registry.get("dse-7320").is_none());
        assert_eq!(registry.by_manufacturer("comap").count(), 1);
        assert!(registry.get("comap-intelisys-ntc").unwrap().supports("coolant_temp"));
    }
}
