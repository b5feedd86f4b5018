//! Wire models for the Ariston remote API.
//!
//! Notes
//! - Discovery, feature and energy payloads are modeled as typed structs; unknown
//!   feature keys are kept in `Features::extra` so they can be echoed back to the
//!   server in item requests.
//! - Integer-coded enumerations (system type, plant/zone/DHW modes, water-heater
//!   operation modes) use `int_code_enum!` instead of serde derives because the
//!   server sends bare integers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayId(pub String);

impl core::fmt::Display for GatewayId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zone number as used by the items API. Zone 0 addresses device-wide items.
pub type ZoneNumber = u32;

pub const DEVICE_ZONE: ZoneNumber = 0;

// =====================
// Integer-coded enums
// =====================

/// Declares a closed enumeration over server integer codes with `code()`,
/// `from_code()`, `name()`, `ALL` and integer serde.
macro_rules! int_code_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $code:literal => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn code(self) -> i64 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.name().eq_ignore_ascii_case(name))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_i64(self.code())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let code = i64::deserialize(deserializer)?;
                $name::from_code(code).ok_or_else(|| {
                    serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(code),
                        &concat!("a known ", stringify!($name), " code"),
                    )
                })
            }
        }
    };
}

int_code_enum! {
    /// Gateway system type reported at discovery.
    pub enum SystemType {
        Galevo = 1 => "GALEVO",
        Velis = 2 => "VELIS",
        Bsb = 3 => "BSB",
    }
}

int_code_enum! {
    /// Single-tank water heater product line.
    pub enum WheType {
        Evo = 1 => "EVO",
        LydosHybrid = 2 => "LYDOS_HYBRID",
        Lydos = 3 => "LYDOS",
        NuosSplit = 4 => "NUOS_SPLIT",
        Andris2 = 5 => "ANDRIS2",
        Evo2 = 6 => "EVO2",
        Lux2 = 7 => "LUX2",
    }
}

int_code_enum! {
    /// Device-wide operating mode of a Galevo plant.
    pub enum PlantMode {
        Summer = 0 => "SUMMER",
        Winter = 1 => "WINTER",
        HeatingOnly = 2 => "HEATING_ONLY",
        Cooling = 3 => "COOLING",
        CoolingOnly = 4 => "COOLING_ONLY",
        Off = 5 => "OFF",
    }
}

int_code_enum! {
    /// Per-zone operating mode of a Galevo plant.
    pub enum ZoneMode {
        Off = 0 => "OFF",
        Manual = 1 => "MANUAL",
        Manual2 = 2 => "MANUAL2",
        TimeProgram = 3 => "TIME_PROGRAM",
    }
}

int_code_enum! {
    /// Domestic hot water mode codes of a Galevo boiler.
    pub enum DhwMode {
        Disabled = 0 => "DISABLED",
        TimeBased = 1 => "TIME_BASED",
        AlwaysActive = 2 => "ALWAYS_ACTIVE",
        HcHp = 3 => "HC_HP",
        HcHp40 = 4 => "HC_HP_40",
        Green = 5 => "GREEN",
    }
}

int_code_enum! {
    /// Operation modes of the MED (Velis) water heater line.
    pub enum VelisPlantMode {
        Manual = 1 => "MANUAL",
        Program = 5 => "PROGRAM",
        Night = 8 => "NIGHT",
    }
}

int_code_enum! {
    /// Operation modes of the Velis Evo water heater line.
    pub enum EvoPlantMode {
        Manual = 1 => "MANUAL",
        Program = 5 => "PROGRAM",
    }
}

int_code_enum! {
    /// Operation modes of the Lydos hybrid (SE) water heater line.
    pub enum LydosPlantMode {
        IMemory = 1 => "IMEMORY",
        Green = 2 => "GREEN",
        Program = 6 => "PROGRAM",
        Boost = 7 => "BOOST",
    }
}

// =====================
// Authentication
// =====================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub usr: &'a str,
    pub pwd: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

// =====================
// Discovery
// =====================

/// Entry of `remote/plants`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlant {
    pub gw_id: GatewayId,
    #[serde(default)]
    pub gw_serial: Option<String>,
    #[serde(default)]
    pub plant_name: Option<String>,
    #[serde(default)]
    pub gw_fw_ver: Option<String>,
    #[serde(default)]
    pub gw_sys_type: Option<i64>,
}

/// Entry of `velis/plants`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VelisPlant {
    pub gw: GatewayId,
    #[serde(default)]
    pub sn: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sys: Option<i64>,
    #[serde(default)]
    pub whe_type: Option<i64>,
    #[serde(default)]
    pub whe_model_type: Option<i64>,
}

// =====================
// Features
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ZoneDescriptor {
    pub num: ZoneNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_sens: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Server-provided capability map of one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    #[serde(default)]
    pub zones: Vec<ZoneDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_boiler: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_metering: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhw_mode_changeable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_thermo_reg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_slp: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Features {
    /// Boolean capability by wire name. Absent or non-boolean entries read as `false`.
    pub fn flag(&self, wire_name: &str) -> bool {
        let known = match wire_name {
            "hasBoiler" => self.has_boiler,
            "hasMetering" => self.has_metering,
            "dhwModeChangeable" => self.dhw_mode_changeable,
            "autoThermoReg" => self.auto_thermo_reg,
            "hasSlp" => self.has_slp,
            other => self.extra.get(other).and_then(Value::as_bool),
        };
        known.unwrap_or(false)
    }

    pub fn zone_numbers(&self) -> Vec<ZoneNumber> {
        self.zones.iter().map(|z| z.num).collect()
    }

    pub fn has_zone(&self, zone: ZoneNumber) -> bool {
        self.zones.iter().any(|z| z.num == zone)
    }
}

// =====================
// Energy
// =====================

/// Period code of the consumption sequence holding two-hour buckets.
pub const LAST_DAY_PERIOD: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionSequence {
    #[serde(rename = "k")]
    pub kind: i64,
    #[serde(rename = "p")]
    pub period: i64,
    #[serde(rename = "v", default)]
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonthlyConsumption {
    #[serde(rename = "use", default)]
    pub usage: Option<i64>,
    #[serde(default)]
    pub gas: Option<f64>,
    #[serde(default)]
    pub elect: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EnergyAccount {
    #[serde(rename = "LastMonth", alias = "lastMonth", default)]
    pub last_month: Vec<MonthlyConsumption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionsSettings {
    #[serde(default)]
    pub currency: Option<i64>,
    #[serde(default)]
    pub gas_type: Option<i64>,
    #[serde(default)]
    pub gas_energy_unit: Option<i64>,
    #[serde(default)]
    pub gas_cost: Option<f64>,
    #[serde(default)]
    pub elec_cost: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_codes_reject_unknown_values() {
        assert_eq!(PlantMode::from_code(1), Some(PlantMode::Winter));
        assert_eq!(PlantMode::from_code(9), None);
        let err = serde_json::from_str::<ZoneMode>("7").unwrap_err();
        assert!(err.to_string().contains("ZoneMode"));
    }

    #[test]
    fn water_heater_mode_sets_differ_per_line() {
        assert_eq!(LydosPlantMode::from_name("boost"), Some(LydosPlantMode::Boost));
        assert_eq!(EvoPlantMode::from_name("NIGHT"), None);
        assert_eq!(VelisPlantMode::Night.code(), 8);
    }

    #[test]
    fn features_keep_unknown_keys() {
        let features: Features = serde_json::from_str(
            r#"{"zones":[{"num":1},{"num":2}],"hasBoiler":true,"hasEm":true,"weatherProvider":2}"#,
        )
        .unwrap();
        assert_eq!(features.zone_numbers(), vec![1, 2]);
        assert!(features.flag("hasBoiler"));
        assert!(features.flag("hasEm"));
        assert!(!features.flag("hasMetering"));
        assert!(!features.flag("weatherProvider"));

        let echoed = serde_json::to_value(&features).unwrap();
        assert_eq!(echoed["weatherProvider"], 2);
    }
}
