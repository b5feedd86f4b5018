//! Device families.
//!
//! Every family implements [`DeviceFamily`]: feature discovery, full-snapshot
//! refresh, typed water-heater access and the capability predicate. The three
//! single-tank lines share [`velis::VelisCore`] and additionally implement
//! [`SingleTankDevice`]. [`Device`] picks the family at discovery time.
//!
//! Setters read the stored value as `old`, send `{new, old}`, and touch the
//! store only once the server accepted the write.

pub mod evo;
pub mod galevo;
pub mod lydos;
pub mod velis;

use log::{debug, warn};
use std::sync::Arc;

use crate::client::{AristonClient, ClientError};
use crate::models::ariston::*;
use crate::store::{PropertyId, PropertyStore};

pub use evo::EvoDevice;
pub use galevo::GalevoDevice;
pub use lydos::LydosHybridDevice;
pub use velis::{VelisCore, VelisDevice};

// =====================
// Errors
// =====================

#[derive(Debug)]
pub enum DeviceError {
    Api(ClientError),
    /// The device lacks the capability, zone or data the operation needs.
    Unsupported(String),
    /// The mode code is valid but the device does not list it among its options.
    OptionNotOffered { property: PropertyId, code: i64 },
    /// The server reported a mode code outside the known set.
    UnknownMode { property: PropertyId, code: i64 },
    /// No option of `property` carries this label.
    UnknownOption { property: PropertyId, label: String },
    /// A value the write depends on is not in the current snapshot.
    MissingValue { property: PropertyId, zone: ZoneNumber },
    /// The server had nothing for this device (404 or empty body).
    NotFound(String),
}

impl core::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceError::Api(e) => write!(f, "api error: {}", e),
            DeviceError::Unsupported(s) => write!(f, "unsupported: {}", s),
            DeviceError::OptionNotOffered { property, code } => {
                write!(f, "{} option {} is not offered by this device", property, code)
            }
            DeviceError::UnknownMode { property, code } => write!(f, "unknown {} code {}", property, code),
            DeviceError::UnknownOption { property, label } => write!(f, "no {} option named {:?}", property, label),
            DeviceError::MissingValue { property, zone } => {
                write!(f, "{} (zone {}) is missing from the current state", property, zone)
            }
            DeviceError::NotFound(s) => write!(f, "not found: {}", s),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Api(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClientError> for DeviceError {
    fn from(value: ClientError) -> Self {
        DeviceError::Api(value)
    }
}

// =====================
// Identity
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Family {
    Galevo,
    Velis,
    Evo,
    LydosHybrid,
}

impl Family {
    pub fn select(system_type: SystemType, whe_type: Option<WheType>) -> Family {
        match (system_type, whe_type) {
            (SystemType::Galevo, _) => Family::Galevo,
            (_, Some(WheType::Evo | WheType::Evo2)) => Family::Evo,
            (_, Some(WheType::LydosHybrid)) => Family::LydosHybrid,
            _ => Family::Velis,
        }
    }
}

impl core::fmt::Display for Family {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Family::Galevo => "galevo",
            Family::Velis => "velis",
            Family::Evo => "evo",
            Family::LydosHybrid => "lydos-hybrid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub gateway: GatewayId,
    pub serial: Option<String>,
    pub name: Option<String>,
    pub firmware: Option<String>,
    pub system_type: SystemType,
    pub whe_type: Option<WheType>,
    pub family: Family,
}

impl DeviceIdentity {
    /// Only Galevo gateways are modeled among `remote/plants`; an absent system
    /// type is read as Galevo.
    pub fn from_remote_plant(plant: &RemotePlant) -> Option<Self> {
        let system_type = match plant.gw_sys_type {
            None => SystemType::Galevo,
            Some(code) => SystemType::from_code(code)?,
        };
        if system_type != SystemType::Galevo {
            return None;
        }
        Some(DeviceIdentity {
            gateway: plant.gw_id.clone(),
            serial: plant.gw_serial.clone(),
            name: plant.plant_name.clone(),
            firmware: plant.gw_fw_ver.clone(),
            system_type,
            whe_type: None,
            family: Family::Galevo,
        })
    }

    pub fn from_velis_plant(plant: &VelisPlant) -> Self {
        let system_type = plant.sys.and_then(SystemType::from_code).unwrap_or(SystemType::Velis);
        let whe_type = plant.whe_type.and_then(WheType::from_code);
        DeviceIdentity {
            gateway: plant.gw.clone(),
            serial: plant.sn.clone(),
            name: plant.name.clone(),
            firmware: None,
            system_type,
            whe_type,
            family: Family::select(system_type, whe_type),
        }
    }
}

/// Lists every device on the account, Galevo plants first.
pub fn discover(client: &AristonClient) -> Result<Vec<DeviceIdentity>, ClientError> {
    let mut found = Vec::new();
    for plant in client.get_remote_plants()? {
        match DeviceIdentity::from_remote_plant(&plant) {
            Some(identity) => found.push(identity),
            None => warn!(
                "Skipping gateway {} with unsupported system type {:?}",
                plant.gw_id, plant.gw_sys_type
            ),
        }
    }
    for plant in client.get_velis_plants()? {
        if found.iter().any(|d| d.gateway == plant.gw) {
            continue;
        }
        found.push(DeviceIdentity::from_velis_plant(&plant));
    }
    debug!("Discovered {} device(s)", found.len());
    Ok(found)
}

/// Picks the device on `gateway`, or the first one when no gateway is given.
pub fn select_device(found: Vec<DeviceIdentity>, gateway: Option<&GatewayId>) -> Option<DeviceIdentity> {
    match gateway {
        Some(gw) => found.into_iter().find(|d| &d.gateway == gw),
        None => found.into_iter().next(),
    }
}

// =====================
// Features
// =====================

#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Culture sent with item reads (labels come back localized).
    pub culture: String,
    /// Exposes the monthly consumption and cost figures.
    pub extra_energy_features: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        DeviceOptions {
            culture: "en-US".to_string(),
            extra_energy_features: false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceFeature {
    HasBoiler,
    HasMetering,
    DhwModeChangeable,
    AutoThermoReg,
    HasSlp,
    HasCh,
    HasDhw,
    HasOutsideTemp,
    HasDhwStorageTemperature,
}

impl DeviceFeature {
    /// Name in the server feature map; `None` for derived features.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            DeviceFeature::HasBoiler => Some("hasBoiler"),
            DeviceFeature::HasMetering => Some("hasMetering"),
            DeviceFeature::DhwModeChangeable => Some("dhwModeChangeable"),
            DeviceFeature::AutoThermoReg => Some("autoThermoReg"),
            DeviceFeature::HasSlp => Some("hasSlp"),
            _ => None,
        }
    }
}

/// Features computed by the crate. `None` until known; once set, never recomputed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomFeatures {
    pub has_ch: Option<bool>,
    pub has_dhw: Option<bool>,
    pub has_outside_temp: Option<bool>,
    pub has_dhw_storage_temperature: Option<bool>,
}

impl CustomFeatures {
    pub fn get(&self, feature: DeviceFeature) -> Option<bool> {
        match feature {
            DeviceFeature::HasCh => self.has_ch,
            DeviceFeature::HasDhw => self.has_dhw,
            DeviceFeature::HasOutsideTemp => self.has_outside_temp,
            DeviceFeature::HasDhwStorageTemperature => self.has_dhw_storage_temperature,
            _ => None,
        }
    }
}

// =====================
// Energy
// =====================

/// Consumption category of the monthly account.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsumptionCategory {
    Heating,
    Water,
}

impl ConsumptionCategory {
    fn index(self) -> usize {
        match self {
            ConsumptionCategory::Heating => 0,
            ConsumptionCategory::Water => 1,
        }
    }
}

/// Sequence kind of heating gas consumption.
pub const GAS_HEATING_KIND: i64 = 0;
/// Sequence kind of hot-water gas consumption.
pub const GAS_WATER_KIND: i64 = 4;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergySnapshot {
    pub sequences: Vec<ConsumptionSequence>,
    pub account: Option<EnergyAccount>,
    pub settings: Option<ConsumptionsSettings>,
}

impl EnergySnapshot {
    /// Latest two-hour bucket of the last-day sequence of `kind`.
    pub fn last_two_hours(&self, kind: i64) -> Option<f64> {
        self.sequences
            .iter()
            .find(|s| s.kind == kind && s.period == LAST_DAY_PERIOD)
            .and_then(|s| s.values.last().copied())
    }

    pub fn last_month(&self, category: ConsumptionCategory) -> Option<&MonthlyConsumption> {
        self.account.as_ref()?.last_month.get(category.index())
    }
}

/// Fetches sequences, account and settings in one go.
pub(crate) fn fetch_energy(
    client: &AristonClient,
    gw: &GatewayId,
    usages: &str,
    has_slp: bool,
) -> Result<EnergySnapshot, ClientError> {
    let sequences = client.get_consumption_sequences(gw, usages, has_slp)?;
    let account = client.get_energy_account(gw)?;
    let settings = client.get_consumptions_settings(gw)?;
    Ok(EnergySnapshot {
        sequences,
        account,
        settings,
    })
}

/// Writes consumption settings and mirrors them into `energy` on success.
pub(crate) fn write_consumptions_settings(
    client: &AristonClient,
    gw: &GatewayId,
    energy: &mut Option<EnergySnapshot>,
    new: ConsumptionsSettings,
) -> Result<(), DeviceError> {
    let Some(snapshot) = energy.as_mut() else {
        return Err(DeviceError::Unsupported("energy data not loaded yet".into()));
    };
    let old = snapshot.settings.clone().unwrap_or_default();
    client.set_consumptions_settings(gw, &new, &old)?;
    snapshot.settings = Some(new);
    Ok(())
}

// =====================
// Holiday
// =====================

#[derive(Debug, Clone, PartialEq)]
pub enum HolidayState {
    Inactive,
    Active { expires_on: Option<chrono::NaiveDateTime> },
}

// =====================
// Family contract
// =====================

pub trait DeviceFamily {
    fn identity(&self) -> &DeviceIdentity;
    fn options(&self) -> &DeviceOptions;
    fn features(&self) -> &Features;
    fn custom_features(&self) -> &CustomFeatures;
    /// Current state snapshot.
    fn store(&self) -> &PropertyStore;

    fn refresh_features(&mut self) -> Result<(), DeviceError>;
    /// Replaces the snapshot. On error the previous snapshot stays.
    fn refresh_state(&mut self) -> Result<(), DeviceError>;

    fn has_metering(&self) -> bool {
        self.features().flag("hasMetering")
    }

    fn refresh_energy(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported(format!("{} has no energy reports", self.identity().family)))
    }

    fn energy(&self) -> Option<&EnergySnapshot> {
        None
    }

    fn set_consumptions_settings(&mut self, _new: ConsumptionsSettings) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported(format!("{} has no energy settings", self.identity().family)))
    }

    fn water_heater_current_temperature(&self) -> Option<f64>;
    fn water_heater_target_temperature(&self) -> Option<f64>;
    fn water_heater_minimum_temperature(&self) -> Option<f64>;
    fn water_heater_maximum_temperature(&self) -> Option<f64>;
    /// Labels accepted by [`DeviceFamily::set_water_heater_operation_mode`].
    fn water_heater_operation_modes(&self) -> Vec<String>;
    fn water_heater_operation_mode(&self) -> Result<Option<String>, DeviceError>;
    fn set_water_heater_temperature(&mut self, temperature: f64) -> Result<(), DeviceError>;
    fn set_water_heater_operation_mode(&mut self, label: &str) -> Result<(), DeviceError>;

    /// True when the system type is allowed, the extra energy option is on if
    /// required, and every required feature is set by the server or derived.
    fn is_feature_available(
        &self,
        required: &[DeviceFeature],
        requires_extra_energy: bool,
        allowed_system_types: Option<&[SystemType]>,
    ) -> bool {
        if let Some(allowed) = allowed_system_types
            && !allowed.contains(&self.identity().system_type)
        {
            return false;
        }
        if requires_extra_energy && !self.options().extra_energy_features {
            return false;
        }
        required.iter().all(|f| {
            self.custom_features().get(*f) == Some(true) || f.wire_name().is_some_and(|n| self.features().flag(n))
        })
    }
}

/// Controls of the single-tank water heaters.
pub trait SingleTankDevice: DeviceFamily {
    fn core(&self) -> &VelisCore;

    /// Plant settings snapshot (anti-legionella, setpoint bounds).
    fn settings(&self) -> &PropertyStore {
        &self.core().settings
    }

    fn power(&self) -> Option<bool> {
        self.core().state.flag(PropertyId::On, DEVICE_ZONE)
    }

    fn eco_mode(&self) -> Option<bool> {
        self.core().state.flag(PropertyId::Eco, DEVICE_ZONE)
    }

    fn is_heating(&self) -> Option<bool> {
        self.core().state.flag(PropertyId::HeatRequest, DEVICE_ZONE)
    }

    fn average_showers(&self) -> Option<i64> {
        self.core().state.code(PropertyId::AverageShowers, DEVICE_ZONE)
    }

    fn remaining_time(&self) -> Option<&str> {
        self.core().state.text(PropertyId::RemainingTime, DEVICE_ZONE)
    }

    fn anti_legionella(&self) -> Option<bool> {
        let core = self.core();
        core.settings.flag(core.setting_ids.anti_legionella, DEVICE_ZONE)
    }

    fn max_setpoint_temperature(&self) -> Option<f64> {
        let core = self.core();
        core.settings.number(core.setting_ids.max_setpoint, DEVICE_ZONE)
    }

    /// `(min, max)` accepted by [`SingleTankDevice::set_max_setpoint_temperature`].
    fn max_setpoint_temperature_bounds(&self) -> (Option<f64>, Option<f64>) {
        let core = self.core();
        (
            core.settings.number(core.setting_ids.max_setpoint_min, DEVICE_ZONE),
            core.settings.number(core.setting_ids.max_setpoint_max, DEVICE_ZONE),
        )
    }

    fn set_power(&mut self, on: bool) -> Result<(), DeviceError>;
    fn set_eco_mode(&mut self, eco: bool) -> Result<(), DeviceError>;
    fn set_anti_legionella(&mut self, on: bool) -> Result<(), DeviceError>;
    fn set_max_setpoint_temperature(&mut self, temperature: f64) -> Result<(), DeviceError>;
}

// =====================
// Discovery-time selector
// =====================

#[derive(Debug)]
pub enum Device {
    Galevo(GalevoDevice),
    Velis(VelisDevice),
    Evo(EvoDevice),
    LydosHybrid(LydosHybridDevice),
}

macro_rules! each_variant {
    ($self:expr, $d:ident => $body:expr) => {
        match $self {
            Device::Galevo($d) => $body,
            Device::Velis($d) => $body,
            Device::Evo($d) => $body,
            Device::LydosHybrid($d) => $body,
        }
    };
}

impl Device {
    pub fn new(client: Arc<AristonClient>, identity: DeviceIdentity, options: DeviceOptions) -> Device {
        match identity.family {
            Family::Galevo => Device::Galevo(GalevoDevice::new(client, identity, options)),
            Family::Velis => Device::Velis(VelisDevice::new(client, identity, options)),
            Family::Evo => Device::Evo(EvoDevice::new(client, identity, options)),
            Family::LydosHybrid => Device::LydosHybrid(LydosHybridDevice::new(client, identity, options)),
        }
    }

    pub fn as_galevo(&self) -> Option<&GalevoDevice> {
        match self {
            Device::Galevo(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_galevo_mut(&mut self) -> Option<&mut GalevoDevice> {
        match self {
            Device::Galevo(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_single_tank(&self) -> Option<&dyn SingleTankDevice> {
        match self {
            Device::Galevo(_) => None,
            Device::Velis(d) => Some(d),
            Device::Evo(d) => Some(d),
            Device::LydosHybrid(d) => Some(d),
        }
    }

    pub fn as_single_tank_mut(&mut self) -> Option<&mut dyn SingleTankDevice> {
        match self {
            Device::Galevo(_) => None,
            Device::Velis(d) => Some(d),
            Device::Evo(d) => Some(d),
            Device::LydosHybrid(d) => Some(d),
        }
    }
}

impl DeviceFamily for Device {
    fn identity(&self) -> &DeviceIdentity {
        each_variant!(self, d => d.identity())
    }

    fn options(&self) -> &DeviceOptions {
        each_variant!(self, d => d.options())
    }

    fn features(&self) -> &Features {
        each_variant!(self, d => d.features())
    }

    fn custom_features(&self) -> &CustomFeatures {
        each_variant!(self, d => d.custom_features())
    }

    fn store(&self) -> &PropertyStore {
        each_variant!(self, d => d.store())
    }

    fn refresh_features(&mut self) -> Result<(), DeviceError> {
        each_variant!(self, d => d.refresh_features())
    }

    fn refresh_state(&mut self) -> Result<(), DeviceError> {
        each_variant!(self, d => d.refresh_state())
    }

    fn has_metering(&self) -> bool {
        each_variant!(self, d => d.has_metering())
    }

    fn refresh_energy(&mut self) -> Result<(), DeviceError> {
        each_variant!(self, d => d.refresh_energy())
    }

    fn energy(&self) -> Option<&EnergySnapshot> {
        each_variant!(self, d => d.energy())
    }

    fn set_consumptions_settings(&mut self, new: ConsumptionsSettings) -> Result<(), DeviceError> {
        each_variant!(self, d => d.set_consumptions_settings(new))
    }

    fn water_heater_current_temperature(&self) -> Option<f64> {
        each_variant!(self, d => d.water_heater_current_temperature())
    }

    fn water_heater_target_temperature(&self) -> Option<f64> {
        each_variant!(self, d => d.water_heater_target_temperature())
    }

    fn water_heater_minimum_temperature(&self) -> Option<f64> {
        each_variant!(self, d => d.water_heater_minimum_temperature())
    }

    fn water_heater_maximum_temperature(&self) -> Option<f64> {
        each_variant!(self, d => d.water_heater_maximum_temperature())
    }

    fn water_heater_operation_modes(&self) -> Vec<String> {
        each_variant!(self, d => d.water_heater_operation_modes())
    }

    fn water_heater_operation_mode(&self) -> Result<Option<String>, DeviceError> {
        each_variant!(self, d => d.water_heater_operation_mode())
    }

    fn set_water_heater_temperature(&mut self, temperature: f64) -> Result<(), DeviceError> {
        each_variant!(self, d => d.set_water_heater_temperature(temperature))
    }

    fn set_water_heater_operation_mode(&mut self, label: &str) -> Result<(), DeviceError> {
        each_variant!(self, d => d.set_water_heater_operation_mode(label))
    }
}
