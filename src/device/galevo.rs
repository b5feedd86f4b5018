//! Galevo multi-zone heating controller, optionally with a DHW boiler.

use chrono::{NaiveDate, NaiveTime};
use log::{debug, info};
use std::sync::Arc;

use super::*;
use crate::store::{Field, FieldValue, PropertyValue, format_expiry};

const ZONE_ITEMS: [PropertyId; 6] = [
    PropertyId::ZoneMeasuredTemp,
    PropertyId::ZoneDesiredTemp,
    PropertyId::ZoneComfortTemp,
    PropertyId::ZoneMode,
    PropertyId::ZoneHeatRequest,
    PropertyId::ZoneEconomyTemp,
];

const DEVICE_ITEMS: [PropertyId; 8] = [
    PropertyId::PlantMode,
    PropertyId::IsFlameOn,
    PropertyId::Holiday,
    PropertyId::OutsideTemp,
    PropertyId::HeatingCircuitPressure,
    PropertyId::ChFlowSetpointTemp,
    PropertyId::ChFlowTemp,
    PropertyId::AutomaticThermoregulation,
];

const DHW_ITEMS: [PropertyId; 3] = [PropertyId::DhwTemp, PropertyId::DhwMode, PropertyId::DhwStorageTemperature];

#[derive(Debug)]
pub struct GalevoDevice {
    client: Arc<AristonClient>,
    identity: DeviceIdentity,
    options: DeviceOptions,
    features: Features,
    custom: CustomFeatures,
    store: PropertyStore,
    energy: Option<EnergySnapshot>,
}

impl GalevoDevice {
    pub fn new(client: Arc<AristonClient>, identity: DeviceIdentity, options: DeviceOptions) -> Self {
        GalevoDevice {
            client,
            identity,
            options,
            features: Features::default(),
            custom: CustomFeatures::default(),
            store: PropertyStore::new(),
            energy: None,
        }
    }

    fn gw(&self) -> &GatewayId {
        &self.identity.gateway
    }

    fn has_dhw(&self) -> bool {
        self.custom.has_dhw == Some(true)
    }

    /// Items requested on every refresh: the zone block for each zone, then
    /// the device-wide block.
    fn requested_items(&self) -> Vec<(PropertyId, ZoneNumber)> {
        let mut items = Vec::new();
        for zone in self.features.zone_numbers() {
            items.extend(ZONE_ITEMS.iter().map(|id| (*id, zone)));
        }
        items.extend(DEVICE_ITEMS.iter().map(|id| (*id, DEVICE_ZONE)));
        if self.has_dhw() {
            items.extend(DHW_ITEMS.iter().map(|id| (*id, DEVICE_ZONE)));
        }
        items
    }

    /// Computes derived features from the first snapshot that can decide them.
    fn derive_features(&mut self) {
        if self.custom.has_outside_temp.is_none()
            && let Some(item) = self.store.item(PropertyId::OutsideTemp, DEVICE_ZONE)
            && let (Some(value), Some(max)) = (item.value.as_ref().and_then(PropertyValue::as_f64), item.max)
        {
            // the server reports value == max when no sensor is wired
            self.custom.has_outside_temp = Some(value != max);
        }
        if self.custom.has_dhw_storage_temperature.is_none() && self.has_dhw() && !self.store.is_empty() {
            self.custom.has_dhw_storage_temperature =
                Some(self.store.value(PropertyId::DhwStorageTemperature, DEVICE_ZONE).is_some());
        }
    }

    fn require_zone(&self, zone: ZoneNumber) -> Result<(), DeviceError> {
        if self.features.has_zone(zone) {
            Ok(())
        } else {
            Err(DeviceError::Unsupported(format!("zone {} does not exist on {}", zone, self.gw())))
        }
    }

    fn require_dhw(&self) -> Result<(), DeviceError> {
        if self.has_dhw() {
            Ok(())
        } else {
            Err(DeviceError::Unsupported(format!("{} has no boiler", self.gw())))
        }
    }

    fn require_offered(&self, property: PropertyId, zone: ZoneNumber, code: i64) -> Result<(), DeviceError> {
        let offered = self.store.options(property, zone);
        if offered.is_empty() || offered.contains(&code) {
            Ok(())
        } else {
            Err(DeviceError::OptionNotOffered { property, code })
        }
    }

    fn zone_number(&self, id: PropertyId, zone: ZoneNumber) -> Option<f64> {
        self.store.number(id, zone)
    }

    // =====================
    // Zone getters
    // =====================

    pub fn zones(&self) -> Vec<ZoneNumber> {
        self.features.zone_numbers()
    }

    pub fn measured_temperature(&self, zone: ZoneNumber) -> Option<f64> {
        self.zone_number(PropertyId::ZoneMeasuredTemp, zone)
    }

    pub fn desired_temperature(&self, zone: ZoneNumber) -> Option<f64> {
        self.zone_number(PropertyId::ZoneDesiredTemp, zone)
    }

    pub fn comfort_temperature(&self, zone: ZoneNumber) -> Option<f64> {
        self.zone_number(PropertyId::ZoneComfortTemp, zone)
    }

    /// `(min, max, step)` of the comfort setpoint.
    pub fn comfort_temperature_range(&self, zone: ZoneNumber) -> (Option<f64>, Option<f64>, Option<f64>) {
        match self.store.item(PropertyId::ZoneComfortTemp, zone) {
            Some(item) => (item.min, item.max, item.step),
            None => (None, None, None),
        }
    }

    pub fn economy_temperature(&self, zone: ZoneNumber) -> Option<f64> {
        self.zone_number(PropertyId::ZoneEconomyTemp, zone)
    }

    pub fn zone_heat_request(&self, zone: ZoneNumber) -> Option<bool> {
        self.store.flag(PropertyId::ZoneHeatRequest, zone)
    }

    pub fn zone_mode(&self, zone: ZoneNumber) -> Result<Option<ZoneMode>, DeviceError> {
        self.store
            .code(PropertyId::ZoneMode, zone)
            .map(|code| {
                ZoneMode::from_code(code).ok_or(DeviceError::UnknownMode {
                    property: PropertyId::ZoneMode,
                    code,
                })
            })
            .transpose()
    }

    /// Zone modes offered by the device; unknown codes are skipped.
    pub fn zone_mode_options(&self, zone: ZoneNumber) -> Vec<ZoneMode> {
        self.store
            .options(PropertyId::ZoneMode, zone)
            .iter()
            .filter_map(|c| ZoneMode::from_code(*c))
            .collect()
    }

    // =====================
    // Device-wide getters
    // =====================

    pub fn plant_mode(&self) -> Result<Option<PlantMode>, DeviceError> {
        self.store
            .code(PropertyId::PlantMode, DEVICE_ZONE)
            .map(|code| {
                PlantMode::from_code(code).ok_or(DeviceError::UnknownMode {
                    property: PropertyId::PlantMode,
                    code,
                })
            })
            .transpose()
    }

    pub fn plant_mode_options(&self) -> Vec<PlantMode> {
        self.store
            .options(PropertyId::PlantMode, DEVICE_ZONE)
            .iter()
            .filter_map(|c| PlantMode::from_code(*c))
            .collect()
    }

    /// Server-provided label of the current plant mode.
    pub fn plant_mode_label(&self) -> Option<&str> {
        option_label(&self.store, PropertyId::PlantMode)
    }

    pub fn is_flame_on(&self) -> Option<bool> {
        self.store.flag(PropertyId::IsFlameOn, DEVICE_ZONE)
    }

    pub fn holiday(&self) -> Option<HolidayState> {
        let active = self.store.flag(PropertyId::Holiday, DEVICE_ZONE)?;
        Some(if active {
            HolidayState::Active {
                expires_on: self.store.expires_on(PropertyId::Holiday, DEVICE_ZONE),
            }
        } else {
            HolidayState::Inactive
        })
    }

    /// Outdoor temperature; `None` when no sensor is wired.
    pub fn outside_temperature(&self) -> Option<f64> {
        if self.custom.has_outside_temp != Some(true) {
            return None;
        }
        self.store.number(PropertyId::OutsideTemp, DEVICE_ZONE)
    }

    pub fn heating_circuit_pressure(&self) -> Option<(f64, Option<&str>)> {
        let value = self.store.number(PropertyId::HeatingCircuitPressure, DEVICE_ZONE)?;
        Some((value, self.store.unit(PropertyId::HeatingCircuitPressure, DEVICE_ZONE)))
    }

    pub fn ch_flow_setpoint_temperature(&self) -> Option<f64> {
        self.store.number(PropertyId::ChFlowSetpointTemp, DEVICE_ZONE)
    }

    pub fn ch_flow_temperature(&self) -> Option<f64> {
        self.store.number(PropertyId::ChFlowTemp, DEVICE_ZONE)
    }

    pub fn automatic_thermoregulation(&self) -> Option<bool> {
        self.store.flag(PropertyId::AutomaticThermoregulation, DEVICE_ZONE)
    }

    // =====================
    // Setters
    // =====================

    pub fn set_comfort_temperature(&mut self, zone: ZoneNumber, temperature: f64) -> Result<(), DeviceError> {
        self.require_zone(zone)?;
        let old = self.store.number(PropertyId::ZoneComfortTemp, zone);
        self.client.set_comfort_temperature(self.gw(), zone, temperature, old)?;
        self.store.set_value(PropertyId::ZoneComfortTemp, zone, temperature);
        info!("Zone {} comfort temperature set to {}", zone, temperature);
        Ok(())
    }

    pub fn set_zone_mode(&mut self, zone: ZoneNumber, mode: ZoneMode) -> Result<(), DeviceError> {
        self.require_zone(zone)?;
        self.require_offered(PropertyId::ZoneMode, zone, mode.code())?;
        let old = self.store.code(PropertyId::ZoneMode, zone);
        self.client.set_zone_mode(self.gw(), zone, mode, old)?;
        self.store.set_value(PropertyId::ZoneMode, zone, mode.code());
        info!("Zone {} mode set to {}", zone, mode.name());
        Ok(())
    }

    pub fn set_plant_mode(&mut self, mode: PlantMode) -> Result<(), DeviceError> {
        self.require_offered(PropertyId::PlantMode, DEVICE_ZONE, mode.code())?;
        let old = self.store.code(PropertyId::PlantMode, DEVICE_ZONE);
        self.client.set_plant_mode(self.gw(), mode, old)?;
        self.store.set_value(PropertyId::PlantMode, DEVICE_ZONE, mode.code());
        info!("Plant mode set to {}", mode.name());
        Ok(())
    }

    pub fn set_automatic_thermoregulation(&mut self, enabled: bool) -> Result<(), DeviceError> {
        if !self.features.flag("autoThermoReg") {
            return Err(DeviceError::Unsupported(format!(
                "{} has no automatic thermoregulation",
                self.gw()
            )));
        }
        let new = PropertyValue::Number(if enabled { 1.0 } else { 0.0 });
        self.write_item(PropertyId::AutomaticThermoregulation, DEVICE_ZONE, new)
    }

    /// `Some(date)` starts a holiday ending on `date`; `None` cancels it.
    pub fn set_holiday(&mut self, end: Option<NaiveDate>) -> Result<(), DeviceError> {
        let new = end.map(|d| d.and_time(NaiveTime::MIN));
        let old = self.store.expires_on(PropertyId::Holiday, DEVICE_ZONE);
        self.client.set_holiday(
            self.gw(),
            new.map(format_expiry).as_deref(),
            old.map(format_expiry).as_deref(),
        )?;
        self.store.set_value(PropertyId::Holiday, DEVICE_ZONE, new.is_some());
        self.store.set_local(
            PropertyId::Holiday,
            DEVICE_ZONE,
            Field::ExpiresOn,
            new.map(FieldValue::Timestamp),
        );
        match new {
            Some(ts) => info!("Holiday set until {}", ts),
            None => info!("Holiday cancelled"),
        }
        Ok(())
    }

    /// Generic item write through the items API.
    fn write_item(&mut self, id: PropertyId, zone: ZoneNumber, new: PropertyValue) -> Result<(), DeviceError> {
        let old = self.store.value(id, zone).cloned();
        self.client
            .set_item(self.gw(), id, zone, &new, old.as_ref(), &self.features)?;
        debug!("{} (zone {}) set to {:?}", id, zone, new);
        self.store.set_local(id, zone, Field::Value, Some(FieldValue::Value(new)));
        Ok(())
    }

    fn energy_usages(&self) -> &'static str {
        if self.has_dhw() { "Ch,Dhw" } else { "Ch" }
    }
}

/// Label of the current value of an option-coded item.
fn option_label(store: &PropertyStore, id: PropertyId) -> Option<&str> {
    let code = store.code(id, DEVICE_ZONE)?;
    let index = store.options(id, DEVICE_ZONE).iter().position(|c| *c == code)?;
    store.option_labels(id, DEVICE_ZONE).get(index).map(String::as_str)
}

impl DeviceFamily for GalevoDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn options(&self) -> &DeviceOptions {
        &self.options
    }

    fn features(&self) -> &Features {
        &self.features
    }

    fn custom_features(&self) -> &CustomFeatures {
        &self.custom
    }

    fn store(&self) -> &PropertyStore {
        &self.store
    }

    fn refresh_features(&mut self) -> Result<(), DeviceError> {
        let features = self
            .client
            .get_features(self.gw())?
            .ok_or_else(|| DeviceError::NotFound(format!("features of {}", self.gw())))?;
        self.custom.has_ch = Some(true);
        self.custom.has_dhw = Some(features.has_boiler.unwrap_or(false));
        debug!(
            "Features of {}: zones {:?}, boiler {}, metering {}",
            self.gw(),
            features.zone_numbers(),
            features.flag("hasBoiler"),
            features.flag("hasMetering")
        );
        self.features = features;
        Ok(())
    }

    fn refresh_state(&mut self) -> Result<(), DeviceError> {
        let requested = self.requested_items();
        let items = self
            .client
            .get_items(self.gw(), &requested, &self.features, &self.options.culture)?
            .ok_or_else(|| DeviceError::NotFound(format!("data items of {}", self.gw())))?;
        self.store.replace_all(items);
        self.derive_features();
        Ok(())
    }

    fn refresh_energy(&mut self) -> Result<(), DeviceError> {
        if !self.has_metering() {
            return Err(DeviceError::Unsupported(format!("{} has no metering", self.gw())));
        }
        let snapshot = fetch_energy(
            &self.client,
            self.gw(),
            self.energy_usages(),
            self.features.flag("hasSlp"),
        )?;
        self.energy = Some(snapshot);
        Ok(())
    }

    fn energy(&self) -> Option<&EnergySnapshot> {
        self.energy.as_ref()
    }

    fn set_consumptions_settings(&mut self, new: ConsumptionsSettings) -> Result<(), DeviceError> {
        write_consumptions_settings(&self.client, &self.identity.gateway, &mut self.energy, new)
    }

    fn water_heater_current_temperature(&self) -> Option<f64> {
        if self.custom.has_dhw_storage_temperature == Some(true) {
            self.store.number(PropertyId::DhwStorageTemperature, DEVICE_ZONE)
        } else {
            self.store.number(PropertyId::DhwTemp, DEVICE_ZONE)
        }
    }

    fn water_heater_target_temperature(&self) -> Option<f64> {
        self.store.number(PropertyId::DhwTemp, DEVICE_ZONE)
    }

    fn water_heater_minimum_temperature(&self) -> Option<f64> {
        self.store.item(PropertyId::DhwTemp, DEVICE_ZONE).and_then(|i| i.min)
    }

    fn water_heater_maximum_temperature(&self) -> Option<f64> {
        self.store.item(PropertyId::DhwTemp, DEVICE_ZONE).and_then(|i| i.max)
    }

    fn water_heater_operation_modes(&self) -> Vec<String> {
        self.store.option_labels(PropertyId::DhwMode, DEVICE_ZONE).to_vec()
    }

    fn water_heater_operation_mode(&self) -> Result<Option<String>, DeviceError> {
        let Some(code) = self.store.code(PropertyId::DhwMode, DEVICE_ZONE) else {
            return Ok(None);
        };
        match option_label(&self.store, PropertyId::DhwMode) {
            Some(label) => Ok(Some(label.to_string())),
            None => DhwMode::from_code(code).map(|m| Some(m.name().to_string())).ok_or(DeviceError::UnknownMode {
                property: PropertyId::DhwMode,
                code,
            }),
        }
    }

    fn set_water_heater_temperature(&mut self, temperature: f64) -> Result<(), DeviceError> {
        self.require_dhw()?;
        let old = self.store.number(PropertyId::DhwTemp, DEVICE_ZONE);
        self.client.set_dhw_temperature(self.gw(), temperature, old)?;
        self.store.set_value(PropertyId::DhwTemp, DEVICE_ZONE, temperature);
        info!("DHW temperature set to {}", temperature);
        Ok(())
    }

    /// Sends the option code found at the label's position, not the position itself.
    fn set_water_heater_operation_mode(&mut self, label: &str) -> Result<(), DeviceError> {
        self.require_dhw()?;
        let index = self
            .store
            .option_labels(PropertyId::DhwMode, DEVICE_ZONE)
            .iter()
            .position(|l| l == label);
        let code = index
            .and_then(|i| self.store.options(PropertyId::DhwMode, DEVICE_ZONE).get(i).copied())
            .ok_or_else(|| DeviceError::UnknownOption {
                property: PropertyId::DhwMode,
                label: label.to_string(),
            })?;
        self.write_item(PropertyId::DhwMode, DEVICE_ZONE, PropertyValue::Integer(code))
    }
}
