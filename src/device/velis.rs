//! Single-tank water heaters: the shared core and the MED (Velis) line.
//!
//! Plant data and plant settings are flat JSON objects; both are normalized
//! into device-zone stores. The settings store survives state refreshes and
//! is reloaded only with the features.

use log::{debug, info};
use serde_json::{Value, json};
use std::sync::Arc;

use super::*;
use crate::client::PlantDataLine;

/// Plant setting ids of one product line.
#[derive(Debug, Copy, Clone)]
pub struct SettingIds {
    pub anti_legionella: PropertyId,
    pub max_setpoint: PropertyId,
    pub max_setpoint_min: PropertyId,
    pub max_setpoint_max: PropertyId,
}

pub const MED_SETTINGS: SettingIds = SettingIds {
    anti_legionella: PropertyId::MedAntilegionellaOnOff,
    max_setpoint: PropertyId::MedMaxSetpointTemperature,
    max_setpoint_min: PropertyId::MedMaxSetpointTemperatureMin,
    max_setpoint_max: PropertyId::MedMaxSetpointTemperatureMax,
};

pub const SE_SETTINGS: SettingIds = SettingIds {
    anti_legionella: PropertyId::SeAntilegionellaOnOff,
    max_setpoint: PropertyId::SeMaxSetpointTemperature,
    max_setpoint_min: PropertyId::SeMaxSetpointTemperatureMin,
    max_setpoint_max: PropertyId::SeMaxSetpointTemperatureMax,
};

/// Endpoints used by one product line.
#[derive(Debug, Copy, Clone)]
pub struct Lines {
    /// Plant data reads.
    pub read: PlantDataLine,
    /// Temperature, mode and switch writes.
    pub write: PlantDataLine,
    /// Plant settings reads.
    pub settings_read: PlantDataLine,
    /// Plant settings writes.
    pub settings_write: PlantDataLine,
}

/// State and plumbing shared by the single-tank families.
#[derive(Debug)]
pub struct VelisCore {
    pub(crate) client: Arc<AristonClient>,
    pub(crate) identity: DeviceIdentity,
    pub(crate) options: DeviceOptions,
    pub(crate) features: Features,
    pub(crate) custom: CustomFeatures,
    pub(crate) state: PropertyStore,
    pub(crate) settings: PropertyStore,
    pub(crate) energy: Option<EnergySnapshot>,
    pub(crate) lines: Lines,
    pub(crate) setting_ids: SettingIds,
}

impl VelisCore {
    pub fn new(
        client: Arc<AristonClient>,
        identity: DeviceIdentity,
        options: DeviceOptions,
        lines: Lines,
        setting_ids: SettingIds,
    ) -> Self {
        VelisCore {
            client,
            identity,
            options,
            features: Features::default(),
            custom: CustomFeatures::default(),
            state: PropertyStore::new(),
            settings: PropertyStore::new(),
            energy: None,
            lines,
            setting_ids,
        }
    }

    pub(crate) fn gw(&self) -> &GatewayId {
        &self.identity.gateway
    }

    fn fetch_object(&self, what: &str, value: Option<Value>) -> Result<PropertyStore, DeviceError> {
        match value {
            Some(Value::Object(map)) => Ok(PropertyStore::from_flat_object(&map)),
            Some(_) => Err(DeviceError::Api(ClientError::Decode {
                path: ".".into(),
                message: format!("{what} is not a JSON object"),
            })),
            None => Err(DeviceError::NotFound(format!("{what} of {}", self.gw()))),
        }
    }

    pub fn refresh_features(&mut self) -> Result<(), DeviceError> {
        let mut features = self.client.get_features(self.gw())?.unwrap_or_default();
        if features.zones.is_empty() {
            features.zones.push(ZoneDescriptor {
                num: DEVICE_ZONE,
                ..ZoneDescriptor::default()
            });
        }
        self.features = features;
        self.custom.has_ch = Some(false);
        self.custom.has_dhw = Some(true);
        self.refresh_settings()
    }

    pub fn refresh_settings(&mut self) -> Result<(), DeviceError> {
        let raw = self.client.get_plant_settings(self.lines.settings_read, self.gw())?;
        self.settings = self.fetch_object("plant settings", raw)?;
        debug!("Loaded {} plant setting(s) for {}", self.settings.len(), self.gw());
        Ok(())
    }

    pub fn refresh_state(&mut self) -> Result<(), DeviceError> {
        let raw = self.client.get_plant_data(self.lines.read, self.gw())?;
        self.state = self.fetch_object("plant data", raw)?;
        Ok(())
    }

    pub fn refresh_energy(&mut self) -> Result<(), DeviceError> {
        if !self.features.flag("hasMetering") {
            return Err(DeviceError::Unsupported(format!("{} has no metering", self.gw())));
        }
        let snapshot = fetch_energy(&self.client, self.gw(), "Dhw", self.features.flag("hasSlp"))?;
        self.energy = Some(snapshot);
        Ok(())
    }

    pub fn set_consumptions_settings(&mut self, new: ConsumptionsSettings) -> Result<(), DeviceError> {
        write_consumptions_settings(&self.client, &self.identity.gateway, &mut self.energy, new)
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.state.number(PropertyId::Temp, DEVICE_ZONE)
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.state.number(PropertyId::ReqTemp, DEVICE_ZONE)
    }

    pub fn max_setpoint(&self) -> Option<f64> {
        self.settings.number(self.setting_ids.max_setpoint, DEVICE_ZONE)
    }

    pub fn mode_code(&self) -> Option<i64> {
        self.state.code(PropertyId::Mode, DEVICE_ZONE)
    }

    fn post(&self, action: &str, body: Value) -> Result<(), DeviceError> {
        self.client
            .post_plant_data(self.lines.write, self.gw(), action, body)
            .map_err(DeviceError::from)
    }

    /// Temperature write without the eco flag (Evo and SE lines).
    pub fn write_temperature(&mut self, temperature: f64) -> Result<(), DeviceError> {
        let old = self.target_temperature();
        self.post("temperature", json!({"new": temperature, "old": old}))?;
        self.state.set_value(PropertyId::ReqTemp, DEVICE_ZONE, temperature);
        info!("{} target temperature set to {}", self.gw(), temperature);
        Ok(())
    }

    /// Temperature write carrying the eco flag (MED line).
    pub fn write_temperature_with_eco(&mut self, temperature: f64, eco: bool) -> Result<(), DeviceError> {
        let old = self.target_temperature();
        self.post("temperature", json!({"eco": eco, "new": temperature, "old": old}))?;
        self.state.set_value(PropertyId::ReqTemp, DEVICE_ZONE, temperature);
        self.state.set_value(PropertyId::Eco, DEVICE_ZONE, eco);
        info!("{} target temperature set to {} (eco {})", self.gw(), temperature, eco);
        Ok(())
    }

    pub fn write_mode(&mut self, code: i64, name: &str) -> Result<(), DeviceError> {
        let old = self.mode_code();
        self.post("mode", json!({"new": code, "old": old}))?;
        self.state.set_value(PropertyId::Mode, DEVICE_ZONE, code);
        info!("{} operation mode set to {}", self.gw(), name);
        Ok(())
    }

    pub fn write_power(&mut self, on: bool) -> Result<(), DeviceError> {
        let old = self.state.flag(PropertyId::On, DEVICE_ZONE);
        self.post("switch", json!({"new": on, "old": old}))?;
        self.state.set_value(PropertyId::On, DEVICE_ZONE, on);
        info!("{} switched {}", self.gw(), if on { "on" } else { "off" });
        Ok(())
    }

    /// Eco toggle through the dedicated `switchEco` action.
    pub fn write_eco_switch(&mut self, eco: bool) -> Result<(), DeviceError> {
        let old = self.state.flag(PropertyId::Eco, DEVICE_ZONE);
        self.post("switchEco", json!({"new": eco, "old": old}))?;
        self.state.set_value(PropertyId::Eco, DEVICE_ZONE, eco);
        Ok(())
    }

    pub fn write_anti_legionella(&mut self, on: bool) -> Result<(), DeviceError> {
        let id = self.setting_ids.anti_legionella;
        let old = self.settings.flag(id, DEVICE_ZONE).map(|b| if b { 1.0 } else { 0.0 });
        let new = if on { 1.0 } else { 0.0 };
        self.client
            .set_plant_setting(self.lines.settings_write, self.gw(), id, new, old)?;
        self.settings.set_value(id, DEVICE_ZONE, on);
        info!("{} anti-legionella {}", self.gw(), if on { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn write_max_setpoint(&mut self, temperature: f64) -> Result<(), DeviceError> {
        let id = self.setting_ids.max_setpoint;
        let old = self.settings.number(id, DEVICE_ZONE);
        self.client
            .set_plant_setting(self.lines.settings_write, self.gw(), id, temperature, old)?;
        self.settings.set_value(id, DEVICE_ZONE, temperature);
        info!("{} maximum setpoint set to {}", self.gw(), temperature);
        Ok(())
    }
}

/// Mode label lookup shared by the single-tank families.
pub(crate) fn mode_label<M>(
    code: Option<i64>,
    from_code: impl Fn(i64) -> Option<M>,
    name: impl Fn(M) -> &'static str,
) -> Result<Option<String>, DeviceError> {
    code.map(|code| {
        from_code(code).map(|m| name(m).to_string()).ok_or(DeviceError::UnknownMode {
            property: PropertyId::Mode,
            code,
        })
    })
    .transpose()
}

pub(crate) fn unknown_label(label: &str) -> DeviceError {
    DeviceError::UnknownOption {
        property: PropertyId::Mode,
        label: label.to_string(),
    }
}

/// Implements [`DeviceFamily`] accessors shared by every single-tank family.
macro_rules! single_tank_common {
    () => {
        fn identity(&self) -> &DeviceIdentity {
            &self.core.identity
        }

        fn options(&self) -> &DeviceOptions {
            &self.core.options
        }

        fn features(&self) -> &Features {
            &self.core.features
        }

        fn custom_features(&self) -> &CustomFeatures {
            &self.core.custom
        }

        fn store(&self) -> &PropertyStore {
            &self.core.state
        }

        fn refresh_features(&mut self) -> Result<(), DeviceError> {
            self.core.refresh_features()
        }

        fn refresh_state(&mut self) -> Result<(), DeviceError> {
            self.core.refresh_state()
        }

        fn refresh_energy(&mut self) -> Result<(), DeviceError> {
            self.core.refresh_energy()
        }

        fn energy(&self) -> Option<&EnergySnapshot> {
            self.core.energy.as_ref()
        }

        fn set_consumptions_settings(&mut self, new: ConsumptionsSettings) -> Result<(), DeviceError> {
            self.core.set_consumptions_settings(new)
        }

        fn water_heater_current_temperature(&self) -> Option<f64> {
            self.core.current_temperature()
        }

        fn water_heater_target_temperature(&self) -> Option<f64> {
            self.core.target_temperature()
        }

        fn water_heater_maximum_temperature(&self) -> Option<f64> {
            self.core.max_setpoint()
        }
    };
}
pub(crate) use single_tank_common;

/// Lowest target accepted by the MED line.
pub const VELIS_MIN_TEMPERATURE: f64 = 40.0;

#[derive(Debug)]
pub struct VelisDevice {
    core: VelisCore,
}

impl VelisDevice {
    pub fn new(client: Arc<AristonClient>, identity: DeviceIdentity, options: DeviceOptions) -> Self {
        let lines = Lines {
            read: PlantDataLine::Med,
            write: PlantDataLine::Med,
            settings_read: PlantDataLine::Med,
            settings_write: PlantDataLine::Med,
        };
        VelisDevice {
            core: VelisCore::new(client, identity, options, lines, MED_SETTINGS),
        }
    }

    pub fn operation_mode(&self) -> Result<Option<VelisPlantMode>, DeviceError> {
        self.core
            .mode_code()
            .map(|code| {
                VelisPlantMode::from_code(code).ok_or(DeviceError::UnknownMode {
                    property: PropertyId::Mode,
                    code,
                })
            })
            .transpose()
    }
}

impl DeviceFamily for VelisDevice {
    single_tank_common!();

    fn water_heater_minimum_temperature(&self) -> Option<f64> {
        Some(VELIS_MIN_TEMPERATURE)
    }

    fn water_heater_operation_modes(&self) -> Vec<String> {
        VelisPlantMode::ALL.iter().map(|m| m.name().to_string()).collect()
    }

    fn water_heater_operation_mode(&self) -> Result<Option<String>, DeviceError> {
        mode_label(self.core.mode_code(), VelisPlantMode::from_code, VelisPlantMode::name)
    }

    fn set_water_heater_temperature(&mut self, temperature: f64) -> Result<(), DeviceError> {
        let eco = self.eco_mode().unwrap_or(false);
        self.core.write_temperature_with_eco(temperature, eco)
    }

    fn set_water_heater_operation_mode(&mut self, label: &str) -> Result<(), DeviceError> {
        let mode = VelisPlantMode::from_name(label).ok_or_else(|| unknown_label(label))?;
        self.core.write_mode(mode.code(), mode.name())
    }
}

impl SingleTankDevice for VelisDevice {
    fn core(&self) -> &VelisCore {
        &self.core
    }

    fn set_power(&mut self, on: bool) -> Result<(), DeviceError> {
        self.core.write_power(on)
    }

    /// The MED line toggles eco through the temperature action.
    fn set_eco_mode(&mut self, eco: bool) -> Result<(), DeviceError> {
        let temperature = self.core.target_temperature().ok_or(DeviceError::MissingValue {
            property: PropertyId::ReqTemp,
            zone: DEVICE_ZONE,
        })?;
        self.core.write_temperature_with_eco(temperature, eco)
    }

    fn set_anti_legionella(&mut self, on: bool) -> Result<(), DeviceError> {
        self.core.write_anti_legionella(on)
    }

    fn set_max_setpoint_temperature(&mut self, temperature: f64) -> Result<(), DeviceError> {
        self.core.write_max_setpoint(temperature)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::testing::{ScriptedBackend, TEST_BASE_URL, fixture};
    use http::Method;

    pub(crate) fn identity(whe_type: WheType) -> DeviceIdentity {
        DeviceIdentity {
            gateway: GatewayId("WH1".into()),
            serial: Some("SN1".into()),
            name: Some("Tank".into()),
            firmware: None,
            system_type: SystemType::Velis,
            whe_type: Some(whe_type),
            family: Family::select(SystemType::Velis, Some(whe_type)),
        }
    }

    pub(crate) fn client(backend: &Arc<ScriptedBackend>) -> Arc<AristonClient> {
        Arc::new(AristonClient::with_backend(backend.clone(), TEST_BASE_URL, "u", "p"))
    }

    fn velis(backend: &Arc<ScriptedBackend>) -> VelisDevice {
        backend.reply(Method::GET, "velis/medPlantData/WH1", 200, fixture("med-plant-data.json"));
        backend.reply(
            Method::GET,
            "velis/medPlantData/WH1/plantSettings",
            200,
            fixture("med-plant-settings.json"),
        );
        let mut device = VelisDevice::new(client(backend), identity(WheType::Lydos), DeviceOptions::default());
        device.refresh_features().unwrap();
        device.refresh_state().unwrap();
        device
    }

    #[test]
    fn features_synthesize_the_device_zone() {
        let backend = ScriptedBackend::new();
        let device = velis(&backend);

        assert_eq!(device.features().zone_numbers(), vec![DEVICE_ZONE]);
        assert_eq!(device.custom_features().has_ch, Some(false));
        assert!(device.is_feature_available(&[DeviceFeature::HasDhw], false, Some(&[SystemType::Velis])));
        assert!(!device.is_feature_available(&[DeviceFeature::HasCh], false, None));
    }

    #[test]
    fn plant_data_and_settings_are_read() {
        let backend = ScriptedBackend::new();
        let device = velis(&backend);

        assert_eq!(device.water_heater_current_temperature(), Some(48.0));
        assert_eq!(device.water_heater_target_temperature(), Some(50.0));
        assert_eq!(device.water_heater_minimum_temperature(), Some(40.0));
        assert_eq!(device.water_heater_maximum_temperature(), Some(75.0));
        assert_eq!(device.operation_mode().unwrap(), Some(VelisPlantMode::Manual));
        assert_eq!(device.water_heater_operation_mode().unwrap().as_deref(), Some("MANUAL"));
        assert_eq!(device.power(), Some(true));
        assert_eq!(device.eco_mode(), Some(false));
        assert_eq!(device.average_showers(), Some(3));
        assert_eq!(device.remaining_time(), Some("01:20"));
        assert_eq!(device.anti_legionella(), Some(true));
        assert_eq!(device.max_setpoint_temperature_bounds(), (Some(40.0), Some(80.0)));
    }

    #[test]
    fn temperature_write_sends_old_and_new() {
        let backend = ScriptedBackend::new();
        let mut device = velis(&backend);
        let path = "velis/medPlantData/WH1/temperature";
        backend.reply(Method::POST, path, 200, Value::Null);

        device.set_water_heater_temperature(55.0).unwrap();

        let body = backend.last_body(path).unwrap();
        assert_eq!(body["old"].as_f64(), Some(50.0));
        assert_eq!(body["new"].as_f64(), Some(55.0));
        assert_eq!(body["eco"], json!(false));
        assert_eq!(device.water_heater_target_temperature(), Some(55.0));
    }

    #[test]
    fn state_refresh_keeps_settings_and_failed_refresh_keeps_state() {
        let backend = ScriptedBackend::new();
        let mut device = velis(&backend);
        let before = device.store().clone();

        backend.reply(Method::GET, "velis/medPlantData/WH1", 502, Value::Null);
        assert!(device.refresh_state().is_err());
        assert_eq!(device.store(), &before);
        assert_eq!(device.anti_legionella(), Some(true));
    }

    #[test]
    fn eco_goes_through_the_temperature_action() {
        let backend = ScriptedBackend::new();
        let mut device = velis(&backend);
        let path = "velis/medPlantData/WH1/temperature";
        backend.reply(Method::POST, path, 200, Value::Null);

        device.set_eco_mode(true).unwrap();

        assert_eq!(backend.last_body(path).unwrap(), json!({"eco": true, "new": 50.0, "old": 50.0}));
        assert_eq!(device.eco_mode(), Some(true));
    }

    #[test]
    fn mode_power_and_settings_writes() {
        let backend = ScriptedBackend::new();
        let mut device = velis(&backend);
        backend.reply(Method::POST, "velis/medPlantData/WH1/mode", 200, Value::Null);
        backend.reply(Method::POST, "velis/medPlantData/WH1/switch", 200, Value::Null);
        backend.reply(Method::POST, "velis/medPlantData/WH1/plantSettings", 200, Value::Null);

        device.set_water_heater_operation_mode("night").unwrap();
        device.set_power(false).unwrap();
        device.set_anti_legionella(false).unwrap();
        device.set_max_setpoint_temperature(70.0).unwrap();

        assert_eq!(backend.last_body("velis/medPlantData/WH1/mode").unwrap(), json!({"new": 8, "old": 1}));
        assert_eq!(
            backend.last_body("velis/medPlantData/WH1/switch").unwrap(),
            json!({"new": false, "old": true})
        );
        let settings = backend.requests_to("velis/medPlantData/WH1/plantSettings");
        let bodies: Vec<_> = settings.iter().filter_map(|r| r.body.clone()).collect();
        assert_eq!(bodies[0], json!({"MedAntilegionellaOnOff": {"new": 0.0, "old": 1.0}}));
        assert_eq!(bodies[1], json!({"MedMaxSetpointTemperature": {"new": 70.0, "old": 75.0}}));
        assert_eq!(device.operation_mode().unwrap(), Some(VelisPlantMode::Night));
        assert_eq!(device.power(), Some(false));
        assert_eq!(device.anti_legionella(), Some(false));
        assert_eq!(device.max_setpoint_temperature(), Some(70.0));
    }

    #[test]
    fn modes_of_other_lines_are_rejected() {
        let backend = ScriptedBackend::new();
        let mut device = velis(&backend);
        let sent = backend.requests().len();

        assert!(matches!(
            device.set_water_heater_operation_mode("BOOST"),
            Err(DeviceError::UnknownOption { .. })
        ));
        assert_eq!(backend.requests().len(), sent);
        assert!(matches!(device.refresh_energy(), Err(DeviceError::Unsupported(_))));
    }
}
