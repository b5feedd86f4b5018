//! Lydos hybrid (heat-pump) water heaters, served by the SE endpoints.

use std::sync::Arc;

use super::velis::{Lines, SE_SETTINGS, VELIS_MIN_TEMPERATURE, mode_label, single_tank_common, unknown_label};
use super::*;
use crate::client::PlantDataLine;

#[derive(Debug)]
pub struct LydosHybridDevice {
    core: VelisCore,
}

impl LydosHybridDevice {
    pub fn new(client: Arc<AristonClient>, identity: DeviceIdentity, options: DeviceOptions) -> Self {
        let lines = Lines {
            read: PlantDataLine::Se,
            write: PlantDataLine::Se,
            settings_read: PlantDataLine::Se,
            settings_write: PlantDataLine::Se,
        };
        LydosHybridDevice {
            core: VelisCore::new(client, identity, options, lines, SE_SETTINGS),
        }
    }

    pub fn operation_mode(&self) -> Result<Option<LydosPlantMode>, DeviceError> {
        self.core
            .mode_code()
            .map(|code| {
                LydosPlantMode::from_code(code).ok_or(DeviceError::UnknownMode {
                    property: PropertyId::Mode,
                    code,
                })
            })
            .transpose()
    }
}

impl DeviceFamily for LydosHybridDevice {
    single_tank_common!();

    fn water_heater_minimum_temperature(&self) -> Option<f64> {
        Some(VELIS_MIN_TEMPERATURE)
    }

    fn water_heater_operation_modes(&self) -> Vec<String> {
        LydosPlantMode::ALL.iter().map(|m| m.name().to_string()).collect()
    }

    fn water_heater_operation_mode(&self) -> Result<Option<String>, DeviceError> {
        mode_label(self.core.mode_code(), LydosPlantMode::from_code, LydosPlantMode::name)
    }

    fn set_water_heater_temperature(&mut self, temperature: f64) -> Result<(), DeviceError> {
        self.core.write_temperature(temperature)
    }

    fn set_water_heater_operation_mode(&mut self, label: &str) -> Result<(), DeviceError> {
        let mode = LydosPlantMode::from_name(label).ok_or_else(|| unknown_label(label))?;
        self.core.write_mode(mode.code(), mode.name())
    }
}

impl SingleTankDevice for LydosHybridDevice {
    fn core(&self) -> &VelisCore {
        &self.core
    }

    fn set_power(&mut self, on: bool) -> Result<(), DeviceError> {
        self.core.write_power(on)
    }

    /// Eco rides on the temperature action, as on the MED line.
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
mod tests {
    use super::*;
    use crate::device::velis::tests::{client, identity};
    use crate::transport::testing::{ScriptedBackend, fixture};
    use http::Method;
    use serde_json::{Value, json};

    fn lydos(backend: &Arc<ScriptedBackend>) -> LydosHybridDevice {
        backend.reply(Method::GET, "velis/sePlantData/WH1", 200, fixture("se-plant-data.json"));
        backend.reply(
            Method::GET,
            "velis/sePlantData/WH1/plantSettings",
            200,
            fixture("se-plant-settings.json"),
        );
        let mut device =
            LydosHybridDevice::new(client(backend), identity(WheType::LydosHybrid), DeviceOptions::default());
        device.refresh_features().unwrap();
        device.refresh_state().unwrap();
        device
    }

    #[test]
    fn reads_se_data_and_settings() {
        let backend = ScriptedBackend::new();
        let device = lydos(&backend);

        assert_eq!(device.operation_mode().unwrap(), Some(LydosPlantMode::Green));
        assert_eq!(device.water_heater_current_temperature(), Some(52.5));
        assert_eq!(device.water_heater_maximum_temperature(), Some(65.0));
        assert_eq!(device.anti_legionella(), Some(false));
        assert_eq!(device.max_setpoint_temperature_bounds(), (Some(50.0), Some(75.0)));
        assert_eq!(device.is_heating(), Some(true));
    }

    #[test]
    fn boost_mode_and_setpoint_writes() {
        let backend = ScriptedBackend::new();
        let mut device = lydos(&backend);
        backend.reply(Method::POST, "velis/sePlantData/WH1/mode", 200, Value::Null);
        backend.reply(Method::POST, "velis/sePlantData/WH1/plantSettings", 200, Value::Null);

        device.set_water_heater_operation_mode("BOOST").unwrap();
        device.set_max_setpoint_temperature(70.0).unwrap();

        assert_eq!(backend.last_body("velis/sePlantData/WH1/mode").unwrap(), json!({"new": 7, "old": 2}));
        assert_eq!(
            backend.last_body("velis/sePlantData/WH1/plantSettings").unwrap(),
            json!({"SeMaxSetpointTemperature": {"new": 70.0, "old": 65.0}})
        );
        assert_eq!(device.water_heater_operation_mode().unwrap().as_deref(), Some("BOOST"));
    }

    #[test]
    fn failed_mode_write_keeps_mode() {
        let backend = ScriptedBackend::new();
        let mut device = lydos(&backend);
        backend.reply(Method::POST, "velis/sePlantData/WH1/mode", 503, Value::Null);

        assert!(device.set_water_heater_operation_mode("PROGRAM").is_err());
        assert_eq!(device.operation_mode().unwrap(), Some(LydosPlantMode::Green));
    }
}
