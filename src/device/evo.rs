//! Velis Evo water heaters.
//!
//! State and plant settings are read from the MED endpoints; every write
//! goes to the Evo endpoints.

use std::sync::Arc;

use super::velis::{Lines, MED_SETTINGS, VELIS_MIN_TEMPERATURE, mode_label, single_tank_common, unknown_label};
use super::*;
use crate::client::PlantDataLine;

#[derive(Debug)]
pub struct EvoDevice {
    core: VelisCore,
}

impl EvoDevice {
    pub fn new(client: Arc<AristonClient>, identity: DeviceIdentity, options: DeviceOptions) -> Self {
        let lines = Lines {
            read: PlantDataLine::Med,
            write: PlantDataLine::Evo,
            settings_read: PlantDataLine::Med,
            settings_write: PlantDataLine::Evo,
        };
        EvoDevice {
            core: VelisCore::new(client, identity, options, lines, MED_SETTINGS),
        }
    }

    pub fn operation_mode(&self) -> Result<Option<EvoPlantMode>, DeviceError> {
        self.core
            .mode_code()
            .map(|code| {
                EvoPlantMode::from_code(code).ok_or(DeviceError::UnknownMode {
                    property: PropertyId::Mode,
                    code,
                })
            })
            .transpose()
    }
}

impl DeviceFamily for EvoDevice {
    single_tank_common!();

    fn water_heater_minimum_temperature(&self) -> Option<f64> {
        Some(VELIS_MIN_TEMPERATURE)
    }

    fn water_heater_operation_modes(&self) -> Vec<String> {
        EvoPlantMode::ALL.iter().map(|m| m.name().to_string()).collect()
    }

    fn water_heater_operation_mode(&self) -> Result<Option<String>, DeviceError> {
        mode_label(self.core.mode_code(), EvoPlantMode::from_code, EvoPlantMode::name)
    }

    fn set_water_heater_temperature(&mut self, temperature: f64) -> Result<(), DeviceError> {
        self.core.write_temperature(temperature)
    }

    fn set_water_heater_operation_mode(&mut self, label: &str) -> Result<(), DeviceError> {
        let mode = EvoPlantMode::from_name(label).ok_or_else(|| unknown_label(label))?;
        self.core.write_mode(mode.code(), mode.name())
    }
}

impl SingleTankDevice for EvoDevice {
    fn core(&self) -> &VelisCore {
        &self.core
    }

    fn set_power(&mut self, on: bool) -> Result<(), DeviceError> {
        self.core.write_power(on)
    }

    fn set_eco_mode(&mut self, eco: bool) -> Result<(), DeviceError> {
        self.core.write_eco_switch(eco)
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

    fn evo(backend: &Arc<ScriptedBackend>) -> Device {
        backend.reply(Method::GET, "velis/medPlantData/WH1", 200, fixture("med-plant-data.json"));
        backend.reply(
            Method::GET,
            "velis/medPlantData/WH1/plantSettings",
            200,
            fixture("med-plant-settings.json"),
        );
        let mut device = Device::new(client(backend), identity(WheType::Evo), DeviceOptions::default());
        device.refresh_features().unwrap();
        device.refresh_state().unwrap();
        device
    }

    #[test]
    fn evo_is_selected_and_reads_med_data() {
        let backend = ScriptedBackend::new();
        let device = evo(&backend);

        assert!(matches!(device, Device::Evo(_)));
        assert_eq!(device.water_heater_target_temperature(), Some(50.0));
        assert_eq!(device.water_heater_operation_modes(), vec!["MANUAL", "PROGRAM"]);
    }

    #[test]
    fn writes_go_to_evo_endpoints() {
        let backend = ScriptedBackend::new();
        let mut device = evo(&backend);
        backend.reply(Method::POST, "velis/evoPlantData/WH1/temperature", 200, Value::Null);
        backend.reply(Method::POST, "velis/evoPlantData/WH1/switchEco", 200, Value::Null);
        backend.reply(Method::POST, "velis/evoPlantData/WH1/plantSettings", 200, Value::Null);

        device.set_water_heater_temperature(55.0).unwrap();
        let tank = device.as_single_tank_mut().unwrap();
        tank.set_eco_mode(true).unwrap();
        tank.set_anti_legionella(false).unwrap();
        tank.set_max_setpoint_temperature(70.0).unwrap();

        assert_eq!(
            backend.last_body("velis/evoPlantData/WH1/temperature").unwrap(),
            json!({"new": 55.0, "old": 50.0})
        );
        assert_eq!(
            backend.last_body("velis/evoPlantData/WH1/switchEco").unwrap(),
            json!({"new": true, "old": false})
        );
        let setting_writes: Vec<_> = backend
            .requests_to("velis/evoPlantData/WH1/plantSettings")
            .into_iter()
            .filter_map(|r| r.body)
            .collect();
        assert_eq!(
            setting_writes,
            vec![
                json!({"MedAntilegionellaOnOff": {"new": 0.0, "old": 1.0}}),
                json!({"MedMaxSetpointTemperature": {"new": 70.0, "old": 75.0}}),
            ]
        );
        assert!(
            backend
                .requests_to("velis/medPlantData/WH1/plantSettings")
                .iter()
                .all(|r| r.method == Method::GET)
        );
        assert_eq!(device.as_single_tank().and_then(|t| t.max_setpoint_temperature()), Some(70.0));
        assert_eq!(device.water_heater_target_temperature(), Some(55.0));
        assert_eq!(device.as_single_tank().and_then(|t| t.eco_mode()), Some(true));
    }

    #[test]
    fn night_mode_is_not_an_evo_mode() {
        let backend = ScriptedBackend::new();
        let mut device = evo(&backend);

        assert!(matches!(
            device.set_water_heater_operation_mode("NIGHT"),
            Err(DeviceError::UnknownOption { .. })
        ));

        let mut data = fixture("med-plant-data.json");
        data["mode"] = json!(8);
        backend.reply(Method::GET, "velis/medPlantData/WH1", 200, data);
        device.refresh_state().unwrap();
        assert!(matches!(
            device.water_heater_operation_mode(),
            Err(DeviceError::UnknownMode { code: 8, .. })
        ));
    }
}
