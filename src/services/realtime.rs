use crate::client::ClientError;
use crate::coordinator::UpdateCoordinator;
use crate::device::{Device, DeviceError, DeviceFamily};
use log::{error, info, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Polls the device forever at a steady cadence. Returns only when the
/// account credentials stop working, since retrying cannot help then.
pub fn run_loop(coordinator: &mut UpdateCoordinator<Device>, interval: Duration) -> Result<(), String> {
    loop {
        let tick_start = Instant::now();

        match coordinator.refresh() {
            Ok(()) => info!("{}", summarize(coordinator.device())),
            Err(DeviceError::Api(ClientError::Authentication(e))) => {
                error!("Giving up on {}: {}", coordinator.device().identity().gateway, e);
                return Err(format!("authentication failed: {}", e));
            }
            Err(e) => warn!(
                "Refresh failed ({} in a row), keeping last state: {}",
                coordinator.consecutive_failures(),
                e
            ),
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

/// One-line state summary logged after every successful refresh.
pub fn summarize(device: &Device) -> String {
    let mut parts = vec![format!("{} [{}]", device.identity().gateway, device.identity().family)];

    if let Some(galevo) = device.as_galevo() {
        if let Ok(Some(mode)) = galevo.plant_mode() {
            parts.push(format!("plant={}", mode.name()));
        }
        for zone in galevo.zones() {
            parts.push(format!(
                "z{}={}/{}",
                zone,
                temp(galevo.measured_temperature(zone)),
                temp(galevo.desired_temperature(zone))
            ));
        }
        if let Some(t) = galevo.outside_temperature() {
            parts.push(format!("out={}", t));
        }
        if galevo.is_flame_on() == Some(true) {
            parts.push("flame".to_string());
        }
    }

    if device.custom_features().has_dhw == Some(true) {
        parts.push(format!(
            "dhw={}/{}",
            temp(device.water_heater_current_temperature()),
            temp(device.water_heater_target_temperature())
        ));
        if let Ok(Some(mode)) = device.water_heater_operation_mode() {
            parts.push(format!("mode={}", mode));
        }
    }

    if let Some(tank) = device.as_single_tank() {
        if let Some(on) = tank.power() {
            parts.push(format!("power={}", if on { "on" } else { "off" }));
        }
        if tank.is_heating() == Some(true) {
            parts.push("heating".to_string());
        }
    }

    parts.join(" ")
}

fn temp(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AristonClient;
    use crate::device::DeviceOptions;
    use crate::device::velis::tests::{client, identity};
    use crate::models::ariston::WheType;
    use crate::transport::testing::{ScriptedBackend, TEST_BASE_URL, fixture};
    use http::Method;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn summary_of_a_single_tank_device() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::GET, "velis/medPlantData/WH1", 200, fixture("med-plant-data.json"));
        backend.reply(
            Method::GET,
            "velis/medPlantData/WH1/plantSettings",
            200,
            fixture("med-plant-settings.json"),
        );
        let mut device = Device::new(client(&backend), identity(WheType::Lydos), DeviceOptions::default());
        device.refresh_features().unwrap();
        device.refresh_state().unwrap();

        assert_eq!(summarize(&device), "WH1 [velis] dhw=48/50 mode=MANUAL power=on");
    }

    #[test]
    fn summary_of_an_unrefreshed_galevo() {
        let backend = ScriptedBackend::new();
        let client = Arc::new(AristonClient::with_backend(backend.clone(), TEST_BASE_URL, "u", "p"));
        let mut features = fixture("galevo-features.json");
        features["hasBoiler"] = json!(false);
        backend.reply(Method::GET, "remote/plants/GW1/features", 200, features);
        let mut device = Device::new(
            client,
            crate::device::DeviceIdentity {
                gateway: crate::models::ariston::GatewayId("GW1".into()),
                serial: None,
                name: None,
                firmware: None,
                system_type: crate::models::ariston::SystemType::Galevo,
                whe_type: None,
                family: crate::device::Family::Galevo,
            },
            DeviceOptions::default(),
        );
        device.refresh_features().unwrap();

        assert_eq!(summarize(&device), "GW1 [galevo] z1=-/- z2=-/-");
    }

    #[test]
    fn authentication_failure_ends_the_loop() {
        let backend = ScriptedBackend::new();
        backend.reply(Method::GET, "velis/medPlantData/WH1/plantSettings", 200, fixture("med-plant-settings.json"));
        let mut device = Device::new(client(&backend), identity(WheType::Lydos), DeviceOptions::default());
        device.refresh_features().unwrap();
        backend.reply(Method::GET, "velis/medPlantData/WH1", 405, json!({}));
        backend.reply(Method::POST, "accounts/login", 401, json!({}));
        let mut coordinator = UpdateCoordinator::new(device, Duration::from_secs(3600));

        let err = run_loop(&mut coordinator, Duration::from_millis(1)).unwrap_err();

        assert!(err.starts_with("authentication failed"), "{err}");
        assert_eq!(coordinator.consecutive_failures(), 1);
    }
}
