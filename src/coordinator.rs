//! Periodic refresh of one device.
//!
//! The coordinator owns the device. Each `refresh` replaces the state
//! snapshot and, for metering-capable devices, the energy snapshot on its own
//! slower interval. A failed refresh never clears what was read before.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use log::{debug, warn};
use std::time::Duration;

use crate::device::{DeviceError, DeviceFamily};
use crate::models::ariston::ConsumptionSequence;

/// Consumption sequences are bucketed in two-hour slots.
const RESET_SLOT_HOURS: i64 = 2;

#[derive(Debug)]
pub struct UpdateCoordinator<D: DeviceFamily> {
    device: D,
    energy_interval: TimeDelta,
    last_energy_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    consecutive_failures: u32,
    energy_error: Option<String>,
    last_reset: Option<DateTime<Utc>>,
}

impl<D: DeviceFamily> UpdateCoordinator<D> {
    pub fn new(device: D, energy_interval: Duration) -> Self {
        UpdateCoordinator {
            device,
            energy_interval: TimeDelta::from_std(energy_interval).unwrap_or(TimeDelta::MAX),
            last_energy_attempt: None,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            energy_error: None,
            last_reset: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access for setters between refreshes.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn energy_error(&self) -> Option<&str> {
        self.energy_error.as_deref()
    }

    /// Start of the two-hour slot in which the consumption sequences last
    /// changed. Cumulative energy sensors restart from zero here.
    pub fn last_reset(&self) -> Option<DateTime<Utc>> {
        self.last_reset
    }

    pub fn refresh(&mut self) -> Result<(), DeviceError> {
        self.refresh_at(Utc::now())
    }

    /// Runs one cycle as of `now`. The energy refresh does not depend on the
    /// outcome of the state refresh; only the state result is returned.
    pub fn refresh_at(&mut self, now: DateTime<Utc>) -> Result<(), DeviceError> {
        let gw = self.device.identity().gateway.clone();
        let state = self.device.refresh_state();
        match &state {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    debug!("{} recovered after {} failed refresh(es)", gw, self.consecutive_failures);
                }
                self.last_success = Some(now);
                self.last_error = None;
                self.consecutive_failures = 0;
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.last_error = Some(e.to_string());
                warn!("State refresh of {} failed ({} in a row): {}", gw, self.consecutive_failures, e);
            }
        }

        if self.device.has_metering() && self.energy_due(now) {
            self.refresh_energy_at(now);
        }
        state
    }

    fn energy_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_energy_attempt {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.energy_interval,
        }
    }

    fn refresh_energy_at(&mut self, now: DateTime<Utc>) {
        let previous: Option<Vec<ConsumptionSequence>> = self.device.energy().map(|e| e.sequences.clone());
        self.last_energy_attempt = Some(now);
        match self.device.refresh_energy() {
            Ok(()) => {
                self.energy_error = None;
                let current = self.device.energy().map(|e| &e.sequences);
                if previous.as_ref() != current {
                    let slot = reset_slot(now);
                    debug!("Consumption sequences changed, reset boundary {}", slot);
                    self.last_reset = Some(slot);
                }
            }
            Err(e) => {
                warn!("Energy refresh of {} failed: {}", self.device.identity().gateway, e);
                self.energy_error = Some(e.to_string());
            }
        }
    }
}

/// Start of the two-hour slot containing `now`.
fn reset_slot(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(TimeDelta::hours(RESET_SLOT_HOURS)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::galevo::tests::{ITEMS, galevo};
    use crate::device::{Device, DeviceOptions};
    use crate::device::velis::tests::{client, identity};
    use crate::models::ariston::WheType;
    use crate::transport::testing::{ScriptedBackend, fixture};
    use chrono::TimeZone;
    use http::Method;
    use serde_json::json;
    use std::sync::Arc;

    const SEQUENCES: &str = "remote/reports/GW1/consSequencesApi8";

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    fn script_energy(backend: &Arc<ScriptedBackend>) {
        backend.reply(Method::GET, SEQUENCES, 200, fixture("consumption-sequences.json"));
        backend.reply(Method::GET, "remote/reports/GW1/energyAccount", 200, fixture("energy-account.json"));
        backend.reply(Method::POST, "remote/plants/GW1/getConsumptionsSettings", 200, json!({"currency": 1}));
    }

    #[test]
    fn failed_refresh_keeps_snapshot_and_counts_failures() {
        let backend = ScriptedBackend::new();
        let device = galevo(&backend);
        script_energy(&backend);
        let mut coordinator = UpdateCoordinator::new(device, Duration::from_secs(3600));
        coordinator.refresh_at(at(10, 0)).unwrap();
        let before = coordinator.device().store().clone();

        backend.reply(Method::POST, ITEMS, 503, json!({"error": "maintenance"}));
        assert!(coordinator.refresh_at(at(10, 1)).is_err());
        assert!(coordinator.refresh_at(at(10, 2)).is_err());

        assert_eq!(coordinator.consecutive_failures(), 2);
        assert!(coordinator.last_error().is_some());
        assert_eq!(coordinator.last_success(), Some(at(10, 0)));
        assert_eq!(coordinator.device().store(), &before);
        assert_eq!(coordinator.device().comfort_temperature(1), Some(21.5));

        backend.reply(Method::POST, ITEMS, 200, fixture("galevo-items.json"));
        coordinator.refresh_at(at(10, 3)).unwrap();
        assert_eq!(coordinator.consecutive_failures(), 0);
        assert_eq!(coordinator.last_error(), None);
        assert_eq!(coordinator.last_success(), Some(at(10, 3)));
    }

    #[test]
    fn energy_runs_on_its_own_interval_even_when_state_fails() {
        let backend = ScriptedBackend::new();
        let device = galevo(&backend);
        script_energy(&backend);
        let mut coordinator = UpdateCoordinator::new(device, Duration::from_secs(3600));

        coordinator.refresh_at(at(10, 0)).unwrap();
        coordinator.refresh_at(at(10, 30)).unwrap();
        assert_eq!(backend.requests_to(SEQUENCES).len(), 1);

        backend.reply(Method::POST, ITEMS, 500, json!({}));
        assert!(coordinator.refresh_at(at(11, 0)).is_err());
        assert_eq!(backend.requests_to(SEQUENCES).len(), 2);
        assert!(coordinator.device().energy().is_some());
    }

    #[test]
    fn reset_boundary_follows_sequence_changes() {
        let backend = ScriptedBackend::new();
        let device = galevo(&backend);
        script_energy(&backend);
        let mut coordinator = UpdateCoordinator::new(device, Duration::from_secs(60));

        coordinator.refresh_at(at(9, 40)).unwrap();
        assert_eq!(coordinator.last_reset(), Some(at(8, 0)));

        // same sequences: the boundary stays put
        coordinator.refresh_at(at(11, 5)).unwrap();
        assert_eq!(coordinator.last_reset(), Some(at(8, 0)));

        let mut changed = fixture("consumption-sequences.json");
        changed[0]["v"].as_array_mut().unwrap().push(json!(0.7));
        backend.reply(Method::GET, SEQUENCES, 200, changed);
        coordinator.refresh_at(at(13, 15)).unwrap();
        assert_eq!(coordinator.last_reset(), Some(at(12, 0)));
    }

    #[test]
    fn failed_energy_refresh_keeps_previous_energy() {
        let backend = ScriptedBackend::new();
        let device = galevo(&backend);
        script_energy(&backend);
        let mut coordinator = UpdateCoordinator::new(device, Duration::from_secs(60));
        coordinator.refresh_at(at(9, 0)).unwrap();

        backend.reply(Method::GET, SEQUENCES, 502, json!({}));
        coordinator.refresh_at(at(9, 5)).unwrap();

        assert!(coordinator.energy_error().is_some());
        assert_eq!(coordinator.last_reset(), Some(at(8, 0)));
        let energy = coordinator.device().energy().unwrap();
        assert_eq!(energy.last_two_hours(crate::device::GAS_HEATING_KIND), Some(1.5));
    }

    #[test]
    fn devices_without_metering_never_fetch_energy() {
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
        let mut coordinator = UpdateCoordinator::new(device, Duration::from_secs(60));

        coordinator.refresh_at(at(9, 0)).unwrap();

        assert!(backend.requests().iter().all(|r| !r.url.contains("/reports/")));
        assert_eq!(coordinator.device().water_heater_current_temperature(), Some(48.0));
        assert_eq!(coordinator.last_reset(), None);
    }

    #[test]
    fn reset_slot_truncates_to_even_hours() {
        assert_eq!(reset_slot(at(0, 59)), at(0, 0));
        assert_eq!(reset_slot(at(3, 0)), at(2, 0));
        assert_eq!(reset_slot(at(23, 59)), at(22, 0));
    }
}
