//! Fleet descriptions for the simulated backend

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{sentinel, DeviceId};

/// Initial state and behaviour of one simulated vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimDeviceSpec {
    pub id: DeviceId,
    pub name: String,
    pub battery_level: f64,
    pub charge_limit: f64,
    pub energy_remaining_kwh: f64,
    pub charging: String,
    pub location: String,
    pub connectivity: String,
    pub charge_current: i32,
    pub max_current: i32,
    /// Duration of every command round trip
    pub ack_ms: u64,
    /// Delay between a command and the matching telemetry report
    pub report_lag_ms: u64,
    /// Time to come online after a wake; `None` never wakes
    pub wake_delay_secs: Option<u64>,
}

impl Default for SimDeviceSpec {
    fn default() -> Self {
        Self {
            id: "car".to_string(),
            name: String::new(),
            battery_level: 50.0,
            charge_limit: 80.0,
            energy_remaining_kwh: 30.0,
            charging: sentinel::CHARGING.to_string(),
            location: sentinel::HOME.to_string(),
            connectivity: sentinel::ONLINE.to_string(),
            charge_current: 16,
            max_current: 32,
            ack_ms: 1000,
            report_lag_ms: 0,
            wake_delay_secs: Some(5),
        }
    }
}

impl SimDeviceSpec {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Battery level, charge limit and remaining energy
    pub fn battery(mut self, level: f64, limit: f64, energy_remaining_kwh: f64) -> Self {
        self.battery_level = level;
        self.charge_limit = limit;
        self.energy_remaining_kwh = energy_remaining_kwh;
        self
    }

    pub fn charging(mut self, state: impl Into<String>) -> Self {
        self.charging = state.into();
        self
    }

    pub fn unplugged(self) -> Self {
        self.charging(sentinel::DISCONNECTED)
    }

    pub fn away(mut self) -> Self {
        self.location = "not_home".to_string();
        self
    }

    pub fn asleep(mut self) -> Self {
        self.connectivity = sentinel::ASLEEP.to_string();
        self
    }

    /// Requested and maximum current
    pub fn current(mut self, request: i32, max: i32) -> Self {
        self.charge_current = request;
        self.max_current = max;
        self
    }

    pub fn ack(mut self, duration: Duration) -> Self {
        self.ack_ms = duration.as_millis() as u64;
        self
    }

    pub fn report_lag(mut self, lag: Duration) -> Self {
        self.report_lag_ms = lag.as_millis() as u64;
        self
    }

    pub fn wake_after(mut self, delay: Duration) -> Self {
        self.wake_delay_secs = Some(delay.as_secs());
        self
    }

    pub fn never_wakes(mut self) -> Self {
        self.wake_delay_secs = None;
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn cable(&self) -> &'static str {
        if self.charging == sentinel::DISCONNECTED {
            sentinel::CABLE_OFF
        } else {
            sentinel::CABLE_ON
        }
    }
}

/// Parse a JSON array of vehicle descriptions
pub fn parse_fleet(json: &str) -> serde_json::Result<Vec<SimDeviceSpec>> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fleet_with_defaults() {
        let fleet = parse_fleet(
            r#"[
                {"id": "car1", "name": "Model 3", "battery_level": 40, "max_current": 16},
                {"id": "car2", "charging": "disconnected", "wake_delay_secs": null}
            ]"#,
        )
        .unwrap();

        assert_eq!(fleet.len(), 2);
        assert_eq!(fleet[0].display_name(), "Model 3");
        assert_eq!(fleet[0].battery_level, 40.0);
        assert_eq!(fleet[0].max_current, 16);
        assert_eq!(fleet[0].charge_limit, 80.0);
        assert_eq!(fleet[0].cable(), sentinel::CABLE_ON);

        assert_eq!(fleet[1].display_name(), "car2");
        assert_eq!(fleet[1].cable(), sentinel::CABLE_OFF);
        assert_eq!(fleet[1].wake_delay_secs, None);
    }
}
