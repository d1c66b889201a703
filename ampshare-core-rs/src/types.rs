//! Core types for AmpShare telemetry and commands

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Unique identifier for a managed vehicle
pub type DeviceId = String;

/// Raw state-store values the arbiter understands
pub mod sentinel {
    pub const DISCONNECTED: &str = "disconnected";
    pub const STARTING: &str = "starting";
    pub const CHARGING: &str = "charging";
    pub const STOPPED: &str = "stopped";
    pub const COMPLETE: &str = "complete";
    pub const NO_POWER: &str = "no_power";

    pub const HOME: &str = "home";

    pub const ONLINE: &str = "online";
    pub const ASLEEP: &str = "asleep";
    pub const OFFLINE: &str = "offline";

    pub const CABLE_ON: &str = "on";
    pub const CABLE_OFF: &str = "off";
}

/// Telemetry stream of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    BatteryLevel,
    ChargeLimit,
    EnergyRemaining,
    Charging,
    ChargeCable,
    Location,
    Connectivity,
    ChargeCurrent,
    MaxCurrent,
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Attribute::BatteryLevel => "battery_level",
            Attribute::ChargeLimit => "charge_limit",
            Attribute::EnergyRemaining => "energy_remaining",
            Attribute::Charging => "charging",
            Attribute::ChargeCable => "charge_cable",
            Attribute::Location => "location",
            Attribute::Connectivity => "connectivity",
            Attribute::ChargeCurrent => "charge_current",
            Attribute::MaxCurrent => "max_current",
        };
        write!(f, "{}", name)
    }
}

/// Charging status reported by a vehicle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargingState {
    Disconnected,
    Starting,
    Charging,
    Stopped,
    Complete,
    NoPower,
    /// Anything the vehicle reports that we do not recognise
    Other(String),
}

impl ChargingState {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            sentinel::DISCONNECTED => ChargingState::Disconnected,
            sentinel::STARTING => ChargingState::Starting,
            sentinel::CHARGING => ChargingState::Charging,
            sentinel::STOPPED => ChargingState::Stopped,
            sentinel::COMPLETE => ChargingState::Complete,
            sentinel::NO_POWER => ChargingState::NoPower,
            other => ChargingState::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ChargingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChargingState::Disconnected => write!(f, "{}", sentinel::DISCONNECTED),
            ChargingState::Starting => write!(f, "{}", sentinel::STARTING),
            ChargingState::Charging => write!(f, "{}", sentinel::CHARGING),
            ChargingState::Stopped => write!(f, "{}", sentinel::STOPPED),
            ChargingState::Complete => write!(f, "{}", sentinel::COMPLETE),
            ChargingState::NoPower => write!(f, "{}", sentinel::NO_POWER),
            ChargingState::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Vehicle connectivity as seen by the telemetry source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Asleep,
    Offline,
}

impl Connectivity {
    /// Anything other than `online` or `asleep` is treated as offline
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            sentinel::ONLINE => Connectivity::Online,
            sentinel::ASLEEP => Connectivity::Asleep,
            _ => Connectivity::Offline,
        }
    }
}

/// A raw value and the time the device last reported it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: String,
    pub reported_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(value: impl Into<String>, reported_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            reported_at,
        }
    }
}

/// Point-in-time view of every stream of one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub device: DeviceId,
    pub name: String,
    pub readings: HashMap<Attribute, Reading>,
}

impl Snapshot {
    pub fn new(device: impl Into<DeviceId>, name: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            name: name.into(),
            readings: HashMap::new(),
        }
    }

    pub fn with(mut self, attribute: Attribute, reading: Reading) -> Self {
        self.readings.insert(attribute, reading);
        self
    }

    pub fn value(&self, attribute: Attribute) -> Option<&str> {
        self.readings.get(&attribute).map(|r| r.value.as_str())
    }

    pub fn reported_at(&self, attribute: Attribute) -> Option<DateTime<Utc>> {
        self.readings.get(&attribute).map(|r| r.reported_at)
    }
}

/// A single state transition delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub device: DeviceId,
    pub attribute: Attribute,
    pub old: Option<String>,
    pub new: String,
    pub reported_at: DateTime<Utc>,
}

/// Commands the arbiter sends to vehicles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "amps", rename_all = "snake_case")]
pub enum Command {
    /// Set the requested charge current in amps
    SetChargeCurrent(i32),
    /// Press the wake button
    Wake,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::SetChargeCurrent(amps) => write!(f, "set_charge_current({})", amps),
            Command::Wake => write!(f, "wake"),
        }
    }
}

/// Acknowledgement of a command, with how long the round trip took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    pub duration: Duration,
}

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
}

impl WaitOutcome {
    pub fn timed_out(self) -> bool {
        self == WaitOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charging_state_parse() {
        assert_eq!(ChargingState::from_raw("disconnected"), ChargingState::Disconnected);
        assert_eq!(ChargingState::from_raw("charging"), ChargingState::Charging);
        assert_eq!(
            ChargingState::from_raw("unavailable"),
            ChargingState::Other("unavailable".to_string())
        );
        assert_eq!(ChargingState::from_raw("no_power").to_string(), "no_power");
    }

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_string(&Command::SetChargeCurrent(16)).unwrap();
        assert_eq!(json, r#"{"type":"set_charge_current","amps":16}"#);

        let parsed: Command = serde_json::from_str(r#"{"type":"wake"}"#).unwrap();
        assert_eq!(parsed, Command::Wake);
    }

    #[test]
    fn test_snapshot_lookup() {
        let at = Utc::now();
        let snapshot = Snapshot::new("car1", "Model 3")
            .with(Attribute::BatteryLevel, Reading::new("55", at));

        assert_eq!(snapshot.value(Attribute::BatteryLevel), Some("55"));
        assert_eq!(snapshot.reported_at(Attribute::BatteryLevel), Some(at));
        assert!(snapshot.value(Attribute::ChargeLimit).is_none());
    }
}
