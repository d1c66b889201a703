//! Per-vehicle charge model
//!
//! A [`Device`] is built from a telemetry [`Snapshot`] at the start of a run
//! and exposes the predicates and energy estimate the allocator works from.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::{sentinel, Attribute, ChargingState, Connectivity, DeviceId, Snapshot};

/// Need assumed when the battery level is unknown
pub const UNKNOWN_NEED_KWH: f64 = 50.0;

/// Max current assumed when the vehicle does not report one
pub const FALLBACK_MAX_CURRENT: i32 = 32;

/// Charge state and constraints of one vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Battery level, 0-100
    pub battery_level: f64,
    /// Charge limit, 0-100
    pub charge_limit: f64,
    /// Energy left in the pack, kWh
    pub energy_remaining_kwh: f64,
    pub charging: ChargingState,
    pub location: String,
    pub connectivity: Connectivity,
    /// Currently requested current, amps
    pub request_current: i32,
    pub max_current: i32,
    /// Global floor while plugged in at home
    pub min_current: i32,
    /// When the requested current was last reported
    pub current_reported_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Interpret a raw snapshot
    ///
    /// Malformed numbers are logged and read as zero so one bad sensor does
    /// not stop the allocation.
    pub fn from_snapshot(snapshot: &Snapshot, min_current: i32) -> Self {
        let float = |attribute: Attribute| parse_float(snapshot, attribute).unwrap_or(0.0);

        let max_current = match parse_float(snapshot, Attribute::MaxCurrent) {
            Some(amps) if amps > 0.0 => amps.round() as i32,
            _ => {
                warn!(
                    "{}: no usable max current, assuming {} A",
                    snapshot.device, FALLBACK_MAX_CURRENT
                );
                FALLBACK_MAX_CURRENT
            }
        };

        Self {
            id: snapshot.device.clone(),
            name: snapshot.name.clone(),
            battery_level: float(Attribute::BatteryLevel),
            charge_limit: float(Attribute::ChargeLimit),
            energy_remaining_kwh: float(Attribute::EnergyRemaining),
            charging: ChargingState::from_raw(
                snapshot.value(Attribute::Charging).unwrap_or(sentinel::DISCONNECTED),
            ),
            location: snapshot.value(Attribute::Location).unwrap_or_default().to_string(),
            connectivity: Connectivity::from_raw(
                snapshot.value(Attribute::Connectivity).unwrap_or(sentinel::OFFLINE),
            ),
            request_current: float(Attribute::ChargeCurrent).round() as i32,
            max_current,
            min_current,
            current_reported_at: snapshot.reported_at(Attribute::ChargeCurrent),
        }
    }

    pub fn plugged_in(&self) -> bool {
        self.charging != ChargingState::Disconnected
    }

    pub fn at_home(&self) -> bool {
        self.location == sentinel::HOME
    }

    pub fn plugged_in_at_home(&self) -> bool {
        self.plugged_in() && self.at_home()
    }

    pub fn charging_at_home(&self) -> bool {
        matches!(self.charging, ChargingState::Starting | ChargingState::Charging) && self.at_home()
    }

    pub fn awake(&self) -> bool {
        self.connectivity == Connectivity::Online
    }

    /// Percentage points left to the charge limit
    pub fn charge_needed(&self) -> f64 {
        (self.charge_limit - self.battery_level).max(0.0)
    }

    /// Energy needed to reach the charge limit
    ///
    /// Pack capacity is estimated from the remaining-energy to level ratio.
    /// With `plug_in_needed`, vehicles not plugged in at home need nothing.
    pub fn needed_kwh(&self, plug_in_needed: bool) -> f64 {
        if plug_in_needed && !self.plugged_in_at_home() {
            return 0.0;
        }
        if self.battery_level > 0.0 {
            self.charge_needed() * self.energy_remaining_kwh / self.battery_level
        } else {
            UNKNOWN_NEED_KWH
        }
    }

    /// Clamp a desired current to what this vehicle will accept
    pub fn limit_request_current(&self, desired: i32) -> i32 {
        let limited = desired.min(self.max_current).max(0);
        if limited < self.min_current && self.plugged_in_at_home() {
            self.min_current
        } else {
            limited
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let place = if self.at_home() { "home" } else { "away" };
        write!(
            f,
            "{}: {:.0}% -> {:.0}%, {}, {}, {}/{} A",
            self.name,
            self.battery_level,
            self.charge_limit,
            place,
            self.charging,
            self.request_current,
            self.max_current
        )
    }
}

fn parse_float(snapshot: &Snapshot, attribute: Attribute) -> Option<f64> {
    let raw = snapshot.value(attribute)?;
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            warn!("{}: malformed {} {:?}", snapshot.device, attribute, raw);
            None
        }
    }
}
