//! Proportional-need current allocation
//!
//! Splits the shared budget in proportion to each vehicle's energy deficit,
//! clamps every share to what the vehicle accepts, then takes any overflow
//! from the largest assignment so the total never exceeds the budget.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::context::MessageLog;
use crate::device::Device;
use crate::types::DeviceId;

/// Assigned current per vehicle, in amps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    assignments: BTreeMap<DeviceId, i32>,
}

impl Allocation {
    pub fn get(&self, device: &str) -> Option<i32> {
        self.assignments.get(device).copied()
    }

    pub fn total(&self) -> i32 {
        self.assignments.values().sum()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, i32)> {
        self.assignments.iter().map(|(id, amps)| (id, *amps))
    }
}

impl FromIterator<(DeviceId, i32)> for Allocation {
    fn from_iter<I: IntoIterator<Item = (DeviceId, i32)>>(iter: I) -> Self {
        Self {
            assignments: iter.into_iter().collect(),
        }
    }
}

/// Compute the allocation for `devices` under `budget_amps`
pub fn allocate(devices: &[Device], budget_amps: i32, log: &MessageLog) -> Allocation {
    let needs: Vec<f64> = devices
        .iter()
        .map(|device| {
            let need = device.needed_kwh(true);
            if need > 0.0 {
                log.push(format!("{}, needs {:.1} kWh", device, need));
            } else {
                log.push(device.to_string());
            }
            need
        })
        .collect();

    let shares = proportional_shares(&needs, budget_amps);

    let mut assignments: Vec<(DeviceId, i32)> = devices
        .iter()
        .zip(shares)
        .map(|(device, share)| {
            let rounded = (share + 0.5) as i32;
            let limited = device.limit_request_current(rounded);
            debug!("{}: share {:.2} A -> {} A", device.id, share, limited);
            (device.id.clone(), limited)
        })
        .collect();

    correct_oversubscription(&mut assignments, budget_amps);

    let allocation: Allocation = assignments.into_iter().collect();
    info!(
        "Allocated {}/{} A across {} devices",
        allocation.total(),
        budget_amps,
        allocation.len()
    );
    allocation
}

/// Split the budget by need, or equally when nobody needs anything
pub fn proportional_shares(needs: &[f64], budget_amps: i32) -> Vec<f64> {
    if needs.is_empty() {
        return Vec::new();
    }

    let budget = budget_amps as f64;
    let total: f64 = needs.iter().sum();

    if total > 0.0 {
        needs.iter().map(|need| budget * (need / total)).collect()
    } else {
        let equal = budget / needs.len() as f64;
        vec![equal; needs.len()]
    }
}

/// Take any overflow from the single largest assignment
///
/// Returns the overflow that was removed. The reduced assignment is not
/// re-checked against that vehicle's minimum.
pub fn correct_oversubscription(assignments: &mut [(DeviceId, i32)], budget_amps: i32) -> i32 {
    let remaining = budget_amps - assignments.iter().map(|(_, amps)| amps).sum::<i32>();
    if remaining >= 0 {
        return 0;
    }

    let mut largest: Option<&mut (DeviceId, i32)> = None;
    for entry in assignments.iter_mut() {
        if largest.as_ref().map_or(true, |l| entry.1 > l.1) {
            largest = Some(entry);
        }
    }

    match largest {
        Some((device, amps)) => {
            info!(
                "Oversubscribed by {} A, reducing {} from {} A",
                -remaining, device, amps
            );
            *amps += remaining;
            -remaining
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::device;
    use crate::types::ChargingState;

    fn named(id: &str, mut d: Device) -> Device {
        d.id = id.to_string();
        d.name = id.to_string();
        d
    }

    #[test]
    fn test_equal_split_without_need() {
        let shares = proportional_shares(&[0.0, 0.0, 0.0, 0.0], 32);
        assert_eq!(shares, vec![8.0; 4]);
        assert!(proportional_shares(&[], 32).is_empty());
    }

    #[test]
    fn test_proportional_split() {
        let shares = proportional_shares(&[10.0, 30.0], 32);
        assert_eq!(shares, vec![8.0, 24.0]);
    }

    #[test]
    fn test_correct_oversubscription() {
        let mut assignments = vec![
            ("a".to_string(), 10),
            ("b".to_string(), 20),
            ("c".to_string(), 5),
        ];
        assert_eq!(correct_oversubscription(&mut assignments, 32), 3);
        assert_eq!(assignments[1].1, 17);
        assert_eq!(assignments.iter().map(|(_, a)| a).sum::<i32>(), 32);

        let mut fits = vec![("a".to_string(), 10)];
        assert_eq!(correct_oversubscription(&mut fits, 32), 0);
        assert_eq!(fits[0].1, 10);

        let mut empty: Vec<(DeviceId, i32)> = Vec::new();
        assert_eq!(correct_oversubscription(&mut empty, 32), 0);
    }

    #[test]
    fn test_one_needy_one_full() {
        // A needs 10 kWh, B is at its limit
        let mut a = named("a", device(ChargingState::Charging, "home", 32));
        a.battery_level = 50.0;
        a.charge_limit = 60.0;
        a.energy_remaining_kwh = 50.0;
        let mut b = named("b", device(ChargingState::Charging, "home", 32));
        b.battery_level = 80.0;
        b.charge_limit = 80.0;

        let log = MessageLog::new();
        let allocation = allocate(&[a, b], 32, &log);

        // B is floored to 5 A, the overflow comes off A
        assert_eq!(allocation.get("b"), Some(5));
        assert_eq!(allocation.get("a"), Some(27));
        assert_eq!(allocation.total(), 32);

        let lines = log.drain();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("needs 10.0 kWh"));
        assert!(!lines[1].contains("kWh"));
    }

    #[test]
    fn test_not_home_gets_zero_share() {
        let mut a = named("a", device(ChargingState::Charging, "home", 16));
        a.charge_limit = 90.0;
        let b = named("b", device(ChargingState::Charging, "away", 16));

        let allocation = allocate(&[a, b], 32, &MessageLog::new());
        assert_eq!(allocation.get("a"), Some(16));
        assert_eq!(allocation.get("b"), Some(0));
    }

    #[test]
    fn test_equal_split_is_clamped() {
        let a = named("a", device(ChargingState::Disconnected, "home", 10));
        let b = named("b", device(ChargingState::Disconnected, "home", 32));
        let c = named("c", device(ChargingState::Disconnected, "home", 32));

        let allocation = allocate(&[a, b, c], 32, &MessageLog::new());
        // 10.67 rounds to 11, a caps at 10
        assert_eq!(allocation.get("a"), Some(10));
        assert_eq!(allocation.get("b"), Some(11));
        assert_eq!(allocation.get("c"), Some(11));
    }

    #[test]
    fn test_rounding_overflow_taken_from_largest() {
        let mut devices = Vec::new();
        for id in ["a", "b", "c"] {
            let mut d = named(id, device(ChargingState::Charging, "home", 32));
            d.charge_limit = 100.0;
            devices.push(d);
        }
        // 32 / 3 = 10.67 each, rounding gives 33
        let allocation = allocate(&devices, 32, &MessageLog::new());
        assert_eq!(allocation.total(), 32);
        assert_eq!(allocation.get("a"), Some(10));
        assert_eq!(allocation.get("b"), Some(11));
    }
}
