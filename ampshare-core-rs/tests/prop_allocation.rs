//! Property tests for the allocation calculator
//!
//! Tests invariants for:
//! - Budget: assignments never sum above the budget
//! - Proportionality: a larger need never yields a smaller share
//! - Oversubscription: the largest assignment absorbs exactly the overflow
//! - Clamping: requests stay within what the vehicle accepts

use ampshare_core::allocation::{allocate, correct_oversubscription, proportional_shares};
use ampshare_core::{ChargingState, Connectivity, Device, MessageLog};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn charging_state() -> impl Strategy<Value = ChargingState> {
    prop_oneof![
        Just(ChargingState::Disconnected),
        Just(ChargingState::Starting),
        Just(ChargingState::Charging),
        Just(ChargingState::Stopped),
        Just(ChargingState::Complete),
    ]
}

fn device() -> impl Strategy<Value = Device> {
    (
        0.0f64..=100.0,
        0.0f64..=100.0,
        0.0f64..=100.0,
        charging_state(),
        prop::bool::weighted(0.8),
        6i32..=48,
        0i32..=48,
    )
        .prop_map(
            |(battery_level, charge_limit, energy, charging, home, max_current, request)| Device {
                id: String::new(),
                name: String::new(),
                battery_level,
                charge_limit,
                energy_remaining_kwh: energy,
                charging,
                location: if home { "home".to_string() } else { "away".to_string() },
                connectivity: Connectivity::Online,
                request_current: request,
                max_current,
                min_current: 5,
                current_reported_at: None,
            },
        )
}

fn fleet() -> impl Strategy<Value = Vec<Device>> {
    prop::collection::vec(device(), 1..8).prop_map(|mut devices| {
        for (i, d) in devices.iter_mut().enumerate() {
            d.id = format!("car{}", i);
            d.name = d.id.clone();
        }
        devices
    })
}

// ============================================================================
// Allocation Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: sum of assignments never exceeds the budget
    #[test]
    fn allocation_within_budget(devices in fleet(), budget in 1i32..=80) {
        let allocation = allocate(&devices, budget, &MessageLog::new());

        prop_assert_eq!(allocation.len(), devices.len());
        prop_assert!(
            allocation.total() <= budget,
            "total {} exceeds budget {}", allocation.total(), budget
        );
    }

    /// One status line per vehicle is logged
    #[test]
    fn allocation_logs_every_device(devices in fleet(), budget in 1i32..=80) {
        let log = MessageLog::new();
        allocate(&devices, budget, &log);
        prop_assert_eq!(log.len(), devices.len());
    }

    /// With no need anywhere, everyone gets budget / count before clamping
    #[test]
    fn zero_need_splits_equally(count in 1usize..10, budget in 1i32..=80) {
        let shares = proportional_shares(&vec![0.0; count], budget);
        let expected = budget as f64 / count as f64;
        for share in shares {
            prop_assert!((share - expected).abs() < 1e-9);
        }
    }

    /// Raising one vehicle's need never lowers its share
    #[test]
    fn share_monotonic_in_own_need(
        needs in prop::collection::vec(0.0f64..100.0, 1..8),
        index in any::<prop::sample::Index>(),
        extra in 0.0f64..100.0,
        budget in 1i32..=80,
    ) {
        let i = index.index(needs.len());
        let before = proportional_shares(&needs, budget)[i];

        let mut raised = needs.clone();
        raised[i] += extra;
        let after = proportional_shares(&raised, budget)[i];

        prop_assert!(after + 1e-9 >= before, "share fell from {} to {}", before, after);
    }

    /// Proportional shares add up to the budget
    #[test]
    fn shares_sum_to_budget(
        needs in prop::collection::vec(0.0f64..100.0, 1..8),
        budget in 1i32..=80,
    ) {
        let total: f64 = proportional_shares(&needs, budget).iter().sum();
        prop_assert!((total - budget as f64).abs() < 1e-6);
    }

    /// The largest assignment loses exactly the overflow
    #[test]
    fn oversubscription_taken_from_largest(
        amps in prop::collection::vec(0i32..=48, 1..8),
        overflow in 1i32..=20,
    ) {
        let sum: i32 = amps.iter().sum();
        let budget = sum - overflow;
        let mut assignments: Vec<(String, i32)> = amps
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("car{}", i), *a))
            .collect();

        let largest = *amps.iter().max().unwrap();
        let largest_at = amps.iter().position(|a| *a == largest).unwrap();

        let removed = correct_oversubscription(&mut assignments, budget);

        prop_assert_eq!(removed, overflow);
        prop_assert_eq!(assignments[largest_at].1, largest - overflow);
        prop_assert_eq!(assignments.iter().map(|(_, a)| a).sum::<i32>(), budget);
        for (i, (_, a)) in assignments.iter().enumerate() {
            if i != largest_at {
                prop_assert_eq!(*a, amps[i]);
            }
        }
    }

    /// Requests never exceed the vehicle max, and respect the floor at home
    #[test]
    fn limit_request_current_bounds(d in device(), desired in -10i32..=100) {
        let limited = d.limit_request_current(desired);

        if d.plugged_in_at_home() {
            prop_assert!(limited >= d.min_current);
            prop_assert!(limited <= d.max_current.max(d.min_current));
        } else {
            prop_assert!(limited >= 0);
            prop_assert!(limited <= d.max_current);
        }
    }
}
