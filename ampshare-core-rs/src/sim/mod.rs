//! In-memory simulated fleet
//!
//! Implements every collaborator trait against a set of simulated vehicles
//! so the arbiter can be driven without real transports. Report timestamps
//! follow the tokio clock and are strictly increasing, which keeps waits
//! deterministic under paused time.

pub mod spec;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{CommandSink, Notifier, Telemetry};
use crate::error::{ArbiterError, Result};
use crate::types::{
    sentinel, Attribute, Command, CommandAck, DeviceId, Reading, Snapshot, StateChange,
};

pub use spec::{parse_fleet, SimDeviceSpec};

/// Delay between a cable event and the charging status following it
const CHARGING_FOLLOW_DELAY: Duration = Duration::from_secs(2);

/// Delay before a freshly plugged vehicle re-reports its current
const PLUG_REPORT_DELAY: Duration = Duration::from_secs(20);

/// A notification captured by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

struct SimDevice {
    name: String,
    readings: HashMap<Attribute, Reading>,
    acks: VecDeque<Duration>,
    default_ack: Duration,
    report_lag: Duration,
    wake_delay: Option<Duration>,
}

struct Inner {
    order: Vec<DeviceId>,
    devices: Mutex<HashMap<DeviceId, SimDevice>>,
    changes: broadcast::Sender<StateChange>,
    commands: Mutex<Vec<(DeviceId, Command)>>,
    notifications: Mutex<Vec<Notification>>,
    calls: AtomicUsize,
    failing_snapshots: AtomicUsize,
    hold: watch::Sender<bool>,
    entered: Notify,
    started: Instant,
    base: DateTime<Utc>,
    last_reported: Mutex<DateTime<Utc>>,
}

/// Simulated vehicles behind the collaborator traits
#[derive(Clone)]
pub struct SimulatedFleet {
    inner: Arc<Inner>,
}

impl SimulatedFleet {
    /// Create a fleet from vehicle descriptions
    pub fn new(specs: Vec<SimDeviceSpec>) -> Self {
        let base = Utc::now();
        let (changes, _) = broadcast::channel(256);
        let (hold, _) = watch::channel(false);

        let order = specs.iter().map(|s| s.id.clone()).collect();
        let devices = specs
            .into_iter()
            .map(|spec| {
                let reading = |value: String| Reading::new(value, base);
                let readings = HashMap::from([
                    (Attribute::BatteryLevel, reading(spec.battery_level.to_string())),
                    (Attribute::ChargeLimit, reading(spec.charge_limit.to_string())),
                    (
                        Attribute::EnergyRemaining,
                        reading(spec.energy_remaining_kwh.to_string()),
                    ),
                    (Attribute::Charging, reading(spec.charging.clone())),
                    (Attribute::ChargeCable, reading(spec.cable().to_string())),
                    (Attribute::Location, reading(spec.location.clone())),
                    (Attribute::Connectivity, reading(spec.connectivity.clone())),
                    (Attribute::ChargeCurrent, reading(spec.charge_current.to_string())),
                    (Attribute::MaxCurrent, reading(spec.max_current.to_string())),
                ]);
                let device = SimDevice {
                    name: spec.display_name().to_string(),
                    readings,
                    acks: VecDeque::new(),
                    default_ack: Duration::from_millis(spec.ack_ms),
                    report_lag: Duration::from_millis(spec.report_lag_ms),
                    wake_delay: spec.wake_delay_secs.map(Duration::from_secs),
                };
                (spec.id, device)
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                order,
                devices: Mutex::new(devices),
                changes,
                commands: Mutex::new(Vec::new()),
                notifications: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                failing_snapshots: AtomicUsize::new(0),
                hold,
                entered: Notify::new(),
                started: Instant::now(),
                base,
                last_reported: Mutex::new(base),
            }),
        }
    }

    /// Create a fleet from a JSON array of vehicle descriptions
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(Self::new(parse_fleet(json)?))
    }

    /// Vehicle ids in description order
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.inner.order.clone()
    }

    /// Simulated wall clock
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.inner.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.inner.base + elapsed
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.inner.last_reported.lock();
        let now = self.now();
        let at = if now > *last {
            now
        } else {
            *last + chrono::Duration::milliseconds(1)
        };
        *last = at;
        at
    }

    /// Publish a new value for one stream
    pub fn report(
        &self,
        device: &str,
        attribute: Attribute,
        value: impl Into<String>,
    ) -> Option<StateChange> {
        let value = value.into();
        let reported_at = self.next_timestamp();

        let old = {
            let mut devices = self.inner.devices.lock();
            let Some(sim) = devices.get_mut(device) else {
                warn!("Sim: report for unknown device {}", device);
                return None;
            };
            sim.readings
                .insert(attribute, Reading::new(value.clone(), reported_at))
                .map(|r| r.value)
        };

        let change = StateChange {
            device: device.to_string(),
            attribute,
            old,
            new: value,
            reported_at,
        };
        debug!("Sim: {} {} -> {}", device, attribute, change.new);
        // No subscribers is fine
        let _ = self.inner.changes.send(change.clone());
        Some(change)
    }

    /// Current raw value of one stream
    pub fn reading(&self, device: &str, attribute: Attribute) -> Option<String> {
        self.inner
            .devices
            .lock()
            .get(device)
            .and_then(|d| d.readings.get(&attribute))
            .map(|r| r.value.clone())
    }

    /// Plug the cable in; the charging status follows shortly after
    pub fn plug_in(&self, device: &str) -> Option<StateChange> {
        let change = self.report(device, Attribute::ChargeCable, sentinel::CABLE_ON)?;
        let fleet = self.clone();
        let id = device.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(CHARGING_FOLLOW_DELAY).await;
            fleet.report(&id, Attribute::Charging, sentinel::CHARGING);
            tokio::time::sleep(PLUG_REPORT_DELAY).await;
            if let Some(current) = fleet.reading(&id, Attribute::ChargeCurrent) {
                fleet.report(&id, Attribute::ChargeCurrent, current);
            }
        });
        Some(change)
    }

    /// Pull the cable; the charging status follows shortly after
    pub fn unplug(&self, device: &str) -> Option<StateChange> {
        let change = self.report(device, Attribute::ChargeCable, sentinel::CABLE_OFF)?;
        let fleet = self.clone();
        let id = device.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(CHARGING_FOLLOW_DELAY).await;
            fleet.report(&id, Attribute::Charging, sentinel::DISCONNECTED);
        });
        Some(change)
    }

    /// Queue ack durations for the next commands to `device`
    pub fn script_acks(&self, device: &str, acks: impl IntoIterator<Item = Duration>) {
        if let Some(sim) = self.inner.devices.lock().get_mut(device) {
            sim.acks.extend(acks);
        }
    }

    /// Fail the next `count` snapshot reads
    pub fn fail_snapshots(&self, count: usize) {
        self.inner.failing_snapshots.store(count, Ordering::SeqCst);
    }

    /// Block commands in flight until [`release_commands`](Self::release_commands)
    pub fn hold_commands(&self) {
        self.inner.hold.send_replace(true);
    }

    pub fn release_commands(&self) {
        self.inner.hold.send_replace(false);
    }

    /// Resolves once a command has reached the fleet
    pub async fn command_entered(&self) {
        self.inner.entered.notified().await;
    }

    /// Every command received, in order
    pub fn commands(&self) -> Vec<(DeviceId, Command)> {
        self.inner.commands.lock().clone()
    }

    /// Current values set on one device, in order
    pub fn set_currents(&self, device: &str) -> Vec<i32> {
        self.inner
            .commands
            .lock()
            .iter()
            .filter_map(|(id, command)| match command {
                Command::SetChargeCurrent(amps) if id == device => Some(*amps),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.notifications.lock().clone()
    }

    /// Number of snapshot reads and commands served
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    fn next_ack(&self, device: &str) -> Result<(Duration, Duration, Option<Duration>)> {
        let mut devices = self.inner.devices.lock();
        let sim = devices
            .get_mut(device)
            .ok_or_else(|| ArbiterError::UnknownDevice(device.to_string()))?;
        let ack = sim.acks.pop_front().unwrap_or(sim.default_ack);
        Ok((ack, sim.report_lag, sim.wake_delay))
    }
}

#[async_trait]
impl Telemetry for SimulatedFleet {
    async fn snapshot(&self, device: &DeviceId) -> Result<Snapshot> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.inner.failing_snapshots.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.failing_snapshots.store(failing - 1, Ordering::SeqCst);
            return Err(ArbiterError::Telemetry {
                device: device.clone(),
                reason: "simulated outage".to_string(),
            });
        }

        let devices = self.inner.devices.lock();
        let sim = devices
            .get(device)
            .ok_or_else(|| ArbiterError::UnknownDevice(device.clone()))?;
        Ok(Snapshot {
            device: device.clone(),
            name: sim.name.clone(),
            readings: sim.readings.clone(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }
}

#[async_trait]
impl CommandSink for SimulatedFleet {
    async fn execute(&self, device: &DeviceId, command: Command) -> Result<CommandAck> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.entered.notify_one();

        let mut held = self.inner.hold.subscribe();
        if held.wait_for(|held| !*held).await.is_err() {
            return Err(ArbiterError::CommandRejected {
                device: device.clone(),
                command,
                reason: "simulator stopped".to_string(),
            });
        }

        let (ack, lag, wake_delay) = self.next_ack(device)?;
        self.inner.commands.lock().push((device.clone(), command));
        info!("Sim: {} <- {} (ack {:?})", device, command, ack);
        tokio::time::sleep(ack).await;

        match command {
            Command::SetChargeCurrent(amps) => {
                if lag.is_zero() {
                    self.report(device, Attribute::ChargeCurrent, amps.to_string());
                } else {
                    let fleet = self.clone();
                    let id = device.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(lag).await;
                        fleet.report(&id, Attribute::ChargeCurrent, amps.to_string());
                    });
                }
            }
            Command::Wake => {
                let online = self.reading(device, Attribute::Connectivity).as_deref()
                    == Some(sentinel::ONLINE);
                if let (false, Some(delay)) = (online, wake_delay) {
                    let fleet = self.clone();
                    let id = device.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        fleet.report(&id, Attribute::Connectivity, sentinel::ONLINE);
                    });
                }
            }
        }

        Ok(CommandAck { duration: ack })
    }
}

#[async_trait]
impl Notifier for SimulatedFleet {
    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        info!("Sim notification: {}\n{}", title, body);
        self.inner.notifications.lock().push(Notification {
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reports_are_strictly_increasing() {
        let fleet = SimulatedFleet::new(vec![SimDeviceSpec::new("car1")]);
        let a = fleet.report("car1", Attribute::ChargeCurrent, "10").unwrap();
        let b = fleet.report("car1", Attribute::ChargeCurrent, "11").unwrap();
        assert!(b.reported_at > a.reported_at);
        assert_eq!(b.old.as_deref(), Some("10"));
        assert!(fleet.report("nope", Attribute::ChargeCurrent, "1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_current_reports_value() {
        let fleet = SimulatedFleet::new(vec![SimDeviceSpec::new("car1")]);
        let mut rx = fleet.subscribe();

        let ack = fleet
            .execute(&"car1".to_string(), Command::SetChargeCurrent(12))
            .await
            .unwrap();
        assert_eq!(ack.duration, Duration::from_secs(1));

        let change = rx.recv().await.unwrap();
        assert_eq!(change.attribute, Attribute::ChargeCurrent);
        assert_eq!(change.new, "12");
        assert_eq!(fleet.set_currents("car1"), vec![12]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_brings_device_online() {
        let fleet = SimulatedFleet::new(vec![SimDeviceSpec::new("car1")
            .asleep()
            .wake_after(Duration::from_secs(5))]);

        fleet.execute(&"car1".to_string(), Command::Wake).await.unwrap();
        assert_eq!(
            fleet.reading("car1", Attribute::Connectivity).as_deref(),
            Some(sentinel::ASLEEP)
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            fleet.reading("car1", Attribute::Connectivity).as_deref(),
            Some(sentinel::ONLINE)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_snapshots() {
        let fleet = SimulatedFleet::new(vec![SimDeviceSpec::new("car1")]);
        fleet.fail_snapshots(1);

        let id = "car1".to_string();
        assert!(matches!(
            fleet.snapshot(&id).await,
            Err(ArbiterError::Telemetry { .. })
        ));
        assert!(fleet.snapshot(&id).await.is_ok());
        assert_eq!(fleet.calls(), 2);
    }
}
