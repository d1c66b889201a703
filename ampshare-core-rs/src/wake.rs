//! Wake sleeping vehicles before allocating
//!
//! A sleeping vehicle's telemetry is stale, so every vehicle that is asleep
//! while plugged in at home is woken and waited on. Vehicles that never
//! wake are still allocated to, using their stale values.

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::WakeConfig;
use crate::context::MessageLog;
use crate::device::Device;
use crate::error::Result;
use crate::report::{wait_for_state, StateFilter, ValueMatch};
use crate::types::{sentinel, Attribute, Command, DeviceId};

/// What the wake pass achieved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakeSummary {
    /// Outer attempts used
    pub attempts: u32,
    /// Vehicles confirmed online after a wake
    pub woken: Vec<DeviceId>,
    /// Vehicles that timed out on the last attempt
    pub still_asleep: Vec<DeviceId>,
}

pub struct WakeCoordinator<'a, B: Backend> {
    backend: &'a B,
    config: &'a WakeConfig,
    min_current: i32,
    log: &'a MessageLog,
}

impl<'a, B: Backend> WakeCoordinator<'a, B> {
    pub fn new(backend: &'a B, config: &'a WakeConfig, min_current: i32, log: &'a MessageLog) -> Self {
        Self {
            backend,
            config,
            min_current,
            log,
        }
    }

    /// Wake every sleeping vehicle plugged in at home
    pub async fn ensure_awake(&self, devices: &[DeviceId]) -> Result<WakeSummary> {
        let mut summary = WakeSummary::default();
        let online = StateFilter::to(ValueMatch::is(sentinel::ONLINE));

        for attempt in 1..=self.config.attempts {
            summary.attempts = attempt;

            let mut pending = Vec::new();
            for id in devices {
                let snapshot = self.backend.snapshot(id).await?;
                let device = Device::from_snapshot(&snapshot, self.min_current);
                if !device.awake() && device.plugged_in_at_home() {
                    pending.push(device);
                }
            }

            if pending.is_empty() {
                debug!("Wake: nothing asleep (attempt {})", attempt);
                summary.still_asleep.clear();
                break;
            }

            for device in &pending {
                info!("Wake: waking {} (attempt {})", device.name, attempt);
                if let Err(e) = self.backend.execute(&device.id, Command::Wake).await {
                    warn!("Wake: command to {} failed: {}", device.id, e);
                }
            }

            let waits = pending.iter().map(|device| {
                wait_for_state(
                    self.backend,
                    &device.id,
                    Attribute::Connectivity,
                    &online,
                    self.config.timeout,
                )
            });
            let outcomes = join_all(waits).await;

            summary.still_asleep.clear();
            for (device, outcome) in pending.iter().zip(outcomes) {
                match outcome {
                    Ok(outcome) if !outcome.timed_out() => {
                        if !summary.woken.contains(&device.id) {
                            summary.woken.push(device.id.clone());
                        }
                    }
                    Ok(_) => {
                        warn!("Wake: {} did not wake within {:?}", device.name, self.config.timeout);
                        summary.still_asleep.push(device.id.clone());
                    }
                    Err(e) => {
                        warn!("Wake: waiting for {} failed: {}", device.name, e);
                        summary.still_asleep.push(device.id.clone());
                    }
                }
            }

            if summary.still_asleep.is_empty() {
                break;
            }
        }

        for id in &summary.still_asleep {
            self.log.push(format!("{} did not wake, using stale values", id));
        }
        Ok(summary)
    }
}
