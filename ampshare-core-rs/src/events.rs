//! Triggers and debounce
//!
//! Decides when to recompute. Plug and unplug events open a stale window
//! while the vehicle's telemetry settles; run requests arriving inside any
//! open window are dropped.
//!
//! ## Trigger Mapping
//!
//! | State change | Trigger |
//! |--------------|---------|
//! | `charge_cable` off → on | [`Trigger::PluggedIn`] |
//! | `charge_cable` on → off | [`Trigger::Unplugged`] |
//! | `charging` leaves `charging` (not to `disconnected`) | [`Trigger::ChargingStopped`] |
//! | `charge_limit` changes | [`Trigger::ChargeLimitChanged`] |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::command::CommandExecutor;
use crate::coordinator::{Arbiter, RunOutcome, SuppressReason};
use crate::device::Device;
use crate::error::{ArbiterError, Result};
use crate::report::{await_new_report, wait_for_state, StateFilter, ValueMatch};
use crate::types::{sentinel, Attribute, DeviceId, StateChange};

/// Reasons to recompute the allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    ChargeLimitChanged { device: DeviceId },
    ChargingStopped { device: DeviceId },
    /// Cable plugged in; `at` is when the cable state was reported
    PluggedIn { device: DeviceId, at: DateTime<Utc> },
    Unplugged { device: DeviceId },
    /// External request to recompute
    Recompute,
}

impl Trigger {
    /// Classify a raw state change
    pub fn from_state_change(change: &StateChange) -> Option<Self> {
        let device = change.device.clone();
        let old = change.old.as_deref();
        let new = change.new.as_str();

        match change.attribute {
            Attribute::ChargeCable => match (old, new) {
                (Some(sentinel::CABLE_OFF), sentinel::CABLE_ON) => Some(Trigger::PluggedIn {
                    device,
                    at: change.reported_at,
                }),
                (Some(sentinel::CABLE_ON), sentinel::CABLE_OFF) => Some(Trigger::Unplugged { device }),
                _ => None,
            },
            Attribute::Charging
                if old == Some(sentinel::CHARGING)
                    && new != sentinel::CHARGING
                    && new != sentinel::DISCONNECTED =>
            {
                Some(Trigger::ChargingStopped { device })
            }
            Attribute::ChargeLimit if old.is_some() && old != Some(new) => {
                Some(Trigger::ChargeLimitChanged { device })
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::ChargeLimitChanged { device } => write!(f, "charge limit changed on {}", device),
            Trigger::ChargingStopped { device } => write!(f, "charging stopped on {}", device),
            Trigger::PluggedIn { device, .. } => write!(f, "{} plugged in", device),
            Trigger::Unplugged { device } => write!(f, "{} unplugged", device),
            Trigger::Recompute => write!(f, "recompute requested"),
        }
    }
}

impl<B: Backend> Arbiter<B> {
    /// React to one trigger
    pub async fn handle(&self, trigger: Trigger) -> RunOutcome {
        info!("Trigger: {}", trigger);
        match trigger {
            Trigger::PluggedIn { device, at } => self.on_plugged_in(&device, at).await,
            Trigger::Unplugged { device } => self.on_unplugged(&device).await,
            Trigger::ChargeLimitChanged { .. } | Trigger::ChargingStopped { .. } | Trigger::Recompute => {
                self.request_run().await
            }
        }
    }

    /// Run unless a stale window is open
    pub async fn request_run(&self) -> RunOutcome {
        let pending = self.context.stale_waits.pending();
        if pending > 0 {
            info!("Run suppressed, {} stale waits pending", pending);
            return RunOutcome::Suppressed(SuppressReason::StaleData);
        }
        self.run().await
    }

    async fn on_plugged_in(&self, device: &DeviceId, at: DateTime<Utc>) -> RunOutcome {
        {
            let _stale = self.context.stale_waits.enter();
            if let Err(e) = self.settle_plug_in(device, at).await {
                warn!("Plug-in handling for {} failed: {}", device, e);
            }
        }
        self.request_run().await
    }

    async fn settle_plug_in(&self, device: &DeviceId, at: DateTime<Utc>) -> Result<()> {
        let min_current = self.config.min_current_amps;
        let executor =
            CommandExecutor::new(&*self.backend, &self.config.command, &self.context.messages);

        // Free headroom until the new vehicle's need is known
        for other in self.context.devices.iter().filter(|id| *id != device) {
            let snapshot = match self.backend.snapshot(other).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Plug-in: cannot read {}: {}", other, e);
                    continue;
                }
            };
            let mut other = Device::from_snapshot(&snapshot, min_current);
            if other.charging_at_home() {
                let floor = other.min_current;
                if let Err(e) = executor.set_request_current(&mut other, floor).await {
                    warn!("Plug-in: cannot lower {}: {}", other.id, e);
                }
            }
        }

        let connected = StateFilter::to(ValueMatch::is_not(sentinel::DISCONNECTED));
        wait_for_state(
            &*self.backend,
            device,
            Attribute::Charging,
            &connected,
            self.config.events.transition_timeout,
        )
        .await?;

        let settle = chrono::Duration::from_std(self.config.events.settle_delay)
            .unwrap_or_else(|_| chrono::Duration::zero());
        await_new_report(
            &*self.backend,
            device,
            Attribute::ChargeCurrent,
            Some(at + settle),
            self.config.events.report_timeout,
        )
        .await?;

        Ok(())
    }

    async fn on_unplugged(&self, device: &DeviceId) -> RunOutcome {
        {
            let _stale = self.context.stale_waits.enter();
            let disconnected = StateFilter::to(ValueMatch::is(sentinel::DISCONNECTED));
            if let Err(e) = wait_for_state(
                &*self.backend,
                device,
                Attribute::Charging,
                &disconnected,
                self.config.events.transition_timeout,
            )
            .await
            {
                warn!("Unplug handling for {} failed: {}", device, e);
            }
        }
        self.request_run().await
    }

    /// Turn telemetry changes into handled triggers until the stream closes
    ///
    /// Each trigger runs on its own task so a long plug-in settle never
    /// blocks the next event.
    pub async fn drive(self: Arc<Self>) -> Result<()> {
        let mut rx = self.backend.subscribe();
        info!("Watching {} devices", self.context.devices.len());

        loop {
            match rx.recv().await {
                Ok(change) => {
                    if !self.context.devices.contains(&change.device) {
                        continue;
                    }
                    let Some(trigger) = Trigger::from_state_change(&change) else {
                        continue;
                    };
                    let arbiter = Arc::clone(&self);
                    tokio::spawn(async move {
                        let outcome = arbiter.handle(trigger).await;
                        debug!("Trigger handled: {:?}", outcome);
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event loop lagged, skipped {} changes", skipped);
                }
                Err(RecvError::Closed) => return Err(ArbiterError::StreamClosed),
            }
        }
    }
}
