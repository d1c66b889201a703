//! Single-flight allocation runs
//!
//! At most one run is in flight. A run requested while another holds the
//! lock is dropped rather than queued: the active run already reads the
//! latest state.
//!
//! ## Run Flow
//!
//! 1. Probe the run lock without waiting
//! 2. Wake sleeping vehicles plugged in at home
//! 3. Read every vehicle and compute the allocation
//! 4. Apply decreases before increases so the circuit is never oversubscribed
//! 5. On failure, wait and retry the whole attempt
//! 6. Send one notification with everything the run logged

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::allocation::{allocate, Allocation};
use crate::backend::Backend;
use crate::command::CommandExecutor;
use crate::config::ArbiterConfig;
use crate::context::{MessageLog, RunContext};
use crate::device::Device;
use crate::error::Result;
use crate::wake::WakeCoordinator;

/// Why a run request did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Another run holds the lock
    Busy,
    /// A plug/unplug resolution is in flight
    StaleData,
}

/// What a run request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { attempts: u32 },
    Suppressed(SuppressReason),
    /// Every attempt failed; partial changes stay applied
    Exhausted { attempts: u32 },
}

/// Arbitrates the shared budget across the configured vehicles
pub struct Arbiter<B: Backend> {
    pub(crate) config: ArbiterConfig,
    pub(crate) backend: Arc<B>,
    pub(crate) context: RunContext,
}

impl<B: Backend> Arbiter<B> {
    pub fn new(config: ArbiterConfig, backend: Arc<B>) -> Self {
        let context = RunContext::new(config.budget_amps, config.devices.clone());
        Self {
            config,
            backend,
            context,
        }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Run the allocation unless one is already running
    pub async fn run(&self) -> RunOutcome {
        let Some(_running) = self.context.try_begin_run() else {
            info!("Simultaneous run suppressed");
            return RunOutcome::Suppressed(SuppressReason::Busy);
        };

        let run_id = Uuid::new_v4().to_string()[..8].to_string();
        self.run_locked()
            .instrument(info_span!("run", id = %run_id))
            .await
    }

    async fn run_locked(&self) -> RunOutcome {
        let attempts = self.config.run.attempts;
        let mut failure = None;

        for attempt in 1..=attempts {
            // Lines from a failed attempt are rebuilt by the next one
            let log = MessageLog::new();
            match self.attempt(&log).await {
                Ok(allocation) => {
                    info!(
                        "Run complete: {}/{} A (attempt {})",
                        allocation.total(),
                        self.context.budget_amps,
                        attempt
                    );
                    self.publish(failure, log.drain()).await;
                    return RunOutcome::Completed { attempts: attempt };
                }
                Err(e) => {
                    warn!("Run attempt {}/{} failed: {}", attempt, attempts, e);
                    failure = Some(format!("Attempt {} failed: {}", attempt, e));
                    if attempt < attempts {
                        tokio::time::sleep(self.config.run.retry_delay).await;
                    }
                }
            }
        }

        let dropped = self.context.messages.drain();
        warn!(
            "Run abandoned after {} attempts ({} messages dropped)",
            attempts,
            dropped.len()
        );
        RunOutcome::Exhausted { attempts }
    }

    async fn attempt(&self, log: &MessageLog) -> Result<Allocation> {
        let min_current = self.config.min_current_amps;

        WakeCoordinator::new(&*self.backend, &self.config.wake, min_current, log)
            .ensure_awake(&self.context.devices)
            .await?;

        let mut devices = Vec::with_capacity(self.context.devices.len());
        for id in &self.context.devices {
            let snapshot = self.backend.snapshot(id).await?;
            devices.push(Device::from_snapshot(&snapshot, min_current));
        }

        let allocation = allocate(&devices, self.context.budget_amps, log);

        // Decreases first
        devices.sort_by_key(|d| {
            allocation
                .get(&d.id)
                .unwrap_or(d.request_current)
                .saturating_sub(d.request_current)
        });

        let executor = CommandExecutor::new(&*self.backend, &self.config.command, log);
        for device in devices.iter_mut().filter(|d| d.plugged_in_at_home()) {
            let Some(target) = allocation.get(&device.id) else {
                continue;
            };
            let outcome = executor.set_request_current(device, target).await?;
            debug!("{}: {:?}", device.id, outcome);
        }

        Ok(allocation)
    }

    /// Notify the last failure, handler lines, then this run's lines
    async fn publish(&self, failure: Option<String>, lines: Vec<String>) {
        let lines: Vec<String> = failure
            .into_iter()
            .chain(self.context.messages.drain())
            .chain(lines)
            .collect();
        if lines.is_empty() {
            return;
        }
        let body = lines.join("\n");
        if let Err(e) = self
            .backend
            .notify(&self.config.notification_title, &body)
            .await
        {
            warn!("Failed to send run notification: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDeviceSpec, SimulatedFleet};
    use crate::types::{Attribute, Command};
    use std::time::Duration;

    fn arbiter(specs: Vec<SimDeviceSpec>) -> (Arbiter<SimulatedFleet>, SimulatedFleet) {
        let fleet = SimulatedFleet::new(specs);
        let config = ArbiterConfig::new(fleet.device_ids(), 32);
        (Arbiter::new(config, Arc::new(fleet.clone())), fleet)
    }

    #[tokio::test(start_paused = true)]
    async fn test_decreases_applied_before_increases() {
        let (arbiter, fleet) = arbiter(vec![
            // Needs nothing, drops to the minimum
            SimDeviceSpec::new("full").battery(80.0, 80.0, 60.0).current(20, 32),
            // Needs everything
            SimDeviceSpec::new("empty").battery(20.0, 80.0, 15.0).current(10, 32),
        ]);

        let outcome = arbiter.run().await;
        assert_eq!(outcome, RunOutcome::Completed { attempts: 1 });

        assert_eq!(
            fleet.commands(),
            vec![
                ("full".to_string(), Command::SetChargeCurrent(5)),
                ("empty".to_string(), Command::SetChargeCurrent(27)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_home_plugged_devices_are_commanded() {
        let (arbiter, fleet) = arbiter(vec![
            SimDeviceSpec::new("home").current(10, 16),
            SimDeviceSpec::new("away").away().current(10, 16),
            SimDeviceSpec::new("unplugged").unplugged().current(10, 16),
        ]);

        assert_eq!(arbiter.run().await, RunOutcome::Completed { attempts: 1 });
        assert_eq!(fleet.set_currents("home"), vec![16]);
        assert!(fleet.set_currents("away").is_empty());
        assert!(fleet.set_currents("unplugged").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_aggregates_messages() {
        let (arbiter, fleet) = arbiter(vec![SimDeviceSpec::new("car1")
            .named("Model 3")
            .current(10, 32)]);

        arbiter.run().await;

        let notifications = fleet.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Charge current allocation");
        let lines: Vec<&str> = notifications[0].body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Model 3: 50% -> 80%"));
        assert_eq!(lines[1], "Model 3: changing current 10 A -> 32 A");
        assert!(arbiter.context().messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_failure() {
        let (arbiter, fleet) = arbiter(vec![SimDeviceSpec::new("car1").current(10, 32)]);
        fleet.fail_snapshots(2);

        let started = tokio::time::Instant::now();
        let outcome = arbiter.run().await;

        assert_eq!(outcome, RunOutcome::Completed { attempts: 3 });
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(fleet.set_currents("car1"), vec![32]);

        let body = &fleet.notifications()[0].body;
        assert!(body.starts_with("Attempt 2 failed: Telemetry unavailable for car1"));
        assert!(!body.contains("Attempt 1 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_keeps_handler_lines() {
        let (arbiter, fleet) = arbiter(vec![SimDeviceSpec::new("car1").current(10, 32)]);
        arbiter
            .context()
            .messages
            .push("car2: changing current 16 A -> 5 A");
        fleet.fail_snapshots(1);

        assert_eq!(arbiter.run().await, RunOutcome::Completed { attempts: 2 });

        let body = &fleet.notifications()[0].body;
        let lines: Vec<&str> = body.lines().collect();
        assert!(lines[0].starts_with("Attempt 1 failed"));
        assert_eq!(lines[1], "car2: changing current 16 A -> 5 A");
        assert_eq!(lines.len(), 4);
        assert!(arbiter.context().messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_reported_current_does_not_overflow() {
        let (arbiter, fleet) = arbiter(vec![
            SimDeviceSpec::new("car1").current(10, 32),
            SimDeviceSpec::new("car2").current(10, 32),
        ]);
        fleet.report("car1", Attribute::ChargeCurrent, "-3e10");

        assert_eq!(arbiter.run().await, RunOutcome::Completed { attempts: 1 });
        // Smallest increase first
        assert_eq!(
            fleet.commands(),
            vec![
                ("car2".to_string(), Command::SetChargeCurrent(16)),
                ("car1".to_string(), Command::SetChargeCurrent(16)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_run_is_silent() {
        let (arbiter, fleet) = arbiter(vec![SimDeviceSpec::new("car1")]);
        fleet.fail_snapshots(100);

        let outcome = arbiter.run().await;
        assert_eq!(outcome, RunOutcome::Exhausted { attempts: 5 });
        assert!(fleet.notifications().is_empty());
        assert!(fleet.commands().is_empty());
        assert!(arbiter.context().messages.is_empty());

        // The lock was released
        fleet.fail_snapshots(0);
        assert_eq!(arbiter.run().await, RunOutcome::Completed { attempts: 1 });
    }
}
