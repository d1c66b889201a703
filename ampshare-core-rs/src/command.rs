//! Set a vehicle's requested current and verify it stuck
//!
//! Vehicles sometimes answer a command from cache almost instantly without
//! applying it. A slow ack is a real round trip and is trusted; a fast one
//! is followed by a wait for a genuinely new report and another attempt.

use tracing::{info, warn};

use crate::backend::Backend;
use crate::config::CommandConfig;
use crate::context::MessageLog;
use crate::device::Device;
use crate::error::Result;
use crate::report::await_report_after;
use crate::types::{Attribute, Command};

/// How a set-current request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Already at the target, nothing sent
    Unchanged,
    /// A trusted ack arrived on this attempt
    Verified { attempts: u32 },
    /// Every attempt was acked too fast; the last value stays in effect
    Unverified { attempts: u32 },
}

pub struct CommandExecutor<'a, B: Backend> {
    backend: &'a B,
    config: &'a CommandConfig,
    log: &'a MessageLog,
}

impl<'a, B: Backend> CommandExecutor<'a, B> {
    pub fn new(backend: &'a B, config: &'a CommandConfig, log: &'a MessageLog) -> Self {
        Self {
            backend,
            config,
            log,
        }
    }

    /// Request `target` amps from `device`
    pub async fn set_request_current(&self, device: &mut Device, target: i32) -> Result<CommandOutcome> {
        if target == device.request_current {
            info!("{}: current already {} A", device.name, target);
            return Ok(CommandOutcome::Unchanged);
        }

        let message = format!(
            "{}: changing current {} A -> {} A",
            device.name, device.request_current, target
        );
        info!("{}", message);
        self.log.push(message);

        // Only reports made after the last one we know of count as fresh
        let mut anchor = device.current_reported_at;

        for attempt in 1..=self.config.attempts {
            let ack = self
                .backend
                .execute(&device.id, Command::SetChargeCurrent(target))
                .await?;
            device.request_current = target;

            if ack.duration > self.config.trust_threshold {
                info!(
                    "{}: set to {} A, acked in {:?} (attempt {})",
                    device.name, target, ack.duration, attempt
                );
                return Ok(CommandOutcome::Verified { attempts: attempt });
            }

            warn!(
                "{}: ack in {:?} is suspiciously fast, awaiting a new report (attempt {})",
                device.name, ack.duration, attempt
            );
            if attempt < self.config.attempts {
                let seen = await_report_after(
                    self.backend,
                    &device.id,
                    Attribute::ChargeCurrent,
                    anchor,
                    self.config.report_timeout,
                )
                .await?;
                if seen.is_some() {
                    anchor = seen;
                    device.current_reported_at = seen;
                }
            }
        }

        warn!(
            "{}: {} A not verified after {} attempts",
            device.name, target, self.config.attempts
        );
        Ok(CommandOutcome::Unverified {
            attempts: self.config.attempts,
        })
    }
}
