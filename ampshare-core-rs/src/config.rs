//! Configuration for the arbiter
//!
//! Groups the shared budget with the timing and retry settings of each stage.

use std::time::Duration;

use thiserror::Error;

use crate::types::DeviceId;

/// Complete arbiter configuration
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// Managed vehicles
    pub devices: Vec<DeviceId>,

    /// Total shared current in amps
    pub budget_amps: i32,

    /// Lowest current a vehicle accepts while plugged in at home
    pub min_current_amps: i32,

    /// Title of the per-run notification
    pub notification_title: String,

    pub wake: WakeConfig,
    pub command: CommandConfig,
    pub events: EventConfig,
    pub run: RunConfig,
}

/// Wake coordinator settings
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Outer attempts over all sleeping vehicles
    pub attempts: u32,

    /// Per-vehicle wait for connectivity to report online
    pub timeout: Duration,
}

/// Command-and-verify settings
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Maximum set attempts per vehicle
    pub attempts: u32,

    /// Acks at or below this duration are treated as cached
    pub trust_threshold: Duration,

    /// Wait for a fresh report between attempts
    pub report_timeout: Duration,
}

/// Plug/unplug debounce settings
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Added to the trigger timestamp before telemetry is trusted again
    pub settle_delay: Duration,

    /// Wait for the charging status to leave or reach `disconnected`
    pub transition_timeout: Duration,

    /// Wait for the post-settle current report
    pub report_timeout: Duration,
}

/// Run retry settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub attempts: u32,

    /// Fixed delay between failed attempts
    pub retry_delay: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No devices configured")]
    NoDevices,

    #[error("Duplicate device: {0}")]
    DuplicateDevice(DeviceId),

    #[error("Budget must be positive, got {0} A")]
    InvalidBudget(i32),

    #[error("Minimum current must be non-negative, got {0} A")]
    InvalidMinimum(i32),

    #[error("{0} attempts must be at least 1")]
    NoAttempts(&'static str),
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            budget_amps: 32,
            min_current_amps: 5,
            notification_title: "Charge current allocation".to_string(),
            wake: WakeConfig::default(),
            command: CommandConfig::default(),
            events: EventConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            attempts: 9,
            trust_threshold: Duration::from_millis(400),
            report_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(15),
            transition_timeout: Duration::from_secs(60),
            report_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            retry_delay: Duration::from_secs(15),
        }
    }
}

impl ArbiterConfig {
    /// Create config for a set of devices sharing `budget_amps`
    pub fn new<I, S>(devices: I, budget_amps: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DeviceId>,
    {
        Self {
            devices: devices.into_iter().map(Into::into).collect(),
            budget_amps,
            ..Default::default()
        }
    }

    /// Add a managed device
    pub fn with_device(mut self, device: impl Into<DeviceId>) -> Self {
        self.devices.push(device.into());
        self
    }

    /// Set the shared budget
    pub fn with_budget(mut self, amps: i32) -> Self {
        self.budget_amps = amps;
        self
    }

    /// Set the per-vehicle minimum
    pub fn with_min_current(mut self, amps: i32) -> Self {
        self.min_current_amps = amps;
        self
    }

    /// Set the notification title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.notification_title = title.into();
        self
    }

    /// Set run retry policy
    pub fn with_run_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.run = RunConfig {
            attempts,
            retry_delay,
        };
        self
    }

    /// Check the configuration before starting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        for (i, device) in self.devices.iter().enumerate() {
            if self.devices[..i].contains(device) {
                return Err(ConfigError::DuplicateDevice(device.clone()));
            }
        }
        if self.budget_amps <= 0 {
            return Err(ConfigError::InvalidBudget(self.budget_amps));
        }
        if self.min_current_amps < 0 {
            return Err(ConfigError::InvalidMinimum(self.min_current_amps));
        }
        if self.wake.attempts == 0 {
            return Err(ConfigError::NoAttempts("Wake"));
        }
        if self.command.attempts == 0 {
            return Err(ConfigError::NoAttempts("Command"));
        }
        if self.run.attempts == 0 {
            return Err(ConfigError::NoAttempts("Run"));
        }
        Ok(())
    }
}
