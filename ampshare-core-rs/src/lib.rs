//! # AmpShare Core
//!
//! Arbitrates one shared charging circuit across several vehicles.
//!
//! ## Architecture
//!
//! ```text
//! telemetry changes ──► events (debounce) ──► coordinator (single-flight)
//!                                                  │
//!                         ┌────────────────────────┼──────────────────────┐
//!                         ▼                        ▼                      ▼
//!                       wake               allocation              command
//!                  (bounded waits)   (proportional split)    (set + verify)
//!                         │                                               │
//!                         └──────────── Telemetry / CommandSink ──────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ampshare_core::{Arbiter, ArbiterConfig, SimDeviceSpec, SimulatedFleet, Trigger};
//!
//! #[tokio::main]
//! async fn main() {
//!     let fleet = SimulatedFleet::new(vec![
//!         SimDeviceSpec::new("car1"),
//!         SimDeviceSpec::new("car2").battery(20.0, 90.0, 15.0),
//!     ]);
//!     let config = ArbiterConfig::new(fleet.device_ids(), 32);
//!     let arbiter = Arbiter::new(config, Arc::new(fleet));
//!
//!     arbiter.handle(Trigger::Recompute).await;
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod device;
pub mod context;
pub mod allocation;
pub mod backend;
pub mod report;
pub mod wake;
pub mod command;
pub mod coordinator;
pub mod events;
pub mod sim;

pub use types::*;
pub use error::{ArbiterError, Result};
pub use config::{ArbiterConfig, ConfigError};
pub use device::Device;
pub use context::{MessageLog, RunContext};
pub use allocation::{allocate, Allocation};
pub use backend::{Backend, CommandSink, Notifier, Telemetry};
pub use command::{CommandExecutor, CommandOutcome};
pub use coordinator::{Arbiter, RunOutcome, SuppressReason};
pub use events::Trigger;
pub use sim::{SimDeviceSpec, SimulatedFleet};
