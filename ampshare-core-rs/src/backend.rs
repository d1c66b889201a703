//! Collaborator interfaces
//!
//! The arbiter never talks to vehicles directly. Telemetry, commands and
//! notifications go through these traits so transports can be swapped.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{Command, CommandAck, DeviceId, Snapshot, StateChange};

/// Source of vehicle state
#[async_trait]
pub trait Telemetry: Send + Sync {
    /// Read every stream of one device
    async fn snapshot(&self, device: &DeviceId) -> Result<Snapshot>;

    /// Subscribe to all future state transitions
    fn subscribe(&self) -> broadcast::Receiver<StateChange>;
}

/// Sink for vehicle commands
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn execute(&self, device: &DeviceId, command: Command) -> Result<CommandAck>;
}

/// Sink for titled, multi-line notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<()>;
}

/// Everything the arbiter needs from the outside world
pub trait Backend: Telemetry + CommandSink + Notifier + 'static {}

impl<T> Backend for T where T: Telemetry + CommandSink + Notifier + 'static {}
