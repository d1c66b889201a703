//! Errors raised by AmpShare collaborators

use thiserror::Error;

use crate::types::{Command, DeviceId};

/// Errors in talking to devices and sinks
///
/// Timeouts are not errors; see [`crate::types::WaitOutcome`].
#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Telemetry unavailable for {device}: {reason}")]
    Telemetry { device: DeviceId, reason: String },

    #[error("Command {command} rejected by {device}: {reason}")]
    CommandRejected {
        device: DeviceId,
        command: Command,
        reason: String,
    },

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Telemetry stream closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, ArbiterError>;
