//! Event system for UI decoupling.
//!
//! Allows a CLI or any other front end to follow an update without tight
//! coupling to the core logic.

use std::fmt;

use crate::protocol::{AckStatus, describe_type};

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Coarse update phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuPhase {
    /// Nothing sent yet.
    Idle,
    /// Asking the syscon for its version.
    QueryVersion,
    /// Erasing application flash.
    Erase,
    /// Streaming the image body.
    Write,
    /// Asking the syscon to validate the image.
    Validate,
    /// Switching the syscon into the new application.
    Start,
    /// All steps issued and answered.
    Complete,
    /// Stopped early (hardened policy only).
    Aborted,
}

impl fmt::Display for DfuPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfuPhase::Idle => write!(f, "Idle"),
            DfuPhase::QueryVersion => write!(f, "Query Version"),
            DfuPhase::Erase => write!(f, "Erase"),
            DfuPhase::Write => write!(f, "Write"),
            DfuPhase::Validate => write!(f, "Validate"),
            DfuPhase::Start => write!(f, "Start"),
            DfuPhase::Complete => write!(f, "Complete"),
            DfuPhase::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Events emitted while talking to the syscon.
#[derive(Debug, Clone)]
pub enum DfuEvent {
    /// Transport opened.
    DeviceOpened { path: String },
    /// Phase changed.
    PhaseChanged { from: DfuPhase, to: DfuPhase },
    /// Image bytes handed to the transport so far.
    Progress {
        phase: DfuPhase,
        operation: String,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// ACK frame classified by the session.
    AckReceived { status: AckStatus },
    /// ACK frame too short to carry a status.
    MalformedAck { length: usize },
    /// Receive stream dropped bytes to find the next frame.
    StreamResync {
        bytes_discarded: u64,
        crc_failures: u64,
    },
    /// Command re-sent after a response timeout.
    Retry { frame_type: u16, attempt: u32 },
    /// Frame sent/received.
    Packet {
        direction: PacketDirection,
        frame_type: u16,
        length: usize,
    },
    /// Update stopped early.
    Aborted { reason: String },
    /// Fatal error.
    Error { message: String },
    /// All operations completed.
    Complete,
}

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving update events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DfuObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DfuEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DfuObserver for NullObserver {
    fn on_event(&self, _event: &DfuEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::DeviceOpened { path } => {
                tracing::info!(path = %path, "Device opened");
            }
            DfuEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            DfuEvent::Progress {
                phase,
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    100
                };
                tracing::debug!(phase = %phase, operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            DfuEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            DfuEvent::AckReceived { status } => {
                if status.is_nack() {
                    tracing::warn!(value = status.value(), "NACK received");
                } else {
                    tracing::debug!(value = status.value(), "ACK received");
                }
            }
            DfuEvent::MalformedAck { length } => {
                tracing::warn!(length, "ACK frame too short for a status");
            }
            DfuEvent::StreamResync {
                bytes_discarded,
                crc_failures,
            } => {
                tracing::warn!(bytes_discarded, crc_failures, "Receive stream resynchronized");
            }
            DfuEvent::Retry { frame_type, attempt } => {
                tracing::warn!(command = %describe_type(*frame_type), attempt, "Retrying command");
            }
            DfuEvent::Packet {
                direction,
                frame_type,
                length,
            } => {
                tracing::trace!(
                    dir = %direction,
                    type_ = %describe_type(*frame_type),
                    len = length,
                    "Frame"
                );
            }
            DfuEvent::Aborted { reason } => {
                tracing::error!(reason = %reason, "Update aborted");
            }
            DfuEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            DfuEvent::Complete => {
                tracing::info!("Update complete");
            }
        }
    }
}
