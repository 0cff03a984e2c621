//! Serial transport abstraction.
//!
//! Defines the `SerialTransport` trait for the duplex byte stream to the
//! syscon, allowing different implementations (device node, mock, etc.).
//! Line configuration (baud rate, framing) is done before a transport is
//! handed to this crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {path}: {message}")]
    OpenFailed { path: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this only means "nothing arrived yet".
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Abstract duplex byte stream.
///
/// `read` returns whatever bytes are available, up to `max_len`, and reports
/// `Timeout` when nothing arrived. Any other error is fatal for the session.
pub trait SerialTransport: Send + Sync {
    /// Write raw bytes to the device.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read raw bytes from the device.
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Path or name of the underlying device, for logs.
    fn device_path(&self) -> &str;
}
