//! Device-node transport.
//!
//! Opens an already configured serial device (e.g. `/dev/ttyHS0`) as a plain
//! read/write file. Baud rate and line discipline are the caller's business;
//! a read that returns no bytes is reported as a timeout, which is what a tty
//! with `VTIME` set produces when the line is idle.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex;

use tracing::{debug, info, instrument};

use super::traits::{SerialTransport, TransportError};

pub struct DevicePathTransport {
    path: String,
    reader: Mutex<File>,
    writer: Mutex<File>,
}

impl DevicePathTransport {
    /// Open a device node for reading and writing.
    #[instrument(level = "info")]
    pub fn open(path: &str) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TransportError::OpenFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        let writer = file.try_clone().map_err(|e| TransportError::OpenFailed {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        info!(path = %path, "Device opened successfully");

        Ok(Self {
            path: path.to_string(),
            reader: Mutex::new(file),
            writer: Mutex::new(writer),
        })
    }
}

impl SerialTransport for DevicePathTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| TransportError::WriteFailed("writer lock poisoned".into()))?;
        writer.write_all(data)?;
        writer.flush()?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self))]
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| TransportError::ReadFailed("reader lock poisoned".into()))?;
        let mut buf = vec![0u8; max_len];

        let n = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };

        if n == 0 {
            return Err(TransportError::Timeout { timeout_ms: 0 });
        }

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        // A vanished node shows up as a read/write error instead.
        true
    }

    fn device_path(&self) -> &str {
        &self.path
    }
}
