//! Syscon-Core: firmware update over the syscon serial link.
//!
//! This crate implements the framing protocol spoken by the body "system
//! controller" board and the device firmware update (DFU) workflow that runs
//! on top of it.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, CRC32, frame encoder and resynchronizing decoder
//! - **Transport**: Byte-stream abstraction (device node, mock)
//! - **Device**: Per-connection session binding codec and transport
//! - **State**: Update sequencer and advance policy
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use syscon_core::session::{DfuSession, SessionConfig};
//!
//! let config = SessionConfig {
//!     device_path: Some("/dev/ttyHS0".to_string()),
//!     image_path: Some("syscon.dfu".to_string()),
//!     ..Default::default()
//! };
//!
//! let session = DfuSession::new(config);
//! let report = session.run().expect("DFU failed");
//! assert!(report.is_complete());
//! ```

pub mod device;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use device::{DeviceSession, classify_ack};
pub use events::{DfuEvent, DfuObserver, DfuPhase, LogLevel, NullObserver, TracingObserver};
pub use payload::{DfuChunk, FirmwareError, FirmwareImage};
pub use protocol::{AckStatus, Command, Frame, FrameDecoder, SyncMarker, crc32, encode};
pub use session::{DfuSession, PolicyConfig, PolicyMode, SessionConfig, UpdateOutcome, UpdateReport};
pub use state::{Action, AdvancePolicy, UpdateSequencer, UpdateState};
pub use transport::{DevicePathTransport, MockTransport, SerialTransport, TransportError};
