//! Transport layer module.

pub mod device;
pub mod mock;
pub mod traits;

pub use device::DevicePathTransport;
pub use mock::MockTransport;
pub use traits::{SerialTransport, TransportError};
