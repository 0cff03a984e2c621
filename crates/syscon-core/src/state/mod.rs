//! State machine module.

pub mod machine;
pub mod policy;

pub use machine::{Action, UpdateSequencer, UpdateState};
pub use policy::AdvancePolicy;
