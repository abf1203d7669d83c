//! Subsystems of the medical copilot: channels, the case handler and the
//! workflow stages it drives.

pub mod cases;
pub mod comms;
pub mod intake;
pub mod knowledge;
pub mod runtime;
pub mod safety;
pub mod validation;
pub mod workflow;
