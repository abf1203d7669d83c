//! Medical copilot: multi-agent symptom analysis behind a supervisor bus.
//!
//! A case enters through a comms channel, is normalised by intake, and runs
//! through the fixed workflow in [`subsystems::workflow`]. Cases that need a
//! clinician are parked in the review queue and resumed on approval.

pub mod config;
pub mod error;
pub mod external;
pub mod llm;
pub mod logger;
pub mod prompts;
pub mod store;
pub mod subsystems;
pub mod supervisor;
pub mod types;
