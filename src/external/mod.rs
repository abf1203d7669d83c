//! Non-LLM external collaborators: speech-to-text and fact-checking.
//!
//! Both are narrow, enum-dispatched clients constructed once at startup and
//! cloned into each case run.

pub mod factcheck;
pub mod speech;
