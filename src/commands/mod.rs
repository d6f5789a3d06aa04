//! Command handlers
//!
//! Runtime control of a running tracker.

pub mod control;

pub use control::ControlCommand;
