//! Synthetic event publisher: pushes a random integer and a random two-field
//! JSON record to two broker topics at a fixed cadence until interrupted.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod payload;
pub mod publisher;
pub mod rate;
pub mod transport;
