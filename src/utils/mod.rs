//! Shared helpers

pub mod command;
pub mod throttle;

pub use command::run_command;
pub use throttle::LogThrottler;
