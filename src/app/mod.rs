//! Usage: Application layer (logging setup, lifecycle hooks).

pub mod lifecycle;
pub mod logging;
