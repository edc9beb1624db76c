// Zone tools - Shared Library
// Logging, configuration and binary buffer helpers used by every tool

pub mod config;
pub mod log;
pub mod util;
