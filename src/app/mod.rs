//! Configuration and the cooperative event loop built on top of it.

pub mod config;
pub mod core;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use config::{AppConfig, InputLatency};
pub use core::App;
