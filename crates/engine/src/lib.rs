pub mod analyzers;
pub mod config;
pub mod constants;
pub mod core;
pub mod data;
pub mod errors;
pub mod logging;
pub mod resilience;
pub mod types;
