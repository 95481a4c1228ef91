// Core modules
pub mod alerts;
pub mod api;
pub mod breakout;
pub mod cache;
pub mod config;
pub mod error;
pub mod indicators;
pub mod models;
pub mod monitor;
pub mod oversold;
pub mod scheduler;

// Re-export commonly used types
pub use api::*;
pub use models::*;
pub use config::Settings;
