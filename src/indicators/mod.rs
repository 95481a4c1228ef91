// Technical indicators module
// Pure functions over price slices, no I/O

pub mod rsi;

pub use rsi::{rsi_moving_average, rsi_series};
