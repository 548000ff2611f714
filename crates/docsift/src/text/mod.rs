//! Text quality checks.

pub mod garbled;

pub use garbled::{GarbledPattern, GarbledTextDetector, GarbledVerdict};
