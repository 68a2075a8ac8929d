//! Configuration module
//!
//! Default tuning constants and the immutable motor parameter record that
//! every component receives at construction.

pub mod motor;
pub mod params;

// Re-export the main constants from params.rs
pub use params::*;

pub use motor::MotorParameters;
