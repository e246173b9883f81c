//! Mail bodies and machine-readable run output.

pub mod generator;

pub use generator::*;
