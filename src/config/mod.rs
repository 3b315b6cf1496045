//! Configuration constants shared across the crate.
//!
//! Interdependent values live together in `constants` so a change to one is
//! checked against the others at compile time.

mod constants;

pub use constants::*;
