//! Shared utilities.
//!
//! Content hashing for artifacts and test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;
