//! Shared reply types and the error-context helper used across courier crates.

pub mod error;
pub mod time;
pub mod types;

pub use {error::FromMessage, time::unix_now};
