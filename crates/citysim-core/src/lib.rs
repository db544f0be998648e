//! CitySim Core - Domain models, progress aggregation, and configuration
//!
//! This crate contains the domain types shared by the geometry, storage and
//! execution crates of the CitySim system.

pub mod config;
pub mod error;
pub mod models;
pub mod progress;

pub use error::{CitysimError, Result};
