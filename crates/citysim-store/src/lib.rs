//! CitySim Store - Storage ports and adapters
//!
//! This crate defines the run and geometry storage ports, provides in-memory
//! and PostgreSQL adapters for them, and hosts the process-wide artifact cache.

pub mod cache;
pub mod memory;
pub mod ports;
pub mod postgres;
