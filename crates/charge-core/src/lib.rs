//! charge-core - Shared types for the charging-station gateway
//!
//! This crate holds the vocabulary every other crate speaks: the station
//! identifier and the events carried over the in-process buses.

pub mod models;
pub mod station;

pub use models::*;
pub use station::StationId;
