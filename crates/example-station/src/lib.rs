//! example-station - simulated charging-station controller
//!
//! Speaks the station side of the wire format so the gateway can be run and
//! tested without hardware.
//!
//! # Modules
//!
//! - [`station`] - charging state and frame handling
//! - [`server`] - TCP and UDP listeners around a [`StationState`]

pub mod server;
pub mod station;

pub use server::{Protocol, StationServer};
pub use station::{Action, StationState};
