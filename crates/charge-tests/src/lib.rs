//! End-to-end tests for the charging-station gateway
//!
//! The tests run the whole stack in one process:
//! - a simulated station from `example-station` on an ephemeral port
//! - the gateway with real TCP or UDP station links
//! - a channel-backed message bridge standing in for the broker
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p charge-tests
//! ```
//!
//! # Test Structure
//!
//! - `e2e_test.rs` - commands, status publication, connectivity and reconnects

// This crate only contains tests, no library code
