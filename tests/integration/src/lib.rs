//! Integration tests for the handoff custody chain
//!
//! This test suite validates:
//! - End-to-end custody scenarios across service, gateway and chain view
//! - Concurrent confirmations racing on one handoff from many threads
//! - Behavioral parity between the in-memory and SQLite stores
//! - HTTP round trips through the custody node router

pub mod test_utils;

#[cfg(test)]
mod custody_scenarios;

#[cfg(test)]
mod concurrency_race_tests;

#[cfg(test)]
mod store_parity_tests;

#[cfg(test)]
mod http_round_trip_tests;
