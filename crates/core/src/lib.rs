//! Core functionality for the custody chain.
//!
//! This crate provides the error taxonomy, configuration, logging, clock and
//! audit-trail primitives shared by the handoff engine and its services.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use audit::{AuditEntry, GENESIS_HASH};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ContainerEntry, CustodyConfig, DirectoryConfig, DriverEntry, ExpiryConfig,
    NotificationConfig, ServiceConfig,
};
pub use error::{CustodyError, ErrorKind, Result};
