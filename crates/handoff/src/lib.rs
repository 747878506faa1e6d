//! Handoff custody chain.
//!
//! Records and confirms the transfer of waste containers from a facility to a
//! driver and from the driver to an incineration plant. Each transfer is a
//! [`Handoff`] that needs two independent confirmations, may be disputed and
//! resolved by a supervisor, and expires when left unconfirmed.
//!
//! # Layout
//!
//! - [`model`]: handoff document, parties, disputes, derived status
//! - [`machine`]: pure transition functions, one per legal edge
//! - [`store`]: persistence contract with in-memory and SQLite backends
//! - [`service`]: commands and queries with optimistic concurrency
//! - [`gateway`]: token-authenticated access for receivers without accounts
//! - [`chain`]: two-step chain view per collection session
//! - [`sweeper`]: periodic expiry task

pub mod chain;
pub mod directory;
pub mod gateway;
pub mod machine;
pub mod model;
pub mod notification;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod token;

pub use chain::ChainView;
pub use directory::{Directory, DriverAccount, StaticDirectory};
pub use gateway::{PublicGateway, PublicHandoffView};
pub use machine::{Actor, HandoffEvent, Transition};
pub use model::{
    Caller, ContainerLine, Dispute, DisputeReason, DisputeStage, Handoff, HandoffStatus,
    HandoffType, Party, Role,
};
pub use notification::{
    Channel, DeliveryStatus, NotificationLogEntry, Notifier, RecordingNotifier, TracingNotifier,
};
pub use service::{CreateHandoff, HandoffService, Outcome, ReceiverSpec};
pub use store::{HandoffFilter, HandoffStore, InMemoryHandoffStore};
#[cfg(feature = "sqlite")]
pub use store::SqliteHandoffStore;
pub use sweeper::ExpirySweeper;
pub use token::ConfirmationToken;
