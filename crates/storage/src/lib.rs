//! waypoint-storage: the storage contract for Waypoint persisters.
//!
//! Defines the [`Persister`] trait every backend implements, the error
//! taxonomy ([`ConfigurationError`], [`PersistenceError`]), the
//! [`TransactionListener`] that closes transaction windows in reaction to
//! lifecycle events, an in-memory reference backend, and a conformance
//! suite backends run to verify the contract.

pub mod conformance;
pub mod error;
pub mod listener;
pub mod memory;
pub mod persister;

pub use error::{ConfigurationError, PersistenceError};
pub use listener::{PersisterRegistry, TransactionListener};
pub use memory::MemoryPersister;
pub use persister::{InstanceState, Persister};
