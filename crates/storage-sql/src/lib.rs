//! waypoint-storage-sql: the relational persister.
//!
//! Implements the `waypoint-storage` [`Persister`](waypoint_storage::Persister)
//! contract against any backend sqlx's `Any` driver can reach (sqlite,
//! postgres, mysql — plus unknown schemes, which still work through the
//! random-identifier fallback). The DSN scheme selects which identifier
//! generation strategy a new row gets; everything else is dialect-neutral
//! SQL built once from the configured table and column names.
//!
//! # Identifier generation
//!
//! Every generator implements the same two-phase protocol
//! ([`IdGenerator`]): produce an id before the INSERT, or decline and
//! recover the backend-assigned id afterwards. The built-in
//! [`GeneratorRegistry`] maps postgres to sequences, mysql and sqlite to
//! auto-increment, and everything else to random text tokens; new dialects
//! register a factory instead of growing a conditional chain.

pub mod config;
pub mod generator;
pub mod persister;

mod statements;

pub use config::{
    Driver, HistoryColumns, InstanceColumns, SqlPersisterConfig, DEFAULT_DATE_FORMAT,
    DEFAULT_ID_LENGTH,
};
pub use generator::{
    AutoIncrementGenerator, GeneratorFactory, GeneratorPair, GeneratorRegistry, IdGenerator,
    IdProbe, RandomIdGenerator, SequenceGenerator,
};
pub use persister::{ConnectError, SqlPersister};
