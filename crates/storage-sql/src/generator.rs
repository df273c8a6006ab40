//! Identifier allocation strategies and the driver registry.
//!
//! Every generator implements the same two-phase protocol so the persister
//! never needs to know which phase a backend uses: `pre_fetch` may produce
//! an identifier to include in the INSERT; when it declines, the persister
//! inserts without an id column and asks `post_fetch` for the identifier
//! the backend assigned. A row must end up with exactly one identifier —
//! if both phases decline, the persister fails the operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::any::AnyQueryResult;
use sqlx::{AnyConnection, Row};

use waypoint_core::RecordId;
use waypoint_storage::PersistenceError;

use crate::config::SqlPersisterConfig;

/// Two-phase primary-key allocation.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    /// Called before the row is inserted. `Some` means the persister must
    /// include the identifier in the INSERT; `None` selects the post-insert
    /// path.
    async fn pre_fetch(
        &self,
        conn: &mut AnyConnection,
    ) -> Result<Option<RecordId>, PersistenceError>;

    /// Called after the row is inserted, only if `pre_fetch` declined.
    /// Returns the identifier the backend assigned.
    async fn post_fetch(
        &self,
        conn: &mut AnyConnection,
        inserted: &AnyQueryResult,
    ) -> Result<Option<RecordId>, PersistenceError>;
}

// ── Sequence-backed allocation ───────────────────────────────────────

/// Pre-insert allocation from an explicit sequence object.
pub struct SequenceGenerator {
    next_value_sql: String,
}

impl SequenceGenerator {
    /// Allocate from `sequence` with the standard `SELECT NEXTVAL('…')`
    /// spelling.
    pub fn new(sequence: &str) -> Self {
        SequenceGenerator {
            next_value_sql: format!("SELECT NEXTVAL('{}')", sequence),
        }
    }

    /// Allocate with a custom next-value query, for dialects that spell it
    /// differently.
    pub fn with_query(next_value_sql: impl Into<String>) -> Self {
        SequenceGenerator {
            next_value_sql: next_value_sql.into(),
        }
    }
}

#[async_trait]
impl IdGenerator for SequenceGenerator {
    async fn pre_fetch(
        &self,
        conn: &mut AnyConnection,
    ) -> Result<Option<RecordId>, PersistenceError> {
        let row = sqlx::query(&self.next_value_sql)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| PersistenceError::storage("sequence pre-fetch", e))?;
        let value: i64 = row
            .try_get(0)
            .map_err(|e| PersistenceError::storage("sequence pre-fetch", e))?;
        Ok(Some(RecordId::Int(value)))
    }

    async fn post_fetch(
        &self,
        _conn: &mut AnyConnection,
        _inserted: &AnyQueryResult,
    ) -> Result<Option<RecordId>, PersistenceError> {
        Ok(None)
    }
}

// ── Auto-increment allocation ────────────────────────────────────────

/// Where an auto-increment backend exposes the last generated identifier.
#[derive(Debug, Clone)]
pub enum IdProbe {
    /// The insert result itself carries it (sqlite's rowid, mysql's
    /// last-insert id).
    InsertResult,
    /// A follow-up scalar query on the same connection returns it.
    ConnectionQuery(String),
}

/// Post-insert allocation from a backend-assigned auto-increment column.
pub struct AutoIncrementGenerator {
    probe: IdProbe,
}

impl AutoIncrementGenerator {
    pub fn new(probe: IdProbe) -> Self {
        AutoIncrementGenerator { probe }
    }
}

#[async_trait]
impl IdGenerator for AutoIncrementGenerator {
    async fn pre_fetch(
        &self,
        _conn: &mut AnyConnection,
    ) -> Result<Option<RecordId>, PersistenceError> {
        Ok(None)
    }

    async fn post_fetch(
        &self,
        conn: &mut AnyConnection,
        inserted: &AnyQueryResult,
    ) -> Result<Option<RecordId>, PersistenceError> {
        match &self.probe {
            IdProbe::InsertResult => Ok(inserted.last_insert_id().map(RecordId::Int)),
            IdProbe::ConnectionQuery(sql) => {
                let row = sqlx::query(sql)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| PersistenceError::storage("auto-increment post-fetch", e))?;
                let value: i64 = row
                    .try_get(0)
                    .map_err(|e| PersistenceError::storage("auto-increment post-fetch", e))?;
                Ok(Some(RecordId::Int(value)))
            }
        }
    }
}

// ── Random allocation ────────────────────────────────────────────────

/// Pre-insert allocation of a fixed-length pseudo-random alphanumeric
/// token. The fallback for drivers with no registered strategy.
///
/// No uniqueness check is performed against existing rows; at the default
/// length of 8 the collision probability is accepted as negligible. This
/// is a known limitation, not a guaranteed invariant.
pub struct RandomIdGenerator {
    length: usize,
}

impl RandomIdGenerator {
    pub fn new(length: usize) -> Self {
        RandomIdGenerator { length }
    }

    fn token(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

#[async_trait]
impl IdGenerator for RandomIdGenerator {
    async fn pre_fetch(
        &self,
        _conn: &mut AnyConnection,
    ) -> Result<Option<RecordId>, PersistenceError> {
        Ok(Some(RecordId::Text(self.token())))
    }

    async fn post_fetch(
        &self,
        _conn: &mut AnyConnection,
        _inserted: &AnyQueryResult,
    ) -> Result<Option<RecordId>, PersistenceError> {
        Ok(None)
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// One generator per table: instance and history rows are numbered
/// independently (separate sequences on sequence backends).
#[derive(Clone)]
pub struct GeneratorPair {
    pub instance: Arc<dyn IdGenerator>,
    pub history: Arc<dyn IdGenerator>,
}

/// Builds the generator pair for one driver from the persister config.
pub type GeneratorFactory = fn(&SqlPersisterConfig) -> GeneratorPair;

/// Maps a driver key (DSN scheme) to its generator factory. New backends
/// register an entry; drivers with no entry fall back to the random pair,
/// so every backend gets a working generator without configuration.
pub struct GeneratorRegistry {
    entries: BTreeMap<String, GeneratorFactory>,
}

impl GeneratorRegistry {
    /// A registry with no entries: every driver falls back to random.
    pub fn empty() -> Self {
        GeneratorRegistry {
            entries: BTreeMap::new(),
        }
    }

    /// The built-in dialect table: postgres → sequences, mysql and sqlite
    /// → auto-increment via the insert result.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("postgres", sequence_pair);
        registry.register("mysql", auto_increment_pair);
        registry.register("sqlite", auto_increment_pair);
        registry
    }

    pub fn register(&mut self, driver_key: impl Into<String>, factory: GeneratorFactory) {
        self.entries.insert(driver_key.into(), factory);
    }

    /// Resolve the generator pair for a driver, falling back to the random
    /// pair for unregistered keys.
    pub fn assign(&self, driver_key: &str, config: &SqlPersisterConfig) -> GeneratorPair {
        match self.entries.get(driver_key) {
            Some(factory) => factory(config),
            None => random_pair(config),
        }
    }

    /// Driver keys with a registered factory.
    pub fn registered_drivers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn sequence_pair(config: &SqlPersisterConfig) -> GeneratorPair {
    GeneratorPair {
        instance: Arc::new(SequenceGenerator::new(&config.workflow_sequence)),
        history: Arc::new(SequenceGenerator::new(&config.history_sequence)),
    }
}

fn auto_increment_pair(_config: &SqlPersisterConfig) -> GeneratorPair {
    GeneratorPair {
        instance: Arc::new(AutoIncrementGenerator::new(IdProbe::InsertResult)),
        history: Arc::new(AutoIncrementGenerator::new(IdProbe::InsertResult)),
    }
}

fn random_pair(config: &SqlPersisterConfig) -> GeneratorPair {
    GeneratorPair {
        instance: Arc::new(RandomIdGenerator::new(config.id_length)),
        history: Arc::new(RandomIdGenerator::new(config.id_length)),
    }
}
