//! Relational persister over a single exclusively-owned connection.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::any::{install_default_drivers, AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, Connection, Row};
use tokio::sync::Mutex;

use waypoint_core::{HistoryEntry, RecordId, WorkflowInstance};
use waypoint_storage::{
    ConfigurationError, InstanceState, PersistenceError, Persister,
};

use crate::config::SqlPersisterConfig;
use crate::generator::{GeneratorPair, GeneratorRegistry};
use crate::statements::Statements;

/// Failure while constructing a [`SqlPersister`]: either the configuration
/// is unusable (fatal, fix the deployment) or the backend refused the
/// connection (a storage failure like any other).
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

struct ConnectionState {
    conn: AnyConnection,
    in_tx: bool,
}

/// [`Persister`] over one relational connection.
///
/// The connection is exclusively owned for the persister's lifetime and
/// every operation is serialized through it, so operations are strictly
/// ordered by call order. With autocommit off, the first write after the
/// previous commit/rollback opens a transaction window that only
/// [`commit`](Persister::commit) or [`rollback`](Persister::rollback)
/// closes — typically driven by the transaction listener reacting to a
/// lifecycle event, never by the persister itself.
pub struct SqlPersister {
    state: Mutex<ConnectionState>,
    statements: Statements,
    schema: Vec<String>,
    generators: GeneratorPair,
    date_format: String,
    autocommit: bool,
    workflow_table: String,
    history_table: String,
}

impl SqlPersister {
    /// Connect with the built-in generator registry.
    pub async fn connect(config: SqlPersisterConfig) -> Result<Self, ConnectError> {
        Self::connect_with(config, &GeneratorRegistry::with_defaults()).await
    }

    /// Connect, assigning identifier generators from `registry` by the
    /// DSN's driver key.
    pub async fn connect_with(
        config: SqlPersisterConfig,
        registry: &GeneratorRegistry,
    ) -> Result<Self, ConnectError> {
        config.validate()?;
        install_default_drivers();

        let dsn = config.effective_dsn();
        let conn = AnyConnection::connect(&dsn)
            .await
            .map_err(|e| PersistenceError::storage("connect", e))?;

        let driver = config.driver();
        let generators = registry.assign(driver.key(), &config);
        tracing::debug!(
            target: "waypoint::storage::sql",
            driver = driver.key(),
            autocommit = config.autocommit,
            workflow_table = %config.workflow_table,
            history_table = %config.history_table,
            "persister connected"
        );

        Ok(SqlPersister {
            statements: Statements::resolve(&config),
            schema: Statements::schema(&config),
            generators,
            date_format: config.date_format.clone(),
            autocommit: config.autocommit,
            workflow_table: config.workflow_table.clone(),
            history_table: config.history_table.clone(),
            state: Mutex::new(ConnectionState { conn, in_tx: false }),
        })
    }

    /// Create the configured tables (and sequences, where the driver uses
    /// them) if they do not exist. Bootstrap and test convenience; not
    /// called by any persister operation.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        for sql in &self.schema {
            sqlx::query(sql)
                .execute(&mut state.conn)
                .await
                .map_err(|e| PersistenceError::storage("ensure schema", e))?;
        }
        Ok(())
    }

    /// Tear down the owned connection.
    pub async fn close(self) -> Result<(), PersistenceError> {
        let state = self.state.into_inner();
        state
            .conn
            .close()
            .await
            .map_err(|e| PersistenceError::storage("close", e))
    }

    /// Open the transaction window if this write needs one.
    async fn begin_if_needed(&self, state: &mut ConnectionState) -> Result<(), PersistenceError> {
        if self.autocommit || state.in_tx {
            return Ok(());
        }
        sqlx::query("BEGIN")
            .execute(&mut state.conn)
            .await
            .map_err(|e| PersistenceError::storage("begin", e))?;
        state.in_tx = true;
        tracing::debug!(target: "waypoint::storage::sql", "transaction window opened");
        Ok(())
    }

    /// Render now-in-the-instance-zone at storage precision. The parsed
    /// value is what goes back into the instance, so the in-memory
    /// timestamp always equals what a later fetch returns.
    fn current_timestamp(
        &self,
        workflow: &WorkflowInstance,
    ) -> Result<(NaiveDateTime, String), PersistenceError> {
        let rendered = Utc::now()
            .with_timezone(&workflow.time_zone())
            .format(&self.date_format)
            .to_string();
        let parsed = self.parse_timestamp(&rendered)?;
        Ok((parsed, rendered))
    }

    fn parse_timestamp(&self, value: &str) -> Result<NaiveDateTime, PersistenceError> {
        NaiveDateTime::parse_from_str(value, &self.date_format).map_err(|_| {
            PersistenceError::Timestamp {
                value: value.to_string(),
                format: self.date_format.clone(),
            }
        })
    }

    fn render_timestamp(&self, at: NaiveDateTime) -> String {
        at.format(&self.date_format).to_string()
    }
}

fn bind_id<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    id: &RecordId,
) -> Query<'q, Any, AnyArguments<'q>> {
    match id {
        RecordId::Int(n) => query.bind(*n),
        RecordId::Text(s) => query.bind(s.clone()),
    }
}

/// Read an identifier column that is an integer on sequence/auto-increment
/// schemas and text on random-id schemas.
fn id_from_row(
    row: &AnyRow,
    index: usize,
    operation: &'static str,
) -> Result<RecordId, PersistenceError> {
    if let Ok(n) = row.try_get::<i64, _>(index) {
        return Ok(RecordId::Int(n));
    }
    row.try_get::<String, _>(index)
        .map(RecordId::Text)
        .map_err(|e| PersistenceError::storage(operation, e))
}

#[async_trait]
impl Persister for SqlPersister {
    async fn create_instance(
        &self,
        workflow: &mut WorkflowInstance,
    ) -> Result<RecordId, PersistenceError> {
        if let Some(existing) = workflow.id() {
            return Err(PersistenceError::AlreadyPersisted {
                id: existing.clone(),
            });
        }
        let (stamp, rendered) = self.current_timestamp(workflow)?;

        let mut state = self.state.lock().await;
        self.begin_if_needed(&mut state).await?;

        let id = match self.generators.instance.pre_fetch(&mut state.conn).await? {
            Some(id) => {
                bind_id(sqlx::query(&self.statements.insert_instance_with_id), &id)
                    .bind(workflow.workflow_type().to_string())
                    .bind(workflow.state().to_string())
                    .bind(rendered.clone())
                    .execute(&mut state.conn)
                    .await
                    .map_err(|e| PersistenceError::storage("create instance", e))?;
                id
            }
            None => {
                let inserted = sqlx::query(&self.statements.insert_instance)
                    .bind(workflow.workflow_type().to_string())
                    .bind(workflow.state().to_string())
                    .bind(rendered.clone())
                    .execute(&mut state.conn)
                    .await
                    .map_err(|e| PersistenceError::storage("create instance", e))?;
                self.generators
                    .instance
                    .post_fetch(&mut state.conn, &inserted)
                    .await?
                    .ok_or_else(|| PersistenceError::IdentifierUnavailable {
                        table: self.workflow_table.clone(),
                    })?
            }
        };
        drop(state);

        workflow.set_last_update(stamp);
        workflow
            .assign_id(id.clone())
            .map_err(|e| PersistenceError::AlreadyPersisted { id: e.existing })?;
        tracing::debug!(
            target: "waypoint::storage::sql",
            workflow_type = workflow.workflow_type(),
            id = %id,
            "instance created"
        );
        Ok(id)
    }

    async fn fetch_instance(
        &self,
        id: &RecordId,
    ) -> Result<Option<InstanceState>, PersistenceError> {
        let mut state = self.state.lock().await;
        let row = bind_id(sqlx::query(&self.statements.select_instance), id)
            .fetch_optional(&mut state.conn)
            .await
            .map_err(|e| PersistenceError::storage("fetch instance", e))?;
        drop(state);

        match row {
            None => Ok(None),
            Some(row) => {
                let current: String = row
                    .try_get(0)
                    .map_err(|e| PersistenceError::storage("fetch instance", e))?;
                let raw: String = row
                    .try_get(1)
                    .map_err(|e| PersistenceError::storage("fetch instance", e))?;
                Ok(Some(InstanceState {
                    state: current,
                    last_update: self.parse_timestamp(&raw)?,
                }))
            }
        }
    }

    async fn update_instance(
        &self,
        workflow: &mut WorkflowInstance,
    ) -> Result<(), PersistenceError> {
        let id = workflow
            .id()
            .cloned()
            .ok_or(PersistenceError::UnsavedInstance)?;
        let (stamp, rendered) = self.current_timestamp(workflow)?;

        let mut state = self.state.lock().await;
        self.begin_if_needed(&mut state).await?;
        bind_id(
            sqlx::query(&self.statements.update_instance)
                .bind(workflow.state().to_string())
                .bind(rendered),
            &id,
        )
        .execute(&mut state.conn)
        .await
        .map_err(|e| PersistenceError::storage("update instance", e))?;
        drop(state);

        workflow.set_last_update(stamp);
        Ok(())
    }

    async fn create_history(
        &self,
        workflow: &WorkflowInstance,
        entries: &mut [HistoryEntry],
    ) -> Result<(), PersistenceError> {
        if workflow.id().is_none() {
            return Err(PersistenceError::UnsavedInstance);
        }

        let mut state = self.state.lock().await;
        self.begin_if_needed(&mut state).await?;
        for entry in entries.iter_mut().filter(|entry| !entry.is_saved()) {
            let rendered = self.render_timestamp(entry.date());
            let id = match self.generators.history.pre_fetch(&mut state.conn).await? {
                Some(id) => {
                    bind_id(
                        bind_id(sqlx::query(&self.statements.insert_history_with_id), &id),
                        entry.workflow_id(),
                    )
                    .bind(entry.action().to_string())
                    .bind(entry.description().to_string())
                    .bind(entry.state().to_string())
                    .bind(entry.user().to_string())
                    .bind(rendered)
                    .execute(&mut state.conn)
                    .await
                    .map_err(|e| PersistenceError::storage("create history", e))?;
                    id
                }
                None => {
                    let inserted = bind_id(
                        sqlx::query(&self.statements.insert_history),
                        entry.workflow_id(),
                    )
                    .bind(entry.action().to_string())
                    .bind(entry.description().to_string())
                    .bind(entry.state().to_string())
                    .bind(entry.user().to_string())
                    .bind(rendered)
                    .execute(&mut state.conn)
                    .await
                    .map_err(|e| PersistenceError::storage("create history", e))?;
                    self.generators
                        .history
                        .post_fetch(&mut state.conn, &inserted)
                        .await?
                        .ok_or_else(|| PersistenceError::IdentifierUnavailable {
                            table: self.history_table.clone(),
                        })?
                }
            };
            entry.mark_saved(id);
        }
        Ok(())
    }

    async fn fetch_history(
        &self,
        workflow: &WorkflowInstance,
    ) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let id = workflow.id().ok_or(PersistenceError::UnsavedInstance)?;

        let mut state = self.state.lock().await;
        let rows = bind_id(sqlx::query(&self.statements.select_history), id)
            .fetch_all(&mut state.conn)
            .await
            .map_err(|e| PersistenceError::storage("fetch history", e))?;
        drop(state);

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry_id = id_from_row(&row, 0, "fetch history")?;
            let workflow_id = id_from_row(&row, 1, "fetch history")?;
            let action: String = row
                .try_get(2)
                .map_err(|e| PersistenceError::storage("fetch history", e))?;
            let description: String = row
                .try_get::<Option<String>, _>(3)
                .map_err(|e| PersistenceError::storage("fetch history", e))?
                .unwrap_or_default();
            let entry_state: String = row
                .try_get(4)
                .map_err(|e| PersistenceError::storage("fetch history", e))?;
            let user: String = row
                .try_get(5)
                .map_err(|e| PersistenceError::storage("fetch history", e))?;
            let raw_date: String = row
                .try_get(6)
                .map_err(|e| PersistenceError::storage("fetch history", e))?;

            entries.push(HistoryEntry::from_stored(
                entry_id,
                workflow_id,
                action,
                description,
                entry_state,
                user,
                self.parse_timestamp(&raw_date)?,
            ));
        }
        Ok(entries)
    }

    async fn commit(&self) -> Result<(), PersistenceError> {
        if self.autocommit {
            tracing::debug!(
                target: "waypoint::storage::sql",
                "commit ignored; autocommit enabled"
            );
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if !state.in_tx {
            tracing::debug!(
                target: "waypoint::storage::sql",
                "commit with no open transaction window"
            );
            return Ok(());
        }
        sqlx::query("COMMIT")
            .execute(&mut state.conn)
            .await
            .map_err(|e| PersistenceError::storage("commit", e))?;
        state.in_tx = false;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), PersistenceError> {
        if self.autocommit {
            // Every write was already its own transaction; there is nothing
            // to undo.
            tracing::warn!(
                target: "waypoint::storage::sql",
                "rollback requested with autocommit enabled; nothing to undo"
            );
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if !state.in_tx {
            tracing::debug!(
                target: "waypoint::storage::sql",
                "rollback with no open transaction window"
            );
            return Ok(());
        }
        sqlx::query("ROLLBACK")
            .execute(&mut state.conn)
            .await
            .map_err(|e| PersistenceError::storage("rollback", e))?;
        state.in_tx = false;
        Ok(())
    }
}
