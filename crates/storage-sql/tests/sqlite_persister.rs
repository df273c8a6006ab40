use chrono::Timelike;

use waypoint_core::{HistoryEntry, RecordId, WorkflowInstance};
use waypoint_storage::{PersistenceError, Persister};
use waypoint_storage_sql::{
    ConnectError, GeneratorRegistry, HistoryColumns, InstanceColumns, SqlPersister,
    SqlPersisterConfig,
};

fn ticket() -> WorkflowInstance {
    WorkflowInstance::new("ticket", "NEW", chrono_tz::UTC)
}

async fn sqlite_persister(autocommit: bool) -> SqlPersister {
    let config = SqlPersisterConfig::new("sqlite::memory:").autocommit(autocommit);
    let persister = SqlPersister::connect(config).await.expect("connect");
    persister.ensure_schema().await.expect("schema");
    persister
}

#[tokio::test]
async fn create_then_fetch_on_a_fresh_table() {
    // Autocommit off, default table `workflow`: the first created instance
    // gets identifier 1 and fetches back exactly what was written.
    let persister = sqlite_persister(false).await;
    let mut wf = ticket();

    let id = persister.create_instance(&mut wf).await.unwrap();
    assert_eq!(id, RecordId::Int(1));

    let fetched = persister
        .fetch_instance(&RecordId::Int(1))
        .await
        .unwrap()
        .expect("created instance must be fetchable");
    assert_eq!(fetched.state, "NEW");
    assert_eq!(Some(fetched.last_update), wf.last_update());
}

#[tokio::test]
async fn default_format_stores_minute_precision() {
    let persister = sqlite_persister(true).await;
    let mut wf = ticket();
    persister.create_instance(&mut wf).await.unwrap();

    let stamp = wf.last_update().expect("create sets last_update");
    assert_eq!(stamp.second(), 0);
    assert_eq!(stamp.nanosecond(), 0);
}

#[tokio::test]
async fn custom_format_roundtrips_seconds() {
    let config = SqlPersisterConfig::new("sqlite::memory:").date_format("%Y-%m-%dT%H:%M:%S");
    let persister = SqlPersister::connect(config).await.unwrap();
    persister.ensure_schema().await.unwrap();

    let mut wf = ticket();
    let id = persister.create_instance(&mut wf).await.unwrap();
    let fetched = persister.fetch_instance(&id).await.unwrap().unwrap();
    assert_eq!(Some(fetched.last_update), wf.last_update());
}

#[tokio::test]
async fn renamed_tables_and_columns_roundtrip() {
    let config = SqlPersisterConfig::new("sqlite::memory:")
        .workflow_table("wf_case")
        .history_table("wf_case_log")
        .instance_columns(InstanceColumns {
            id: "case_id".to_string(),
            workflow_type: "kind".to_string(),
            state: "current_state".to_string(),
            last_update: "touched_at".to_string(),
        })
        .history_columns(HistoryColumns {
            id: "log_id".to_string(),
            workflow_id: "case_id".to_string(),
            action: "act".to_string(),
            description: "note".to_string(),
            state: "current_state".to_string(),
            user: "actor".to_string(),
            date: "logged_at".to_string(),
        });
    let persister = SqlPersister::connect(config).await.unwrap();
    persister.ensure_schema().await.unwrap();

    let mut wf = ticket();
    let id = persister.create_instance(&mut wf).await.unwrap();

    let mut entries = vec![HistoryEntry::for_transition(&wf, "create", "opened", "alice").unwrap()];
    persister.create_history(&wf, &mut entries).await.unwrap();

    let fetched = persister.fetch_instance(&id).await.unwrap().unwrap();
    assert_eq!(fetched.state, "NEW");
    let history = persister.fetch_history(&wf).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action(), "create");
    assert_eq!(history[0].user(), "alice");
}

#[tokio::test]
async fn history_identifiers_count_up_from_one() {
    let persister = sqlite_persister(true).await;
    let mut wf = ticket();
    let id = persister.create_instance(&mut wf).await.unwrap();

    let date = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let mut entries = vec![
        HistoryEntry::new(id.clone(), "create", "", "NEW", "alice", date),
        HistoryEntry::new(id.clone(), "start", "", "NEW", "alice", date + chrono::Duration::hours(1)),
    ];
    persister.create_history(&wf, &mut entries).await.unwrap();

    assert_eq!(entries[0].id(), Some(&RecordId::Int(1)));
    assert_eq!(entries[1].id(), Some(&RecordId::Int(2)));
}

#[tokio::test]
async fn missing_table_surfaces_a_persistence_error() {
    // No ensure_schema: the INSERT has nowhere to go.
    let config = SqlPersisterConfig::new("sqlite::memory:");
    let persister = SqlPersister::connect(config).await.unwrap();

    let mut wf = ticket();
    let err = persister.create_instance(&mut wf).await.unwrap_err();
    assert!(matches!(err, PersistenceError::Storage { .. }), "{err}");
    // The instance stays unsaved for a retry against a fixed deployment.
    assert!(wf.id().is_none());
}

#[tokio::test]
async fn empty_dsn_is_a_configuration_error() {
    let err = SqlPersister::connect(SqlPersisterConfig::new(""))
        .await
        .err()
        .expect("connect must fail");
    assert!(matches!(err, ConnectError::Configuration(_)), "{err}");
}

#[tokio::test]
async fn empty_registry_falls_back_to_random_text_identifiers() {
    use sqlx::Connection;

    // Random identifiers are text, so the table needs a text key — the
    // schema a real fallback deployment would carry. Pre-create it on a
    // file database both connections can reach.
    let path = std::env::temp_dir().join(format!("waypoint-random-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let dsn = format!("sqlite://{}?mode=rwc", path.display());

    sqlx::any::install_default_drivers();
    let mut setup = sqlx::AnyConnection::connect(&dsn).await.unwrap();
    sqlx::query(
        "CREATE TABLE workflow (workflow_id VARCHAR(64) PRIMARY KEY, \
         type VARCHAR(64) NOT NULL, state VARCHAR(64) NOT NULL, \
         last_update VARCHAR(64) NOT NULL)",
    )
    .execute(&mut setup)
    .await
    .unwrap();
    setup.close().await.unwrap();

    let config = SqlPersisterConfig::new(dsn).id_length(10);
    let persister = SqlPersister::connect_with(config, &GeneratorRegistry::empty())
        .await
        .unwrap();

    let mut wf = ticket();
    let id = persister.create_instance(&mut wf).await.unwrap();
    match &id {
        RecordId::Text(token) => {
            assert_eq!(token.len(), 10);
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        other => panic!("expected a random text identifier, got {:?}", other),
    }

    // The text identifier is a working key for later operations.
    let fetched = persister.fetch_instance(&id).await.unwrap();
    assert!(fetched.is_some());

    persister.close().await.unwrap();
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn close_tears_down_the_connection() {
    let persister = sqlite_persister(true).await;
    persister.close().await.unwrap();
}
