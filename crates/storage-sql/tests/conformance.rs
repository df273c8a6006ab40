use waypoint_storage::conformance::{run_conformance_suite, TransactionMode};
use waypoint_storage_sql::{SqlPersister, SqlPersisterConfig};

async fn fresh(mode: TransactionMode) -> SqlPersister {
    let config = SqlPersisterConfig::new("sqlite::memory:")
        .autocommit(matches!(mode, TransactionMode::AutoCommit));
    let persister = SqlPersister::connect(config).await.expect("connect");
    persister.ensure_schema().await.expect("schema");
    persister
}

#[tokio::test]
async fn sqlite_persister_passes_conformance() {
    let report = run_conformance_suite(fresh).await;
    assert_eq!(report.failed, 0, "{report}");
}
