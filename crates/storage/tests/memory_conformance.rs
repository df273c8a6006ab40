use waypoint_storage::conformance::{run_conformance_suite, TransactionMode};
use waypoint_storage::MemoryPersister;

#[tokio::test]
async fn memory_persister_passes_conformance() {
    let report = run_conformance_suite(|mode| async move {
        match mode {
            TransactionMode::AutoCommit => MemoryPersister::new(),
            TransactionMode::Explicit => MemoryPersister::transactional(),
        }
    })
    .await;

    assert_eq!(report.failed, 0, "{report}");
}
