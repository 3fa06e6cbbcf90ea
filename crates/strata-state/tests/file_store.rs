//! File-backed SQLite store behaviour across process restarts.

use std::sync::Arc;

use strata_state::prelude::*;

fn orders_row() -> RawPipelineRow {
    RawPipelineRow {
        id: "orders".into(),
        data_source: "shop".into(),
        source_table: "raw_orders".into(),
        destination_table: "dim_orders".into(),
        schema_name: "public".into(),
        load_type: "incremental".into(),
        active: true,
    }
}

#[test]
fn history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let audit_id = {
        let store = SqliteStateStore::open(&path).unwrap();
        store.upsert_pipeline(&orders_row()).unwrap();
        let audit_id = store.open(&PipelineId::new("orders")).unwrap();
        store
            .close(audit_id, AuditStatus::Completed, Some(17), None)
            .unwrap();
        audit_id
    };

    let store = SqliteStateStore::open(&path).unwrap();
    let record = store.get(audit_id).unwrap().unwrap();
    assert_eq!(record.status, AuditStatus::Completed);
    assert_eq!(record.records_processed, Some(17));
    assert_eq!(store.active_pipelines(None).unwrap().len(), 1);
}

#[test]
fn shared_store_serves_every_contract() {
    let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::in_memory().unwrap());
    store.upsert_pipeline(&orders_row()).unwrap();

    let configs = store.active_pipelines(None).unwrap();
    let audit_id = store.open(&configs[0].id).unwrap();
    let details = store.details(audit_id).unwrap().unwrap();
    assert_eq!(details.record.status, AuditStatus::Running);
    assert_eq!(details.source_table, "raw_orders");
}

#[test]
fn concurrent_opens_are_serialized() {
    let store = Arc::new(SqliteStateStore::in_memory().unwrap());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.open(&PipelineId::new(format!("p{i}"))).unwrap())
        })
        .collect();
    let mut ids: Vec<AuditId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}
