#![cfg(feature = "local_fs")]

mod common;

use common::*;
use evented::{
    journal::{EventJournal, LocalFsJournal},
    prelude::*,
    snapshot::{LocalFsSnapshotStore, SnapshotSelectionCriteria, SnapshotStore},
};
use futures::StreamExt;

#[tokio::test]
async fn test_state_survives_a_new_context() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = PersistenceConfig::default().with_data_dir(dir.path());

    let ctx = RootContext::local_fs(config.clone());
    let list = ctx.spawn(list_behavior("groceries")).unwrap();
    add_all(&list, &["milk", "bread", "eggs"]).await;
    list.stop().await;
    drop(ctx);

    let ctx = RootContext::local_fs(config);
    let list = ctx.spawn(list_behavior("groceries")).unwrap();
    assert_eq!(items(&list).await, vec!["eggs", "bread", "milk"]);

    let outcome = list.ask(Cmd::Add("jam".into())).await.unwrap();
    assert_eq!(outcome, Outcome::Persisted { sequence_nr: 4 });
}

#[tokio::test]
async fn test_retention_on_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = PersistenceConfig::default().with_data_dir(dir.path());
    let retention = RetentionCriteria::snapshot_every(2, 1)
        .unwrap()
        .with_delete_events_on_snapshot();

    let ctx = RootContext::local_fs(config.clone());
    let list = ctx
        .spawn(list_behavior("a/b c").with_retention(retention))
        .unwrap();
    add_all(&list, &["1", "2", "3", "4", "5"]).await;
    list.stop().await;

    let journal = LocalFsJournal::from_config(&config);
    let remaining: Vec<_> = journal
        .read_from(pid("a/b c"), 0)
        .map(|r| r.unwrap().sequence_nr)
        .collect()
        .await;
    assert_eq!(remaining, vec![3, 4, 5]);
    assert_eq!(journal.highest_sequence_nr(pid("a/b c")).await.unwrap(), 5);

    let snapshots = LocalFsSnapshotStore::from_config(&config);
    let latest = snapshots
        .latest(pid("a/b c"), SnapshotSelectionCriteria::latest())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.metadata.sequence_nr, 4);
    let older = snapshots
        .latest(pid("a/b c"), SnapshotSelectionCriteria::range(0, 3))
        .await
        .unwrap();
    assert!(older.is_none());

    let list = ctx
        .spawn(list_behavior("a/b c").with_retention(retention))
        .unwrap();
    assert_eq!(items(&list).await, vec!["5", "4", "3", "2", "1"]);
}
