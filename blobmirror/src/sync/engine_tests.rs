use super::*;
use crate::sync::classify::SyncPolicy;
use crate::sync::index::IndexStore;
use crate::sync::test_support::{
    FakeFetcher, FakeListing, FakeObject, T0, memory_index, remote_item,
};
use std::path::Path;
use tempfile::tempdir;

fn engine_with(
    root: &Path,
    index: &Arc<IndexStore>,
    fetcher: &Arc<FakeFetcher>,
    policy: SyncPolicy,
    container: &str,
) -> SyncEngine {
    let fetcher: Arc<FakeFetcher> = Arc::clone(fetcher);
    let ctx = JobContext::new(root, Arc::clone(index), fetcher, policy);
    let mut options = EngineOptions::new(container);
    options.max_transfers = 3;
    options.classify_concurrency = 4;
    SyncEngine::new(Arc::new(ctx), options)
}

fn engine(root: &Path, index: &Arc<IndexStore>, fetcher: &Arc<FakeFetcher>) -> SyncEngine {
    engine_with(root, index, fetcher, SyncPolicy::default(), "c")
}

fn publish(fetcher: &FakeFetcher, path: &str, content: &[u8]) -> crate::sync::probe::RemoteItem {
    fetcher.put_content(path, content);
    remote_item(path, content, T0)
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn first_run_downloads_everything_across_pages() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let a = publish(&fetcher, "/c/a.txt", b"alpha");
    let b = publish(&fetcher, "/c/dir/b.txt", b"bravo");
    let d = publish(&fetcher, "/c/dir/d.txt", b"delta");

    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![a, b], vec![d]]))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.stats.total.count(), 3);
    assert_eq!(report.stats.new.count(), 3);
    assert_eq!(report.stats.downloaded.count(), 3);
    assert_eq!(report.stats.downloaded.bytes(), 15);
    assert_eq!(report.pool.completed, 3);
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(std::fs::read(dir.path().join("c/dir/d.txt")).unwrap(), b"delta");
    assert_eq!(index.count().await.unwrap(), 3);
}

#[tokio::test]
async fn second_run_over_unchanged_store_transfers_nothing() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let items = vec![
        publish(&fetcher, "/c/a.txt", b"alpha"),
        publish(&fetcher, "/c/b.txt", b"bravo"),
    ];

    engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![items.clone()]))
        .await
        .unwrap();
    assert_eq!(fetcher.calls(), 2);

    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![items]))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(), 2);
    assert_eq!(report.stats.up_to_date.count(), 2);
    assert_eq!(report.stats.new.count(), 0);
    assert_eq!(report.stats.modified.count(), 0);
    assert_eq!(report.stats.deleted.count(), 0);
    assert_eq!(files_in(&dir.path().join("c")), vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn well_known_item_is_recorded_without_transfer() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let empty_array = remote_item("/c/list.json", b"[]", T0);

    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![empty_array]]))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(), 0);
    assert_eq!(report.stats.ignored.count(), 1);
    assert_eq!(report.stats.new.count(), 0);
    let record = index.get_record("c/list.json").await.unwrap().unwrap();
    assert!(record.last_downloaded.is_some());
}

#[tokio::test]
async fn remote_change_is_fetched_as_modified() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let v1 = publish(&fetcher, "/c/a.txt", b"first");
    engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![v1]]))
        .await
        .unwrap();

    fetcher.put_content("/c/a.txt", b"second version");
    let v2 = remote_item("/c/a.txt", b"second version", T0 + 3600);
    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![v2.clone()]]))
        .await
        .unwrap();

    assert_eq!(report.stats.modified.count(), 1);
    assert_eq!(
        std::fs::read(dir.path().join("c/a.txt")).unwrap(),
        b"second version"
    );
    let record = index.get_record("c/a.txt").await.unwrap().unwrap();
    assert_eq!(record.remote_hash, v2.content_hash);
    assert_eq!(record.last_modified, v2.last_modified);
}

#[tokio::test]
async fn vanished_remote_item_is_tombstoned_on_next_run() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let b = publish(&fetcher, "/a/b.txt", b"bye");
    let keep = publish(&fetcher, "/a/keep.txt", b"keep");
    engine_with(dir.path(), &index, &fetcher, SyncPolicy::default(), "a")
        .run(FakeListing::new(vec![vec![b, keep.clone()]]))
        .await
        .unwrap();

    let report = engine_with(dir.path(), &index, &fetcher, SyncPolicy::default(), "a")
        .run(FakeListing::new(vec![vec![keep]]))
        .await
        .unwrap();

    let record = index.get_record("a/b.txt").await.unwrap().unwrap();
    assert!(record.delete_detected.is_some());
    let reconcile = report.reconcile.unwrap();
    assert_eq!(reconcile.tombstoned, 1);

    let names = files_in(&dir.path().join("a"));
    assert_eq!(names.len(), 2, "{names:?}");
    assert!(names.iter().any(|name| name.starts_with("b.txt[DELETED ")));
    assert!(names.contains(&"keep.txt".to_string()));
}

#[tokio::test]
async fn tombstone_for_missing_file_is_an_empty_placeholder() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let b = publish(&fetcher, "/a/b.txt", b"bye");
    let keep = publish(&fetcher, "/a/keep.txt", b"keep");
    engine_with(dir.path(), &index, &fetcher, SyncPolicy::default(), "a")
        .run(FakeListing::new(vec![vec![b, keep.clone()]]))
        .await
        .unwrap();
    std::fs::remove_file(dir.path().join("a/b.txt")).unwrap();

    engine_with(dir.path(), &index, &fetcher, SyncPolicy::default(), "a")
        .run(FakeListing::new(vec![vec![keep]]))
        .await
        .unwrap();

    let names = files_in(&dir.path().join("a"));
    assert!(
        names
            .iter()
            .any(|name| name.starts_with("b.txt[DELETED ") && name.ends_with("].empty")),
        "{names:?}"
    );
}

#[tokio::test]
async fn failed_scan_skips_deletion_and_reports_failure() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let a = publish(&fetcher, "/c/a.txt", b"alpha");
    let b = publish(&fetcher, "/c/b.txt", b"bravo");
    engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![a.clone(), b]]))
        .await
        .unwrap();

    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::failing_after(vec![vec![a]]))
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(report.scan_error.is_some());
    assert!(report.reconcile.is_none());
    let record = index.get_record("c/b.txt").await.unwrap().unwrap();
    assert_eq!(record.delete_detected, None);
    assert!(dir.path().join("c/b.txt").exists());
}

#[tokio::test]
async fn classification_error_skips_item_and_deletion() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let a = publish(&fetcher, "/c/a.txt", b"alpha");
    let stray = dir.path().join("c/stray.txt");
    std::fs::create_dir_all(stray.parent().unwrap()).unwrap();
    std::fs::write(&stray, b"local only").unwrap();
    let bad = remote_item("/c/../escape.txt", b"x", T0);

    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![a, bad]]))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.item_errors, 1);
    assert_eq!(report.stats.exceptions(), 1);
    assert!(report.reconcile.is_none());
    assert!(stray.exists());
    assert!(dir.path().join("c/a.txt").exists());
}

#[tokio::test]
async fn one_failing_job_does_not_stop_the_others() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let mut items = Vec::new();
    for i in 0..10 {
        items.push(publish(&fetcher, &format!("/c/{i}.txt"), format!("file {i}").as_bytes()));
    }
    fetcher.put("/c/3.txt", FakeObject::Broken);
    fetcher.put("/c/7.txt", FakeObject::NotFound);

    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![items]))
        .await
        .unwrap();

    assert_eq!(report.pool.completed, 9);
    assert_eq!(report.pool.failed, 1);
    assert_eq!(report.stats.downloaded.count(), 8);
    assert_eq!(report.stats.exceptions(), 2);
    let failed = index.get_record("c/3.txt").await.unwrap().unwrap();
    assert_eq!(failed.last_downloaded, None);
}

#[tokio::test]
async fn items_after_cutoff_are_ignored_but_kept_on_disk() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let old = publish(&fetcher, "/c/old.txt", b"old");
    engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![old.clone()]]))
        .await
        .unwrap();

    fetcher.put_content("/c/old.txt", b"rewritten later");
    let newer = remote_item("/c/old.txt", b"rewritten later", T0 + 7200);
    let policy = SyncPolicy {
        ignore_modified_after: Some(T0 + 3600),
        ..SyncPolicy::default()
    };
    let report = engine_with(dir.path(), &index, &fetcher, policy, "c")
        .run(FakeListing::new(vec![vec![newer]]))
        .await
        .unwrap();

    assert_eq!(report.stats.ignored.count(), 1);
    assert_eq!(report.reconcile.unwrap().tombstoned, 0);
    assert_eq!(std::fs::read(dir.path().join("c/old.txt")).unwrap(), b"old");
}

#[tokio::test]
async fn recently_synced_file_deleted_locally_is_fetched_again() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.put_content("/c/a.txt", b"alpha");
    let recent = remote_item("/c/a.txt", b"alpha", now_unix() - 3600);
    engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![recent.clone()]]))
        .await
        .unwrap();
    std::fs::remove_file(dir.path().join("c/a.txt")).unwrap();

    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![recent]]))
        .await
        .unwrap();

    assert_eq!(report.stats.new.count(), 1);
    assert_eq!(fetcher.calls(), 2);
    assert!(dir.path().join("c/a.txt").exists());
}

#[tokio::test]
async fn old_file_deleted_locally_is_not_fetched_again() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let old = publish(&fetcher, "/c/a.txt", b"alpha");
    engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![old.clone()]]))
        .await
        .unwrap();
    std::fs::remove_file(dir.path().join("c/a.txt")).unwrap();

    let report = engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![old]]))
        .await
        .unwrap();

    assert_eq!(report.stats.up_to_date.count(), 1);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn names_with_invalid_characters_are_escaped() {
    let dir = tempdir().unwrap();
    let index = memory_index().await;
    let fetcher = Arc::new(FakeFetcher::default());
    let odd = publish(&fetcher, "/c/what?.txt", b"odd");

    engine(dir.path(), &index, &fetcher)
        .run(FakeListing::new(vec![vec![odd]]))
        .await
        .unwrap();

    assert!(dir.path().join("c/what--QUESTIONMARK--.txt").exists());
    assert!(
        index
            .get_record("c/what--QUESTIONMARK--.txt")
            .await
            .unwrap()
            .is_some()
    );
}
