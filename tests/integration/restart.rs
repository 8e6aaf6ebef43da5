use crate::*;

/// A peer that was away during a delete learns of it at startup and drops
/// the file, keeping files nobody deleted.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restarted_peer_reconciles_deletes() {
    let mut cluster = Cluster::start(&[1, 2, 3]).await.unwrap();
    let doomed = cluster.write_file("doomed.bin", &test_data(30_000)).unwrap();
    let kept = cluster.write_file("kept.bin", &test_data(20_000)).unwrap();

    let doomed_id = cluster.node(1).backup(&doomed, 2).await.unwrap().wait().await.unwrap().file_id;
    let kept_id = cluster.node(1).backup(&kept, 2).await.unwrap().wait().await.unwrap().file_id;
    let doomed_key = ChunkKey::new(doomed_id.clone(), 0);
    let kept_key = ChunkKey::new(kept_id.clone(), 0);
    assert!(wait_until(Duration::from_secs(5), || {
        cluster.holders(&doomed_key) == vec![2, 3] && cluster.holders(&kept_key) == vec![2, 3]
    })
    .await);

    cluster.stop(3).await.unwrap();
    cluster.node(1).delete(&doomed).await.unwrap();
    assert!(wait_until(Duration::from_secs(3), || {
        cluster.node(2).context().deleted.contains(&doomed_id)
    })
    .await);

    let node = cluster.restart(3).unwrap().clone();
    let ctx = node.context();
    // index and chunks survived the restart
    assert_eq!(ctx.index.desired_degree(&doomed_key), Some(2));
    assert!(ctx.store.has(&doomed_key));

    let report = node.reconcile_deleted().await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.purged, vec![doomed_id.clone()]);
    assert!(ctx.store.chunks_of(&doomed_id).is_empty());
    assert!(ctx.deleted.contains(&doomed_id));
    assert!(ctx.store.has(&kept_key));

    cluster.shutdown().await;
}

/// The initiator's catalog survives a restart, so restore still knows the file.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_catalog_survives_restart() {
    let mut cluster = Cluster::start(&[1, 2]).await.unwrap();
    let path = cluster.write_file("remembered.bin", &test_data(5_000)).unwrap();
    let file_id = cluster.node(1).backup(&path, 1).await.unwrap().wait().await.unwrap().file_id;

    cluster.stop(1).await.unwrap();
    let node = cluster.restart(1).unwrap().clone();
    let entry = node.context().catalog.lookup(&path).unwrap();
    assert_eq!(entry.file_id, file_id);
    assert_eq!(entry.size, 5_000);
    assert_eq!(node.state().backed_up.len(), 1);

    cluster.shutdown().await;
}
