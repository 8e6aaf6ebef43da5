use crate::*;

use peerstashd::protocol::restore::RestoreOutcome;

/// With a fifth of all multicast copies dropped, retries still reach the
/// target degree and the file still comes back.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backup_converges_under_loss() {
    let cluster = Cluster::start(&[1, 2, 3, 4]).await.unwrap();
    cluster.hub.set_loss(0.2);
    let data = test_data(200_000);
    let path = cluster.write_file("lossy.bin", &data).unwrap();

    let report = cluster.node(1).backup(&path, 2).await.unwrap().wait().await.unwrap();
    assert_eq!(report.chunk_count, 4);
    assert!(report.is_complete(), "backup report: {:?}", report);

    for chunk_no in 0..4 {
        let key = ChunkKey::new(report.file_id.clone(), chunk_no);
        assert!(cluster.holders(&key).len() >= 2, "chunk {} under-replicated", chunk_no);
        assert!(!cluster.holders(&key).contains(&1));
    }

    let outcome = cluster.node(1).restore(&path).unwrap().wait().await.unwrap();
    match outcome {
        RestoreOutcome::Completed { path: out, .. } => assert_eq!(read(&out), data),
        other => panic!("restore did not complete: {:?}", other),
    }

    cluster.shutdown().await;
}

/// Concurrent backups keep separate windows and both complete.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_backups_complete() {
    let cluster = Cluster::start(&[1, 2, 3]).await.unwrap();
    let a = cluster.write_file("a.bin", &test_data(300_000)).unwrap();
    let b = cluster.write_file("b.bin", &test_data(10_000)).unwrap();

    let first = cluster.node(1).backup(&a, 2).await.unwrap();
    let second = cluster.node(2).backup(&b, 1).await.unwrap();
    let (first, second) = tokio::join!(first.wait(), second.wait());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.is_complete(), "first: {:?}", first);
    assert_eq!(first.chunk_count, 5);
    assert!(second.is_complete(), "second: {:?}", second);
    assert_eq!(second.chunk_count, 1);

    cluster.shutdown().await;
}
