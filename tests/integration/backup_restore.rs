use crate::*;

use peerstash_api::PeerControl;
use peerstashd::protocol::restore::RestoreOutcome;

/// 150,000 bytes at degree 2 over three peers: three chunks, each held by
/// both non-initiating peers, restored byte for byte.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backup_then_restore_three_peers() {
    let cluster = Cluster::start(&[1, 2, 3]).await.unwrap();
    let data = test_data(150_000);
    let path = cluster.write_file("report.bin", &data).unwrap();

    let handle = cluster.node(1).backup(&path, 2).await.unwrap();
    assert_eq!(handle.chunk_count, 3);
    let file_id = handle.file_id.clone();
    let report = handle.wait().await.unwrap();
    assert!(report.is_complete(), "backup report: {:?}", report);
    assert_eq!(report.confirmed, vec![0, 1, 2]);

    for chunk_no in 0..3 {
        let key = ChunkKey::new(file_id.clone(), chunk_no);
        let converged = wait_until(Duration::from_secs(5), || cluster.holders(&key) == vec![2, 3]).await;
        assert!(converged, "chunk {} held by {:?}", chunk_no, cluster.holders(&key));
        assert_eq!(cluster.node(1).context().index.replicas(&key), 2);
    }

    let sizes: Vec<u64> = cluster
        .node(2)
        .context()
        .store
        .stored_chunks()
        .into_iter()
        .map(|(_, size)| size)
        .collect();
    assert_eq!(sizes, vec![64_000, 64_000, 22_000]);

    let state = cluster.node(1).state();
    assert_eq!(state.backed_up.len(), 1);
    assert_eq!(state.backed_up[0].desired_degree, 2);
    assert!(state.backed_up[0].chunks.iter().all(|c| c.observed == 2));

    let restore = cluster.node(1).restore(&path).unwrap();
    match restore.wait().await.unwrap() {
        RestoreOutcome::Completed { path: out, bytes } => {
            assert_eq!(bytes, 150_000);
            assert_eq!(read(&out), data);
        }
        other => panic!("restore did not complete: {:?}", other),
    }

    cluster.shutdown().await;
}

/// Restore uses the catalog, so it works after the source file is gone.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restore_after_source_removed() {
    let cluster = Cluster::start(&[1, 2]).await.unwrap();
    let data = test_data(70_000);
    let path = cluster.write_file("gone.bin", &data).unwrap();

    let report = cluster.node(1).backup(&path, 1).await.unwrap().wait().await.unwrap();
    assert!(report.is_complete());
    std::fs::remove_file(&path).unwrap();

    let outcome = cluster.node(1).restore(&path).unwrap().wait().await.unwrap();
    match outcome {
        RestoreOutcome::Completed { path: out, .. } => assert_eq!(read(&out), data),
        other => panic!("restore did not complete: {:?}", other),
    }

    cluster.shutdown().await;
}

/// A file whose length is a multiple of the chunk size ends in an empty chunk.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exact_multiple_round_trips() {
    let cluster = Cluster::start(&[1, 2]).await.unwrap();
    let data = test_data(128_000);
    let path = cluster.write_file("even.bin", &data).unwrap();

    let handle = cluster.node(1).backup(&path, 1).await.unwrap();
    assert_eq!(handle.chunk_count, 3);
    assert!(handle.wait().await.unwrap().is_complete());

    let outcome = cluster.node(1).restore(&path).unwrap().wait().await.unwrap();
    match outcome {
        RestoreOutcome::Completed { path: out, bytes } => {
            assert_eq!(bytes, 128_000);
            assert_eq!(read(&out), data);
        }
        other => panic!("restore did not complete: {:?}", other),
    }

    cluster.shutdown().await;
}

/// A holder that fails to write the chunk sends no STORED and does not
/// count itself; the initiator keeps resending and succeeds once the disk
/// is writable again.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_write_sends_no_stored_until_retry_lands() {
    let cluster = Cluster::start(&[1, 2]).await.unwrap();
    let path = cluster.write_file("blocked.bin", &test_data(10_000)).unwrap();
    let file_id = FileId::for_path(&path).unwrap();
    let key = ChunkKey::new(file_id.clone(), 0);

    // a plain file where the chunk directory has to go
    let holder = cluster.node(2).context().clone();
    let blocker = holder.store.root().join(file_id.as_str());
    std::fs::write(&blocker, b"occupied").unwrap();

    let mut tap = cluster.hub.tap();
    let handle = cluster.node(1).backup(&path, 1).await.unwrap();

    let mut seen = Vec::new();
    let retried = wait_until(Duration::from_secs(3), || {
        seen.extend(drain_tap(&mut tap));
        count_of(&seen, MessageType::PutChunk, &file_id) >= 2
    })
    .await;
    assert!(retried, "initiator did not resend PUTCHUNK");
    tokio::time::sleep(Duration::from_millis(60)).await;
    seen.extend(drain_tap(&mut tap));

    assert_eq!(count_of(&seen, MessageType::Stored, &file_id), 0);
    assert!(!holder.store.has(&key));
    assert!(!holder.index.get(&key).map_or(false, |m| m.holders.contains(&2)));
    assert_eq!(cluster.node(1).context().index.replicas(&key), 0);

    std::fs::remove_file(&blocker).unwrap();
    let report = handle.wait().await.unwrap();
    assert!(report.is_complete(), "backup report: {:?}", report);
    assert_eq!(cluster.holders(&key), vec![2]);

    seen.extend(drain_tap(&mut tap));
    assert!(count_of(&seen, MessageType::PutChunk, &file_id) >= 3);
    assert!(count_of(&seen, MessageType::Stored, &file_id) >= 1);

    cluster.shutdown().await;
}

/// Only one restore per file runs at a time, and a restore can be cancelled.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restore_single_flight_and_cancel() {
    let cluster = Cluster::start(&[1]).await.unwrap();
    let path = cluster.write_file("lonely.bin", &test_data(1_000)).unwrap();

    let handle = cluster.node(1).restore(&path).unwrap();
    assert!(cluster.node(1).restore(&path).is_err(), "second restore must be refused");
    handle.cancel();
    assert_eq!(handle.wait().await.unwrap(), RestoreOutcome::Cancelled);

    // a fresh restore may start once the first is gone
    let handle = cluster.node(1).restore(&path).unwrap();
    handle.cancel();
    handle.wait().await.unwrap();

    cluster.shutdown().await;
}

/// Refused operations surface as errors through the control trait.
#[tokio::test]
async fn test_control_plane_status_lines() {
    let cluster = Cluster::start(&[1]).await.unwrap();
    let node = cluster.node(1).clone();
    let missing = cluster.dir.join("no-such-file");

    assert!(PeerControl::backup(&*node, missing.clone(), 2).await.is_err());
    assert!(PeerControl::backup(&*node, missing.clone(), 0).await.is_err());
    assert!(PeerControl::delete(&*node, missing.clone()).await.is_err());
    assert!(PeerControl::restore(&*node, missing).await.is_err());

    let status = PeerControl::reclaim(&*node).await.unwrap();
    assert!(status.contains("nothing"), "status: {}", status);

    let status = PeerControl::set_capacity(&*node, 5_000).await.unwrap();
    assert!(status.contains("5000"), "status: {}", status);
    assert_eq!(PeerControl::state(&*node).capacity, 5_000);

    cluster.shutdown().await;
}
