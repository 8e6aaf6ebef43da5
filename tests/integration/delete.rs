use crate::*;

use bytes::Bytes;
use peerstash_core::MessageKind;

/// Delete purges chunk files, metadata and suppression state on every holder.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_purges_holders() {
    let cluster = Cluster::start(&[1, 2, 3]).await.unwrap();
    let path = cluster.write_file("doomed.bin", &test_data(100_000)).unwrap();

    let report = cluster.node(1).backup(&path, 2).await.unwrap().wait().await.unwrap();
    assert!(report.is_complete());
    let file_id = report.file_id.clone();
    let key = ChunkKey::new(file_id.clone(), 1);
    assert!(wait_until(Duration::from_secs(5), || cluster.holders(&key) == vec![2, 3]).await);

    for peer in [2, 3] {
        let ctx = cluster.node(peer).context();
        assert!(ctx.putchunk_watch.mark(&key) > 0);
        ctx.answered.mark(&key);
    }

    let mut tap = cluster.hub.tap();
    let deleted = cluster.node(1).delete(&path).await.unwrap();
    assert_eq!(deleted, file_id);

    let purged = wait_until(Duration::from_secs(3), || {
        [2, 3].iter().all(|&peer| {
            let ctx = cluster.node(peer).context();
            ctx.store.chunks_of(&file_id).is_empty()
                && ctx.index.entries_for_file(&file_id).is_empty()
                && ctx.deleted.contains(&file_id)
                && ctx.putchunk_watch.mark(&key) == 0
                && !ctx.answered.is_answered(&key)
        })
    })
    .await;
    assert!(purged, "holders still have chunks of the deleted file");

    let initiator = cluster.node(1).context();
    assert!(initiator.catalog.is_empty());
    assert!(initiator.index.entries_for_file(&file_id).is_empty());
    assert!(!initiator.deleted.contains(&file_id));

    let messages = drain_tap(&mut tap);
    assert_eq!(count_of(&messages, MessageType::Delete, &file_id), 3);

    cluster.shutdown().await;
}

/// Stale PUTCHUNKs for a deleted file are not stored, and GET_DELETED is
/// answered only by peers that know of the deletion.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ledger_rejects_stale_putchunk_and_answers_get_deleted() {
    let cluster = Cluster::start(&[1, 2, 3]).await.unwrap();
    let file_id = FileId::derive("stale.bin", 42);
    cluster.node(2).context().deleted.insert(file_id.clone());

    let origin = cluster.node(1).context();
    let putchunk = origin.message(
        file_id.clone(),
        MessageKind::PutChunk {
            chunk_no: 0,
            replication_degree: 1,
            body: Bytes::from_static(b"stale data"),
        },
    );
    origin.send(&putchunk).await;

    // peer 3 has no ledger entry and stores it; peer 2 must not
    let key = ChunkKey::new(file_id.clone(), 0);
    assert!(wait_until(Duration::from_secs(2), || cluster.holders(&key) == vec![3]).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!cluster.node(2).context().store.has(&key));
    assert!(cluster.node(2).context().index.get(&key).is_none());

    let mut tap = cluster.hub.tap();
    let ask = cluster.node(3).context().message(file_id.clone(), MessageKind::GetDeleted);
    cluster.node(3).context().send(&ask).await;

    let confirmed = wait_until(Duration::from_secs(2), || {
        cluster.node(3).context().deleted.contains(&file_id)
    })
    .await;
    assert!(confirmed);
    assert!(wait_until(Duration::from_secs(2), || cluster.holders(&key).is_empty()).await);

    let messages = drain_tap(&mut tap);
    let answers: Vec<PeerId> = messages
        .iter()
        .filter(|m| m.message_type() == MessageType::Delete && m.file_id == file_id)
        .map(|m| m.sender_id)
        .collect();
    assert_eq!(answers, vec![2]);

    cluster.shutdown().await;
}
