use crate::*;

use bytes::Bytes;
use peerstash_core::{Group, MessageKind};
use peerstashd::protocol::restore::{self, RestoreOutcome};

/// CHUNK datagrams seen on a tap so far, with the group they went out on.
fn drain_chunks(tap: &mut mpsc::UnboundedReceiver<Tapped>) -> Vec<(Group, Message)> {
    let mut out = Vec::new();
    while let Ok(t) = tap.try_recv() {
        if let Ok(msg) = Message::decode(&t.datagram) {
            if msg.message_type() == MessageType::Chunk {
                out.push((t.group, msg));
            }
        }
    }
    out
}

/// Put one chunk straight into each holder's store.
fn seed_chunk(cluster: &Cluster, holders: &[PeerId], key: &ChunkKey, body: &[u8]) {
    for &peer in holders {
        let ctx = cluster.node(peer).context();
        ctx.store.put(key, body).unwrap();
        ctx.index.add_holder(key, peer);
    }
}

/// The requester's direct path is down for the whole restore; every chunk
/// arrives over the recovery group and the file is rebuilt intact.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restore_completes_over_recovery_group() {
    let cluster = Cluster::start(&[1, 2]).await.unwrap();
    let data = test_data(150_000);
    let path = cluster.write_file("unreachable.bin", &data).unwrap();

    let report = cluster.node(1).backup(&path, 1).await.unwrap().wait().await.unwrap();
    assert!(report.is_complete());
    let file_id = report.file_id.clone();

    cluster.hub.set_direct_reachable(1, false);
    let mut tap = cluster.hub.tap();

    let outcome = cluster.node(1).restore(&path).unwrap().wait().await.unwrap();
    match outcome {
        RestoreOutcome::Completed { path: out, bytes } => {
            assert_eq!(bytes, 150_000);
            assert_eq!(read(&out), data);
        }
        other => panic!("restore did not complete: {:?}", other),
    }

    let chunks = drain_chunks(&mut tap);
    for chunk_no in 0..3 {
        assert!(
            chunks.iter().any(|(group, m)| *group == Group::Recovery
                && m.sender_id == 2
                && m.file_id == file_id
                && m.chunk_no() == Some(chunk_no)),
            "chunk {} never went out on the recovery group",
            chunk_no
        );
    }
    assert!(cluster.hub.direct_attempts(1) >= 6);

    cluster.shutdown().await;
}

/// A reachable requester gets the chunk direct with no multicast; an
/// unreachable one gets two direct attempts and then one recovery CHUNK.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chunk_falls_back_after_two_direct_attempts() {
    let cluster = Cluster::start(&[1, 2]).await.unwrap();
    let key = ChunkKey::new(FileId::derive("fallback.bin", 9), 0);
    seed_chunk(&cluster, &[2], &key, b"payload");
    let holder = cluster.node(2).context().clone();

    let mut tap = cluster.hub.tap();
    restore::serve_getchunk(holder.clone(), key.clone(), 1).await;
    assert_eq!(cluster.hub.direct_attempts(1), 1);
    assert!(drain_chunks(&mut tap).is_empty());

    cluster.hub.set_direct_reachable(1, false);
    restore::serve_getchunk(holder.clone(), key.clone(), 1).await;
    assert_eq!(cluster.hub.direct_attempts(1), 3);

    let chunks = drain_chunks(&mut tap);
    assert_eq!(chunks.len(), 1);
    let (group, msg) = &chunks[0];
    assert_eq!(*group, Group::Recovery);
    assert_eq!(msg.sender_id, 2);
    assert_eq!(msg.chunk_no(), Some(0));
    match &msg.kind {
        MessageKind::Chunk { body, .. } => assert_eq!(body, &Bytes::from_static(b"payload")),
        other => panic!("unexpected kind: {:?}", other),
    }

    // the requester and the other peers saw the answer
    assert!(
        wait_until(Duration::from_secs(1), || cluster.node(1).context().answered.is_answered(&key))
            .await
    );

    cluster.shutdown().await;
}

/// With two holders, the one that hears the other's CHUNK first stays quiet:
/// one CHUNK per chunk for the round.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_holder_stays_quiet_after_recovery_chunk() {
    let cluster = Cluster::start(&[1, 2, 3]).await.unwrap();
    let key = ChunkKey::new(FileId::derive("shared.bin", 4), 2);
    seed_chunk(&cluster, &[2, 3], &key, b"shared chunk");
    cluster.hub.set_direct_reachable(1, false);

    let mut tap = cluster.hub.tap();
    restore::serve_getchunk(cluster.node(2).context().clone(), key.clone(), 1).await;

    let late = cluster.node(3).context().clone();
    assert!(wait_until(Duration::from_secs(1), || late.answered.is_answered(&key)).await);
    let attempts = cluster.hub.direct_attempts(1);
    restore::serve_getchunk(late.clone(), key.clone(), 1).await;

    // peer 3 neither tried the direct path nor multicast
    assert_eq!(cluster.hub.direct_attempts(1), attempts);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let chunks = drain_chunks(&mut tap);
    assert_eq!(chunks.len(), 1, "chunks: {:?}", chunks);
    assert_eq!(chunks[0].1.sender_id, 2);

    // a new GETCHUNK opens the next round
    late.answered.reset(&key);
    assert!(!late.answered.is_answered(&key));

    cluster.shutdown().await;
}
