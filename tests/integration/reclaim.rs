use crate::*;

use bytes::Bytes;

/// Put a chunk on `peer`'s disk and index it as held by `holders`.
fn seed(cluster: &Cluster, peer: PeerId, key: &ChunkKey, degree: u8, holders: &[PeerId], len: usize) {
    let ctx = cluster.node(peer).context();
    ctx.store.put(key, &test_data(len)).unwrap();
    ctx.index.observe_putchunk(key, degree);
    for &holder in holders {
        ctx.index.add_holder(key, holder);
    }
}

/// Among degrees [3, 1, 2] the degree-1 chunk goes, announced once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reclaim_evicts_lowest_degree() {
    let cluster = Cluster::start(&[1, 2]).await.unwrap();
    let file_id = FileId::derive("mixed.bin", 1_000);
    let keys: Vec<ChunkKey> = (0..3).map(|n| ChunkKey::new(file_id.clone(), n)).collect();
    for (key, degree) in keys.iter().zip([3u8, 1, 2]) {
        seed(&cluster, 1, key, degree, &[1], 1_000);
    }

    let mut tap = cluster.hub.tap();
    let eviction = cluster.node(1).reclaim().await.unwrap().unwrap();
    assert_eq!(eviction.key, keys[1]);
    assert_eq!(eviction.freed, 1_000);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let ctx = cluster.node(1).context();
    assert_eq!(ctx.store.chunks_of(&file_id), vec![0, 2]);
    assert_eq!(ctx.index.replicas(&keys[1]), 0);
    assert!(ctx.ignore.contains(&keys[1]));

    let messages = drain_tap(&mut tap);
    assert_eq!(count_of(&messages, MessageType::Removed, &file_id), 1);
    assert_eq!(count_of(&messages, MessageType::PutChunk, &file_id), 0);

    cluster.shutdown().await;
}

/// Lowering capacity evicts until used space fits.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_change_evicts_until_within_budget() {
    let cluster = Cluster::start(&[1]).await.unwrap();
    let file_id = FileId::derive("big.bin", 2_000);
    for (chunk_no, degree) in [(0u32, 2u8), (1, 1), (2, 3)] {
        seed(&cluster, 1, &ChunkKey::new(file_id.clone(), chunk_no), degree, &[1], 1_000);
    }

    let evicted = cluster.node(1).set_capacity(2_000).await.unwrap();
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].key.chunk_no, 1);
    assert_eq!(cluster.node(1).state().used, 2_000);

    let evicted = cluster.node(1).set_capacity(0).await.unwrap();
    let order: Vec<u32> = evicted.iter().map(|e| e.key.chunk_no).collect();
    assert_eq!(order, vec![0, 2]);
    assert_eq!(cluster.node(1).state().used, 0);

    cluster.shutdown().await;
}

/// Storing beyond capacity triggers reclaim on the receiving peer.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_over_capacity_reclaims() {
    let cluster = Cluster::start(&[1, 2]).await.unwrap();
    cluster.node(2).set_capacity(100_000).await.unwrap();
    let path = cluster.write_file("large.bin", &test_data(150_000)).unwrap();

    cluster.node(1).backup(&path, 1).await.unwrap().wait().await.unwrap();
    let within = wait_until(Duration::from_secs(3), || {
        cluster.node(2).context().store.used_bytes() <= 100_000
    })
    .await;
    assert!(within);
    assert!(cluster.node(2).context().store.count() < 3);

    cluster.shutdown().await;
}

/// X and Y hold a degree-2 chunk. X evicts it, Y re-announces exactly once,
/// and Z picks it up.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eviction_triggers_single_reannounce() {
    let cluster = Cluster::start(&[1, 2, 3]).await.unwrap();
    let file_id = FileId::derive("shared.bin", 3_000);
    let key = ChunkKey::new(file_id.clone(), 0);

    seed(&cluster, 1, &key, 2, &[1, 2], 5_000);
    seed(&cluster, 2, &key, 2, &[1, 2], 5_000);
    let z = cluster.node(3).context();
    z.index.observe_putchunk(&key, 2);
    z.index.add_holder(&key, 1);
    z.index.add_holder(&key, 2);

    let mut tap = cluster.hub.tap();
    let eviction = cluster.node(1).reclaim().await.unwrap().unwrap();
    assert_eq!(eviction.key, key);

    assert!(wait_until(Duration::from_secs(3), || cluster.holders(&key) == vec![2, 3]).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cluster.holders(&key), vec![2, 3]);

    let messages = drain_tap(&mut tap);
    assert_eq!(count_of(&messages, MessageType::Removed, &file_id), 1);
    let putchunks: Vec<&Message> = messages
        .iter()
        .filter(|m| m.message_type() == MessageType::PutChunk)
        .collect();
    assert_eq!(putchunks.len(), 1);
    assert_eq!(putchunks[0].sender_id, 2);
    assert_eq!(putchunks[0].replication_degree(), Some(2));
    assert_eq!(putchunks[0].body(), Some(&Bytes::from(test_data(5_000))));

    assert_eq!(cluster.node(2).context().index.replicas(&key), 2);

    cluster.shutdown().await;
}
