//! Peer state display.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct StateResponse {
    peer_id: u32,
    version: String,
    capacity: u64,
    used: u64,
    free: u64,
    backed_up: Vec<BackedUpFile>,
    stored: Vec<StoredChunk>,
    deleted_files: usize,
}

#[derive(Deserialize)]
struct BackedUpFile {
    path: String,
    file_id: String,
    desired_degree: u8,
    chunks: Vec<ChunkReplication>,
}

#[derive(Deserialize)]
struct ChunkReplication {
    chunk_no: u32,
    observed: usize,
}

#[derive(Deserialize)]
struct StoredChunk {
    file_id: String,
    chunk_no: u32,
    size: u64,
    desired_degree: u8,
    observed: usize,
}

fn short(file_id: &str) -> &str {
    &file_id[..file_id.len().min(12)]
}

pub async fn cmd_state(port: u16) -> Result<()> {
    let resp: StateResponse = get_json(&format!("{}/state", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Peer {} (protocol {})", resp.peer_id, resp.version);
    println!("═══════════════════════════════════════");
    println!("  Capacity      : {} bytes", resp.capacity);
    println!("  Used          : {} bytes", resp.used);
    println!("  Free          : {} bytes", resp.free);
    println!("  Deleted files : {}", resp.deleted_files);

    if resp.backed_up.is_empty() {
        println!("\n  No files backed up from this peer.");
    } else {
        println!("\n  Backed up ({}):", resp.backed_up.len());
        for f in &resp.backed_up {
            println!("  ┌─ {}", f.path);
            println!("  │  file id : {}", short(&f.file_id));
            println!("  │  degree  : {}", f.desired_degree);
            let replicas: Vec<String> = f
                .chunks
                .iter()
                .map(|c| format!("{}:{}", c.chunk_no, c.observed))
                .collect();
            println!("  └─ chunks  : {}", replicas.join(" "));
        }
    }

    if resp.stored.is_empty() {
        println!("\n  No chunks stored.");
    } else {
        println!("\n  Stored chunks ({}):", resp.stored.len());
        for c in &resp.stored {
            println!(
                "  {}:{}  {} bytes  replicas {}/{}",
                short(&c.file_id),
                c.chunk_no,
                c.size,
                c.observed,
                c.desired_degree
            );
        }
    }

    Ok(())
}
