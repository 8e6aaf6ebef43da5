//! Protocol operations: backup, restore, delete, reclaim, capacity.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::http::{base_url, post_json, post_json_body};

#[derive(Serialize)]
struct BackupRequest {
    path: PathBuf,
    replication_degree: u8,
}

#[derive(Serialize)]
struct PathRequest {
    path: PathBuf,
}

#[derive(Serialize)]
struct CapacityRequest {
    capacity: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// The daemon resolves paths from its own working directory.
fn absolute(file: &str) -> Result<PathBuf> {
    std::path::absolute(file).with_context(|| format!("invalid path {}", file))
}

pub async fn cmd_backup(port: u16, file: &str, degree: &str) -> Result<()> {
    let replication_degree: u8 = degree
        .parse()
        .context("replication degree must be a number between 1 and 255")?;
    let req = BackupRequest {
        path: absolute(file)?,
        replication_degree,
    };
    let resp: StatusResponse = post_json_body(&format!("{}/backup", base_url(port)), &req).await?;
    println!("{}", resp.status);
    Ok(())
}

pub async fn cmd_restore(port: u16, file: &str) -> Result<()> {
    let req = PathRequest {
        path: absolute(file)?,
    };
    let resp: StatusResponse = post_json_body(&format!("{}/restore", base_url(port)), &req).await?;
    println!("{}", resp.status);
    Ok(())
}

pub async fn cmd_delete(port: u16, file: &str) -> Result<()> {
    let req = PathRequest {
        path: absolute(file)?,
    };
    let resp: StatusResponse = post_json_body(&format!("{}/delete", base_url(port)), &req).await?;
    println!("{}", resp.status);
    Ok(())
}

pub async fn cmd_reclaim(port: u16) -> Result<()> {
    let resp: StatusResponse = post_json(&format!("{}/reclaim", base_url(port))).await?;
    println!("{}", resp.status);
    Ok(())
}

pub async fn cmd_capacity(port: u16, size: &str) -> Result<()> {
    let req = CapacityRequest {
        capacity: size.to_string(),
    };
    let resp: StatusResponse =
        post_json_body(&format!("{}/capacity", base_url(port)), &req).await?;
    println!("{}", resp.status);
    Ok(())
}
