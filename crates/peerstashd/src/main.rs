//! peerstashd: peer-to-peer multicast backup daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use peerstash_core::config::PeerstashConfig;
use peerstash_core::PeerId;
use peerstashd::transport::multicast::MulticastTransport;
use peerstashd::{NodeOptions, PeerNode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PeerstashConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = PeerstashConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PeerstashConfig::default()
    });

    if let Some(arg) = std::env::args().nth(1) {
        config.identity.peer_id = arg
            .parse::<PeerId>()
            .with_context(|| format!("peer id must be a number, got {:?}", arg))?;
    }
    config.validate().context("invalid configuration")?;

    let options = NodeOptions::from_config(&config)?;
    tracing::info!(
        peer_id = options.peer_id,
        version = %options.protocol.version,
        root = %options.root.display(),
        "peerstashd starting"
    );

    // Transport
    let (transport, inbound) = MulticastTransport::bind(
        &config.network,
        options.peer_id,
        options.protocol.chunk_size,
    )
    .await
    .context("failed to bind transport")?;

    let node = PeerNode::start(options, transport, inbound)?;

    // Control plane
    let api_port = config.network.api_port;
    let api_task = {
        let state = peerstash_api::ApiState {
            control: node.clone() as Arc<dyn peerstash_api::PeerControl>,
        };
        tokio::spawn(async move {
            if let Err(e) = peerstash_api::serve(state, api_port).await {
                tracing::error!(error = %e, "control API failed");
            }
        })
    };

    // Files deleted while this peer was offline
    let reconcile_task = {
        let node = node.clone();
        tokio::spawn(async move {
            let report = node.reconcile_deleted().await;
            tracing::info!(
                checked = report.checked,
                purged = report.purged.len(),
                "startup reconciliation finished"
            );
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        }
        r = api_task => tracing::error!("control API exited: {:?}", r),
    }

    reconcile_task.abort();
    node.shutdown().await?;
    Ok(())
}
