//! Three-router demo cluster in one process.
//!
//! First run:
//! 1. Build routers `alpha`, `beta` and `gamma` on localhost ports
//!    8081..8083, cross-register them and complete every handshake.
//! 2. Start heartbeats and let the self-address votes converge.
//! 3. Export each router to `<name>Router.json` in the working directory.
//!
//! Later runs load the routers from those files, re-inject the credential
//! validator and resume heartbeats without a fresh handshake.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::{info, Level};

use dddns::handlers::serve;
use dddns::{CredentialValidator, PeerOptions, RouterConfig, ServiceRouter};

const REST_PATH: &str = "/ddns";
const BASE_PORT: u16 = 8081;
const NODE_NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

/// Demo credential check shared by every router.
fn validator() -> CredentialValidator {
    Arc::new(|username, password| username == "user" && password == "123456")
}

fn config_file(name: &str) -> String {
    format!("{name}Router.json")
}

/// Loads a router from a previous run or builds a fresh one with the two
/// other nodes registered.
fn build_router(index: usize) -> Result<(Arc<ServiceRouter>, bool)> {
    let name = NODE_NAMES[index];
    let file = config_file(name);
    if Path::new(&file).exists() {
        let router = ServiceRouter::from_json_file(&file)
            .with_context(|| format!("loading {file}"))?;
        router.set_validator(validator());
        info!(node = name, file = %file, "restored router from previous run");
        return Ok((router, true));
    }

    let router = ServiceRouter::new(RouterConfig::new(name))?;
    router.set_validator(validator());
    for (peer_index, peer_name) in NODE_NAMES.iter().enumerate() {
        if peer_index == index {
            continue;
        }
        router.add_peer(PeerOptions {
            uuid: peer_name.to_string(),
            port: BASE_PORT + peer_index as u16,
            rest_path: REST_PATH.to_string(),
            require_tls: false,
        })?;
    }
    Ok((router, false))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("dddns cluster demo: three routers, one process");

    let mut routers = Vec::new();
    let mut fresh = Vec::new();
    for index in 0..NODE_NAMES.len() {
        let (router, restored) = build_router(index)?;
        if !restored {
            fresh.push(index);
        }
        routers.push(router);
    }

    // One HTTP endpoint per router.
    let shutdown = Arc::new(Notify::new());
    for (index, router) in routers.iter().enumerate() {
        let addr: SocketAddr = format!("127.0.0.1:{}", BASE_PORT + index as u16).parse()?;
        let router = Arc::clone(router);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if let Err(err) = serve(router, addr, REST_PATH, shutdown).await {
                tracing::error!(%addr, error = %err, "endpoint failed");
            }
        });
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Fresh routers need their handshakes; restored ones resume on their
    // persisted secrets.
    for &index in &fresh {
        let router = &routers[index];
        for peer in router.neighbours() {
            let secret = router
                .start_session(&peer, "127.0.0.1", "user", "123456")
                .await
                .with_context(|| format!("handshake {} -> {}", router.device_uuid(), peer))?;
            info!(
                from = router.device_uuid(),
                to = %peer,
                secret_len = secret.len(),
                "handshake complete"
            );
        }
    }

    for router in &routers {
        let name = router.device_uuid().to_string();
        router.set_address_change_listener(Arc::new(move |address| {
            info!(node = %name, %address, "self-address settled");
        }));
        Arc::clone(router).start_heartbeat().await;
    }

    // Two full cycles are enough for every vote to converge.
    tokio::time::sleep(Duration::from_secs(
        2 * routers[0].config().effective_interval() as u64 + 1,
    ))
    .await;

    for router in &routers {
        info!(
            node = router.device_uuid(),
            self_address = %router.self_address(),
            peers = router.neighbours().len(),
            "converged"
        );
        for uuid in router.neighbours() {
            if let Some(peer) = router.peer(&uuid) {
                info!(
                    node = router.device_uuid(),
                    peer = %uuid,
                    address = %peer.address,
                    state = ?peer.state(router.config().retry_threshold),
                    "peer table entry"
                );
            }
        }
    }

    // Persist for the next run.
    for router in &routers {
        let file = config_file(router.device_uuid());
        std::fs::write(&file, router.to_json()?)
            .with_context(|| format!("writing {file}"))?;
        info!(file = %file, "router exported");
    }

    info!("demo running; press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    for router in &routers {
        router.close();
    }
    shutdown.notify_waiters();
    info!("demo stopped");
    Ok(())
}
