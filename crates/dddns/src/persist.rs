//! Persistence bridge: JSON round trip of the router's public state.
//!
//! The document carries the configuration, the peer table, the issued
//! secrets and the self-address bookkeeping. Behavior is not data: the
//! credential validator and the change listener are absent from the
//! document, and a loaded router refuses handshakes until a validator is
//! injected again. Per-peer runtime counters and retained credentials are
//! likewise excluded; a loaded router re-learns liveness on its first
//! cycle.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::PeerClient;
use crate::config::RouterConfig;
use crate::error::Result;
use crate::router::{RouterStatus, ServiceRouter};
use crate::table::PeerTable;

/// On-disk shape of a router. Field layout is the compatibility contract
/// for saved documents; extend it additively.
#[derive(Debug, Serialize, Deserialize)]
struct RouterDocument {
    config: RouterConfig,
    table: PeerTable,
    self_address: String,
    last_address_change: i64,
    last_cycle_at: i64,
}

impl ServiceRouter {
    /// Serializes the public router state to a pretty JSON document.
    pub fn to_json(&self) -> Result<String> {
        let document = {
            let status = self.status.read();
            RouterDocument {
                config: self.config.clone(),
                table: self.table.read().clone(),
                self_address: status.self_address.clone(),
                last_address_change: status.last_address_change,
                last_cycle_at: status.last_cycle_at,
            }
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Rebuilds a router from a serialized document.
    ///
    /// The caller must inject a credential validator before any handshake;
    /// until then both handshake sides fail with `NoValidator`.
    pub fn from_json(json: &str) -> Result<Arc<Self>> {
        let document: RouterDocument = serde_json::from_str(json)?;
        document.config.validate()?;
        if document.table.is_empty() {
            warn!(
                device = %document.config.device_uuid,
                "loaded router has no registered peers"
            );
        }
        Ok(Arc::new(ServiceRouter {
            config: document.config,
            table: RwLock::new(document.table),
            status: RwLock::new(RouterStatus {
                self_address: document.self_address,
                last_address_change: document.last_address_change,
                last_cycle_at: document.last_cycle_at,
            }),
            validator: RwLock::new(None),
            listener: RwLock::new(None),
            client: PeerClient::new(),
            heartbeat: Mutex::new(None),
        }))
    }

    /// Rebuilds a router from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
