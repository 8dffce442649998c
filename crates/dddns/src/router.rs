//! The service router aggregate.
//!
//! One [`ServiceRouter`] runs per device. It owns the peer table and the
//! issued-secret table behind a single lock, the credential validator and
//! address-change listener injected by the host application, the shared
//! outbound client and the handle of the heartbeat loop.
//!
//! Locking discipline: the table lock is held only for the duration of a
//! read or write, never across network I/O. The heartbeat engine snapshots
//! what it needs, performs the request, then re-acquires the lock to apply
//! the result; concurrent inbound handlers interleave with last-writer-wins
//! semantics per field.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::PeerClient;
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::now_unix;
use crate::peer::{PeerOptions, PeerRecord};
use crate::table::PeerTable;

/// Predicate over `(username, password)` consulted by the connect responder.
pub type CredentialValidator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Callback invoked from the heartbeat cycle when the voted self-address
/// changes. Runs inline in the cycle and must not block.
pub type AddressChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Control handle of a running heartbeat loop.
pub(crate) struct HeartbeatHandle {
    /// Cooperative stop signal; the running cycle finishes before exit.
    pub shutdown: Arc<Notify>,
    /// The loop task itself, kept so a replacement can observe liveness.
    #[allow(dead_code)]
    pub task: JoinHandle<()>,
}

/// Mutable non-table state of the router.
#[derive(Debug, Clone, Default)]
pub(crate) struct RouterStatus {
    /// Voted self-address; `0.0.0.0` while unknown.
    pub self_address: String,
    /// UNIX seconds of the last self-address change.
    pub last_address_change: i64,
    /// UNIX seconds of the last completed heartbeat cycle.
    pub last_cycle_at: i64,
}

/// Per-device membership and address-reflection agent.
pub struct ServiceRouter {
    pub(crate) config: RouterConfig,
    pub(crate) table: RwLock<PeerTable>,
    pub(crate) status: RwLock<RouterStatus>,
    pub(crate) validator: RwLock<Option<CredentialValidator>>,
    pub(crate) listener: RwLock<Option<AddressChangeListener>>,
    pub(crate) client: PeerClient,
    pub(crate) heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl ServiceRouter {
    /// Builds a router from validated configuration.
    ///
    /// The result is `Arc`-wrapped because the heartbeat loop and the HTTP
    /// surface both hold shared references to it.
    pub fn new(config: RouterConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            table: RwLock::new(PeerTable::default()),
            status: RwLock::new(RouterStatus {
                self_address: String::new(),
                last_address_change: now_unix(),
                last_cycle_at: 0,
            }),
            validator: RwLock::new(None),
            listener: RwLock::new(None),
            client: PeerClient::new(),
            heartbeat: Mutex::new(None),
        }))
    }

    /// UUID of the device this router speaks for.
    pub fn device_uuid(&self) -> &str {
        &self.config.device_uuid
    }

    /// The static configuration the router was built from.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // ────────────────────────────────────────────────────────────────
    // INJECTED BEHAVIOR
    // ────────────────────────────────────────────────────────────────

    /// Injects the credential validator. Required before any handshake,
    /// inbound or outbound, and after every persistence load.
    pub fn set_validator(&self, validator: CredentialValidator) {
        *self.validator.write() = Some(validator);
    }

    /// Current validator, if one has been injected.
    pub(crate) fn validator(&self) -> Option<CredentialValidator> {
        self.validator.read().clone()
    }

    /// Installs the self-address change listener.
    pub fn set_address_change_listener(&self, listener: AddressChangeListener) {
        *self.listener.write() = Some(listener);
    }

    // ────────────────────────────────────────────────────────────────
    // PEER TABLE API
    // ────────────────────────────────────────────────────────────────

    /// Registers a peer. Fails with `AlreadyRegistered` on a duplicate
    /// UUID; a credential validator is not required at this point.
    pub fn add_peer(&self, options: PeerOptions) -> Result<()> {
        if options.uuid.trim().is_empty() {
            return Err(RouterError::Config("peer UUID must not be empty".into()));
        }
        if options.port == 0 {
            return Err(RouterError::Config("peer port must be nonzero".into()));
        }
        let peer = PeerRecord::new(options);
        debug!(uuid = %peer.uuid, port = peer.port, "registering peer");
        self.table.write().register(peer)
    }

    /// Removes a peer, cascading into the issued-secret table.
    pub fn remove_peer(&self, uuid: &str) -> Result<()> {
        self.table.write().unregister(uuid)
    }

    /// Clone of the current record for a peer.
    pub fn peer(&self, uuid: &str) -> Option<PeerRecord> {
        self.table.read().get(uuid).cloned()
    }

    /// Best-known address of a peer, empty while unknown.
    pub fn peer_address(&self, uuid: &str) -> Result<String> {
        self.table
            .read()
            .get(uuid)
            .map(|p| p.address.clone())
            .ok_or_else(|| RouterError::NotFound(uuid.trim().to_string()))
    }

    /// Overwrites the stored address of a peer, as an out-of-band
    /// correction (operator input, external discovery).
    pub fn update_peer_address(&self, uuid: &str, address: &str) -> Result<()> {
        let mut table = self.table.write();
        let peer = table
            .get_mut(uuid)
            .ok_or_else(|| RouterError::NotFound(uuid.trim().to_string()))?;
        peer.address = address.to_string();
        Ok(())
    }

    /// Registered peer UUIDs in registration order.
    pub fn neighbours(&self) -> Vec<String> {
        self.table.read().neighbours()
    }

    /// Whether a receive secret is currently issued to this UUID.
    pub fn has_session(&self, uuid: &str) -> bool {
        self.table.read().has_session(uuid)
    }

    /// Issued `(remote_uuid, recv_secret)` pairs, for diagnostics.
    pub fn issued_secrets(&self) -> Vec<(String, String)> {
        self.table.read().issued_secrets()
    }

    // ────────────────────────────────────────────────────────────────
    // STATUS
    // ────────────────────────────────────────────────────────────────

    /// The voted self-address; empty before the first cycle, `0.0.0.0`
    /// while no peer reflection is available.
    pub fn self_address(&self) -> String {
        self.status.read().self_address.clone()
    }

    /// UNIX seconds of the last self-address change.
    pub fn last_address_change(&self) -> i64 {
        self.status.read().last_address_change
    }

    /// UNIX seconds of the last completed heartbeat cycle, zero before
    /// the first one.
    pub fn last_cycle_at(&self) -> i64 {
        self.status.read().last_cycle_at
    }

    // ────────────────────────────────────────────────────────────────
    // LIFECYCLE
    // ────────────────────────────────────────────────────────────────

    /// Stops the heartbeat loop and tears down every peer session this
    /// router issued, best effort.
    pub fn close(&self) {
        self.stop_heartbeat();
        let mut table = self.table.write();
        for uuid in table.neighbours() {
            // A peer may never have handshaken; missing sessions are fine.
            let _ = table.remove_issued_secret(&uuid);
        }
        info!(device = %self.config.device_uuid, "router closed");
    }
}

impl fmt::Debug for ServiceRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read();
        f.debug_struct("ServiceRouter")
            .field("device_uuid", &self.config.device_uuid)
            .field("peers", &table.len())
            .field("issued", &table.issued_secrets().len())
            .field("self_address", &self.status.read().self_address)
            .finish()
    }
}
