//! Peer records.
//!
//! A [`PeerRecord`] is this router's view of one remote node: where to reach
//! it, the secret used to sign probes to it, and what that node last reported
//! our own source address to be. Records are owned by the
//! [`PeerTable`](crate::table::PeerTable); all mutation happens under the
//! router's lock.

use serde::{Deserialize, Serialize};

use crate::addr::{is_private_addr, normalize_rest_path};

/// Construction parameters for a new peer entry.
#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// UUID of the remote node.
    pub uuid: String,
    /// Transport port the remote listens on.
    pub port: u16,
    /// Path prefix the remote exposes its router endpoint under.
    pub rest_path: String,
    /// Use `https://` for outbound requests to this peer.
    pub require_tls: bool,
}

/// Coarse lifecycle state of a peer entry, derived from its counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Registered but no outbound session established yet.
    Registered,
    /// Session established; direct probing is active.
    Online,
    /// Too many failed probes; address recovery goes through a third peer.
    Syncing,
}

/// One remote node as seen by this router.
///
/// The runtime bookkeeping (`last_online`, `last_sync`, the retry counter
/// and the retained retry credentials) is deliberately not serialized: a
/// freshly loaded router starts with clean counters and re-learns liveness
/// on its first cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    /// UUID of the remote node.
    pub uuid: String,
    /// Current best-known reachable address, an IP literal without port.
    #[serde(default)]
    pub address: String,
    /// Transport port of the remote router endpoint.
    pub port: u16,
    /// Normalized path prefix of the remote router endpoint.
    pub rest_path: String,
    /// Whether outbound requests use `https://`.
    #[serde(default)]
    pub require_tls: bool,
    /// Public-space address the remote last observed as our source.
    #[serde(default)]
    pub reflected_public: String,
    /// Private-space address the remote last observed as our source.
    #[serde(default)]
    pub reflected_private: String,
    /// Secret the remote issued to us; signs our outbound probes.
    #[serde(default)]
    pub send_secret: String,

    /// UNIX seconds of the last successful exchange with this peer.
    #[serde(skip)]
    pub last_online: i64,
    /// UNIX seconds of the last probe attempt, successful or not.
    #[serde(skip)]
    pub last_sync: i64,
    /// Consecutive probe transport failures since the last success.
    #[serde(skip)]
    pub retry_count: u32,

    /// Username retained from the last handshake for silent re-auth.
    #[serde(skip)]
    pub(crate) retry_username: String,
    /// Password retained from the last handshake for silent re-auth.
    #[serde(skip)]
    pub(crate) retry_password: String,
}

impl PeerRecord {
    /// Builds a fresh record from registration options. The REST path is
    /// normalized here once; every URL built later reuses it verbatim.
    pub fn new(options: PeerOptions) -> Self {
        Self {
            uuid: options.uuid,
            address: String::new(),
            port: options.port,
            rest_path: normalize_rest_path(&options.rest_path),
            require_tls: options.require_tls,
            reflected_public: String::new(),
            reflected_private: String::new(),
            send_secret: String::new(),
            last_online: 0,
            last_sync: 0,
            retry_count: 0,
            retry_username: String::new(),
            retry_password: String::new(),
        }
    }

    /// Derived lifecycle state under the given sync-mode threshold.
    pub fn state(&self, retry_threshold: u32) -> PeerState {
        if self.send_secret.is_empty() {
            PeerState::Registered
        } else if self.retry_count >= retry_threshold {
            PeerState::Syncing
        } else {
            PeerState::Online
        }
    }

    /// Stores a reflected source address, already trimmed of its port.
    ///
    /// Exactly one of the two reflection fields is nonempty afterwards,
    /// chosen by the private-range classifier.
    pub(crate) fn set_reflection(&mut self, trimmed: &str) {
        if is_private_addr(trimmed) {
            self.reflected_private = trimmed.to_string();
            self.reflected_public.clear();
        } else {
            self.reflected_public = trimmed.to_string();
            self.reflected_private.clear();
        }
    }

    /// Drops both reflection fields, called on any transport failure.
    pub(crate) fn clear_reflections(&mut self) {
        self.reflected_public.clear();
        self.reflected_private.clear();
    }

    /// Outbound endpoint snapshot used while no table lock is held.
    pub(crate) fn endpoint(&self) -> PeerEndpoint {
        PeerEndpoint {
            address: self.address.clone(),
            port: self.port,
            rest_path: self.rest_path.clone(),
            require_tls: self.require_tls,
        }
    }
}

/// Enough of a peer record to compose a request URL without holding the
/// table lock across network I/O.
#[derive(Debug, Clone)]
pub(crate) struct PeerEndpoint {
    pub address: String,
    pub port: u16,
    pub rest_path: String,
    pub require_tls: bool,
}

impl PeerEndpoint {
    /// Request URL for one of the router operations (`c`, `h` or `s`).
    ///
    /// The scheme and authority are assembled directly; only `rest_path`
    /// has been through the path normalizer, so the `//` of the scheme can
    /// never be collapsed by cleanup.
    pub fn url(&self, opr: char) -> String {
        let scheme = if self.require_tls { "https" } else { "http" };
        format!(
            "{}://{}:{}{}?opr={}",
            scheme, self.address, self.port, self.rest_path, opr
        )
    }
}
