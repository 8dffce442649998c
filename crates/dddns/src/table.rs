//! Peer table and issued-secret table.
//!
//! Both tables keep insertion order: the heartbeat cycle probes peers in
//! registration order and the self-address vote breaks ties the same way.
//! UUID comparison trims surrounding whitespace on both sides before the
//! byte compare.
//!
//! The table itself is not synchronized; the owning router wraps it in a
//! lock and releases that lock across all network I/O.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::peer::PeerRecord;

/// A receive secret this router issued to one remote node.
///
/// At most one entry exists per remote UUID; a repeat handshake replaces
/// the previous secret destructively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedSecret {
    /// UUID of the remote the secret was issued to.
    pub remote_uuid: String,
    /// Base32 secret the remote signs its probes with.
    pub recv_secret: String,
}

/// UUID equality as used everywhere in the router: trim, then byte compare.
pub(crate) fn uuid_eq(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

/// In-memory mapping from peer UUID to peer record plus the receive-side
/// secrets this node has issued.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerTable {
    /// Registered peers in insertion order.
    pub(crate) peers: Vec<PeerRecord>,
    /// Issued receive secrets, at most one per remote UUID.
    pub(crate) issued: Vec<IssuedSecret>,
}

impl PeerTable {
    /// Appends a peer, rejecting duplicates by trimmed UUID.
    pub fn register(&mut self, peer: PeerRecord) -> Result<()> {
        if self.contains(&peer.uuid) {
            return Err(RouterError::AlreadyRegistered(peer.uuid));
        }
        self.peers.push(peer);
        Ok(())
    }

    /// Removes a peer and cascades into the issued-secret table so no
    /// entry keyed by the UUID survives.
    pub fn unregister(&mut self, uuid: &str) -> Result<()> {
        if !self.contains(uuid) {
            return Err(RouterError::NotFound(uuid.trim().to_string()));
        }
        self.peers.retain(|p| !uuid_eq(&p.uuid, uuid));
        self.issued.retain(|s| !uuid_eq(&s.remote_uuid, uuid));
        Ok(())
    }

    /// Whether a peer with this UUID is registered.
    pub fn contains(&self, uuid: &str) -> bool {
        self.peers.iter().any(|p| uuid_eq(&p.uuid, uuid))
    }

    /// Shared borrow of a peer record.
    pub fn get(&self, uuid: &str) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| uuid_eq(&p.uuid, uuid))
    }

    /// Mutable borrow of a peer record.
    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut PeerRecord> {
        self.peers.iter_mut().find(|p| uuid_eq(&p.uuid, uuid))
    }

    /// Registered peer UUIDs in insertion order.
    pub fn neighbours(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.uuid.clone()).collect()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the table holds no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Whether a receive secret has been issued to this UUID.
    pub fn has_session(&self, uuid: &str) -> bool {
        self.issued_secret_for(uuid).is_some()
    }

    /// The receive secret issued to this UUID, if any.
    pub fn issued_secret_for(&self, uuid: &str) -> Option<&str> {
        self.issued
            .iter()
            .find(|s| uuid_eq(&s.remote_uuid, uuid))
            .map(|s| s.recv_secret.as_str())
    }

    /// Issues a secret to a remote, destructively replacing any previous
    /// entry for the same UUID.
    pub fn replace_issued_secret(&mut self, remote_uuid: &str, recv_secret: String) {
        self.issued.retain(|s| !uuid_eq(&s.remote_uuid, remote_uuid));
        self.issued.push(IssuedSecret {
            remote_uuid: remote_uuid.to_string(),
            recv_secret,
        });
    }

    /// Drops the issued secret for a remote. Errors when none exists.
    pub fn remove_issued_secret(&mut self, remote_uuid: &str) -> Result<()> {
        let before = self.issued.len();
        self.issued.retain(|s| !uuid_eq(&s.remote_uuid, remote_uuid));
        if self.issued.len() == before {
            return Err(RouterError::NoSession(remote_uuid.trim().to_string()));
        }
        Ok(())
    }

    /// All issued `(remote_uuid, recv_secret)` pairs, for diagnostics.
    pub fn issued_secrets(&self) -> Vec<(String, String)> {
        self.issued
            .iter()
            .map(|s| (s.remote_uuid.clone(), s.recv_secret.clone()))
            .collect()
    }
}
