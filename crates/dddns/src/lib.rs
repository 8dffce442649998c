//! # dddns
//!
//! Peer-to-peer dynamic DNS overlay for clusters whose members sit behind
//! changing public addresses. Every node runs the same agent: it probes its
//! registered peers on a fixed interval, treats each peer's view of the
//! probe's source address as a reflection of its own address, votes a
//! single self-address from those reflections and falls back to asking a
//! third peer when a peer stops answering directly.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── ServiceRouter ───────────────────────────┐
//! │                                                                      │
//! │  heartbeat loop ──▶ probe peers ──▶ vote self-address ──▶ listener   │
//! │        │                 │                                           │
//! │        │          retry ≥ threshold                                  │
//! │        │                 ▼                                           │
//! │        │          sync recovery (ask a third peer)                   │
//! │        │                                                             │
//! │  peer table + issued secrets (one lock, released across I/O)         │
//! │                                                                      │
//! │  HTTP endpoint  ?opr=c │ ?opr=h │ ?opr=s   (axum dispatcher)         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Trust between two peers is a pair of TOTP secrets, one per direction,
//! established by a credential handshake against a host-supplied validator.
//! The router state round-trips through JSON; the validator and the
//! address-change listener are behavior and must be re-injected after a
//! load.

pub mod addr;
pub mod config;
pub mod error;
pub mod handlers;
pub mod peer;
pub mod table;
pub mod totp;
pub mod wire;

mod client;
mod heartbeat;
mod persist;
mod router;
mod session;
mod sync;

pub use config::RouterConfig;
pub use error::{Result, RouterError};
pub use peer::{PeerOptions, PeerRecord, PeerState};
pub use router::{AddressChangeListener, CredentialValidator, ServiceRouter};
pub use table::{IssuedSecret, PeerTable};

/// Current UNIX time in whole seconds.
pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
