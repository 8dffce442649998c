//! Heartbeat engine: the periodic probe loop that drives self-address
//! discovery.
//!
//! ## Cycle shape
//!
//! 1. Probe every registered peer in registration order. A peer whose
//!    retry counter has crossed the threshold is handed to sync recovery
//!    instead of being probed directly.
//! 2. Vote the self-address from the reflections as they stand after the
//!    probe pass: plurality among public reflections first, private ones
//!    as the fallback, ties broken toward the earliest-registered peer.
//! 3. On a real change of the voted address, stamp the change time and
//!    invoke the listener exactly once.
//! 4. Stamp cycle completion.
//!
//! ## Probe outcome policy
//!
//! | Outcome          | Reflections | Retry counter | Follow-up            |
//! |------------------|-------------|---------------|----------------------|
//! | 200              | updated     | reset to 0    | none                 |
//! | transport error  | cleared     | incremented   | sync past threshold  |
//! | 401              | untouched   | untouched     | silent re-handshake  |
//! | other non-2xx    | cleared     | untouched     | logged as declined   |
//!
//! A persistent decline is a configuration problem, not a liveness
//! problem, so it never pushes a peer into sync recovery.
//!
//! At most one loop runs per router; starting again replaces the running
//! loop. Stopping is cooperative and lets the in-flight cycle finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::addr::trim_port;
use crate::client::ProbeReply;
use crate::error::{Result, RouterError};
use crate::now_unix;
use crate::router::{HeartbeatHandle, ServiceRouter};
use crate::totp;
use crate::wire::HeartbeatRequest;

/// Sentinel for "no reflection available"; never fires the change listener.
pub(crate) const UNKNOWN_ADDR: &str = "0.0.0.0";

impl ServiceRouter {
    // ────────────────────────────────────────────────────────────────
    // LOOP CONTROL
    // ────────────────────────────────────────────────────────────────

    /// Starts the heartbeat loop, replacing a running one.
    ///
    /// The first cycle executes synchronously before the ticker task is
    /// spawned, so callers observe a populated table on return.
    pub async fn start_heartbeat(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.effective_interval() as u64);
        if let Some(previous) = self.heartbeat.lock().take() {
            info!(device = %self.config.device_uuid, "replacing running heartbeat loop");
            previous.shutdown.notify_one();
        }

        self.run_heartbeat_cycle().await;

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn({
            let router = Arc::clone(&self);
            let shutdown = Arc::clone(&shutdown);
            async move {
                let start = tokio::time::Instant::now() + period;
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => router.run_heartbeat_cycle().await,
                        _ = shutdown.notified() => break,
                    }
                }
                debug!(device = %router.config.device_uuid, "heartbeat loop exited");
            }
        });
        *self.heartbeat.lock() = Some(HeartbeatHandle { shutdown, task });
    }

    /// Signals the heartbeat loop to stop after its current cycle.
    pub fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.shutdown.notify_one();
        }
    }

    /// Whether a heartbeat loop is currently installed.
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.lock().is_some()
    }

    // ────────────────────────────────────────────────────────────────
    // CYCLE
    // ────────────────────────────────────────────────────────────────

    /// Executes one full heartbeat cycle. Also callable directly, for
    /// hosts that schedule cycles themselves.
    pub async fn run_heartbeat_cycle(&self) {
        // Snapshot the UUID list so the table lock is never held across
        // the probes.
        let neighbours = self.table.read().neighbours();
        for uuid in neighbours {
            match self.probe_peer(&uuid).await {
                Ok(()) => {}
                // Orphan mode already logged inside sync recovery.
                Err(RouterError::Orphan) => {}
                Err(err) => {
                    warn!(
                        device = %self.config.device_uuid,
                        peer = %uuid,
                        error = %err,
                        "probe failed"
                    );
                }
            }
        }

        let reflections: Vec<(String, String)> = {
            let table = self.table.read();
            table
                .peers
                .iter()
                .map(|p| (p.reflected_public.clone(), p.reflected_private.clone()))
                .collect()
        };
        let (public, private) = vote_self_address(&reflections);
        let voted = if public != UNKNOWN_ADDR { public } else { private };

        let now = now_unix();
        let fire = {
            let mut status = self.status.write();
            let changed = voted != UNKNOWN_ADDR && voted != status.self_address;
            status.self_address = voted.clone();
            status.last_cycle_at = now;
            if changed {
                status.last_address_change = now;
            }
            changed
        };
        if fire {
            info!(
                device = %self.config.device_uuid,
                address = %voted,
                "self-address changed"
            );
            // Invoked outside the status lock; the listener contract is
            // fast and non-blocking.
            if let Some(listener) = self.listener.read().clone() {
                listener(&voted);
            }
        }
    }

    /// One-shot probe of a single peer, outside any cycle.
    pub async fn heartbeat_to_peer(&self, uuid: &str) -> Result<()> {
        self.probe_peer(uuid).await
    }

    // ────────────────────────────────────────────────────────────────
    // PROBE
    // ────────────────────────────────────────────────────────────────

    /// Probes one peer and applies the outcome policy documented above.
    async fn probe_peer(&self, uuid: &str) -> Result<()> {
        let snapshot = {
            let mut table = self.table.write();
            let peer = table
                .get_mut(uuid)
                .ok_or_else(|| RouterError::NotFound(uuid.trim().to_string()))?;
            if peer.retry_count >= self.config.retry_threshold {
                None
            } else {
                peer.last_sync = now_unix();
                Some((peer.endpoint(), peer.send_secret.clone()))
            }
        };
        let (endpoint, send_secret) = match snapshot {
            // Past the threshold direct probing stops; a third peer is
            // asked for the lost peer's address instead.
            None => return self.sync_peer_address(uuid).await,
            Some(parts) => parts,
        };
        if send_secret.is_empty() {
            return Err(RouterError::NoSession(uuid.trim().to_string()));
        }

        let code = totp::code_at(&send_secret, now_unix())
            .ok_or_else(|| RouterError::Malformed("send secret is not valid base32".into()))?;
        let request = HeartbeatRequest {
            node_uuid: self.config.device_uuid.clone(),
            totp: code,
            ipaddr: self.self_address(),
        };

        match self.client.heartbeat(&endpoint, &request).await {
            Err(err) => {
                let mut table = self.table.write();
                if let Some(peer) = table.get_mut(uuid) {
                    peer.clear_reflections();
                    peer.retry_count += 1;
                }
                Err(err)
            }
            Ok(ProbeReply::Unauthenticated) => self.rehandshake(uuid).await,
            Ok(ProbeReply::Declined { status, body }) => {
                if let Some(peer) = self.table.write().get_mut(uuid) {
                    peer.clear_reflections();
                }
                Err(RouterError::Declined { status, body })
            }
            Ok(ProbeReply::Reflected(source)) => {
                let trimmed = trim_port(source.trim()).to_string();
                let mut table = self.table.write();
                if let Some(peer) = table.get_mut(uuid) {
                    peer.set_reflection(&trimmed);
                    peer.last_online = peer.last_sync;
                    peer.retry_count = 0;
                }
                debug!(
                    device = %self.config.device_uuid,
                    peer = %uuid,
                    reflected = %trimmed,
                    "probe ok"
                );
                Ok(())
            }
        }
    }

    /// Replays the handshake with the retained credentials after the
    /// remote answered 401. Not counted against the retry counter.
    async fn rehandshake(&self, uuid: &str) -> Result<()> {
        let (address, username, password) = {
            let table = self.table.read();
            let peer = table
                .get(uuid)
                .ok_or_else(|| RouterError::NotFound(uuid.trim().to_string()))?;
            (
                peer.address.clone(),
                peer.retry_username.clone(),
                peer.retry_password.clone(),
            )
        };
        if username.is_empty() && password.is_empty() {
            return Err(RouterError::Unauthorized);
        }
        info!(
            device = %self.config.device_uuid,
            peer = %uuid,
            "remote dropped our session; re-handshaking"
        );
        self.start_session(uuid, &address, &username, &password)
            .await
            .map(|_| ())
    }

    // ────────────────────────────────────────────────────────────────
    // RESPONDER
    // ────────────────────────────────────────────────────────────────

    /// Answers an inbound probe.
    ///
    /// The observed transport source, not the address claimed in the
    /// payload, becomes the stored address for the probing peer; the same
    /// literal (with port) is echoed back as the reflection.
    pub fn handle_heartbeat(
        &self,
        source: std::net::SocketAddr,
        request: &HeartbeatRequest,
    ) -> Result<String> {
        let secret = self
            .table
            .read()
            .issued_secret_for(&request.node_uuid)
            .map(str::to_string)
            .ok_or(RouterError::Unauthorized)?;
        if !totp::verify_at(&secret, &request.totp, now_unix()) {
            return Err(RouterError::InvalidTotp);
        }

        let observed = source.to_string();
        let trimmed = trim_port(&observed).to_string();
        {
            let mut table = self.table.write();
            // A secret without a matching peer record means registration
            // was torn down out from under the session.
            let peer = table
                .get_mut(&request.node_uuid)
                .ok_or(RouterError::Unauthorized)?;
            peer.address = trimmed.clone();
        }
        debug!(
            device = %self.config.device_uuid,
            peer = %request.node_uuid,
            claimed = %request.ipaddr,
            observed = %observed,
            "heartbeat received"
        );
        Ok(observed)
    }
}

// ════════════════════════════════════════════════════════════════════════
// SELF-ADDRESS VOTE
// ════════════════════════════════════════════════════════════════════════

/// Votes `(public, private)` winners over a reflection snapshot taken in
/// registration order. Pure; either slot is [`UNKNOWN_ADDR`] when no peer
/// contributed a value for it.
pub(crate) fn vote_self_address(reflections: &[(String, String)]) -> (String, String) {
    (
        plurality(reflections.iter().map(|r| r.0.as_str())),
        plurality(reflections.iter().map(|r| r.1.as_str())),
    )
}

/// First value reaching the highest occurrence count, in input order.
fn plurality<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values.filter(|v| !v.is_empty()) {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut winner: Option<(&str, usize)> = None;
    for (value, count) in counts {
        match winner {
            Some((_, best)) if count <= best => {}
            _ => winner = Some((value, count)),
        }
    }
    winner
        .map(|(value, _)| value.to_string())
        .unwrap_or_else(|| UNKNOWN_ADDR.to_string())
}
