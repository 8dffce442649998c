//! Sync recovery: resolving a lost peer's address through a third peer.
//!
//! Direct probing of a peer stops once its retry counter crosses the
//! threshold. From then on each cycle asks one randomly chosen,
//! recently-online peer for the lost peer's last-known address. A reply
//! carrying a new address is adopted and resets the counter; an identical
//! address means the gossip has not reached that peer yet, so the next
//! cycle simply asks again. With no recent peer at all the router is in
//! orphan mode, which is a warning, never a loop failure.
//!
//! Retries cannot grow without bound: a successful sync clears them, and
//! an unsuccessful one leaves them parked at the threshold where only the
//! cheap sync path runs.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::{Result, RouterError};
use crate::now_unix;
use crate::peer::PeerEndpoint;
use crate::router::ServiceRouter;
use crate::table::uuid_eq;
use crate::totp;
use crate::wire::SyncRequest;

impl ServiceRouter {
    /// Asks a random recently-online peer for `uuid`'s current address.
    ///
    /// Candidates are peers other than the lost one, holding an
    /// established session, whose `last_online` falls inside the recency
    /// window of `(threshold - 1) * interval` seconds.
    pub(crate) async fn sync_peer_address(&self, uuid: &str) -> Result<()> {
        let interval = self.config.effective_interval();
        let threshold = i64::from(self.config.retry_threshold);
        let baseline = now_unix() - (threshold - 1) * interval;

        let (lost_address, candidates) = {
            let table = self.table.read();
            let lost = table
                .get(uuid)
                .ok_or_else(|| RouterError::NotFound(uuid.trim().to_string()))?;
            let candidates: Vec<(String, PeerEndpoint, String)> = table
                .peers
                .iter()
                .filter(|p| {
                    !uuid_eq(&p.uuid, uuid)
                        && !p.send_secret.is_empty()
                        && p.last_online > baseline
                })
                .map(|p| (p.uuid.clone(), p.endpoint(), p.send_secret.clone()))
                .collect();
            (lost.address.clone(), candidates)
        };

        if candidates.is_empty() {
            warn!(
                device = %self.config.device_uuid,
                peer = %uuid,
                "no reachable peer to ask; router is in orphan mode"
            );
            return Err(RouterError::Orphan);
        }

        let (candidate_uuid, endpoint, send_secret) = &candidates[pick_index(candidates.len())];
        info!(
            device = %self.config.device_uuid,
            lost = %uuid,
            via = %candidate_uuid,
            "asking third peer for lost peer's address"
        );

        let code = totp::code_at(send_secret, now_unix())
            .ok_or_else(|| RouterError::Malformed("send secret is not valid base32".into()))?;
        let request = SyncRequest {
            node_uuid: self.config.device_uuid.clone(),
            totp: code,
            asking_uuid: uuid.trim().to_string(),
        };
        let body = self.client.sync(endpoint, &request).await?;

        let literal = body.trim();
        let resolved: IpAddr = literal
            .parse()
            .map_err(|_| RouterError::InvalidAddress(literal.to_string()))?;
        let resolved = resolved.to_string();

        if resolved == lost_address {
            // The third peer still holds the address we already failed
            // against; wait one cycle and ask someone else.
            debug!(
                device = %self.config.device_uuid,
                lost = %uuid,
                via = %candidate_uuid,
                "synced address unchanged, waiting for next cycle"
            );
            return Ok(());
        }

        {
            let mut table = self.table.write();
            if let Some(peer) = table.get_mut(uuid) {
                peer.address = resolved.clone();
                peer.retry_count = 0;
            }
        }
        info!(
            device = %self.config.device_uuid,
            lost = %uuid,
            address = %resolved,
            "adopted synced address"
        );
        Ok(())
    }

    /// Responder side: returns this router's stored address for the peer
    /// named in `AskingUUID`.
    pub fn handle_sync(&self, request: &SyncRequest) -> Result<String> {
        let secret = self
            .table
            .read()
            .issued_secret_for(&request.node_uuid)
            .map(str::to_string)
            .ok_or(RouterError::Unauthorized)?;
        if !totp::verify_at(&secret, &request.totp, now_unix()) {
            return Err(RouterError::InvalidTotp);
        }

        let table = self.table.read();
        let subject = table
            .get(&request.asking_uuid)
            .ok_or_else(|| RouterError::UnknownSubject(request.asking_uuid.trim().to_string()))?;
        debug!(
            device = %self.config.device_uuid,
            requester = %request.node_uuid,
            subject = %request.asking_uuid,
            address = %subject.address,
            "answering sync request"
        );
        Ok(subject.address.clone())
    }
}

/// Uniform pick over `0..len`, seeded from the wall clock per call.
/// Two calls within the same millisecond produce the same pick, which is
/// acceptable at the pace membership changes.
fn pick_index(len: usize) -> usize {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    StdRng::seed_from_u64(seed).gen_range(0..len)
}
