//! Session bootstrap: the credential handshake that establishes pairwise
//! trust and hands out one-time-code secrets.
//!
//! The initiator posts its credentials to the peer's `connect` operation
//! and stores the issued secret as its send secret. The responder checks
//! the credentials against the injected validator, issues one fresh receive
//! secret and reflects the observed request source. A repeat handshake for
//! the same remote UUID destructively replaces the previous secret, so the
//! earlier session is implicitly invalidated.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::addr::trim_port;
use crate::error::{Result, RouterError};
use crate::router::ServiceRouter;
use crate::totp;
use crate::wire::{ConnectRequest, ConnectResponse};

impl ServiceRouter {
    /// Initiator side of the handshake.
    ///
    /// The target must already be registered; `init_addr` is used as its
    /// bootstrap address and becomes the stored address on success. The
    /// credentials are retained on the record so a later 401 during a
    /// probe can trigger a silent re-handshake.
    ///
    /// Returns the secret the peer issued.
    pub async fn start_session(
        &self,
        uuid: &str,
        init_addr: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        if self.validator().is_none() {
            return Err(RouterError::NoValidator);
        }

        let endpoint = {
            let mut table = self.table.write();
            let peer = table
                .get_mut(uuid)
                .ok_or_else(|| RouterError::NotFound(uuid.trim().to_string()))?;
            peer.address = init_addr.to_string();
            peer.endpoint()
        };

        let request = ConnectRequest {
            node_uuid: self.config.device_uuid.clone(),
            username: username.to_string(),
            password: password.to_string(),
        };
        let payload = self.client.connect(&endpoint, &request).await?;

        let reflected = trim_port(&payload.reflection_ip).to_string();
        {
            let mut table = self.table.write();
            let peer = table
                .get_mut(uuid)
                .ok_or_else(|| RouterError::NotFound(uuid.trim().to_string()))?;
            peer.send_secret = payload.totp_secret.clone();
            peer.set_reflection(&reflected);
            peer.retry_count = 0;
            peer.retry_username = username.to_string();
            peer.retry_password = password.to_string();
        }

        info!(
            device = %self.config.device_uuid,
            peer = %uuid,
            reflected = %reflected,
            "session established"
        );
        Ok(payload.totp_secret)
    }

    /// Responder side of the handshake.
    ///
    /// `source` is the transport-observed request source; its `host:port`
    /// form is echoed back as the reflection.
    pub fn handle_connect(
        &self,
        source: SocketAddr,
        request: &ConnectRequest,
    ) -> Result<ConnectResponse> {
        let validator = self.validator().ok_or(RouterError::NoValidator)?;
        if !validator(&request.username, &request.password) {
            warn!(
                device = %self.config.device_uuid,
                remote = %request.node_uuid,
                "handshake rejected: bad credentials"
            );
            return Err(RouterError::Unauthorized);
        }

        let secret = totp::random_secret(self.config.issued_secret_length);
        self.table
            .write()
            .replace_issued_secret(&request.node_uuid, secret.clone());

        debug!(
            device = %self.config.device_uuid,
            remote = %request.node_uuid,
            "issued fresh receive secret"
        );
        Ok(ConnectResponse {
            totp_secret: secret,
            reflection_ip: source.to_string(),
        })
    }

    /// Drops this router's issued secret for a peer.
    ///
    /// The remote is not notified; its stale send secret is rejected on
    /// its next probe and cleaned up by the silent re-handshake path.
    pub fn end_session(&self, uuid: &str) -> Result<()> {
        self.table.write().remove_issued_secret(uuid)?;
        debug!(device = %self.config.device_uuid, peer = %uuid, "session ended");
        Ok(())
    }
}
