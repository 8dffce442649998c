//! Outbound HTTP client for peer operations.
//!
//! One shared `reqwest::Client` per router, built with the protocol's
//! 5-second request timeout. Every method releases no locks and touches no
//! router state: callers snapshot the endpoint first and apply results to
//! the table afterwards.

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{Result, RouterError};
use crate::peer::PeerEndpoint;
use crate::wire::{ConnectRequest, ConnectResponse, HeartbeatRequest, SyncRequest};

/// Outbound request timeout mandated by the heartbeat contract.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a heartbeat probe, separated so the engine can apply the
/// three different policies: escalate, re-handshake or log-and-clear.
#[derive(Debug)]
pub(crate) enum ProbeReply {
    /// 200: the remote's view of our source as a `host:port` literal.
    Reflected(String),
    /// 401: the remote no longer holds a secret for us.
    Unauthenticated,
    /// Any other non-success status.
    Declined { status: u16, body: String },
}

/// Thin wrapper around a pooled HTTP client.
#[derive(Debug, Clone)]
pub(crate) struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self { http }
    }

    /// POSTs a credential handshake to the peer's `connect` operation.
    pub async fn connect(
        &self,
        endpoint: &PeerEndpoint,
        request: &ConnectRequest,
    ) -> Result<ConnectResponse> {
        let url = endpoint.url('c');
        let resp = self.http.post(&url).json(request).send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(RouterError::Unauthorized);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RouterError::Declined {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| RouterError::Malformed(format!("connect response: {e}")))
    }

    /// POSTs a heartbeat probe. Transport errors surface as `Err`; every
    /// received status becomes a [`ProbeReply`].
    pub async fn heartbeat(
        &self,
        endpoint: &PeerEndpoint,
        request: &HeartbeatRequest,
    ) -> Result<ProbeReply> {
        let url = endpoint.url('h');
        let resp = self.http.post(&url).json(request).send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Ok(ProbeReply::Unauthenticated);
        }
        let body = resp.text().await?;
        if status.is_success() {
            Ok(ProbeReply::Reflected(body))
        } else {
            Ok(ProbeReply::Declined {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// POSTs an address query for a lost peer to a reachable third peer.
    pub async fn sync(&self, endpoint: &PeerEndpoint, request: &SyncRequest) -> Result<String> {
        let url = endpoint.url('s');
        let resp = self.http.post(&url).json(request).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RouterError::Declined {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
