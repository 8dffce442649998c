//! Wire payloads for the three router operations.
//!
//! All three operations share one HTTP endpoint distinguished by the `opr`
//! query parameter: `c` connect, `h` heartbeat, `s` sync. Requests are JSON;
//! the connect response is JSON, heartbeat and sync answer plain text. Field
//! names are part of the protocol and must not change casing.

use serde::{Deserialize, Serialize};

/// Credential exchange sent by the session initiator (`?opr=c`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// UUID of the initiating node.
    #[serde(rename = "NodeUUID")]
    pub node_uuid: String,
    /// Account name checked by the responder's credential validator.
    #[serde(rename = "Username")]
    pub username: String,
    /// Account password checked by the responder's credential validator.
    #[serde(rename = "Password")]
    pub password: String,
}

/// Successful connect answer: the freshly issued receive secret plus the
/// source address the responder observed for the initiator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Base32 secret the initiator must sign future probes with.
    #[serde(rename = "TOTPSecret")]
    pub totp_secret: String,
    /// `host:port` literal of the observed request source.
    #[serde(rename = "ReflectionIP")]
    pub reflection_ip: String,
}

/// Periodic probe sent to every registered peer (`?opr=h`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// UUID of the probing node.
    #[serde(rename = "NodeUUID")]
    pub node_uuid: String,
    /// Current one-time code under the secret the responder issued.
    #[serde(rename = "TOTP")]
    pub totp: String,
    /// The prober's current view of its own address.
    #[serde(rename = "IPADDR")]
    pub ipaddr: String,
}

/// Address query for a peer that stopped answering direct probes (`?opr=s`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// UUID of the requesting node.
    #[serde(rename = "NodeUUID")]
    pub node_uuid: String,
    /// Current one-time code under the secret the responder issued.
    #[serde(rename = "TOTP")]
    pub totp: String,
    /// UUID of the lost peer whose address is being asked for.
    #[serde(rename = "AskingUUID")]
    pub asking_uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_field_names() {
        let req = ConnectRequest {
            node_uuid: "a".into(),
            username: "user".into(),
            password: "123456".into(),
        };
        let js = serde_json::to_value(&req).expect("encode");
        assert_eq!(js["NodeUUID"], "a");
        assert_eq!(js["Username"], "user");
        assert_eq!(js["Password"], "123456");
    }

    #[test]
    fn test_connect_response_field_names() {
        let resp: ConnectResponse = serde_json::from_str(
            r#"{"TOTPSecret":"JBSWY3DP","ReflectionIP":"192.0.2.7:31544"}"#,
        )
        .expect("decode");
        assert_eq!(resp.totp_secret, "JBSWY3DP");
        assert_eq!(resp.reflection_ip, "192.0.2.7:31544");
    }

    #[test]
    fn test_heartbeat_request_field_names() {
        let js = serde_json::to_value(HeartbeatRequest {
            node_uuid: "a".into(),
            totp: "000000".into(),
            ipaddr: "198.51.100.4".into(),
        })
        .expect("encode");
        assert_eq!(js["NodeUUID"], "a");
        assert_eq!(js["TOTP"], "000000");
        assert_eq!(js["IPADDR"], "198.51.100.4");
    }

    #[test]
    fn test_sync_request_round_trip() {
        let req = SyncRequest {
            node_uuid: "a".into(),
            totp: "123456".into(),
            asking_uuid: "b".into(),
        };
        let encoded = serde_json::to_string(&req).expect("encode");
        assert!(encoded.contains("AskingUUID"));
        let back: SyncRequest = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(back.asking_uuid, "b");
    }
}
