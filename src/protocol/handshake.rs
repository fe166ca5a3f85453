//! Handshake data carried by the initial `open` packet.

use serde::{Deserialize, Serialize};

use crate::identifiers::Sid;

/// Session parameters announced to the client.
///
/// # Format
///
/// ```json
/// {
///   "sid": "lv_VI97HAXpY6yYWAAAC",
///   "upgrades": ["websocket"],
///   "pingInterval": 25000,
///   "pingTimeout": 20000,
///   "maxPayload": 100000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeData {
    /// Session id.
    pub sid: Sid,

    /// Transports the client may upgrade to.
    pub upgrades: Vec<String>,

    /// Heartbeat interval in milliseconds.
    pub ping_interval: u64,

    /// Heartbeat timeout in milliseconds.
    pub ping_timeout: u64,

    /// Largest accepted payload in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case() {
        let data = HandshakeData {
            sid: Sid::from("abc"),
            upgrades: vec!["websocket".into()],
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: Some(100_000),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(
            json,
            r#"{"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":100000}"#
        );
    }

    #[test]
    fn test_omits_missing_max_payload() {
        let data = HandshakeData {
            sid: Sid::from("abc"),
            upgrades: vec![],
            ping_interval: 1,
            ping_timeout: 2,
            max_payload: None,
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(!json.contains("maxPayload"));
    }
}
