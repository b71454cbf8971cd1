//! The engine.io handshake record carried by the server's Open frame.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SocketError};

/// Content of the server's Open frame payload.
///
/// Unknown JSON keys are tolerated; missing intervals mean "keep the
/// current defaults".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Opaque server-assigned session identifier. Never empty.
    pub sid: String,
    /// Transport names the server is willing to upgrade to, in server
    /// preference order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrades: Vec<String>,
    /// Server-advised heartbeat interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_interval: Option<u64>,
    /// Server-advised heartbeat timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_timeout: Option<u64>,
}

impl Handshake {
    /// Parse an Open frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Handshake`] when the payload is not JSON
    /// or carries an empty `sid`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let handshake: Handshake = serde_json::from_slice(data)
            .map_err(|e| SocketError::Handshake(format!("invalid handshake JSON: {e}")))?;
        if handshake.sid.is_empty() {
            return Err(SocketError::Handshake("no sid".into()));
        }
        Ok(handshake)
    }
}
