use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SdkVersion;

/// The lowest server protocol version this SDK release knows how to speak
/// to. Checked against [`ServerHello::outrigversion`] before the client
/// commits to sending `apprunid`/`mode`, so an incompatible monitor is
/// rejected without ever exchanging application data.
pub const MIN_REQUIRED_SERVER_VERSION: SdkVersion = SdkVersion::new(0, 1, 0);

/// The first line a server sends, before the client commits to anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    pub outrigversion: SdkVersion,
}

/// Which stream a connection carries. `Log` is reserved for a future
/// dedicated log-shipping connection; today's SDK always negotiates
/// `Packet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnMode {
    Packet,
    Log,
}

/// The client's handshake line, sent after validating [`ServerHello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHandshake {
    pub outrigsdk: SdkVersion,
    pub mode: ConnMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apprunid: Option<Uuid>,
}

impl ClientHandshake {
    /// `^[A-Za-z0-9.+_/:-]+$`, per the handshake's submode grammar.
    pub fn validate_submode(submode: &str) -> bool {
        !submode.is_empty()
            && submode
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b".+_/:-".contains(&b))
    }
}

/// The monitor's reply. `success = false` means the connection will be
/// closed immediately after this line; `error` explains why so the SDK can
/// decide whether to keep retrying (a version mismatch is permanent, an
/// over-capacity rejection is transient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHandshake {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverhttpport: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submode_grammar_accepts_typical_values() {
        assert!(ClientHandshake::validate_submode("worker-pool.1_2/3:4+5"));
    }

    #[test]
    fn submode_grammar_rejects_empty_and_odd_chars() {
        assert!(!ClientHandshake::validate_submode(""));
        assert!(!ClientHandshake::validate_submode("has space"));
        assert!(!ClientHandshake::validate_submode("emoji\u{1F389}"));
    }
}
