//! RFC 6455 WebSocket handshake accept-key computation.
//!
//! `sha1(client_key + GUID)`, base64-encoded. Full HTTP upgrade framing
//! and socket handling are transport concerns out of scope; this is the
//! one pure, testable piece of the handshake.

use base64::Engine;
use sha1::{Digest, Sha1};

/// The magic GUID RFC 6455 defines for the `Sec-WebSocket-Accept` digest.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Subprotocol this server advertises during the upgrade handshake.
pub const SUBPROTOCOL: &str = "v1.verse.tul.cz";

/// Compute `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`
/// header value.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rfc6455_worked_example() {
        // The exact key/accept pair from RFC 6455 §1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
