use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport config
//
// Transport framing itself (TCP/UDP/WebSocket accept loops, TLS handshake)
// is an external collaborator, not part of this workspace. This struct only
// carries the bind addresses and certificate paths a transport adapter
// needs: tcp/ws/udp ports and an optional certificate/private-key pair.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub bind_address: String,

    #[serde(default = "d_tcp_port")]
    pub tcp_port: u16,

    #[serde(default = "d_ws_port")]
    pub ws_port: u16,

    #[serde(default = "d_udp_port_low")]
    pub udp_port_low: u16,

    #[serde(default = "d_udp_port_high")]
    pub udp_port_high: u16,

    /// TLS is opt-in; when unset the server speaks plaintext. Encryption is
    /// out of scope for the command/subscription core, but the config
    /// surface still needs somewhere for a transport adapter to read a cert
    /// pair from.
    #[serde(default)]
    pub certificate_file: Option<PathBuf>,

    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: d_bind_address(),
            tcp_port: d_tcp_port(),
            ws_port: d_ws_port(),
            udp_port_low: d_udp_port_low(),
            udp_port_high: d_udp_port_high(),
            certificate_file: None,
            private_key_file: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────
fn d_bind_address() -> String {
    "0.0.0.0".into()
}
fn d_tcp_port() -> u16 {
    4950
}
fn d_ws_port() -> u16 {
    8080
}
fn d_udp_port_low() -> u16 {
    49152
}
fn d_udp_port_high() -> u16 {
    49352
}
