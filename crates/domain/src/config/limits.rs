use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Limits config
//
// Session ceiling and per-session queue sizing for whichever flow-control
// mode is selected.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControlMode {
    /// Drop the oldest queued command for a session once its outbound
    /// queue is full.
    DropOldest,
    /// Disconnect a session outright once its outbound queue is full.
    Disconnect,
}

impl Default for FlowControlMode {
    fn default() -> Self {
        FlowControlMode::DropOldest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "d_max_sessions")]
    pub max_sessions: u32,

    #[serde(default = "d_max_queue_depth")]
    pub max_queue_depth: usize,

    #[serde(default)]
    pub flow_control: FlowControlMode,

    /// Idle session timeout; sessions that send nothing (not even a
    /// keepalive) for this long are torn down by the dispatcher.
    #[serde(default = "d_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: d_max_sessions(),
            max_queue_depth: d_max_queue_depth(),
            flow_control: FlowControlMode::default(),
            idle_timeout_secs: d_idle_timeout_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────
fn d_max_sessions() -> u32 {
    256
}
fn d_max_queue_depth() -> usize {
    1024
}
fn d_idle_timeout_secs() -> u64 {
    300
}
