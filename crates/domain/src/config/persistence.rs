use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence config
//
// The projection to a document store is optional; when `enabled` is
// false the server runs purely in-memory and `verse-core` never
// constructs a `DocumentStore`.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Opaque connection string for whichever `DocumentStore` impl is
    /// wired up at startup (the in-memory one for tests ignores it).
    #[serde(default)]
    pub connection_string: String,

    #[serde(default)]
    pub database_name: String,

    /// How often a dirty saveable node/tag-group/layer version is flushed.
    #[serde(default = "d_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Load persisted documents back into the graph at startup.
    #[serde(default = "d_restore_on_start")]
    pub restore_on_start: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connection_string: String::new(),
            database_name: String::new(),
            flush_interval_ms: d_flush_interval_ms(),
            restore_on_start: d_restore_on_start(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────
fn d_flush_interval_ms() -> u64 {
    5_000
}
fn d_restore_on_start() -> bool {
    true
}
