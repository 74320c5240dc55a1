//! `verse-server run` — build the shared-state engine and hand the
//! dispatcher its own thread.
//!
//! Transport acceptance (TCP/TLS/WebSocket listeners feeding decoded
//! commands into per-session inbound queues) is an external collaborator;
//! this function builds everything the dispatcher needs and blocks the
//! calling thread for the server's lifetime. A real deployment spawns
//! transport workers alongside this and wires them to the `SessionStore`
//! this function returns indirectly (via `on_connect`).

use std::sync::Arc;
use std::time::Duration;

use verse_domain::config::{AuthBackend as AuthBackendConfig, Config};
use verse_domain::user::UserDirectory;
use verse_domain::{Error, Result};
use verse_sessions::SessionStore;

use crate::auth::csv::CsvAuthBackend;
use crate::auth::AuthBackend;

/// Build the node store, bootstrap the system skeleton (restoring from
/// persistence first if configured), and run the dispatcher loop until it
/// is asked to shut down. Blocks the calling thread.
pub fn run(config: Arc<Config>) -> Result<()> {
    let directory = load_directory(&config)?;

    let nodes = Arc::new(verse_core::node::NodeStore::new());
    let restored = maybe_restore(&config, &nodes)?;
    if !restored {
        let outcome = verse_core::bootstrap::bootstrap(&nodes, &directory.all());
        tracing::info!(users = outcome.users_attached, "bootstrap: system skeleton built");
    }

    let sessions = Arc::new(SessionStore::new(
        config.limits.max_queue_depth,
        config.limits.flow_control,
    ));

    let mut dispatcher = verse_core::dispatcher::Dispatcher::new(nodes.clone(), sessions.clone(), &config.limits);
    if config.persistence.enabled {
        let docs: Arc<dyn verse_core::persistence::DocumentStore> =
            Arc::new(verse_core::persistence::InMemoryDocumentStore::new());
        dispatcher = dispatcher.with_persistence(docs, Duration::from_millis(config.persistence.flush_interval_ms));
    }
    let dispatcher = Arc::new(dispatcher);

    tracing::info!(
        tcp_port = config.transport.tcp_port,
        ws_port = config.transport.ws_port,
        "verse-server ready; awaiting transport-layer connections"
    );
    dispatcher.run();
    Ok(())
}

fn load_directory(config: &Config) -> Result<verse_domain::user::StaticUserDirectory> {
    match &config.auth.backend {
        AuthBackendConfig::Csv { path } => {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("auth.backend.path is empty".into()));
            }
            Ok(CsvAuthBackend::load(path)?.directory())
        }
        AuthBackendConfig::Static => Ok(verse_domain::user::StaticUserDirectory::default()),
    }
}

fn maybe_restore(config: &Config, nodes: &verse_core::node::NodeStore) -> Result<bool> {
    if !config.persistence.enabled || !config.persistence.restore_on_start {
        return Ok(false);
    }
    // The in-memory document store never has anything to restore across
    // process restarts; a real deployment substitutes a persistent
    // `DocumentStore` implementation here.
    let docs = verse_core::persistence::InMemoryDocumentStore::new();
    match verse_core::persistence::restore(nodes, &docs) {
        Ok(found) => Ok(found),
        Err(e) => {
            tracing::warn!(error = %e, "persistence restore failed, falling back to bootstrap default");
            Ok(false)
        }
    }
}
