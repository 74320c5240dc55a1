mod auth;
mod limits;
mod persistence;
mod transport;

pub use auth::*;
pub use limits::*;
pub use persistence::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Effective server configuration, loaded from TOML by `verse-gateway`:
/// transport ports, auth method, persistence connection string, session
/// and queue limits.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue, surfaced by `verse-server
/// doctor` / `verse-server config validate`.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate port ranges and session/queue limits (ports `1024..=65535`,
    /// UDP range `49152..=65535`) instead of silently clamping them.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let port_range = 1024..=65535u16;
        if !port_range.contains(&self.transport.tcp_port) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "transport.tcp_port".into(),
                message: format!("{} out of range 1024-65535", self.transport.tcp_port),
            });
        }
        if !port_range.contains(&self.transport.ws_port) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "transport.ws_port".into(),
                message: format!("{} out of range 1024-65535", self.transport.ws_port),
            });
        }

        let udp_range = 49152..=65535u16;
        if !udp_range.contains(&self.transport.udp_port_low) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "transport.udp_port_low".into(),
                message: format!(
                    "{} out of range 49152-65535",
                    self.transport.udp_port_low
                ),
            });
        }
        if !udp_range.contains(&self.transport.udp_port_high) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "transport.udp_port_high".into(),
                message: format!(
                    "{} out of range 49152-65535",
                    self.transport.udp_port_high
                ),
            });
        }
        if self.transport.udp_port_low > self.transport.udp_port_high {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "transport.udp_port_low".into(),
                message: "udp_port_low is greater than udp_port_high".into(),
            });
        }

        if self.limits.max_sessions == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "limits.max_sessions".into(),
                message: "max_sessions is 0; no client will ever be able to connect".into(),
            });
        }

        if let AuthBackend::Csv { path } = &self.auth.backend {
            if path.as_os_str().is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "auth.backend.path".into(),
                    message: "csv auth backend configured with an empty path".into(),
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_clean_except_empty_csv_path() {
        let cfg = Config::default();
        let issues = cfg.validate();
        // Default auth backend is Csv with an empty path; every port/limit
        // default is in range so that should be the only issue.
        assert_eq!(issues.len(), 1, "{issues:?}");
        assert_eq!(issues[0].severity, ConfigSeverity::Error);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let rendered = toml::to_string(&cfg).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(cfg.transport.tcp_port, parsed.transport.tcp_port);
    }
}
