//! Process-level settings, fixed for the lifetime of a run.

use serde::{Deserialize, Serialize};

/// How PortMan registers itself with the JACK server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JackConfig {
    /// Client name registered with the server.
    #[serde(default = "JackConfig::default_client_name")]
    pub client_name: String,

    /// Refuse to start a JACK server when none is running.
    #[serde(default = "JackConfig::default_no_start_server")]
    pub no_start_server: bool,
}

impl JackConfig {
    fn default_client_name() -> String {
        "PortMan".to_string()
    }

    fn default_no_start_server() -> bool {
        true
    }
}

impl Default for JackConfig {
    fn default() -> Self {
        Self {
            client_name: Self::default_client_name(),
            no_start_server: Self::default_no_start_server(),
        }
    }
}

/// Graph-reorder debouncing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet period after the last reorder pulse before bindings are rebuilt.
    #[serde(default = "DebounceConfig::default_settle_ms")]
    pub settle_ms: u64,
}

impl DebounceConfig {
    fn default_settle_ms() -> u64 {
        50
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            settle_ms: Self::default_settle_ms(),
        }
    }
}

/// `tracing` filter used when `RUST_LOG` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Everything outside `[setup]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InfraConfig {
    #[serde(default)]
    pub jack: JackConfig,

    #[serde(default)]
    pub debounce: DebounceConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
