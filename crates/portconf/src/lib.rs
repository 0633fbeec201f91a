//! PortMan configuration
//!
//! Two kinds of settings live here. `InfraConfig` covers the process
//! itself (JACK client name, reorder settle window, log level). `SetupConfig`
//! seeds the built-in binding function: which keys sources get, which client
//! is the speaker, and which hardware mixer toggles to add. What actually gets
//! bound is always decided against the live graph.
//!
//! Configuration is read-only; portman never writes it back.
//!
//! ```rust,no_run
//! use portconf::PortmanConfig;
//!
//! let config = PortmanConfig::load().expect("config");
//! assert!(config.infra.debounce.settle_ms > 0);
//! ```
//!
//! Sources, lowest precedence first: compiled defaults,
//! `/etc/portman/config.toml`, `~/.config/portman/config.toml`,
//! `./portman.toml` (or the `--config` path), then `PORTMAN_*` variables.
//!
//! ```toml
//! [jack]
//! client_name = "PortMan"
//! no_start_server = true
//!
//! [debounce]
//! settle_ms = 50
//!
//! [telemetry]
//! log_level = "info"
//!
//! [setup]
//! source_keys = "ZXCVB"
//! speaker = "Built-in Audio Analog Stereo"
//!
//! [[setup.enum_toggle]]
//! key = "Q"
//! card = 1
//! control = "PCM 01"
//! off = "Off"
//! on = "Mix A"
//!
//! [[setup.volume_toggle]]
//! key = "A"
//! card = 1
//! control = "Mix A Input 01"
//! level = 100
//!
//! # Several controls on one key
//! [[setup.bundle_toggle]]
//! key = "S"
//! controls = [
//!     { card = 1, control = "Mix B Input 01", level = 100 },
//!     { card = 1, control = "Mix B Input 02", level = 100 },
//! ]
//!
//! # Exchange two groups; `[[setup.push]]` copies `from` onto `to` instead
//! [[setup.swap]]
//! key = "D"
//! from = [{ card = 1, control = "PCM 01", off = "Off", on = "Mix A" }]
//! to = [{ card = 1, control = "PCM 02", off = "Off", on = "Mix A" }]
//! ```

pub mod infra;
pub mod loader;
pub mod setup;

pub use infra::{DebounceConfig, InfraConfig, JackConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use setup::{BundleToggle, EnumToggle, MixerSetting, PairToggle, SetupConfig, VolumeToggle};

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PortmanConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub setup: SetupConfig,
}

fn quoted(s: &str) -> toml::Value {
    toml::Value::String(s.to_string())
}

fn inline_setting(setting: &MixerSetting) -> String {
    match setting {
        MixerSetting::Enum { card, control, off, on } => format!(
            "{{ card = {}, control = {}, off = {}, on = {} }}",
            card,
            quoted(control),
            quoted(off),
            quoted(on)
        ),
        MixerSetting::Volume { card, control, level } => format!(
            "{{ card = {}, control = {}, level = {} }}",
            card,
            quoted(control),
            level
        ),
    }
}

fn write_group(out: &mut String, name: &str, group: &[MixerSetting]) {
    let _ = writeln!(out, "{} = [", name);
    for setting in group {
        let _ = writeln!(out, "    {},", inline_setting(setting));
    }
    let _ = writeln!(out, "]");
}

impl PortmanConfig {
    /// Defaults, then every discovered file, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like `load`, with `config_path` standing in for `./portman.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_sources_from(config_path).map(|(config, _)| config)
    }

    /// Like `load_from`, also reporting which files and variables were used.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = Self::default();
        for file in discover_config_files_with_override(config_path) {
            merged = loader::merge_configs(merged, loader::load_from_file(&file)?);
            sources.files.push(file);
        }
        loader::apply_env_overrides(&mut merged, &mut sources);
        Ok((merged, sources))
    }

    /// Render as TOML that `load_from` reads back unchanged.
    pub fn to_toml(&self) -> String {
        let mut out = String::from("# PortMan Configuration\n");
        let jack = &self.infra.jack;
        let setup = &self.setup;

        // Writing to a String cannot fail
        let _ = writeln!(out, "\n[jack]");
        let _ = writeln!(out, "client_name = {}", quoted(&jack.client_name));
        let _ = writeln!(out, "no_start_server = {}", jack.no_start_server);
        let _ = writeln!(out, "\n[debounce]\nsettle_ms = {}", self.infra.debounce.settle_ms);
        let _ = writeln!(
            out,
            "\n[telemetry]\nlog_level = {}",
            quoted(&self.infra.telemetry.log_level)
        );

        let _ = writeln!(out, "\n[setup]\nsource_keys = {}", quoted(&setup.source_keys));
        if let Some(speaker) = &setup.speaker {
            let _ = writeln!(out, "speaker = {}", quoted(speaker));
        }
        let _ = writeln!(out, "exclude_speaker = {}", setup.exclude_speaker);
        for t in &setup.enum_toggles {
            let _ = writeln!(
                out,
                "\n[[setup.enum_toggle]]\nkey = {}\ncard = {}\ncontrol = {}\noff = {}\non = {}",
                quoted(&t.key.to_string()),
                t.card,
                quoted(&t.control),
                quoted(&t.off),
                quoted(&t.on)
            );
        }
        for t in &setup.volume_toggles {
            let _ = writeln!(
                out,
                "\n[[setup.volume_toggle]]\nkey = {}\ncard = {}\ncontrol = {}\nlevel = {}",
                quoted(&t.key.to_string()),
                t.card,
                quoted(&t.control),
                t.level
            );
        }
        for t in &setup.bundle_toggles {
            let _ = writeln!(out, "\n[[setup.bundle_toggle]]\nkey = {}", quoted(&t.key.to_string()));
            write_group(&mut out, "controls", &t.controls);
        }
        for (table, toggles) in [("swap", &setup.swaps), ("push", &setup.pushes)] {
            for t in toggles {
                let _ = writeln!(out, "\n[[setup.{}]]\nkey = {}", table, quoted(&t.key.to_string()));
                write_group(&mut out, "from", &t.from);
                write_group(&mut out, "to", &t.to);
            }
        }
        out
    }
}
