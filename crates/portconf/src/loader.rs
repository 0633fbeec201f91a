//! Where config comes from: files on disk and `PORTMAN_*` variables.

use std::env;
use std::path::{Path, PathBuf};

use crate::infra::{DebounceConfig, JackConfig, TelemetryConfig};
use crate::{
    BundleToggle, ConfigError, EnumToggle, InfraConfig, MixerSetting, PairToggle, PortmanConfig,
    SetupConfig, VolumeToggle,
};

const SYSTEM_CONFIG: &str = "/etc/portman/config.toml";
const LOCAL_CONFIG: &str = "portman.toml";

/// Files read and variables applied, in the order they took effect.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<String>,
}

pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Existing config files, lowest precedence first.
///
/// An existing `cli_path` takes the place of `./portman.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("portman/config.toml"));
    let last = match cli_path {
        Some(path) if path.exists() => path.to_path_buf(),
        _ => PathBuf::from(LOCAL_CONFIG),
    };

    [Some(PathBuf::from(SYSTEM_CONFIG)), user, Some(last)]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .collect()
}

pub fn load_from_file(path: &Path) -> Result<PortmanConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml(&contents, path)
}

fn parse_error(path: &Path, message: impl Into<String>) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Read one config document. `path` only labels errors.
pub(crate) fn parse_toml(contents: &str, path: &Path) -> Result<PortmanConfig, ConfigError> {
    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_error(path, e.to_string()))?;

    let mut infra = InfraConfig::default();

    if let Some(jack) = table.get("jack").and_then(|v| v.as_table()) {
        if let Some(v) = jack.get("client_name").and_then(|v| v.as_str()) {
            infra.jack.client_name = v.to_string();
        }
        if let Some(v) = jack.get("no_start_server").and_then(|v| v.as_bool()) {
            infra.jack.no_start_server = v;
        }
    }

    if let Some(debounce) = table.get("debounce").and_then(|v| v.as_table()) {
        if let Some(v) = debounce.get("settle_ms").and_then(|v| v.as_integer()) {
            if v <= 0 {
                return Err(parse_error(path, "debounce.settle_ms must be positive"));
            }
            infra.debounce.settle_ms = v as u64;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
    }

    let mut setup = SetupConfig::default();

    if let Some(section) = table.get("setup").and_then(|v| v.as_table()) {
        if let Some(v) = section.get("source_keys").and_then(|v| v.as_str()) {
            setup.source_keys = v.to_uppercase();
        }
        if let Some(v) = section.get("speaker").and_then(|v| v.as_str()) {
            setup.speaker = Some(v.to_string());
        }
        if let Some(v) = section.get("exclude_speaker").and_then(|v| v.as_bool()) {
            setup.exclude_speaker = v;
        }

        if let Some(toggles) = section.get("enum_toggle").and_then(|v| v.as_array()) {
            for toggle in toggles {
                let t = toggle
                    .as_table()
                    .ok_or_else(|| parse_error(path, "setup.enum_toggle entries must be tables"))?;
                setup.enum_toggles.push(EnumToggle {
                    key: key_field(t, path, "enum_toggle")?,
                    card: card_field(t, path, "enum_toggle")?,
                    control: str_field(t, path, "enum_toggle", "control")?,
                    off: str_field(t, path, "enum_toggle", "off")?,
                    on: str_field(t, path, "enum_toggle", "on")?,
                });
            }
        }

        if let Some(toggles) = section.get("volume_toggle").and_then(|v| v.as_array()) {
            for toggle in toggles {
                let t = toggle
                    .as_table()
                    .ok_or_else(|| parse_error(path, "setup.volume_toggle entries must be tables"))?;
                setup.volume_toggles.push(VolumeToggle {
                    key: key_field(t, path, "volume_toggle")?,
                    card: card_field(t, path, "volume_toggle")?,
                    control: str_field(t, path, "volume_toggle", "control")?,
                    level: level_field(t, path, "volume_toggle")?.unwrap_or(100),
                });
            }
        }

        for t in section_tables(section, path, "bundle_toggle")? {
            setup.bundle_toggles.push(BundleToggle {
                key: key_field(t, path, "bundle_toggle")?,
                controls: group_field(t, path, "bundle_toggle", "controls")?,
            });
        }
        setup.swaps = pair_toggles(section, path, "swap")?;
        setup.pushes = pair_toggles(section, path, "push")?;
    }

    Ok(PortmanConfig { infra, setup })
}

fn str_field(t: &toml::Table, path: &Path, section: &str, name: &str) -> Result<String, ConfigError> {
    t.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| parse_error(path, format!("setup.{}.{} is required", section, name)))
}

fn key_field(t: &toml::Table, path: &Path, section: &str) -> Result<char, ConfigError> {
    let key = str_field(t, path, section, "key")?;
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c.to_ascii_uppercase()),
        _ => Err(parse_error(
            path,
            format!("setup.{}.key must be a single character, got {:?}", section, key),
        )),
    }
}

fn card_field(t: &toml::Table, path: &Path, section: &str) -> Result<u32, ConfigError> {
    t.get("card")
        .and_then(|v| v.as_integer())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| parse_error(path, format!("setup.{}.card must be a card index", section)))
}

fn level_field(t: &toml::Table, path: &Path, section: &str) -> Result<Option<i64>, ConfigError> {
    match t.get("level").and_then(|v| v.as_integer()) {
        Some(level) if !(0..=100).contains(&level) => Err(parse_error(
            path,
            format!("setup.{}.level must be 0-100, got {}", section, level),
        )),
        level => Ok(level),
    }
}

fn section_tables<'a>(
    section: &'a toml::Table,
    path: &Path,
    name: &str,
) -> Result<Vec<&'a toml::Table>, ConfigError> {
    let Some(entries) = section.get(name).and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    entries
        .iter()
        .map(|entry| {
            entry
                .as_table()
                .ok_or_else(|| parse_error(path, format!("setup.{} entries must be tables", name)))
        })
        .collect()
}

/// A non-empty inline list of mixer controls.
fn group_field(
    t: &toml::Table,
    path: &Path,
    section: &str,
    name: &str,
) -> Result<Vec<MixerSetting>, ConfigError> {
    let label = format!("{}.{}", section, name);
    let members = t
        .get(name)
        .and_then(|v| v.as_array())
        .filter(|members| !members.is_empty())
        .ok_or_else(|| parse_error(path, format!("setup.{} must list at least one control", label)))?;

    members
        .iter()
        .map(|member| {
            let m = member
                .as_table()
                .ok_or_else(|| parse_error(path, format!("setup.{} entries must be tables", label)))?;
            let card = card_field(m, path, &label)?;
            let control = str_field(m, path, &label, "control")?;
            match (level_field(m, path, &label)?, m.contains_key("off") || m.contains_key("on")) {
                (Some(level), false) => Ok(MixerSetting::Volume { card, control, level }),
                (None, true) => Ok(MixerSetting::Enum {
                    card,
                    control,
                    off: str_field(m, path, &label, "off")?,
                    on: str_field(m, path, &label, "on")?,
                }),
                _ => Err(parse_error(
                    path,
                    format!("setup.{} {:?} needs either level or off/on", label, control),
                )),
            }
        })
        .collect()
}

fn pair_toggles(section: &toml::Table, path: &Path, name: &str) -> Result<Vec<PairToggle>, ConfigError> {
    section_tables(section, path, name)?
        .into_iter()
        .map(|t| {
            let toggle = PairToggle {
                key: key_field(t, path, name)?,
                from: group_field(t, path, name, "from")?,
                to: group_field(t, path, name, "to")?,
            };
            if toggle.from.len() != toggle.to.len() {
                return Err(parse_error(
                    path,
                    format!(
                        "setup.{} {:?}: from has {} controls, to has {}",
                        name,
                        toggle.key,
                        toggle.from.len(),
                        toggle.to.len()
                    ),
                ));
            }
            Ok(toggle)
        })
        .collect()
}

/// `overlay` wins wherever it differs from the compiled defaults.
fn pick<T: PartialEq>(base: T, overlay: T, default: &T) -> T {
    if overlay != *default {
        overlay
    } else {
        base
    }
}

fn pick_list<T>(base: Vec<T>, overlay: Vec<T>) -> Vec<T> {
    if overlay.is_empty() {
        base
    } else {
        overlay
    }
}

/// Layer `overlay` over `base`.
///
/// Toggle lists are replaced whole, never concatenated.
pub fn merge_configs(base: PortmanConfig, overlay: PortmanConfig) -> PortmanConfig {
    let jack = JackConfig::default();
    let debounce = DebounceConfig::default();
    let telemetry = TelemetryConfig::default();
    let setup = SetupConfig::default();
    let (b, o) = (base.infra, overlay.infra);

    PortmanConfig {
        infra: InfraConfig {
            jack: JackConfig {
                client_name: pick(b.jack.client_name, o.jack.client_name, &jack.client_name),
                no_start_server: pick(
                    b.jack.no_start_server,
                    o.jack.no_start_server,
                    &jack.no_start_server,
                ),
            },
            debounce: DebounceConfig {
                settle_ms: pick(b.debounce.settle_ms, o.debounce.settle_ms, &debounce.settle_ms),
            },
            telemetry: TelemetryConfig {
                log_level: pick(b.telemetry.log_level, o.telemetry.log_level, &telemetry.log_level),
            },
        },
        setup: SetupConfig {
            source_keys: pick(base.setup.source_keys, overlay.setup.source_keys, &setup.source_keys),
            speaker: overlay.setup.speaker.or(base.setup.speaker),
            exclude_speaker: pick(
                base.setup.exclude_speaker,
                overlay.setup.exclude_speaker,
                &setup.exclude_speaker,
            ),
            enum_toggles: pick_list(base.setup.enum_toggles, overlay.setup.enum_toggles),
            volume_toggles: pick_list(base.setup.volume_toggles, overlay.setup.volume_toggles),
            bundle_toggles: pick_list(base.setup.bundle_toggles, overlay.setup.bundle_toggles),
            swaps: pick_list(base.setup.swaps, overlay.setup.swaps),
            pushes: pick_list(base.setup.pushes, overlay.setup.pushes),
        },
    }
}

fn env_override(name: &str, sources: &mut ConfigSources) -> Option<String> {
    let value = env::var(name).ok()?;
    sources.env_overrides.push(name.to_string());
    Some(value)
}

/// `RUST_LOG` beats `PORTMAN_LOG_LEVEL`. A non-positive or unparsable
/// `PORTMAN_SETTLE_MS` is ignored.
pub fn apply_env_overrides(config: &mut PortmanConfig, sources: &mut ConfigSources) {
    if let Some(v) = env_override("PORTMAN_CLIENT_NAME", sources) {
        config.infra.jack.client_name = v;
    }
    let settle = env::var("PORTMAN_SETTLE_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0);
    if let Some(ms) = settle {
        config.infra.debounce.settle_ms = ms;
        sources.env_overrides.push("PORTMAN_SETTLE_MS".to_string());
    }
    for name in ["PORTMAN_LOG_LEVEL", "RUST_LOG"] {
        if let Some(v) = env_override(name, sources) {
            config.infra.telemetry.log_level = v;
        }
    }
    if let Some(v) = env_override("PORTMAN_SOURCE_KEYS", sources) {
        config.setup.source_keys = v.to_uppercase();
    }
    if let Some(v) = env_override("PORTMAN_SPEAKER", sources) {
        config.setup.speaker = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_discovered_files_exist() {
        assert!(discover_config_files().iter().all(|path| path.exists()));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[debounce]
settle_ms = 120
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.debounce.settle_ms, 120);
        assert_eq!(config.infra.jack.client_name, "PortMan");
        assert_eq!(config.setup.source_keys, "ZXCVB");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[jack]
client_name = "studio"
no_start_server = false

[debounce]
settle_ms = 80

[telemetry]
log_level = "debug"

[setup]
source_keys = "asdf"
speaker = "Scarlett 4i4 USB Pro"

[[setup.enum_toggle]]
key = "q"
card = 1
control = "PCM 01"
off = "Off"
on = "Mix A"

[[setup.volume_toggle]]
key = "W"
card = 1
control = "Mix B Input 02"
level = 75
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.infra.jack.client_name, "studio");
        assert!(!config.infra.jack.no_start_server);
        assert_eq!(config.infra.debounce.settle_ms, 80);
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.setup.source_keys, "ASDF");
        assert_eq!(config.setup.speaker.as_deref(), Some("Scarlett 4i4 USB Pro"));

        assert_eq!(config.setup.enum_toggles.len(), 1);
        assert_eq!(config.setup.enum_toggles[0].key, 'Q');
        assert_eq!(config.setup.enum_toggles[0].on, "Mix A");

        assert_eq!(config.setup.volume_toggles.len(), 1);
        assert_eq!(config.setup.volume_toggles[0].level, 75);
    }

    #[test]
    fn test_parse_rejects_long_key() {
        let toml = r#"
[[setup.enum_toggle]]
key = "QW"
card = 1
control = "PCM 01"
off = "Off"
on = "Mix A"
"#;
        let err = parse_toml(toml, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("single character"));
    }

    #[test]
    fn test_parse_rejects_out_of_range_level() {
        let toml = r#"
[[setup.volume_toggle]]
key = "A"
card = 0
control = "Master"
level = 140
"#;
        assert!(parse_toml(toml, Path::new("bad.toml")).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_control() {
        let toml = r#"
[[setup.enum_toggle]]
key = "A"
card = 0
off = "Off"
on = "On"
"#;
        let err = parse_toml(toml, Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("control"));
    }

    #[test]
    fn test_parse_mixer_groups() {
        let toml = r#"
[setup]
exclude_speaker = false

[[setup.bundle_toggle]]
key = "s"
controls = [
    { card = 1, control = "Mix A Input 01", level = 100 },
    { card = 1, control = "Mix A Input 02", level = 100 },
]

[[setup.swap]]
key = "D"
from = [{ card = 1, control = "PCM 01", off = "Off", on = "Mix A" }]
to = [{ card = 1, control = "PCM 02", off = "Off", on = "Mix A" }]

[[setup.push]]
key = "F"
from = [{ card = 1, control = "PCM 03", off = "Off", on = "Mix B" }]
to = [{ card = 1, control = "PCM 04", off = "Off", on = "Mix B" }]
"#;
        let setup = parse_toml(toml, Path::new("test.toml")).unwrap().setup;

        assert!(!setup.exclude_speaker);
        assert_eq!(setup.bundle_toggles[0].key, 'S');
        assert_eq!(
            setup.bundle_toggles[0].controls[1],
            MixerSetting::Volume {
                card: 1,
                control: "Mix A Input 02".to_string(),
                level: 100,
            }
        );
        assert_eq!(setup.swaps[0].key, 'D');
        assert_eq!(
            setup.pushes[0].to[0],
            MixerSetting::Enum {
                card: 1,
                control: "PCM 04".to_string(),
                off: "Off".to_string(),
                on: "Mix B".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_uneven_swap() {
        let toml = r#"
[[setup.swap]]
key = "D"
from = [{ card = 1, control = "PCM 01", off = "Off", on = "Mix A" }]
to = [
    { card = 1, control = "PCM 02", off = "Off", on = "Mix A" },
    { card = 1, control = "PCM 03", off = "Off", on = "Mix A" },
]
"#;
        let err = parse_toml(toml, Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("from has 1 controls, to has 2"));
    }

    #[test]
    fn test_parse_rejects_ambiguous_group_member() {
        let toml = r#"
[[setup.bundle_toggle]]
key = "S"
controls = [{ card = 1, control = "PCM 01", level = 50, on = "Mix A" }]
"#;
        let err = parse_toml(toml, Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("either level or off/on"));
    }

    #[test]
    fn test_parse_rejects_empty_bundle() {
        let toml = r#"
[[setup.bundle_toggle]]
key = "S"
controls = []
"#;
        assert!(parse_toml(toml, Path::new("bad.toml")).is_err());
    }

    #[test]
    fn test_merge_overlay_wins() {
        let mut base = PortmanConfig::default();
        base.infra.jack.client_name = "base".to_string();
        base.setup.speaker = Some("base speaker".to_string());

        let mut overlay = PortmanConfig::default();
        overlay.infra.debounce.settle_ms = 200;

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.infra.jack.client_name, "base");
        assert!(merged.setup.enum_toggles.is_empty());
        assert_eq!(merged.infra.debounce.settle_ms, 200);
        assert_eq!(merged.setup.speaker.as_deref(), Some("base speaker"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[setup]\nsource_keys = \"QWER\"").unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.setup.source_keys, "QWER");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_from_file(Path::new("/nonexistent/portman.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_cli_path_is_discovered() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let files = discover_config_files_with_override(Some(file.path()));
        assert_eq!(files.last().map(PathBuf::as_path), Some(file.path()));
    }
}
