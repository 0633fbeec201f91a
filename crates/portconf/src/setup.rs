//! Setup configuration - seeds the built-in binding function.

use serde::{Deserialize, Serialize};

/// A hardware mixer switch between two enumerated settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumToggle {
    pub key: char,
    pub card: u32,
    pub control: String,
    pub off: String,
    pub on: String,
}

/// A hardware mixer level toggled between 0 and `level` percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeToggle {
    pub key: char,
    pub card: u32,
    pub control: String,
    pub level: i64,
}

/// One member of a mixer group. Written inline in TOML; a `level` makes
/// it a volume control, `off`/`on` an enumerated one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MixerSetting {
    Enum {
        card: u32,
        control: String,
        off: String,
        on: String,
    },
    Volume {
        card: u32,
        control: String,
        level: i64,
    },
}

/// Several mixer controls flipped together by one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleToggle {
    pub key: char,
    pub controls: Vec<MixerSetting>,
}

/// Two equal-length mixer groups. Bound as `[[setup.swap]]` the key
/// exchanges their states; as `[[setup.push]]` it copies `from` onto `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairToggle {
    pub key: char,
    pub from: Vec<MixerSetting>,
    pub to: Vec<MixerSetting>,
}

/// What the built-in routing setup binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupConfig {
    /// One key per stereo source, bound in client-name order.
    #[serde(default = "SetupConfig::default_source_keys")]
    pub source_keys: String,

    /// Preferred speaker client. When unset, the first client with a
    /// recognized speaker layout is used.
    #[serde(default)]
    pub speaker: Option<String>,

    /// Leave the speaker's own capture pair out of the source keys.
    #[serde(default = "SetupConfig::default_exclude_speaker")]
    pub exclude_speaker: bool,

    #[serde(default, rename = "enum_toggle")]
    pub enum_toggles: Vec<EnumToggle>,

    #[serde(default, rename = "volume_toggle")]
    pub volume_toggles: Vec<VolumeToggle>,

    #[serde(default, rename = "bundle_toggle")]
    pub bundle_toggles: Vec<BundleToggle>,

    #[serde(default, rename = "swap")]
    pub swaps: Vec<PairToggle>,

    #[serde(default, rename = "push")]
    pub pushes: Vec<PairToggle>,
}

impl SetupConfig {
    fn default_source_keys() -> String {
        "ZXCVB".to_string()
    }

    fn default_exclude_speaker() -> bool {
        true
    }

    /// True when no mixer binding of any kind is configured.
    pub fn has_no_mixer_toggles(&self) -> bool {
        self.enum_toggles.is_empty()
            && self.volume_toggles.is_empty()
            && self.bundle_toggles.is_empty()
            && self.swaps.is_empty()
            && self.pushes.is_empty()
    }

    /// Every mixer control any toggle refers to, duplicates included.
    pub fn mixer_settings(&self) -> Vec<MixerSetting> {
        let singles = self
            .enum_toggles
            .iter()
            .map(|t| MixerSetting::Enum {
                card: t.card,
                control: t.control.clone(),
                off: t.off.clone(),
                on: t.on.clone(),
            })
            .chain(self.volume_toggles.iter().map(|t| MixerSetting::Volume {
                card: t.card,
                control: t.control.clone(),
                level: t.level,
            }));
        let grouped = self
            .bundle_toggles
            .iter()
            .flat_map(|t| t.controls.iter())
            .chain(
                self.swaps
                    .iter()
                    .chain(&self.pushes)
                    .flat_map(|t| t.from.iter().chain(&t.to)),
            )
            .cloned();
        singles.chain(grouped).collect()
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            source_keys: Self::default_source_keys(),
            speaker: None,
            exclude_speaker: Self::default_exclude_speaker(),
            enum_toggles: Vec::new(),
            volume_toggles: Vec::new(),
            bundle_toggles: Vec::new(),
            swaps: Vec::new(),
            pushes: Vec::new(),
        }
    }
}
