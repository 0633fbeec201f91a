//! The configurable studio setup
//!
//! Binds each client with a recognizable stereo output to one of the
//! configured source keys, routing it to the speaker, and adds the
//! configured hardware mixer toggles: single controls, bundles of controls,
//! and swaps or pushes between two groups.

use std::sync::Arc;

use portconf::{MixerSetting, SetupConfig};
use tracing::{debug, warn};

use crate::control::{BindingSource, Bindings};
use crate::layout::{stereo_outs, stereo_speaker_ref, stereo_speakers};
use crate::error::TrackError;
use crate::mixer::MixerRegistry;
use crate::track::{ConnectionTrack, GraphHandle};
use crate::types::{GraphSnapshot, PortRef};

pub struct StudioSetup {
    config: SetupConfig,
    graph: GraphHandle,
    registry: Arc<MixerRegistry>,
}

impl StudioSetup {
    pub fn new(config: SetupConfig, graph: GraphHandle, registry: Arc<MixerRegistry>) -> Self {
        Self {
            config,
            graph,
            registry,
        }
    }

    /// The configured speaker, or the first client with a speaker layout.
    fn speaker(&self, snapshot: &GraphSnapshot) -> Option<(String, Vec<PortRef>)> {
        match &self.config.speaker {
            Some(name) => match stereo_speaker_ref(snapshot, name, None) {
                Ok(refs) => Some((name.clone(), refs)),
                Err(e) => {
                    warn!("Speaker {:?} unusable: {}", name, e);
                    None
                }
            },
            None => stereo_speakers(snapshot).into_iter().next(),
        }
    }

    fn bind_sources(&self, snapshot: &GraphSnapshot, bindings: &mut Bindings) {
        let Some((speaker, speaker_refs)) = self.speaker(snapshot) else {
            debug!("No speaker in the graph; not binding sources");
            return;
        };
        let exclude = self.config.exclude_speaker;
        let sources = stereo_outs(snapshot)
            .into_iter()
            .filter(|(client, _)| !exclude || *client != speaker);
        for (key, (client, outs)) in self.config.source_keys.chars().zip(sources) {
            debug!("{} -> {} on {:?}", client, speaker, key);
            bindings.try_insert(key, || self.graph.multi_connection_track(&outs, &speaker_refs));
        }
    }

    fn mixer_track(&self, setting: &MixerSetting) -> Result<ConnectionTrack, TrackError> {
        match setting {
            MixerSetting::Enum { card, control, off, on } => {
                ConnectionTrack::mixer_enum(&self.registry, *card, control, off, on)
            }
            MixerSetting::Volume { card, control, level } => {
                ConnectionTrack::mixer_volume(&self.registry, *card, control, *level)
            }
        }
    }

    fn mixer_group(&self, settings: &[MixerSetting]) -> Result<Vec<ConnectionTrack>, TrackError> {
        settings.iter().map(|s| self.mixer_track(s)).collect()
    }

    fn bind_mixer(&self, bindings: &mut Bindings) {
        for toggle in &self.config.enum_toggles {
            bindings.try_insert(toggle.key, || {
                ConnectionTrack::mixer_enum(
                    &self.registry,
                    toggle.card,
                    &toggle.control,
                    &toggle.off,
                    &toggle.on,
                )
            });
        }
        for toggle in &self.config.volume_toggles {
            bindings.try_insert(toggle.key, || {
                ConnectionTrack::mixer_volume(&self.registry, toggle.card, &toggle.control, toggle.level)
            });
        }
        for toggle in &self.config.bundle_toggles {
            bindings.try_insert(toggle.key, || {
                ConnectionTrack::bundle(self.mixer_group(&toggle.controls)?)
            });
        }
        for toggle in &self.config.swaps {
            bindings.try_insert(toggle.key, || {
                ConnectionTrack::swap(self.mixer_group(&toggle.from)?, self.mixer_group(&toggle.to)?)
            });
        }
        for toggle in &self.config.pushes {
            bindings.try_insert(toggle.key, || {
                ConnectionTrack::push(self.mixer_group(&toggle.from)?, self.mixer_group(&toggle.to)?)
            });
        }
    }
}

impl BindingSource for StudioSetup {
    fn bindings(&self, snapshot: &GraphSnapshot) -> anyhow::Result<Bindings> {
        let mut bindings = Bindings::new();
        self.bind_sources(snapshot, &mut bindings);
        self.bind_mixer(&mut bindings);
        Ok(bindings)
    }
}
