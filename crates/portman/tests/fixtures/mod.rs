#![allow(dead_code)]

use portconf::{EnumToggle, MixerSetting, SetupConfig, VolumeToggle};
use portman::backends::{MemoryGraph, MemoryMixer};
use portman::{GraphHandle, GraphMirror, GraphService, MixerRegistry, Session, StudioSetup};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SETTLE: Duration = Duration::from_millis(20);
pub const SPEAKER: &str = "Built-in Audio Analog Stereo";

/// A small studio: a sound card, two browsers/players, a network proxy
/// client reporting under a temporary alias, and a mixer card.
pub struct StudioFixture {
    pub graph: Arc<MemoryGraph>,
    pub mixer: MemoryMixer,
    pub mirror: Arc<GraphMirror>,
    pub registry: Arc<MixerRegistry>,
}

impl StudioFixture {
    pub fn new() -> Self {
        let graph = Arc::new(MemoryGraph::new());
        graph.add_client(
            SPEAKER,
            &["capture_FL", "capture_FR", "monitor_FL", "monitor_FR", "playback_FL", "playback_FR"],
        );
        graph.add_client("firefox", &["output_FL", "output_FR"]);
        graph.add_client("mpv", &["output_FL", "output_FR"]);
        graph.add_client("netjack-7f3a", &["capture_1", "capture_2"]);
        graph.set_alias("netjack-7f3a", "studio-b");
        graph.connect_quietly("firefox:output_FL", &format!("{}:playback_FL", SPEAKER));
        graph.connect_quietly("firefox:output_FR", &format!("{}:playback_FR", SPEAKER));

        let mixer = MemoryMixer::new();
        for n in 1..=6 {
            mixer.add_enum(1, &format!("PCM {:02}", n), &["Off", "Mix A", "Mix B"], "Off");
        }
        mixer.add_volume(1, "Mix A Input 01", 0);
        mixer.add_volume(1, "Mix B Input 01", 0);
        mixer.add_volume(1, "Mix B Input 02", 0);

        let mirror = Arc::new(GraphMirror::new(SETTLE).expect("Failed to start mirror"));
        graph.attach(&mirror);
        mirror
            .populate(graph.as_ref())
            .expect("Failed to populate mirror");

        let registry = Arc::new(MixerRegistry::new(mixer.clone()));

        Self {
            graph,
            mixer,
            mirror,
            registry,
        }
    }

    pub fn service(&self) -> Arc<dyn GraphService> {
        let service: Arc<dyn GraphService> = self.graph.clone();
        service
    }

    pub fn handle(&self) -> GraphHandle {
        GraphHandle::new(Arc::clone(&self.mirror), self.service())
    }

    pub fn setup_config() -> SetupConfig {
        SetupConfig {
            source_keys: "ZXCVB".to_string(),
            speaker: Some(SPEAKER.to_string()),
            enum_toggles: vec![EnumToggle {
                key: 'Q',
                card: 1,
                control: "PCM 01".to_string(),
                off: "Off".to_string(),
                on: "Mix A".to_string(),
            }],
            volume_toggles: vec![VolumeToggle {
                key: 'A',
                card: 1,
                control: "Mix A Input 01".to_string(),
                level: 100,
            }],
            ..SetupConfig::default()
        }
    }

    /// Card 1 `PCM NN` switched between `Off` and `Mix A`.
    pub fn pcm(n: u32) -> MixerSetting {
        MixerSetting::Enum {
            card: 1,
            control: format!("PCM {:02}", n),
            off: "Off".to_string(),
            on: "Mix A".to_string(),
        }
    }

    pub fn setup(&self, config: SetupConfig) -> StudioSetup {
        StudioSetup::new(config, self.handle(), Arc::clone(&self.registry))
    }

    pub fn session(&self) -> Session {
        Session::start(
            Arc::clone(&self.mirror),
            self.service(),
            Arc::clone(&self.registry),
        )
        .expect("Failed to start session")
    }

    pub fn speaker_port(channel: &str) -> String {
        format!("{}:playback_{}", SPEAKER, channel)
    }
}

/// A terminal that records everything drawn on it.
#[derive(Clone, Default)]
pub struct Screen(Arc<Mutex<Vec<u8>>>);

impl Screen {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Screen {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
