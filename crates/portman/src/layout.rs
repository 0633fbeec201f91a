//! Stereo port layouts
//!
//! Recognizes the common ways a client exposes a stereo pair so binding
//! functions can ask for "this client's stereo output" without naming ports.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::LayoutError;
use crate::types::{GraphSnapshot, PortRef};

struct Layout {
    ports: &'static [&'static str],
    out: Option<[&'static str; 2]>,
    speaker: Option<[&'static str; 2]>,
}

const LAYOUTS: &[Layout] = &[
    // Built-in analog stereo
    Layout {
        ports: &[
            "capture_FL",
            "capture_FR",
            "monitor_FL",
            "monitor_FR",
            "playback_FL",
            "playback_FR",
        ],
        out: Some(["capture_FL", "capture_FR"]),
        speaker: Some(["playback_FL", "playback_FR"]),
    },
    // Application output
    Layout {
        ports: &["output_FL", "output_FR"],
        out: Some(["output_FL", "output_FR"]),
        speaker: None,
    },
    // Playback sink
    Layout {
        ports: &["monitor_FL", "monitor_FR", "playback_FL", "playback_FR"],
        out: Some(["monitor_FL", "monitor_FR"]),
        speaker: Some(["playback_FL", "playback_FR"]),
    },
    // Loopback
    Layout {
        ports: &["capture_FL", "capture_FR", "playback_FL", "playback_FR"],
        out: Some(["capture_FL", "capture_FR"]),
        speaker: Some(["playback_FL", "playback_FR"]),
    },
    // USB device with AUX channels
    Layout {
        ports: &[
            "capture_AUX0",
            "capture_AUX1",
            "monitor_AUX0",
            "monitor_AUX1",
            "playback_AUX0",
            "playback_AUX1",
        ],
        out: Some(["capture_AUX0", "capture_AUX1"]),
        speaker: Some(["playback_AUX0", "playback_AUX1"]),
    },
];

fn ports_by_name(snapshot: &GraphSnapshot, client: &str) -> Result<BTreeMap<String, PortRef>, LayoutError> {
    let ports = snapshot
        .ports_of(client)
        .ok_or_else(|| LayoutError::NoClient(client.to_string()))?;
    Ok(ports.map(|p| (p.port.clone(), p.clone())).collect())
}

fn pick_channels(
    client: &str,
    ports: &BTreeMap<String, PortRef>,
    channels: &[&str],
) -> Result<Vec<PortRef>, LayoutError> {
    channels
        .iter()
        .map(|channel| {
            let matches: Vec<&PortRef> = ports
                .iter()
                .filter(|(name, _)| name.contains(channel))
                .map(|(_, port)| port)
                .collect();
            match matches.as_slice() {
                [port] => Ok((*port).clone()),
                _ => Err(LayoutError::Ambiguous {
                    client: client.to_string(),
                    channel: channel.to_string(),
                    matches: matches.len(),
                }),
            }
        })
        .collect()
}

fn pick_layout(
    ports: &BTreeMap<String, PortRef>,
    side: impl Fn(&Layout) -> Option<[&'static str; 2]>,
) -> Result<Vec<PortRef>, LayoutError> {
    let names: BTreeSet<&str> = ports.keys().map(String::as_str).collect();
    for layout in LAYOUTS {
        let Some(pair) = side(layout) else {
            continue;
        };
        if names.len() == layout.ports.len() && layout.ports.iter().all(|p| names.contains(p)) {
            return Ok(pair
                .iter()
                .filter_map(|name| ports.get(*name).cloned())
                .collect());
        }
    }
    Err(LayoutError::Unrecognized(
        names.into_iter().collect::<Vec<_>>().join(","),
    ))
}

/// The two ports carrying `client`'s stereo output.
///
/// With `channels`, pick exactly one port per channel substring instead,
/// ignoring `playback` ports (and `monitor` ports when `capture` ports exist).
pub fn stereo_out_ref(
    snapshot: &GraphSnapshot,
    client: &str,
    channels: Option<&[&str]>,
) -> Result<Vec<PortRef>, LayoutError> {
    let mut ports = ports_by_name(snapshot, client)?;
    match channels {
        Some(channels) => {
            ports.retain(|name, _| !name.contains("playback"));
            if ports.keys().any(|name| name.contains("capture")) {
                ports.retain(|name, _| !name.contains("monitor"));
            }
            pick_channels(client, &ports, channels)
        }
        None => pick_layout(&ports, |layout| layout.out),
    }
}

/// The two ports feeding `client`'s speakers.
///
/// With `channels`, pick exactly one `playback` port per channel substring.
pub fn stereo_speaker_ref(
    snapshot: &GraphSnapshot,
    client: &str,
    channels: Option<&[&str]>,
) -> Result<Vec<PortRef>, LayoutError> {
    let mut ports = ports_by_name(snapshot, client)?;
    match channels {
        Some(channels) => {
            ports.retain(|name, _| name.contains("playback"));
            pick_channels(client, &ports, channels)
        }
        None => pick_layout(&ports, |layout| layout.speaker),
    }
}

/// Every client with a recognized stereo output.
pub fn stereo_outs(snapshot: &GraphSnapshot) -> BTreeMap<String, Vec<PortRef>> {
    snapshot
        .client_names()
        .filter_map(|name| {
            stereo_out_ref(snapshot, name, None)
                .ok()
                .map(|refs| (name.to_string(), refs))
        })
        .collect()
}

/// Every client with a recognized speaker pair.
pub fn stereo_speakers(snapshot: &GraphSnapshot) -> BTreeMap<String, Vec<PortRef>> {
    snapshot
        .client_names()
        .filter_map(|name| {
            stereo_speaker_ref(snapshot, name, None)
                .ok()
                .map(|refs| (name.to_string(), refs))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> GraphSnapshot {
        let mut snapshot = GraphSnapshot::new();
        let clients: &[(&str, &[&str])] = &[
            ("firefox", &["output_FL", "output_FR"]),
            (
                "Built-in Audio Analog Stereo",
                &["capture_FL", "capture_FR", "monitor_FL", "monitor_FR", "playback_FL", "playback_FR"],
            ),
            ("Speakers", &["playback_FL", "playback_FR", "monitor_FL", "monitor_FR"]),
            ("system", &["capture_1", "capture_2", "playback_1", "playback_2", "playback_3"]),
        ];
        for (client, ports) in clients {
            for port in *ports {
                snapshot.add_port(PortRef::new(*client, *client, *port));
            }
        }
        snapshot
    }

    fn names(refs: &[PortRef]) -> Vec<&str> {
        refs.iter().map(|p| p.port.as_str()).collect()
    }

    #[test]
    fn test_known_layouts() {
        let snapshot = snapshot();
        let out = stereo_out_ref(&snapshot, "firefox", None).unwrap();
        assert_eq!(names(&out), vec!["output_FL", "output_FR"]);

        let out = stereo_out_ref(&snapshot, "Built-in Audio Analog Stereo", None).unwrap();
        assert_eq!(names(&out), vec!["capture_FL", "capture_FR"]);
        let speaker = stereo_speaker_ref(&snapshot, "Speakers", None).unwrap();
        assert_eq!(names(&speaker), vec!["playback_FL", "playback_FR"]);
        let out = stereo_out_ref(&snapshot, "Speakers", None).unwrap();
        assert_eq!(names(&out), vec!["monitor_FL", "monitor_FR"]);
    }

    #[test]
    fn test_unrecognized_layout() {
        let snapshot = snapshot();
        assert!(matches!(
            stereo_out_ref(&snapshot, "system", None),
            Err(LayoutError::Unrecognized(_))
        ));
        assert!(matches!(
            stereo_speaker_ref(&snapshot, "firefox", None),
            Err(LayoutError::Unrecognized(_))
        ));
        assert_eq!(
            stereo_out_ref(&snapshot, "nobody", None),
            Err(LayoutError::NoClient("nobody".to_string()))
        );
    }

    #[test]
    fn test_explicit_channels() {
        let snapshot = snapshot();
        let out = stereo_out_ref(&snapshot, "system", Some(&["capture_1", "capture_2"])).unwrap();
        assert_eq!(names(&out), vec!["capture_1", "capture_2"]);

        let speaker = stereo_speaker_ref(&snapshot, "system", Some(&["_1", "_3"])).unwrap();
        assert_eq!(names(&speaker), vec!["playback_1", "playback_3"]);

        // Monitors are dropped when captures exist
        let out = stereo_out_ref(&snapshot, "Built-in Audio Analog Stereo", Some(&["FL", "FR"])).unwrap();
        assert_eq!(names(&out), vec!["capture_FL", "capture_FR"]);

        assert_eq!(
            stereo_speaker_ref(&snapshot, "system", Some(&["playback"])),
            Err(LayoutError::Ambiguous {
                client: "system".to_string(),
                channel: "playback".to_string(),
                matches: 3,
            })
        );
    }

    #[test]
    fn test_collect_all() {
        let snapshot = snapshot();
        let outs = stereo_outs(&snapshot);
        assert_eq!(
            outs.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["Built-in Audio Analog Stereo", "Speakers", "firefox"]
        );
        let speakers = stereo_speakers(&snapshot);
        assert_eq!(
            speakers.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["Built-in Audio Analog Stereo", "Speakers"]
        );
    }
}
