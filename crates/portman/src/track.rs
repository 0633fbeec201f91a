//! Connection tracks
//!
//! A track is a boolean control over one or more pieces of routing state:
//!
//! - **Connection**: one connection between two graph ports
//! - **MixerEnum**: a hardware mixer element switched between two enumerated items
//! - **MixerVolume**: a hardware mixer level switched between 0 and a fixed level
//! - **Bundle**: several tracks driven together; reads the first member
//! - **Swap**: exchanges the states of two paired halves
//! - **Push**: copies one half's states onto the other
//!
//! Tracks hold no state of their own. They are rebuilt on every binding
//! rebuild and compare equal when built from the same arguments, which is
//! how the control loop decides whether anything changed.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::TrackError;
use crate::mirror::GraphMirror;
use crate::mixer::{MixerControl, MixerRegistry};
use crate::service::GraphService;
use crate::types::PortRef;

/// What a connection track needs to read and change the graph.
#[derive(Clone)]
pub struct GraphHandle {
    mirror: Arc<GraphMirror>,
    service: Arc<dyn GraphService>,
}

impl GraphHandle {
    pub fn new(mirror: Arc<GraphMirror>, service: Arc<dyn GraphService>) -> Self {
        Self { mirror, service }
    }

    pub fn mirror(&self) -> &Arc<GraphMirror> {
        &self.mirror
    }

    pub fn service(&self) -> &Arc<dyn GraphService> {
        &self.service
    }

    pub fn connection_track(&self, a: PortRef, b: PortRef) -> ConnectionTrack {
        ConnectionTrack::Connection(ConnectionLeaf {
            a,
            b,
            graph: self.clone(),
        })
    }

    /// A bundle connecting `a_refs[i]` to `b_refs[i]` for every `i`.
    pub fn multi_connection_track(
        &self,
        a_refs: &[PortRef],
        b_refs: &[PortRef],
    ) -> Result<ConnectionTrack, TrackError> {
        if a_refs.len() != b_refs.len() {
            return Err(TrackError::Arity {
                kind: "connection bundle",
                left: a_refs.len(),
                right: b_refs.len(),
            });
        }
        ConnectionTrack::bundle(
            a_refs
                .iter()
                .zip(b_refs)
                .map(|(a, b)| self.connection_track(a.clone(), b.clone()))
                .collect(),
        )
    }
}

/// One connection between two graph ports.
#[derive(Clone)]
pub struct ConnectionLeaf {
    pub a: PortRef,
    pub b: PortRef,
    graph: GraphHandle,
}

impl PartialEq for ConnectionLeaf {
    fn eq(&self, other: &Self) -> bool {
        self.a == other.a && self.b == other.b
    }
}

impl fmt::Debug for ConnectionLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLeaf")
            .field("a", &self.a)
            .field("b", &self.b)
            .finish()
    }
}

impl ConnectionLeaf {
    fn get(&self) -> Result<bool, TrackError> {
        Ok(self.graph.mirror.is_connected(&self.a, &self.b)?)
    }

    fn set(&self, on: bool) -> Result<(), TrackError> {
        let current = self.get()?;
        let (a, b) = (self.a.full_name(), self.b.full_name());
        if on && !current {
            self.graph.service.connect(&a, &b)?;
        } else if !on && current {
            self.graph.service.disconnect(&a, &b)?;
        }
        Ok(())
    }
}

/// A mixer element switched between two enumerated items.
#[derive(Clone)]
pub struct EnumLeaf {
    pub card: u32,
    pub control: String,
    pub off: String,
    pub on: String,
    handle: Arc<dyn MixerControl>,
}

impl PartialEq for EnumLeaf {
    fn eq(&self, other: &Self) -> bool {
        (self.card, &self.control, &self.off, &self.on)
            == (other.card, &other.control, &other.off, &other.on)
    }
}

impl fmt::Debug for EnumLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EnumLeaf(card_index={}, control_name={:?}, off_setting={:?}, on_setting={:?})",
            self.card, self.control, self.off, self.on
        )
    }
}

/// A mixer level switched between 0 and `level` percent.
#[derive(Clone)]
pub struct VolumeLeaf {
    pub card: u32,
    pub control: String,
    pub level: i64,
    handle: Arc<dyn MixerControl>,
}

impl PartialEq for VolumeLeaf {
    fn eq(&self, other: &Self) -> bool {
        (self.card, &self.control, self.level) == (other.card, &other.control, other.level)
    }
}

impl fmt::Debug for VolumeLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VolumeLeaf(card_index={}, control_name={:?}, on_level={})",
            self.card, self.control, self.level
        )
    }
}

/// Two equal-length halves paired by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    left: Vec<ConnectionTrack>,
    right: Vec<ConnectionTrack>,
}

impl Pairing {
    fn new(
        kind: &'static str,
        left: Vec<ConnectionTrack>,
        right: Vec<ConnectionTrack>,
    ) -> Result<Self, TrackError> {
        if left.len() != right.len() {
            return Err(TrackError::Arity {
                kind,
                left: left.len(),
                right: right.len(),
            });
        }
        if left.is_empty() {
            return Err(TrackError::Empty(kind));
        }
        Ok(Self { left, right })
    }

    /// Split `[l0, r0, l1, r1, ...]` into halves.
    fn interleaved(kind: &'static str, tracks: Vec<ConnectionTrack>) -> Result<Self, TrackError> {
        if tracks.len() % 2 != 0 {
            return Err(TrackError::Arity {
                kind,
                left: tracks.len().div_ceil(2),
                right: tracks.len() / 2,
            });
        }
        let mut left = Vec::with_capacity(tracks.len() / 2);
        let mut right = Vec::with_capacity(tracks.len() / 2);
        for (i, track) in tracks.into_iter().enumerate() {
            if i % 2 == 0 {
                left.push(track);
            } else {
                right.push(track);
            }
        }
        Self::new(kind, left, right)
    }

    pub fn left(&self) -> &[ConnectionTrack] {
        &self.left
    }

    pub fn right(&self) -> &[ConnectionTrack] {
        &self.right
    }

    fn states(&self) -> Result<(Vec<bool>, Vec<bool>), TrackError> {
        Ok((read_all(&self.left)?, read_all(&self.right)?))
    }

    fn differ(&self) -> Result<bool, TrackError> {
        let (left, right) = self.states()?;
        Ok(left != right)
    }
}

fn read_all(tracks: &[ConnectionTrack]) -> Result<Vec<bool>, TrackError> {
    tracks.iter().map(ConnectionTrack::get).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionTrack {
    Connection(ConnectionLeaf),
    MixerEnum(EnumLeaf),
    MixerVolume(VolumeLeaf),
    Bundle(Vec<ConnectionTrack>),
    Swap(Pairing),
    Push(Pairing),
}

impl ConnectionTrack {
    /// Switch `control` on card `card` between the items `off` and `on`.
    ///
    /// Opens (or reuses) the mixer handle now, so a missing device fails here.
    pub fn mixer_enum(
        registry: &MixerRegistry,
        card: u32,
        control: &str,
        off: &str,
        on: &str,
    ) -> Result<Self, TrackError> {
        let handle = registry.control(card, control)?;
        Ok(Self::MixerEnum(EnumLeaf {
            card,
            control: control.to_string(),
            off: off.to_string(),
            on: on.to_string(),
            handle,
        }))
    }

    /// Switch `control` on card `card` between 0 and `level` percent.
    pub fn mixer_volume(
        registry: &MixerRegistry,
        card: u32,
        control: &str,
        level: i64,
    ) -> Result<Self, TrackError> {
        let handle = registry.control(card, control)?;
        Ok(Self::MixerVolume(VolumeLeaf {
            card,
            control: control.to_string(),
            level,
            handle,
        }))
    }

    pub fn bundle(tracks: Vec<ConnectionTrack>) -> Result<Self, TrackError> {
        if tracks.is_empty() {
            return Err(TrackError::Empty("bundle"));
        }
        Ok(Self::Bundle(tracks))
    }

    /// Exchange the states of `a[i]` and `b[i]` on every `set`.
    pub fn swap(a: Vec<ConnectionTrack>, b: Vec<ConnectionTrack>) -> Result<Self, TrackError> {
        Ok(Self::Swap(Pairing::new("swap", a, b)?))
    }

    /// Swap over `[a0, b0, a1, b1, ...]`.
    pub fn swap_interleaved(tracks: Vec<ConnectionTrack>) -> Result<Self, TrackError> {
        Ok(Self::Swap(Pairing::interleaved("swap", tracks)?))
    }

    /// Copy the state of `from[i]` onto `to[i]` on every `set`.
    pub fn push(from: Vec<ConnectionTrack>, to: Vec<ConnectionTrack>) -> Result<Self, TrackError> {
        Ok(Self::Push(Pairing::new("push", from, to)?))
    }

    /// Push over `[from0, to0, from1, to1, ...]`.
    pub fn push_interleaved(tracks: Vec<ConnectionTrack>) -> Result<Self, TrackError> {
        Ok(Self::Push(Pairing::interleaved("push", tracks)?))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::MixerEnum(_) => "mixer enum",
            Self::MixerVolume(_) => "mixer volume",
            Self::Bundle(_) => "bundle",
            Self::Swap(_) => "swap",
            Self::Push(_) => "push",
        }
    }

    /// Current state. A bundle reports its first member; swap and push
    /// report whether their halves differ.
    pub fn get(&self) -> Result<bool, TrackError> {
        match self {
            Self::Connection(leaf) => leaf.get(),
            Self::MixerEnum(leaf) => Ok(leaf.handle.enum_value()? == leaf.on),
            Self::MixerVolume(leaf) => Ok(leaf.handle.level()? == leaf.level),
            Self::Bundle(tracks) => match tracks.first() {
                Some(first) => first.get(),
                None => Err(TrackError::Empty("bundle")),
            },
            Self::Swap(pairing) | Self::Push(pairing) => pairing.differ(),
        }
    }

    /// Drive the track. Swap and push ignore `on`.
    ///
    /// Not atomic: a failing bundle member leaves earlier members changed
    /// and later ones untouched.
    pub fn set(&self, on: bool) -> Result<(), TrackError> {
        match self {
            Self::Connection(leaf) => leaf.set(on),
            Self::MixerEnum(leaf) => {
                let item = if on { &leaf.on } else { &leaf.off };
                Ok(leaf.handle.set_enum_value(item)?)
            }
            Self::MixerVolume(leaf) => Ok(leaf.handle.set_level(if on { leaf.level } else { 0 })?),
            Self::Bundle(tracks) => {
                for track in tracks {
                    track.set(on)?;
                }
                Ok(())
            }
            Self::Swap(pairing) => {
                let (left, right) = pairing.states()?;
                debug!("swap {:?} <-> {:?}", left, right);
                for (track, state) in pairing.right.iter().zip(&left) {
                    track.set(*state)?;
                }
                for (track, state) in pairing.left.iter().zip(&right) {
                    track.set(*state)?;
                }
                Ok(())
            }
            Self::Push(pairing) => {
                let from = read_all(&pairing.left)?;
                debug!("push {:?}", from);
                for (track, state) in pairing.right.iter().zip(&from) {
                    track.set(*state)?;
                }
                Ok(())
            }
        }
    }

    /// Write a line (or lines) describing what `label` is bound to.
    pub fn describe(&self, label: char, out: &mut dyn Write) -> io::Result<()> {
        match self {
            Self::Connection(leaf) => write!(
                out,
                "{} {} {} {} {}\r\n",
                label, leaf.a.client, leaf.a.port, leaf.b.client, leaf.b.port
            ),
            Self::MixerEnum(leaf) => {
                write!(out, "{} {} {} {}\r\n", label, leaf.control, leaf.on, leaf.off)
            }
            Self::MixerVolume(leaf) => {
                write!(out, "{} {} {} 0\r\n", label, leaf.control, leaf.level)
            }
            Self::Bundle(tracks) => {
                for track in tracks {
                    if let Err(e) = track.describe(label, out) {
                        if let Err(write_err) = write!(out, "{} {:?} {}\r\n", label, track, e) {
                            warn!("Cannot describe {} member {:?}: {}", label, track, write_err);
                        }
                    }
                }
                Ok(())
            }
            Self::Swap(_) => write!(out, "{} Swap\r\n", label),
            Self::Push(_) => write!(out, "{} Push\r\n", label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryMixer;
    use crate::error::MixerError;

    fn mixer() -> (MemoryMixer, MixerRegistry) {
        let mixer = MemoryMixer::new();
        for n in 1..=4 {
            mixer.add_enum(1, &format!("PCM {:02}", n), &["Off", "Mix A", "Mix B"], "Off");
            mixer.add_volume(1, &format!("Mix A Input {:02}", n), 0);
        }
        let registry = MixerRegistry::new(mixer.clone());
        (mixer, registry)
    }

    fn switch(registry: &MixerRegistry, n: u32) -> ConnectionTrack {
        ConnectionTrack::mixer_enum(registry, 1, &format!("PCM {:02}", n), "Off", "Mix A").unwrap()
    }

    fn states(tracks: &[&ConnectionTrack]) -> Vec<bool> {
        tracks.iter().map(|t| t.get().unwrap()).collect()
    }

    #[test]
    fn test_enum_round_trip() {
        let (_mixer, registry) = mixer();
        let track = switch(&registry, 1);
        let before = track.get().unwrap();
        track.set(!before).unwrap();
        assert_eq!(track.get().unwrap(), !before);
        track.set(before).unwrap();
        assert_eq!(track.get().unwrap(), before);
    }

    #[test]
    fn test_volume_round_trip() {
        let (mixer, registry) = mixer();
        let track = ConnectionTrack::mixer_volume(&registry, 1, "Mix A Input 01", 80).unwrap();
        assert!(!track.get().unwrap());
        track.set(true).unwrap();
        assert!(track.get().unwrap());
        assert_eq!(mixer.level(1, "Mix A Input 01"), Some(80));
        track.set(false).unwrap();
        assert_eq!(mixer.level(1, "Mix A Input 01"), Some(0));
    }

    #[test]
    fn test_volume_other_level_reads_off() {
        let (mixer, registry) = mixer();
        let track = ConnectionTrack::mixer_volume(&registry, 1, "Mix A Input 01", 100).unwrap();
        mixer.set_level_directly(1, "Mix A Input 01", 60);
        assert!(!track.get().unwrap());
    }

    #[test]
    fn test_enum_unknown_setting() {
        let (_mixer, registry) = mixer();
        let track =
            ConnectionTrack::mixer_enum(&registry, 1, "PCM 01", "Off", "Mix Z").unwrap();
        let err = track.set(true).unwrap_err();
        assert!(matches!(
            err,
            TrackError::Mixer(MixerError::UnknownSetting { .. })
        ));
    }

    #[test]
    fn test_missing_control_fails_at_construction() {
        let (_mixer, registry) = mixer();
        let err = ConnectionTrack::mixer_enum(&registry, 1, "PCM 99", "Off", "Mix A").unwrap_err();
        assert!(matches!(err, TrackError::Mixer(MixerError::Open { .. })));
    }

    #[test]
    fn test_swap_exchanges_states() {
        let (_mixer, registry) = mixer();
        let (t1, t2, t3, t4) = (
            switch(&registry, 1),
            switch(&registry, 2),
            switch(&registry, 3),
            switch(&registry, 4),
        );
        t1.set(true).unwrap();
        t2.set(false).unwrap();
        t3.set(false).unwrap();
        t4.set(true).unwrap();

        let swap = ConnectionTrack::swap(
            vec![t1.clone(), t2.clone()],
            vec![t3.clone(), t4.clone()],
        )
        .unwrap();
        assert!(swap.get().unwrap());

        // The argument is ignored
        swap.set(true).unwrap();
        assert_eq!(states(&[&t1, &t2]), vec![false, true]);
        assert_eq!(states(&[&t3, &t4]), vec![true, false]);

        swap.set(false).unwrap();
        assert_eq!(states(&[&t1, &t2]), vec![true, false]);
        assert_eq!(states(&[&t3, &t4]), vec![false, true]);
    }

    #[test]
    fn test_swap_interleaved_pairs_by_position() {
        let (_mixer, registry) = mixer();
        let (t1, t2) = (switch(&registry, 1), switch(&registry, 2));
        t1.set(true).unwrap();

        let swap = ConnectionTrack::swap_interleaved(vec![t1.clone(), t2.clone()]).unwrap();
        swap.set(false).unwrap();
        assert!(!t1.get().unwrap());
        assert!(t2.get().unwrap());
    }

    #[test]
    fn test_push_copies_one_way() {
        let (_mixer, registry) = mixer();
        let (from, to) = (switch(&registry, 1), switch(&registry, 2));
        from.set(true).unwrap();
        to.set(false).unwrap();

        let push = ConnectionTrack::push(vec![from.clone()], vec![to.clone()]).unwrap();
        assert!(push.get().unwrap());

        push.set(false).unwrap();
        assert!(to.get().unwrap());
        assert!(from.get().unwrap());
        assert!(!push.get().unwrap());
    }

    #[test]
    fn test_bundle_reads_first_and_sets_all() {
        let (_mixer, registry) = mixer();
        let members: Vec<_> = (1..=3).map(|n| switch(&registry, n)).collect();
        let bundle = ConnectionTrack::bundle(members.clone()).unwrap();

        members[1].set(true).unwrap();
        assert!(!bundle.get().unwrap());

        bundle.set(true).unwrap();
        assert!(members.iter().all(|t| t.get().unwrap()));
    }

    #[test]
    fn test_bundle_partial_failure() {
        let (mixer, registry) = mixer();
        let bystander = switch(&registry, 4);
        bystander.set(true).unwrap();

        let members: Vec<_> = (1..=3).map(|n| switch(&registry, n)).collect();
        let bundle = ConnectionTrack::bundle(members.clone()).unwrap();
        mixer.fail_writes(1, "PCM 02");

        assert!(bundle.set(true).is_err());
        assert!(members[0].get().unwrap());
        assert!(!members[1].get().unwrap());
        assert!(!members[2].get().unwrap());
        assert!(bystander.get().unwrap());
    }

    #[test]
    fn test_arity_checked_at_construction() {
        let (_mixer, registry) = mixer();
        let odd: Vec<_> = (1..=3).map(|n| switch(&registry, n)).collect();
        assert!(matches!(
            ConnectionTrack::swap_interleaved(odd.clone()),
            Err(TrackError::Arity { kind: "swap", .. })
        ));
        assert!(matches!(
            ConnectionTrack::push(odd.clone(), vec![]),
            Err(TrackError::Arity { kind: "push", left: 3, right: 0 })
        ));
        assert!(matches!(
            ConnectionTrack::swap(vec![], vec![]),
            Err(TrackError::Empty("swap"))
        ));
        assert!(matches!(
            ConnectionTrack::bundle(vec![]),
            Err(TrackError::Empty("bundle"))
        ));
    }

    #[test]
    fn test_equality_by_arguments() {
        let (_mixer, registry) = mixer();
        assert_eq!(switch(&registry, 1), switch(&registry, 1));
        assert_ne!(switch(&registry, 1), switch(&registry, 2));

        let other_on =
            ConnectionTrack::mixer_enum(&registry, 1, "PCM 01", "Off", "Mix B").unwrap();
        assert_ne!(switch(&registry, 1), other_on);

        let a = ConnectionTrack::swap_interleaved(vec![switch(&registry, 1), switch(&registry, 2)]);
        let b = ConnectionTrack::swap_interleaved(vec![switch(&registry, 1), switch(&registry, 2)]);
        assert_eq!(a.unwrap(), b.unwrap());

        let push = ConnectionTrack::push_interleaved(vec![switch(&registry, 1), switch(&registry, 2)]);
        let swap = ConnectionTrack::swap_interleaved(vec![switch(&registry, 1), switch(&registry, 2)]);
        assert_ne!(push.unwrap(), swap.unwrap());
    }

    #[test]
    fn test_describe() {
        let (_mixer, registry) = mixer();
        let bundle = ConnectionTrack::bundle(vec![
            switch(&registry, 1),
            ConnectionTrack::mixer_volume(&registry, 1, "Mix A Input 01", 100).unwrap(),
        ])
        .unwrap();

        let mut out = Vec::new();
        bundle.describe('Q', &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Q PCM 01 Mix A Off\r\nQ Mix A Input 01 100 0\r\n"
        );

        let mut out = Vec::new();
        ConnectionTrack::swap_interleaved(vec![switch(&registry, 1), switch(&registry, 2)])
            .unwrap()
            .describe('W', &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "W Swap\r\n");
    }

    /// Fails the first write, then accepts everything.
    #[derive(Default)]
    struct Hiccup {
        failed: bool,
        written: Vec<u8>,
    }

    impl Write for Hiccup {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(io::Error::new(io::ErrorKind::Other, "terminal hiccup"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_describe_bundle_continues_after_member_failure() {
        let (_mixer, registry) = mixer();
        let bundle = ConnectionTrack::bundle(vec![
            switch(&registry, 1),
            ConnectionTrack::mixer_volume(&registry, 1, "Mix A Input 01", 100).unwrap(),
        ])
        .unwrap();

        let mut out = Hiccup::default();
        bundle.describe('Q', &mut out).unwrap();

        let text = String::from_utf8(out.written).unwrap();
        let lines: Vec<_> = text.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Q ") && lines[0].ends_with("terminal hiccup"));
        assert_eq!(lines[1], "Q Mix A Input 01 100 0");
    }
}
