//! Key bindings and the interactive control loop
//!
//! `ControlLoop` asks a `BindingSource` for a fresh key -> track mapping on
//! every rebuild. Rebuilds happen once at startup, after each settled burst
//! of graph changes (on the debouncer thread) and after every keystroke (on
//! the input thread). When the new mapping equals the old one only the
//! status line is redrawn.
//!
//! The status line has one character per binding, uppercase when the
//! track's `get()` is true.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::mirror::GraphMirror;
use crate::track::ConnectionTrack;
use crate::types::GraphSnapshot;

/// Ordered key -> track mapping. Keys are stored uppercase; inserting an
/// existing key replaces its track in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: Vec<(char, ConnectionTrack)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: char, track: ConnectionTrack) {
        let key = key.to_ascii_uppercase();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = track,
            None => self.entries.push((key, track)),
        }
    }

    /// Insert the track `build` returns, or log why it could not be built
    /// and leave the other bindings alone.
    pub fn try_insert<E: fmt::Display>(
        &mut self,
        key: char,
        build: impl FnOnce() -> Result<ConnectionTrack, E>,
    ) {
        match build() {
            Ok(track) => self.insert(key, track),
            Err(e) => warn!("Not binding {:?}: {}", key, e),
        }
    }

    pub fn get(&self, key: char) -> Option<&ConnectionTrack> {
        let key = key.to_ascii_uppercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, t)| t)
    }

    pub fn keys(&self) -> impl Iterator<Item = char> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, &ConnectionTrack)> {
        self.entries.iter().map(|(k, t)| (*k, t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds bindings from the current graph. Setups supply one of these.
pub trait BindingSource: Send + Sync {
    fn bindings(&self, snapshot: &GraphSnapshot) -> anyhow::Result<Bindings>;
}

impl<F> BindingSource for F
where
    F: Fn(&GraphSnapshot) -> anyhow::Result<Bindings> + Send + Sync,
{
    fn bindings(&self, snapshot: &GraphSnapshot) -> anyhow::Result<Bindings> {
        self(snapshot)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Idle,
    Bound(Bindings),
    Terminated,
}

pub struct ControlLoop {
    mirror: Arc<GraphMirror>,
    source: Box<dyn BindingSource>,
    state: Mutex<LoopState>,
    out: Mutex<Box<dyn Write + Send>>,
}

/// One status character per binding, in binding order.
pub fn status_line(bindings: &Bindings) -> String {
    bindings
        .iter()
        .map(|(key, track)| match track.get() {
            Ok(true) => key.to_ascii_uppercase(),
            Ok(false) => key.to_ascii_lowercase(),
            Err(e) => {
                warn!("Reading {:?} failed: {}", key, e);
                key.to_ascii_lowercase()
            }
        })
        .collect()
}

impl ControlLoop {
    pub fn new(
        mirror: Arc<GraphMirror>,
        source: impl BindingSource + 'static,
        out: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            mirror,
            source: Box::new(source),
            state: Mutex::new(LoopState::Idle),
            out: Mutex::new(out),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_out(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LoopState {
        self.lock_state().clone()
    }

    /// Current bindings; empty before the first rebuild and after shutdown.
    pub fn bindings(&self) -> Bindings {
        match &*self.lock_state() {
            LoopState::Bound(bindings) => bindings.clone(),
            LoopState::Idle | LoopState::Terminated => Bindings::new(),
        }
    }

    pub fn status(&self) -> String {
        status_line(&self.bindings())
    }

    /// Re-derive bindings from the current snapshot and redraw.
    ///
    /// A failing binding source keeps the previous bindings. Only terminal
    /// write failures are returned.
    pub fn rebuild(&self) -> io::Result<()> {
        // Held for the whole rebuild so a stale snapshot never replaces a newer one
        let mut state = self.lock_state();
        if *state == LoopState::Terminated {
            return Ok(());
        }

        let snapshot = self.mirror.snapshot();
        let fresh = match self.source.bindings(&snapshot) {
            Ok(bindings) => bindings,
            Err(e) => {
                warn!("Binding function failed: {:#}", e);
                let mut out = self.lock_out();
                write!(out, "\r\n{:#}\r\n", e)?;
                return out.flush();
            }
        };

        let mut out = self.lock_out();
        if let LoopState::Bound(current) = &*state {
            if *current == fresh {
                write!(out, "\r\x1b[K{}", status_line(current))?;
                return out.flush();
            }
        }

        debug!("Bindings changed: {}", fresh.keys().collect::<String>());
        write!(out, "\r\n\r\n")?;
        for (key, track) in fresh.iter() {
            if let Err(e) = track.describe(key, &mut **out) {
                warn!("Describing {:?} failed: {}", key, e);
                write!(out, "{} {}\r\n", key, e)?;
            }
        }
        write!(out, "\r\n\r\x1b[K{}", status_line(&fresh))?;
        *state = LoopState::Bound(fresh);
        out.flush()
    }

    /// Toggle the track bound to `key` (any case), then rebuild.
    pub fn handle_key(&self, key: char) -> io::Result<()> {
        let track = self.bindings().get(key).cloned();
        if let Some(track) = track {
            let toggled = track.get().and_then(|on| track.set(!on));
            if let Err(e) = toggled {
                warn!("Toggling {:?} failed: {}", key.to_ascii_uppercase(), e);
                write!(self.lock_out(), "\r\n{}: {}\r\n", key.to_ascii_uppercase(), e)?;
            }
        }
        self.rebuild()
    }

    /// Dispatch keys until the iterator ends, then stop rebuilding.
    pub fn run(&self, keys: impl IntoIterator<Item = char>) -> io::Result<()> {
        for key in keys {
            if let Err(e) = self.handle_key(key) {
                self.terminate();
                return Err(e);
            }
        }
        self.terminate();
        Ok(())
    }

    pub fn terminate(&self) {
        let mut state = self.lock_state();
        if *state != LoopState::Terminated {
            *state = LoopState::Terminated;
            info!("Control loop terminated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryMixer;
    use crate::mixer::MixerRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Screen(Arc<Mutex<Vec<u8>>>);

    impl Write for Screen {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Screen {
        fn take(&self) -> String {
            String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
        }
    }

    fn setup() -> (Arc<GraphMirror>, Arc<MixerRegistry>) {
        let mixer = MemoryMixer::new();
        mixer.add_enum(1, "PCM 01", &["Off", "Mix A"], "Off");
        mixer.add_enum(1, "PCM 02", &["Off", "Mix A"], "Mix A");
        let mirror = Arc::new(GraphMirror::new(Duration::from_millis(20)).unwrap());
        (mirror, Arc::new(MixerRegistry::new(mixer)))
    }

    fn two_switches(registry: Arc<MixerRegistry>) -> impl BindingSource {
        move |_: &GraphSnapshot| -> anyhow::Result<Bindings> {
            let mut bindings = Bindings::new();
            bindings.insert('q', ConnectionTrack::mixer_enum(&registry, 1, "PCM 01", "Off", "Mix A")?);
            bindings.insert('W', ConnectionTrack::mixer_enum(&registry, 1, "PCM 02", "Off", "Mix A")?);
            Ok(bindings)
        }
    }

    #[test]
    fn test_first_rebuild_describes_then_refreshes() {
        let (mirror, registry) = setup();
        let screen = Screen::default();
        let control = ControlLoop::new(mirror, two_switches(registry), Box::new(screen.clone()));
        assert_eq!(control.state(), LoopState::Idle);

        control.rebuild().unwrap();
        assert_eq!(
            screen.take(),
            "\r\n\r\nQ PCM 01 Mix A Off\r\nW PCM 02 Mix A Off\r\n\r\n\r\x1b[KqW"
        );
        assert_eq!(control.bindings().keys().collect::<String>(), "QW");

        control.rebuild().unwrap();
        assert_eq!(screen.take(), "\r\x1b[KqW");
    }

    #[test]
    fn test_key_toggles_case_insensitively() {
        let (mirror, registry) = setup();
        let screen = Screen::default();
        let control = ControlLoop::new(mirror, two_switches(registry), Box::new(screen.clone()));
        control.rebuild().unwrap();

        control.handle_key('q').unwrap();
        assert_eq!(control.status(), "QW");
        control.handle_key('w').unwrap();
        assert_eq!(control.status(), "Qw");
        control.handle_key('Q').unwrap();
        assert_eq!(control.status(), "qw");
        assert!(screen.take().ends_with("\r\x1b[Kqw"));
    }

    #[test]
    fn test_unbound_key_still_refreshes() {
        let (mirror, registry) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let inner = two_switches(registry);
        let source = move |snapshot: &GraphSnapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.bindings(snapshot)
        };
        let control = ControlLoop::new(mirror, source, Box::new(io::sink()));
        control.rebuild().unwrap();
        control.handle_key('x').unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(control.status(), "qW");
    }

    #[test]
    fn test_failing_source_keeps_bindings() {
        let (mirror, registry) = setup();
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let inner = two_switches(registry);
        let source = move |snapshot: &GraphSnapshot| {
            if flag.load(Ordering::SeqCst) {
                anyhow::bail!("speaker unplugged");
            }
            inner.bindings(snapshot)
        };
        let screen = Screen::default();
        let control = ControlLoop::new(mirror, source, Box::new(screen.clone()));
        control.rebuild().unwrap();
        screen.take();

        fail.store(true, Ordering::SeqCst);
        control.rebuild().unwrap();
        assert!(screen.take().contains("speaker unplugged"));
        assert_eq!(control.bindings().len(), 2);
    }

    #[test]
    fn test_failing_toggle_does_not_stop_loop() {
        let mixer = MemoryMixer::new();
        mixer.add_enum(1, "PCM 01", &["Off", "Mix A"], "Off");
        mixer.add_enum(1, "PCM 02", &["Off", "Mix A"], "Off");
        mixer.fail_writes(1, "PCM 01");
        let registry = Arc::new(MixerRegistry::new(mixer));
        let mirror = Arc::new(GraphMirror::new(Duration::from_millis(20)).unwrap());

        let control = ControlLoop::new(mirror, two_switches(registry), Box::new(io::sink()));
        control.rebuild().unwrap();
        control.run("qw".chars()).unwrap();

        assert_eq!(control.state(), LoopState::Terminated);
        assert!(control.bindings().is_empty());
        // Terminated loops ignore late settle notifications
        control.rebuild().unwrap();
        assert_eq!(control.state(), LoopState::Terminated);
    }

    #[test]
    fn test_bindings_insert_replaces() {
        let (_mirror, registry) = setup();
        let mut bindings = Bindings::new();
        bindings.insert('a', ConnectionTrack::mixer_enum(&registry, 1, "PCM 01", "Off", "Mix A").unwrap());
        bindings.insert('b', ConnectionTrack::mixer_enum(&registry, 1, "PCM 02", "Off", "Mix A").unwrap());
        bindings.insert('A', ConnectionTrack::mixer_enum(&registry, 1, "PCM 02", "Off", "Mix A").unwrap());
        assert_eq!(bindings.keys().collect::<String>(), "AB");
        assert_eq!(bindings.get('a'), bindings.get('B'));

        bindings.try_insert('c', || ConnectionTrack::mixer_enum(&registry, 9, "Nope", "Off", "On"));
        assert_eq!(bindings.len(), 2);
    }
}
