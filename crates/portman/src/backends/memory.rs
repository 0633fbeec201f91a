//! In-process graph and mixer backends.
//!
//! Used by the test suites and by `portman run --dry-run`. `MemoryGraph`
//! behaves like a JACK server that delivers its callbacks synchronously:
//! every change is followed by the matching events and a reorder pulse.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::debug;

use crate::error::{GraphError, MixerError};
use crate::mirror::GraphMirror;
use crate::mixer::{MixerBackend, MixerControl};
use crate::service::{GraphEvent, GraphService, IdentityResolver, PortListing};
use crate::types::split_port_name;

#[derive(Debug, Default)]
struct GraphState {
    clients: BTreeSet<String>,
    ports: BTreeMap<String, BTreeSet<String>>,
    identities: HashMap<String, String>,
}

/// A fake graph server.
#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<GraphState>,
    mirror: Mutex<Option<Weak<GraphMirror>>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver future events to `mirror`.
    pub fn attach(&self, mirror: &Arc<GraphMirror>) {
        *self
            .mirror
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::downgrade(mirror));
    }

    /// Deliver `events` to the attached mirror, if any. Never called with
    /// the state lock held; the mirror resolves identities through `self`.
    fn emit(&self, events: Vec<GraphEvent>) {
        let mirror = self
            .mirror
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(mirror) = mirror {
            for event in events {
                mirror.apply(event, self);
            }
        }
    }

    /// Register a client and its ports.
    pub fn add_client(&self, name: &str, ports: &[&str]) {
        let mut events = vec![GraphEvent::ClientRegistered(name.to_string())];
        {
            let mut state = self.lock();
            state.clients.insert(name.to_string());
            for port in ports {
                let full_name = format!("{}:{}", name, port);
                state.ports.entry(full_name.clone()).or_default();
                events.push(GraphEvent::PortRegistered(full_name));
            }
        }
        events.push(GraphEvent::Reordered);
        self.emit(events);
    }

    /// Unregister a client. Its connections go with it.
    pub fn remove_client(&self, name: &str) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let owned: Vec<String> = state
                .ports
                .keys()
                .filter(|full| split_port_name(full).is_some_and(|(client, _)| client == name))
                .cloned()
                .collect();
            for full_name in owned {
                if let Some(peers) = state.ports.remove(&full_name) {
                    for peer in peers {
                        if let Some(peer_record) = state.ports.get_mut(&peer) {
                            peer_record.remove(&full_name);
                        }
                    }
                }
                events.push(GraphEvent::PortUnregistered(full_name));
            }
            state.clients.remove(name);
        }
        events.push(GraphEvent::ClientUnregistered(name.to_string()));
        events.push(GraphEvent::Reordered);
        self.emit(events);
    }

    /// Report `alias` as a stand-in name for the client `identity`.
    pub fn set_alias(&self, alias: &str, identity: &str) {
        self.lock()
            .identities
            .insert(alias.to_string(), identity.to_string());
    }

    /// Connect two ports without delivering any events.
    pub fn connect_quietly(&self, a: &str, b: &str) {
        let mut state = self.lock();
        state
            .ports
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        state
            .ports
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    /// Whether the server itself (not the mirror) has `a` connected to `b`.
    pub fn has_connection(&self, a: &str, b: &str) -> bool {
        self.lock().ports.get(a).is_some_and(|peers| peers.contains(b))
    }

    fn change(&self, a: &str, b: &str, connected: bool) -> Result<(), GraphError> {
        let fail = |message: &str| {
            let (a, b, message) = (a.to_string(), b.to_string(), message.to_string());
            if connected {
                GraphError::Connect { a, b, message }
            } else {
                GraphError::Disconnect { a, b, message }
            }
        };

        let changed = {
            let mut state = self.lock();
            if !state.ports.contains_key(a) || !state.ports.contains_key(b) {
                return Err(fail("no such port"));
            }
            let mut changed = false;
            for (from, to) in [(a, b), (b, a)] {
                if let Some(peers) = state.ports.get_mut(from) {
                    changed |= if connected {
                        peers.insert(to.to_string())
                    } else {
                        peers.remove(to)
                    };
                }
            }
            changed
        };

        if changed {
            debug!("{} {} {}", a, if connected { "->" } else { "-x" }, b);
            self.emit(vec![
                GraphEvent::PortsConnected {
                    a: a.to_string(),
                    b: b.to_string(),
                    connected,
                },
                GraphEvent::Reordered,
            ]);
        }
        Ok(())
    }
}

impl IdentityResolver for MemoryGraph {
    fn resolve_client(&self, alias: &str) -> Result<String, GraphError> {
        let state = self.lock();
        if let Some(identity) = state.identities.get(alias) {
            return Ok(identity.clone());
        }
        let known = state.clients.contains(alias)
            || state
                .ports
                .keys()
                .any(|full| split_port_name(full).is_some_and(|(client, _)| client == alias));
        if known {
            Ok(alias.to_string())
        } else {
            Err(GraphError::UnknownClient(alias.to_string()))
        }
    }
}

impl GraphService for MemoryGraph {
    fn connect(&self, a: &str, b: &str) -> Result<(), GraphError> {
        self.change(a, b, true)
    }

    fn disconnect(&self, a: &str, b: &str) -> Result<(), GraphError> {
        self.change(a, b, false)
    }

    fn list_ports(&self) -> Result<Vec<PortListing>, GraphError> {
        Ok(self
            .lock()
            .ports
            .iter()
            .map(|(name, peers)| PortListing {
                name: name.clone(),
                connections: peers.iter().cloned().collect(),
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
enum Element {
    Enum { items: Vec<String>, current: usize },
    Volume { percent: i64 },
}

#[derive(Debug, Default)]
struct MixerState {
    elements: HashMap<(u32, String), Element>,
    failing: HashSet<(u32, String)>,
}

/// A fake set of sound cards. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryMixer {
    state: Arc<Mutex<MixerState>>,
    opens: Arc<AtomicUsize>,
}

fn lock_mixer(state: &Mutex<MixerState>) -> MutexGuard<'_, MixerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an enumerated control with `items`, currently set to `current`.
    pub fn add_enum(&self, card: u32, control: &str, items: &[&str], current: &str) {
        let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();
        let current = items.iter().position(|i| i == current).unwrap_or(0);
        lock_mixer(&self.state)
            .elements
            .insert((card, control.to_string()), Element::Enum { items, current });
    }

    /// Add a volume control at `percent`.
    pub fn add_volume(&self, card: u32, control: &str, percent: i64) {
        lock_mixer(&self.state)
            .elements
            .insert((card, control.to_string()), Element::Volume { percent });
    }

    /// Make every later write to this control fail.
    pub fn fail_writes(&self, card: u32, control: &str) {
        lock_mixer(&self.state)
            .failing
            .insert((card, control.to_string()));
    }

    /// Counts successful opens.
    pub fn open_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }

    pub fn enum_item(&self, card: u32, control: &str) -> Option<String> {
        match lock_mixer(&self.state).elements.get(&(card, control.to_string()))? {
            Element::Enum { items, current } => items.get(*current).cloned(),
            Element::Volume { .. } => None,
        }
    }

    pub fn level(&self, card: u32, control: &str) -> Option<i64> {
        match lock_mixer(&self.state).elements.get(&(card, control.to_string()))? {
            Element::Volume { percent } => Some(*percent),
            Element::Enum { .. } => None,
        }
    }

    /// Change a level behind the tracks' backs, like another mixer app would.
    pub fn set_level_directly(&self, card: u32, control: &str, percent: i64) {
        if let Some(Element::Volume { percent: current }) = lock_mixer(&self.state)
            .elements
            .get_mut(&(card, control.to_string()))
        {
            *current = percent;
        }
    }
}

impl MixerBackend for MemoryMixer {
    fn open(&self, card: u32, control: &str) -> Result<Arc<dyn MixerControl>, MixerError> {
        let key = (card, control.to_string());
        if !lock_mixer(&self.state).elements.contains_key(&key) {
            return Err(MixerError::Open {
                card,
                control: control.to_string(),
                message: "no such element".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryControl {
            state: Arc::clone(&self.state),
            key,
        }))
    }
}

struct MemoryControl {
    state: Arc<Mutex<MixerState>>,
    key: (u32, String),
}

impl MemoryControl {
    fn io(&self, message: &str) -> MixerError {
        MixerError::Io {
            control: self.key.1.clone(),
            message: message.to_string(),
        }
    }

    fn with_element<T>(
        &self,
        write: bool,
        f: impl FnOnce(&mut Element) -> Result<T, MixerError>,
    ) -> Result<T, MixerError> {
        let mut state = lock_mixer(&self.state);
        if write && state.failing.contains(&self.key) {
            return Err(self.io("write failed"));
        }
        match state.elements.get_mut(&self.key) {
            Some(element) => f(element),
            None => Err(self.io("element went away")),
        }
    }
}

impl MixerControl for MemoryControl {
    fn enum_value(&self) -> Result<String, MixerError> {
        self.with_element(false, |element| match element {
            Element::Enum { items, current } => Ok(items[*current].clone()),
            Element::Volume { .. } => Err(self.io("not an enumerated control")),
        })
    }

    fn set_enum_value(&self, item: &str) -> Result<(), MixerError> {
        self.with_element(true, |element| match element {
            Element::Enum { items, current } => match items.iter().position(|i| i == item) {
                Some(index) => {
                    *current = index;
                    Ok(())
                }
                None => Err(MixerError::UnknownSetting {
                    control: self.key.1.clone(),
                    setting: item.to_string(),
                }),
            },
            Element::Volume { .. } => Err(self.io("not an enumerated control")),
        })
    }

    fn level(&self) -> Result<i64, MixerError> {
        self.with_element(false, |element| match element {
            Element::Volume { percent } => Ok(*percent),
            Element::Enum { .. } => Err(self.io("not a volume control")),
        })
    }

    fn set_level(&self, percent: i64) -> Result<(), MixerError> {
        self.with_element(true, |element| match element {
            Element::Volume { percent: current } => {
                *current = percent.clamp(0, 100);
                Ok(())
            }
            Element::Enum { .. } => Err(self.io("not a volume control")),
        })
    }
}
