//! Live mirror of the audio graph
//!
//! `GraphMirror` owns the `GraphSnapshot` and applies the graph service's
//! registration and connection callbacks to it. Callbacks arrive on a
//! thread the service controls; readers (binding rebuilds) run on the
//! debouncer thread and the input thread. One mutex guards the whole
//! snapshot and every critical section is a short in-memory update or a
//! copy-out, never I/O.
//!
//! Ports are reported by full name (`alias:port`). The alias is resolved to
//! the owning client's stable identity once and cached, so a network proxy
//! client reporting under a temporary name still lands under its real
//! client entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::debounce::{ReorderDebouncer, Subscription};
use crate::error::GraphError;
use crate::service::{GraphEvent, GraphService, IdentityResolver};
use crate::types::{split_port_name, GraphSnapshot, PortRef};

pub struct GraphMirror {
    snapshot: Mutex<GraphSnapshot>,
    identities: Mutex<HashMap<String, String>>,
    debouncer: ReorderDebouncer,
    closed: AtomicBool,
}

impl GraphMirror {
    /// Create an empty mirror and start its reorder debouncer.
    pub fn new(settle: Duration) -> std::io::Result<Self> {
        Ok(Self {
            snapshot: Mutex::new(GraphSnapshot::new()),
            identities: Mutex::new(HashMap::new()),
            debouncer: ReorderDebouncer::start(settle)?,
            closed: AtomicBool::new(false),
        })
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, GraphSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_identities(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.identities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Merge a full enumeration of the current graph into the snapshot.
    ///
    /// Call once after connecting. Callbacks may already be arriving, so the
    /// enumeration is added to whatever they recorded rather than replacing it.
    pub fn populate<S: GraphService + ?Sized>(&self, service: &S) -> Result<(), GraphError> {
        let listings = service.list_ports()?;

        // Resolve names before taking the snapshot lock
        let mut ports = Vec::with_capacity(listings.len());
        let mut pairs = Vec::new();
        for listing in &listings {
            let Some(port) = self.port_ref(&listing.name, service) else {
                warn!("Skipping malformed port name {:?}", listing.name);
                continue;
            };
            for peer_name in &listing.connections {
                if let Some(peer) = self.port_ref(peer_name, service) {
                    pairs.push((port.clone(), peer));
                }
            }
            ports.push(port);
        }

        let mut snapshot = self.lock_snapshot();
        for port in ports {
            snapshot.add_port(port);
        }
        for (a, b) in &pairs {
            if let Err(e) = snapshot.set_connected(a, b, true) {
                debug!("Initial enumeration: {}", e);
            }
        }
        info!(
            "Mirrored {} clients, {} ports, {} connections",
            snapshot.clients.len(),
            listings.len(),
            snapshot.connections().len()
        );
        Ok(())
    }

    /// The stable identity behind a reported client name, resolved once per name.
    pub fn resolve_identity<R: IdentityResolver + ?Sized>(&self, alias: &str, resolver: &R) -> String {
        if let Some(identity) = self.lock_identities().get(alias) {
            return identity.clone();
        }

        // Resolve outside the cache lock; the resolver may call into the service.
        match resolver.resolve_client(alias) {
            Ok(identity) => {
                if identity != alias {
                    debug!("Client {:?} resolves to {:?}", alias, identity);
                }
                self.lock_identities()
                    .entry(alias.to_string())
                    .or_insert(identity)
                    .clone()
            }
            Err(e) => {
                warn!("{}; using the reported name", e);
                alias.to_string()
            }
        }
    }

    /// Build the `PortRef` for a full `alias:port` name.
    pub fn port_ref<R: IdentityResolver + ?Sized>(&self, full_name: &str, resolver: &R) -> Option<PortRef> {
        let (alias, port) = split_port_name(full_name)?;
        let client = self.resolve_identity(alias, resolver);
        Some(PortRef::new(client, alias, port))
    }

    /// Apply one event from the graph service.
    pub fn apply<R: IdentityResolver + ?Sized>(&self, event: GraphEvent, resolver: &R) {
        match event {
            GraphEvent::ClientRegistered(name) => self.on_client_registered(&name),
            GraphEvent::ClientUnregistered(name) => self.on_client_unregistered(&name),
            GraphEvent::PortRegistered(name) => match self.port_ref(&name, resolver) {
                Some(port) => self.on_port_registered(port),
                None => warn!("Ignoring registration of malformed port {:?}", name),
            },
            GraphEvent::PortUnregistered(name) => match self.port_ref(&name, resolver) {
                Some(port) => self.on_port_unregistered(&port),
                None => warn!("Ignoring unregistration of malformed port {:?}", name),
            },
            GraphEvent::PortsConnected { a, b, connected } => {
                match (self.port_ref(&a, resolver), self.port_ref(&b, resolver)) {
                    (Some(a), Some(b)) => self.on_ports_connected(&a, &b, connected),
                    _ => warn!("Ignoring connection between malformed ports {:?} {:?}", a, b),
                }
            }
            GraphEvent::Reordered => self.on_reordered(),
        }
    }

    pub fn on_client_registered(&self, name: &str) {
        if self.is_closed() {
            return;
        }
        debug!("Client registered: {}", name);
        self.lock_snapshot().add_client(name);
    }

    pub fn on_client_unregistered(&self, name: &str) {
        if self.is_closed() {
            return;
        }
        debug!("Client unregistered: {}", name);
        self.lock_snapshot().remove_client(name);
        // The name may be handed to a different client later
        self.lock_identities().remove(name);
    }

    pub fn on_port_registered(&self, port: PortRef) {
        if self.is_closed() {
            return;
        }
        debug!("Port registered: {}", port);
        self.lock_snapshot().add_port(port);
    }

    pub fn on_port_unregistered(&self, port: &PortRef) {
        if self.is_closed() {
            return;
        }
        debug!("Port unregistered: {}", port);
        self.lock_snapshot().remove_port(port);
    }

    /// Record a connect/disconnect. Events naming ports the mirror has not
    /// seen yet are a normal race and are logged and dropped.
    pub fn on_ports_connected(&self, a: &PortRef, b: &PortRef, connected: bool) {
        if self.is_closed() {
            return;
        }
        let result = self.lock_snapshot().set_connected(a, b, connected);
        match result {
            Ok(()) => debug!(
                "{} {} {}",
                a,
                if connected { "->" } else { "-x" },
                b
            ),
            Err(e) => warn!(
                "Port {} between unknown ports {} {}: {}",
                if connected { "connect" } else { "disconnect" },
                a,
                b,
                e
            ),
        }
    }

    pub fn on_reordered(&self) {
        if !self.is_closed() {
            self.debouncer.pulse();
        }
    }

    /// Run `f` against the snapshot while holding the lock. Keep `f` short
    /// and free of I/O.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&GraphSnapshot) -> R) -> R {
        f(&self.lock_snapshot())
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.lock_snapshot().clone()
    }

    pub fn is_connected(&self, a: &PortRef, b: &PortRef) -> Result<bool, GraphError> {
        self.lock_snapshot().is_connected(a, b)
    }

    /// Run `callback` on the debouncer thread once each burst of graph changes settles.
    pub fn on_settled<F>(&self, callback: F) -> Subscription
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.debouncer.subscribe(callback)
    }

    pub fn settle_window(&self) -> Duration {
        self.debouncer.settle_window()
    }

    /// Stop accepting events and shut the debouncer down, waiting for any
    /// in-flight settle notification to finish.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.debouncer.stop();
        debug!("Graph mirror closed");
    }
}

impl Drop for GraphMirror {
    fn drop(&mut self) {
        self.close();
    }
}
