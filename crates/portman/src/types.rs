use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};

use crate::error::GraphError;

/// Identifies one port as seen from the other end of a connection.
///
/// `client` is the stable identity of the owning client. `alias` is the
/// client name the graph service used when it reported this port, which
/// for proxy clients (e.g. network bridges) can differ from `client`.
/// Connect/disconnect requests address the port as `alias:port`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRef {
    pub client: String,
    pub alias: String,
    pub port: String,
}

impl PortRef {
    pub fn new(client: impl Into<String>, alias: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            alias: alias.into(),
            port: port.into(),
        }
    }

    /// The `alias:port` name the graph service understands.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.alias, self.port)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.client == self.alias {
            write!(f, "{}:{}", self.alias, self.port)
        } else {
            write!(f, "{}:{} ({})", self.alias, self.port, self.client)
        }
    }
}

/// Split a full `client:port` name at the first colon.
pub fn split_port_name(full_name: &str) -> Option<(&str, &str)> {
    full_name.split_once(':')
}

/// The set of ports one port is connected to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortRecord {
    pub connections: BTreeSet<PortRef>,
}

/// All ports registered under one client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRecord {
    pub ports: BTreeMap<PortRef, PortRecord>,
}

/// In-memory mirror of the audio graph: client name -> ports -> connections.
///
/// Connections are recorded on both endpoints or on neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSnapshot {
    pub clients: BTreeMap<String, ClientRecord>,
}

impl GraphSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_client(&mut self, name: &str) {
        self.clients.entry(name.to_string()).or_default();
    }

    /// Drop a client and every port it owned, scrubbing those ports from
    /// their peers so connections stay symmetric.
    pub fn remove_client(&mut self, name: &str) -> bool {
        let Some(record) = self.clients.remove(name) else {
            return false;
        };
        for (port, port_record) in record.ports {
            for peer in port_record.connections {
                self.forget_peer(&peer, &port);
            }
        }
        true
    }

    /// Register a port, creating its client entry if the client-registration
    /// event has not arrived yet.
    pub fn add_port(&mut self, port: PortRef) {
        self.clients
            .entry(port.client.clone())
            .or_default()
            .ports
            .entry(port)
            .or_default();
    }

    pub fn remove_port(&mut self, port: &PortRef) -> bool {
        let removed = self
            .clients
            .get_mut(&port.client)
            .and_then(|client| client.ports.remove(port));
        match removed {
            Some(record) => {
                for peer in record.connections {
                    self.forget_peer(&peer, port);
                }
                true
            }
            None => false,
        }
    }

    fn forget_peer(&mut self, port: &PortRef, peer: &PortRef) {
        if let Some(record) = self
            .clients
            .get_mut(&port.client)
            .and_then(|client| client.ports.get_mut(port))
        {
            record.connections.remove(peer);
        }
    }

    pub fn port(&self, port: &PortRef) -> Option<&PortRecord> {
        self.clients.get(&port.client)?.ports.get(port)
    }

    pub fn contains_port(&self, port: &PortRef) -> bool {
        self.port(port).is_some()
    }

    /// Record or erase the connection between `a` and `b` on both ends.
    ///
    /// Fails without touching the snapshot when either port is unknown.
    pub fn set_connected(&mut self, a: &PortRef, b: &PortRef, connected: bool) -> Result<(), GraphError> {
        if !self.contains_port(a) {
            return Err(GraphError::UnknownPort(a.clone()));
        }
        if !self.contains_port(b) {
            return Err(GraphError::UnknownPort(b.clone()));
        }

        for (this, other) in [(a, b), (b, a)] {
            if let Some(record) = self
                .clients
                .get_mut(&this.client)
                .and_then(|client| client.ports.get_mut(this))
            {
                if connected {
                    record.connections.insert(other.clone());
                } else {
                    record.connections.remove(other);
                }
            }
        }
        Ok(())
    }

    /// Whether `b` is in `a`'s connection set.
    pub fn is_connected(&self, a: &PortRef, b: &PortRef) -> Result<bool, GraphError> {
        self.port(a)
            .map(|record| record.connections.contains(b))
            .ok_or_else(|| GraphError::UnknownPort(a.clone()))
    }

    /// Client names in sorted order.
    pub fn client_names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn ports_of(&self, client: &str) -> Option<impl Iterator<Item = &PortRef>> {
        self.clients.get(client).map(|record| record.ports.keys())
    }

    /// Every connection as an ordered pair, each pair listed once.
    pub fn connections(&self) -> Vec<(PortRef, PortRef)> {
        let mut pairs = Vec::new();
        for client in self.clients.values() {
            for (port, record) in &client.ports {
                for peer in &record.connections {
                    if port < peer {
                        pairs.push((port.clone(), peer.clone()));
                    }
                }
            }
        }
        pairs
    }

    pub fn write_clients(&self, out: &mut impl Write) -> io::Result<()> {
        for name in self.client_names() {
            writeln!(out, "{}", name)?;
        }
        Ok(())
    }

    pub fn write_ports(&self, out: &mut impl Write) -> io::Result<()> {
        for (name, client) in &self.clients {
            writeln!(out, "{}", name)?;
            let ports: Vec<String> = client.ports.keys().map(|p| format!("{:?}", p.port)).collect();
            writeln!(out, "{{{}}}", ports.join(", "))?;
        }
        Ok(())
    }

    pub fn write_connections(&self, out: &mut impl Write) -> io::Result<()> {
        for (name, client) in &self.clients {
            writeln!(out, "{}", name)?;
            for (port, record) in &client.ports {
                writeln!(out, "- {}", port.port)?;
                for peer in &record.connections {
                    writeln!(out, "  -> {}", peer.full_name())?;
                }
            }
        }
        Ok(())
    }
}
