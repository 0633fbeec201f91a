//! The audio-graph service as the rest of the crate sees it.

use crate::error::GraphError;

/// Maps the client name a port was reported under to the stable identity
/// of the client that owns it.
pub trait IdentityResolver {
    fn resolve_client(&self, alias: &str) -> Result<String, GraphError>;
}

/// One existing port and the full names of the ports it is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortListing {
    pub name: String,
    pub connections: Vec<String>,
}

/// Synchronous operations on the external graph. Ports are addressed by
/// their full `client:port` names.
pub trait GraphService: IdentityResolver + Send + Sync {
    fn connect(&self, a: &str, b: &str) -> Result<(), GraphError>;

    fn disconnect(&self, a: &str, b: &str) -> Result<(), GraphError>;

    /// Every current port with its connections, for the initial snapshot.
    fn list_ports(&self) -> Result<Vec<PortListing>, GraphError>;

    /// Stop delivering callbacks. Later requests may fail.
    fn close(&self) {}
}

/// Graph topology changes as delivered by the service's callback thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    ClientRegistered(String),
    ClientUnregistered(String),
    PortRegistered(String),
    PortUnregistered(String),
    PortsConnected { a: String, b: String, connected: bool },
    /// The service finished reordering its graph; feeds the debouncer.
    Reordered,
}
