//! JACK graph service
//!
//! Registers a (process-less) JACK client, forwards its notification
//! callbacks into a `GraphMirror`, and performs connect/disconnect requests
//! by full port name.

use std::sync::{Arc, Mutex, MutexGuard};

use jack::{AsyncClient, Client, ClientOptions, ClientStatus, Control, PortFlags, PortId};
use tracing::{debug, error, info, warn};

use crate::error::GraphError;
use crate::mirror::GraphMirror;
use crate::service::{GraphEvent, GraphService, IdentityResolver, PortListing};

/// Resolves aliases through any JACK client handle.
struct ClientResolver<'a>(&'a Client);

impl IdentityResolver for ClientResolver<'_> {
    fn resolve_client(&self, alias: &str) -> Result<String, GraphError> {
        self.0
            .uuid_for_client_name(alias)
            .and_then(|uuid| self.0.name_by_uuid(&uuid))
            .ok_or_else(|| GraphError::UnknownClient(alias.to_string()))
    }
}

/// Notification handler: turns JACK callbacks into `GraphEvent`s.
pub struct Notifications {
    mirror: Arc<GraphMirror>,
}

impl Notifications {
    fn port_name(client: &Client, port_id: PortId) -> Option<String> {
        let name = client.port_by_id(port_id).and_then(|port| port.name().ok());
        if name.is_none() {
            warn!("JACK reported port id {} that no longer resolves", port_id);
        }
        name
    }
}

impl jack::NotificationHandler for Notifications {
    fn client_registration(&mut self, client: &Client, name: &str, is_registered: bool) {
        let event = if is_registered {
            GraphEvent::ClientRegistered(name.to_string())
        } else {
            GraphEvent::ClientUnregistered(name.to_string())
        };
        self.mirror.apply(event, &ClientResolver(client));
    }

    fn port_registration(&mut self, client: &Client, port_id: PortId, is_registered: bool) {
        let Some(name) = Self::port_name(client, port_id) else {
            return;
        };
        let event = if is_registered {
            GraphEvent::PortRegistered(name)
        } else {
            GraphEvent::PortUnregistered(name)
        };
        self.mirror.apply(event, &ClientResolver(client));
    }

    fn ports_connected(
        &mut self,
        client: &Client,
        port_id_a: PortId,
        port_id_b: PortId,
        are_connected: bool,
    ) {
        let (Some(a), Some(b)) = (
            Self::port_name(client, port_id_a),
            Self::port_name(client, port_id_b),
        ) else {
            return;
        };
        self.mirror.apply(
            GraphEvent::PortsConnected {
                a,
                b,
                connected: are_connected,
            },
            &ClientResolver(client),
        );
    }

    unsafe fn shutdown(&mut self, status: ClientStatus, reason: &str) {
        error!("{}", shutdown_message(status, reason));
    }

    fn port_rename(
        &mut self,
        _client: &Client,
        _port_id: PortId,
        old_name: &str,
        new_name: &str,
    ) -> Control {
        debug!("Port renamed: {} -> {}", old_name, new_name);
        Control::Continue
    }

    fn graph_reorder(&mut self, client: &Client) -> Control {
        self.mirror
            .apply(GraphEvent::Reordered, &ClientResolver(client));
        Control::Continue
    }
}

fn shutdown_message(status: ClientStatus, reason: &str) -> String {
    format!("JACK shutdown! status {:?}: {}", status, reason)
}

/// An active JACK client.
pub struct JackService {
    client: Mutex<Option<AsyncClient<Notifications, ()>>>,
}

impl JackService {
    /// Connect to the JACK server and start delivering callbacks to `mirror`.
    pub fn open(
        client_name: &str,
        no_start_server: bool,
        mirror: Arc<GraphMirror>,
    ) -> Result<Self, GraphError> {
        let options = if no_start_server {
            ClientOptions::NO_START_SERVER
        } else {
            ClientOptions::empty()
        };
        let (client, status) = Client::new(client_name, options)
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;
        debug!("JACK client status: {:?}", status);
        info!("Connected to JACK as {:?}", client.name());

        let active = client
            .activate_async(Notifications { mirror }, ())
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;

        Ok(Self {
            client: Mutex::new(Some(active)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<AsyncClient<Notifications, ()>>> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_client<T>(&self, f: impl FnOnce(&Client) -> Result<T, GraphError>) -> Result<T, GraphError> {
        match self.lock().as_ref() {
            Some(active) => f(active.as_client()),
            None => Err(GraphError::Unavailable("client closed".to_string())),
        }
    }
}

impl Drop for JackService {
    fn drop(&mut self) {
        self.close();
    }
}

impl IdentityResolver for JackService {
    fn resolve_client(&self, alias: &str) -> Result<String, GraphError> {
        self.with_client(|client| ClientResolver(client).resolve_client(alias))
    }
}

impl GraphService for JackService {
    fn connect(&self, a: &str, b: &str) -> Result<(), GraphError> {
        self.with_client(|client| {
            client
                .connect_ports_by_name(a, b)
                .map_err(|e| GraphError::Connect {
                    a: a.to_string(),
                    b: b.to_string(),
                    message: e.to_string(),
                })
        })
    }

    fn disconnect(&self, a: &str, b: &str) -> Result<(), GraphError> {
        self.with_client(|client| {
            client
                .disconnect_ports_by_name(a, b)
                .map_err(|e| GraphError::Disconnect {
                    a: a.to_string(),
                    b: b.to_string(),
                    message: e.to_string(),
                })
        })
    }

    /// Deactivate the client. Callbacks stop before this returns.
    fn close(&self) {
        let Some(active) = self.lock().take() else {
            return;
        };
        match active.deactivate() {
            Ok(_) => debug!("JACK client deactivated"),
            Err(e) => error!("Failed to deactivate JACK client: {}", e),
        }
    }

    fn list_ports(&self) -> Result<Vec<PortListing>, GraphError> {
        self.with_client(|client| {
            let mut listings = Vec::new();
            for name in client.ports(None, None, PortFlags::empty()) {
                let Some(port) = client.port_by_name(&name) else {
                    debug!("Port {} went away during enumeration", name);
                    continue;
                };
                listings.push(PortListing {
                    connections: port.get_connections(),
                    name,
                });
            }
            Ok(listings)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_message_names_status_and_reason() {
        let message = shutdown_message(ClientStatus::SERVER_ERROR, "server went away");
        assert!(message.starts_with("JACK shutdown!"));
        assert!(message.contains("SERVER_ERROR"));
        assert!(message.ends_with("server went away"));
    }
}
