//! Client connection registry
//!
//! Tracks connected clients and the domain each one is attached to, so
//! resize notifications and topology changes reach exactly the clients
//! viewing that domain.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use reflow_protocol::{DomainId, ServerMessage};

/// Unique client identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    /// Create a ClientId from a raw value (mainly for testing)
    #[cfg(test)]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

/// Entry for a connected client
pub struct ClientEntry {
    pub sender: mpsc::Sender<ServerMessage>,
    pub attached_domain: Option<DomainId>,
}

impl std::fmt::Debug for ClientEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEntry")
            .field("attached_domain", &self.attached_domain)
            .field("sender_closed", &self.sender.is_closed())
            .finish()
    }
}

/// Registry tracking all connected clients
///
/// Thread-safe for concurrent access from multiple client handler tasks.
pub struct ClientRegistry {
    clients: DashMap<ClientId, ClientEntry>,
    /// Domain -> attached clients (reverse index for broadcast)
    domain_clients: DashMap<DomainId, HashSet<ClientId>>,
    next_client_id: AtomicU64,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            domain_clients: DashMap::new(),
            next_client_id: AtomicU64::new(1),
        }
    }

    // ==================== Client Management ====================

    /// Register a new client connection
    pub fn register_client(&self, sender: mpsc::Sender<ServerMessage>) -> ClientId {
        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::SeqCst));
        self.clients.insert(
            id,
            ClientEntry {
                sender,
                attached_domain: None,
            },
        );
        debug!("Registered client {}", id);
        id
    }

    /// Unregister a client connection and drop its domain association
    pub fn unregister_client(&self, client_id: ClientId) {
        if let Some((_, entry)) = self.clients.remove(&client_id) {
            if let Some(domain_id) = entry.attached_domain {
                self.remove_from_domain_index(client_id, domain_id);
            }
            debug!("Unregistered client {}", client_id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ==================== Domain Association ====================

    /// Attach a client to a domain, leaving any previous one
    ///
    /// Returns `false` if the client doesn't exist.
    pub fn attach_to_domain(&self, client_id: ClientId, domain_id: DomainId) -> bool {
        let mut entry = match self.clients.get_mut(&client_id) {
            Some(entry) => entry,
            None => return false,
        };

        if let Some(old) = entry.attached_domain {
            if old != domain_id {
                self.remove_from_domain_index(client_id, old);
            }
        }
        entry.attached_domain = Some(domain_id);

        self.domain_clients
            .entry(domain_id)
            .or_default()
            .insert(client_id);

        debug!("Client {} attached to domain {}", client_id, domain_id);
        true
    }

    pub fn client_domain(&self, client_id: ClientId) -> Option<DomainId> {
        self.clients.get(&client_id)?.attached_domain
    }

    pub fn domain_client_count(&self, domain_id: DomainId) -> usize {
        self.domain_clients
            .get(&domain_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    pub fn domain_clients(&self, domain_id: DomainId) -> Vec<ClientId> {
        self.domain_clients
            .get(&domain_id)
            .map(|clients| clients.iter().copied().collect())
            .unwrap_or_default()
    }

    fn remove_from_domain_index(&self, client_id: ClientId, domain_id: DomainId) {
        if let Some(mut clients) = self.domain_clients.get_mut(&domain_id) {
            clients.remove(&client_id);
            if clients.is_empty() {
                drop(clients); // Release the shard lock before removing
                self.domain_clients.remove(&domain_id);
            }
        }
    }

    // ==================== Message Delivery ====================

    /// Send a message to a specific client
    ///
    /// A closed channel means the client went away; it is unregistered.
    pub async fn send_to_client(&self, client_id: ClientId, message: ServerMessage) -> bool {
        // Clone the sender so no shard lock is held across the await
        let sender = match self.clients.get(&client_id) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };

        match sender.send(message).await {
            Ok(()) => true,
            Err(_) => {
                warn!("Client {} channel closed, removing from registry", client_id);
                self.unregister_client(client_id);
                false
            }
        }
    }

    /// Broadcast to every client attached to a domain
    ///
    /// Returns the number of clients reached.
    pub async fn broadcast_to_domain(&self, domain_id: DomainId, message: ServerMessage) -> usize {
        let client_ids = self.domain_clients(domain_id);
        if client_ids.is_empty() {
            return 0;
        }

        trace!(
            message_type = message.type_name(),
            clients = client_ids.len(),
            domain_id = %domain_id,
            "Broadcasting to domain"
        );

        let mut success_count = 0;
        for client_id in client_ids {
            if self.send_to_client(client_id, message.clone()).await {
                success_count += 1;
            }
        }
        success_count
    }

    /// Broadcast to a domain, skipping the originating client
    pub async fn broadcast_to_domain_except(
        &self,
        domain_id: DomainId,
        except_client: ClientId,
        message: ServerMessage,
    ) -> usize {
        let mut success_count = 0;
        for client_id in self.domain_clients(domain_id) {
            if client_id != except_client
                && self.send_to_client(client_id, message.clone()).await
            {
                success_count += 1;
            }
        }
        success_count
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("client_count", &self.clients.len())
            .field("domain_count", &self.domain_clients.len())
            .field("next_client_id", &self.next_client_id.load(Ordering::SeqCst))
            .finish()
    }
}
