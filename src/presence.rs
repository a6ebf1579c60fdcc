use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::Message;

use crate::messages::ServerEvent;

pub type ConnectionId = Uuid;
pub type Outbound = mpsc::UnboundedSender<Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered(usize),
    NoActiveConnection,
}

#[derive(Default)]
struct Registry {
    by_user: HashMap<String, HashMap<ConnectionId, Outbound>>,
    owners: HashMap<ConnectionId, String>,
}

/// Live connections indexed by username. A user may hold several at once;
/// delivery reaches all of them.
#[derive(Clone, Default)]
pub struct Presence {
    registry: Arc<RwLock<Registry>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, username: &str, outbound: Outbound) -> ConnectionId {
        let id = Uuid::new_v4();
        let mut registry = self.registry.write().await;
        registry
            .by_user
            .entry(username.to_string())
            .or_default()
            .insert(id, outbound);
        registry.owners.insert(id, username.to_string());
        id
    }

    /// Removes a connection. Unknown or already removed ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) -> Option<String> {
        let mut registry = self.registry.write().await;
        let username = registry.owners.remove(&id)?;
        if let Some(connections) = registry.by_user.get_mut(&username) {
            connections.remove(&id);
            if connections.is_empty() {
                registry.by_user.remove(&username);
            }
        }
        Some(username)
    }

    pub async fn deliver(&self, username: &str, event: &ServerEvent) -> DeliveryResult {
        let Ok(payload) = serde_json::to_string(event) else {
            return DeliveryResult::NoActiveConnection;
        };
        let registry = self.registry.read().await;
        let delivered = registry.by_user.get(username).map_or(0, |connections| {
            connections
                .values()
                .filter(|outbound| outbound.send(Message::text(payload.clone())).is_ok())
                .count()
        });
        debug!("Delivered event to {delivered} connection(s) of {username}");
        if delivered == 0 {
            DeliveryResult::NoActiveConnection
        } else {
            DeliveryResult::Delivered(delivered)
        }
    }

    pub async fn connection_count(&self, username: &str) -> usize {
        self.registry
            .read()
            .await
            .by_user
            .get(username)
            .map_or(0, HashMap::len)
    }
}
