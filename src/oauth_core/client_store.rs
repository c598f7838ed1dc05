//! Registry of OAuth clients.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::crypto::constant_time_eq;
use super::types::{AuthError, Client};

/// Trait for retrieving OAuth2 clients.
#[async_trait]
pub trait ClientStore: Send + Sync + 'static {
    /// Retrieves a client by its identifier.
    async fn get_client(&self, id: &str) -> Result<Client, AuthError>;

    /// Authenticates a client at the token endpoint. Public clients pass
    /// without a secret; confidential clients must present theirs.
    async fn authenticate(&self, id: &str, secret: Option<&str>) -> Result<Client, AuthError> {
        let client = self.get_client(id).await?;
        match (&client.secret, secret) {
            (None, _) => Ok(client),
            (Some(expected), Some(given)) if constant_time_eq(expected.as_bytes(), given.as_bytes()) => Ok(client),
            _ => Err(AuthError::InvalidClient),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryClientStore {
    clients: Arc<DashMap<String, Client>>,
}

impl InMemoryClientStore {
    /// Creates a new in-memory client store with an initial set of clients.
    pub fn new(initial_clients: Vec<Client>) -> Self {
        let map = DashMap::new();
        for client in initial_clients {
            map.insert(client.id.clone(), client);
        }
        Self { clients: Arc::new(map) }
    }

    /// Adds or replaces a client.
    pub fn register(&self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn get_client(&self, id: &str) -> Result<Client, AuthError> {
        self.clients
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(AuthError::InvalidClient)
    }
}
