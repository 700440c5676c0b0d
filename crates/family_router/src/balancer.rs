//! Load balancer capability and the round-robin implementation.
//!
//! The router consumes load balancing strictly through the [`LoadBalancer`]
//! trait: live/locked server membership, single-server selection, an
//! iteration cursor for failover, and the configured attempt budget.

use async_trait::async_trait;
use homeward_types::{Server, ServerId};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Selection and membership over a family's live servers.
///
/// The router never owns servers; it reads them through this capability.
/// Locked servers stay members of the family but are excluded from
/// selection and from the failover cursor.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Adds a server to the family's pool.
    async fn add_server(&self, server: Server);

    /// Removes a server from the pool entirely.
    async fn remove_server(&self, id: &ServerId);

    /// Returns the server with the given ID, if it is in the pool.
    async fn fetch_server(&self, id: &ServerId) -> Option<Server>;

    /// Whether the pool contains a server with the given ID.
    async fn contains_server(&self, id: &ServerId) -> bool;

    /// Excludes a server from selection without removing it.
    async fn lock_server(&self, id: &ServerId);

    /// Returns a locked server to the selectable set.
    async fn unlock_server(&self, id: &ServerId);

    /// All currently locked servers.
    async fn locked_servers(&self) -> Vec<Server>;

    /// All currently selectable servers.
    async fn unlocked_servers(&self) -> Vec<Server>;

    /// Every server in the pool, locked or not.
    async fn servers(&self) -> Vec<Server>;

    /// Selects one server for a fresh assignment, advancing whatever
    /// internal state the algorithm keeps.
    async fn available_server(&self) -> Option<Server>;

    /// Whether the given server is locked.
    async fn is_locked(&self, id: &ServerId) -> bool;

    /// The server under the iteration cursor, without advancing it.
    async fn current(&self) -> Option<Server>;

    /// Advances the iteration cursor past the current server.
    async fn force_iterate(&self);

    /// The failover attempt budget configured for this family.
    async fn attempts(&self) -> u32;
}

struct RoundRobinState {
    servers: Vec<Server>,
    locked: HashSet<ServerId>,
    cursor: usize,
}

impl RoundRobinState {
    fn unlocked(&self) -> Vec<Server> {
        self.servers
            .iter()
            .filter(|server| !self.locked.contains(&server.id))
            .cloned()
            .collect()
    }

    fn at_cursor(&self) -> Option<Server> {
        let unlocked = self.unlocked();
        if unlocked.is_empty() {
            return None;
        }
        Some(unlocked[self.cursor % unlocked.len()].clone())
    }
}

/// Round-robin selection over the unlocked server set.
///
/// Selection order is insertion order; the cursor wraps over whatever
/// servers are unlocked at the moment of the call, so membership changes
/// mid-iteration are picked up immediately.
pub struct RoundRobinBalancer {
    state: RwLock<RoundRobinState>,
    attempts: u32,
}

impl RoundRobinBalancer {
    /// Creates an empty balancer with the given failover attempt budget.
    pub fn new(attempts: u32) -> Self {
        Self {
            state: RwLock::new(RoundRobinState {
                servers: Vec::new(),
                locked: HashSet::new(),
                cursor: 0,
            }),
            attempts,
        }
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn add_server(&self, server: Server) {
        let mut state = self.state.write().await;
        if state.servers.iter().any(|existing| existing.id == server.id) {
            return;
        }
        state.servers.push(server);
        // the cursor indexes into the unlocked set; membership changes
        // invalidate it
        state.cursor = 0;
    }

    async fn remove_server(&self, id: &ServerId) {
        let mut state = self.state.write().await;
        state.servers.retain(|server| &server.id != id);
        state.locked.remove(id);
        state.cursor = 0;
    }

    async fn fetch_server(&self, id: &ServerId) -> Option<Server> {
        let state = self.state.read().await;
        state.servers.iter().find(|server| &server.id == id).cloned()
    }

    async fn contains_server(&self, id: &ServerId) -> bool {
        let state = self.state.read().await;
        state.servers.iter().any(|server| &server.id == id)
    }

    async fn lock_server(&self, id: &ServerId) {
        let mut state = self.state.write().await;
        if state.servers.iter().any(|server| &server.id == id) {
            state.locked.insert(id.clone());
        }
    }

    async fn unlock_server(&self, id: &ServerId) {
        let mut state = self.state.write().await;
        state.locked.remove(id);
    }

    async fn locked_servers(&self) -> Vec<Server> {
        let state = self.state.read().await;
        state
            .servers
            .iter()
            .filter(|server| state.locked.contains(&server.id))
            .cloned()
            .collect()
    }

    async fn unlocked_servers(&self) -> Vec<Server> {
        let state = self.state.read().await;
        state.unlocked()
    }

    async fn servers(&self) -> Vec<Server> {
        let state = self.state.read().await;
        state.servers.clone()
    }

    async fn available_server(&self) -> Option<Server> {
        let mut state = self.state.write().await;
        let selected = state.at_cursor()?;
        state.cursor = state.cursor.wrapping_add(1);
        Some(selected)
    }

    async fn is_locked(&self, id: &ServerId) -> bool {
        let state = self.state.read().await;
        state.locked.contains(id)
    }

    async fn current(&self) -> Option<Server> {
        let state = self.state.read().await;
        state.at_cursor()
    }

    async fn force_iterate(&self) {
        let mut state = self.state.write().await;
        state.cursor = state.cursor.wrapping_add(1);
    }

    async fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str) -> Server {
        Server::new(
            ServerId::new(id).unwrap(),
            "127.0.0.1:25565".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn selection_cycles_in_insertion_order() {
        let balancer = RoundRobinBalancer::new(3);
        balancer.add_server(server("a")).await;
        balancer.add_server(server("b")).await;
        balancer.add_server(server("c")).await;

        let picks: Vec<String> = {
            let mut picks = Vec::new();
            for _ in 0..4 {
                picks.push(
                    balancer
                        .available_server()
                        .await
                        .unwrap()
                        .id
                        .as_str()
                        .to_string(),
                );
            }
            picks
        };
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn locked_servers_are_skipped_but_remain_members() {
        let balancer = RoundRobinBalancer::new(3);
        balancer.add_server(server("a")).await;
        balancer.add_server(server("b")).await;

        let a = ServerId::new("a").unwrap();
        balancer.lock_server(&a).await;

        assert!(balancer.contains_server(&a).await);
        assert!(balancer.is_locked(&a).await);
        assert_eq!(balancer.unlocked_servers().await.len(), 1);
        assert_eq!(balancer.locked_servers().await.len(), 1);
        assert_eq!(
            balancer.available_server().await.unwrap().id.as_str(),
            "b"
        );

        balancer.unlock_server(&a).await;
        assert_eq!(balancer.unlocked_servers().await.len(), 2);
    }

    #[tokio::test]
    async fn cursor_advances_only_on_iterate() {
        let balancer = RoundRobinBalancer::new(3);
        balancer.add_server(server("a")).await;
        balancer.add_server(server("b")).await;

        assert_eq!(balancer.current().await.unwrap().id.as_str(), "a");
        assert_eq!(balancer.current().await.unwrap().id.as_str(), "a");

        balancer.force_iterate().await;
        assert_eq!(balancer.current().await.unwrap().id.as_str(), "b");
    }

    #[tokio::test]
    async fn empty_pool_selects_nothing() {
        let balancer = RoundRobinBalancer::new(3);
        assert!(balancer.available_server().await.is_none());
        assert!(balancer.current().await.is_none());

        balancer.add_server(server("a")).await;
        balancer.remove_server(&ServerId::new("a").unwrap()).await;
        assert!(balancer.current().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_adds_are_ignored() {
        let balancer = RoundRobinBalancer::new(3);
        balancer.add_server(server("a")).await;
        balancer.add_server(server("a")).await;
        assert_eq!(balancer.servers().await.len(), 1);
    }
}
