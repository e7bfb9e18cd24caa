//! Connection tracking for the game server
//!
//! This module handles the server-side bookkeeping of live transport connections:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Address to connection id mapping for routing replies
//! - Connection health monitoring and capacity limits
//!
//! A connection id is the server's "live connection reference". It says nothing
//! about which player or room the connection belongs to; that binding lives in
//! the gateway's sessions.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Server-assigned identifier of a live connection.
pub type ConnectionId = u32;

/// A connected transport endpoint
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any datagram from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Marks the client as recently active
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing was received within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all live connections
///
/// Enforces the server-wide connection limit and detects silent clients.
/// Connection ids start at 1 and are never reused within a process.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<ConnectionId, Client>,
    /// Next available connection ID
    next_client_id: ConnectionId,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
    /// Silence after which a connection counts as lost
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to register a new connection
    ///
    /// Returns None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id = self.next_client_id.wrapping_add(1).max(1);

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));
        Some(client_id)
    }

    /// Removes a connection. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(&client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    /// Finds the connection for a source address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    /// Reply address of a connection
    pub fn addr_of(&self, client_id: ConnectionId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Refreshes liveness. Returns false for an unknown connection.
    pub fn touch(&mut self, client_id: ConnectionId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// Removes and returns every connection that has been silent too long
    pub fn check_timeouts(&mut self) -> Vec<ConnectionId> {
        let timeout = self.timeout;
        let timed_out: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();

        for client_id in &timed_out {
            info!("Client {} timed out", client_id);
            self.remove_client(*client_id);
        }

        timed_out
    }

    /// Returns the number of live connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn manager(max_clients: usize) -> ClientManager {
        ClientManager::new(max_clients, Duration::from_secs(5))
    }

    #[test]
    fn test_client_creation() {
        let addr = test_addr();
        let client = Client::new(1, addr);

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, addr);
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(1, test_addr());

        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));

        client.touch();
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = manager(3);

        let client_id1 = manager.add_client(test_addr()).unwrap();
        let client_id2 = manager.add_client(test_addr2()).unwrap();

        assert_eq!(client_id1, 1);
        assert_eq!(client_id2, 2);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.addr_of(client_id2), Some(test_addr2()));
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = manager(1);

        assert!(manager.add_client(test_addr()).is_some());
        assert!(manager.add_client(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = manager(2);
        let client_id = manager.add_client(test_addr()).unwrap();

        assert!(manager.remove_client(client_id));
        assert!(manager.is_empty());
        assert!(!manager.remove_client(client_id));
        assert_eq!(manager.addr_of(client_id), None);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = manager(1);
        let first = manager.add_client(test_addr()).unwrap();
        manager.remove_client(first);

        let second = manager.add_client(test_addr()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = manager(2);
        let client_id1 = manager.add_client(test_addr()).unwrap();
        manager.add_client(test_addr2()).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id1));

        let unknown_addr: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown_addr), None);
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = manager(2);
        let stale = manager.add_client(test_addr()).unwrap();
        let fresh = manager.add_client(test_addr2()).unwrap();

        if let Some(client) = manager.clients.get_mut(&stale) {
            client.last_seen = Instant::now() - Duration::from_secs(10);
        }

        assert_eq!(manager.check_timeouts(), vec![stale]);
        assert_eq!(manager.len(), 1);
        assert!(manager.touch(fresh));
        assert!(!manager.touch(stale));
    }
}
