//! # Core Type Definitions
//!
//! This module contains the fundamental types shared across the Homeward
//! routing system. These types provide the building blocks for identifying
//! players, backend servers, and routing families, and for reporting the
//! outcome of a connection attempt.
//!
//! ## Key Types
//!
//! - [`PlayerId`] - Unique identifier for players (UUID v4)
//! - [`ServerId`] - Bounded identifier for backend servers (max 64 chars)
//! - [`FamilyId`] - Bounded identifier for routing families (max 16 chars)
//! - [`Server`] - A backend server as seen through the load balancer
//! - [`ConnectionResult`] - The single result type surfaced to callers
//!
//! ## Design Principles
//!
//! - **Type Safety**: Wrapper types prevent ID confusion (ServerId vs FamilyId)
//! - **Bounded Identifiers**: Server and family IDs carry the storage-layer
//!   length limits so invalid values are rejected at construction
//! - **Serialization**: All types support serde for config and persistence

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifier limits
// ============================================================================

/// Maximum length of a [`ServerId`], matching the `server_id` column width.
pub const MAX_SERVER_ID_LEN: usize = 64;

/// Maximum length of a [`FamilyId`], matching the `family_id` column width.
pub const MAX_FAMILY_ID_LEN: usize = 16;

/// Errors produced when constructing a bounded identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("identifier cannot be empty")]
    Empty,

    #[error("server id '{0}' exceeds {MAX_SERVER_ID_LEN} characters")]
    ServerIdTooLong(String),

    #[error("family id '{0}' exceeds {MAX_FAMILY_ID_LEN} characters")]
    FamilyIdTooLong(String),
}

// ============================================================================
// Core Identifiers
// ============================================================================

/// Unique identifier for a player.
///
/// This is a wrapper around UUID that provides type safety and ensures
/// player IDs cannot be confused with other identifiers in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random player ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a player ID from its string representation.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::str::FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a backend server within a family.
///
/// Server IDs are bounded strings (at most [`MAX_SERVER_ID_LEN`] characters)
/// because they are persisted verbatim in the residence store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(String);

impl ServerId {
    /// Creates a server ID, rejecting empty or over-long values.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id.len() > MAX_SERVER_ID_LEN {
            return Err(IdError::ServerIdTooLong(id));
        }
        Ok(Self(id))
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a routing family.
///
/// Family IDs are bounded strings (at most [`MAX_FAMILY_ID_LEN`] characters)
/// because they are persisted verbatim in the residence store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FamilyId(String);

impl FamilyId {
    /// Creates a family ID, rejecting empty or over-long values.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id.len() > MAX_FAMILY_ID_LEN {
            return Err(IdError::FamilyIdTooLong(id));
        }
        Ok(Self(id))
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FamilyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A player attempting to join a family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// The player's unique identifier
    pub id: PlayerId,

    /// The player's display name, used in log context
    pub username: String,
}

impl Player {
    /// Creates a player handle from an ID and username.
    pub fn new(id: PlayerId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// A backend server as seen through the load balancer.
///
/// The router only ever reads servers through the load balancer capability;
/// it never owns them. Lock state lives in the balancer, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// The server's unique identifier within its family
    pub id: ServerId,

    /// The network address players are routed to
    pub address: SocketAddr,

    /// Optional human-facing name
    pub display_name: Option<String>,

    /// Player count at the time this snapshot was taken
    pub players: u32,
}

impl Server {
    /// Creates a server entry with no display name and zero players.
    pub fn new(id: ServerId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            display_name: None,
            players: 0,
        }
    }
}

/// How forcefully a join request should be treated by the backend.
///
/// Passed through to the connector unchanged; the router itself never
/// branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinPower {
    /// Ordinary join, the backend may refuse
    #[default]
    Minimal,

    /// The backend should make room for the player if at all possible
    Aggressive,
}

// ============================================================================
// Connection Results
// ============================================================================

/// The outcome of a routing pass, surfaced to callers.
///
/// This is the router's entire public result surface: callers never see
/// internal errors, only a connected server or a player-displayable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionResult {
    /// The player was connected to this server
    Connected {
        /// The server the player actually reached
        server: Server,
    },

    /// The player could not be connected
    Failed {
        /// Human-readable message suitable for display to the player
        reason: String,
    },
}

impl ConnectionResult {
    /// Builds a successful result.
    pub fn connected(server: Server) -> Self {
        Self::Connected { server }
    }

    /// Builds a failed result with a player-facing reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Returns true if the player reached a server.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Returns the connected server, if any.
    pub fn server(&self) -> Option<&Server> {
        match self {
            Self::Connected { server } => Some(server),
            Self::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_round_trips_through_string() {
        let id = PlayerId::new();
        let parsed = PlayerId::from_str(&id.to_string()).expect("generated ID should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn server_id_enforces_length_limit() {
        assert!(ServerId::new("lobby-1").is_ok());
        assert_eq!(ServerId::new(""), Err(IdError::Empty));

        let too_long = "x".repeat(MAX_SERVER_ID_LEN + 1);
        assert!(matches!(
            ServerId::new(too_long),
            Err(IdError::ServerIdTooLong(_))
        ));

        let exactly_max = "x".repeat(MAX_SERVER_ID_LEN);
        assert!(ServerId::new(exactly_max).is_ok());
    }

    #[test]
    fn family_id_enforces_length_limit() {
        assert!(FamilyId::new("survival").is_ok());
        assert_eq!(FamilyId::new(""), Err(IdError::Empty));
        assert!(matches!(
            FamilyId::new("x".repeat(MAX_FAMILY_ID_LEN + 1)),
            Err(IdError::FamilyIdTooLong(_))
        ));
    }

    #[test]
    fn connection_result_accessors() {
        let server = Server::new(
            ServerId::new("smp-1").unwrap(),
            "127.0.0.1:25565".parse().unwrap(),
        );
        let ok = ConnectionResult::connected(server.clone());
        assert!(ok.is_connected());
        assert_eq!(ok.server(), Some(&server));

        let failed = ConnectionResult::failed("nope");
        assert!(!failed.is_connected());
        assert_eq!(failed.server(), None);
    }
}
