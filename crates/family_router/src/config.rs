//! Per-family configuration and the two routing protocols.
//!
//! A [`FamilyConfig`] describes one routing family the way an operator
//! writes it down in a TOML file: identity, the named load balancer and
//! backing store, the two protocol knobs, and free-form metadata. The
//! registry turns validated configs into live families.

use crate::error::ConstructionError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default residence lifetime: 30 days.
const DEFAULT_RESIDENCE_EXPIRATION_SECS: u64 = 30 * 24 * 60 * 60;

fn default_load_balancer() -> String {
    "round_robin".to_string()
}

fn default_storage() -> String {
    "default".to_string()
}

fn default_attempts() -> u32 {
    5
}

fn default_residence_expiration_secs() -> u64 {
    DEFAULT_RESIDENCE_EXPIRATION_SECS
}

/// Policy governing when a player's residence is first recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageProtocol {
    /// The first server a player successfully joins becomes their residence.
    #[default]
    OnFirstJoin,

    /// The server a player leaves from when they leave the family becomes
    /// their residence. Join requests route through ordinary selection
    /// without recording anything; the host proxy reports departures via
    /// `StaticFamily::record_departure`.
    OnFirstLeave,
}

impl std::fmt::Display for StorageProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnFirstJoin => write!(f, "ON_FIRST_JOIN"),
            Self::OnFirstLeave => write!(f, "ON_FIRST_LEAVE"),
        }
    }
}

/// Policy governing what happens when a player's resident server has left
/// the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnavailableProtocol {
    /// Fail the join outright; the residence row is left untouched.
    CancelConnectionAttempt,

    /// Fail over to another server and overwrite the residence with it.
    AssignNewResidence,

    /// Fail over to another server, tell the player they were redirected,
    /// and leave the residence row untouched.
    #[default]
    ConnectWithError,

    /// Fail over to another server silently; no message, no row change.
    ConnectWithoutError,
}

impl std::fmt::Display for UnavailableProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CancelConnectionAttempt => write!(f, "CANCEL_CONNECTION_ATTEMPT"),
            Self::AssignNewResidence => write!(f, "ASSIGN_NEW_RESIDENCE"),
            Self::ConnectWithError => write!(f, "CONNECT_WITH_ERROR"),
            Self::ConnectWithoutError => write!(f, "CONNECT_WITHOUT_ERROR"),
        }
    }
}

/// Configuration for a single routing family.
///
/// Field defaults match the shipped sample config: a round-robin balancer
/// with 5 attempts, the `default` store, `CONNECT_WITH_ERROR` on
/// unavailability, `ON_FIRST_JOIN` storage, and a 30-day residence lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    /// The family's identifier (at most 16 characters)
    pub id: String,

    /// Human-facing name; empty means none
    #[serde(default)]
    pub display_name: String,

    /// Family players fall back to outside this router; empty means none
    #[serde(default)]
    pub parent_family: String,

    /// Name of the load-balancing algorithm to construct
    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,

    /// Failover attempt budget handed to the load balancer
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Name of the registered residence store backing this family
    #[serde(default = "default_storage")]
    pub storage: String,

    /// What to do when a resident server has left the family
    #[serde(default)]
    pub unavailable_protocol: UnavailableProtocol,

    /// When a residence is first recorded
    #[serde(default)]
    pub storage_protocol: StorageProtocol,

    /// How long a residence stays valid without a successful join
    #[serde(default = "default_residence_expiration_secs")]
    pub residence_expiration_secs: u64,

    /// When true, `ASSIGN_NEW_RESIDENCE` only rewrites the residence row
    /// if the storage protocol is `ON_FIRST_JOIN`. When false (the
    /// default) the row is rewritten regardless of storage protocol.
    #[serde(default)]
    pub reassign_requires_storage_protocol: bool,

    /// Free-form metadata carried on the family, not interpreted here
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl FamilyConfig {
    /// Creates a config with all defaults for the given family ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            parent_family: String::new(),
            load_balancer: default_load_balancer(),
            attempts: default_attempts(),
            storage: default_storage(),
            unavailable_protocol: UnavailableProtocol::default(),
            storage_protocol: StorageProtocol::default(),
            residence_expiration_secs: default_residence_expiration_secs(),
            reassign_requires_storage_protocol: false,
            metadata: HashMap::new(),
        }
    }

    /// Validates the parts of the config the registry cannot resolve away.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if self.attempts == 0 {
            return Err(ConstructionError::ZeroAttempts);
        }
        Ok(())
    }

    /// The residence lifetime as a [`Duration`].
    pub fn residence_expiration(&self) -> Duration {
        Duration::from_secs(self.residence_expiration_secs)
    }

    /// Display name with the empty-string-means-none convention applied.
    pub fn display_name(&self) -> Option<&str> {
        if self.display_name.is_empty() {
            None
        } else {
            Some(&self.display_name)
        }
    }

    /// Parent family with the empty-string-means-none convention applied.
    pub fn parent_family(&self) -> Option<&str> {
        if self.parent_family.is_empty() {
            None
        } else {
            Some(&self.parent_family)
        }
    }
}
