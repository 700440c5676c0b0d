//! Error types for family construction and request routing.

use homeward_types::{IdError, ServerId};
use thiserror::Error;

/// Fatal errors raised while constructing a family.
///
/// These abort the family's startup and propagate to the registry caller;
/// they are the only errors in this crate that escape as raised faults.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("no residence store is registered under the name '{name}'")]
    UnknownStore { name: String },

    #[error("no load balancer algorithm is registered under the name '{name}'")]
    UnknownBalancer { name: String },

    #[error("the load balancer attempt budget must be at least 1")]
    ZeroAttempts,

    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    #[error("failed to prepare the residence collection: {0}")]
    Store(#[from] StoreError),

    #[error("timed out preparing the residence collection")]
    StoreTimeout,
}

/// Failure reported by a residence store backend.
#[derive(Debug, Clone, Error)]
#[error("residence store failure: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure reported by a server connector while attempting a connection.
#[derive(Debug, Clone, Error)]
#[error("connector failure: {0}")]
pub struct ConnectorError(pub String);

impl ConnectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure reported by a pre-join hook.
///
/// Hook failures are fail-open: the router logs them and proceeds as if
/// the hook allowed the join.
#[derive(Debug, Clone, Error)]
#[error("pre-join hook failure: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Internal routing failures.
///
/// Every variant is absorbed at the router boundary and folded into
/// `ConnectionResult::Failed` with a player-facing message; none of these
/// ever propagate to the router's caller.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no unlocked servers are available")]
    NoAvailableServers,

    #[error("the pre-join hook vetoed the connection: {message}")]
    Vetoed { message: String },

    #[error("timed out while waiting for {action}")]
    Timeout { action: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("the backend refused the connection: {reason}")]
    Refused { reason: String },

    #[error("the resident server '{0}' disappeared between the liveness check and the connect attempt")]
    ServerVanished(ServerId),

    #[error("the resident server is gone and the family cancels on unavailability")]
    ResidenceUnavailable,

    #[error("failover exhausted its budget of {attempts} attempts")]
    FailoverExhausted { attempts: u32 },
}
