//! The seam between routing decisions and the actual backend handoff.
//!
//! The wire protocol to backend servers is out of scope for this crate;
//! everything the router needs from it is behind [`ServerConnector`]: one
//! bounded connect attempt, and the player messaging channel used by the
//! `CONNECT_WITH_ERROR` protocol.

use crate::error::ConnectorError;
use async_trait::async_trait;
use homeward_types::{JoinPower, Player, Server};
use tracing::info;

/// The confirmed result of a single connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The player reached this server
    Connected(Server),

    /// The backend answered but declined the player
    Refused {
        /// Backend-supplied reason, logged but never shown to the player
        reason: String,
    },
}

/// Performs connect attempts and player messaging for the router.
///
/// Implementations are expected to block (asynchronously) until the attempt
/// is confirmed one way or the other; the router guards every call with its
/// own deadline, so a connector that never answers costs one failover
/// attempt, not a stuck request.
#[async_trait]
pub trait ServerConnector: Send + Sync {
    /// Attempts to move the player onto the given server.
    async fn connect(
        &self,
        player: &Player,
        server: &Server,
        power: JoinPower,
    ) -> Result<ConnectOutcome, ConnectorError>;

    /// Delivers a message to the player, best-effort.
    async fn notify(&self, player: &Player, message: &str);
}

/// Connector that logs attempts and refuses them all.
///
/// Stands in where no proxy integration is wired up, such as the daemon
/// running without a backend transport. A real deployment replaces this
/// with its proxy's connector.
pub struct UnwiredConnector;

#[async_trait]
impl ServerConnector for UnwiredConnector {
    async fn connect(
        &self,
        player: &Player,
        server: &Server,
        _power: JoinPower,
    ) -> Result<ConnectOutcome, ConnectorError> {
        info!(
            player = %player.id,
            server = %server.id,
            "no backend transport is wired up; refusing connect attempt"
        );
        Ok(ConnectOutcome::Refused {
            reason: "no backend transport configured".to_string(),
        })
    }

    async fn notify(&self, player: &Player, message: &str) {
        info!(player = %player.id, message, "player notification (unwired)");
    }
}
