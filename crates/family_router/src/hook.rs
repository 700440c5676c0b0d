//! Pre-join gate invoked before any routing logic runs.
//!
//! The hook is the only cancellation point in a routing pass: a veto stops
//! the request before the residence store is ever touched. It is also
//! fail-open — a hook that times out or errors is treated as an allow.

use crate::error::HookError;
use async_trait::async_trait;
use homeward_types::{FamilyId, JoinPower, Player};

/// The hook's verdict on a join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Let the request proceed to routing
    Allow,

    /// Stop the request before routing
    Veto {
        /// Player-facing cancellation message
        message: String,
    },
}

/// A cancellable gate consulted before routing begins.
///
/// The router waits at most 60 seconds for a decision; timeouts and
/// [`HookError`]s both fail open.
#[async_trait]
pub trait PreJoinHook: Send + Sync {
    /// Decides whether the player may join the family.
    async fn pre_join(
        &self,
        family: &FamilyId,
        player: &Player,
        power: JoinPower,
    ) -> Result<HookDecision, HookError>;
}

/// Hook that allows every join.
pub struct AllowAll;

#[async_trait]
impl PreJoinHook for AllowAll {
    async fn pre_join(
        &self,
        _family: &FamilyId,
        _player: &Player,
        _power: JoinPower,
    ) -> Result<HookDecision, HookError> {
        Ok(HookDecision::Allow)
    }
}
