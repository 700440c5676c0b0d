//! # Family Router - Sticky Connection Routing
//!
//! Connection routing for stateful (session-sticky) backend fleets. Once a
//! player first joins a server inside a *family* of interchangeable
//! backends, that assignment — their *residence* — is remembered durably,
//! and later joins route them straight back to the same server. When the
//! remembered server has left the family, the configurable unavailable
//! protocol decides between failing the join and a bounded failover over
//! the remaining servers.
//!
//! ## Architecture Overview
//!
//! * **[`StaticFamily`]** - The connection router: one deterministic
//!   outcome per join request, never a raised fault
//! * **[`ResidenceStore`]** - Durable residence records behind a trait,
//!   queried by the (player, family) compound key
//! * **[`LoadBalancer`]** - Live/locked server membership, selection, and
//!   the failover iteration cursor
//! * **[`PreJoinHook`]** - Cancellable gate consulted before any routing
//!   logic runs (fail-open on timeout or error)
//! * **[`ServerConnector`]** - The seam to the actual backend handoff and
//!   player messaging
//! * **[`FamilyRegistry`]** - Turns validated [`FamilyConfig`]s into live
//!   families, resolving stores by name
//!
//! ## Request Flow
//!
//! 1. Join request arrives at [`StaticFamily::connect`]
//! 2. Pre-join hook gate (bounded wait, veto stops the request)
//! 3. Residence lookup by (player, family), with lazy expiration
//! 4. Decision table: no residence / live residence / stale residence
//! 5. Direct sticky connect, or the bounded failover loop
//! 6. Conditional residence write, uniform [`ConnectionResult`] returned
//!
//! ## Concurrency
//!
//! Requests run concurrently with no per-player locking; the store's
//! upsert semantics bound racing writers to last-write-wins. Every
//! collaborator call is guarded by an explicit deadline, so a stalled
//! store, balancer, hook, or backend degrades to a failed request rather
//! than a stuck one.

pub use balancer::{LoadBalancer, RoundRobinBalancer};
pub use config::{FamilyConfig, StorageProtocol, UnavailableProtocol};
pub use connector::{ConnectOutcome, ServerConnector, UnwiredConnector};
pub use error::{ConnectorError, ConstructionError, HookError, RoutingError, StoreError};
pub use family::{Family, StaticFamily};
pub use hook::{AllowAll, HookDecision, PreJoinHook};
pub use registry::{build_balancer, FamilyRegistry, StoreRegistry, BALANCER_ROUND_ROBIN};
pub use residence::{MemoryResidenceStore, Residence, ResidenceStore, RESIDENCE_COLLECTION};

pub use homeward_types::{
    ConnectionResult, FamilyId, IdError, JoinPower, Player, PlayerId, Server, ServerId,
};

pub mod balancer;
pub mod config;
pub mod connector;
pub mod error;
pub mod family;
pub mod hook;
pub mod registry;
pub mod residence;
