//! The static family: sticky connection routing over a server pool.
//!
//! [`StaticFamily`] is the connection router at the heart of this crate.
//! Every join request resolves to exactly one [`ConnectionResult`] through
//! a fixed decision table: no residence, live residence, or stale residence,
//! with the stale branch governed by the family's unavailable protocol.
//!
//! Routing never raises: every internal failure is folded into
//! `ConnectionResult::Failed` at a single boundary, with structured log
//! context (player, family, action) for the faults worth investigating.

use crate::{
    balancer::LoadBalancer,
    config::{FamilyConfig, StorageProtocol, UnavailableProtocol},
    connector::{ConnectOutcome, ServerConnector},
    error::{ConstructionError, RoutingError},
    hook::{HookDecision, PreJoinHook},
    residence::{Residence, ResidenceStore},
};
use async_trait::async_trait;
use homeward_types::{ConnectionResult, FamilyId, JoinPower, Player, Server, ServerId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Bound on a single residence-store call.
const STORE_TIMEOUT: Duration = Duration::from_secs(15);

/// Bound on a single load-balancer call inside the failover loop.
const BALANCER_TIMEOUT: Duration = Duration::from_secs(3);

/// Bound on waiting for one connect attempt's confirmed outcome.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on waiting for the pre-join hook's decision.
const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Generic player-facing failure message.
const MSG_UNABLE_TO_CONNECT: &str =
    "Unable to connect you to your server. Please try again later.";

/// Player-facing message when no servers can take the player.
const MSG_NO_AVAILABLE_SERVERS: &str =
    "There are no available servers to connect you to! Try again later.";

/// Player-facing notice sent under `CONNECT_WITH_ERROR`.
const MSG_REDIRECTED: &str = "The server you were supposed to connect to is unavailable. \
     So we connected you to another server instead.";

/// Guards a collaborator call with an explicit deadline.
async fn bounded<T>(
    limit: Duration,
    action: &'static str,
    call: impl Future<Output = T>,
) -> Result<T, RoutingError> {
    timeout(limit, call)
        .await
        .map_err(|_| RoutingError::Timeout { action })
}

/// Capability surface shared by every family kind.
///
/// Families are a tagged capability, not an inheritance chain: each kind
/// implements this trait and is selected at construction time. The server
/// operations all delegate to the family's load balancer.
#[async_trait]
pub trait Family: Send + Sync {
    /// The family's identifier.
    fn id(&self) -> &FamilyId;

    /// Human-facing name, if one is configured.
    fn display_name(&self) -> Option<&str>;

    /// The family players fall back to outside this router, if any.
    fn parent(&self) -> Option<&FamilyId>;

    /// Free-form metadata attached at construction.
    fn metadata(&self) -> &HashMap<String, serde_json::Value>;

    /// Every server in the family.
    async fn servers(&self) -> Vec<Server>;

    /// Selects one server for a fresh assignment.
    async fn available_server(&self) -> Option<Server>;

    /// Whether the family currently contains the given server.
    async fn contains_server(&self, id: &ServerId) -> bool;

    /// The given server, if it is currently in the family.
    async fn fetch_server(&self, id: &ServerId) -> Option<Server>;

    /// Excludes a server from selection.
    async fn lock_server(&self, id: &ServerId);

    /// Returns a server to the selectable set.
    async fn unlock_server(&self, id: &ServerId);

    /// Servers currently excluded from selection.
    async fn locked_servers(&self) -> Vec<Server>;

    /// Servers currently eligible for selection.
    async fn unlocked_servers(&self) -> Vec<Server>;

    /// Whether the given server is locked.
    async fn is_locked(&self, id: &ServerId) -> bool;

    /// Total player count across all servers, locked included.
    async fn players(&self) -> u64;

    /// Routes one join request to exactly one outcome. Never raises.
    async fn connect(&self, player: &Player, power: JoinPower) -> ConnectionResult;
}

/// A family whose players keep a durable sticky assignment.
///
/// On first successful join the chosen server is recorded as the player's
/// residence; later joins route straight back to it while it remains in
/// the family, bypassing load balancing entirely. When the resident server
/// is gone, the configured [`UnavailableProtocol`] decides between failing
/// the join and running the bounded failover loop.
pub struct StaticFamily {
    id: FamilyId,
    display_name: Option<String>,
    parent: Option<FamilyId>,
    metadata: HashMap<String, serde_json::Value>,
    storage_protocol: StorageProtocol,
    unavailable_protocol: UnavailableProtocol,
    residence_expiration: Duration,
    reassign_requires_storage_protocol: bool,
    balancer: Arc<dyn LoadBalancer>,
    store: Arc<dyn ResidenceStore>,
    connector: Arc<dyn ServerConnector>,
    hook: Arc<dyn PreJoinHook>,
}

impl std::fmt::Debug for StaticFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticFamily")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("parent", &self.parent)
            .field("storage_protocol", &self.storage_protocol)
            .field("unavailable_protocol", &self.unavailable_protocol)
            .field("residence_expiration", &self.residence_expiration)
            .finish_non_exhaustive()
    }
}

impl StaticFamily {
    /// Builds a static family from its validated configuration and
    /// already-resolved collaborators.
    ///
    /// Ensures the residence collection exists before returning; a store
    /// that cannot be prepared fails the family's startup, which is the
    /// only fault in this module allowed to propagate.
    pub async fn new(
        config: &FamilyConfig,
        balancer: Arc<dyn LoadBalancer>,
        store: Arc<dyn ResidenceStore>,
        connector: Arc<dyn ServerConnector>,
        hook: Arc<dyn PreJoinHook>,
    ) -> Result<Self, ConstructionError> {
        config.validate()?;
        let id = FamilyId::new(config.id.clone())?;
        let parent = match config.parent_family() {
            Some(parent) => Some(FamilyId::new(parent)?),
            None => None,
        };

        timeout(STORE_TIMEOUT, store.ensure_collection())
            .await
            .map_err(|_| ConstructionError::StoreTimeout)??;

        Ok(Self {
            id,
            display_name: config.display_name().map(str::to_string),
            parent,
            metadata: config.metadata.clone(),
            storage_protocol: config.storage_protocol,
            unavailable_protocol: config.unavailable_protocol,
            residence_expiration: config.residence_expiration(),
            reassign_requires_storage_protocol: config.reassign_requires_storage_protocol,
            balancer,
            store,
            connector,
            hook,
        })
    }

    /// The family's storage protocol.
    pub fn storage_protocol(&self) -> StorageProtocol {
        self.storage_protocol
    }

    /// The family's unavailable protocol.
    pub fn unavailable_protocol(&self) -> UnavailableProtocol {
        self.unavailable_protocol
    }

    /// How long residences stay valid without a successful join.
    pub fn residence_expiration(&self) -> Duration {
        self.residence_expiration
    }

    /// Step 1: the pre-join gate. Vetoes stop the request; timeouts and
    /// hook failures fail open.
    async fn pre_join_gate(&self, player: &Player, power: JoinPower) -> Result<(), RoutingError> {
        match timeout(HOOK_TIMEOUT, self.hook.pre_join(&self.id, player, power)).await {
            Ok(Ok(HookDecision::Allow)) => Ok(()),
            Ok(Ok(HookDecision::Veto { message })) => Err(RoutingError::Vetoed { message }),
            Ok(Err(err)) => {
                warn!(
                    player = %player.id,
                    family = %self.id,
                    error = %err,
                    "pre-join hook failed; proceeding"
                );
                Ok(())
            }
            Err(_) => {
                warn!(
                    player = %player.id,
                    family = %self.id,
                    "pre-join hook timed out; proceeding"
                );
                Ok(())
            }
        }
    }

    /// Step 2: residence lookup, with lazy expiration. An expired row is
    /// reported as absent so the first-join path overwrites it.
    async fn lookup_residence(&self, player: &Player) -> Result<Option<Residence>, RoutingError> {
        let found = bounded(
            STORE_TIMEOUT,
            "residence lookup",
            self.store.find(&player.id, &self.id),
        )
        .await??;

        Ok(found.filter(|residence| {
            let expired = residence.is_expired(self.residence_expiration, SystemTime::now());
            if expired {
                debug!(
                    player = %player.id,
                    family = %self.id,
                    server = %residence.server,
                    "residence expired; treating player as unassigned"
                );
            }
            !expired
        }))
    }

    /// One connect attempt with a bounded wait for its confirmed outcome.
    async fn attempt(
        &self,
        player: &Player,
        server: &Server,
        power: JoinPower,
    ) -> Result<Server, RoutingError> {
        let outcome = bounded(
            CONNECT_TIMEOUT,
            "connect attempt",
            self.connector.connect(player, server, power),
        )
        .await??;

        match outcome {
            ConnectOutcome::Connected(server) => Ok(server),
            ConnectOutcome::Refused { reason } => Err(RoutingError::Refused { reason }),
        }
    }

    /// Step 3: no residence on record. One server is selected through
    /// ordinary balancing; under `ON_FIRST_JOIN` the residence is written
    /// only after the connect attempt is confirmed successful
    /// (connect-then-write). Under `ON_FIRST_LEAVE` nothing is recorded
    /// here — that happens in [`StaticFamily::record_departure`].
    async fn first_join(&self, player: &Player, power: JoinPower) -> Result<Server, RoutingError> {
        let candidate = self
            .balancer
            .available_server()
            .await
            .ok_or(RoutingError::NoAvailableServers)?;
        let server = self.attempt(player, &candidate, power).await?;

        if self.storage_protocol == StorageProtocol::OnFirstJoin {
            let residence = Residence::new(
                player.id,
                server.id.clone(),
                self.id.clone(),
                SystemTime::now(),
            );
            bounded(STORE_TIMEOUT, "residence insert", self.store.upsert(residence)).await??;

            info!(
                player = %player.id,
                family = %self.id,
                server = %server.id,
                "recorded new residence"
            );
        }
        Ok(server)
    }

    /// Step 5: the bounded failover loop. At most `attempts()` connect
    /// attempts; anything short of a confirmed success advances the
    /// balancer's cursor and is otherwise swallowed.
    async fn failover(&self, player: &Player, power: JoinPower) -> Result<Server, RoutingError> {
        let attempts = bounded(
            BALANCER_TIMEOUT,
            "failover attempt budget",
            self.balancer.attempts(),
        )
        .await?;

        if self.balancer.unlocked_servers().await.is_empty() {
            return Err(RoutingError::NoAvailableServers);
        }

        for attempt in 1..=attempts {
            let Some(candidate) = bounded(
                BALANCER_TIMEOUT,
                "failover candidate",
                self.balancer.current(),
            )
            .await?
            else {
                return Err(RoutingError::NoAvailableServers);
            };

            match self.attempt(player, &candidate, power).await {
                Ok(server) => return Ok(server),
                Err(err) => {
                    debug!(
                        player = %player.id,
                        family = %self.id,
                        server = %candidate.id,
                        attempt,
                        error = %err,
                        "failover attempt failed"
                    );
                }
            }

            self.balancer.force_iterate().await;
        }

        Err(RoutingError::FailoverExhausted { attempts })
    }

    /// Host-proxy notification that the player left one of this family's
    /// servers.
    ///
    /// Only meaningful under `ON_FIRST_LEAVE`: the departed-from server
    /// becomes the player's residence, but only if they do not already
    /// hold an unexpired one. Like `connect`, this never raises; store
    /// faults are logged and absorbed.
    pub async fn record_departure(&self, player: &Player, server: ServerId) {
        if self.storage_protocol != StorageProtocol::OnFirstLeave {
            return;
        }

        match self.departure_residence(player, server).await {
            Ok(Some(server)) => {
                info!(
                    player = %player.id,
                    family = %self.id,
                    server = %server,
                    "recorded residence at departure"
                );
            }
            Ok(None) => {}
            Err(err) => {
                error!(
                    player = %player.id,
                    username = %player.username,
                    family = %self.id,
                    action = "record a residence at departure",
                    error = %err,
                    "departure handling failed"
                );
            }
        }
    }

    /// Writes a departure residence unless an unexpired one already exists.
    /// Returns the recorded server, if a write happened.
    async fn departure_residence(
        &self,
        player: &Player,
        server: ServerId,
    ) -> Result<Option<ServerId>, RoutingError> {
        let existing = bounded(
            STORE_TIMEOUT,
            "residence lookup",
            self.store.find(&player.id, &self.id),
        )
        .await??;

        let now = SystemTime::now();
        if existing.is_some_and(|residence| !residence.is_expired(self.residence_expiration, now)) {
            return Ok(None);
        }

        let residence = Residence::new(player.id, server.clone(), self.id.clone(), now);
        bounded(STORE_TIMEOUT, "residence insert", self.store.upsert(residence)).await??;
        Ok(Some(server))
    }

    /// Rewrites the existing residence row after a successful failover
    /// under `ASSIGN_NEW_RESIDENCE`.
    async fn reassign_residence(
        &self,
        player: &Player,
        server: &Server,
    ) -> Result<(), RoutingError> {
        if self.reassign_requires_storage_protocol
            && self.storage_protocol != StorageProtocol::OnFirstJoin
        {
            return Ok(());
        }

        let rewritten = bounded(
            STORE_TIMEOUT,
            "residence update",
            self.store
                .update(&player.id, &self.id, server.id.clone(), SystemTime::now()),
        )
        .await??;

        if rewritten {
            info!(
                player = %player.id,
                family = %self.id,
                server = %server.id,
                "reassigned residence"
            );
        } else {
            warn!(
                player = %player.id,
                family = %self.id,
                "residence row vanished before reassignment"
            );
        }
        Ok(())
    }

    /// Steps 1-5 threaded through an explicit result. Only
    /// [`StaticFamily::connect`] converts the error side into a
    /// player-facing failure.
    async fn route(&self, player: &Player, power: JoinPower) -> Result<Server, RoutingError> {
        self.pre_join_gate(player, power).await?;

        let residence = match self.lookup_residence(player).await? {
            Some(residence) => residence,
            None => return self.first_join(player, power).await,
        };

        // sticky fast path: the resident server is still in the family, so
        // load balancing is bypassed entirely
        if self.balancer.contains_server(&residence.server).await {
            let server = self
                .balancer
                .fetch_server(&residence.server)
                .await
                .ok_or_else(|| RoutingError::ServerVanished(residence.server.clone()))?;
            return self.attempt(player, &server, power).await;
        }

        match self.unavailable_protocol {
            UnavailableProtocol::CancelConnectionAttempt => Err(RoutingError::ResidenceUnavailable),
            UnavailableProtocol::AssignNewResidence => {
                let server = self.failover(player, power).await?;
                self.reassign_residence(player, &server).await?;
                Ok(server)
            }
            UnavailableProtocol::ConnectWithError => {
                let server = self.failover(player, power).await?;
                self.connector.notify(player, MSG_REDIRECTED).await;
                Ok(server)
            }
            UnavailableProtocol::ConnectWithoutError => self.failover(player, power).await,
        }
    }
}

#[async_trait]
impl Family for StaticFamily {
    fn id(&self) -> &FamilyId {
        &self.id
    }

    fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    fn parent(&self) -> Option<&FamilyId> {
        self.parent.as_ref()
    }

    fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    async fn servers(&self) -> Vec<Server> {
        self.balancer.servers().await
    }

    async fn available_server(&self) -> Option<Server> {
        self.balancer.available_server().await
    }

    async fn contains_server(&self, id: &ServerId) -> bool {
        self.balancer.contains_server(id).await
    }

    async fn fetch_server(&self, id: &ServerId) -> Option<Server> {
        self.balancer.fetch_server(id).await
    }

    async fn lock_server(&self, id: &ServerId) {
        self.balancer.lock_server(id).await
    }

    async fn unlock_server(&self, id: &ServerId) {
        self.balancer.unlock_server(id).await
    }

    async fn locked_servers(&self) -> Vec<Server> {
        self.balancer.locked_servers().await
    }

    async fn unlocked_servers(&self) -> Vec<Server> {
        self.balancer.unlocked_servers().await
    }

    async fn is_locked(&self, id: &ServerId) -> bool {
        self.balancer.is_locked(id).await
    }

    async fn players(&self) -> u64 {
        let mut total = 0u64;
        for server in self.balancer.servers().await {
            total += u64::from(server.players);
        }
        total
    }

    async fn connect(&self, player: &Player, power: JoinPower) -> ConnectionResult {
        // precondition: a family with no unlocked servers fails before the
        // hook or the store are consulted
        if self.balancer.unlocked_servers().await.is_empty() {
            return ConnectionResult::failed(MSG_UNABLE_TO_CONNECT);
        }

        match self.route(player, power).await {
            Ok(server) => ConnectionResult::connected(server),
            Err(RoutingError::Vetoed { message }) => {
                debug!(player = %player.id, family = %self.id, "pre-join hook vetoed the connection");
                ConnectionResult::failed(message)
            }
            Err(RoutingError::ResidenceUnavailable) => {
                info!(
                    player = %player.id,
                    family = %self.id,
                    "resident server is gone; family cancels on unavailability"
                );
                ConnectionResult::failed(MSG_UNABLE_TO_CONNECT)
            }
            Err(err @ (RoutingError::NoAvailableServers | RoutingError::FailoverExhausted { .. })) => {
                warn!(player = %player.id, family = %self.id, error = %err, "no server could take the player");
                ConnectionResult::failed(MSG_NO_AVAILABLE_SERVERS)
            }
            Err(err) => {
                error!(
                    player = %player.id,
                    username = %player.username,
                    family = %self.id,
                    action = "connect a player to their resident server",
                    error = %err,
                    "routing failed"
                );
                ConnectionResult::failed(MSG_UNABLE_TO_CONNECT)
            }
        }
    }
}
