//! End-to-end routing scenarios.
//!
//! These tests drive [`StaticFamily`] through the real in-memory
//! collaborators (round-robin balancer, memory residence store) with a
//! scripted connector standing in for the backend handoff.

use async_trait::async_trait;
use family_router::{
    ConnectOutcome, ConnectionResult, ConnectorError, Family, FamilyConfig, FamilyId,
    HookDecision, HookError, JoinPower, LoadBalancer, MemoryResidenceStore, Player, PlayerId,
    PreJoinHook, Residence, ResidenceStore, RoundRobinBalancer, Server, ServerConnector, ServerId,
    StaticFamily, StorageProtocol, UnavailableProtocol,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

// ============================================================================
// Scripted collaborators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Succeed,
    Refuse,
    Hang,
    Fault,
}

/// Connector whose per-server behavior is scripted by the test.
/// Unscripted servers succeed.
struct ScriptedConnector {
    behaviors: Mutex<HashMap<String, Behavior>>,
    attempts: Mutex<Vec<String>>,
    notifications: AtomicU64,
}

impl ScriptedConnector {
    fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            notifications: AtomicU64::new(0),
        }
    }

    fn script(&self, server: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(server.to_string(), behavior);
    }

    fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ServerConnector for ScriptedConnector {
    async fn connect(
        &self,
        _player: &Player,
        server: &Server,
        _power: JoinPower,
    ) -> Result<ConnectOutcome, ConnectorError> {
        self.attempts
            .lock()
            .unwrap()
            .push(server.id.as_str().to_string());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(server.id.as_str())
            .copied()
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Ok(ConnectOutcome::Connected(server.clone())),
            Behavior::Refuse => Ok(ConnectOutcome::Refused {
                reason: "server full".to_string(),
            }),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::Fault => Err(ConnectorError::new("backend channel collapsed")),
        }
    }

    async fn notify(&self, _player: &Player, _message: &str) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }
}

/// Balancer wrapper counting selection and iteration traffic, so tests can
/// assert the sticky fast path bypasses load balancing entirely.
struct CountingBalancer {
    inner: RoundRobinBalancer,
    selections: AtomicU64,
    iterations: AtomicU64,
}

impl CountingBalancer {
    fn new(attempts: u32) -> Self {
        Self {
            inner: RoundRobinBalancer::new(attempts),
            selections: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
        }
    }

    fn selection_calls(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }

    fn iteration_calls(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LoadBalancer for CountingBalancer {
    async fn add_server(&self, server: Server) {
        self.inner.add_server(server).await
    }

    async fn remove_server(&self, id: &ServerId) {
        self.inner.remove_server(id).await
    }

    async fn fetch_server(&self, id: &ServerId) -> Option<Server> {
        self.inner.fetch_server(id).await
    }

    async fn contains_server(&self, id: &ServerId) -> bool {
        self.inner.contains_server(id).await
    }

    async fn lock_server(&self, id: &ServerId) {
        self.inner.lock_server(id).await
    }

    async fn unlock_server(&self, id: &ServerId) {
        self.inner.unlock_server(id).await
    }

    async fn locked_servers(&self) -> Vec<Server> {
        self.inner.locked_servers().await
    }

    async fn unlocked_servers(&self) -> Vec<Server> {
        self.inner.unlocked_servers().await
    }

    async fn servers(&self) -> Vec<Server> {
        self.inner.servers().await
    }

    async fn available_server(&self) -> Option<Server> {
        self.selections.fetch_add(1, Ordering::Relaxed);
        self.inner.available_server().await
    }

    async fn is_locked(&self, id: &ServerId) -> bool {
        self.inner.is_locked(id).await
    }

    async fn current(&self) -> Option<Server> {
        self.selections.fetch_add(1, Ordering::Relaxed);
        self.inner.current().await
    }

    async fn force_iterate(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.inner.force_iterate().await
    }

    async fn attempts(&self) -> u32 {
        self.inner.attempts().await
    }
}

/// Hook returning a fixed decision, counting how often it was consulted.
struct RecordingHook {
    decision: Result<HookDecision, HookError>,
    calls: AtomicU64,
}

impl RecordingHook {
    fn allowing() -> Self {
        Self {
            decision: Ok(HookDecision::Allow),
            calls: AtomicU64::new(0),
        }
    }

    fn vetoing(message: &str) -> Self {
        Self {
            decision: Ok(HookDecision::Veto {
                message: message.to_string(),
            }),
            calls: AtomicU64::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            decision: Err(HookError::new("event bus unavailable")),
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PreJoinHook for RecordingHook {
    async fn pre_join(
        &self,
        _family: &FamilyId,
        _player: &Player,
        _power: JoinPower,
    ) -> Result<HookDecision, HookError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.decision.clone()
    }
}

/// Hook that never answers; exercises the fail-open timeout.
struct StalledHook;

#[async_trait]
impl PreJoinHook for StalledHook {
    async fn pre_join(
        &self,
        _family: &FamilyId,
        _player: &Player,
        _power: JoinPower,
    ) -> Result<HookDecision, HookError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    family: Arc<StaticFamily>,
    store: Arc<MemoryResidenceStore>,
    connector: Arc<ScriptedConnector>,
    balancer: Arc<CountingBalancer>,
    hook: Arc<RecordingHook>,
}

impl Fixture {
    async fn build(config: FamilyConfig) -> Self {
        Self::build_with_hook(config, Arc::new(RecordingHook::allowing())).await
    }

    async fn build_with_hook(config: FamilyConfig, hook: Arc<RecordingHook>) -> Self {
        let store = Arc::new(MemoryResidenceStore::new());
        let connector = Arc::new(ScriptedConnector::new());
        let balancer = Arc::new(CountingBalancer::new(config.attempts));
        let family = Arc::new(
            StaticFamily::new(
                &config,
                balancer.clone(),
                store.clone(),
                connector.clone(),
                hook.clone(),
            )
            .await
            .expect("family construction should succeed"),
        );
        Self {
            family,
            store,
            connector,
            balancer,
            hook,
        }
    }

    async fn add_server(&self, id: &str) {
        self.balancer
            .add_server(Server::new(
                ServerId::new(id).unwrap(),
                "127.0.0.1:25565".parse().unwrap(),
            ))
            .await;
    }

    /// Seeds a residence row directly, as a previous session would have.
    async fn seed_residence(&self, player: &Player, server: &str, last_joined: SystemTime) -> Residence {
        self.store
            .upsert(Residence::new(
                player.id,
                ServerId::new(server).unwrap(),
                FamilyId::new("smp").unwrap(),
                last_joined,
            ))
            .await
            .unwrap()
    }

    async fn find_residence(&self, player: &Player) -> Option<Residence> {
        self.store
            .find(&player.id, &FamilyId::new("smp").unwrap())
            .await
            .unwrap()
    }

    async fn connect(&self, player: &Player) -> ConnectionResult {
        self.family.connect(player, JoinPower::Minimal).await
    }
}

fn player() -> Player {
    Player::new(PlayerId::new(), "steve")
}

fn config() -> FamilyConfig {
    FamilyConfig::new("smp")
}

// ============================================================================
// First joins
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn first_join_records_residence_for_the_connected_server() {
    let fixture = Fixture::build(config()).await;
    fixture.add_server("smp-1").await;
    let player = player();

    let result = fixture.connect(&player).await;
    assert_eq!(result.server().unwrap().id.as_str(), "smp-1");

    let residence = fixture
        .find_residence(&player)
        .await
        .expect("row should exist");
    assert_eq!(residence.server.as_str(), "smp-1");
    assert_eq!(fixture.store.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_first_join_writes_nothing() {
    let fixture = Fixture::build(config()).await;
    fixture.add_server("smp-1").await;
    fixture.connector.script("smp-1", Behavior::Refuse);
    let player = player();

    let result = fixture.connect(&player).await;
    assert!(!result.is_connected());

    // connect-then-write: a refused attempt leaves no orphaned row
    assert!(fixture.store.is_empty());
    assert_eq!(fixture.store.stats().upserts, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_family_fails_before_hook_and_store() {
    let hook = Arc::new(RecordingHook::allowing());
    let fixture = Fixture::build_with_hook(config(), hook).await;
    let player = player();

    let result = fixture.connect(&player).await;
    assert!(!result.is_connected());
    assert_eq!(fixture.hook.calls(), 0);
    assert_eq!(fixture.store.stats().finds, 0);
}

// ============================================================================
// Sticky fast path
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn live_residence_routes_directly_with_zero_balancing() {
    let fixture = Fixture::build(config()).await;
    fixture.add_server("smp-1").await;
    fixture.add_server("smp-2").await;
    let player = player();
    fixture
        .seed_residence(&player, "smp-2", SystemTime::now())
        .await;

    // repeated joins stick to the same server with no selection or
    // iteration traffic
    for _ in 0..3 {
        let result = fixture.connect(&player).await;
        assert_eq!(result.server().unwrap().id.as_str(), "smp-2");
    }
    assert_eq!(fixture.balancer.selection_calls(), 0);
    assert_eq!(fixture.balancer.iteration_calls(), 0);
    assert_eq!(fixture.store.stats().upserts, 1); // only the seed
    assert_eq!(fixture.store.stats().updates, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_residence_is_reassigned_through_first_join() {
    let fixture = Fixture::build(config()).await;
    fixture.add_server("smp-1").await;
    fixture.add_server("smp-2").await;
    let player = player();

    // stale row pointing at a still-live server: expiration wins
    let hundred_days = Duration::from_secs(100 * 24 * 60 * 60);
    let seeded = fixture
        .seed_residence(&player, "smp-2", SystemTime::now() - hundred_days)
        .await;

    let result = fixture.connect(&player).await;
    assert_eq!(result.server().unwrap().id.as_str(), "smp-1");

    let rewritten = fixture.find_residence(&player).await.unwrap();
    assert_eq!(rewritten.server.as_str(), "smp-1");
    assert_eq!(rewritten.row, seeded.row);
    assert_eq!(fixture.store.len(), 1);
}

// ============================================================================
// Stale residence: the unavailable protocols
// ============================================================================

fn stale_config(protocol: UnavailableProtocol) -> FamilyConfig {
    let mut config = config();
    config.unavailable_protocol = protocol;
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_protocol_fails_with_zero_store_writes() {
    let fixture = Fixture::build(stale_config(UnavailableProtocol::CancelConnectionAttempt)).await;
    fixture.add_server("smp-1").await;
    let player = player();
    fixture
        .seed_residence(&player, "gone-server", SystemTime::now())
        .await;

    let result = fixture.connect(&player).await;
    assert!(!result.is_connected());
    assert_eq!(fixture.store.stats().upserts, 1); // only the seed
    assert_eq!(fixture.store.stats().updates, 0);
    assert!(fixture.connector.attempts().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn assign_new_residence_rewrites_the_same_row() {
    let fixture = Fixture::build(stale_config(UnavailableProtocol::AssignNewResidence)).await;
    fixture.add_server("smp-1").await;
    let player = player();
    let before = SystemTime::now() - Duration::from_secs(3600);
    let seeded = fixture.seed_residence(&player, "gone-server", before).await;

    let result = fixture.connect(&player).await;
    assert_eq!(result.server().unwrap().id.as_str(), "smp-1");

    let rewritten = fixture.find_residence(&player).await.unwrap();
    assert_eq!(rewritten.row, seeded.row);
    assert_eq!(rewritten.server.as_str(), "smp-1");
    assert!(rewritten.last_joined > before);
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_with_error_notifies_without_mutation() {
    let fixture = Fixture::build(stale_config(UnavailableProtocol::ConnectWithError)).await;
    fixture.add_server("smp-1").await;
    let player = player();
    fixture
        .seed_residence(&player, "gone-server", SystemTime::now())
        .await;

    let result = fixture.connect(&player).await;
    assert_eq!(result.server().unwrap().id.as_str(), "smp-1");
    assert_eq!(fixture.connector.notifications(), 1);

    let row = fixture.find_residence(&player).await.unwrap();
    assert_eq!(row.server.as_str(), "gone-server");
    assert_eq!(fixture.store.stats().updates, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_without_error_is_silent_and_leaves_the_row() {
    let fixture = Fixture::build(stale_config(UnavailableProtocol::ConnectWithoutError)).await;
    fixture.add_server("smp-1").await;
    let player = player();
    fixture
        .seed_residence(&player, "gone-server", SystemTime::now())
        .await;

    let result = fixture.connect(&player).await;
    assert!(result.is_connected());
    assert_eq!(fixture.connector.notifications(), 0);
    assert_eq!(fixture.store.stats().updates, 0);
    assert_eq!(
        fixture.find_residence(&player).await.unwrap().server.as_str(),
        "gone-server"
    );
}

// ============================================================================
// Failover loop
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn failover_respects_the_attempt_budget() {
    let mut config = stale_config(UnavailableProtocol::ConnectWithoutError);
    config.attempts = 2;
    let fixture = Fixture::build(config).await;
    fixture.add_server("smp-1").await;
    fixture.add_server("smp-2").await;
    fixture.add_server("smp-3").await;
    fixture.connector.script("smp-1", Behavior::Refuse);
    fixture.connector.script("smp-2", Behavior::Refuse);
    fixture.connector.script("smp-3", Behavior::Refuse);

    let player = player();
    fixture
        .seed_residence(&player, "gone-server", SystemTime::now())
        .await;

    let result = fixture.connect(&player).await;
    assert!(!result.is_connected());
    assert_eq!(fixture.connector.attempts().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failover_stops_at_the_first_confirmed_success() {
    let fixture = Fixture::build(stale_config(UnavailableProtocol::ConnectWithoutError)).await;
    fixture.add_server("smp-1").await;
    fixture.add_server("smp-2").await;
    fixture.add_server("smp-3").await;
    fixture.connector.script("smp-1", Behavior::Refuse);

    let player = player();
    fixture
        .seed_residence(&player, "gone-server", SystemTime::now())
        .await;

    let result = fixture.connect(&player).await;
    assert_eq!(result.server().unwrap().id.as_str(), "smp-2");
    assert_eq!(fixture.connector.attempts(), vec!["smp-1", "smp-2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn connector_faults_are_swallowed_and_count_against_the_budget() {
    let fixture = Fixture::build(stale_config(UnavailableProtocol::ConnectWithoutError)).await;
    fixture.add_server("smp-1").await;
    fixture.add_server("smp-2").await;
    fixture.connector.script("smp-1", Behavior::Fault);

    let player = player();
    fixture
        .seed_residence(&player, "gone-server", SystemTime::now())
        .await;

    let result = fixture.connect(&player).await;
    assert_eq!(result.server().unwrap().id.as_str(), "smp-2");
}

#[tokio::test(start_paused = true)]
async fn failover_reassignment_end_to_end() {
    // family F: ON_FIRST_JOIN + ASSIGN_NEW_RESIDENCE, attempts = 3
    let mut config = stale_config(UnavailableProtocol::AssignNewResidence);
    config.attempts = 3;
    let fixture = Fixture::build(config).await;
    fixture.add_server("a").await;
    let player = player();

    // P joins with no residence; the balancer offers A; connect succeeds
    let first = fixture.connect(&player).await;
    assert_eq!(first.server().unwrap().id.as_str(), "a");
    let created = fixture.find_residence(&player).await.unwrap();
    assert_eq!(created.server.as_str(), "a");

    // A later leaves the family; B and C take its place
    fixture
        .balancer
        .remove_server(&ServerId::new("a").unwrap())
        .await;
    fixture.add_server("b").await;
    fixture.add_server("c").await;
    fixture.connector.script("b", Behavior::Hang);

    // P joins again: the attempt to B times out, C succeeds
    let second = fixture.connect(&player).await;
    assert_eq!(second.server().unwrap().id.as_str(), "c");

    let updated = fixture.find_residence(&player).await.unwrap();
    assert_eq!(updated.row, created.row);
    assert_eq!(updated.server.as_str(), "c");
    assert!(updated.last_joined >= created.last_joined);
    assert_eq!(fixture.connector.attempts(), vec!["a", "b", "c"]);
}

// ============================================================================
// Pre-join gate
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn veto_short_circuits_before_any_store_access() {
    let hook = Arc::new(RecordingHook::vetoing("maintenance window"));
    let fixture = Fixture::build_with_hook(config(), hook).await;
    fixture.add_server("smp-1").await;
    let player = player();

    let result = fixture.connect(&player).await;
    assert_eq!(
        result,
        ConnectionResult::failed("maintenance window")
    );
    assert_eq!(fixture.hook.calls(), 1);
    assert_eq!(fixture.store.stats().finds, 0);
    assert!(fixture.connector.attempts().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn hook_failure_fails_open() {
    let hook = Arc::new(RecordingHook::failing());
    let fixture = Fixture::build_with_hook(config(), hook).await;
    fixture.add_server("smp-1").await;

    let result = fixture.connect(&player()).await;
    assert!(result.is_connected());
}

#[tokio::test(start_paused = true)]
async fn hook_timeout_fails_open() {
    let store = Arc::new(MemoryResidenceStore::new());
    let connector = Arc::new(ScriptedConnector::new());
    let balancer = Arc::new(CountingBalancer::new(5));
    let family = StaticFamily::new(
        &config(),
        balancer.clone(),
        store,
        connector,
        Arc::new(StalledHook),
    )
    .await
    .unwrap();
    balancer
        .add_server(Server::new(
            ServerId::new("smp-1").unwrap(),
            "127.0.0.1:25565".parse().unwrap(),
        ))
        .await;

    let result = family.connect(&player(), JoinPower::Minimal).await;
    assert!(result.is_connected());
}

// ============================================================================
// Storage protocols
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn on_first_leave_records_only_at_departure() {
    let mut config = config();
    config.storage_protocol = StorageProtocol::OnFirstLeave;
    let fixture = Fixture::build(config).await;
    fixture.add_server("smp-1").await;
    let player = player();

    // joining writes nothing under ON_FIRST_LEAVE
    let result = fixture.connect(&player).await;
    assert!(result.is_connected());
    assert!(fixture.store.is_empty());

    // the first departure records the residence
    fixture
        .family
        .record_departure(&player, ServerId::new("smp-1").unwrap())
        .await;
    let row = fixture.find_residence(&player).await.unwrap();
    assert_eq!(row.server.as_str(), "smp-1");

    // later departures never overwrite an unexpired residence
    fixture
        .family
        .record_departure(&player, ServerId::new("smp-9").unwrap())
        .await;
    assert_eq!(
        fixture.find_residence(&player).await.unwrap().server.as_str(),
        "smp-1"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn departure_recording_is_a_no_op_under_on_first_join() {
    let fixture = Fixture::build(config()).await;
    fixture.add_server("smp-1").await;
    let player = player();

    fixture
        .family
        .record_departure(&player, ServerId::new("smp-1").unwrap())
        .await;
    assert!(fixture.store.is_empty());
    assert_eq!(fixture.store.stats().finds, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn reassignment_gate_suppresses_updates_outside_on_first_join() {
    let mut config = stale_config(UnavailableProtocol::AssignNewResidence);
    config.storage_protocol = StorageProtocol::OnFirstLeave;
    config.reassign_requires_storage_protocol = true;
    let fixture = Fixture::build(config).await;
    fixture.add_server("smp-1").await;
    let player = player();
    fixture
        .seed_residence(&player, "gone-server", SystemTime::now())
        .await;

    let result = fixture.connect(&player).await;
    assert!(result.is_connected());

    // gated: the row keeps its old assignment
    assert_eq!(
        fixture.find_residence(&player).await.unwrap().server.as_str(),
        "gone-server"
    );
    assert_eq!(fixture.store.stats().updates, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn ungated_reassignment_updates_regardless_of_storage_protocol() {
    let mut config = stale_config(UnavailableProtocol::AssignNewResidence);
    config.storage_protocol = StorageProtocol::OnFirstLeave;
    config.reassign_requires_storage_protocol = false;
    let fixture = Fixture::build(config).await;
    fixture.add_server("smp-1").await;
    let player = player();
    fixture
        .seed_residence(&player, "gone-server", SystemTime::now())
        .await;

    let result = fixture.connect(&player).await;
    assert!(result.is_connected());
    assert_eq!(
        fixture.find_residence(&player).await.unwrap().server.as_str(),
        "smp-1"
    );
}
