//! Residence records and the store contract that persists them.
//!
//! A residence is the durable sticky assignment binding a player to one
//! backend server within a family. The router consumes storage through the
//! [`ResidenceStore`] trait; [`MemoryResidenceStore`] is the in-process
//! implementation used by tests and as the daemon's default store.

use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use homeward_types::{FamilyId, PlayerId, ServerId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Logical name of the residence collection.
pub const RESIDENCE_COLLECTION: &str = "static_family_residence";

/// Column: string form of the player UUID, fixed length 36, not null.
pub const COLUMN_PLAYER_UUID: &str = "player_uuid";

/// Column: server identifier, string of at most 64 characters, not null.
pub const COLUMN_SERVER_ID: &str = "server_id";

/// Column: family identifier, string of at most 16 characters, not null.
pub const COLUMN_FAMILY_ID: &str = "family_id";

/// Column: timestamp of the last successful join, not null.
pub const COLUMN_LAST_JOINED: &str = "last_joined";

/// Fixed length of the `player_uuid` column.
pub const PLAYER_UUID_LEN: usize = 36;

/// A player's durable sticky assignment within one family.
///
/// At most one residence exists per (player, family) pair; the store
/// enforces this with upsert semantics keyed on that pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residence {
    /// Row identity assigned by the store; 0 until first persisted
    pub row: u64,

    /// The resident player
    pub player: PlayerId,

    /// The server the player is bound to
    pub server: ServerId,

    /// The family the binding belongs to
    pub family: FamilyId,

    /// When the player last successfully joined through this binding
    pub last_joined: SystemTime,
}

impl Residence {
    /// Creates an unpersisted residence for the given assignment.
    pub fn new(player: PlayerId, server: ServerId, family: FamilyId, last_joined: SystemTime) -> Self {
        Self {
            row: 0,
            player,
            server,
            family,
            last_joined,
        }
    }

    /// Whether this residence has outlived the family's expiration window.
    ///
    /// Expiration is evaluated lazily at lookup; there is no background
    /// sweep. A clock that reads earlier than `last_joined` counts as
    /// not expired.
    pub fn is_expired(&self, expiration: Duration, now: SystemTime) -> bool {
        match now.duration_since(self.last_joined) {
            Ok(age) => age >= expiration,
            Err(_) => false,
        }
    }
}

/// Durable storage for residence records.
///
/// Conceptually the store answers equality-filter queries ANDed over
/// (`player_uuid`, `family_id`). Implementations must keep at most one row
/// per (player, family) pair: concurrent writers degrade to last write
/// wins, never to duplicate rows.
#[async_trait]
pub trait ResidenceStore: Send + Sync {
    /// Ensures the backing collection exists with the four residence
    /// columns. Idempotent: checked, then created only when missing.
    async fn ensure_collection(&self) -> Result<(), StoreError>;

    /// Finds the residence for (player, family), if one exists.
    async fn find(
        &self,
        player: &PlayerId,
        family: &FamilyId,
    ) -> Result<Option<Residence>, StoreError>;

    /// Inserts the residence, replacing any existing row for the same
    /// (player, family) pair. Returns the persisted record, with its row
    /// identity preserved when an existing row was replaced.
    async fn upsert(&self, residence: Residence) -> Result<Residence, StoreError>;

    /// Rewrites the server and timestamp of the existing row for
    /// (player, family), keeping its row identity. Returns false when no
    /// such row exists.
    async fn update(
        &self,
        player: &PlayerId,
        family: &FamilyId,
        server: ServerId,
        last_joined: SystemTime,
    ) -> Result<bool, StoreError>;
}

/// Point-in-time counters for a [`MemoryResidenceStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Lookups served
    pub finds: u64,

    /// Rows inserted or replaced through `upsert`
    pub upserts: u64,

    /// Rows rewritten through `update`
    pub updates: u64,
}

/// In-process residence store backed by a concurrent map.
///
/// Keyed on (player, family), which gives the uniqueness invariant for
/// free: races between concurrent joins collapse to last write wins.
pub struct MemoryResidenceStore {
    rows: DashMap<(PlayerId, FamilyId), Residence>,
    created: AtomicBool,
    next_row: AtomicU64,
    finds: AtomicU64,
    upserts: AtomicU64,
    updates: AtomicU64,
}

impl MemoryResidenceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            created: AtomicBool::new(false),
            next_row: AtomicU64::new(1),
            finds: AtomicU64::new(0),
            upserts: AtomicU64::new(0),
            updates: AtomicU64::new(0),
        }
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether `ensure_collection` has run.
    pub fn collection_ready(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            finds: self.finds.load(Ordering::Relaxed),
            upserts: self.upserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryResidenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResidenceStore for MemoryResidenceStore {
    async fn ensure_collection(&self) -> Result<(), StoreError> {
        // check-then-create, collapsed to a flag for the in-memory case
        self.created.store(true, Ordering::Release);
        Ok(())
    }

    async fn find(
        &self,
        player: &PlayerId,
        family: &FamilyId,
    ) -> Result<Option<Residence>, StoreError> {
        self.finds.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .rows
            .get(&(*player, family.clone()))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, mut residence: Residence) -> Result<Residence, StoreError> {
        self.upserts.fetch_add(1, Ordering::Relaxed);
        let key = (residence.player, residence.family.clone());
        match self.rows.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                residence.row = existing.get().row;
                existing.insert(residence.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                residence.row = self.next_row.fetch_add(1, Ordering::Relaxed);
                vacant.insert(residence.clone());
            }
        }
        Ok(residence)
    }

    async fn update(
        &self,
        player: &PlayerId,
        family: &FamilyId,
        server: ServerId,
        last_joined: SystemTime,
    ) -> Result<bool, StoreError> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        match self.rows.get_mut(&(*player, family.clone())) {
            Some(mut entry) => {
                let row = entry.value_mut();
                row.server = server;
                row.last_joined = last_joined;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
