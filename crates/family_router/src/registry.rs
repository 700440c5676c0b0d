//! Name-keyed residence stores and the family registry.
//!
//! The registry is where configuration becomes live routing: each
//! [`FamilyConfig`] is validated, its backing store resolved by name, its
//! load balancer built from the configured algorithm, and the resulting
//! [`StaticFamily`] indexed by family ID. Construction failures abort that
//! family's startup and propagate to the caller; they are never absorbed.

use crate::{
    balancer::{LoadBalancer, RoundRobinBalancer},
    config::FamilyConfig,
    connector::ServerConnector,
    error::ConstructionError,
    family::{Family, StaticFamily},
    hook::PreJoinHook,
    residence::ResidenceStore,
};
use dashmap::DashMap;
use homeward_types::FamilyId;
use std::sync::Arc;
use tracing::info;

/// Algorithm name accepted by [`build_balancer`].
pub const BALANCER_ROUND_ROBIN: &str = "round_robin";

/// Builds the named load-balancing algorithm with the given attempt budget.
pub fn build_balancer(
    name: &str,
    attempts: u32,
) -> Result<Arc<dyn LoadBalancer>, ConstructionError> {
    match name {
        BALANCER_ROUND_ROBIN => Ok(Arc::new(RoundRobinBalancer::new(attempts))),
        other => Err(ConstructionError::UnknownBalancer {
            name: other.to_string(),
        }),
    }
}

/// Residence stores registered under operator-chosen names.
///
/// Families reference their backing store by name in configuration; an
/// unresolvable name is fatal for that family.
pub struct StoreRegistry {
    stores: DashMap<String, Arc<dyn ResidenceStore>>,
}

impl StoreRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            stores: DashMap::new(),
        }
    }

    /// Registers a store under the given name, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, store: Arc<dyn ResidenceStore>) {
        self.stores.insert(name.into(), store);
    }

    /// Resolves a store by name.
    pub fn fetch(&self, name: &str) -> Option<Arc<dyn ResidenceStore>> {
        self.stores.get(name).map(|entry| entry.value().clone())
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Constructs families from configuration and indexes them by ID.
pub struct FamilyRegistry {
    families: DashMap<FamilyId, Arc<dyn Family>>,
    stores: Arc<StoreRegistry>,
    connector: Arc<dyn ServerConnector>,
    hook: Arc<dyn PreJoinHook>,
}

impl FamilyRegistry {
    /// Creates a registry that constructs families against the given
    /// store registry, connector, and pre-join hook.
    pub fn new(
        stores: Arc<StoreRegistry>,
        connector: Arc<dyn ServerConnector>,
        hook: Arc<dyn PreJoinHook>,
    ) -> Self {
        Self {
            families: DashMap::new(),
            stores,
            connector,
            hook,
        }
    }

    /// Constructs a static family from its configuration and registers it.
    ///
    /// Fatal when the named store cannot be resolved, the balancer name is
    /// unknown, the config carries an unsupported protocol value, or the
    /// residence collection cannot be prepared.
    pub async fn construct(
        &self,
        config: &FamilyConfig,
    ) -> Result<Arc<StaticFamily>, ConstructionError> {
        config.validate()?;

        let store =
            self.stores
                .fetch(&config.storage)
                .ok_or_else(|| ConstructionError::UnknownStore {
                    name: config.storage.clone(),
                })?;
        let balancer = build_balancer(&config.load_balancer, config.attempts)?;

        let family = Arc::new(
            StaticFamily::new(
                config,
                balancer,
                store,
                self.connector.clone(),
                self.hook.clone(),
            )
            .await?,
        );

        self.families
            .insert(family.id().clone(), family.clone() as Arc<dyn Family>);
        info!(
            family = %family.id(),
            storage_protocol = %family.storage_protocol(),
            unavailable_protocol = %family.unavailable_protocol(),
            "constructed static family"
        );
        Ok(family)
    }

    /// Finds a registered family by ID.
    pub fn find(&self, id: &FamilyId) -> Option<Arc<dyn Family>> {
        self.families.get(id).map(|entry| entry.value().clone())
    }

    /// IDs of every registered family.
    pub fn ids(&self) -> Vec<FamilyId> {
        self.families
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered families.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// Whether no families are registered.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}
