//! Collaborator interfaces
//!
//! The engine consumes three kinds of external data: per-container cost
//! records and cluster totals from a metrics backend, live cluster objects
//! from an inventory provider, and unit prices from a pricing provider.
//! Transport and timeout policy belong to the implementations; the traits
//! here only fix the shapes the engine depends on.

use crate::models::{CostRecord, CustomPricing, NetworkPrices};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Cluster-wide cost totals over a window.
///
/// Values are kept as strings as delivered by the backend; the first total
/// is parsed at the point of use and absence or zero means the total is
/// unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterCosts {
    pub total: Vec<(f64, String)>,
}

/// Identifies one container for uptime reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerKey {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
}

/// A live persistent volume, as reported by the inventory provider.
#[derive(Debug, Clone, Default)]
pub struct PersistentVolumeInfo {
    pub name: String,
    /// Storage class name, if the volume declares one.
    pub storage_class: Option<String>,
    /// Storage class parameters, empty when the class cannot be resolved.
    pub parameters: HashMap<String, String>,
}

/// Metrics backend supplying raw allocation series and cluster totals.
#[async_trait]
pub trait CostDataSource: Send + Sync {
    /// Per-container cost records over a window, optionally filtered by
    /// namespace and cluster (empty string means no filter).
    async fn cost_records(
        &self,
        window: Duration,
        offset: Option<Duration>,
        namespace: &str,
        cluster: &str,
    ) -> Result<HashMap<String, CostRecord>>;

    /// Cluster-wide monthly cost totals for the window.
    async fn cluster_total_cost(
        &self,
        window: Duration,
        offset: Option<Duration>,
    ) -> Result<ClusterCosts>;

    /// Seconds each container has been running.
    async fn container_uptimes(&self) -> Result<HashMap<ContainerKey, f64>>;
}

/// Live cluster objects.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// Names of pods currently in the `Running` phase.
    async fn running_pods(&self) -> Result<HashSet<String>>;

    /// All persistent volumes in the cluster.
    async fn persistent_volumes(&self) -> Result<Vec<PersistentVolumeInfo>>;
}

/// Per-unit prices and price overrides.
pub trait PricingProvider: Send + Sync {
    /// The operator-configured price set, including the discount.
    fn custom_pricing(&self) -> Result<CustomPricing>;

    /// Whether the custom price set overrides node-reported prices.
    fn custom_pricing_enabled(&self) -> bool;

    /// Per-GB network egress prices.
    fn network_prices(&self) -> Result<NetworkPrices>;

    /// Hourly cost per GiB for a persistent volume, resolved from its
    /// storage class.
    fn volume_price(&self, volume: &PersistentVolumeInfo) -> Result<String>;
}
