//! Core data models for cost accounting
//!
//! Prices arrive from pricing providers as strings; they are kept that way
//! until the moment of use so an unparsable price degrades to zero for that
//! cost category instead of failing the whole computation.

use crate::error::CostModelError;
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Hourly unit prices for the node a container runs on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePricing {
    /// Number of vCPUs on the node.
    #[serde(default)]
    pub vcpu: String,
    /// Hourly cost per vCPU.
    #[serde(default)]
    pub vcpu_cost: String,
    /// RAM capacity in bytes.
    #[serde(default)]
    pub ram_bytes: String,
    /// Hourly cost per GiB of RAM.
    #[serde(default)]
    pub ram_cost: String,
    /// Number of GPUs on the node.
    #[serde(default)]
    pub gpu: String,
    /// Hourly cost per GPU.
    #[serde(default)]
    pub gpu_cost: String,
    /// Whether the node is billed at spot/preemptible rates.
    #[serde(default)]
    pub spot: bool,
}

/// A persistent volume bound to a claim, with its resolved price.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Hourly cost per GiB of storage.
    #[serde(default)]
    pub cost: String,
}

/// Usage of one persistent volume claim attached to a pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvcCost {
    pub claim: String,
    pub volume_name: String,
    /// The bound volume carrying the per-GiB price. `None` means the claim
    /// is unbound and contributes no cost.
    #[serde(default)]
    pub volume: Option<VolumeInfo>,
    /// Allocated bytes over the reporting window.
    #[serde(default)]
    pub values: Vec<Vector>,
}

/// One container's accounting unit for a reporting window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRecord {
    pub cluster_id: String,
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub node_name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub deployments: Vec<String>,
    /// `None` marks an incomplete record: it stays in the input set but is
    /// skipped by any consumer that needs price data.
    #[serde(default)]
    pub node: Option<NodePricing>,
    #[serde(default)]
    pub cpu_allocation: Vec<Vector>,
    #[serde(default)]
    pub ram_allocation: Vec<Vector>,
    #[serde(default)]
    pub gpu_request: Vec<Vector>,
    #[serde(default)]
    pub pvc_data: Vec<PvcCost>,
}

/// Operator-supplied price overrides, substituted for node prices when the
/// provider reports custom pricing as enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPricing {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub ram: String,
    #[serde(default)]
    pub gpu: String,
    #[serde(default)]
    pub spot_cpu: String,
    #[serde(default)]
    pub spot_ram: String,
    #[serde(default)]
    pub spot_gpu: String,
    #[serde(default)]
    pub storage: String,
    /// Fleet-wide discount as a percent string, e.g. `"10%"`.
    #[serde(default)]
    pub discount: String,
}

impl CustomPricing {
    /// Parse the percent-string discount into a fraction in `[0, 1]`.
    pub fn discount_fraction(&self) -> Result<f64, CostModelError> {
        let trimmed = self.discount.trim().trim_end_matches('%');
        let percent: f64 = trimmed
            .parse()
            .map_err(|_| CostModelError::InvalidDiscount(self.discount.clone()))?;
        Ok(percent * 0.01)
    }
}

/// Per-GB network egress prices.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPrices {
    pub zone_egress: f64,
    pub region_egress: f64,
    pub internet_egress: f64,
}

/// Predicate selecting records whose cost is pooled and redistributed
/// across all aggregation groups instead of billed to their own group.
#[derive(Debug, Clone)]
pub struct SharedResourceInfo {
    namespaces: HashSet<String>,
    label_selectors: HashMap<String, String>,
}

impl SharedResourceInfo {
    /// Build the predicate from namespace names and paired label
    /// name/value lists. `kube-system` is always shared.
    pub fn new(
        namespaces: &[String],
        label_names: &[String],
        label_values: &[String],
    ) -> Result<Self, CostModelError> {
        if label_names.len() != label_values.len() {
            return Err(CostModelError::LabelSelectorMismatch {
                names: label_names.len(),
                values: label_values.len(),
            });
        }

        let mut ns: HashSet<String> = namespaces.iter().cloned().collect();
        ns.insert("kube-system".to_string());

        let label_selectors = label_names
            .iter()
            .cloned()
            .zip(label_values.iter().cloned())
            .collect();

        Ok(Self {
            namespaces: ns,
            label_selectors,
        })
    }

    /// Whether a record's cost belongs in the shared pool.
    pub fn is_shared(&self, record: &CostRecord) -> bool {
        if self.namespaces.contains(&record.namespace) {
            return true;
        }
        self.label_selectors
            .iter()
            .any(|(name, value)| record.labels.get(name) == Some(value))
    }
}

/// Aggregated cost for one group key.
///
/// Time-series fields are populated only when the caller requests
/// time-series output; scalar totals are always present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    #[serde(rename = "aggregation")]
    pub aggregator: String,
    #[serde(rename = "aggregationSubfield")]
    pub aggregator_subfield: String,
    pub environment: String,
    pub cluster: String,
    #[serde(skip)]
    pub cpu_allocation: Vec<Vector>,
    #[serde(skip)]
    pub ram_allocation: Vec<Vector>,
    #[serde(skip)]
    pub gpu_allocation: Vec<Vector>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cpu_cost_vector: Vec<Vector>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ram_cost_vector: Vec<Vector>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub gpu_cost_vector: Vec<Vector>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pv_cost_vector: Vec<Vector>,
    pub cpu_cost: f64,
    pub ram_cost: f64,
    pub gpu_cost: f64,
    pub pv_cost: f64,
    pub network_cost: f64,
    pub shared_cost: f64,
    pub total_cost: f64,
}
