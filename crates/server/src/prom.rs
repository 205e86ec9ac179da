//! Prometheus-backed data source
//!
//! Assembles per-container cost records from series exported by this
//! process (allocation and node price gauges) and by kube-state-metrics
//! (pod phase, labels, owners, volumes). Sampling interval and jitter are
//! owned by the backend; the engine snaps all timestamps to its grid
//! downstream.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use costmodel::costing::parse_or_zero;
use costmodel::models::{CostRecord, NodePricing, PvcCost, VolumeInfo};
use costmodel::sources::{
    ClusterCosts, ClusterInventory, ContainerKey, CostDataSource, PersistentVolumeInfo,
};
use costmodel::vector::Vector;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use url::Url;

/// Average hours in a month, used to project hourly totals to monthly.
const HOURS_PER_MONTH: f64 = 730.0;

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: PromData,
}

#[derive(Debug, Default, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromSeries>,
}

#[derive(Debug, Deserialize)]
struct PromSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    value: Option<(f64, String)>,
}

impl PromSeries {
    fn sample(&self) -> Option<Vector> {
        self.value
            .as_ref()
            .map(|(ts, v)| Vector::new(*ts, parse_or_zero(v)))
    }

    fn label(&self, name: &str) -> &str {
        self.metric.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Instant-query client for a Prometheus-compatible backend.
pub struct PrometheusSource {
    client: Client,
    base: Url,
    cluster_id: String,
}

impl PrometheusSource {
    pub fn new(endpoint: &str, cluster_id: impl Into<String>) -> Result<Self> {
        let mut base = Url::parse(endpoint)
            .with_context(|| format!("invalid metrics backend endpoint {endpoint:?}"))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        // the backend owns query latency, but a slow call must not block
        // the reconciler indefinitely
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("building metrics backend client")?;

        Ok(Self {
            client,
            base,
            cluster_id: cluster_id.into(),
        })
    }

    async fn query(&self, promql: &str) -> Result<Vec<PromSeries>> {
        let url = self.base.join("api/v1/query")?;
        let response: PromResponse = self
            .client
            .get(url)
            .query(&[("query", promql)])
            .send()
            .await
            .context("querying metrics backend")?
            .error_for_status()?
            .json()
            .await
            .context("decoding metrics backend response")?;

        if response.status != "success" {
            bail!("metrics backend returned status {:?}", response.status);
        }
        Ok(response.data.result)
    }

    /// Average of a series over the window, as an instant vector.
    async fn query_window(
        &self,
        metric: &str,
        window: Duration,
        offset: Option<Duration>,
        namespace: &str,
    ) -> Result<Vec<PromSeries>> {
        let selector = if namespace.is_empty() {
            metric.to_string()
        } else {
            format!("{metric}{{namespace=\"{namespace}\"}}")
        };
        let promql = format!(
            "avg_over_time({selector}[{}]{})",
            promql_duration(window),
            promql_offset(offset)
        );
        self.query(&promql).await
    }
}

fn promql_duration(window: Duration) -> String {
    format!("{}s", window.as_secs())
}

fn promql_offset(offset: Option<Duration>) -> String {
    match offset {
        Some(offset) => format!(" offset {}s", offset.as_secs()),
        None => String::new(),
    }
}

/// Strip the replica-set hash from an owner name to recover the
/// deployment name.
fn deployment_from_owner(owner: &str) -> Option<String> {
    owner.rsplit_once('-').map(|(name, _)| name.to_string())
}

/// Lookup tables needed to build a record from one allocation series.
struct RecordContext<'a> {
    cluster_id: &'a str,
    cpu_prices: &'a HashMap<String, String>,
    ram_prices: &'a HashMap<String, String>,
    gpu_prices: &'a HashMap<String, String>,
    cpu_capacity: &'a HashMap<String, String>,
    ram_capacity: &'a HashMap<String, String>,
    deployments: &'a HashMap<String, String>,
    pod_labels: &'a HashMap<String, HashMap<String, String>>,
}

/// Find or create the record an allocation series belongs to.
fn ensure_record<'a>(
    records: &'a mut HashMap<String, CostRecord>,
    series: &PromSeries,
    context: &RecordContext<'_>,
) -> &'a mut CostRecord {
    let namespace = series.label("namespace").to_string();
    let pod = series.label("pod").to_string();
    let container = series.label("container").to_string();
    let node = series.label("node").to_string();
    let key = format!("{namespace}/{pod}/{container}");

    records.entry(key).or_insert_with(|| {
        // a node without a known CPU price yields an incomplete record,
        // which price-bearing consumers skip
        let pricing = context.cpu_prices.get(&node).map(|cpu_cost| NodePricing {
            vcpu: context.cpu_capacity.get(&node).cloned().unwrap_or_default(),
            vcpu_cost: cpu_cost.clone(),
            ram_bytes: context.ram_capacity.get(&node).cloned().unwrap_or_default(),
            ram_cost: context.ram_prices.get(&node).cloned().unwrap_or_default(),
            gpu: String::new(),
            gpu_cost: context.gpu_prices.get(&node).cloned().unwrap_or_default(),
            spot: false,
        });
        CostRecord {
            cluster_id: context.cluster_id.to_string(),
            namespace: namespace.clone(),
            pod_name: pod.clone(),
            container_name: container,
            node_name: node,
            labels: context.pod_labels.get(&pod).cloned().unwrap_or_default(),
            deployments: context
                .deployments
                .get(&pod)
                .cloned()
                .into_iter()
                .collect(),
            node: pricing,
            ..Default::default()
        }
    })
}

#[async_trait]
impl CostDataSource for PrometheusSource {
    async fn cost_records(
        &self,
        window: Duration,
        offset: Option<Duration>,
        namespace: &str,
        cluster: &str,
    ) -> Result<HashMap<String, CostRecord>> {
        // single-cluster source: a filter for another cluster matches
        // nothing
        if !cluster.is_empty() && cluster != self.cluster_id {
            return Ok(HashMap::new());
        }

        let cpu = self
            .query_window("container_cpu_allocation", window, offset, namespace)
            .await?;
        let ram = self
            .query_window(
                "container_memory_allocation_bytes",
                window,
                offset,
                namespace,
            )
            .await?;
        let gpu = self
            .query_window("container_gpu_allocation", window, offset, namespace)
            .await?;
        let pvc = self
            .query_window("pod_pvc_allocation", window, offset, namespace)
            .await?;

        let cpu_prices = node_value_map(self.query("node_cpu_hourly_cost").await?);
        let ram_prices = node_value_map(self.query("node_ram_hourly_cost").await?);
        let gpu_prices = node_value_map(self.query("node_gpu_hourly_cost").await?);
        let cpu_capacity =
            node_value_map(self.query("kube_node_status_capacity_cpu_cores").await?);
        let ram_capacity =
            node_value_map(self.query("kube_node_status_capacity_memory_bytes").await?);
        let pv_prices = label_value_map(self.query("pv_hourly_cost").await?, "persistentvolume");

        let owners = self
            .query("kube_pod_owner{owner_kind=\"ReplicaSet\"}")
            .await?;
        let mut deployments: HashMap<String, String> = HashMap::new();
        for series in &owners {
            if let Some(deployment) = deployment_from_owner(series.label("owner_name")) {
                deployments.insert(series.label("pod").to_string(), deployment);
            }
        }

        let pod_labels_series = self.query("kube_pod_labels").await?;
        let mut pod_labels: HashMap<String, HashMap<String, String>> = HashMap::new();
        for series in &pod_labels_series {
            let labels = series
                .metric
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix("label_").map(|name| (name.to_string(), v.clone()))
                })
                .collect();
            pod_labels.insert(series.label("pod").to_string(), labels);
        }

        let context = RecordContext {
            cluster_id: &self.cluster_id,
            cpu_prices: &cpu_prices,
            ram_prices: &ram_prices,
            gpu_prices: &gpu_prices,
            cpu_capacity: &cpu_capacity,
            ram_capacity: &ram_capacity,
            deployments: &deployments,
            pod_labels: &pod_labels,
        };

        let mut records: HashMap<String, CostRecord> = HashMap::new();
        for series in &cpu {
            let record = ensure_record(&mut records, series, &context);
            if let Some(sample) = series.sample() {
                record.cpu_allocation.push(sample);
            }
        }
        for series in &ram {
            let record = ensure_record(&mut records, series, &context);
            if let Some(sample) = series.sample() {
                record.ram_allocation.push(sample);
            }
        }
        for series in &gpu {
            let record = ensure_record(&mut records, series, &context);
            if let Some(sample) = series.sample() {
                record.gpu_request.push(sample);
            }
        }

        // PVC series carry no container label; attach each claim to one
        // record of its pod so its cost is counted once
        for series in &pvc {
            let namespace = series.label("namespace");
            let pod = series.label("pod");
            let Some(sample) = series.sample() else { continue };

            let target = records
                .values_mut()
                .find(|r| r.namespace == namespace && r.pod_name == pod);
            let Some(record) = target else { continue };

            let volume_name = series.label("persistentvolume").to_string();
            record.pvc_data.push(PvcCost {
                claim: series.label("persistentvolumeclaim").to_string(),
                volume_name: volume_name.clone(),
                volume: Some(VolumeInfo {
                    name: volume_name.clone(),
                    cost: pv_prices.get(&volume_name).cloned().unwrap_or_default(),
                }),
                values: vec![sample],
            });
        }

        Ok(records)
    }

    async fn cluster_total_cost(
        &self,
        window: Duration,
        offset: Option<Duration>,
    ) -> Result<ClusterCosts> {
        let promql = format!(
            "sum(avg_over_time(node_total_hourly_cost[{}]{}))",
            promql_duration(window),
            promql_offset(offset)
        );
        let result = self.query(&promql).await?;

        let total = result
            .first()
            .and_then(|series| series.value.as_ref())
            .map(|(ts, value)| {
                let monthly = parse_or_zero(value) * HOURS_PER_MONTH;
                (*ts, monthly.to_string())
            })
            .into_iter()
            .collect();

        Ok(ClusterCosts { total })
    }

    async fn container_uptimes(&self) -> Result<HashMap<ContainerKey, f64>> {
        let result = self
            .query("time() - container_start_time_seconds{container!=\"\",container!=\"POD\"}")
            .await?;

        let mut uptimes = HashMap::new();
        for series in &result {
            let Some(sample) = series.sample() else { continue };
            uptimes.insert(
                ContainerKey {
                    namespace: series.label("namespace").to_string(),
                    pod_name: series.label("pod").to_string(),
                    container_name: series.label("container").to_string(),
                },
                sample.value,
            );
        }
        Ok(uptimes)
    }
}

#[async_trait]
impl ClusterInventory for PrometheusSource {
    async fn running_pods(&self) -> Result<HashSet<String>> {
        let result = self
            .query("kube_pod_status_phase{phase=\"Running\"} == 1")
            .await?;
        Ok(result
            .iter()
            .map(|series| series.label("pod").to_string())
            .collect())
    }

    async fn persistent_volumes(&self) -> Result<Vec<PersistentVolumeInfo>> {
        let result = self.query("kube_persistentvolume_info").await?;
        Ok(result
            .iter()
            .map(|series| {
                let storage_class = series.metric.get("storageclass").cloned();
                PersistentVolumeInfo {
                    name: series.label("persistentvolume").to_string(),
                    storage_class: storage_class.filter(|c| !c.is_empty()),
                    parameters: HashMap::new(),
                }
            })
            .collect())
    }
}

fn node_value_map(series: Vec<PromSeries>) -> HashMap<String, String> {
    label_value_map(series, "node")
}

fn label_value_map(series: Vec<PromSeries>, label: &str) -> HashMap<String, String> {
    series
        .into_iter()
        .filter_map(|s| {
            let key = s.label(label).to_string();
            s.value.map(|(_, value)| (key, value))
        })
        .collect()
}
