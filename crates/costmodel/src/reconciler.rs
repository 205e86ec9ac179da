//! Series reconciler
//!
//! A long-running cycle that samples current cost and allocation data,
//! updates the exported gauge series and removes series for entities that
//! were not observed this cycle. Each tracked entity (node, container,
//! persistent volume, volume claim) must be re-observed every cycle; one
//! missed cycle removes its series in that cycle's sweep, with no grace
//! period.

use crate::costing::{parse_or_zero, BYTES_PER_GIB};
use crate::gauges::CostGauges;
use crate::sources::{ClusterInventory, CostDataSource, PricingProvider};
use prometheus::GaugeVec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// How far back each cycle looks when sampling current allocation data.
const RECORD_WINDOW: Duration = Duration::from_secs(120);

/// Join identifying label values into one tracking key.
fn key_from_labels(labels: &[&str]) -> String {
    labels.join(",")
}

fn labels_from_key(key: &str) -> Vec<&str> {
    key.split(',').collect()
}

/// Reconciles the exported gauge series against the live entity
/// population.
///
/// The four seen-maps are private to this task; the reconciler is their
/// sole reader and writer, so no locking is involved.
pub struct PriceRecorder {
    source: Arc<dyn CostDataSource>,
    inventory: Arc<dyn ClusterInventory>,
    pricing: Arc<dyn PricingProvider>,
    gauges: CostGauges,
    cycle_interval: Duration,
    node_seen: HashMap<String, bool>,
    container_seen: HashMap<String, bool>,
    pv_seen: HashMap<String, bool>,
    pvc_seen: HashMap<String, bool>,
}

impl PriceRecorder {
    pub fn new(
        source: Arc<dyn CostDataSource>,
        inventory: Arc<dyn ClusterInventory>,
        pricing: Arc<dyn PricingProvider>,
        gauges: CostGauges,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            source,
            inventory,
            pricing,
            gauges,
            cycle_interval,
            node_seen: HashMap::new(),
            container_seen: HashMap::new(),
            pv_seen: HashMap::new(),
            pvc_seen: HashMap::new(),
        }
    }

    /// Run the reconciliation loop until a shutdown signal arrives.
    ///
    /// Cancellation is only observed between cycles: a cycle either
    /// completes its sweep fully or leaves the previous cycle's state
    /// untouched.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.cycle_interval.as_secs(),
            "starting price recording loop"
        );

        let mut ticker = interval(self.cycle_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("shutting down price recording loop");
                    break;
                }
            }
        }
    }

    /// One fetch-update-sweep cycle.
    ///
    /// Collaborator failures degrade the cycle to an empty data set rather
    /// than terminating the loop; the sweep still runs so state stays
    /// consistent.
    pub async fn run_cycle(&mut self) {
        debug!("recording prices");

        // global egress gauges are refreshed every pass; they are
        // singletons and need no stale-removal
        match self.pricing.network_prices() {
            Ok(prices) => {
                self.gauges.network_zone_egress.set(prices.zone_egress);
                self.gauges.network_region_egress.set(prices.region_egress);
                self.gauges
                    .network_internet_egress
                    .set(prices.internet_egress);
            }
            Err(e) => debug!(error = %e, "failed to retrieve network costs"),
        }

        let running_pods = match self.inventory.running_pods().await {
            Ok(pods) => pods,
            Err(e) => {
                debug!(error = %e, "failed to list running pods");
                HashSet::new()
            }
        };

        let records = match self.source.cost_records(RECORD_WINDOW, None, "", "").await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "error fetching cost records, recording an empty cycle");
                HashMap::new()
            }
        };

        for record in records.values() {
            let Some(node) = &record.node else {
                debug!(
                    node = %record.node_name,
                    "skipping node with missing pricing data"
                );
                continue;
            };

            let cpu_cost = parse_or_zero(&node.vcpu_cost);
            let cpu = parse_or_zero(&node.vcpu);
            let ram_cost = parse_or_zero(&node.ram_cost);
            let ram = parse_or_zero(&node.ram_bytes);
            let gpu = parse_or_zero(&node.gpu);
            let gpu_cost = parse_or_zero(&node.gpu_cost);
            let node_total = cpu * cpu_cost + ram_cost * (ram / BYTES_PER_GIB) + gpu * gpu_cost;

            let node_name = record.node_name.as_str();
            self.gauges
                .cpu_price
                .with_label_values(&[node_name, node_name])
                .set(cpu_cost);
            self.gauges
                .ram_price
                .with_label_values(&[node_name, node_name])
                .set(ram_cost);
            self.gauges
                .gpu_price
                .with_label_values(&[node_name, node_name])
                .set(gpu_cost);
            self.gauges
                .node_total_price
                .with_label_values(&[node_name, node_name])
                .set(node_total);
            self.node_seen
                .insert(key_from_labels(&[node_name, node_name]), true);

            for pvc in &record.pvc_data {
                if pvc.volume.is_none() {
                    continue;
                }
                let Some(first) = pvc.values.first() else { continue };
                let labels = [
                    record.namespace.as_str(),
                    record.pod_name.as_str(),
                    pvc.claim.as_str(),
                    pvc.volume_name.as_str(),
                ];
                self.gauges
                    .pv_allocation
                    .with_label_values(&labels)
                    .set(first.value);
                self.pvc_seen.insert(key_from_labels(&labels), true);
            }

            let container_labels = [
                record.namespace.as_str(),
                record.pod_name.as_str(),
                record.container_name.as_str(),
                node_name,
                node_name,
            ];
            if let Some(first) = record.ram_allocation.first() {
                self.gauges
                    .ram_allocation
                    .with_label_values(&container_labels)
                    .set(first.value);
            }
            if let Some(first) = record.cpu_allocation.first() {
                self.gauges
                    .cpu_allocation
                    .with_label_values(&container_labels)
                    .set(first.value);
            }
            if let Some(first) = record.gpu_request.first() {
                // allocation is the request; shared GPU usage is not
                // reported per-container
                self.gauges
                    .gpu_allocation
                    .with_label_values(&container_labels)
                    .set(first.value);
            }
            // only containers of currently running pods keep their series
            self.container_seen.insert(
                key_from_labels(&container_labels),
                running_pods.contains(&record.pod_name),
            );
        }

        match self.inventory.persistent_volumes().await {
            Ok(volumes) => {
                for pv in volumes {
                    let price = match self.pricing.volume_price(&pv) {
                        Ok(price) => parse_or_zero(&price),
                        Err(e) => {
                            debug!(
                                volume = %pv.name,
                                storage_class = ?pv.storage_class,
                                error = %e,
                                "unable to resolve storage class pricing"
                            );
                            0.0
                        }
                    };
                    self.gauges
                        .pv_price
                        .with_label_values(&[&pv.name, &pv.name])
                        .set(price);
                    self.pv_seen
                        .insert(key_from_labels(&[&pv.name, &pv.name]), true);
                }
            }
            Err(e) => debug!(error = %e, "failed to list persistent volumes"),
        }

        // uptime is re-derived fully each cycle and carries no
        // stale-removal requirement
        match self.source.container_uptimes().await {
            Ok(uptimes) => {
                for (key, uptime) in uptimes {
                    self.gauges
                        .container_uptime
                        .with_label_values(&[
                            &key.namespace,
                            &key.pod_name,
                            &key.container_name,
                        ])
                        .set(uptime);
                }
            }
            Err(e) => debug!(error = %e, "failed to compute container uptimes"),
        }

        self.sweep();
    }

    /// Delete series whose entity went unobserved this cycle and arm the
    /// rest for the next one.
    fn sweep(&mut self) {
        sweep_map(
            &mut self.node_seen,
            &[
                &self.gauges.node_total_price,
                &self.gauges.cpu_price,
                &self.gauges.gpu_price,
                &self.gauges.ram_price,
            ],
        );
        sweep_map(
            &mut self.container_seen,
            &[
                &self.gauges.ram_allocation,
                &self.gauges.cpu_allocation,
                &self.gauges.gpu_allocation,
            ],
        );
        sweep_map(&mut self.pv_seen, &[&self.gauges.pv_price]);
        sweep_map(&mut self.pvc_seen, &[&self.gauges.pv_allocation]);
    }
}

fn sweep_map(seen: &mut HashMap<String, bool>, gauges: &[&GaugeVec]) {
    seen.retain(|key, observed| {
        if *observed {
            *observed = false;
            return true;
        }
        let labels = labels_from_key(key);
        for gauge in gauges {
            // the series may never have been written for this gauge
            let _ = gauge.remove_label_values(&labels);
        }
        false
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CostRecord, CustomPricing, NetworkPrices, NodePricing, PvcCost, VolumeInfo,
    };
    use crate::sources::{ClusterCosts, ContainerKey, PersistentVolumeInfo};
    use crate::vector::Vector;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use prometheus::Registry;
    use std::sync::Mutex;

    /// Source whose cycles replay a scripted sequence of record maps.
    struct ScriptedSource {
        cycles: Mutex<Vec<Result<HashMap<String, CostRecord>>>>,
        pods: HashSet<String>,
        volumes: Vec<PersistentVolumeInfo>,
    }

    impl ScriptedSource {
        fn new(cycles: Vec<Result<HashMap<String, CostRecord>>>) -> Self {
            Self {
                cycles: Mutex::new(cycles),
                pods: HashSet::new(),
                volumes: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl CostDataSource for ScriptedSource {
        async fn cost_records(
            &self,
            _window: Duration,
            _offset: Option<Duration>,
            _namespace: &str,
            _cluster: &str,
        ) -> Result<HashMap<String, CostRecord>> {
            let mut cycles = self.cycles.lock().unwrap();
            if cycles.is_empty() {
                Ok(HashMap::new())
            } else {
                cycles.remove(0)
            }
        }

        async fn cluster_total_cost(
            &self,
            _window: Duration,
            _offset: Option<Duration>,
        ) -> Result<ClusterCosts> {
            Ok(ClusterCosts::default())
        }

        async fn container_uptimes(&self) -> Result<HashMap<ContainerKey, f64>> {
            Ok(HashMap::new())
        }
    }

    #[async_trait]
    impl ClusterInventory for ScriptedSource {
        async fn running_pods(&self) -> Result<HashSet<String>> {
            Ok(self.pods.clone())
        }

        async fn persistent_volumes(&self) -> Result<Vec<PersistentVolumeInfo>> {
            Ok(self.volumes.clone())
        }
    }

    struct StaticPricing;

    impl PricingProvider for StaticPricing {
        fn custom_pricing(&self) -> Result<CustomPricing> {
            Ok(CustomPricing::default())
        }

        fn custom_pricing_enabled(&self) -> bool {
            false
        }

        fn network_prices(&self) -> Result<NetworkPrices> {
            Ok(NetworkPrices {
                zone_egress: 0.01,
                region_egress: 0.01,
                internet_egress: 0.12,
            })
        }

        fn volume_price(&self, _volume: &PersistentVolumeInfo) -> Result<String> {
            Ok("0.00005".to_string())
        }
    }

    fn sample_record() -> CostRecord {
        CostRecord {
            cluster_id: "cluster-one".to_string(),
            namespace: "default".to_string(),
            pod_name: "web-0".to_string(),
            container_name: "web".to_string(),
            node_name: "node-a".to_string(),
            node: Some(NodePricing {
                vcpu: "4".to_string(),
                vcpu_cost: "0.031611".to_string(),
                ram_bytes: (16.0 * BYTES_PER_GIB).to_string(),
                ram_cost: "0.004237".to_string(),
                gpu: "0".to_string(),
                gpu_cost: "0".to_string(),
                spot: false,
            }),
            cpu_allocation: vec![Vector::new(100.0, 0.5)],
            ram_allocation: vec![Vector::new(100.0, 256.0 * 1024.0 * 1024.0)],
            pvc_data: vec![PvcCost {
                claim: "data".to_string(),
                volume_name: "pv-1".to_string(),
                volume: Some(VolumeInfo {
                    name: "pv-1".to_string(),
                    cost: "0.00005".to_string(),
                }),
                values: vec![Vector::new(100.0, BYTES_PER_GIB)],
            }],
            ..Default::default()
        }
    }

    fn series_count(registry: &Registry, family: &str) -> usize {
        registry
            .gather()
            .iter()
            .find(|f| f.get_name() == family)
            .map(|f| f.get_metric().len())
            .unwrap_or(0)
    }

    fn recorder_with(
        source: ScriptedSource,
        registry: &Registry,
    ) -> PriceRecorder {
        let gauges = CostGauges::register(registry).unwrap();
        let source = Arc::new(source);
        PriceRecorder::new(
            source.clone(),
            source,
            Arc::new(StaticPricing),
            gauges,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn series_appear_while_entities_are_observed() {
        let mut records = HashMap::new();
        records.insert("default/web-0/web".to_string(), sample_record());

        let mut source = ScriptedSource::new(vec![Ok(records)]);
        source.pods.insert("web-0".to_string());
        source.volumes.push(PersistentVolumeInfo {
            name: "pv-1".to_string(),
            storage_class: Some("standard".to_string()),
            parameters: HashMap::new(),
        });

        let registry = Registry::new();
        let mut recorder = recorder_with(source, &registry);
        recorder.run_cycle().await;

        assert_eq!(series_count(&registry, "node_cpu_hourly_cost"), 1);
        assert_eq!(series_count(&registry, "node_total_hourly_cost"), 1);
        assert_eq!(series_count(&registry, "container_cpu_allocation"), 1);
        assert_eq!(series_count(&registry, "container_memory_allocation_bytes"), 1);
        assert_eq!(series_count(&registry, "pod_pvc_allocation"), 1);
        assert_eq!(series_count(&registry, "pv_hourly_cost"), 1);
        assert_eq!(series_count(&registry, "costmodel_network_zone_egress_cost"), 1);
    }

    #[tokio::test]
    async fn absent_entities_are_evicted_after_exactly_one_cycle() {
        let mut records = HashMap::new();
        records.insert("default/web-0/web".to_string(), sample_record());

        // cycle 1 observes the entities, cycle 2 does not
        let mut source = ScriptedSource::new(vec![Ok(records), Ok(HashMap::new())]);
        source.pods.insert("web-0".to_string());

        let registry = Registry::new();
        let mut recorder = recorder_with(source, &registry);

        recorder.run_cycle().await;
        assert_eq!(series_count(&registry, "node_cpu_hourly_cost"), 1);
        assert_eq!(series_count(&registry, "container_cpu_allocation"), 1);
        assert_eq!(series_count(&registry, "pod_pvc_allocation"), 1);

        recorder.run_cycle().await;
        assert_eq!(series_count(&registry, "node_cpu_hourly_cost"), 0);
        assert_eq!(series_count(&registry, "node_total_hourly_cost"), 0);
        assert_eq!(series_count(&registry, "container_cpu_allocation"), 0);
        assert_eq!(series_count(&registry, "container_memory_allocation_bytes"), 0);
        assert_eq!(series_count(&registry, "pod_pvc_allocation"), 0);

        assert!(recorder.node_seen.is_empty());
        assert!(recorder.container_seen.is_empty());
        assert!(recorder.pvc_seen.is_empty());
    }

    #[tokio::test]
    async fn containers_of_non_running_pods_are_swept_immediately() {
        let mut records = HashMap::new();
        records.insert("default/web-0/web".to_string(), sample_record());

        // pod list does not contain web-0, so its container series must
        // not survive the sweep
        let source = ScriptedSource::new(vec![Ok(records)]);

        let registry = Registry::new();
        let mut recorder = recorder_with(source, &registry);
        recorder.run_cycle().await;

        assert_eq!(series_count(&registry, "container_cpu_allocation"), 0);
        // node series are independent of pod phase
        assert_eq!(series_count(&registry, "node_cpu_hourly_cost"), 1);
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_an_empty_cycle() {
        let mut records = HashMap::new();
        records.insert("default/web-0/web".to_string(), sample_record());

        let mut source = ScriptedSource::new(vec![
            Ok(records),
            Err(anyhow!("metrics backend unreachable")),
        ]);
        source.pods.insert("web-0".to_string());

        let registry = Registry::new();
        let mut recorder = recorder_with(source, &registry);

        recorder.run_cycle().await;
        assert_eq!(series_count(&registry, "node_cpu_hourly_cost"), 1);

        // the failed cycle behaves like an empty one: the sweep still runs
        recorder.run_cycle().await;
        assert_eq!(series_count(&registry, "node_cpu_hourly_cost"), 0);
    }

    #[tokio::test]
    async fn records_without_node_pricing_are_skipped_not_fatal() {
        let mut record = sample_record();
        record.node = None;
        let mut records = HashMap::new();
        records.insert("default/web-0/web".to_string(), record);

        let source = ScriptedSource::new(vec![Ok(records)]);
        let registry = Registry::new();
        let mut recorder = recorder_with(source, &registry);
        recorder.run_cycle().await;

        assert_eq!(series_count(&registry, "node_cpu_hourly_cost"), 0);
        assert_eq!(series_count(&registry, "container_cpu_allocation"), 0);
    }

    #[test]
    fn tracking_keys_round_trip_through_join_and_split() {
        let labels = ["default", "web-0", "web", "node-a", "node-a"];
        let key = key_from_labels(&labels);
        assert_eq!(labels_from_key(&key), labels);
    }
}
