//! Exported gauge set for cost and allocation series
//!
//! All gauges live on an explicitly constructed registry owned by the
//! process and passed in, never on an ambient global one. The reconciler
//! upserts and deletes labeled values on these; the HTTP surface encodes
//! the registry for exposition.

use prometheus::{Gauge, GaugeVec, Opts, Registry};

/// The full set of gauges the reconciler keeps in sync with the cluster.
#[derive(Clone)]
pub struct CostGauges {
    /// Hourly cost per CPU on a node. Labels: instance, node.
    pub cpu_price: GaugeVec,
    /// Hourly cost per GiB of RAM on a node. Labels: instance, node.
    pub ram_price: GaugeVec,
    /// Hourly cost per GPU on a node. Labels: instance, node.
    pub gpu_price: GaugeVec,
    /// Total hourly cost of a node. Labels: instance, node.
    pub node_total_price: GaugeVec,
    /// Hourly cost per GiB on a persistent disk. Labels: volumename,
    /// persistentvolume.
    pub pv_price: GaugeVec,
    /// Bytes of RAM allocated to a container. Labels: namespace, pod,
    /// container, instance, node.
    pub ram_allocation: GaugeVec,
    /// CPU cores allocated to a container. Same labels as RAM.
    pub cpu_allocation: GaugeVec,
    /// GPUs allocated to a container. Same labels as RAM.
    pub gpu_allocation: GaugeVec,
    /// Bytes used by a PVC attached to a pod. Labels: namespace, pod,
    /// persistentvolumeclaim, persistentvolume.
    pub pv_allocation: GaugeVec,
    /// Seconds a container has been running. Labels: namespace, pod,
    /// container.
    pub container_uptime: GaugeVec,
    pub network_zone_egress: Gauge,
    pub network_region_egress: Gauge,
    pub network_internet_egress: Gauge,
}

impl CostGauges {
    /// Construct every gauge and register it on the given registry.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            cpu_price: gauge_vec(
                registry,
                "node_cpu_hourly_cost",
                "Hourly cost for each cpu on this node",
                &["instance", "node"],
            )?,
            ram_price: gauge_vec(
                registry,
                "node_ram_hourly_cost",
                "Hourly cost for each gb of ram on this node",
                &["instance", "node"],
            )?,
            gpu_price: gauge_vec(
                registry,
                "node_gpu_hourly_cost",
                "Hourly cost for each gpu on this node",
                &["instance", "node"],
            )?,
            node_total_price: gauge_vec(
                registry,
                "node_total_hourly_cost",
                "Total node cost per hour",
                &["instance", "node"],
            )?,
            pv_price: gauge_vec(
                registry,
                "pv_hourly_cost",
                "Cost per GB per hour on a persistent disk",
                &["volumename", "persistentvolume"],
            )?,
            ram_allocation: gauge_vec(
                registry,
                "container_memory_allocation_bytes",
                "Bytes of RAM used",
                &["namespace", "pod", "container", "instance", "node"],
            )?,
            cpu_allocation: gauge_vec(
                registry,
                "container_cpu_allocation",
                "Percent of a single CPU used in a minute",
                &["namespace", "pod", "container", "instance", "node"],
            )?,
            gpu_allocation: gauge_vec(
                registry,
                "container_gpu_allocation",
                "GPU used",
                &["namespace", "pod", "container", "instance", "node"],
            )?,
            pv_allocation: gauge_vec(
                registry,
                "pod_pvc_allocation",
                "Bytes used by a PVC attached to a pod",
                &["namespace", "pod", "persistentvolumeclaim", "persistentvolume"],
            )?,
            container_uptime: gauge_vec(
                registry,
                "container_uptime_seconds",
                "Seconds a container has been running",
                &["namespace", "pod", "container"],
            )?,
            network_zone_egress: gauge(
                registry,
                "costmodel_network_zone_egress_cost",
                "Total cost per GB egress across zones",
            )?,
            network_region_egress: gauge(
                registry,
                "costmodel_network_region_egress_cost",
                "Total cost per GB egress across regions",
            )?,
            network_internet_egress: gauge(
                registry,
                "costmodel_network_internet_egress_cost",
                "Total cost per GB of internet egress",
            )?,
        })
    }
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<GaugeVec> {
    let gv = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gv.clone()))?;
    Ok(gv)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<Gauge> {
    let g = Gauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}
