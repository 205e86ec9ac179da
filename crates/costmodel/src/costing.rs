//! Cost conversion
//!
//! Turns a record's allocation series into cost series by applying unit
//! prices, the fleet discount and the idle coefficient, and estimates the
//! idle coefficient itself from cluster totals.

use crate::models::{CostRecord, CustomPricing};
use crate::sources::CostDataSource;
use crate::vector::{snap, total, Vector};
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Bytes per GiB, for converting byte-denominated allocation to the
/// GiB-hour unit prices are quoted in.
pub(crate) const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Average hours in a month, used to normalize monthly cluster totals to a
/// window.
const HOURS_PER_MONTH: f64 = 730.0;

/// Parse a provider-supplied numeric string, treating failures as zero.
///
/// Cost accounting favors partial results over total failure: a record with
/// an unparsable price contributes nothing to that category.
pub fn parse_or_zero(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

/// Cost series for one record, one per resource category.
#[derive(Debug, Clone, Default)]
pub struct PriceVectors {
    pub cpu: Vec<Vector>,
    pub ram: Vec<Vector>,
    pub gpu: Vec<Vector>,
    /// One series per priced volume claim.
    pub pv: Vec<Vec<Vector>>,
}

impl PriceVectors {
    /// Scalar cost across every category.
    pub fn total(&self) -> f64 {
        total(&self.cpu)
            + total(&self.ram)
            + total(&self.gpu)
            + self.pv.iter().map(|series| total(series)).sum::<f64>()
    }
}

/// Convert a record's allocation series into cost series.
///
/// Unit prices come from the record's node pricing unless a custom price
/// set is supplied, in which case the spot or on-demand override is chosen
/// by the node's spot flag. `idle_coefficient` must be positive; 1.0 means
/// no idle adjustment. A record with no node pricing and no override
/// produces empty series.
pub fn price_vectors(
    record: &CostRecord,
    custom: Option<&CustomPricing>,
    discount: f64,
    idle_coefficient: f64,
) -> PriceVectors {
    // an incomplete record stays in the input set but contributes no cost
    // points at all, not zero-valued ones
    if record.node.is_none() && custom.is_none() {
        return PriceVectors::default();
    }

    let (mut cpu_price_str, mut ram_price_str, mut gpu_price_str) = match &record.node {
        Some(node) => (
            node.vcpu_cost.as_str(),
            node.ram_cost.as_str(),
            node.gpu_cost.as_str(),
        ),
        None => ("", "", ""),
    };

    let mut storage_override = None;
    if let Some(custom) = custom {
        let spot = record.node.as_ref().map(|n| n.spot).unwrap_or(false);
        if spot {
            cpu_price_str = &custom.spot_cpu;
            ram_price_str = &custom.spot_ram;
            gpu_price_str = &custom.spot_gpu;
        } else {
            cpu_price_str = &custom.cpu;
            ram_price_str = &custom.ram;
            gpu_price_str = &custom.gpu;
        }
        storage_override = Some(parse_or_zero(&custom.storage));
    }

    let cpu_price = parse_or_zero(cpu_price_str);
    let ram_price = parse_or_zero(ram_price_str);
    let gpu_price = parse_or_zero(gpu_price_str);

    let scale = (1.0 - discount) / idle_coefficient;
    let cost_series = |allocation: &[Vector], unit_conversion: f64, price: f64| {
        allocation
            .iter()
            .map(|v| Vector::new(snap(v.timestamp), v.value * unit_conversion * price * scale))
            .collect::<Vec<Vector>>()
    };

    let cpu = cost_series(&record.cpu_allocation, 1.0, cpu_price);
    let ram = cost_series(&record.ram_allocation, 1.0 / BYTES_PER_GIB, ram_price);
    let gpu = cost_series(&record.gpu_request, 1.0, gpu_price);

    let mut pv = Vec::with_capacity(record.pvc_data.len());
    for pvc in &record.pvc_data {
        // unbound claims carry no price and contribute nothing
        let Some(volume) = &pvc.volume else { continue };
        let price = storage_override.unwrap_or_else(|| parse_or_zero(&volume.cost));
        pv.push(cost_series(&pvc.values, 1.0 / BYTES_PER_GIB, price));
    }

    PriceVectors { cpu, ram, gpu, pv }
}

/// Estimate the ratio of billed container cost to total cluster cost over
/// a window.
///
/// Returns 0.0 (without error) when the cluster total is absent or zero;
/// callers fall back to a coefficient of 1.0. The billed side is computed
/// with the coefficient fixed at 1.0, making this the first pass of the
/// two-pass idle-allocation computation.
pub async fn estimate_idle_coefficient(
    source: &dyn CostDataSource,
    records: &HashMap<String, CostRecord>,
    custom: Option<&CustomPricing>,
    window: Duration,
    offset: Option<Duration>,
    discount: f64,
) -> Result<f64> {
    let totals = source.cluster_total_cost(window, offset).await?;
    let monthly_total = totals
        .total
        .first()
        .map(|(_, value)| parse_or_zero(value))
        .unwrap_or(0.0);
    if monthly_total == 0.0 {
        debug!("cluster total cost unavailable, cannot estimate idle coefficient");
        return Ok(0.0);
    }

    let window_hours = window.as_secs_f64() / 3600.0;
    let cluster_cost_over_window =
        (monthly_total / HOURS_PER_MONTH) * window_hours * (1.0 - discount);

    let mut billed_container_cost = 0.0;
    for record in records.values() {
        billed_container_cost += price_vectors(record, custom, discount, 1.0).total();
    }

    Ok(billed_container_cost / cluster_cost_over_window)
}
