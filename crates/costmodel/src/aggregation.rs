//! Aggregation engine
//!
//! Reduces per-container cost records into caller-chosen groupings
//! (cluster, namespace, service, deployment, label), merging cost series
//! per group and apportioning the shared-resource pool evenly across
//! groups.

use crate::costing::price_vectors;
use crate::models::{Aggregation, CostRecord, CustomPricing, SharedResourceInfo};
use crate::vector::{merge, total};
use std::collections::HashMap;

/// Group cost records by `field` (with an optional `subfield`, e.g. the
/// label key for `field = "label"`).
///
/// Records matching the shared predicate are redirected into a pool that is
/// split flat across the resulting groups. Records that cannot resolve a
/// group key under the requested field (no owning service or deployment,
/// missing label, unknown field name) are silently dropped. When
/// `keep_time_series` is false the per-category cost series are cleared
/// from the output, leaving only scalar totals.
#[allow(clippy::too_many_arguments)]
pub fn aggregate_cost_model(
    records: &HashMap<String, CostRecord>,
    field: &str,
    subfield: &str,
    keep_time_series: bool,
    discount: f64,
    idle_coefficient: f64,
    shared: Option<&SharedResourceInfo>,
    custom: Option<&CustomPricing>,
) -> HashMap<String, Aggregation> {
    let mut aggregations: HashMap<String, Aggregation> = HashMap::new();

    // running total of cost that is reported as shared across all groups
    // rather than as a stand-alone group
    let mut shared_pool = 0.0;

    for record in records.values() {
        if let Some(shared) = shared {
            if shared.is_shared(record) {
                shared_pool += price_vectors(record, custom, discount, idle_coefficient).total();
                continue;
            }
        }

        let key = match field {
            "cluster" => Some(record.cluster_id.clone()),
            "namespace" => Some(record.namespace.clone()),
            "service" => record.services.first().cloned(),
            "deployment" => record.deployments.first().cloned(),
            "label" => record.labels.get(subfield).cloned(),
            _ => None,
        };
        let Some(key) = key else { continue };

        let aggregation = aggregations.entry(key.clone()).or_insert_with(|| Aggregation {
            aggregator: field.to_string(),
            aggregator_subfield: subfield.to_string(),
            environment: key,
            cluster: record.cluster_id.clone(),
            ..Default::default()
        });
        merge_record(aggregation, record, custom, discount, idle_coefficient);
    }

    let group_count = aggregations.len() as f64;
    for aggregation in aggregations.values_mut() {
        aggregation.cpu_cost = total(&aggregation.cpu_cost_vector);
        aggregation.ram_cost = total(&aggregation.ram_cost_vector);
        aggregation.gpu_cost = total(&aggregation.gpu_cost_vector);
        aggregation.pv_cost = total(&aggregation.pv_cost_vector);
        aggregation.shared_cost = shared_pool / group_count;
        aggregation.total_cost = aggregation.cpu_cost
            + aggregation.ram_cost
            + aggregation.gpu_cost
            + aggregation.pv_cost
            + aggregation.shared_cost;

        if !keep_time_series {
            aggregation.cpu_cost_vector.clear();
            aggregation.ram_cost_vector.clear();
            aggregation.gpu_cost_vector.clear();
            aggregation.pv_cost_vector.clear();
        }
    }

    aggregations
}

/// Fold one record's allocation and cost series into a group.
fn merge_record(
    aggregation: &mut Aggregation,
    record: &CostRecord,
    custom: Option<&CustomPricing>,
    discount: f64,
    idle_coefficient: f64,
) {
    aggregation.cpu_allocation = merge(&record.cpu_allocation, &aggregation.cpu_allocation);
    aggregation.ram_allocation = merge(&record.ram_allocation, &aggregation.ram_allocation);
    aggregation.gpu_allocation = merge(&record.gpu_request, &aggregation.gpu_allocation);

    let prices = price_vectors(record, custom, discount, idle_coefficient);
    aggregation.cpu_cost_vector = merge(&prices.cpu, &aggregation.cpu_cost_vector);
    aggregation.ram_cost_vector = merge(&prices.ram, &aggregation.ram_cost_vector);
    aggregation.gpu_cost_vector = merge(&prices.gpu, &aggregation.gpu_cost_vector);
    for volume_series in &prices.pv {
        aggregation.pv_cost_vector = merge(&aggregation.pv_cost_vector, volume_series);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodePricing;
    use crate::vector::Vector;

    fn record(namespace: &str, cpu_allocation: f64) -> CostRecord {
        CostRecord {
            cluster_id: "cluster-one".to_string(),
            namespace: namespace.to_string(),
            node: Some(NodePricing {
                vcpu_cost: "1.0".to_string(),
                ..Default::default()
            }),
            cpu_allocation: vec![Vector::new(100.0, cpu_allocation)],
            ..Default::default()
        }
    }

    fn records(entries: Vec<(&str, CostRecord)>) -> HashMap<String, CostRecord> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn groups_by_namespace_and_conserves_cost() {
        let input = records(vec![
            ("a", record("default", 1.0)),
            ("b", record("default", 2.0)),
            ("c", record("payments", 4.0)),
        ]);

        let result =
            aggregate_cost_model(&input, "namespace", "", false, 0.0, 1.0, None, None);

        assert_eq!(result.len(), 2);
        assert!((result["default"].total_cost - 3.0).abs() < 1e-9);
        assert!((result["payments"].total_cost - 4.0).abs() < 1e-9);

        let per_record_total = 1.0 + 2.0 + 4.0;
        let group_total: f64 = result.values().map(|a| a.total_cost).sum();
        assert!((group_total - per_record_total).abs() < 1e-9);
    }

    #[test]
    fn groups_by_cluster() {
        let input = records(vec![("a", record("default", 1.0))]);
        let result = aggregate_cost_model(&input, "cluster", "", false, 0.0, 1.0, None, None);

        assert_eq!(result.len(), 1);
        let aggregation = &result["cluster-one"];
        assert_eq!(aggregation.aggregator, "cluster");
        assert_eq!(aggregation.environment, "cluster-one");
        assert_eq!(aggregation.cluster, "cluster-one");
    }

    #[test]
    fn service_grouping_skips_records_without_services() {
        let mut with_service = record("default", 1.0);
        with_service.services = vec!["api".to_string(), "api-canary".to_string()];
        let without_service = record("default", 2.0);

        let input = records(vec![("a", with_service), ("b", without_service)]);
        let result = aggregate_cost_model(&input, "service", "", false, 0.0, 1.0, None, None);

        // only the first owning service is used
        assert_eq!(result.len(), 1);
        assert!((result["api"].total_cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn deployment_grouping_skips_records_without_deployments() {
        let mut with_deployment = record("default", 3.0);
        with_deployment.deployments = vec!["web".to_string()];
        let without_deployment = record("default", 2.0);

        let input = records(vec![("a", with_deployment), ("b", without_deployment)]);
        let result =
            aggregate_cost_model(&input, "deployment", "", false, 0.0, 1.0, None, None);

        assert_eq!(result.len(), 1);
        assert!((result["web"].total_cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn label_grouping_uses_the_subfield_value() {
        let mut labeled = record("default", 1.0);
        labeled.labels.insert("app".to_string(), "web".to_string());
        let unlabeled = record("default", 2.0);

        let input = records(vec![("a", labeled), ("b", unlabeled)]);
        let result = aggregate_cost_model(&input, "label", "app", false, 0.0, 1.0, None, None);

        assert_eq!(result.len(), 1);
        assert!((result["web"].total_cost - 1.0).abs() < 1e-9);
        assert_eq!(result["web"].aggregator_subfield, "app");
    }

    #[test]
    fn unknown_field_drops_every_record() {
        let input = records(vec![("a", record("default", 1.0))]);
        let result = aggregate_cost_model(&input, "node", "", false, 0.0, 1.0, None, None);
        assert!(result.is_empty());
    }

    #[test]
    fn shared_pool_splits_evenly_across_groups() {
        let shared_info = SharedResourceInfo::new(&[], &[], &[]).unwrap();

        let input = records(vec![
            ("a", record("default", 1.0)),
            ("b", record("payments", 2.0)),
            ("c", record("search", 3.0)),
            // lands in the shared pool, not in its own group
            ("d", record("kube-system", 30.0)),
        ]);

        let result = aggregate_cost_model(
            &input,
            "namespace",
            "",
            false,
            0.0,
            1.0,
            Some(&shared_info),
            None,
        );

        assert_eq!(result.len(), 3);
        for aggregation in result.values() {
            assert!((aggregation.shared_cost - 10.0).abs() < 1e-9);
        }
        assert!((result["default"].total_cost - 11.0).abs() < 1e-9);
    }

    #[test]
    fn shared_pool_with_zero_groups_is_dropped() {
        let shared_info = SharedResourceInfo::new(&[], &[], &[]).unwrap();

        // every record is shared, so no groups exist to absorb the pool
        let input = records(vec![("a", record("kube-system", 5.0))]);
        let result = aggregate_cost_model(
            &input,
            "namespace",
            "",
            false,
            0.0,
            1.0,
            Some(&shared_info),
            None,
        );

        assert!(result.is_empty());
    }

    #[test]
    fn time_series_output_is_opt_in() {
        let input = records(vec![("a", record("default", 1.0))]);

        let trimmed =
            aggregate_cost_model(&input, "namespace", "", false, 0.0, 1.0, None, None);
        assert!(trimmed["default"].cpu_cost_vector.is_empty());
        assert!((trimmed["default"].cpu_cost - 1.0).abs() < 1e-9);

        let with_series =
            aggregate_cost_model(&input, "namespace", "", true, 0.0, 1.0, None, None);
        assert_eq!(with_series["default"].cpu_cost_vector.len(), 1);
        assert!((with_series["default"].cpu_cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn record_without_node_pricing_adds_no_cost_points() {
        let mut unpriced = record("default", 1.0);
        unpriced.node = None;

        let input = records(vec![("a", unpriced)]);
        let result = aggregate_cost_model(&input, "namespace", "", true, 0.0, 1.0, None, None);

        // the group exists and carries the allocation, but no cost series
        let aggregation = &result["default"];
        assert_eq!(aggregation.cpu_allocation.len(), 1);
        assert!(aggregation.cpu_cost_vector.is_empty());
        assert!(aggregation.ram_cost_vector.is_empty());
        assert_eq!(aggregation.total_cost, 0.0);
    }

    #[test]
    fn merges_series_across_records_in_a_group() {
        let mut early = record("default", 1.0);
        early.cpu_allocation = vec![Vector::new(101.0, 1.0)];
        let mut late = record("default", 1.0);
        late.cpu_allocation = vec![Vector::new(99.0, 0.5)];

        let input = records(vec![("a", early), ("b", late)]);
        let result = aggregate_cost_model(&input, "namespace", "", true, 0.0, 1.0, None, None);

        let aggregation = &result["default"];
        assert_eq!(aggregation.cpu_cost_vector, vec![Vector::new(100.0, 1.5)]);
        assert_eq!(aggregation.cpu_allocation, vec![Vector::new(100.0, 1.5)]);
    }

    #[test]
    fn discount_and_idle_coefficient_flow_through() {
        let input = records(vec![("a", record("default", 2.0))]);
        let result =
            aggregate_cost_model(&input, "namespace", "", false, 0.1, 0.9, None, None);

        // 2.0 * 1.0 * (1 - 0.1) / 0.9
        assert!((result["default"].total_cost - 2.0).abs() < 1e-9);
    }
}
