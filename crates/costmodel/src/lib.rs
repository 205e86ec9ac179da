//! Cost model engine for Kubernetes workloads
//!
//! This crate provides the core functionality for:
//! - Aligning and merging independently sampled allocation time series
//! - Converting allocation into cost with discounts and idle normalization
//! - Aggregating per-container cost records by caller-chosen groupings
//! - Caching aggregation results by query fingerprint
//! - Reconciling exported gauge series against the live entity population

pub mod aggregation;
pub mod cache;
pub mod costing;
pub mod error;
pub mod gauges;
pub mod models;
pub mod reconciler;
pub mod sources;
pub mod vector;

pub use aggregation::aggregate_cost_model;
pub use cache::{fingerprint, ResultCache};
pub use costing::{estimate_idle_coefficient, price_vectors, PriceVectors};
pub use error::CostModelError;
pub use gauges::CostGauges;
pub use models::*;
pub use reconciler::PriceRecorder;
pub use vector::Vector;
