//! Cost model server library
//!
//! HTTP surface, configuration, pricing file loading, and the metrics
//! backend client used by the `costmodel-server` binary.

pub mod api;
pub mod config;
pub mod pricing;
pub mod prom;
