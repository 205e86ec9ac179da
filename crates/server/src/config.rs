//! Server configuration

use anyhow::Result;
use serde::Deserialize;

/// Cost model server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// API server port for the cost endpoints and metrics exposition
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Prometheus-compatible metrics backend endpoint
    #[serde(default = "default_prometheus_endpoint")]
    pub prometheus_endpoint: String,

    /// Path to the pricing configuration file
    #[serde(default = "default_pricing_config_path")]
    pub pricing_config_path: String,

    /// Identifier reported for this cluster
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Aggregation result cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Price recording cycle interval in seconds
    #[serde(default = "default_record_interval")]
    pub record_interval_secs: u64,
}

fn default_api_port() -> u16 {
    9003
}

fn default_prometheus_endpoint() -> String {
    std::env::var("PROMETHEUS_SERVER_ENDPOINT")
        .unwrap_or_else(|_| "http://prometheus-server:9090".to_string())
}

fn default_pricing_config_path() -> String {
    "/var/configs/pricing.json".to_string()
}

fn default_cluster_id() -> String {
    std::env::var("CLUSTER_ID").unwrap_or_else(|_| "default-cluster".to_string())
}

fn default_cache_ttl() -> u64 {
    120
}

fn default_record_interval() -> u64 {
    60
}

impl ServerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("COST_MODEL"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| ServerConfig {
            api_port: default_api_port(),
            prometheus_endpoint: default_prometheus_endpoint(),
            pricing_config_path: default_pricing_config_path(),
            cluster_id: default_cluster_id(),
            cache_ttl_secs: default_cache_ttl(),
            record_interval_secs: default_record_interval(),
        }))
    }
}
