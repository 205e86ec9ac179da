//! File-backed pricing provider
//!
//! Reads default unit prices, spot prices, network egress prices and the
//! discount from a JSON config file. A missing file falls back to the
//! built-in defaults so the server can start before pricing has been
//! configured.

use anyhow::{Context, Result};
use costmodel::costing::parse_or_zero;
use costmodel::models::{CustomPricing, NetworkPrices};
use costmodel::sources::{PersistentVolumeInfo, PricingProvider};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// On-disk pricing configuration, the shape the pricing UI writes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PricingConfig {
    pub custom_prices_enabled: bool,
    pub cpu: String,
    pub spot_cpu: String,
    pub ram: String,
    pub spot_ram: String,
    pub gpu: String,
    pub spot_gpu: String,
    pub storage: String,
    pub discount: String,
    pub zone_network_egress: String,
    pub region_network_egress: String,
    pub internet_network_egress: String,
    /// Hourly cost per GiB keyed by storage class name.
    pub storage_class_pricing: HashMap<String, String>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            custom_prices_enabled: false,
            cpu: "0.031611".to_string(),
            spot_cpu: "0.006655".to_string(),
            ram: "0.004237".to_string(),
            spot_ram: "0.000892".to_string(),
            gpu: "0.95".to_string(),
            spot_gpu: "0.308".to_string(),
            storage: "0.00005479452".to_string(),
            discount: "0%".to_string(),
            zone_network_egress: "0.01".to_string(),
            region_network_egress: "0.01".to_string(),
            internet_network_egress: "0.12".to_string(),
            storage_class_pricing: HashMap::new(),
        }
    }
}

/// Pricing provider backed by [`PricingConfig`].
pub struct FilePricingProvider {
    config: PricingConfig,
}

impl FilePricingProvider {
    /// Load the pricing file, falling back to defaults when it does not
    /// exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "pricing config not found, using default prices");
            return Ok(Self {
                config: PricingConfig::default(),
            });
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading pricing config {}", path.display()))?;
        let config: PricingConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing pricing config {}", path.display()))?;
        Ok(Self { config })
    }

    pub fn from_config(config: PricingConfig) -> Self {
        Self { config }
    }
}

impl PricingProvider for FilePricingProvider {
    fn custom_pricing(&self) -> Result<CustomPricing> {
        Ok(CustomPricing {
            cpu: self.config.cpu.clone(),
            ram: self.config.ram.clone(),
            gpu: self.config.gpu.clone(),
            spot_cpu: self.config.spot_cpu.clone(),
            spot_ram: self.config.spot_ram.clone(),
            spot_gpu: self.config.spot_gpu.clone(),
            storage: self.config.storage.clone(),
            discount: self.config.discount.clone(),
        })
    }

    fn custom_pricing_enabled(&self) -> bool {
        self.config.custom_prices_enabled
    }

    fn network_prices(&self) -> Result<NetworkPrices> {
        Ok(NetworkPrices {
            zone_egress: parse_or_zero(&self.config.zone_network_egress),
            region_egress: parse_or_zero(&self.config.region_network_egress),
            internet_egress: parse_or_zero(&self.config.internet_network_egress),
        })
    }

    fn volume_price(&self, volume: &PersistentVolumeInfo) -> Result<String> {
        if let Some(class) = &volume.storage_class {
            if let Some(price) = self.config.storage_class_pricing.get(class) {
                return Ok(price.clone());
            }
        }
        Ok(self.config.storage.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_default_prices() {
        let provider = FilePricingProvider::load("/nonexistent/pricing.json").unwrap();
        assert!(!provider.custom_pricing_enabled());

        let pricing = provider.custom_pricing().unwrap();
        assert_eq!(pricing.cpu, "0.031611");
        assert_eq!(pricing.discount_fraction().unwrap(), 0.0);
    }

    #[test]
    fn network_prices_parse_from_config() {
        let provider = FilePricingProvider::from_config(PricingConfig::default());
        let prices = provider.network_prices().unwrap();
        assert_eq!(prices.internet_egress, 0.12);
    }

    #[test]
    fn volume_price_prefers_the_storage_class_entry() {
        let mut config = PricingConfig::default();
        config
            .storage_class_pricing
            .insert("ssd".to_string(), "0.0001".to_string());
        let provider = FilePricingProvider::from_config(config);

        let ssd = PersistentVolumeInfo {
            name: "pv-1".to_string(),
            storage_class: Some("ssd".to_string()),
            parameters: HashMap::new(),
        };
        assert_eq!(provider.volume_price(&ssd).unwrap(), "0.0001");

        let unknown = PersistentVolumeInfo {
            name: "pv-2".to_string(),
            storage_class: Some("unknown".to_string()),
            parameters: HashMap::new(),
        };
        assert_eq!(provider.volume_price(&unknown).unwrap(), "0.00005479452");
    }
}
