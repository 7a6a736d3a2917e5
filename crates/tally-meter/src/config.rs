//! Meter configuration
//!
//! Layered: optional config file, then environment variables (a `.env` file
//! is loaded first when present). Environment keys are the upper-cased field
//! names, e.g. `PROM_URL`, `CONCURRENT_LIMIT`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tally_collect::kube::KubeConfig;
use tally_collect::traffic::DEFAULT_TRAFFIC_METRIC;
use tally_common::{PropertyDefinition, PropertyTable, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_RETENTION_DAYS};

/// Variable naming the config file
pub const CONFIG_FILE_VAR: &str = "TALLY_CONFIG";
/// Config file looked up when [`CONFIG_FILE_VAR`] is unset (any supported extension)
pub const DEFAULT_CONFIG_FILE: &str = "tally";

/// Meter service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Prometheus endpoint for object-storage figures
    pub prom_url: Option<String>,
    /// `instance` label of the object-storage deployment
    pub object_storage_instance: Option<String>,
    /// Tenants metered at once
    pub concurrent_limit: usize,
    /// Prometheus endpoint for per-entity traffic counters
    pub traffic_url: Option<String>,
    pub traffic_metric: String,
    pub redis_url: String,
    pub store_prefix: String,
    pub kube_api_url: String,
    pub kube_token_path: Option<PathBuf>,
    pub kube_ca_path: Option<PathBuf>,
    /// Namespace label marking billable tenants
    pub tenant_owner_label: String,
    /// Metering period in seconds
    pub tick_secs: u64,
    pub retention_days: u32,
    /// Billing units; entries override the built-in ones by name
    pub properties: Vec<PropertyDefinition>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        let kube = KubeConfig::default();
        Self {
            prom_url: None,
            object_storage_instance: None,
            concurrent_limit: DEFAULT_CONCURRENCY_LIMIT,
            traffic_url: None,
            traffic_metric: DEFAULT_TRAFFIC_METRIC.to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            store_prefix: "tally".to_string(),
            kube_api_url: kube.api_url,
            kube_token_path: kube.token_path,
            kube_ca_path: kube.ca_path,
            tenant_owner_label: kube.owner_label,
            tick_secs: 60,
            retention_days: DEFAULT_RETENTION_DAYS,
            properties: Vec::new(),
        }
    }
}

impl MeterConfig {
    /// Load from `.env`, the config file and the environment
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let file = std::env::var(CONFIG_FILE_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let cfg = Self::from_sources(
            config::File::with_name(&file).required(false),
            config::Environment::default().try_parsing(true),
        )?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from explicit sources; later sources win
    pub fn from_sources<F, E>(file: F, env: E) -> Result<Self>
    where
        F: config::Source + Send + Sync + 'static,
        E: config::Source + Send + Sync + 'static,
    {
        let cfg: MeterConfig = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(cfg.normalized())
    }

    /// Empty strings in the environment mean "unset"
    fn normalized(mut self) -> Self {
        fn blank_to_none<T: AsRef<std::ffi::OsStr>>(value: Option<T>) -> Option<T> {
            value.filter(|v| !v.as_ref().is_empty())
        }
        self.prom_url = blank_to_none(self.prom_url);
        self.object_storage_instance = blank_to_none(self.object_storage_instance);
        self.traffic_url = blank_to_none(self.traffic_url);
        self.kube_token_path = blank_to_none(self.kube_token_path);
        self.kube_ca_path = blank_to_none(self.kube_ca_path);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent_limit == 0 {
            bail!("CONCURRENT_LIMIT must be at least 1");
        }
        if self.tick_secs == 0 {
            bail!("TICK_SECS must be at least 1");
        }
        if self.object_storage_instance.is_some() && self.prom_url.is_none() {
            bail!("OBJECT_STORAGE_INSTANCE requires PROM_URL");
        }
        self.property_table()?;
        Ok(())
    }

    /// Object storage is metered only when both settings are present
    pub fn object_storage(&self) -> Option<(&str, &str)> {
        Some((self.prom_url.as_deref()?, self.object_storage_instance.as_deref()?))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn kube(&self) -> KubeConfig {
        KubeConfig {
            api_url: self.kube_api_url.clone(),
            token_path: self.kube_token_path.clone(),
            ca_path: self.kube_ca_path.clone(),
            owner_label: self.tenant_owner_label.clone(),
        }
    }

    /// Built-in billing units overlaid with the configured ones
    pub fn property_table(&self) -> Result<PropertyTable> {
        let mut by_name: BTreeMap<String, PropertyDefinition> = PropertyTable::default_definitions()
            .into_iter()
            .map(|def| (def.name.clone(), def))
            .collect();
        for def in &self.properties {
            by_name.insert(def.name.clone(), def.clone());
        }
        PropertyTable::new(by_name.into_values()).context("Invalid property definitions")
    }
}
