//! Datapath Configuration

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::control::DEFAULT_MISS_SEND_LEN;
use crate::flow_table::TableConfig;
use crate::port::PortSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Most flow tables a datapath may have (ids 0..=253)
pub const MAX_TABLES: usize = 254;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read or write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Datapath configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatapathConfig {
    /// Datapath id reported to the controller
    pub datapath_id: u64,
    /// One entry per flow table, in table id order
    pub tables: Vec<TableConfig>,
    pub max_groups: usize,
    pub max_buckets_per_group: usize,
    pub max_meters: usize,
    pub max_bands_per_meter: usize,
    /// Packet-in buffer slots (power of two)
    pub buffer_capacity: usize,
    /// Initial `miss_send_len`
    pub miss_send_len: u16,
    /// Bound of the controller event channel
    pub controller_queue_depth: usize,
    /// Flow-aging sweep period
    pub sweep_interval_ms: u64,
    /// Ports present at start-up
    pub ports: Vec<PortSpec>,
}

impl Default for DatapathConfig {
    fn default() -> Self {
        Self {
            datapath_id: 1,
            tables: (0..4).map(|i| TableConfig { name: format!("table-{}", i), ..Default::default() }).collect(),
            max_groups: 4096,
            max_buckets_per_group: 32,
            max_meters: 1024,
            max_bands_per_meter: 4,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            miss_send_len: DEFAULT_MISS_SEND_LEN,
            controller_queue_depth: 1024,
            sweep_interval_ms: 1000,
            ports: Vec::new(),
        }
    }
}

impl DatapathConfig {
    /// Config with `n` default tables
    pub fn with_tables(n: usize) -> Self {
        Self {
            tables: (0..n).map(|i| TableConfig { name: format!("table-{}", i), ..Default::default() }).collect(),
            ..Default::default()
        }
    }

    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tables.is_empty() || self.tables.len() > MAX_TABLES {
            return Err(ConfigError::Invalid(format!(
                "table count {} outside 1..={}",
                self.tables.len(),
                MAX_TABLES
            )));
        }
        if let Some(t) = self.tables.iter().find(|t| t.max_entries == 0) {
            return Err(ConfigError::Invalid(format!("table '{}' has no capacity", t.name)));
        }
        if !self.buffer_capacity.is_power_of_two() || self.buffer_capacity > 1 << 16 {
            return Err(ConfigError::Invalid(format!(
                "buffer capacity {} must be a power of two no larger than 65536",
                self.buffer_capacity
            )));
        }
        if self.max_buckets_per_group == 0 || self.max_bands_per_meter == 0 {
            return Err(ConfigError::Invalid("group buckets and meter bands must be non-zero".into()));
        }
        if self.controller_queue_depth == 0 {
            return Err(ConfigError::Invalid("controller queue depth must be non-zero".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep interval must be non-zero".into()));
        }
        let mut seen = HashSet::new();
        for p in &self.ports {
            if !seen.insert(p.port_no) {
                return Err(ConfigError::Invalid(format!("port {} listed twice", p.port_no)));
            }
        }
        Ok(())
    }
}
