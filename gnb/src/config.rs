//! YAML Configuration Structures for the MAC uplink application
//!
//! Every field has a default so that a partial file, or no file at all,
//! yields a usable configuration.

use anyhow::Context;
use common::types::DuCellIndex;
use layers::mac::{DlBufferPoolConfig, MacCellConfig, MacConfig};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MacAppConfig {
    /// Cell configuration
    #[serde(default)]
    pub cell: CellConfig,
    /// UE execution contexts
    #[serde(default)]
    pub workers: WorkersConfig,
    /// DL HARQ buffer pool
    #[serde(default)]
    pub dl_buffer_pool: DlBufferPoolAppConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Cell index
    #[serde(default)]
    pub cell_index: u8,
    /// Number of PRBs of the carrier
    #[serde(default = "default_nof_rbs")]
    pub nof_rbs: usize,
    /// Number of DL antenna ports
    #[serde(default = "default_nof_ports")]
    pub nof_ports: usize,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            cell_index: 0,
            nof_rbs: default_nof_rbs(),
            nof_ports: default_nof_ports(),
        }
    }
}

fn default_nof_rbs() -> usize {
    52 // 10 MHz at 15 kHz SCS
}

fn default_nof_ports() -> usize {
    1
}

/// UE execution contexts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    /// Number of UE workers
    #[serde(default = "default_nof_ue_workers")]
    pub nof_ue_workers: usize,
    /// Task queue size of every worker
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            nof_ue_workers: default_nof_ue_workers(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_nof_ue_workers() -> usize {
    4
}

fn default_queue_size() -> usize {
    2048
}

/// DL HARQ buffer pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DlBufferPoolAppConfig {
    /// Total descriptors of the cell
    #[serde(default = "default_nof_descriptors")]
    pub nof_descriptors: usize,
    /// Descriptors reserved for every UE
    #[serde(default = "default_nof_harqs_per_ue")]
    pub nof_harqs_per_ue: usize,
    /// Descriptors carved at startup
    #[serde(default = "default_initial_cache_size")]
    pub initial_cache_size: usize,
    /// Cache size that triggers background replenishment
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,
    /// Cache size at which replenishment stops
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    /// Descriptors carved per background batch
    #[serde(default = "default_replenish_batch")]
    pub replenish_batch: usize,
}

impl Default for DlBufferPoolAppConfig {
    fn default() -> Self {
        Self {
            nof_descriptors: default_nof_descriptors(),
            nof_harqs_per_ue: default_nof_harqs_per_ue(),
            initial_cache_size: default_initial_cache_size(),
            low_water_mark: default_low_water_mark(),
            high_water_mark: default_high_water_mark(),
            replenish_batch: default_replenish_batch(),
        }
    }
}

fn default_nof_descriptors() -> usize {
    1024
}

fn default_nof_harqs_per_ue() -> usize {
    16
}

fn default_initial_cache_size() -> usize {
    128
}

fn default_low_water_mark() -> usize {
    64
}

fn default_high_water_mark() -> usize {
    256
}

fn default_replenish_batch() -> usize {
    16
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level filter, overridden by the command line and RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MacAppConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_yaml_str(&contents).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: MacAppConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// MAC layer configuration of the single configured cell
    pub fn to_mac_config(&self) -> MacConfig {
        let pool = &self.dl_buffer_pool;
        let mut cell = MacCellConfig::new(
            DuCellIndex(self.cell.cell_index),
            self.cell.nof_rbs,
            self.cell.nof_ports,
            pool.nof_descriptors,
        );
        cell.dl_buffer_pool = DlBufferPoolConfig {
            initial_cache_size: pool.initial_cache_size,
            low_water_mark: pool.low_water_mark,
            high_water_mark: pool.high_water_mark,
            replenish_batch: pool.replenish_batch,
            ..cell.dl_buffer_pool
        };

        MacConfig {
            cells: vec![cell],
            nof_harqs_per_ue: pool.nof_harqs_per_ue,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers.nof_ue_workers == 0 {
            return Err(anyhow::anyhow!("At least one UE worker is required"));
        }
        if self.workers.queue_size == 0 {
            return Err(anyhow::anyhow!("Worker queue size must be positive"));
        }
        self.to_mac_config().validate()?;
        Ok(())
    }
}
