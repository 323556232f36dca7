//! Configuration module for the CPV raw codec
//!
//! Supports loading configuration from TOML files. Every section and field
//! is optional; missing values fall back to the defaults below.
//!
//! # Example
//! ```toml
//! [geometry]
//! readout_units = 3
//! table = "cpv_map.csv"     # optional CSV mapping table
//!
//! [codec]
//! scan_direction = "backward"
//! rdh_version = 6
//! page_size = 8192
//!
//! [simulation]
//! triggers = 100
//! occupancy = 0.05
//! seed = 42
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::common::ScanDirection;
use crate::geometry::{GeometryError, GeometryLayout, GeometryMap};
use crate::reader::decoder::DecoderConfig;
use crate::reader::rdh::{RawHeader, RDH_SIZE};
use crate::reader::trailer::RcuTrailer;
use crate::writer::{EncoderConfig, PageWriterConfig};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            info!(config_file = %path.display(), "Loaded configuration");
            Ok(config)
        } else {
            info!(config_file = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.codec.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

// =============================================================================
// Geometry Configuration
// =============================================================================

/// Geometry section: layout dimensions and an optional mapping table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeometryConfig {
    #[serde(flatten)]
    pub layout: GeometryLayout,

    /// CSV table `readout_unit,row,dilogic,address,abs_id`; built-in map if unset
    #[serde(default)]
    pub table: Option<PathBuf>,
}

impl GeometryConfig {
    /// Build the shared geometry map
    pub fn build(&self) -> Result<Arc<GeometryMap>, GeometryError> {
        let map = match &self.table {
            Some(path) => GeometryMap::from_table(self.layout, path)?,
            None => GeometryMap::new(self.layout)?,
        };
        info!(
            channels = map.len(),
            readout_units = self.layout.readout_units,
            table = self.table.is_some(),
            "Geometry map ready"
        );
        Ok(Arc::new(map))
    }
}

// =============================================================================
// Codec Configuration
// =============================================================================

/// Codec section: payload word order and page format
#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig {
    #[serde(default)]
    pub scan_direction: ScanDirection,

    /// RDH version written by the page writer (4, 5 or 6)
    #[serde(default = "default_rdh_version")]
    pub rdh_version: u8,

    /// Page stride in bytes written by the page writer
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            scan_direction: ScanDirection::default(),
            rdh_version: default_rdh_version(),
            page_size: default_page_size(),
        }
    }
}

fn default_rdh_version() -> u8 {
    6
}

fn default_page_size() -> usize {
    8192
}

impl CodecConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !RawHeader::is_supported(self.rdh_version) {
            return Err(ConfigError::invalid(
                "codec.rdh_version",
                format!("{} is not one of 4, 5, 6", self.rdh_version),
            ));
        }
        let min_page = RDH_SIZE + 4 * (RcuTrailer::encoded_size() + 1);
        if self.page_size < min_page || self.page_size > u16::MAX as usize || self.page_size % 4 != 0 {
            return Err(ConfigError::invalid(
                "codec.page_size",
                format!(
                    "{} must be a multiple of 4 in [{}, {}]",
                    self.page_size,
                    min_page,
                    u16::MAX
                ),
            ));
        }
        Ok(())
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            direction: self.scan_direction,
            dump_enabled: false,
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            direction: self.scan_direction,
        }
    }

    pub fn page_writer_config(&self) -> PageWriterConfig {
        PageWriterConfig {
            rdh_version: self.rdh_version,
            page_size: self.page_size,
        }
    }
}

// =============================================================================
// Simulation Configuration
// =============================================================================

/// Simulation section: pedestal-like digit generation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of triggers to generate
    pub triggers: u32,
    /// Probability that a channel fires in a trigger
    pub occupancy: f64,
    /// Mean charge in ADC counts
    pub pedestal_mean: f64,
    /// Charge spread in ADC counts
    pub pedestal_sigma: f64,
    /// Probability of a second digit on a fired channel
    pub pileup_probability: f64,
    /// Random seed (random if unset)
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            triggers: 10,
            occupancy: 0.05,
            pedestal_mean: 40.0,
            pedestal_sigma: 3.0,
            pileup_probability: 0.0,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.occupancy) {
            return Err(ConfigError::invalid(
                "simulation.occupancy",
                format!("{} is not a probability", self.occupancy),
            ));
        }
        if !(0.0..=1.0).contains(&self.pileup_probability) {
            return Err(ConfigError::invalid(
                "simulation.pileup_probability",
                format!("{} is not a probability", self.pileup_probability),
            ));
        }
        if !self.pedestal_sigma.is_finite() || self.pedestal_sigma < 0.0 {
            return Err(ConfigError::invalid(
                "simulation.pedestal_sigma",
                format!("{} must be finite and non-negative", self.pedestal_sigma),
            ));
        }
        if !self.pedestal_mean.is_finite() {
            return Err(ConfigError::invalid("simulation.pedestal_mean", "must be finite"));
        }
        Ok(())
    }
}
