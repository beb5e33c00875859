//! The hierarchical configuration schema read at build time.
//!
//! This crate only models the *shape* the router and uDMA controller read; loading it from
//! whatever on-disk or in-memory config store the host uses is someone else's problem. Any
//! `serde_json::Value` (or a store that round-trips through one) deserializes into these types.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub base: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub remove_offset: u64,
    #[serde(default)]
    pub add_offset: u64,
    #[serde(default)]
    pub latency: u32,
    /// Present iff this mapping has a bound target. Absent with `size != 0` marks the error
    /// region; the value itself is opaque to this crate.
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub bandwidth: u32,
    #[serde(default)]
    pub mappings: BTreeMap<String, MappingConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub nb_channels: usize,
    pub ids: Vec<usize>,
    pub offsets: Vec<u64>,
    pub version: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UdmaProperties {
    pub l2_read_fifo_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UdmaConfig {
    pub nb_periphs: usize,
    pub properties: UdmaProperties,
    pub interfaces: Vec<String>,
    #[serde(flatten)]
    pub interface_blocks: BTreeMap<String, InterfaceConfig>,
}

/// Config/build errors: the component simply does not start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("interface block `{name}` listed in `interfaces` but not defined")]
    MissingInterfaceBlock { name: String },
    #[error("unknown interface `{name}` (supported: uart, spim, hyper, cpi)")]
    UnknownInterfaceFamily { name: String },
    #[error("unsupported interface `{name}` version {version}")]
    UnsupportedInterfaceVersion { name: String, version: u32 },
    #[error("interface `{name}` declares nb_channels={nb_channels} but `ids` has {ids_len} entries")]
    ChannelCountMismatch {
        name: String,
        nb_channels: usize,
        ids_len: usize,
    },
    #[error("interface `{name}` declares nb_channels={nb_channels} but `offsets` has {offsets_len} entries")]
    OffsetCountMismatch {
        name: String,
        nb_channels: usize,
        offsets_len: usize,
    },
    #[error("peripheral id {id} out of range (nb_periphs={nb_periphs})")]
    PeriphIdOutOfRange { id: usize, nb_periphs: usize },
}

impl UdmaConfig {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl RouterConfig {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}
