//! Configuration formats and loaders.
//!
//! Data-center topology comes from a JSON file, the delay tables from CSV
//! matrices and the link list from CSV rows. The deserialized structs double
//! as the programmatic construction API.

use std::fmt;
use std::fs::File;
use std::path::Path;

use serde::Deserialize;

/// Errors surfaced by configuration loading and validation. The CLI prints
/// them and exits non-zero; nothing inside a running simulation produces one.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: String, message: String },
    Parse { path: String, message: String },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, message } => write!(f, "cannot read {}: {}", path, message),
            ConfigError::Parse { path, message } => write!(f, "cannot parse {}: {}", path, message),
            ConfigError::Invalid(message) => write!(f, "invalid configuration: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

fn io_err<P: AsRef<Path>>(path: P, e: impl fmt::Display) -> ConfigError {
    ConfigError::Io {
        path: path.as_ref().display().to_string(),
        message: e.to_string(),
    }
}

fn parse_err<P: AsRef<Path>>(path: P, e: impl fmt::Display) -> ConfigError {
    ConfigError::Parse {
        path: path.as_ref().display().to_string(),
        message: e.to_string(),
    }
}

/// Host template shared by all hosts of one data center.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct HostTemplateConfig {
    pub cpu: u32,
    pub ram: u32,
    pub storage: u32,
    pub bw: u32,
}

/// One intra-scheduler of a data center.
#[derive(Clone, Debug, Deserialize)]
pub struct IntraSchedulerConfig {
    pub r#type: String,
    #[serde(default)]
    pub first_partition_id: u32,
    /// Number of partitions the scheduler sees; defaults to all of them.
    pub partition_num: Option<u32>,
    #[serde(default = "default_intra_cost")]
    pub schedule_cost_time: f64,
    #[serde(default = "default_batch_num")]
    pub batch_num: usize,
}

/// Load balancer over schedulers (intra-schedulers of a data center or
/// center schedulers of a zone).
#[derive(Clone, Debug, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default = "default_lb_type")]
    pub r#type: String,
    #[serde(default = "default_batch_num")]
    pub batch_size: usize,
    #[serde(default = "default_lb_cost")]
    pub cost_time: f64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            r#type: default_lb_type(),
            batch_size: default_batch_num(),
            cost_time: default_lb_cost(),
        }
    }
}

/// Unit resource prices used by cost-aware inter policies.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct PriceConfig {
    #[serde(default = "default_unit_price")]
    pub cpu_unit_price: f64,
    #[serde(default = "default_unit_price")]
    pub ram_unit_price: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            cpu_unit_price: default_unit_price(),
            ram_unit_price: default_unit_price(),
        }
    }
}

/// One data center.
#[derive(Clone, Debug, Deserialize)]
pub struct DatacenterConfig {
    pub name: String,
    pub region: String,
    pub host_num: u32,
    pub host: HostTemplateConfig,
    /// Explicit inclusive (first, last) host-id ranges; when absent the hosts
    /// are split evenly into `partition_num` partitions.
    pub partitions: Option<Vec<[u32; 2]>>,
    #[serde(default = "default_partition_num")]
    pub partition_num: u32,
    pub intra_schedulers: Vec<IntraSchedulerConfig>,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    /// In-DC state sync gap driving the delayed partition views, ms.
    /// Zero means live views.
    #[serde(default)]
    pub syn_gap: f64,
    /// Gap at which inter-schedulers refresh this DC's coarse state, ms.
    /// Zero means a live refresh at every scheduling round.
    #[serde(default)]
    pub dc_state_syn_gap: f64,
    #[serde(default = "default_batch_num")]
    pub queue_batch_num: usize,
    /// Queue length beyond which a forward-supporting receiver pushes groups
    /// back to the zone queue; absent means never forward.
    pub forward_threshold: Option<usize>,
    #[serde(default)]
    pub prices: PriceConfig,
}

/// One zone-level (center) inter-scheduler.
#[derive(Clone, Debug, Deserialize)]
pub struct InterSchedulerConfig {
    pub r#type: String,
    /// "Datacenter", "DatacenterNoForward" or "Host"; defaults per policy.
    pub target: Option<String>,
    #[serde(default = "default_inter_cost")]
    pub schedule_cost_time: f64,
    #[serde(default = "default_batch_num")]
    pub batch_num: usize,
}

/// One collaboration zone.
#[derive(Clone, Debug, Deserialize)]
pub struct CollaborationConfig {
    pub id: u32,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    pub center_schedulers: Vec<InterSchedulerConfig>,
    pub datacenters: Vec<DatacenterConfig>,
}

/// Periodic collaboration reshuffle.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ChangeCollaborationConfig {
    pub gap: f64,
}

/// Root of the data-center topology file.
#[derive(Clone, Debug, Deserialize)]
pub struct DatacentersConfig {
    pub collaborations: Vec<CollaborationConfig>,
    pub change_collaboration: Option<ChangeCollaborationConfig>,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl DatacentersConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_reader(file).map_err(|e| parse_err(&path, e))
    }
}

/// One inter-datacenter link.
#[derive(Clone, Debug, Deserialize)]
pub struct LinkConfig {
    pub src: String,
    pub dst: String,
    pub bandwidth: f64,
    pub unit_price: f64,
}

/// Loads a CSV delay matrix: the header row carries the column labels, each
/// following row a row label plus delays in ms. Returns (row, column, delay)
/// triples.
pub fn load_delay_matrix<P: AsRef<Path>>(path: P) -> Result<Vec<(String, String, f64)>, ConfigError> {
    let mut reader = csv::Reader::from_path(&path).map_err(|e| io_err(&path, e))?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| parse_err(&path, e))?
        .iter()
        .skip(1)
        .map(|s| s.trim().to_owned())
        .collect();
    let mut triples = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| parse_err(&path, e))?;
        let row = record
            .get(0)
            .ok_or_else(|| parse_err(&path, "missing row label"))?
            .trim()
            .to_owned();
        for (i, column) in columns.iter().enumerate() {
            let cell = record
                .get(i + 1)
                .ok_or_else(|| parse_err(&path, format!("row {} is shorter than the header", row)))?;
            let delay: f64 = cell
                .trim()
                .parse()
                .map_err(|e| parse_err(&path, format!("bad delay at ({}, {}): {}", row, column, e)))?;
            triples.push((row.clone(), column.clone(), delay));
        }
    }
    Ok(triples)
}

/// Loads the link list: CSV rows (src, dst, bandwidth, unit_price).
pub fn load_links<P: AsRef<Path>>(path: P) -> Result<Vec<LinkConfig>, ConfigError> {
    let mut reader = csv::Reader::from_path(&path).map_err(|e| io_err(&path, e))?;
    let mut links = Vec::new();
    for record in reader.deserialize() {
        let link: LinkConfig = record.map_err(|e| parse_err(&path, e))?;
        links.push(link);
    }
    Ok(links)
}

fn default_lb_type() -> String {
    "Round".to_owned()
}

fn default_batch_num() -> usize {
    100
}

fn default_lb_cost() -> f64 {
    0.1
}

fn default_intra_cost() -> f64 {
    0.25
}

fn default_inter_cost() -> f64 {
    0.3
}

fn default_partition_num() -> u32 {
    1
}

fn default_unit_price() -> f64 {
    1.
}

fn default_seed() -> u64 {
    123
}
