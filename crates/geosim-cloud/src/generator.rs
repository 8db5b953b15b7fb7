//! Synthetic user-request generation.

use std::fs::File;
use std::path::Path;

use rand::prelude::*;
use rand_pcg::Pcg64;
use serde::Deserialize;

use geosim_core::Id;

use crate::config::ConfigError;
use crate::request::RequestRegistry;

/// Shape parameters of the synthetic workload.
#[derive(Clone, Debug, Deserialize)]
pub struct GeneratorConfig {
    pub request_num: u32,
    /// Fixed time between consecutive submissions, ms.
    pub arrival_interval: f64,
    /// Inclusive (min, max) groups per request.
    pub groups_per_request: [u32; 2],
    /// Inclusive (min, max) instances per group.
    pub instances_per_group: [u32; 2],
    pub cpu_choices: Vec<u32>,
    pub ram_choices: Vec<u32>,
    pub storage_choices: Vec<u32>,
    pub bw_choices: Vec<u32>,
    /// Instance lifetimes, ms; negative means "runs until the end".
    pub lifetime_choices: Vec<f64>,
    /// Inclusive (min, max) per-group access latency bound, ms.
    pub access_latency: [f64; 2],
    /// Probability of an affinity edge between consecutive groups.
    #[serde(default)]
    pub edge_probability: f64,
    /// Inclusive (min, max) required bandwidth per affinity edge, Gb/s.
    #[serde(default = "default_edge_bw")]
    pub edge_bw: [f64; 2],
    pub schedule_delay_limit: f64,
    pub retry_limit: u32,
    pub areas: Vec<String>,
}

impl GeneratorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(&path).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_reader(file).map_err(|e| ConfigError::Parse {
            path: path.as_ref().display().to_string(),
            message: e.to_string(),
        })
    }
}

fn default_edge_bw() -> [f64; 2] {
    [1., 1.]
}

/// Seeded generator filling the registry with synthetic user requests.
pub struct UserRequestGenerator {
    config: GeneratorConfig,
    rng: Pcg64,
}

impl UserRequestGenerator {
    pub fn new(config: GeneratorConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Creates the requests in the registry. Returns (submit time, request
    /// id) pairs in submission order; origins are drawn uniformly from
    /// `origin_dcs`.
    pub fn generate(&mut self, registry: &mut RequestRegistry, origin_dcs: &[Id]) -> Vec<(f64, u32)> {
        let mut submissions = Vec::with_capacity(self.config.request_num as usize);
        for i in 0..self.config.request_num {
            let submit_time = i as f64 * self.config.arrival_interval;
            let belong_dc = origin_dcs[self.rng.gen_range(0..origin_dcs.len())];
            let area = self.config.areas[self.rng.gen_range(0..self.config.areas.len())].clone();
            let request_id =
                registry.create_user_request(submit_time, belong_dc, &area, self.config.schedule_delay_limit);
            let group_num = self.gen_in(self.config.groups_per_request);
            let mut prev_group = None;
            for _ in 0..group_num {
                let access_latency = self
                    .rng
                    .gen_range(self.config.access_latency[0]..=self.config.access_latency[1]);
                let group_id = registry.create_group(request_id, access_latency, self.config.retry_limit);
                let instance_num = self.gen_in(self.config.instances_per_group);
                for _ in 0..instance_num {
                    let cpu = pick(&mut self.rng, &self.config.cpu_choices);
                    let ram = pick(&mut self.rng, &self.config.ram_choices);
                    let storage = pick(&mut self.rng, &self.config.storage_choices);
                    let bw = pick(&mut self.rng, &self.config.bw_choices);
                    let lifetime = pick(&mut self.rng, &self.config.lifetime_choices);
                    registry.create_instance(group_id, cpu, ram, storage, bw, lifetime);
                }
                if let Some(prev) = prev_group {
                    if self.rng.gen_range(0.0..1.0) < self.config.edge_probability {
                        let bw = self.rng.gen_range(self.config.edge_bw[0]..=self.config.edge_bw[1]);
                        registry.add_edge(request_id, prev, group_id, bw);
                    }
                }
                prev_group = Some(group_id);
            }
            submissions.push((submit_time, request_id));
        }
        submissions
    }

    fn gen_in(&mut self, range: [u32; 2]) -> u32 {
        self.rng.gen_range(range[0]..=range[1])
    }
}

fn pick<T: Copy>(rng: &mut Pcg64, choices: &[T]) -> T {
    choices[rng.gen_range(0..choices.len())]
}
