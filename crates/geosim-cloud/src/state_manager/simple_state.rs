use rustc_hash::FxHashMap;

use crate::state_manager::HostState;

/// Coarse per-datacenter availability summary used by inter-schedulers:
/// per-resource available sums plus a (cpu, ram) availability histogram for
/// "enough hosts with this free pair" queries.
#[derive(Clone, Debug, Default)]
pub struct SimpleState {
    pub cpu_available_sum: u64,
    pub ram_available_sum: u64,
    pub storage_available_sum: u64,
    pub bw_available_sum: u64,
    cpu_ram_counts: FxHashMap<(u32, u32), u32>,
}

impl SimpleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&mut self, state: &HostState) {
        self.cpu_available_sum += state.cpu as u64;
        self.ram_available_sum += state.ram as u64;
        self.storage_available_sum += state.storage as u64;
        self.bw_available_sum += state.bw as u64;
        *self.cpu_ram_counts.entry((state.cpu, state.ram)).or_insert(0) += 1;
    }

    pub fn on_host_change(&mut self, old: &HostState, new: &HostState) {
        self.cpu_available_sum = self.cpu_available_sum - old.cpu as u64 + new.cpu as u64;
        self.ram_available_sum = self.ram_available_sum - old.ram as u64 + new.ram as u64;
        self.storage_available_sum = self.storage_available_sum - old.storage as u64 + new.storage as u64;
        self.bw_available_sum = self.bw_available_sum - old.bw as u64 + new.bw as u64;
        let old_key = (old.cpu, old.ram);
        if let Some(count) = self.cpu_ram_counts.get_mut(&old_key) {
            *count -= 1;
            if *count == 0 {
                self.cpu_ram_counts.remove(&old_key);
            }
        }
        *self.cpu_ram_counts.entry((new.cpu, new.ram)).or_insert(0) += 1;
    }

    /// Number of hosts whose free (cpu, ram) pair covers the demand.
    pub fn cpu_ram_host_count(&self, cpu: u32, ram: u32) -> u32 {
        self.cpu_ram_counts
            .iter()
            .filter(|((c, r), _)| *c >= cpu && *r >= ram)
            .map(|(_, count)| count)
            .sum()
    }
}
