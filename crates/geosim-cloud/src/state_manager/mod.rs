//! Host-state bookkeeping of one data center.
//!
//! The manager keeps the real (conflict-free) host states, a bounded per-host
//! state history, and derives from them the delayed [`SynState`] views the
//! intra-schedulers work against and the [`SimpleState`] summaries the
//! inter-schedulers synchronize.

mod host_state;
mod partition;
mod power;
mod simple_state;
mod syn_state;

pub use host_state::{HostCapacity, HostState};
pub use partition::PartitionRangesManager;
pub use power::PowerOnRecord;
pub use simple_state::SimpleState;
pub use syn_state::SynState;

use log::warn;
use rustc_hash::FxHashMap;

use crate::request::Instance;

/// Outcome of committing an allocation against the real host state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationVerdict {
    Success,
    OutOfResource,
}

/// Per-resource totals of a whole data center.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResourceSums {
    pub cpu: u64,
    pub ram: u64,
    pub storage: u64,
    pub bw: u64,
}

#[derive(Clone, Copy, Debug)]
struct HostStateHistory {
    time: f64,
    state: HostState,
}

/// Real host states plus history-backed delayed views.
pub struct StatesManager {
    host_states: Vec<HostState>,
    capacity: HostCapacity,
    histories: Vec<Vec<HostStateHistory>>,
    ranges: PartitionRangesManager,
    simple_state: SimpleState,
    // instance id -> host id, makes releases idempotent
    allocations: FxHashMap<u32, u32>,
    // (first partition, partition count) per registered intra-scheduler
    scheduler_partitions: Vec<(u32, u32)>,
    syn_gap: f64,
    history_retention: f64,
    power_record: PowerOnRecord,
}

impl StatesManager {
    pub fn new(host_num: u32, capacity: HostCapacity, ranges: PartitionRangesManager, syn_gap: f64) -> Self {
        let initial = capacity.initial_state();
        let mut simple_state = SimpleState::new();
        for _ in 0..host_num {
            simple_state.add_host(&initial);
        }
        let history_retention = if syn_gap.is_finite() { 2. * syn_gap } else { f64::INFINITY };
        Self {
            host_states: vec![initial; host_num as usize],
            capacity,
            histories: vec![vec![HostStateHistory { time: 0., state: initial }]; host_num as usize],
            ranges,
            simple_state,
            allocations: FxHashMap::default(),
            scheduler_partitions: Vec::new(),
            syn_gap,
            history_retention,
            power_record: PowerOnRecord::default(),
        }
    }

    /// Registers an intra-scheduler and its assigned partitions; returns the
    /// index used to request views later.
    pub fn register_scheduler(&mut self, first_partition: u32, partition_num: u32) -> usize {
        self.scheduler_partitions.push((first_partition, partition_num));
        self.scheduler_partitions.len() - 1
    }

    pub fn host_num(&self) -> u32 {
        self.host_states.len() as u32
    }

    pub fn capacity(&self) -> HostCapacity {
        self.capacity
    }

    pub fn ranges(&self) -> &PartitionRangesManager {
        &self.ranges
    }

    pub fn host_state(&self, host_id: u32) -> HostState {
        self.host_states[host_id as usize]
    }

    pub fn simple_state(&self) -> &SimpleState {
        &self.simple_state
    }

    pub fn capacity_sums(&self) -> ResourceSums {
        let n = self.host_num() as u64;
        ResourceSums {
            cpu: n * self.capacity.cpu as u64,
            ram: n * self.capacity.ram as u64,
            storage: n * self.capacity.storage as u64,
            bw: n * self.capacity.bw as u64,
        }
    }

    /// Whether the real state of the host can fit the instance.
    pub fn is_suitable(&self, host_id: u32, instance: &Instance) -> bool {
        self.host_states[host_id as usize].can_fit(instance)
    }

    /// Commits the instance to the host against the real state.
    pub fn allocate_resource(&mut self, host_id: u32, instance: &Instance, now: f64) -> AllocationVerdict {
        let old = self.host_states[host_id as usize];
        if !old.can_fit(instance) {
            return AllocationVerdict::OutOfResource;
        }
        let state = &mut self.host_states[host_id as usize];
        state.allocate(instance);
        let new = *state;
        self.allocations.insert(instance.id, host_id);
        self.simple_state.on_host_change(&old, &new);
        self.push_history(host_id, now, new);
        if !old.is_powered_on() {
            self.power_record.host_on(host_id, now);
        }
        AllocationVerdict::Success
    }

    /// Returns the instance's resources to its host. Releasing an instance
    /// with no live allocation is a no-op.
    pub fn release_resource(&mut self, instance: &Instance, now: f64) {
        let host_id = match self.allocations.remove(&instance.id) {
            Some(host_id) => host_id,
            None => {
                warn!("release of instance {} with no live allocation, ignored", instance.id);
                return;
            }
        };
        let old = self.host_states[host_id as usize];
        let state = &mut self.host_states[host_id as usize];
        state.release(instance);
        let new = *state;
        self.simple_state.on_host_change(&old, &new);
        self.push_history(host_id, now, new);
        if !new.is_powered_on() {
            self.power_record.host_off(host_id, now);
        }
    }

    /// Builds the delayed view for the given registered scheduler.
    ///
    /// The scheduler's partitions are scanned home-first; the k-th partition
    /// in scan order is viewed as of `floor(now / g_n) * g_n - k * g_n`
    /// (clamped at zero) where `g_n` is the sync gap divided by the number of
    /// assigned partitions. A zero gap yields the live state, an infinite gap
    /// the initial state.
    pub fn syn_state_for(&self, scheduler_index: usize, now: f64) -> SynState {
        let (first, num) = self.scheduler_partitions[scheduler_index];
        let total = self.ranges.partition_num();
        let mut view = vec![HostState::default(); self.host_states.len()];
        let mut assigned = Vec::with_capacity(num as usize);
        let mut view_times = Vec::with_capacity(num as usize);
        for k in 0..num {
            let partition = (first + k) % total;
            let view_time = self.view_time(now, k, num);
            let (range_first, range_last) = self.ranges.range(partition);
            for host_id in range_first..=range_last {
                view[host_id as usize] = self.state_at(host_id, view_time);
            }
            assigned.push(partition);
            view_times.push(view_time);
        }
        SynState::new(view, self.capacity, self.ranges.clone(), assigned, view_times)
    }

    fn view_time(&self, now: f64, k: u32, partition_num: u32) -> f64 {
        if self.syn_gap == 0. {
            return now;
        }
        if self.syn_gap.is_infinite() {
            return 0.;
        }
        let small_gap = self.syn_gap / partition_num as f64;
        ((now / small_gap).floor() * small_gap - k as f64 * small_gap).max(0.)
    }

    /// State of the host as of the given time, from the history.
    pub fn state_at(&self, host_id: u32, time: f64) -> HostState {
        let history = &self.histories[host_id as usize];
        let idx = history.partition_point(|h| h.time <= time);
        if idx == 0 {
            history[0].state
        } else {
            history[idx - 1].state
        }
    }

    pub fn power_record(&self) -> &PowerOnRecord {
        &self.power_record
    }

    fn push_history(&mut self, host_id: u32, now: f64, state: HostState) {
        let history = &mut self.histories[host_id as usize];
        history.push(HostStateHistory { time: now, state });
        if self.history_retention.is_finite() {
            let cutoff = now - self.history_retention;
            if history.first().map_or(false, |h| h.time < cutoff) {
                // keep the newest entry at or before the cutoff
                let idx = history.partition_point(|h| h.time <= cutoff);
                if idx > 1 {
                    history.drain(..idx - 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Instance;

    fn capacity() -> HostCapacity {
        HostCapacity {
            cpu: 8,
            ram: 16,
            storage: 16,
            bw: 16,
        }
    }

    fn instance(id: u32, cpu: u32) -> Instance {
        Instance::new(id, 0, 0, cpu, 4, 4, 4, -1.)
    }

    fn manager(host_num: u32, partition_num: u32, syn_gap: f64) -> StatesManager {
        let ranges = PartitionRangesManager::average_divided(host_num, partition_num);
        StatesManager::new(host_num, capacity(), ranges, syn_gap)
    }

    #[test]
    fn allocate_updates_real_state_and_summary() {
        let mut states = manager(2, 1, 0.);
        let inst = instance(1, 4);
        assert_eq!(states.allocate_resource(0, &inst, 1.), AllocationVerdict::Success);
        assert_eq!(states.host_state(0).cpu, 4);
        assert_eq!(states.simple_state().cpu_available_sum, 12);
        assert_eq!(states.simple_state().cpu_ram_host_count(8, 4), 1);
        // a second 8-cpu instance no longer fits host 0
        assert_eq!(states.allocate_resource(0, &instance(2, 8), 2.), AllocationVerdict::OutOfResource);
        states.release_resource(&inst, 3.);
        assert_eq!(states.host_state(0).cpu, 8);
        assert_eq!(states.simple_state().cpu_available_sum, 16);
    }

    #[test]
    fn release_without_allocation_is_a_noop() {
        let mut states = manager(1, 1, 0.);
        states.release_resource(&instance(9, 4), 1.);
        assert_eq!(states.host_state(0).cpu, 8);
    }

    #[test]
    fn power_record_tracks_on_intervals() {
        let mut states = manager(2, 1, 0.);
        let a = instance(1, 4);
        let b = instance(2, 4);
        states.allocate_resource(0, &a, 0.);
        states.allocate_resource(1, &b, 5.);
        states.release_resource(&a, 10.);
        assert_eq!(states.power_record().max_power_on_num(), 2);
        // host 0 ran for 10, host 1 is still on at 20
        assert_eq!(states.power_record().total_on_time(20.), 25.);
    }

    #[test]
    fn syn_state_views_partitions_with_increasing_staleness() {
        // two partitions, gap 10: the home partition is viewed at
        // floor(now / 5) * 5, the second one 5 earlier
        let mut states = manager(4, 2, 10.);
        states.register_scheduler(0, 2);
        states.allocate_resource(0, &instance(1, 4), 3.);
        states.allocate_resource(2, &instance(2, 4), 11.);
        let view = states.syn_state_for(0, 12.);
        assert_eq!(view.view_time(0), 10.);
        assert_eq!(view.view_time(1), 5.);
        // the allocation at 3 is visible, the one at 11 is not yet
        assert_eq!(view.host_state(0).cpu, 4);
        assert_eq!(view.host_state(2).cpu, 8);
    }

    #[test]
    fn zero_gap_views_are_live_and_infinite_gap_views_are_initial() {
        let mut live = manager(2, 1, 0.);
        live.register_scheduler(0, 1);
        live.allocate_resource(0, &instance(1, 4), 3.);
        assert_eq!(live.syn_state_for(0, 3.).host_state(0).cpu, 4);

        let mut frozen = manager(2, 1, f64::INFINITY);
        frozen.register_scheduler(0, 1);
        frozen.allocate_resource(0, &instance(1, 4), 3.);
        assert_eq!(frozen.syn_state_for(0, 100.).host_state(0).cpu, 8);
    }

    #[test]
    fn hosts_outside_assigned_partitions_are_not_suitable() {
        let mut states = manager(4, 2, 0.);
        states.register_scheduler(0, 1);
        let view = states.syn_state_for(0, 0.);
        let inst = instance(1, 4);
        assert!(view.is_suitable(0, &inst));
        assert!(!view.is_suitable(2, &inst));
    }
}
