use crate::request::Instance;
use crate::state_manager::{HostCapacity, HostState, PartitionRangesManager};

/// The possibly-stale host-state view one intra-scheduler works against
/// during a scheduling round.
///
/// The view is a materialized copy: temporary allocations made while placing
/// a batch are written straight into it and vanish when the round's state is
/// dropped, so optimistic decisions never leak into the real state.
pub struct SynState {
    view: Vec<HostState>,
    capacity: HostCapacity,
    ranges: PartitionRangesManager,
    /// Assigned partitions in scan order: the scheduler's home partition
    /// first, then increasing staleness.
    assigned: Vec<u32>,
    /// View timestamp per assigned partition, aligned with `assigned`.
    view_times: Vec<f64>,
}

impl SynState {
    pub(crate) fn new(
        view: Vec<HostState>,
        capacity: HostCapacity,
        ranges: PartitionRangesManager,
        assigned: Vec<u32>,
        view_times: Vec<f64>,
    ) -> Self {
        Self {
            view,
            capacity,
            ranges,
            assigned,
            view_times,
        }
    }

    /// Whether the host (as viewed) can run the instance. Hosts outside the
    /// scheduler's assigned partitions are never suitable.
    pub fn is_suitable(&self, host_id: u32, instance: &Instance) -> bool {
        self.is_assigned(host_id) && self.view[host_id as usize].can_fit(instance)
    }

    /// Books the instance on the host inside this view only.
    pub fn allocate_tmp_resource(&mut self, host_id: u32, instance: &Instance) {
        self.view[host_id as usize].allocate(instance);
    }

    pub fn host_state(&self, host_id: u32) -> HostState {
        self.view[host_id as usize]
    }

    pub fn capacity(&self) -> HostCapacity {
        self.capacity
    }

    /// Assigned partitions in scan order (home partition first, then
    /// decreasing view freshness).
    pub fn assigned_partitions(&self) -> &[u32] {
        &self.assigned
    }

    pub fn view_time(&self, scan_index: usize) -> f64 {
        self.view_times[scan_index]
    }

    pub fn partition_range(&self, partition: u32) -> (u32, u32) {
        self.ranges.range(partition)
    }

    pub fn assigned_host_count(&self) -> u32 {
        self.assigned
            .iter()
            .map(|&p| {
                let (first, last) = self.ranges.range(p);
                last - first + 1
            })
            .sum()
    }

    /// Maps a dense index over the assigned partitions (in scan order) to a
    /// host id.
    pub fn nth_assigned_host(&self, mut n: u32) -> u32 {
        for &p in &self.assigned {
            let (first, last) = self.ranges.range(p);
            let len = last - first + 1;
            if n < len {
                return first + n;
            }
            n -= len;
        }
        unreachable!("assigned host index out of range")
    }

    /// Mean free fraction over the four resources, as viewed.
    pub fn free_share(&self, host_id: u32) -> f64 {
        let state = &self.view[host_id as usize];
        let cpu = state.cpu as f64 / self.capacity.cpu as f64;
        let ram = state.ram as f64 / self.capacity.ram as f64;
        let storage = state.storage as f64 / self.capacity.storage as f64;
        let bw = state.bw as f64 / self.capacity.bw as f64;
        (cpu + ram + storage + bw) / 4.
    }

    fn is_assigned(&self, host_id: u32) -> bool {
        if host_id >= self.ranges.host_num() {
            return false;
        }
        self.assigned.contains(&self.ranges.partition_of(host_id))
    }
}
