//! Data center component: instance queues, intra-schedulers working against
//! delayed state views, and the commit point against the real host state.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use geosim_core::cast;
use geosim_core::{log_debug, log_info};
use geosim_core::{Event, EventHandler, EventTag, Id, SimulationContext};

use crate::conflict_handler::ConflictHandler;
use crate::events::{
    DcLoadBalance, EndInstances, FailedUserRequests, ForwardedGroups, GroupsToDatacenter, GroupsToHosts,
    HostScheduleConflicted, HostScheduleOk, IntraSchedulingDone, StartIntraScheduling,
};
use crate::inter_scheduler::DcStateView;
use crate::intra_scheduler::{IntraScheduler, IntraSchedulerResult};
use crate::load_balancer::LoadBalancer;
use crate::network::NetworkTopology;
use crate::record::Recorder;
use crate::request::{RequestRegistry, RequestState};
use crate::state_manager::{AllocationVerdict, StatesManager};

/// One data center: hosts behind a states manager, a load balancer spreading
/// queued instances over the intra-schedulers, and a conflict handler
/// committing their proposals.
pub struct Datacenter {
    ctx: SimulationContext,
    cis_id: Id,
    region: String,
    registry: Rc<RefCell<RequestRegistry>>,
    network: Rc<RefCell<NetworkTopology>>,
    recorder: Rc<RefCell<dyn Recorder>>,
    states: StatesManager,
    intra_schedulers: Vec<IntraScheduler>,
    load_balancer: Box<dyn LoadBalancer>,
    conflict_handler: ConflictHandler,
    instance_queue: VecDeque<u32>,
    queue_batch_num: usize,
    /// Instance queue length beyond which forwardable groups are pushed back.
    forward_threshold: Option<usize>,
    cpu_unit_price: f64,
    ram_unit_price: f64,
}

impl Datacenter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: SimulationContext,
        cis_id: Id,
        region: &str,
        registry: Rc<RefCell<RequestRegistry>>,
        network: Rc<RefCell<NetworkTopology>>,
        recorder: Rc<RefCell<dyn Recorder>>,
        states: StatesManager,
        intra_schedulers: Vec<IntraScheduler>,
        load_balancer: Box<dyn LoadBalancer>,
        queue_batch_num: usize,
        forward_threshold: Option<usize>,
        cpu_unit_price: f64,
        ram_unit_price: f64,
    ) -> Self {
        let conflict_handler = ConflictHandler::new(states.ranges().partition_num());
        Self {
            ctx,
            cis_id,
            region: region.to_owned(),
            registry,
            network,
            recorder,
            states,
            intra_schedulers,
            load_balancer,
            conflict_handler,
            instance_queue: VecDeque::new(),
            queue_batch_num,
            forward_threshold,
            cpu_unit_price,
            ram_unit_price,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Coarse state snapshot for inter-scheduler synchronization. Per-host
    /// states are attached only for host-target schedulers.
    pub fn state_view(&self, now: f64, with_hosts: bool) -> DcStateView {
        let host_num = self.states.host_num();
        DcStateView {
            dc_id: self.ctx.id(),
            synced_at: now,
            host_num,
            simple_state: self.states.simple_state().clone(),
            totals: self.states.capacity_sums(),
            cpu_unit_price: self.cpu_unit_price,
            ram_unit_price: self.ram_unit_price,
            host_states: if with_hosts {
                Some((0..host_num).map(|h| self.states.host_state(h)).collect())
            } else {
                None
            },
        }
    }

    /// Conflict counts per partition, ascending partition id.
    pub fn partition_conflicts(&self) -> Vec<(u32, u64)> {
        self.conflict_handler
            .partition_conflicts()
            .iter()
            .map(|(p, c)| (*p, *c))
            .collect()
    }

    pub fn total_conflicts(&self) -> u64 {
        self.conflict_handler.total_conflicts()
    }

    pub fn max_power_on_num(&self) -> u32 {
        self.states.power_record().max_power_on_num()
    }

    pub fn total_power_on_time(&self, now: f64) -> f64 {
        self.states.power_record().total_on_time(now)
    }

    fn on_groups_to_datacenter(&mut self, group_ids: Vec<u32>, support_forward: bool) {
        let mut forwarded = Vec::new();
        let mut accepted_instances = 0;
        {
            let mut registry = self.registry.borrow_mut();
            for group_id in group_ids {
                let over_threshold = self
                    .forward_threshold
                    .map_or(false, |threshold| self.instance_queue.len() >= threshold);
                if support_forward && over_threshold {
                    let user_request_id = registry.group(group_id).user_request_id;
                    registry.group_mut(group_id).reset_to_waiting();
                    let mut network = self.network.borrow_mut();
                    for edge in registry.take_group_edges(user_request_id, group_id) {
                        network.release_bw(edge.src_dc, edge.dst_dc, edge.bw);
                        self.recorder.borrow_mut().bw_released(&edge, self.ctx.time());
                    }
                    forwarded.push(group_id);
                } else {
                    let instance_ids = registry.group(group_id).instance_ids.clone();
                    accepted_instances += instance_ids.len();
                    self.instance_queue.extend(instance_ids);
                }
            }
        }
        if accepted_instances > 0 {
            log_debug!(self.ctx, "queued {} instances for placement", accepted_instances);
            self.ctx.emit_self_now(EventTag::LoadBalanceSend, DcLoadBalance {});
        }
        if !forwarded.is_empty() {
            log_info!(self.ctx, "forwarding {} groups back to the zone queue", forwarded.len());
            self.ctx
                .emit_now(EventTag::UserRequestSend, ForwardedGroups { group_ids: forwarded }, self.cis_id);
        }
    }

    /// Validates host-level inter decisions against the real state, one group
    /// at a time, all or nothing per group.
    fn on_groups_to_hosts(&mut self, collaboration_id: u32, scheduler_id: u32, group_ids: Vec<u32>) {
        let now = self.ctx.time();
        let mut ok = Vec::new();
        let mut conflicted = Vec::new();
        let mut launched: Vec<(u32, u32)> = Vec::new();
        {
            let mut registry = self.registry.borrow_mut();
            for group_id in group_ids {
                if registry.user_request(registry.group(group_id).user_request_id).state == RequestState::Failed {
                    continue;
                }
                let instance_ids = registry.group(group_id).instance_ids.clone();
                let mut allocated: Vec<(u32, u32)> = Vec::new();
                let mut rejected = false;
                // host whose real state contradicted the booking, if any;
                // a missing booking is a rejection with no host to charge
                let mut conflict_host = None;
                for &instance_id in &instance_ids {
                    let instance = registry.instance(instance_id).clone();
                    let host_id = match instance.expected_host_id {
                        Some(host_id) => host_id,
                        None => {
                            rejected = true;
                            break;
                        }
                    };
                    if self.states.allocate_resource(host_id, &instance, now) == AllocationVerdict::Success {
                        allocated.push((instance_id, host_id));
                    } else {
                        rejected = true;
                        conflict_host = Some(host_id);
                        break;
                    }
                }
                if !rejected {
                    launched.extend_from_slice(&allocated);
                    ok.push(group_id);
                } else {
                    for &(instance_id, _) in &allocated {
                        let instance = registry.instance(instance_id).clone();
                        self.states.release_resource(&instance, now);
                    }
                    for &instance_id in &instance_ids {
                        registry.instance_mut(instance_id).expected_host_id = None;
                    }
                    if let Some(host_id) = conflict_host {
                        self.conflict_handler
                            .record_conflict(self.states.ranges().partition_of(host_id));
                    }
                    conflicted.push(group_id);
                }
            }
        }
        self.launch_instances(&launched);
        if !ok.is_empty() {
            self.ctx
                .emit_now(EventTag::ScheduleToDcHostOk, HostScheduleOk { group_ids: ok }, self.cis_id);
        }
        if !conflicted.is_empty() {
            log_debug!(self.ctx, "{} host-level groups conflicted", conflicted.len());
            self.ctx.emit_now(
                EventTag::ScheduleToDcHostConflicted,
                HostScheduleConflicted {
                    collaboration_id,
                    scheduler_id,
                    group_ids: conflicted,
                },
                self.cis_id,
            );
        }
    }

    fn on_load_balance(&mut self) {
        let n = self.queue_batch_num.min(self.instance_queue.len());
        let batch: Vec<u32> = self.instance_queue.drain(..n).collect();
        if batch.is_empty() {
            return;
        }
        {
            let mut registry = self.registry.borrow_mut();
            for &instance_id in &batch {
                registry.instance_mut(instance_id).state = RequestState::Scheduling;
            }
        }
        let cost = self.load_balancer.cost_time();
        let buckets = self.load_balancer.assign(batch, self.intra_schedulers.len());
        for (scheduler, bucket) in self.intra_schedulers.iter_mut().zip(buckets) {
            if !bucket.is_empty() {
                scheduler.add_instances(&bucket, false);
                let scheduler_id = scheduler.id;
                self.ctx
                    .emit_self(EventTag::IntraScheduleBegin, StartIntraScheduling { scheduler_id }, cost);
            }
        }
        if !self.instance_queue.is_empty() {
            self.ctx.emit_self(EventTag::LoadBalanceSend, DcLoadBalance {}, cost);
        }
    }

    fn on_start_intra_scheduling(&mut self, scheduler_id: u32) {
        let now = self.ctx.time();
        let idx = match self.intra_schedulers.iter().position(|s| s.id == scheduler_id) {
            Some(idx) => idx,
            None => return,
        };
        let (result, cost, more) = {
            let scheduler = &mut self.intra_schedulers[idx];
            let batch = scheduler.pop_batch();
            if batch.is_empty() {
                return;
            }
            let mut view = self.states.syn_state_for(scheduler.state_index(), now);
            let result = scheduler.schedule(&batch, &mut view, &mut self.registry.borrow_mut());
            (result, scheduler.schedule_cost_time, !scheduler.queues_empty())
        };
        log_debug!(
            self.ctx,
            "intra-scheduler {} proposed {} placements, {} without a host",
            scheduler_id,
            result.scheduled.len(),
            result.failed.len()
        );
        self.ctx
            .emit_self(EventTag::IntraScheduleEnd, IntraSchedulingDone { result }, cost);
        if more {
            self.ctx
                .emit_self(EventTag::IntraScheduleBegin, StartIntraScheduling { scheduler_id }, cost);
        }
    }

    fn on_intra_scheduling_done(&mut self, mut result: IntraSchedulerResult) {
        let now = self.ctx.time();
        let mut rejected = std::mem::take(&mut result.failed);
        let commit = self
            .conflict_handler
            .commit(vec![result], &mut self.states, &self.registry.borrow(), now);
        if !commit.conflicted.is_empty() {
            log_debug!(self.ctx, "{} placements conflicted at commit", commit.conflicted.len());
        }
        rejected.extend(commit.conflicted);
        self.launch_instances(&commit.committed);
        self.retry_instances(rejected);
    }

    /// Marks committed instances as running, schedules their lifetime ends and
    /// promotes fully placed groups.
    fn launch_instances(&mut self, committed: &[(u32, u32)]) {
        if committed.is_empty() {
            return;
        }
        let now = self.ctx.time();
        let dc_id = self.ctx.id();
        let mut ends: Vec<(f64, u32)> = Vec::new();
        let mut groups = FxHashSet::default();
        {
            let mut registry = self.registry.borrow_mut();
            for &(instance_id, host_id) in committed {
                let instance = registry.instance_mut(instance_id);
                instance.state = RequestState::Running;
                instance.host_id = Some(host_id);
                instance.start_time = Some(now);
                if instance.lifetime >= 0. {
                    ends.push((instance.lifetime, instance_id));
                }
                groups.insert(instance.group_id);
                let instance = registry.instance(instance_id).clone();
                self.recorder.borrow_mut().instance_created(&instance, dc_id);
            }
            for group_id in groups {
                let group = registry.group(group_id);
                if group.state != RequestState::Scheduling {
                    continue;
                }
                let all_placed = group
                    .instance_ids
                    .iter()
                    .all(|id| matches!(registry.instance(*id).state, RequestState::Running | RequestState::Success));
                if all_placed {
                    registry.group_mut(group_id).state = RequestState::Running;
                }
            }
        }
        // one END_INSTANCE_RUN event per distinct lifetime
        ends.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut i = 0;
        while i < ends.len() {
            let lifetime = ends[i].0;
            let mut instance_ids = Vec::new();
            while i < ends.len() && ends[i].0 == lifetime {
                instance_ids.push(ends[i].1);
                i += 1;
            }
            self.ctx
                .emit_self(EventTag::EndInstanceRun, EndInstances { instance_ids }, lifetime);
        }
    }

    /// Requeues rejected instances, or fails their user requests once the
    /// group's retry budget is exhausted.
    fn retry_instances(&mut self, instance_ids: Vec<u32>) {
        if instance_ids.is_empty() {
            return;
        }
        let mut by_group: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
        {
            let registry = self.registry.borrow();
            for instance_id in instance_ids {
                by_group
                    .entry(registry.instance(instance_id).group_id)
                    .or_default()
                    .push(instance_id);
            }
        }
        let mut requeued = false;
        let mut failed_requests = Vec::new();
        {
            let mut registry = self.registry.borrow_mut();
            for (group_id, instance_ids) in by_group {
                let user_request_id = registry.group(group_id).user_request_id;
                if registry.user_request(user_request_id).state == RequestState::Failed {
                    continue;
                }
                if registry.group_mut(group_id).mark_retry() {
                    for &instance_id in &instance_ids {
                        let instance = registry.instance_mut(instance_id);
                        instance.expected_host_id = None;
                        instance.state = RequestState::Waiting;
                    }
                    self.instance_queue.extend(instance_ids);
                    requeued = true;
                } else if !failed_requests.contains(&user_request_id) {
                    failed_requests.push(user_request_id);
                }
            }
        }
        if requeued {
            self.ctx.emit_self_now(EventTag::LoadBalanceSend, DcLoadBalance {});
        }
        if !failed_requests.is_empty() {
            log_info!(
                self.ctx,
                "{} user requests ran out of placement retries",
                failed_requests.len()
            );
            self.ctx.emit_now(
                EventTag::UserRequestFail,
                FailedUserRequests {
                    request_ids: failed_requests,
                    reason: "retry budget exhausted".to_owned(),
                },
                self.cis_id,
            );
        }
    }

    fn on_end_instances(&mut self, instance_ids: Vec<u32>) {
        let now = self.ctx.time();
        let dc_id = self.ctx.id();
        let mut registry = self.registry.borrow_mut();
        for instance_id in instance_ids {
            if registry.instance(instance_id).state != RequestState::Running {
                continue;
            }
            let instance = registry.instance(instance_id).clone();
            self.states.release_resource(&instance, now);
            let user_request_id = instance.user_request_id;
            let request_failed = registry.user_request(user_request_id).state == RequestState::Failed;
            {
                let instance = registry.instance_mut(instance_id);
                instance.state = if request_failed { RequestState::Failed } else { RequestState::Success };
                instance.finish_time = Some(now);
            }
            self.recorder
                .borrow_mut()
                .instance_finished(registry.instance(instance_id), dc_id);
            let group_id = instance.group_id;
            if registry.try_finish_group(group_id, now) {
                self.recorder.borrow_mut().instance_group_finished(registry.group(group_id));
                let mut network = self.network.borrow_mut();
                for edge in registry.take_group_edges(user_request_id, group_id) {
                    network.release_bw(edge.src_dc, edge.dst_dc, edge.bw);
                    self.recorder.borrow_mut().bw_released(&edge, now);
                }
                if registry.try_finish_user_request(user_request_id, now) {
                    self.recorder
                        .borrow_mut()
                        .user_request_finished(registry.user_request(user_request_id));
                }
            }
        }
    }
}

impl EventHandler for Datacenter {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            GroupsToDatacenter { group_ids, support_forward } => {
                self.on_groups_to_datacenter(group_ids, support_forward);
            }
            GroupsToHosts {
                collaboration_id,
                scheduler_id,
                group_ids,
            } => {
                self.on_groups_to_hosts(collaboration_id, scheduler_id, group_ids);
            }
            DcLoadBalance {} => {
                self.on_load_balance();
            }
            StartIntraScheduling { scheduler_id } => {
                self.on_start_intra_scheduling(scheduler_id);
            }
            IntraSchedulingDone { result } => {
                self.on_intra_scheduling_done(result);
            }
            EndInstances { instance_ids } => {
                self.on_end_instances(instance_ids);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sugars::{rc, refcell};

    use geosim_core::Simulation;

    use crate::load_balancer::RoundLoadBalancer;
    use crate::record::MemoryRecorder;
    use crate::request::Instance;
    use crate::state_manager::{HostCapacity, PartitionRangesManager};

    fn datacenter(sim: &mut Simulation, registry: Rc<RefCell<RequestRegistry>>, partition_num: u32) -> Datacenter {
        let cis_ctx = sim.create_context("cis");
        let ctx = sim.create_context("dc1");
        let capacity = HostCapacity {
            cpu: 8,
            ram: 16,
            storage: 16,
            bw: 16,
        };
        let ranges = PartitionRangesManager::average_divided(2, partition_num);
        let states = StatesManager::new(2, capacity, ranges, 0.);
        Datacenter::new(
            ctx,
            cis_ctx.id(),
            "eu",
            registry,
            rc!(refcell!(NetworkTopology::new())),
            rc!(refcell!(MemoryRecorder::new())),
            states,
            Vec::new(),
            Box::new(RoundLoadBalancer::new(0.1)),
            100,
            None,
            1.,
            1.,
        )
    }

    #[test]
    // A host-target group arriving without per-instance bookings is rejected
    // without charging any partition's conflict counter.
    fn missing_host_booking_rejects_without_a_conflict() {
        let mut sim = Simulation::new(123);
        let registry = rc!(refcell!(RequestRegistry::new()));
        let mut dc = datacenter(&mut sim, registry.clone(), 1);
        let (group, instance) = {
            let mut registry = registry.borrow_mut();
            let ur = registry.create_user_request(0., dc.id(), "area1", 1000.);
            let group = registry.create_group(ur, 100., 1);
            let instance = registry.create_instance(group, 4, 8, 8, 8, -1.);
            (group, instance)
        };
        dc.on_groups_to_hosts(0, 0, vec![group]);

        assert_eq!(dc.total_conflicts(), 0);
        let registry = registry.borrow();
        assert_eq!(registry.instance(instance).state, RequestState::Waiting);
        assert_eq!(registry.instance(instance).host_id, None);
    }

    #[test]
    // A booking invalidated by the real host state charges the conflict to
    // the partition of the conflicting host.
    fn host_conflict_is_charged_to_the_hosts_partition() {
        let mut sim = Simulation::new(123);
        let registry = rc!(refcell!(RequestRegistry::new()));
        let mut dc = datacenter(&mut sim, registry.clone(), 2);
        let filler = Instance::new(99, 0, 0, 8, 8, 8, 8, -1.);
        assert_eq!(dc.states.allocate_resource(1, &filler, 0.), AllocationVerdict::Success);
        let group = {
            let mut registry = registry.borrow_mut();
            let ur = registry.create_user_request(0., dc.id(), "area1", 1000.);
            let group = registry.create_group(ur, 100., 1);
            let instance = registry.create_instance(group, 4, 8, 8, 8, -1.);
            registry.instance_mut(instance).expected_host_id = Some(1);
            group
        };
        dc.on_groups_to_hosts(0, 0, vec![group]);

        assert_eq!(dc.partition_conflicts(), vec![(0, 0), (1, 1)]);
    }
}
