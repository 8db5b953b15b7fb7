//! Cloud information service: the entry point for user requests, the zone
//! queues with their center inter-schedulers and the periodic state
//! synchronization between data centers and schedulers.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use geosim_core::cast;
use geosim_core::{log_debug, log_info};
use geosim_core::{Event, EventHandler, EventTag, Id, SimulationContext};

use crate::collaboration::CollaborationManager;
use crate::datacenter::Datacenter;
use crate::events::{
    ChangeCollaboration, EndInstances, FailedUserRequests, ForwardedGroups, GroupsToDatacenter, GroupsToHosts,
    HostScheduleConflicted, HostScheduleOk, InterSchedulingDone, NewUserRequests, StartInterScheduling, SynDcStates,
    ZoneLoadBalance,
};
use crate::inter_scheduler::{InterSchedulerResult, ScheduleTarget};
use crate::network::NetworkTopology;
use crate::record::Recorder;
use crate::request::{AllocatedEdge, RequestRegistry, RequestState};

/// Central coordinator of the geo-distributed cloud: receives user requests,
/// drives the zone-level inter-schedulers and dispatches their decisions to
/// the data centers.
pub struct CloudInformationService {
    ctx: SimulationContext,
    collaboration: CollaborationManager,
    registry: Rc<RefCell<RequestRegistry>>,
    network: Rc<RefCell<NetworkTopology>>,
    recorder: Rc<RefCell<dyn Recorder>>,
    datacenters: FxHashMap<Id, Rc<RefCell<Datacenter>>>,
    queue_batch_num: usize,
    change_collaboration_gap: Option<f64>,
}

impl CloudInformationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: SimulationContext,
        collaboration: CollaborationManager,
        registry: Rc<RefCell<RequestRegistry>>,
        network: Rc<RefCell<NetworkTopology>>,
        recorder: Rc<RefCell<dyn Recorder>>,
        queue_batch_num: usize,
        change_collaboration_gap: Option<f64>,
    ) -> Self {
        Self {
            ctx,
            collaboration,
            registry,
            network,
            recorder,
            datacenters: FxHashMap::default(),
            queue_batch_num,
            change_collaboration_gap,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn add_datacenter(&mut self, dc: Rc<RefCell<Datacenter>>) {
        let id = dc.borrow().id();
        self.datacenters.insert(id, dc);
    }

    pub fn collaboration(&self) -> &CollaborationManager {
        &self.collaboration
    }

    /// Arms the periodic synchronization chains: one per (zone, distinct
    /// finite gap), plus a single startup sync for data centers that never
    /// refresh, plus the collaboration reshuffle timer.
    pub fn start(&mut self) {
        for zone in self.collaboration.zones() {
            for gap in self.collaboration.syn_gaps_of_zone(zone) {
                self.ctx.emit_self(
                    EventTag::SynStateBetweenDc,
                    SynDcStates {
                        collaboration_id: zone,
                        gap,
                    },
                    0.,
                );
            }
            if !self.collaboration.dcs_with_gap(zone, f64::INFINITY).is_empty() {
                self.sync_zone_gap(zone, f64::INFINITY);
            }
        }
        if let Some(gap) = self.change_collaboration_gap {
            self.ctx
                .emit_self(EventTag::ChangeCollaborationSyn, ChangeCollaboration {}, gap);
        }
    }

    /// Pushes the listed data centers' snapshots into every center scheduler
    /// of the zone.
    fn sync_zone_gap(&mut self, zone: u32, gap: f64) {
        let dcs = self.collaboration.dcs_with_gap(zone, gap);
        let now = self.ctx.time();
        for scheduler in self.collaboration.schedulers_mut(zone).iter_mut() {
            let with_hosts = scheduler.target == ScheduleTarget::Host;
            for &dc in &dcs {
                let view = self.datacenters[&dc].borrow().state_view(now, with_hosts);
                scheduler.sync_dc_state(view);
            }
        }
    }

    fn queue_groups(&mut self, group_ids: &[u32]) {
        let mut zones = Vec::new();
        {
            let registry = self.registry.borrow();
            for &group_id in group_ids {
                let origin = registry.user_request(registry.group(group_id).user_request_id).belong_datacenter;
                let zone = self.collaboration.zone_of(origin);
                self.collaboration.queue_groups(zone, &[group_id]);
                if !zones.contains(&zone) {
                    zones.push(zone);
                }
            }
        }
        for zone in zones {
            self.ctx
                .emit_self_now(EventTag::LoadBalanceSend, ZoneLoadBalance { collaboration_id: zone });
        }
    }

    fn on_new_user_requests(&mut self, request_ids: Vec<u32>) {
        let mut group_ids = Vec::new();
        {
            let registry = self.registry.borrow();
            for &request_id in &request_ids {
                let ur = registry.user_request(request_id);
                self.recorder.borrow_mut().user_request_submitted(ur);
                group_ids.extend_from_slice(&ur.group_ids);
            }
        }
        log_debug!(
            self.ctx,
            "received {} user requests with {} groups",
            request_ids.len(),
            group_ids.len()
        );
        self.queue_groups(&group_ids);
    }

    fn on_zone_load_balance(&mut self, zone: u32) {
        if self.collaboration.queue_is_empty(zone) {
            return;
        }
        let batch = self.collaboration.pop_groups(zone, self.queue_batch_num);
        let buckets = self.collaboration.balance(zone, batch);
        let cost = self.collaboration.balance_cost(zone);
        let mut kicked = Vec::new();
        for (scheduler, bucket) in self.collaboration.schedulers_mut(zone).iter_mut().zip(buckets) {
            if !bucket.is_empty() {
                scheduler.add_groups(&bucket, false);
                kicked.push(scheduler.id);
            }
        }
        for scheduler_id in kicked {
            if !self.collaboration.is_busy(zone, scheduler_id) {
                self.collaboration.set_busy(zone, scheduler_id, true);
                self.ctx.emit_self(
                    EventTag::InterScheduleBegin,
                    StartInterScheduling {
                        collaboration_id: zone,
                        scheduler_id,
                    },
                    cost,
                );
            }
        }
        if !self.collaboration.queue_is_empty(zone) {
            self.ctx
                .emit_self(EventTag::LoadBalanceSend, ZoneLoadBalance { collaboration_id: zone }, cost);
        }
    }

    fn on_start_inter_scheduling(&mut self, zone: u32, scheduler_id: u32) {
        let now = self.ctx.time();
        // live refresh of zero-gap data centers
        {
            let scheduler = self.collaboration.scheduler_mut(zone, scheduler_id);
            let with_hosts = scheduler.target == ScheduleTarget::Host;
            for dc in scheduler.synced_dcs() {
                if scheduler.dc_syn_gap(dc) == 0. {
                    let view = self.datacenters[&dc].borrow().state_view(now, with_hosts);
                    scheduler.sync_dc_state(view);
                }
            }
        }
        let scheduler = self.collaboration.scheduler_mut(zone, scheduler_id);
        if scheduler.queues_empty() {
            self.collaboration.set_busy(zone, scheduler_id, false);
            return;
        }
        let result = scheduler.schedule(&mut self.registry.borrow_mut(), &self.network.borrow(), now);
        let delay = result.schedule_time;
        self.ctx
            .emit_self(EventTag::InterScheduleEnd, InterSchedulingDone { result }, delay);
    }

    fn on_inter_scheduling_done(&mut self, result: InterSchedulerResult) {
        let zone = result.collaboration_id;
        let scheduler_id = result.scheduler_id;
        let now = self.ctx.time();
        let mut failed_groups = result.failed;
        for (dc, group_ids) in result.scheduled {
            let mut accepted = Vec::new();
            for group_id in group_ids {
                let (user_request_id, failed_request) = {
                    let registry = self.registry.borrow();
                    let user_request_id = registry.group(group_id).user_request_id;
                    (
                        user_request_id,
                        registry.user_request(user_request_id).state == RequestState::Failed,
                    )
                };
                if failed_request {
                    continue;
                }
                if self.try_allocate_group_bw(group_id, dc, now) {
                    self.registry.borrow_mut().group_mut(group_id).assign_to(dc);
                    accepted.push(group_id);
                } else {
                    self.registry
                        .borrow_mut()
                        .user_request_mut(user_request_id)
                        .add_fail_reason("bandwidth reservation failed");
                    failed_groups.push(group_id);
                }
            }
            if accepted.is_empty() {
                continue;
            }
            log_debug!(self.ctx, "dispatching {} groups to {}", accepted.len(), self.ctx.lookup_name(dc));
            match result.target {
                ScheduleTarget::Datacenter { support_forward } => {
                    self.ctx.emit_now(
                        EventTag::ScheduleToDcNoForward,
                        GroupsToDatacenter {
                            group_ids: accepted,
                            support_forward,
                        },
                        dc,
                    );
                }
                ScheduleTarget::Host => {
                    self.ctx.emit_now(
                        EventTag::ScheduleToDcHost,
                        GroupsToHosts {
                            collaboration_id: zone,
                            scheduler_id,
                            group_ids: accepted,
                        },
                        dc,
                    );
                }
            }
        }
        self.fail_user_requests(&result.outdated, "schedule outdated");
        self.handle_failed_groups(zone, scheduler_id, failed_groups);
        if self.collaboration.scheduler_mut(zone, scheduler_id).queues_empty() {
            self.collaboration.set_busy(zone, scheduler_id, false);
        } else {
            self.ctx.emit_self_now(
                EventTag::InterScheduleBegin,
                StartInterScheduling {
                    collaboration_id: zone,
                    scheduler_id,
                },
            );
        }
    }

    /// Reserves link bandwidth towards the group's already-placed neighbours,
    /// all or nothing.
    fn try_allocate_group_bw(&mut self, group_id: u32, dc: Id, now: f64) -> bool {
        let (user_request_id, needed) = {
            let registry = self.registry.borrow();
            let group = registry.group(group_id);
            let ur = registry.user_request(group.user_request_id);
            let mut needed: Vec<AllocatedEdge> = Vec::new();
            for edge in ur.graph.edges_of(group_id) {
                let (peer, src_is_self) = if edge.src_group == group_id {
                    (edge.dst_group, true)
                } else {
                    (edge.src_group, false)
                };
                if let Some(peer_dc) = registry.group(peer).receive_datacenter {
                    if peer_dc != dc {
                        let (src_dc, dst_dc) = if src_is_self { (dc, peer_dc) } else { (peer_dc, dc) };
                        needed.push(AllocatedEdge {
                            src_group: edge.src_group,
                            dst_group: edge.dst_group,
                            src_dc,
                            dst_dc,
                            bw: edge.required_bw,
                        });
                    }
                }
            }
            (group.user_request_id, needed)
        };
        if needed.is_empty() {
            return true;
        }
        let mut network = self.network.borrow_mut();
        let mut reserved = Vec::new();
        for edge in &needed {
            if network.allocate_bw(edge.src_dc, edge.dst_dc, edge.bw) {
                reserved.push(*edge);
            } else {
                for taken in reserved {
                    network.release_bw(taken.src_dc, taken.dst_dc, taken.bw);
                }
                return false;
            }
        }
        drop(network);
        let mut registry = self.registry.borrow_mut();
        for edge in needed {
            registry.user_request_mut(user_request_id).allocated_edges.push(edge);
            self.recorder.borrow_mut().bw_allocated(&edge, now);
        }
        true
    }

    /// Groups the inter level could not place: retry while the budget lasts,
    /// fail the owning user requests afterwards.
    fn handle_failed_groups(&mut self, zone: u32, scheduler_id: u32, group_ids: Vec<u32>) {
        if group_ids.is_empty() {
            return;
        }
        let mut retry = Vec::new();
        let mut failed_requests = Vec::new();
        {
            let mut registry = self.registry.borrow_mut();
            for group_id in group_ids {
                let user_request_id = registry.group(group_id).user_request_id;
                if registry.user_request(user_request_id).state == RequestState::Failed {
                    continue;
                }
                if registry.group_mut(group_id).mark_retry() {
                    retry.push(group_id);
                } else if !failed_requests.contains(&user_request_id) {
                    failed_requests.push(user_request_id);
                }
            }
        }
        if !retry.is_empty() {
            let scheduler = self.collaboration.scheduler_mut(zone, scheduler_id);
            scheduler.add_groups(&retry, true);
            if !self.collaboration.is_busy(zone, scheduler_id) {
                self.collaboration.set_busy(zone, scheduler_id, true);
                self.ctx.emit_self_now(
                    EventTag::InterScheduleBegin,
                    StartInterScheduling {
                        collaboration_id: zone,
                        scheduler_id,
                    },
                );
            }
        }
        self.fail_user_requests(&failed_requests, "retry budget exhausted");
    }

    /// Terminally fails the user requests: releases their link reservations,
    /// force-stops their running instances and records the outcome.
    fn fail_user_requests(&mut self, request_ids: &[u32], reason: &str) {
        let now = self.ctx.time();
        for &request_id in request_ids {
            if self.registry.borrow().user_request(request_id).state.is_terminal() {
                continue;
            }
            let cleanup = self.registry.borrow_mut().fail_user_request(request_id, now, reason);
            {
                let mut network = self.network.borrow_mut();
                for edge in &cleanup.released_edges {
                    network.release_bw(edge.src_dc, edge.dst_dc, edge.bw);
                    self.recorder.borrow_mut().bw_released(edge, now);
                }
            }
            let mut by_dc: Vec<(Id, Vec<u32>)> = cleanup.running_by_dc.into_iter().collect();
            by_dc.sort_by_key(|(dc, _)| *dc);
            for (dc, instance_ids) in by_dc {
                self.ctx.emit_now(EventTag::EndInstanceRun, EndInstances { instance_ids }, dc);
            }
            log_info!(self.ctx, "user request {} failed: {}", request_id, reason);
            self.recorder
                .borrow_mut()
                .user_request_finished(self.registry.borrow().user_request(request_id));
        }
    }

    fn on_host_schedule_conflicted(&mut self, zone: u32, scheduler_id: u32, group_ids: Vec<u32>) {
        let now = self.ctx.time();
        {
            let mut registry = self.registry.borrow_mut();
            let mut network = self.network.borrow_mut();
            for &group_id in &group_ids {
                let user_request_id = registry.group(group_id).user_request_id;
                for edge in registry.take_group_edges(user_request_id, group_id) {
                    network.release_bw(edge.src_dc, edge.dst_dc, edge.bw);
                    self.recorder.borrow_mut().bw_released(&edge, now);
                }
                registry.group_mut(group_id).reset_to_waiting();
            }
        }
        self.handle_failed_groups(zone, scheduler_id, group_ids);
    }

    fn on_syn_dc_states(&mut self, zone: u32, gap: f64) {
        self.sync_zone_gap(zone, gap);
        self.ctx.emit_self(
            EventTag::SynStateBetweenDc,
            SynDcStates {
                collaboration_id: zone,
                gap,
            },
            gap,
        );
    }

    fn on_change_collaboration(&mut self) {
        self.collaboration.change_collaboration();
        if let Some(gap) = self.change_collaboration_gap {
            self.ctx
                .emit_self(EventTag::ChangeCollaborationSyn, ChangeCollaboration {}, gap);
        }
    }
}

impl EventHandler for CloudInformationService {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            NewUserRequests { request_ids } => {
                self.on_new_user_requests(request_ids);
            }
            ForwardedGroups { group_ids } => {
                self.queue_groups(&group_ids);
            }
            ZoneLoadBalance { collaboration_id } => {
                self.on_zone_load_balance(collaboration_id);
            }
            StartInterScheduling {
                collaboration_id,
                scheduler_id,
            } => {
                self.on_start_inter_scheduling(collaboration_id, scheduler_id);
            }
            InterSchedulingDone { result } => {
                self.on_inter_scheduling_done(result);
            }
            HostScheduleOk { group_ids } => {
                log_debug!(self.ctx, "{} host-level groups accepted", group_ids.len());
            }
            HostScheduleConflicted {
                collaboration_id,
                scheduler_id,
                group_ids,
            } => {
                self.on_host_schedule_conflicted(collaboration_id, scheduler_id, group_ids);
            }
            FailedUserRequests { request_ids, reason } => {
                self.fail_user_requests(&request_ids, &reason);
            }
            SynDcStates { collaboration_id, gap } => {
                self.on_syn_dc_states(collaboration_id, gap);
            }
            ChangeCollaboration {} => {
                self.on_change_collaboration();
            }
        })
    }
}
