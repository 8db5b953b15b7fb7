//! Inter-datacenter scheduling: assigning instance groups to data centers
//! from periodically synchronized state snapshots.

pub mod policies;

use std::collections::VecDeque;

use rand::prelude::*;
use rand_pcg::Pcg64;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use geosim_core::Id;

use crate::network::NetworkTopology;
use crate::request::{InstanceGroup, RequestRegistry, RequestState, UserRequest};
use crate::state_manager::{HostState, ResourceSums, SimpleState};

pub use policies::{inter_policy_resolver, InterSchedulePolicy, SelectCtx};

/// What an inter-scheduler decides per group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ScheduleTarget {
    /// Pick a data center; its intra-schedulers pick hosts. When
    /// `support_forward` is set, an overloaded receiver may push groups back
    /// into the zone queue.
    Datacenter { support_forward: bool },
    /// Pick a data center and hosts in one step; the receiver only validates.
    Host,
}

/// Default scheduling target of a policy token.
pub fn default_target(token: &str) -> ScheduleTarget {
    match token {
        "Direct" | "MinTCODirect" | "Heuristic" | "HFRS" | "RFHS" => ScheduleTarget::Datacenter { support_forward: false },
        _ => ScheduleTarget::Datacenter { support_forward: true },
    }
}

/// Cached snapshot of one data center's coarse state, refreshed by
/// SYN_STATE_BETWEEN_DC deliveries.
#[derive(Clone)]
pub struct DcStateView {
    pub dc_id: Id,
    pub synced_at: f64,
    pub host_num: u32,
    pub simple_state: SimpleState,
    pub totals: ResourceSums,
    pub cpu_unit_price: f64,
    pub ram_unit_price: f64,
    /// Per-host states, synced only for host-target schedulers. The copy
    /// doubles as the optimistic overlay between syncs.
    pub host_states: Option<Vec<HostState>>,
}

impl DcStateView {
    /// Mean free resource share of the whole data center.
    pub fn free_share(&self) -> f64 {
        let cpu = self.simple_state.cpu_available_sum as f64 / self.totals.cpu.max(1) as f64;
        let ram = self.simple_state.ram_available_sum as f64 / self.totals.ram.max(1) as f64;
        let storage = self.simple_state.storage_available_sum as f64 / self.totals.storage.max(1) as f64;
        let bw = self.simple_state.bw_available_sum as f64 / self.totals.bw.max(1) as f64;
        (cpu + ram + storage + bw) / 4.
    }
}

/// Outcome of one inter-scheduling round.
#[derive(Clone, Debug, Serialize)]
pub struct InterSchedulerResult {
    pub collaboration_id: u32,
    pub scheduler_id: u32,
    pub target: ScheduleTarget,
    /// Target data center -> group ids, ascending by data center id.
    pub scheduled: Vec<(Id, Vec<u32>)>,
    /// Groups with no candidate or no policy decision.
    pub failed: Vec<u32>,
    /// User requests that ran out of their scheduling time budget.
    pub outdated: Vec<u32>,
    /// Delay to charge for the round, ms.
    pub schedule_time: f64,
}

/// One inter-scheduler: group queues, per-DC cached snapshots and a pluggable
/// selection policy behind the shared filtering pipeline.
pub struct InterScheduler {
    pub id: u32,
    pub name: String,
    pub collaboration_id: u32,
    pub target: ScheduleTarget,
    pub schedule_cost_time: f64,
    pub batch_num: usize,
    policy: Box<dyn InterSchedulePolicy>,
    queue: VecDeque<u32>,
    retry_queue: VecDeque<u32>,
    dc_views: FxHashMap<Id, DcStateView>,
    dc_syn_gaps: FxHashMap<Id, f64>,
    rng: Pcg64,
}

impl InterScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        name: &str,
        collaboration_id: u32,
        policy: Box<dyn InterSchedulePolicy>,
        target: ScheduleTarget,
        schedule_cost_time: f64,
        batch_num: usize,
        seed: u64,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            collaboration_id,
            target,
            schedule_cost_time,
            batch_num,
            policy,
            queue: VecDeque::new(),
            retry_queue: VecDeque::new(),
            dc_views: FxHashMap::default(),
            dc_syn_gaps: FxHashMap::default(),
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    pub fn add_groups(&mut self, group_ids: &[u32], retry: bool) {
        if retry {
            self.retry_queue.extend(group_ids);
        } else {
            self.queue.extend(group_ids);
        }
    }

    pub fn queues_empty(&self) -> bool {
        self.queue.is_empty() && self.retry_queue.is_empty()
    }

    pub fn set_dc_syn_gap(&mut self, dc: Id, gap: f64) {
        self.dc_syn_gaps.insert(dc, gap);
    }

    pub fn dc_syn_gap(&self, dc: Id) -> f64 {
        self.dc_syn_gaps.get(&dc).copied().unwrap_or(0.)
    }

    /// Forgets a data center after it left this scheduler's zone.
    pub fn remove_dc(&mut self, dc: Id) {
        self.dc_syn_gaps.remove(&dc);
        self.dc_views.remove(&dc);
    }

    pub fn synced_dcs(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.dc_syn_gaps.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Replaces the cached snapshot of one data center.
    pub fn sync_dc_state(&mut self, view: DcStateView) {
        self.dc_views.insert(view.dc_id, view);
    }

    /// Runs one scheduling round over the next queue batch.
    pub fn schedule(&mut self, registry: &mut RequestRegistry, network: &NetworkTopology, now: f64) -> InterSchedulerResult {
        let mut scheduled: FxHashMap<Id, Vec<u32>> = FxHashMap::default();
        let mut failed = Vec::new();
        let mut outdated = Vec::new();
        let mut outdated_seen = FxHashSet::default();
        for group_id in self.pop_batch() {
            let group = registry.group(group_id).clone();
            let request = registry.user_request(group.user_request_id).clone();
            if request.state == RequestState::Failed {
                continue;
            }
            if request.is_outdated(now) {
                if outdated_seen.insert(request.id) {
                    outdated.push(request.id);
                }
                continue;
            }
            let candidates = self.filter_candidates(&group, &request, registry, network);
            if candidates.is_empty() {
                registry
                    .user_request_mut(group.user_request_id)
                    .add_fail_reason("no candidate");
                failed.push(group_id);
                continue;
            }
            let flow_scores = self.flow_scores(&group, &request, &candidates, registry, network);
            let ctx = SelectCtx {
                group: &group,
                request: &request,
                flow_scores: &flow_scores,
            };
            let views: Vec<&DcStateView> = candidates.iter().map(|dc| &self.dc_views[dc]).collect();
            match self.policy.select_dc(&ctx, &views, &mut self.rng) {
                Some(dc) => {
                    if self.target == ScheduleTarget::Host && !self.book_hosts(dc, &group, registry) {
                        failed.push(group_id);
                    } else {
                        scheduled.entry(dc).or_default().push(group_id);
                    }
                }
                None => failed.push(group_id),
            }
        }
        let mut scheduled: Vec<(Id, Vec<u32>)> = scheduled.into_iter().collect();
        scheduled.sort_by_key(|(dc, _)| *dc);
        InterSchedulerResult {
            collaboration_id: self.collaboration_id,
            scheduler_id: self.id,
            target: self.target,
            scheduled,
            failed,
            outdated,
            schedule_time: self.schedule_cost_time,
        }
    }

    fn pop_batch(&mut self) -> Vec<u32> {
        let mut batch = Vec::new();
        while batch.len() < self.batch_num {
            if let Some(id) = self.retry_queue.pop_front() {
                batch.push(id);
            } else {
                break;
            }
        }
        while batch.len() < self.batch_num {
            if let Some(id) = self.queue.pop_front() {
                batch.push(id);
            } else {
                break;
            }
        }
        batch
    }

    /// Shared filtering pipeline: access latency, per-resource sums, then
    /// the (cpu, ram) pair histogram against the group's demand multiset.
    fn filter_candidates(
        &self,
        group: &InstanceGroup,
        request: &UserRequest,
        registry: &RequestRegistry,
        network: &NetworkTopology,
    ) -> Vec<Id> {
        let mut demand_pairs: FxHashMap<(u32, u32), u32> = FxHashMap::default();
        for &instance_id in &group.instance_ids {
            let instance = registry.instance(instance_id);
            *demand_pairs.entry((instance.cpu, instance.ram)).or_insert(0) += 1;
        }
        let mut candidates: Vec<Id> = self
            .dc_views
            .values()
            .filter(|view| {
                network.access_latency(&request.area, request.belong_datacenter, view.dc_id) <= group.access_latency
            })
            .filter(|view| {
                view.simple_state.cpu_available_sum >= group.cpu_sum
                    && view.simple_state.ram_available_sum >= group.ram_sum
                    && view.simple_state.storage_available_sum >= group.storage_sum
                    && view.simple_state.bw_available_sum >= group.bw_sum
            })
            .filter(|view| {
                demand_pairs
                    .iter()
                    .all(|(&(cpu, ram), &count)| view.simple_state.cpu_ram_host_count(cpu, ram) >= count)
            })
            .map(|view| view.dc_id)
            .collect();
        candidates.sort_unstable();
        candidates
    }

    /// Bandwidth headroom per candidate: the worst ratio of free link
    /// bandwidth to required bandwidth over edges towards already-placed
    /// neighbour groups.
    fn flow_scores(
        &self,
        group: &InstanceGroup,
        request: &UserRequest,
        candidates: &[Id],
        registry: &RequestRegistry,
        network: &NetworkTopology,
    ) -> FxHashMap<Id, f64> {
        let mut scores = FxHashMap::default();
        for &candidate in candidates {
            let mut worst = f64::INFINITY;
            for edge in request.graph.edges_of(group.id) {
                let peer = if edge.src_group == group.id { edge.dst_group } else { edge.src_group };
                if let Some(peer_dc) = registry.group(peer).receive_datacenter {
                    let ratio = if peer_dc == candidate {
                        f64::INFINITY
                    } else {
                        network.bw_between(candidate, peer_dc) / edge.required_bw
                    };
                    worst = worst.min(ratio);
                }
            }
            scores.insert(candidate, if worst.is_infinite() { 1. } else { worst });
        }
        scores
    }

    /// Host-target mode: first-fit the group's instances into the cached
    /// per-host snapshot of the chosen data center. All or nothing; the
    /// overlay sticks until the next sync so later rounds see it.
    fn book_hosts(&mut self, dc: Id, group: &InstanceGroup, registry: &mut RequestRegistry) -> bool {
        let view = self.dc_views.get_mut(&dc).unwrap();
        let hosts = match view.host_states.as_mut() {
            Some(hosts) => hosts,
            None => return false,
        };
        let mut booked: Vec<(u32, u32)> = Vec::new();
        for &instance_id in &group.instance_ids {
            let instance = registry.instance(instance_id).clone();
            let found = hosts.iter().position(|state| state.can_fit(&instance));
            match found {
                Some(host_idx) => {
                    hosts[host_idx].allocate(&instance);
                    booked.push((instance_id, host_idx as u32));
                }
                None => {
                    for (instance_id, host_idx) in booked {
                        let instance = registry.instance(instance_id).clone();
                        hosts[host_idx as usize].release(&instance);
                    }
                    return false;
                }
            }
        }
        for (instance_id, host_id) in booked {
            registry.instance_mut(instance_id).expected_host_id = Some(host_id);
        }
        true
    }
}
