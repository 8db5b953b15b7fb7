use rustc_hash::FxHashMap;

use geosim_core::Id;

use crate::request::{AllocatedEdge, Instance, InstanceGroup, RequestState, UserRequest};

/// Side effects of terminally failing a user request: instances that are
/// still running and must be force-stopped at their data centers, and link
/// reservations to hand back.
pub struct FailCleanup {
    pub running_by_dc: FxHashMap<Id, Vec<u32>>,
    pub released_edges: Vec<AllocatedEdge>,
}

/// Central store of user requests, instance groups and instances, addressed
/// by id.
#[derive(Default)]
pub struct RequestRegistry {
    user_requests: FxHashMap<u32, UserRequest>,
    groups: FxHashMap<u32, InstanceGroup>,
    instances: FxHashMap<u32, Instance>,
    next_user_request_id: u32,
    next_group_id: u32,
    next_instance_id: u32,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_user_request(&mut self, submit_time: f64, belong_dc: Id, area: &str, schedule_delay_limit: f64) -> u32 {
        let id = self.next_user_request_id;
        self.next_user_request_id += 1;
        self.user_requests
            .insert(id, UserRequest::new(id, submit_time, belong_dc, area, schedule_delay_limit));
        id
    }

    pub fn create_group(&mut self, user_request_id: u32, access_latency: f64, retry_limit: u32) -> u32 {
        let id = self.next_group_id;
        self.next_group_id += 1;
        self.groups
            .insert(id, InstanceGroup::new(id, user_request_id, access_latency, retry_limit));
        self.user_request_mut(user_request_id).group_ids.push(id);
        id
    }

    pub fn create_instance(&mut self, group_id: u32, cpu: u32, ram: u32, storage: u32, bw: u32, lifetime: f64) -> u32 {
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        let user_request_id = self.group(group_id).user_request_id;
        self.instances
            .insert(id, Instance::new(id, group_id, user_request_id, cpu, ram, storage, bw, lifetime));
        let group = self.group_mut(group_id);
        group.instance_ids.push(id);
        group.cpu_sum += cpu as u64;
        group.ram_sum += ram as u64;
        group.storage_sum += storage as u64;
        group.bw_sum += bw as u64;
        id
    }

    pub fn add_edge(&mut self, user_request_id: u32, src_group: u32, dst_group: u32, required_bw: f64) {
        self.user_request_mut(user_request_id)
            .graph
            .add_edge(src_group, dst_group, required_bw);
    }

    pub fn user_request(&self, id: u32) -> &UserRequest {
        &self.user_requests[&id]
    }

    pub fn user_request_mut(&mut self, id: u32) -> &mut UserRequest {
        self.user_requests.get_mut(&id).unwrap()
    }

    pub fn group(&self, id: u32) -> &InstanceGroup {
        &self.groups[&id]
    }

    pub fn group_mut(&mut self, id: u32) -> &mut InstanceGroup {
        self.groups.get_mut(&id).unwrap()
    }

    pub fn instance(&self, id: u32) -> &Instance {
        &self.instances[&id]
    }

    pub fn instance_mut(&mut self, id: u32) -> &mut Instance {
        self.instances.get_mut(&id).unwrap()
    }

    /// Terminally fails a user request and every non-terminal group and
    /// instance under it. Running instances stay running here; the caller
    /// force-stops them at their data centers using the returned cleanup.
    pub fn fail_user_request(&mut self, id: u32, now: f64, reason: &str) -> FailCleanup {
        let mut cleanup = FailCleanup {
            running_by_dc: FxHashMap::default(),
            released_edges: Vec::new(),
        };
        let group_ids = {
            let ur = self.user_request_mut(id);
            if ur.state.is_terminal() {
                return cleanup;
            }
            ur.state = RequestState::Failed;
            ur.finish_time = Some(now);
            ur.add_fail_reason(reason);
            cleanup.released_edges = std::mem::take(&mut ur.allocated_edges);
            ur.group_ids.clone()
        };
        for group_id in group_ids {
            let (instance_ids, receive_dc, terminal) = {
                let group = self.group(group_id);
                (group.instance_ids.clone(), group.receive_datacenter, group.state.is_terminal())
            };
            if terminal {
                continue;
            }
            let group = self.group_mut(group_id);
            group.state = RequestState::Failed;
            group.finish_time = Some(now);
            for instance_id in instance_ids {
                let instance = self.instance_mut(instance_id);
                match instance.state {
                    RequestState::Running => {
                        // force-stopped by the owning data center
                        if let Some(dc) = receive_dc {
                            cleanup.running_by_dc.entry(dc).or_default().push(instance_id);
                        }
                    }
                    RequestState::Success | RequestState::Failed => {}
                    _ => {
                        instance.state = RequestState::Failed;
                        instance.finish_time = Some(now);
                    }
                }
            }
        }
        cleanup
    }

    /// Marks the group finished once every instance succeeded.
    /// Returns `true` on the transition.
    pub fn try_finish_group(&mut self, group_id: u32, now: f64) -> bool {
        let done = {
            let group = self.group(group_id);
            !group.state.is_terminal()
                && group
                    .instance_ids
                    .iter()
                    .all(|id| self.instance(*id).state == RequestState::Success)
        };
        if done {
            let group = self.group_mut(group_id);
            group.state = RequestState::Success;
            group.finish_time = Some(now);
        }
        done
    }

    /// Marks the user request finished once every group succeeded.
    /// Returns `true` on the transition.
    pub fn try_finish_user_request(&mut self, id: u32, now: f64) -> bool {
        let done = {
            let ur = self.user_request(id);
            !ur.state.is_terminal()
                && ur
                    .group_ids
                    .iter()
                    .all(|gid| self.group(*gid).state == RequestState::Success)
        };
        if done {
            let ur = self.user_request_mut(id);
            ur.state = RequestState::Success;
            ur.finish_time = Some(now);
        }
        done
    }

    /// Removes and returns the link reservations touching the group, so the
    /// peer group does not release them a second time.
    pub fn take_group_edges(&mut self, user_request_id: u32, group_id: u32) -> Vec<AllocatedEdge> {
        let ur = self.user_request_mut(user_request_id);
        let mut taken = Vec::new();
        ur.allocated_edges.retain(|e| {
            if e.src_group == group_id || e.dst_group == group_id {
                taken.push(*e);
                false
            } else {
                true
            }
        });
        taken
    }

    /// (successful, failed, total) user request counts.
    pub fn request_counts(&self) -> (usize, usize, usize) {
        let mut success = 0;
        let mut failed = 0;
        for ur in self.user_requests.values() {
            match ur.state {
                RequestState::Success => success += 1,
                RequestState::Failed => failed += 1,
                _ => {}
            }
        }
        (success, failed, self.user_requests.len())
    }

    pub fn user_request_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.user_requests.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
