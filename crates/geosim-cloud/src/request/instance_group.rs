use serde::Serialize;

use geosim_core::Id;

use crate::request::RequestState;

/// A co-located set of instances. The group is the unit of inter-datacenter
/// scheduling: all of its instances land in one data center.
#[derive(Clone, Debug, Serialize)]
pub struct InstanceGroup {
    pub id: u32,
    pub user_request_id: u32,
    pub instance_ids: Vec<u32>,
    /// Largest tolerable network delay from the request origin, ms.
    pub access_latency: f64,
    /// Resource demand sums over the member instances.
    pub cpu_sum: u64,
    pub ram_sum: u64,
    pub storage_sum: u64,
    pub bw_sum: u64,
    pub retry_num: u32,
    pub retry_limit: u32,
    /// Data center the group is assigned to; set exactly while the group is
    /// in `Scheduling` or `Running`.
    pub receive_datacenter: Option<Id>,
    pub state: RequestState,
    pub finish_time: Option<f64>,
}

impl InstanceGroup {
    pub fn new(id: u32, user_request_id: u32, access_latency: f64, retry_limit: u32) -> Self {
        Self {
            id,
            user_request_id,
            instance_ids: Vec::new(),
            access_latency,
            cpu_sum: 0,
            ram_sum: 0,
            storage_sum: 0,
            bw_sum: 0,
            retry_num: 0,
            retry_limit,
            receive_datacenter: None,
            state: RequestState::Waiting,
            finish_time: None,
        }
    }

    /// Counts one more scheduling failure. Returns `false` when the retry
    /// budget is exhausted.
    pub fn mark_retry(&mut self) -> bool {
        self.retry_num += 1;
        self.retry_num <= self.retry_limit
    }

    /// Assigns the group to a data center for scheduling.
    pub fn assign_to(&mut self, dc: Id) {
        self.receive_datacenter = Some(dc);
        self.state = RequestState::Scheduling;
    }

    /// Returns the group to the waiting state, dropping the assignment.
    pub fn reset_to_waiting(&mut self) {
        self.receive_datacenter = None;
        self.state = RequestState::Waiting;
    }
}
