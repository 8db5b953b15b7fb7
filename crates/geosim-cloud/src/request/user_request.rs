use serde::Serialize;

use geosim_core::Id;

use crate::request::{AffinityGraph, RequestState};

/// Bandwidth actually reserved on an inter-datacenter link for one affinity
/// edge of a scheduled user request.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct AllocatedEdge {
    pub src_group: u32,
    pub dst_group: u32,
    pub src_dc: Id,
    pub dst_dc: Id,
    pub bw: f64,
}

/// Top-level unit of user demand: a set of instance groups plus an affinity
/// graph describing inter-group bandwidth needs.
#[derive(Clone, Debug, Serialize)]
pub struct UserRequest {
    pub id: u32,
    pub submit_time: f64,
    pub finish_time: Option<f64>,
    /// Data center closest to the submitting user.
    pub belong_datacenter: Id,
    /// Geographic area the user submits from.
    pub area: String,
    pub state: RequestState,
    pub group_ids: Vec<u32>,
    pub graph: AffinityGraph,
    /// Scheduling must finish within this many ms after submission.
    pub schedule_delay_limit: f64,
    pub fail_reasons: Vec<String>,
    /// Link reservations currently held by this request.
    pub allocated_edges: Vec<AllocatedEdge>,
}

impl UserRequest {
    pub fn new(id: u32, submit_time: f64, belong_datacenter: Id, area: &str, schedule_delay_limit: f64) -> Self {
        Self {
            id,
            submit_time,
            finish_time: None,
            belong_datacenter,
            area: area.to_owned(),
            state: RequestState::Waiting,
            group_ids: Vec::new(),
            graph: AffinityGraph::new(),
            schedule_delay_limit,
            fail_reasons: Vec::new(),
            allocated_edges: Vec::new(),
        }
    }

    /// Whether scheduling work for this request ran out of its time budget.
    pub fn is_outdated(&self, now: f64) -> bool {
        now - self.submit_time > self.schedule_delay_limit
    }

    pub fn add_fail_reason(&mut self, reason: &str) {
        self.fail_reasons.push(reason.to_owned());
    }
}
