use serde::Serialize;

use crate::request::RequestState;

/// The smallest schedulable unit, a container-like resource consumer.
#[derive(Clone, Debug, Serialize)]
pub struct Instance {
    pub id: u32,
    pub group_id: u32,
    pub user_request_id: u32,
    /// Requested resource amounts.
    pub cpu: u32,
    pub ram: u32,
    pub storage: u32,
    pub bw: u32,
    /// Lifetime in ms; negative means "runs until the simulation ends".
    pub lifetime: f64,
    pub state: RequestState,
    /// Host proposed by an intra-scheduler, not committed yet.
    pub expected_host_id: Option<u32>,
    /// Host the instance is committed to.
    pub host_id: Option<u32>,
    pub start_time: Option<f64>,
    pub finish_time: Option<f64>,
}

impl Instance {
    pub fn new(id: u32, group_id: u32, user_request_id: u32, cpu: u32, ram: u32, storage: u32, bw: u32, lifetime: f64) -> Self {
        Self {
            id,
            group_id,
            user_request_id,
            cpu,
            ram,
            storage,
            bw,
            lifetime,
            state: RequestState::Waiting,
            expected_host_id: None,
            host_id: None,
            start_time: None,
            finish_time: None,
        }
    }
}
