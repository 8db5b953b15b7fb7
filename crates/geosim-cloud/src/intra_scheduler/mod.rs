//! Intra-datacenter scheduling: picking hosts for instances against a
//! possibly-stale partitioned state view.

pub mod policies;

use std::collections::VecDeque;

use serde::Serialize;

use crate::request::{RequestRegistry, RequestState};
use crate::state_manager::SynState;

pub use policies::{placement_policy_resolver, PlacementPolicy};

/// Placement proposals of one intra-scheduling round.
#[derive(Clone, Debug, Serialize)]
pub struct IntraSchedulerResult {
    pub scheduler_id: u32,
    /// (instance id, proposed host id), in decision order.
    pub scheduled: Vec<(u32, u32)>,
    /// Instances the policy found no suitable host for.
    pub failed: Vec<u32>,
}

/// One intra-scheduler of a data center: an instance queue plus a placement
/// policy working against the scheduler's partition view.
pub struct IntraScheduler {
    pub id: u32,
    pub name: String,
    pub first_partition: u32,
    pub partition_num: u32,
    /// Delay charged per scheduling round, ms.
    pub schedule_cost_time: f64,
    pub batch_num: usize,
    queue: VecDeque<u32>,
    retry_queue: VecDeque<u32>,
    policy: Box<dyn PlacementPolicy>,
    // view index inside the owning data center's states manager
    state_index: usize,
}

impl IntraScheduler {
    pub fn new(
        id: u32,
        name: &str,
        policy: Box<dyn PlacementPolicy>,
        first_partition: u32,
        partition_num: u32,
        schedule_cost_time: f64,
        batch_num: usize,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            first_partition,
            partition_num,
            schedule_cost_time,
            batch_num,
            queue: VecDeque::new(),
            retry_queue: VecDeque::new(),
            policy,
            state_index: 0,
        }
    }

    pub fn set_state_index(&mut self, index: usize) {
        self.state_index = index;
    }

    pub fn state_index(&self) -> usize {
        self.state_index
    }

    pub fn add_instances(&mut self, instance_ids: &[u32], retry: bool) {
        if retry {
            self.retry_queue.extend(instance_ids);
        } else {
            self.queue.extend(instance_ids);
        }
    }

    pub fn queues_empty(&self) -> bool {
        self.queue.is_empty() && self.retry_queue.is_empty()
    }

    /// Takes the next batch, retries first.
    pub fn pop_batch(&mut self) -> Vec<u32> {
        let mut batch = Vec::with_capacity(self.batch_num.min(self.queue.len() + self.retry_queue.len()));
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

    /// Decides hosts for the batch. Each accepted proposal is booked into the
    /// view so later decisions of the same round see it; instances of already
    /// failed user requests are dropped.
    pub fn schedule(&mut self, instance_ids: &[u32], view: &mut SynState, registry: &mut RequestRegistry) -> IntraSchedulerResult {
        let mut result = IntraSchedulerResult {
            scheduler_id: self.id,
            scheduled: Vec::new(),
            failed: Vec::new(),
        };
        for &instance_id in instance_ids {
            if registry.user_request(registry.instance(instance_id).user_request_id).state == RequestState::Failed {
                continue;
            }
            let instance = registry.instance(instance_id).clone();
            match self.policy.select_host(&instance, view) {
                Some(host_id) => {
                    view.allocate_tmp_resource(host_id, &instance);
                    registry.instance_mut(instance_id).expected_host_id = Some(host_id);
                    result.scheduled.push((instance_id, host_id));
                }
                None => result.failed.push(instance_id),
            }
        }
        result
    }
}
