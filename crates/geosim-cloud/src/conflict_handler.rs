//! Commit point between optimistic intra-scheduler proposals and the real
//! host state.

use std::collections::BTreeMap;

use crate::intra_scheduler::IntraSchedulerResult;
use crate::request::{RequestRegistry, RequestState};
use crate::state_manager::{AllocationVerdict, StatesManager};

/// Accepted and rejected proposals of one commit round.
#[derive(Debug, Default)]
pub struct CommitResult {
    /// (instance id, host id) pairs now holding real resources.
    pub committed: Vec<(u32, u32)>,
    /// Instances whose proposed host could no longer fit them.
    pub conflicted: Vec<u32>,
}

/// Validates placement proposals against the real state in deterministic
/// (scheduler id, submission) order and counts rejections per partition.
pub struct ConflictHandler {
    partition_conflicts: BTreeMap<u32, u64>,
}

impl ConflictHandler {
    pub fn new(partition_num: u32) -> Self {
        Self {
            partition_conflicts: (0..partition_num).map(|p| (p, 0)).collect(),
        }
    }

    pub fn commit(
        &mut self,
        mut results: Vec<IntraSchedulerResult>,
        states: &mut StatesManager,
        registry: &RequestRegistry,
        now: f64,
    ) -> CommitResult {
        results.sort_by_key(|r| r.scheduler_id);
        let mut commit = CommitResult::default();
        for result in results {
            for (instance_id, host_id) in result.scheduled {
                let instance = registry.instance(instance_id);
                // the request may have failed terminally while this proposal
                // was in flight; such instances are dropped, not committed
                if registry.user_request(instance.user_request_id).state == RequestState::Failed {
                    continue;
                }
                if states.allocate_resource(host_id, instance, now) == AllocationVerdict::Success {
                    commit.committed.push((instance_id, host_id));
                } else {
                    let partition = states.ranges().partition_of(host_id);
                    *self.partition_conflicts.entry(partition).or_insert(0) += 1;
                    commit.conflicted.push(instance_id);
                }
            }
        }
        commit
    }

    /// Counts a rejection detected outside the shared commit path, such as a
    /// host-level inter decision invalidated against the real state.
    pub fn record_conflict(&mut self, partition: u32) {
        *self.partition_conflicts.entry(partition).or_insert(0) += 1;
    }

    /// Conflict counts per partition, ascending partition id.
    pub fn partition_conflicts(&self) -> &BTreeMap<u32, u64> {
        &self.partition_conflicts
    }

    pub fn total_conflicts(&self) -> u64 {
        self.partition_conflicts.values().sum()
    }
}
