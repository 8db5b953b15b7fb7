//! Event payloads exchanged between the CIS and the data centers.
//!
//! Payloads carry plain id vectors; the objects themselves live in the
//! request registry.

use serde::Serialize;

use geosim_core::Id;

use crate::inter_scheduler::InterSchedulerResult;
use crate::intra_scheduler::IntraSchedulerResult;

/// New user requests arriving at the CIS (tag USER_REQUEST_SEND).
#[derive(Clone, Serialize)]
pub struct NewUserRequests {
    pub request_ids: Vec<u32>,
}

/// Instance groups pushed back to the CIS by an overloaded data center
/// (tag USER_REQUEST_SEND).
#[derive(Clone, Serialize)]
pub struct ForwardedGroups {
    pub group_ids: Vec<u32>,
}

/// Drain one collaboration zone's group queue (tag LOAD_BALANCE_SEND).
#[derive(Clone, Serialize)]
pub struct ZoneLoadBalance {
    pub collaboration_id: u32,
}

/// Drain the data center's instance queue (tag LOAD_BALANCE_SEND).
#[derive(Clone, Serialize)]
pub struct DcLoadBalance {}

/// Kick one inter-scheduler (tag INTER_SCHEDULE_BEGIN).
#[derive(Clone, Serialize)]
pub struct StartInterScheduling {
    pub collaboration_id: u32,
    pub scheduler_id: u32,
}

/// Finished inter-scheduling round (tag INTER_SCHEDULE_END).
#[derive(Clone, Serialize)]
pub struct InterSchedulingDone {
    pub result: InterSchedulerResult,
}

/// Instance groups for a data center that places hosts itself
/// (tag SCHEDULE_TO_DC_NO_FORWARD).
#[derive(Clone, Serialize)]
pub struct GroupsToDatacenter {
    pub group_ids: Vec<u32>,
    /// Whether the receiver may push groups back to the zone queue.
    pub support_forward: bool,
}

/// Instance groups with hosts already decided (tag SCHEDULE_TO_DC_HOST).
#[derive(Clone, Serialize)]
pub struct GroupsToHosts {
    pub collaboration_id: u32,
    pub scheduler_id: u32,
    pub group_ids: Vec<u32>,
}

/// Host-level decisions the data center accepted (tag SCHEDULE_TO_DC_HOST_OK).
#[derive(Clone, Serialize)]
pub struct HostScheduleOk {
    pub group_ids: Vec<u32>,
}

/// Host-level decisions rejected against the real state
/// (tag SCHEDULE_TO_DC_HOST_CONFLICTED).
#[derive(Clone, Serialize)]
pub struct HostScheduleConflicted {
    pub collaboration_id: u32,
    pub scheduler_id: u32,
    pub group_ids: Vec<u32>,
}

/// Kick one intra-scheduler (tag INTRA_SCHEDULE_BEGIN).
#[derive(Clone, Serialize)]
pub struct StartIntraScheduling {
    pub scheduler_id: u32,
}

/// Finished intra-scheduling round (tag INTRA_SCHEDULE_END).
#[derive(Clone, Serialize)]
pub struct IntraSchedulingDone {
    pub result: IntraSchedulerResult,
}

/// Instances reaching the end of their run (tag END_INSTANCE_RUN).
#[derive(Clone, Serialize)]
pub struct EndInstances {
    pub instance_ids: Vec<u32>,
}

/// Terminal user request failures (tag USER_REQUEST_FAIL).
#[derive(Clone, Serialize)]
pub struct FailedUserRequests {
    pub request_ids: Vec<u32>,
    pub reason: String,
}

/// Periodic DC state synchronization of one (zone, gap) bucket
/// (tag SYN_STATE_BETWEEN_DC).
#[derive(Clone, Serialize)]
pub struct SynDcStates {
    pub collaboration_id: u32,
    pub gap: f64,
}

/// Periodic collaboration reshuffle (tag CHANGE_COLLABORATION_SYN).
#[derive(Clone, Serialize)]
pub struct ChangeCollaboration {}
