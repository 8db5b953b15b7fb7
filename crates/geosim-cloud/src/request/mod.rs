//! User request data model.
//!
//! Requests, instance groups and instances live in a central
//! [`RequestRegistry`] and reference each other by plain `u32` ids, so event
//! payloads stay serializable and no component holds a strong reference cycle.

mod graph;
mod instance;
mod instance_group;
mod registry;
mod user_request;

pub use graph::{AffinityGraph, GroupEdge};
pub use instance::Instance;
pub use instance_group::InstanceGroup;
pub use registry::{FailCleanup, RequestRegistry};
pub use user_request::{AllocatedEdge, UserRequest};

use serde::Serialize;

/// Lifecycle state shared by user requests, instance groups and instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RequestState {
    /// Accepted, not scheduled yet.
    Waiting,
    /// Inside a scheduling pipeline.
    Scheduling,
    /// Placed and consuming resources.
    Running,
    /// Finished successfully.
    Success,
    /// Terminally failed.
    Failed,
}

impl RequestState {
    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Success | RequestState::Failed)
    }
}
