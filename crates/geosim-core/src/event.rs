//! Simulation events.

use std::cmp::Ordering;

use downcast_rs::{impl_downcast, Downcast};
use serde::ser::Serialize;

use crate::component::Id;

/// Event insertion serial. Negative serials are handed out to high-priority
/// (negative-tag) events so that they sort before every other event with the
/// same timestamp.
pub type EventSerial = i64;

/// Trait for event payloads.
pub trait EventData: Downcast + erased_serde::Serialize {}

impl_downcast!(EventData);

erased_serde::serialize_trait_object!(EventData);

impl<T: Serialize + 'static> EventData for T {}

/// Action tag carried by every event. The tag drives event ordering,
/// idempotent delivery and the only-sync termination check; the payload type
/// drives handler dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum EventTag {
    /// Periodic collaboration-zone reshuffle.
    ChangeCollaborationSyn,
    /// Periodic DC state synchronization towards inter-schedulers.
    SynStateBetweenDc,
    /// No specific action.
    None,
    /// New user requests (or forwarded instance groups) arriving at the CIS.
    UserRequestSend,
    /// Drain a request/instance queue through a load balancer.
    LoadBalanceSend,
    /// Start an inter-scheduling round.
    InterScheduleBegin,
    /// Inter-scheduling round finished, results attached.
    InterScheduleEnd,
    /// Instance groups handed to a DC that schedules hosts itself.
    ScheduleToDcNoForward,
    /// Instance groups handed to a DC with hosts already decided.
    ScheduleToDcHost,
    /// Host-level inter decisions accepted by the DC.
    ScheduleToDcHostOk,
    /// Host-level inter decisions rejected by the DC.
    ScheduleToDcHostConflicted,
    /// Start an intra-scheduling round.
    IntraScheduleBegin,
    /// Intra-scheduling round finished, proposals attached.
    IntraScheduleEnd,
    /// Instances reached the end of their lifetime (or are force-stopped).
    EndInstanceRun,
    /// User requests failed terminally.
    UserRequestFail,
}

impl EventTag {
    /// Signed priority code. Tags with negative codes are delivered before
    /// all non-negative tags scheduled at the same timestamp.
    pub fn code(&self) -> i32 {
        match self {
            EventTag::ChangeCollaborationSyn => -2,
            EventTag::SynStateBetweenDc => -1,
            EventTag::None => 0,
            EventTag::UserRequestSend => 1,
            EventTag::LoadBalanceSend => 2,
            EventTag::InterScheduleBegin => 3,
            EventTag::InterScheduleEnd => 4,
            EventTag::ScheduleToDcNoForward => 5,
            EventTag::ScheduleToDcHost => 6,
            EventTag::ScheduleToDcHostOk => 7,
            EventTag::ScheduleToDcHostConflicted => 8,
            EventTag::IntraScheduleBegin => 9,
            EventTag::IntraScheduleEnd => 10,
            EventTag::EndInstanceRun => 11,
            EventTag::UserRequestFail => 12,
        }
    }

    /// Whether the tag jumps ahead of same-time events.
    pub fn is_high_priority(&self) -> bool {
        self.code() < 0
    }

    /// Idempotent tags: a second event with the same destination, tag and
    /// payload is dropped while the first one still sits in the deferred queue.
    pub fn is_unique(&self) -> bool {
        matches!(self, EventTag::SynStateBetweenDc | EventTag::LoadBalanceSend)
    }

    /// Recurring synchronization tags that alone cannot keep the simulation
    /// alive.
    pub fn is_recurring_sync(&self) -> bool {
        matches!(self, EventTag::SynStateBetweenDc | EventTag::ChangeCollaborationSyn)
    }
}

/// Simulation event.
pub struct Event {
    /// Insertion serial, unique within a simulation run.
    pub serial: EventSerial,
    /// Delivery timestamp in ms.
    pub time: f64,
    /// Action tag.
    pub tag: EventTag,
    /// Identifier of event source.
    pub src: Id,
    /// Identifier of event destination.
    pub dst: Id,
    /// Event payload.
    pub data: Box<dyn EventData>,
}

impl Eq for Event {}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.serial.cmp(&self.serial))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
