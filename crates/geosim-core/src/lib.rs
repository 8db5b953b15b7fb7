//! Discrete-event simulation engine for geo-distributed cloud scheduling.
//!
//! The engine keeps two queues: a time-ordered future queue and a FIFO
//! deferred queue holding the current same-time slice. Events carry an
//! [`EventTag`] besides the typed payload; tags with negative priority codes
//! are delivered first within a timestamp, idempotent tags are deduplicated
//! against the deferred queue, and the recurring synchronization tags alone
//! cannot keep a run alive.

#![warn(missing_docs)]

pub mod component;
pub mod context;
pub mod event;
pub mod handler;
pub mod log;
pub mod simulation;
mod state;

pub use colored;
pub use component::Id;
pub use context::SimulationContext;
pub use event::{Event, EventData, EventSerial, EventTag};
pub use handler::EventHandler;
pub use simulation::Simulation;
pub use state::EPSILON;
