//! Simulation of large-scale geo-distributed cloud scheduling.
//!
//! The model follows a two-level pipeline. The cloud information service
//! (CIS) receives user requests and runs zone-level inter-schedulers that
//! assign instance groups to data centers from periodically synchronized
//! state snapshots. Each data center runs its own intra-schedulers that pick
//! hosts against possibly-stale partitioned views; a conflict handler commits
//! their optimistic proposals against the real host state and counts the
//! rejections.

pub mod cis;
pub mod collaboration;
pub mod config;
pub mod conflict_handler;
pub mod datacenter;
pub mod events;
pub mod generator;
pub mod inter_scheduler;
pub mod intra_scheduler;
pub mod load_balancer;
pub mod network;
pub mod record;
pub mod request;
pub mod simulation;
pub mod state_manager;

pub use simulation::GeoCloudSimulation;
