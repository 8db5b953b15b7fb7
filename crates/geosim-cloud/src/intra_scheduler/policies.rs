//! Host placement policies.

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::request::Instance;
use crate::state_manager::SynState;

/// Trait for implementation of host placement policies.
///
/// The policy is defined as a function of one instance and the scheduler's
/// current state view, which returns the id of the host selected for the
/// instance or `None` if there is no suitable host. Policies may keep their
/// own seeded RNG so that runs stay reproducible.
pub trait PlacementPolicy {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32>;
}

/// Builds a placement policy from its configuration token.
pub fn placement_policy_resolver(token: &str, seed: u64) -> Option<Box<dyn PlacementPolicy>> {
    match token {
        "Simple" | "FirstFit" => Some(Box::new(FirstFit::new())),
        "Random" => Some(Box::new(Random::new(seed))),
        "PartitionRandom" => Some(Box::new(PartitionRandom::new(seed))),
        "LeastRequested" => Some(Box::new(LeastRequested::new())),
        "RandomScore" => Some(Box::new(RandomScore::new(seed))),
        "RandomScoreByPartitionSynOrder" => Some(Box::new(RandomScoreByPartitionSynOrder::new(seed))),
        "MinHostOn" => Some(Box::new(MinHostOn::new())),
        "MultiLevel" => Some(Box::new(MultiLevel::new())),
        "FixedPartitionRandom" => Some(Box::new(FixedPartitionRandom::new(seed))),
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Returns the first suitable host in partition scan order.
pub struct FirstFit;

impl FirstFit {
    pub fn new() -> Self {
        Self {}
    }
}

impl PlacementPolicy for FirstFit {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        for n in 0..view.assigned_host_count() {
            let host_id = view.nth_assigned_host(n);
            if view.is_suitable(host_id, instance) {
                return Some(host_id);
            }
        }
        None
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Cyclic scan over all assigned hosts starting at a random offset.
pub struct Random {
    rng: Pcg64,
}

impl Random {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
        }
    }
}

impl PlacementPolicy for Random {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        let count = view.assigned_host_count();
        if count == 0 {
            return None;
        }
        let start = self.rng.gen_range(0..count);
        for i in 0..count {
            let host_id = view.nth_assigned_host((start + i) % count);
            if view.is_suitable(host_id, instance) {
                return Some(host_id);
            }
        }
        None
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Cyclic scan over all assigned hosts starting at a random host of the
/// scheduler's home partition.
pub struct PartitionRandom {
    rng: Pcg64,
}

impl PartitionRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
        }
    }
}

impl PlacementPolicy for PartitionRandom {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        let count = view.assigned_host_count();
        if count == 0 {
            return None;
        }
        let home = view.assigned_partitions()[0];
        let (first, last) = view.partition_range(home);
        // the home partition opens the scan order, so the offset within it is
        // also the dense scan offset
        let start = self.rng.gen_range(0..=(last - first));
        for i in 0..count {
            let host_id = view.nth_assigned_host((start + i) % count);
            if view.is_suitable(host_id, instance) {
                return Some(host_id);
            }
        }
        None
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Returns the suitable host with the largest mean free resource share.
pub struct LeastRequested;

impl LeastRequested {
    pub fn new() -> Self {
        Self {}
    }
}

impl PlacementPolicy for LeastRequested {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        let mut result: Option<u32> = None;
        let mut best_share = f64::MIN;
        for n in 0..view.assigned_host_count() {
            let host_id = view.nth_assigned_host(n);
            if view.is_suitable(host_id, instance) && view.free_share(host_id) > best_share {
                best_share = view.free_share(host_id);
                result = Some(host_id);
            }
        }
        result
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Weighted random pick among suitable hosts, weight = mean free share.
pub struct RandomScore {
    rng: Pcg64,
}

impl RandomScore {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    fn pick_in(&mut self, instance: &Instance, view: &SynState, hosts: impl Iterator<Item = u32>) -> Option<u32> {
        // single-pass weighted reservoir pick
        let mut result: Option<u32> = None;
        let mut total_weight = 0.;
        for host_id in hosts {
            if !view.is_suitable(host_id, instance) {
                continue;
            }
            let weight = view.free_share(host_id).max(f64::MIN_POSITIVE);
            total_weight += weight;
            if self.rng.gen_range(0.0..1.0) < weight / total_weight {
                result = Some(host_id);
            }
        }
        result
    }
}

impl PlacementPolicy for RandomScore {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        let hosts = (0..view.assigned_host_count()).map(|n| view.nth_assigned_host(n));
        let hosts: Vec<u32> = hosts.collect();
        self.pick_in(instance, view, hosts.into_iter())
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Like [`RandomScore`], but partitions are tried in view-freshness order and
/// the first partition with any suitable host decides.
pub struct RandomScoreByPartitionSynOrder {
    inner: RandomScore,
}

impl RandomScoreByPartitionSynOrder {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: RandomScore::new(seed),
        }
    }
}

impl PlacementPolicy for RandomScoreByPartitionSynOrder {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        for &partition in view.assigned_partitions() {
            let (first, last) = view.partition_range(partition);
            if let Some(host_id) = self.inner.pick_in(instance, view, first..=last) {
                return Some(host_id);
            }
        }
        None
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Prefers suitable hosts that are already powered on, to keep the number of
/// powered-on hosts low.
pub struct MinHostOn;

impl MinHostOn {
    pub fn new() -> Self {
        Self {}
    }
}

impl PlacementPolicy for MinHostOn {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        let mut powered_off: Option<u32> = None;
        for n in 0..view.assigned_host_count() {
            let host_id = view.nth_assigned_host(n);
            if !view.is_suitable(host_id, instance) {
                continue;
            }
            if view.host_state(host_id).is_powered_on() {
                return Some(host_id);
            }
            if powered_off.is_none() {
                powered_off = Some(host_id);
            }
        }
        powered_off
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Two-level choice: partitions ordered by viewed free CPU, first fit within
/// the partition.
pub struct MultiLevel;

impl MultiLevel {
    pub fn new() -> Self {
        Self {}
    }
}

impl PlacementPolicy for MultiLevel {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        let mut partitions: Vec<(u64, u32)> = view
            .assigned_partitions()
            .iter()
            .map(|&p| {
                let (first, last) = view.partition_range(p);
                let free_cpu = (first..=last).map(|h| view.host_state(h).cpu as u64).sum();
                (free_cpu, p)
            })
            .collect();
        partitions.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, partition) in partitions {
            let (first, last) = view.partition_range(partition);
            for host_id in first..=last {
                if view.is_suitable(host_id, instance) {
                    return Some(host_id);
                }
            }
        }
        None
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Random cyclic scan restricted to the scheduler's home partition.
pub struct FixedPartitionRandom {
    rng: Pcg64,
}

impl FixedPartitionRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
        }
    }
}

impl PlacementPolicy for FixedPartitionRandom {
    fn select_host(&mut self, instance: &Instance, view: &SynState) -> Option<u32> {
        let home = view.assigned_partitions()[0];
        let (first, last) = view.partition_range(home);
        let len = last - first + 1;
        let start = self.rng.gen_range(0..len);
        for i in 0..len {
            let host_id = first + (start + i) % len;
            if view.is_suitable(host_id, instance) {
                return Some(host_id);
            }
        }
        None
    }
}
