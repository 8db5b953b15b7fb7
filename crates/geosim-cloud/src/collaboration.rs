//! Collaboration zones: which data centers schedule together, the per-zone
//! group queues and the zone-level (center) inter-schedulers.

use std::collections::{BTreeMap, VecDeque};

use log::info;
use rustc_hash::FxHashMap;

use geosim_core::Id;

use crate::inter_scheduler::InterScheduler;
use crate::load_balancer::LoadBalancer;

/// Zone membership, center inter-schedulers, zone queues and busy bits.
pub struct CollaborationManager {
    zones: BTreeMap<u32, Vec<Id>>,
    dc_zone: FxHashMap<Id, u32>,
    // configured state-sync gap per data center
    dc_syn_gaps: FxHashMap<Id, f64>,
    center_schedulers: FxHashMap<u32, Vec<InterScheduler>>,
    scheduler_busy: FxHashMap<(u32, u32), bool>,
    group_queues: FxHashMap<u32, VecDeque<u32>>,
    load_balancers: FxHashMap<u32, Box<dyn LoadBalancer>>,
}

impl CollaborationManager {
    pub fn new() -> Self {
        Self {
            zones: BTreeMap::new(),
            dc_zone: FxHashMap::default(),
            dc_syn_gaps: FxHashMap::default(),
            center_schedulers: FxHashMap::default(),
            scheduler_busy: FxHashMap::default(),
            group_queues: FxHashMap::default(),
            load_balancers: FxHashMap::default(),
        }
    }

    pub fn add_zone(&mut self, zone: u32, load_balancer: Box<dyn LoadBalancer>) {
        self.zones.entry(zone).or_default();
        self.group_queues.entry(zone).or_insert_with(VecDeque::new);
        self.load_balancers.insert(zone, load_balancer);
    }

    pub fn register_dc(&mut self, zone: u32, dc: Id, state_syn_gap: f64) {
        self.zones.entry(zone).or_default().push(dc);
        self.dc_zone.insert(dc, zone);
        self.dc_syn_gaps.insert(dc, state_syn_gap);
    }

    pub fn zones(&self) -> Vec<u32> {
        self.zones.keys().copied().collect()
    }

    pub fn zone_of(&self, dc: Id) -> u32 {
        self.dc_zone[&dc]
    }

    pub fn dcs_of_zone(&self, zone: u32) -> &[Id] {
        &self.zones[&zone]
    }

    pub fn dc_syn_gap(&self, dc: Id) -> f64 {
        self.dc_syn_gaps[&dc]
    }

    /// Distinct finite state-sync gaps among the zone's data centers; one
    /// periodic sync chain is armed per gap.
    pub fn syn_gaps_of_zone(&self, zone: u32) -> Vec<f64> {
        let mut gaps: Vec<f64> = self.zones[&zone]
            .iter()
            .map(|dc| self.dc_syn_gaps[dc])
            .filter(|gap| gap.is_finite() && *gap > 0.)
            .collect();
        gaps.sort_by(f64::total_cmp);
        gaps.dedup();
        gaps
    }

    /// Data centers of the zone synchronized with the given gap.
    pub fn dcs_with_gap(&self, zone: u32, gap: f64) -> Vec<Id> {
        self.zones[&zone]
            .iter()
            .copied()
            .filter(|dc| self.dc_syn_gaps[dc] == gap)
            .collect()
    }

    pub fn add_center_scheduler(&mut self, zone: u32, scheduler: InterScheduler) {
        let schedulers = self.center_schedulers.entry(zone).or_default();
        self.scheduler_busy.insert((zone, scheduler.id), false);
        schedulers.push(scheduler);
    }

    pub fn scheduler_num(&self, zone: u32) -> usize {
        self.center_schedulers.get(&zone).map_or(0, |s| s.len())
    }

    pub fn scheduler_mut(&mut self, zone: u32, scheduler_id: u32) -> &mut InterScheduler {
        self.center_schedulers
            .get_mut(&zone)
            .unwrap()
            .iter_mut()
            .find(|s| s.id == scheduler_id)
            .unwrap()
    }

    pub fn schedulers_mut(&mut self, zone: u32) -> &mut Vec<InterScheduler> {
        self.center_schedulers.get_mut(&zone).unwrap()
    }

    pub fn is_busy(&self, zone: u32, scheduler_id: u32) -> bool {
        self.scheduler_busy.get(&(zone, scheduler_id)).copied().unwrap_or(false)
    }

    pub fn set_busy(&mut self, zone: u32, scheduler_id: u32, busy: bool) {
        self.scheduler_busy.insert((zone, scheduler_id), busy);
    }

    pub fn queue_groups(&mut self, zone: u32, group_ids: &[u32]) {
        self.group_queues.get_mut(&zone).unwrap().extend(group_ids);
    }

    pub fn queue_is_empty(&self, zone: u32) -> bool {
        self.group_queues[&zone].is_empty()
    }

    pub fn pop_groups(&mut self, zone: u32, batch_num: usize) -> Vec<u32> {
        let queue = self.group_queues.get_mut(&zone).unwrap();
        let n = batch_num.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Spreads a batch over the zone's center schedulers.
    pub fn balance(&mut self, zone: u32, items: Vec<u32>) -> Vec<Vec<u32>> {
        let scheduler_num = self.scheduler_num(zone);
        self.load_balancers.get_mut(&zone).unwrap().assign(items, scheduler_num)
    }

    pub fn balance_cost(&self, zone: u32) -> f64 {
        self.load_balancers[&zone].cost_time()
    }

    /// Periodic reshuffle: the first data center of every zone moves to the
    /// next zone (cyclically). Center schedulers keep their per-DC sync gaps.
    pub fn change_collaboration(&mut self) {
        let zone_ids: Vec<u32> = self.zones.keys().copied().collect();
        if zone_ids.len() < 2 {
            return;
        }
        let mut moved: Vec<(Id, u32, u32)> = Vec::new();
        for (i, &zone) in zone_ids.iter().enumerate() {
            let members = self.zones.get_mut(&zone).unwrap();
            if members.len() < 2 {
                continue;
            }
            let dc = members.remove(0);
            let target = zone_ids[(i + 1) % zone_ids.len()];
            moved.push((dc, zone, target));
        }
        for (dc, from, to) in moved {
            self.zones.get_mut(&to).unwrap().push(dc);
            self.dc_zone.insert(dc, to);
            let gap = self.dc_syn_gaps[&dc];
            if let Some(schedulers) = self.center_schedulers.get_mut(&from) {
                for s in schedulers.iter_mut() {
                    s.remove_dc(dc);
                }
            }
            if let Some(schedulers) = self.center_schedulers.get_mut(&to) {
                for s in schedulers.iter_mut() {
                    s.set_dc_syn_gap(dc, gap);
                }
            }
            info!("collaboration change: dc {} moved from zone {} to zone {}", dc, from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::RoundLoadBalancer;

    fn manager(zones: &[(u32, &[Id])]) -> CollaborationManager {
        let mut manager = CollaborationManager::new();
        for &(zone, dcs) in zones {
            manager.add_zone(zone, Box::new(RoundLoadBalancer::new(0.1)));
            for &dc in dcs {
                manager.register_dc(zone, dc, 10.);
            }
        }
        manager
    }

    #[test]
    fn change_collaboration_rotates_first_members() {
        let mut manager = manager(&[(0, &[1, 2]), (1, &[3, 4])]);
        manager.change_collaboration();
        assert_eq!(manager.zone_of(1), 1);
        assert_eq!(manager.zone_of(2), 0);
        assert_eq!(manager.zone_of(3), 0);
        assert_eq!(manager.zone_of(4), 1);
        assert_eq!(manager.dcs_of_zone(0), &[2, 3]);
        assert_eq!(manager.dcs_of_zone(1), &[4, 1]);
        // sync gaps travel with the data center
        assert_eq!(manager.dc_syn_gap(1), 10.);
    }

    #[test]
    fn change_collaboration_skips_singleton_zones() {
        let mut manager = manager(&[(0, &[1]), (1, &[2, 3])]);
        manager.change_collaboration();
        assert_eq!(manager.zone_of(1), 0);
        assert_eq!(manager.zone_of(2), 0);
        assert_eq!(manager.dcs_of_zone(1), &[3]);
    }

    #[test]
    fn change_collaboration_is_a_noop_with_one_zone() {
        let mut manager = manager(&[(0, &[1, 2, 3])]);
        manager.change_collaboration();
        assert_eq!(manager.dcs_of_zone(0), &[1, 2, 3]);
    }
}
