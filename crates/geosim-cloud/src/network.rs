//! Static inter-datacenter network model: delay tables and bandwidth-capable
//! links with reservations.

use log::warn;
use rustc_hash::FxHashMap;

use geosim_core::Id;

/// One inter-datacenter link. Links are undirected: a reservation consumes
/// capacity for both directions.
#[derive(Clone, Copy, Debug)]
pub struct DcLink {
    pub capacity: f64,
    pub available: f64,
    pub unit_price: f64,
}

/// Delay tables plus link state, shared by the CIS and the data centers.
#[derive(Default)]
pub struct NetworkTopology {
    // (region, region) -> delay, ms
    region_delay: FxHashMap<(String, String), f64>,
    // (area, region) -> delay, ms
    area_delay: FxHashMap<(String, String), f64>,
    dc_regions: FxHashMap<Id, String>,
    links: FxHashMap<(Id, Id), DcLink>,
}

impl NetworkTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dc_region(&mut self, dc: Id, region: &str) {
        self.dc_regions.insert(dc, region.to_owned());
    }

    pub fn add_region_delay(&mut self, from: &str, to: &str, delay: f64) {
        self.region_delay.insert((from.to_owned(), to.to_owned()), delay);
    }

    pub fn add_area_delay(&mut self, area: &str, region: &str, delay: f64) {
        self.area_delay.insert((area.to_owned(), region.to_owned()), delay);
    }

    pub fn add_link(&mut self, a: Id, b: Id, bandwidth: f64, unit_price: f64) {
        self.links.insert(
            link_key(a, b),
            DcLink {
                capacity: bandwidth,
                available: bandwidth,
                unit_price,
            },
        );
    }

    /// Delay between two data centers from the region table. Unknown pairs
    /// count as unreachable.
    pub fn delay_between(&self, a: Id, b: Id) -> f64 {
        if a == b {
            return 0.;
        }
        let (ra, rb) = match (self.dc_regions.get(&a), self.dc_regions.get(&b)) {
            (Some(ra), Some(rb)) => (ra, rb),
            _ => return f64::INFINITY,
        };
        if ra == rb {
            return 0.;
        }
        self.region_delay
            .get(&(ra.clone(), rb.clone()))
            .or_else(|| self.region_delay.get(&(rb.clone(), ra.clone())))
            .copied()
            .unwrap_or(f64::INFINITY)
    }

    /// Smallest known delay estimate from a user (origin DC plus submit area)
    /// towards a candidate DC.
    pub fn access_latency(&self, area: &str, origin: Id, candidate: Id) -> f64 {
        let dc_delay = self.delay_between(origin, candidate);
        let area_delay = self
            .dc_regions
            .get(&candidate)
            .and_then(|region| self.area_delay.get(&(area.to_owned(), region.clone())))
            .copied()
            .unwrap_or(f64::INFINITY);
        dc_delay.min(area_delay)
    }

    /// Free bandwidth between two data centers; no configured link means no
    /// bandwidth constraint.
    pub fn bw_between(&self, a: Id, b: Id) -> f64 {
        if a == b {
            return f64::INFINITY;
        }
        self.links.get(&link_key(a, b)).map_or(f64::INFINITY, |l| l.available)
    }

    /// Reserves bandwidth on the link, all or nothing.
    pub fn allocate_bw(&mut self, a: Id, b: Id, amount: f64) -> bool {
        if a == b {
            return true;
        }
        match self.links.get_mut(&link_key(a, b)) {
            Some(link) => {
                if link.available >= amount {
                    link.available -= amount;
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    /// Returns previously reserved bandwidth to the link.
    pub fn release_bw(&mut self, a: Id, b: Id, amount: f64) {
        if a == b {
            return;
        }
        match self.links.get_mut(&link_key(a, b)) {
            Some(link) => {
                link.available = (link.available + amount).min(link.capacity);
            }
            None => warn!("bandwidth release on unknown link {}-{}, ignored", a, b),
        }
    }

    /// Total cost of the provisioned links.
    pub fn network_tco(&self) -> f64 {
        self.links.values().map(|l| l.capacity * l.unit_price).sum()
    }
}

fn link_key(a: Id, b: Id) -> (Id, Id) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
