//! Data-center selection policies.

use rand::prelude::*;
use rand_pcg::Pcg64;
use rustc_hash::FxHashMap;

use geosim_core::Id;

use crate::inter_scheduler::DcStateView;
use crate::request::{InstanceGroup, UserRequest};

/// Read-only inputs a policy may consult when scoring candidates.
pub struct SelectCtx<'a> {
    pub group: &'a InstanceGroup,
    pub request: &'a UserRequest,
    /// Bandwidth headroom per candidate towards already-placed neighbours.
    pub flow_scores: &'a FxHashMap<Id, f64>,
}

/// Trait for implementation of data-center selection policies.
///
/// The policy receives the candidates that survived the shared filtering
/// pipeline and returns the chosen data center, or `None` to fail the group.
pub trait InterSchedulePolicy {
    fn select_dc(&mut self, ctx: &SelectCtx, candidates: &[&DcStateView], rng: &mut Pcg64) -> Option<Id>;
}

/// Builds a selection policy from its configuration token.
pub fn inter_policy_resolver(token: &str) -> Option<Box<dyn InterSchedulePolicy>> {
    match token {
        "Simple" => Some(Box::new(Simple::new())),
        "Random" => Some(Box::new(Random::new())),
        "Round" => Some(Box::new(Round::new())),
        "Direct" => Some(Box::new(Direct::new())),
        "LeastRequested" => Some(Box::new(LeastRequested::new())),
        "MinTCODirect" => Some(Box::new(MinTcoDirect::new())),
        "Consult" => Some(Box::new(Consult::new())),
        "Heuristic" => Some(Box::new(Heuristic::new())),
        "HFRS" => Some(Box::new(Hfrs::new())),
        "RFHS" => Some(Box::new(Rfhs::new())),
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Takes the first surviving candidate.
pub struct Simple;

impl Simple {
    pub fn new() -> Self {
        Self {}
    }
}

impl InterSchedulePolicy for Simple {
    fn select_dc(&mut self, _ctx: &SelectCtx, candidates: &[&DcStateView], _rng: &mut Pcg64) -> Option<Id> {
        candidates.first().map(|view| view.dc_id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Uniform random pick among the surviving candidates.
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self {}
    }
}

impl InterSchedulePolicy for Random {
    fn select_dc(&mut self, _ctx: &SelectCtx, candidates: &[&DcStateView], rng: &mut Pcg64) -> Option<Id> {
        if candidates.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..candidates.len());
        Some(candidates[idx].dc_id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Cycles over candidates across calls.
pub struct Round {
    next: usize,
}

impl Round {
    pub fn new() -> Self {
        Self { next: 0 }
    }
}

impl InterSchedulePolicy for Round {
    fn select_dc(&mut self, _ctx: &SelectCtx, candidates: &[&DcStateView], _rng: &mut Pcg64) -> Option<Id> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.next % candidates.len();
        self.next = self.next.wrapping_add(1);
        Some(candidates[idx].dc_id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Insists on the user's origin data center.
pub struct Direct;

impl Direct {
    pub fn new() -> Self {
        Self {}
    }
}

impl InterSchedulePolicy for Direct {
    fn select_dc(&mut self, ctx: &SelectCtx, candidates: &[&DcStateView], _rng: &mut Pcg64) -> Option<Id> {
        candidates
            .iter()
            .find(|view| view.dc_id == ctx.request.belong_datacenter)
            .map(|view| view.dc_id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Prefers the candidate with the largest mean free resource share.
pub struct LeastRequested;

impl LeastRequested {
    pub fn new() -> Self {
        Self {}
    }
}

impl InterSchedulePolicy for LeastRequested {
    fn select_dc(&mut self, _ctx: &SelectCtx, candidates: &[&DcStateView], _rng: &mut Pcg64) -> Option<Id> {
        candidates
            .iter()
            .max_by(|a, b| a.free_share().total_cmp(&b.free_share()))
            .map(|view| view.dc_id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Minimises the estimated resource cost of hosting the group.
pub struct MinTcoDirect;

impl MinTcoDirect {
    pub fn new() -> Self {
        Self {}
    }

    fn estimated_tco(view: &DcStateView, group: &InstanceGroup) -> f64 {
        group.cpu_sum as f64 * view.cpu_unit_price + group.ram_sum as f64 * view.ram_unit_price
    }
}

impl InterSchedulePolicy for MinTcoDirect {
    fn select_dc(&mut self, ctx: &SelectCtx, candidates: &[&DcStateView], _rng: &mut Pcg64) -> Option<Id> {
        candidates
            .iter()
            .min_by(|a, b| Self::estimated_tco(a, ctx.group).total_cmp(&Self::estimated_tco(b, ctx.group)))
            .map(|view| view.dc_id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Trusts the freshest snapshot: picks the candidate synchronized most
/// recently, random among ties.
pub struct Consult;

impl Consult {
    pub fn new() -> Self {
        Self {}
    }
}

impl InterSchedulePolicy for Consult {
    fn select_dc(&mut self, _ctx: &SelectCtx, candidates: &[&DcStateView], rng: &mut Pcg64) -> Option<Id> {
        let freshest = candidates.iter().map(|view| view.synced_at).fold(f64::MIN, f64::max);
        let ties: Vec<Id> = candidates
            .iter()
            .filter(|view| view.synced_at == freshest)
            .map(|view| view.dc_id)
            .collect();
        if ties.is_empty() {
            return None;
        }
        Some(ties[rng.gen_range(0..ties.len())])
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Maximises the product of the host-level score (free resource share) and
/// the flow-level score (bandwidth headroom towards placed neighbours).
pub struct Heuristic;

impl Heuristic {
    pub fn new() -> Self {
        Self {}
    }
}

impl InterSchedulePolicy for Heuristic {
    fn select_dc(&mut self, ctx: &SelectCtx, candidates: &[&DcStateView], _rng: &mut Pcg64) -> Option<Id> {
        candidates
            .iter()
            .max_by(|a, b| {
                let score_a = a.free_share() * ctx.flow_scores.get(&a.dc_id).copied().unwrap_or(1.);
                let score_b = b.free_share() * ctx.flow_scores.get(&b.dc_id).copied().unwrap_or(1.);
                score_a.total_cmp(&score_b)
            })
            .map(|view| view.dc_id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Host-first ranked selection: free resource share, then bandwidth headroom.
pub struct Hfrs;

impl Hfrs {
    pub fn new() -> Self {
        Self {}
    }
}

impl InterSchedulePolicy for Hfrs {
    fn select_dc(&mut self, ctx: &SelectCtx, candidates: &[&DcStateView], _rng: &mut Pcg64) -> Option<Id> {
        candidates
            .iter()
            .max_by(|a, b| {
                let flow_a = ctx.flow_scores.get(&a.dc_id).copied().unwrap_or(1.);
                let flow_b = ctx.flow_scores.get(&b.dc_id).copied().unwrap_or(1.);
                a.free_share().total_cmp(&b.free_share()).then(flow_a.total_cmp(&flow_b))
            })
            .map(|view| view.dc_id)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Flow-first ranked selection: bandwidth headroom, then free resource share.
pub struct Rfhs;

impl Rfhs {
    pub fn new() -> Self {
        Self {}
    }
}

impl InterSchedulePolicy for Rfhs {
    fn select_dc(&mut self, ctx: &SelectCtx, candidates: &[&DcStateView], _rng: &mut Pcg64) -> Option<Id> {
        candidates
            .iter()
            .max_by(|a, b| {
                let flow_a = ctx.flow_scores.get(&a.dc_id).copied().unwrap_or(1.);
                let flow_b = ctx.flow_scores.get(&b.dc_id).copied().unwrap_or(1.);
                flow_a.total_cmp(&flow_b).then(a.free_share().total_cmp(&b.free_share()))
            })
            .map(|view| view.dc_id)
    }
}
