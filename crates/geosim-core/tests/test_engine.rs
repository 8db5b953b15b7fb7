use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use geosim_core::{cast, Event, EventHandler, EventTag, Simulation, SimulationContext};

#[derive(Clone, Serialize)]
struct Ping {
    label: u32,
}

#[derive(Clone, Serialize)]
struct SyncTick {
    round: u32,
}

struct Recorder {
    ctx: SimulationContext,
    delivered: Vec<(EventTag, u32)>,
    rearm_sync: bool,
}

impl Recorder {
    fn new(ctx: SimulationContext, rearm_sync: bool) -> Self {
        Self {
            ctx,
            delivered: Vec::new(),
            rearm_sync,
        }
    }
}

impl EventHandler for Recorder {
    fn on(&mut self, event: Event) {
        let tag = event.tag;
        cast!(match event.data {
            Ping { label } => {
                self.delivered.push((tag, label));
            }
            SyncTick { round } => {
                self.delivered.push((tag, round));
                if self.rearm_sync {
                    self.ctx
                        .emit_self(EventTag::SynStateBetweenDc, SyncTick { round: round + 1 }, 10.);
                }
            }
        })
    }
}

fn make_sim() -> (Simulation, Rc<RefCell<Recorder>>, u32, SimulationContext) {
    let mut sim = Simulation::new(123);
    let comp = Rc::new(RefCell::new(Recorder::new(sim.create_context("comp"), false)));
    let comp_id = sim.add_handler("comp", comp.clone());
    let ctx = sim.create_context("driver");
    (sim, comp, comp_id, ctx)
}

#[test]
fn test_negative_tags_delivered_first_within_timestamp() {
    let (mut sim, comp, comp_id, mut ctx) = make_sim();
    ctx.emit(EventTag::None, Ping { label: 1 }, comp_id, 1.);
    ctx.emit(EventTag::None, Ping { label: 2 }, comp_id, 1.);
    ctx.emit(EventTag::SynStateBetweenDc, SyncTick { round: 0 }, comp_id, 1.);
    sim.run();
    assert_eq!(
        comp.borrow().delivered,
        vec![
            (EventTag::SynStateBetweenDc, 0),
            (EventTag::None, 1),
            (EventTag::None, 2)
        ]
    );
}

#[test]
fn test_fifo_order_for_same_time_same_priority() {
    let (mut sim, comp, comp_id, mut ctx) = make_sim();
    for label in 0..5 {
        ctx.emit(EventTag::None, Ping { label }, comp_id, 2.);
    }
    sim.run();
    let labels: Vec<u32> = comp.borrow().delivered.iter().map(|d| d.1).collect();
    assert_eq!(labels, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_unique_tag_suppresses_equal_duplicate() {
    let (mut sim, comp, comp_id, mut ctx) = make_sim();
    ctx.emit(EventTag::SynStateBetweenDc, SyncTick { round: 7 }, comp_id, 1.);
    ctx.emit(EventTag::SynStateBetweenDc, SyncTick { round: 7 }, comp_id, 1.);
    sim.run();
    assert_eq!(comp.borrow().delivered, vec![(EventTag::SynStateBetweenDc, 7)]);
}

#[test]
fn test_unique_tag_keeps_distinct_payloads() {
    let (mut sim, comp, comp_id, mut ctx) = make_sim();
    ctx.emit(EventTag::SynStateBetweenDc, SyncTick { round: 1 }, comp_id, 1.);
    ctx.emit(EventTag::SynStateBetweenDc, SyncTick { round: 2 }, comp_id, 1.);
    sim.run();
    assert_eq!(comp.borrow().delivered.len(), 2);
}

#[test]
fn test_non_unique_tag_is_not_deduplicated() {
    let (mut sim, comp, comp_id, mut ctx) = make_sim();
    ctx.emit(EventTag::None, Ping { label: 3 }, comp_id, 1.);
    ctx.emit(EventTag::None, Ping { label: 3 }, comp_id, 1.);
    sim.run();
    assert_eq!(comp.borrow().delivered.len(), 2);
}

#[test]
fn test_terminate_at_rejects_non_future_times() {
    let (mut sim, _comp, comp_id, mut ctx) = make_sim();
    ctx.emit(EventTag::None, Ping { label: 0 }, comp_id, 1.);
    assert!(!sim.terminate_at(0.));
    assert!(!sim.terminate_at(-5.));
    assert!(sim.terminate_at(10.));
    sim.run();
}

#[test]
fn test_terminate_at_stops_before_dispatching_final_slice() {
    let (mut sim, comp, comp_id, mut ctx) = make_sim();
    ctx.emit(EventTag::None, Ping { label: 1 }, comp_id, 1.);
    ctx.emit(EventTag::None, Ping { label: 2 }, comp_id, 5.);
    assert!(sim.terminate_at(5.));
    let time = sim.run();
    assert_eq!(time, 5.);
    // the slice at the termination time is not handed to components
    assert_eq!(comp.borrow().delivered, vec![(EventTag::None, 1)]);
}

#[test]
fn test_terminate_at_caps_the_clock() {
    let (mut sim, comp, comp_id, mut ctx) = make_sim();
    ctx.emit(EventTag::None, Ping { label: 1 }, comp_id, 1.);
    ctx.emit(EventTag::None, Ping { label: 2 }, comp_id, 10.);
    assert!(sim.terminate_at(5.));
    let time = sim.run();
    // the clock never jumps past the termination time
    assert_eq!(time, 5.);
    assert_eq!(comp.borrow().delivered, vec![(EventTag::None, 1)]);
}

#[test]
#[should_panic]
fn test_negative_delay_panics() {
    let (_sim, _comp, comp_id, mut ctx) = make_sim();
    ctx.emit(EventTag::None, Ping { label: 0 }, comp_id, -1.);
}

#[test]
fn test_run_stops_when_only_sync_events_remain() {
    let mut sim = Simulation::new(123);
    let comp = Rc::new(RefCell::new(Recorder::new(sim.create_context("comp"), true)));
    let comp_id = sim.add_handler("comp", comp.clone());
    let mut ctx = sim.create_context("driver");
    sim.set_datacenter_count(1);
    ctx.emit(EventTag::SynStateBetweenDc, SyncTick { round: 0 }, comp_id, 0.);
    ctx.emit(EventTag::None, Ping { label: 1 }, comp_id, 1.);
    let time = sim.run();
    // the self-rearming sync chain alone does not keep the run alive
    assert_eq!(time, 1.);
    assert_eq!(comp.borrow().delivered.len(), 2);
}

#[test]
fn test_same_seed_reproducible() {
    let mut a = Simulation::new(42);
    let mut b = Simulation::new(42);
    let xs: Vec<u64> = (0..16).map(|_| a.gen_range(0..1_000_000u64)).collect();
    let ys: Vec<u64> = (0..16).map(|_| b.gen_range(0..1_000_000u64)).collect();
    assert_eq!(xs, ys);
}
