use std::collections::{BinaryHeap, HashMap, VecDeque};

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::component::Id;
use crate::event::{Event, EventData, EventSerial, EventTag};
use crate::log::log_incorrect_event;

/// Epsilon to compare floating point values for equality.
pub const EPSILON: f64 = 1e-12;

pub struct SimulationState {
    clock: f64,
    rand: Pcg64,
    future: BinaryHeap<Event>,
    deferred: VecDeque<Event>,
    // Ascending serial for regular events, descending "head" serial for
    // high-priority tags, so that the heap order (time, serial) puts
    // negative tags in front of everything else at the same timestamp.
    next_serial: EventSerial,
    head_serial: EventSerial,
    event_count: u64,
    termination_time: Option<f64>,

    component_name_to_id: HashMap<String, Id>,
    component_names: Vec<String>,
}

impl SimulationState {
    pub fn new(seed: u64) -> Self {
        Self {
            clock: 0.0,
            rand: Pcg64::seed_from_u64(seed),
            future: BinaryHeap::new(),
            deferred: VecDeque::new(),
            next_serial: 0,
            head_serial: -1,
            event_count: 0,
            termination_time: None,
            component_name_to_id: HashMap::new(),
            component_names: Vec::new(),
        }
    }

    pub fn register(&mut self, name: &str) -> Id {
        if let Some(&id) = self.component_name_to_id.get(name) {
            return id;
        }
        let id = self.component_name_to_id.len() as Id;
        self.component_name_to_id.insert(name.to_owned(), id);
        self.component_names.push(name.to_owned());
        id
    }

    pub fn lookup_id(&self, name: &str) -> Id {
        *self.component_name_to_id.get(name).unwrap()
    }

    pub fn lookup_name(&self, id: Id) -> String {
        self.component_names[id as usize].clone()
    }

    pub fn time(&self) -> f64 {
        self.clock
    }

    pub fn rand(&mut self) -> f64 {
        self.rand.gen_range(0.0..1.0)
    }

    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.rand.gen_range(range)
    }

    pub fn sample_from_distribution<T, Dist: Distribution<T>>(&mut self, dist: &Dist) -> T {
        dist.sample(&mut self.rand)
    }

    pub fn add_event<T>(&mut self, tag: EventTag, data: T, src: Id, dst: Id, delay: f64) -> EventSerial
    where
        T: EventData,
    {
        let serial = if tag.is_high_priority() {
            let serial = self.head_serial;
            self.head_serial -= 1;
            serial
        } else {
            let serial = self.next_serial;
            self.next_serial += 1;
            serial
        };
        let event = Event {
            serial,
            time: self.clock + delay.max(0.),
            tag,
            src,
            dst,
            data: Box::new(data),
        };
        if delay >= -EPSILON {
            self.future.push(event);
            self.event_count += 1;
            serial
        } else {
            log_incorrect_event(event, &format!("negative delay {}", delay));
            panic!("Event delay is negative! It is not allowed to add events from the past.");
        }
    }

    pub fn future_is_empty(&self) -> bool {
        self.future.is_empty()
    }

    pub fn deferred_is_empty(&self) -> bool {
        self.deferred.is_empty()
    }

    pub fn pop_deferred(&mut self) -> Option<Event> {
        self.deferred.pop_front()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// The simulation is idle when the future queue carries nothing but the
    /// recurring synchronization tags, bounded by one state-sync event per
    /// data center plus one collaboration-sync event.
    pub fn has_only_sync_events(&self, dc_count: usize) -> bool {
        if dc_count > 0 && self.future.len() > dc_count + 1 {
            return false;
        }
        self.future.iter().all(|e| e.tag.is_recurring_sync())
    }

    /// Moves every event scheduled at the earliest future timestamp into the
    /// deferred queue, advancing the clock. Duplicates of idempotent tags are
    /// suppressed. When the next timestamp lies beyond the termination time,
    /// the clock stops there and no events are moved.
    pub fn process_time_slice(&mut self) {
        let slice_time = match self.future.peek() {
            Some(e) => e.time,
            None => return,
        };
        if let Some(t) = self.termination_time {
            if slice_time > t {
                self.clock = t;
                return;
            }
        }
        while let Some(e) = self.future.peek() {
            if e.time != slice_time {
                break;
            }
            let event = self.future.pop().unwrap();
            self.process_one(event);
        }
    }

    fn process_one(&mut self, event: Event) {
        if event.time < self.clock {
            panic!(
                "Past event detected! Event time {} is before the current clock {}.",
                event.time, self.clock
            );
        }
        self.clock = event.time;
        if event.tag.is_unique() && self.holds_same_deferred(&event) {
            return;
        }
        self.deferred.push_back(event);
    }

    fn holds_same_deferred(&self, event: &Event) -> bool {
        self.deferred
            .iter()
            .any(|e| e.dst == event.dst && e.tag == event.tag && payloads_equal(&e.data, &event.data))
    }

    /// Requests termination at the given time. Times at or before the current
    /// clock are rejected.
    pub fn terminate_at(&mut self, time: f64) -> bool {
        if time <= self.clock {
            return false;
        }
        self.termination_time = Some(time);
        true
    }

    pub fn is_time_to_terminate(&self) -> bool {
        self.termination_time.map_or(false, |t| self.clock >= t)
    }
}

fn payloads_equal(a: &Box<dyn EventData>, b: &Box<dyn EventData>) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
