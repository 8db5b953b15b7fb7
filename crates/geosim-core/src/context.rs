//! Accessing simulation from components.

use std::cell::RefCell;
use std::rc::Rc;

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::Distribution;

use crate::component::Id;
use crate::event::{EventData, EventSerial, EventTag};
use crate::state::SimulationState;

/// A facade for accessing the simulation state and producing events from simulation components.
pub struct SimulationContext {
    id: Id,
    name: String,
    sim_state: Rc<RefCell<SimulationState>>,
    names: Rc<RefCell<Vec<String>>>,
}

impl SimulationContext {
    pub(crate) fn new(
        id: Id,
        name: &str,
        sim_state: Rc<RefCell<SimulationState>>,
        names: Rc<RefCell<Vec<String>>>,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            sim_state,
            names,
        }
    }

    /// Returns the identifier of component associated with this context.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the name of component associated with this context.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim_state.borrow().time()
    }

    /// Returns a random float in the range _[0, 1)_
    /// using the simulation-wide random number generator.
    pub fn rand(&mut self) -> f64 {
        self.sim_state.borrow_mut().rand()
    }

    /// Returns a random number in the specified range
    /// using the simulation-wide random number generator.
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.sim_state.borrow_mut().gen_range(range)
    }

    /// Returns a random value from the specified distribution
    /// using the simulation-wide random number generator.
    pub fn sample_from_distribution<T, Dist: Distribution<T>>(&mut self, dist: &Dist) -> T {
        self.sim_state.borrow_mut().sample_from_distribution(dist)
    }

    /// Creates new event with specified tag, payload, destination and delay.
    pub fn emit<T>(&mut self, tag: EventTag, data: T, dst: Id, delay: f64) -> EventSerial
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().add_event(tag, data, self.id, dst, delay)
    }

    /// Creates new immediate (zero-delay) event with specified tag, payload and destination.
    pub fn emit_now<T>(&mut self, tag: EventTag, data: T, dst: Id) -> EventSerial
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().add_event(tag, data, self.id, dst, 0.)
    }

    /// Creates new event for itself with specified tag, payload and delay.
    pub fn emit_self<T>(&mut self, tag: EventTag, data: T, delay: f64) -> EventSerial
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().add_event(tag, data, self.id, self.id, delay)
    }

    /// Creates new immediate event for itself with specified tag and payload.
    pub fn emit_self_now<T>(&mut self, tag: EventTag, data: T) -> EventSerial
    where
        T: EventData,
    {
        self.sim_state.borrow_mut().add_event(tag, data, self.id, self.id, 0.)
    }

    /// Lookup component name by its identifier.
    pub fn lookup_name(&self, id: Id) -> String {
        self.names.borrow()[id as usize].clone()
    }
}
