//! Simulation configuration and execution.

use std::cell::RefCell;
use std::rc::Rc;

use rand::distributions::uniform::{SampleRange, SampleUniform};

use crate::component::Id;
use crate::context::SimulationContext;
use crate::handler::EventHandler;
use crate::log::log_undelivered_event;
use crate::state::SimulationState;

/// Represents a simulation, provides methods for its configuration and execution.
///
/// The run loop alternates between delivering the deferred queue to the
/// registered handlers and moving the next same-time slice of the future queue
/// into the deferred queue. The run stops when the future queue is empty,
/// when it holds nothing but recurring synchronization events, or when the
/// clock reaches the termination time.
pub struct Simulation {
    sim_state: Rc<RefCell<SimulationState>>,
    names: Rc<RefCell<Vec<String>>>,
    handlers: Vec<Option<Rc<RefCell<dyn EventHandler>>>>,
    dc_count: usize,
}

impl Simulation {
    /// Creates a new simulation with the specified random seed.
    pub fn new(seed: u64) -> Self {
        Self {
            sim_state: Rc::new(RefCell::new(SimulationState::new(seed))),
            names: Rc::new(RefCell::new(Vec::new())),
            handlers: Vec::new(),
            dc_count: 0,
        }
    }

    /// Registers the component and returns its identifier.
    pub fn register(&mut self, name: &str) -> Id {
        let id = self.sim_state.borrow_mut().register(name);
        if id as usize == self.names.borrow().len() {
            self.names.borrow_mut().push(name.to_owned());
            self.handlers.push(None);
        }
        id
    }

    /// Returns the identifier of component by its name.
    pub fn lookup_id(&self, name: &str) -> Id {
        self.sim_state.borrow().lookup_id(name)
    }

    /// Returns the name of component by its identifier.
    pub fn lookup_name(&self, id: Id) -> String {
        self.sim_state.borrow().lookup_name(id)
    }

    /// Creates a new simulation context with the specified name.
    pub fn create_context<S>(&mut self, name: S) -> SimulationContext
    where
        S: AsRef<str>,
    {
        let id = self.register(name.as_ref());
        SimulationContext::new(id, name.as_ref(), self.sim_state.clone(), self.names.clone())
    }

    /// Attaches the event handler to the component, returns the component identifier.
    pub fn add_handler<S>(&mut self, name: S, handler: Rc<RefCell<dyn EventHandler>>) -> Id
    where
        S: AsRef<str>,
    {
        let id = self.register(name.as_ref());
        self.handlers[id as usize] = Some(handler);
        id
    }

    /// Sets the number of data centers used by the only-sync idleness check.
    pub fn set_datacenter_count(&mut self, dc_count: usize) {
        self.dc_count = dc_count;
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim_state.borrow().time()
    }

    /// Returns the total number of created events.
    pub fn event_count(&self) -> u64 {
        self.sim_state.borrow().event_count()
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

    /// Requests the simulation to stop once the clock reaches the given time.
    /// Returns `false` (and changes nothing) if the time is not in the future.
    pub fn terminate_at(&mut self, time: f64) -> bool {
        self.sim_state.borrow_mut().terminate_at(time)
    }

    /// Performs one iteration of the run loop: delivers all deferred events,
    /// then moves the next same-time slice into the deferred queue.
    ///
    /// Returns `false` when the simulation has stopped and no further
    /// progress is possible.
    pub fn step(&mut self) -> bool {
        self.dispatch_deferred();
        {
            let state = self.sim_state.borrow();
            if state.future_is_empty() || state.has_only_sync_events(self.dc_count) {
                return false;
            }
        }
        self.sim_state.borrow_mut().process_time_slice();
        !self.sim_state.borrow().is_time_to_terminate()
    }

    /// Runs the simulation until it stops, returns the final simulation time.
    pub fn run(&mut self) -> f64 {
        while self.step() {}
        self.time()
    }

    fn dispatch_deferred(&mut self) {
        loop {
            let event = match self.sim_state.borrow_mut().pop_deferred() {
                Some(event) => event,
                None => break,
            };
            if let Some(handler) = &self.handlers[event.dst as usize] {
                handler.clone().borrow_mut().on(event);
            } else {
                log_undelivered_event(event);
            }
        }
    }
}
