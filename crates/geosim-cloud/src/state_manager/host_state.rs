use serde::Serialize;

use crate::request::Instance;

/// Total resource amounts of one host.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct HostCapacity {
    pub cpu: u32,
    pub ram: u32,
    pub storage: u32,
    pub bw: u32,
}

impl HostCapacity {
    pub fn initial_state(&self) -> HostState {
        HostState {
            cpu: self.cpu,
            ram: self.ram,
            storage: self.storage,
            bw: self.bw,
            instance_num: 0,
        }
    }
}

/// Available resource amounts of one host plus the number of instances it runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HostState {
    pub cpu: u32,
    pub ram: u32,
    pub storage: u32,
    pub bw: u32,
    pub instance_num: u32,
}

impl HostState {
    pub fn can_fit(&self, instance: &Instance) -> bool {
        self.cpu >= instance.cpu && self.ram >= instance.ram && self.storage >= instance.storage && self.bw >= instance.bw
    }

    pub fn allocate(&mut self, instance: &Instance) {
        self.cpu -= instance.cpu;
        self.ram -= instance.ram;
        self.storage -= instance.storage;
        self.bw -= instance.bw;
        self.instance_num += 1;
    }

    pub fn release(&mut self, instance: &Instance) {
        self.cpu += instance.cpu;
        self.ram += instance.ram;
        self.storage += instance.storage;
        self.bw += instance.bw;
        self.instance_num -= 1;
    }

    /// A host is powered on while it runs at least one instance.
    pub fn is_powered_on(&self) -> bool {
        self.instance_num > 0
    }
}
