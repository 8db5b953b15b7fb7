//! High-level simulation facade: builds the components from configuration,
//! submits workloads and runs the simulation to completion.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use sugars::{rc, refcell};

use geosim_core::{EventTag, Id, Simulation, SimulationContext};

use crate::cis::CloudInformationService;
use crate::collaboration::CollaborationManager;
use crate::config::{ConfigError, DatacentersConfig, IntraSchedulerConfig, LinkConfig, LoadBalancerConfig};
use crate::datacenter::Datacenter;
use crate::events::NewUserRequests;
use crate::generator::{GeneratorConfig, UserRequestGenerator};
use crate::inter_scheduler::{default_target, inter_policy_resolver, InterScheduler, ScheduleTarget};
use crate::intra_scheduler::{placement_policy_resolver, IntraScheduler};
use crate::load_balancer::{load_balancer_resolver, LoadBalancer};
use crate::network::NetworkTopology;
use crate::record::Recorder;
use crate::request::RequestRegistry;
use crate::state_manager::{HostCapacity, PartitionRangesManager, StatesManager};

/// A geo-distributed cloud simulation assembled from configuration: the data
/// centers, the CIS with its collaboration zones and the shared network.
pub struct GeoCloudSimulation {
    sim: Simulation,
    ctx: SimulationContext,
    cis_id: Id,
    registry: Rc<RefCell<RequestRegistry>>,
    network: Rc<RefCell<NetworkTopology>>,
    recorder: Rc<RefCell<dyn Recorder>>,
    datacenters: IndexMap<String, Rc<RefCell<Datacenter>>>,
    seed: u64,
}

impl GeoCloudSimulation {
    /// Builds all components. Delay triples are (row, column, delay) pairs as
    /// returned by [`crate::config::load_delay_matrix`].
    pub fn new(
        mut sim: Simulation,
        config: DatacentersConfig,
        region_delays: &[(String, String, f64)],
        area_delays: &[(String, String, f64)],
        links: &[LinkConfig],
        recorder: Rc<RefCell<dyn Recorder>>,
    ) -> Result<Self, ConfigError> {
        let registry = Rc::new(RefCell::new(RequestRegistry::new()));
        let network = Rc::new(RefCell::new(NetworkTopology::new()));
        {
            let mut network = network.borrow_mut();
            for (from, to, delay) in region_delays {
                network.add_region_delay(from, to, *delay);
            }
            for (area, region, delay) in area_delays {
                network.add_area_delay(area, region, *delay);
            }
        }

        let ctx = sim.create_context("simulation");
        let cis_ctx = sim.create_context("cis");
        let cis_id = cis_ctx.id();
        let mut seed_seq = config.seed;

        let mut collaboration = CollaborationManager::new();
        let mut datacenters: IndexMap<String, Rc<RefCell<Datacenter>>> = IndexMap::new();
        for zone in &config.collaborations {
            collaboration.add_zone(zone.id, build_load_balancer(&zone.load_balancer)?);
            for dc_config in &zone.datacenters {
                if datacenters.contains_key(&dc_config.name) {
                    return Err(ConfigError::Invalid(format!("duplicate datacenter name {}", dc_config.name)));
                }
                let dc_ctx = sim.create_context(&dc_config.name);
                let dc_id = dc_ctx.id();
                network.borrow_mut().set_dc_region(dc_id, &dc_config.region);

                let ranges = match &dc_config.partitions {
                    Some(ranges) => {
                        let ranges: Vec<(u32, u32)> = ranges.iter().map(|r| (r[0], r[1])).collect();
                        PartitionRangesManager::from_ranges(ranges, dc_config.host_num).map_err(ConfigError::Invalid)?
                    }
                    None => {
                        if dc_config.partition_num == 0 || dc_config.partition_num > dc_config.host_num {
                            return Err(ConfigError::Invalid(format!(
                                "{}: cannot split {} hosts into {} partitions",
                                dc_config.name, dc_config.host_num, dc_config.partition_num
                            )));
                        }
                        PartitionRangesManager::average_divided(dc_config.host_num, dc_config.partition_num)
                    }
                };
                let partition_num = ranges.partition_num();
                let capacity = HostCapacity {
                    cpu: dc_config.host.cpu,
                    ram: dc_config.host.ram,
                    storage: dc_config.host.storage,
                    bw: dc_config.host.bw,
                };
                let mut states = StatesManager::new(dc_config.host_num, capacity, ranges, dc_config.syn_gap);

                let mut intra_schedulers = Vec::new();
                for (i, scfg) in dc_config.intra_schedulers.iter().enumerate() {
                    seed_seq += 1;
                    let scheduler =
                        build_intra_scheduler(i as u32, &dc_config.name, scfg, partition_num, &mut states, seed_seq)?;
                    intra_schedulers.push(scheduler);
                }
                if intra_schedulers.is_empty() {
                    return Err(ConfigError::Invalid(format!("{}: no intra-schedulers", dc_config.name)));
                }

                let dc = rc!(refcell!(Datacenter::new(
                    dc_ctx,
                    cis_id,
                    &dc_config.region,
                    registry.clone(),
                    network.clone(),
                    recorder.clone(),
                    states,
                    intra_schedulers,
                    build_load_balancer(&dc_config.load_balancer)?,
                    dc_config.queue_batch_num,
                    dc_config.forward_threshold,
                    dc_config.prices.cpu_unit_price,
                    dc_config.prices.ram_unit_price,
                )));
                sim.add_handler(&dc_config.name, dc.clone());
                collaboration.register_dc(zone.id, dc_id, dc_config.dc_state_syn_gap);
                datacenters.insert(dc_config.name.clone(), dc);
            }
        }

        for zone in &config.collaborations {
            for (i, scfg) in zone.center_schedulers.iter().enumerate() {
                let policy = inter_policy_resolver(&scfg.r#type)
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown inter-scheduler type {}", scfg.r#type)))?;
                let target = match scfg.target.as_deref() {
                    None => default_target(&scfg.r#type),
                    Some("Datacenter") => ScheduleTarget::Datacenter { support_forward: true },
                    Some("DatacenterNoForward") => ScheduleTarget::Datacenter { support_forward: false },
                    Some("Host") => ScheduleTarget::Host,
                    Some(other) => return Err(ConfigError::Invalid(format!("unknown scheduling target {}", other))),
                };
                seed_seq += 1;
                let mut scheduler = InterScheduler::new(
                    i as u32,
                    &format!("collaboration{}-scheduler{}", zone.id, i),
                    zone.id,
                    policy,
                    target,
                    scfg.schedule_cost_time,
                    scfg.batch_num,
                    seed_seq,
                );
                for dc_config in &zone.datacenters {
                    let dc_id = datacenters[&dc_config.name].borrow().id();
                    scheduler.set_dc_syn_gap(dc_id, dc_config.dc_state_syn_gap);
                }
                collaboration.add_center_scheduler(zone.id, scheduler);
            }
            if collaboration.scheduler_num(zone.id) == 0 {
                return Err(ConfigError::Invalid(format!("collaboration {}: no center schedulers", zone.id)));
            }
        }

        {
            let mut network = network.borrow_mut();
            for link in links {
                let src = datacenters
                    .get(&link.src)
                    .ok_or_else(|| ConfigError::Invalid(format!("link references unknown datacenter {}", link.src)))?
                    .borrow()
                    .id();
                let dst = datacenters
                    .get(&link.dst)
                    .ok_or_else(|| ConfigError::Invalid(format!("link references unknown datacenter {}", link.dst)))?
                    .borrow()
                    .id();
                network.add_link(src, dst, link.bandwidth, link.unit_price);
            }
        }

        let queue_batch_num = config
            .collaborations
            .iter()
            .map(|zone| zone.load_balancer.batch_size)
            .max()
            .unwrap_or(100);
        let cis = rc!(refcell!(CloudInformationService::new(
            cis_ctx,
            collaboration,
            registry.clone(),
            network.clone(),
            recorder.clone(),
            queue_batch_num,
            config.change_collaboration.map(|c| c.gap),
        )));
        for dc in datacenters.values() {
            cis.borrow_mut().add_datacenter(dc.clone());
        }
        sim.add_handler("cis", cis.clone());
        sim.set_datacenter_count(datacenters.len());
        cis.borrow_mut().start();

        Ok(Self {
            sim,
            ctx,
            cis_id,
            registry,
            network,
            recorder,
            datacenters,
            seed: config.seed,
        })
    }

    /// Fills the registry with a synthetic workload and schedules its
    /// submission events.
    pub fn submit_generated_requests(&mut self, config: GeneratorConfig) {
        let origins: Vec<Id> = self.datacenters.values().map(|dc| dc.borrow().id()).collect();
        let mut generator = UserRequestGenerator::new(config, self.seed.wrapping_add(1));
        let submissions = generator.generate(&mut self.registry.borrow_mut(), &origins);
        let mut i = 0;
        while i < submissions.len() {
            let time = submissions[i].0;
            let mut request_ids = Vec::new();
            while i < submissions.len() && submissions[i].0 == time {
                request_ids.push(submissions[i].1);
                i += 1;
            }
            self.submit_requests_at(request_ids, time);
        }
    }

    /// Schedules the submission of already-registered user requests.
    pub fn submit_requests_at(&mut self, request_ids: Vec<u32>, time: f64) {
        let delay = time - self.sim.time();
        self.ctx
            .emit(EventTag::UserRequestSend, NewUserRequests { request_ids }, self.cis_id, delay);
    }

    /// Requests the simulation to stop once the clock reaches the given time.
    pub fn terminate_at(&mut self, time: f64) -> bool {
        self.sim.terminate_at(time)
    }

    /// Runs the simulation until it stops and prints the final report.
    /// Returns the final simulation time.
    pub fn run(&mut self) -> f64 {
        let finish = self.sim.run();
        for dc in self.datacenters.values() {
            let dc = dc.borrow();
            for (partition, conflicts) in dc.partition_conflicts() {
                println!("{}'s Partition{} has {} conflicts.", dc.name(), partition, conflicts);
            }
            println!("{} all has {} conflicts.", dc.name(), dc.total_conflicts());
            println!(
                "{} has a maximum of {} hosts powered on, with a total usage time of {} ms for all hosts",
                dc.name(),
                dc.max_power_on_num(),
                dc.total_power_on_time(finish)
            );
            self.recorder.borrow_mut().datacenter_summary(
                dc.name(),
                dc.total_conflicts(),
                dc.max_power_on_num(),
                dc.total_power_on_time(finish),
            );
        }
        println!("Simulation finished at {} ms.", finish);
        self.recorder
            .borrow_mut()
            .simulation_summary(finish, self.network.borrow().network_tco());
        self.recorder.borrow_mut().flush();
        finish
    }

    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    pub fn registry(&self) -> Rc<RefCell<RequestRegistry>> {
        self.registry.clone()
    }

    pub fn network(&self) -> Rc<RefCell<NetworkTopology>> {
        self.network.clone()
    }

    pub fn datacenter(&self, name: &str) -> Rc<RefCell<Datacenter>> {
        self.datacenters[name].clone()
    }

    pub fn datacenter_id(&self, name: &str) -> Id {
        self.datacenters[name].borrow().id()
    }
}

fn build_load_balancer(config: &LoadBalancerConfig) -> Result<Box<dyn LoadBalancer>, ConfigError> {
    load_balancer_resolver(&config.r#type, config.batch_size, config.cost_time)
        .ok_or_else(|| ConfigError::Invalid(format!("unknown load balancer type {}", config.r#type)))
}

fn build_intra_scheduler(
    id: u32,
    dc_name: &str,
    config: &IntraSchedulerConfig,
    total_partitions: u32,
    states: &mut StatesManager,
    seed: u64,
) -> Result<IntraScheduler, ConfigError> {
    let policy = placement_policy_resolver(&config.r#type, seed)
        .ok_or_else(|| ConfigError::Invalid(format!("unknown intra-scheduler type {}", config.r#type)))?;
    let partition_num = config.partition_num.unwrap_or(total_partitions);
    if partition_num == 0 || partition_num > total_partitions || config.first_partition_id >= total_partitions {
        return Err(ConfigError::Invalid(format!(
            "{}: scheduler {} views partitions [{}, +{}) out of {} total",
            dc_name, id, config.first_partition_id, partition_num, total_partitions
        )));
    }
    let mut scheduler = IntraScheduler::new(
        id,
        &format!("{}-scheduler{}", dc_name, id),
        policy,
        config.first_partition_id,
        partition_num,
        config.schedule_cost_time,
        config.batch_num,
    );
    scheduler.set_state_index(states.register_scheduler(config.first_partition_id, partition_num));
    Ok(scheduler)
}
