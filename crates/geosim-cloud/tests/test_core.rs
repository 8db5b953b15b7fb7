use std::cell::RefCell;
use std::rc::Rc;

use sugars::{rc, refcell};

use geosim_core::Simulation;

use geosim_cloud::config::{
    CollaborationConfig, DatacenterConfig, DatacentersConfig, HostTemplateConfig, InterSchedulerConfig,
    IntraSchedulerConfig, LoadBalancerConfig, PriceConfig,
};
use geosim_cloud::record::MemoryRecorder;
use geosim_cloud::request::RequestState;
use geosim_cloud::simulation::GeoCloudSimulation;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn intra(policy: &str) -> IntraSchedulerConfig {
    IntraSchedulerConfig {
        r#type: policy.to_owned(),
        first_partition_id: 0,
        partition_num: None,
        schedule_cost_time: 0.25,
        batch_num: 100,
    }
}

fn dc(name: &str, region: &str, host_num: u32, host_cpu: u32, intra_schedulers: Vec<IntraSchedulerConfig>) -> DatacenterConfig {
    DatacenterConfig {
        name: name.to_owned(),
        region: region.to_owned(),
        host_num,
        host: HostTemplateConfig {
            cpu: host_cpu,
            ram: 1024,
            storage: 1024,
            bw: 1024,
        },
        partitions: None,
        partition_num: 1,
        intra_schedulers,
        load_balancer: LoadBalancerConfig::default(),
        syn_gap: 0.,
        dc_state_syn_gap: 0.,
        queue_batch_num: 100,
        forward_threshold: None,
        prices: PriceConfig::default(),
    }
}

fn topology(datacenters: Vec<DatacenterConfig>, inter_policy: &str) -> DatacentersConfig {
    DatacentersConfig {
        collaborations: vec![CollaborationConfig {
            id: 0,
            load_balancer: LoadBalancerConfig::default(),
            center_schedulers: vec![InterSchedulerConfig {
                r#type: inter_policy.to_owned(),
                target: None,
                schedule_cost_time: 0.3,
                batch_num: 100,
            }],
            datacenters,
        }],
        change_collaboration: None,
        seed: 123,
    }
}

fn build(config: DatacentersConfig, recorder: Rc<RefCell<MemoryRecorder>>) -> GeoCloudSimulation {
    let sim = Simulation::new(config.seed);
    GeoCloudSimulation::new(sim, config, &[], &[], &[], recorder).unwrap()
}

#[test]
// One request with two instances placed by first fit onto the same host.
// Both run out their lifetime, the group and the request finish and the
// power record sees a single host.
fn test_single_request_lifecycle() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let config = topology(vec![dc("dc1", "eu", 4, 8, vec![intra("FirstFit")])], "Simple");
    let mut sim = build(config, recorder.clone());

    let ur = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(0., sim.datacenter_id("dc1"), "area1", 1000.);
        let group = registry.create_group(ur, 100., 3);
        registry.create_instance(group, 4, 8, 8, 8, 50.);
        registry.create_instance(group, 4, 8, 8, 8, 50.);
        ur
    };
    sim.submit_requests_at(vec![ur], 0.);
    let finish = sim.run();

    assert!(finish >= 50.);
    let registry = sim.registry();
    let registry = registry.borrow();
    assert_eq!(registry.user_request(ur).state, RequestState::Success);
    for group_id in &registry.user_request(ur).group_ids {
        for &instance_id in &registry.group(*group_id).instance_ids {
            assert_eq!(registry.instance(instance_id).state, RequestState::Success);
            assert_eq!(registry.instance(instance_id).host_id, Some(0));
        }
    }
    let dc = sim.datacenter("dc1");
    assert_eq!(dc.borrow().total_conflicts(), 0);
    assert_eq!(dc.borrow().max_power_on_num(), 1);
    assert_eq!(recorder.borrow().count("instance_created"), 2);
    assert_eq!(recorder.borrow().count("instance_finished"), 2);
    assert_eq!(recorder.borrow().count("user_request_finished"), 1);
}

#[test]
// Two intra-schedulers propose the single suitable host from identical live
// views within the same time slice. The commit accepts the first proposal and
// rejects the second, which then finds no free host and runs out of retries.
fn test_commit_conflict_exhausts_retries() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let config = topology(
        vec![dc("dc1", "eu", 1, 4, vec![intra("FirstFit"), intra("FirstFit")])],
        "Simple",
    );
    let mut sim = build(config, recorder);

    let dc_id = sim.datacenter_id("dc1");
    let (ur1, ur2) = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let mut make = |registry: &mut geosim_cloud::request::RequestRegistry| {
            let ur = registry.create_user_request(0., dc_id, "area1", 1000.);
            let group = registry.create_group(ur, 100., 1);
            registry.create_instance(group, 3, 8, 8, 8, 10.);
            ur
        };
        (make(&mut registry), make(&mut registry))
    };
    sim.submit_requests_at(vec![ur1, ur2], 0.);
    sim.run();

    let registry = sim.registry();
    let registry = registry.borrow();
    let (success, failed, total) = registry.request_counts();
    assert_eq!((success, failed, total), (1, 1, 2));
    let failed_ur = if registry.user_request(ur1).state == RequestState::Failed { ur1 } else { ur2 };
    assert!(registry
        .user_request(failed_ur)
        .fail_reasons
        .iter()
        .any(|r| r.contains("retry budget exhausted")));
    assert_eq!(sim.datacenter("dc1").borrow().total_conflicts(), 1);
}

#[test]
// Two fast schedulers race for the single host; the loser's conflict exhausts
// the zero retry budget and terminally fails the request while a third,
// slower scheduler still has a placement proposal in flight. The late commit
// must drop that proposal instead of starting an instance of a failed
// request.
fn test_late_commit_after_request_failure_is_dropped() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let slow = intra("FirstFit");
    let mut fast = intra("FirstFit");
    fast.schedule_cost_time = 0.05;
    let config = topology(
        vec![dc("dc1", "eu", 1, 8, vec![slow, fast.clone(), fast])],
        "Simple",
    );
    let mut sim = build(config, recorder.clone());

    let dc_id = sim.datacenter_id("dc1");
    let ur = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(0., dc_id, "area1", 1000.);
        for cpu in [3, 5, 5] {
            let group = registry.create_group(ur, 100., 0);
            registry.create_instance(group, cpu, 8, 8, 8, -1.);
        }
        ur
    };
    sim.submit_requests_at(vec![ur], 0.);
    sim.run();

    let registry = sim.registry();
    let registry = registry.borrow();
    assert_eq!(registry.user_request(ur).state, RequestState::Failed);
    // the small instance was proposed by the slow scheduler and must stay dead
    let small_group = registry.user_request(ur).group_ids[0];
    let small = registry.group(small_group).instance_ids[0];
    assert_eq!(registry.instance(small).cpu, 3);
    assert_eq!(registry.instance(small).state, RequestState::Failed);
    assert!(registry.instance(small).start_time.is_none());
    // only the winner of the host race ever started
    assert_eq!(recorder.borrow().count("instance_created"), 1);
    assert_eq!(recorder.borrow().count("instance_finished"), 1);
    assert_eq!(sim.datacenter("dc1").borrow().total_conflicts(), 1);
}

#[test]
// The run is cut off while the only intra-scheduler is still inside its long
// scheduling round: the instance has left the queue but is not placed yet.
fn test_instance_in_flight_is_scheduling() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let mut in_flight = intra("FirstFit");
    in_flight.schedule_cost_time = 100.;
    let config = topology(vec![dc("dc1", "eu", 2, 8, vec![in_flight])], "Simple");
    let mut sim = build(config, recorder);

    let dc_id = sim.datacenter_id("dc1");
    let ur = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(0., dc_id, "area1", 1000.);
        let group = registry.create_group(ur, 100., 3);
        registry.create_instance(group, 4, 8, 8, 8, 1000.);
        ur
    };
    sim.submit_requests_at(vec![ur], 0.);
    sim.terminate_at(50.);
    let finish = sim.run();

    assert_eq!(finish, 50.);
    let registry = sim.registry();
    let registry = registry.borrow();
    let group = registry.user_request(ur).group_ids[0];
    let instance = registry.group(group).instance_ids[0];
    assert_eq!(registry.instance(instance).state, RequestState::Scheduling);
    assert!(registry.instance(instance).start_time.is_none());
}

#[test]
// A pending lifetime-end event keeps the simulation alive, so the run stops
// exactly at the requested termination time with the instance still running.
fn test_terminate_at_leaves_instances_running() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let config = topology(vec![dc("dc1", "eu", 2, 8, vec![intra("FirstFit")])], "Simple");
    let mut sim = build(config, recorder);

    let dc_id = sim.datacenter_id("dc1");
    let ur = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(0., dc_id, "area1", 1000.);
        let group = registry.create_group(ur, 100., 3);
        registry.create_instance(group, 4, 8, 8, 8, 1000.);
        ur
    };
    sim.submit_requests_at(vec![ur], 0.);
    sim.terminate_at(50.);
    let finish = sim.run();

    assert_eq!(finish, 50.);
    let registry = sim.registry();
    let registry = registry.borrow();
    let group = registry.user_request(ur).group_ids[0];
    let instance = registry.group(group).instance_ids[0];
    assert_eq!(registry.instance(instance).state, RequestState::Running);
}

#[test]
// With every instance running forever, only the periodic state
// synchronization chain remains in the future queue and the run stops on its
// own well before any termination deadline.
fn test_only_sync_events_stop_the_run() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let mut datacenter = dc("dc1", "eu", 2, 8, vec![intra("FirstFit")]);
    datacenter.dc_state_syn_gap = 10.;
    let config = topology(vec![datacenter], "Simple");
    let mut sim = build(config, recorder);

    let dc_id = sim.datacenter_id("dc1");
    let ur = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(0., dc_id, "area1", 1000.);
        let group = registry.create_group(ur, 100., 3);
        registry.create_instance(group, 4, 8, 8, 8, -1.);
        ur
    };
    sim.submit_requests_at(vec![ur], 0.);
    sim.terminate_at(1000.);
    let finish = sim.run();

    assert!(finish < 1000.);
    let registry = sim.registry();
    let registry = registry.borrow();
    let group = registry.user_request(ur).group_ids[0];
    let instance = registry.group(group).instance_ids[0];
    assert_eq!(registry.instance(instance).state, RequestState::Running);
    assert_eq!(sim.datacenter("dc1").borrow().max_power_on_num(), 1);
}

#[test]
// Same seed, same workload: two runs produce identical clocks and outcomes.
fn test_reproducibility() {
    init_logger();
    let run = || {
        let recorder = rc!(refcell!(MemoryRecorder::new()));
        let config = topology(
            vec![dc("dc1", "eu", 4, 8, vec![intra("Random"), intra("Random")])],
            "Random",
        );
        let mut sim = build(config, recorder);
        let dc_id = sim.datacenter_id("dc1");
        let mut requests = Vec::new();
        {
            let registry = sim.registry();
            let mut registry = registry.borrow_mut();
            for i in 0..10 {
                let ur = registry.create_user_request(i as f64, dc_id, "area1", 1000.);
                let group = registry.create_group(ur, 100., 2);
                registry.create_instance(group, 4, 8, 8, 8, 20.);
                requests.push((i as f64, ur));
            }
        }
        for (time, ur) in requests {
            sim.submit_requests_at(vec![ur], time);
        }
        let finish = sim.run();
        let registry = sim.registry();
        let counts = registry.borrow().request_counts();
        (finish, counts, sim.event_count())
    };
    assert_eq!(run(), run());
}
