use std::cell::RefCell;
use std::rc::Rc;

use sugars::{rc, refcell};

use geosim_core::Simulation;

use geosim_cloud::config::{
    CollaborationConfig, DatacenterConfig, DatacentersConfig, HostTemplateConfig, InterSchedulerConfig,
    IntraSchedulerConfig, LinkConfig, LoadBalancerConfig, PriceConfig,
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

fn dc(name: &str, region: &str, host_num: u32, host_cpu: u32) -> DatacenterConfig {
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
        intra_schedulers: vec![intra("FirstFit")],
        load_balancer: LoadBalancerConfig::default(),
        syn_gap: 0.,
        dc_state_syn_gap: 0.,
        queue_batch_num: 100,
        forward_threshold: None,
        prices: PriceConfig::default(),
    }
}

fn inter(policy: &str, target: Option<&str>) -> InterSchedulerConfig {
    InterSchedulerConfig {
        r#type: policy.to_owned(),
        target: target.map(|t| t.to_owned()),
        schedule_cost_time: 0.3,
        batch_num: 100,
    }
}

fn topology(datacenters: Vec<DatacenterConfig>, scheduler: InterSchedulerConfig) -> DatacentersConfig {
    DatacentersConfig {
        collaborations: vec![CollaborationConfig {
            id: 0,
            load_balancer: LoadBalancerConfig::default(),
            center_schedulers: vec![scheduler],
            datacenters,
        }],
        change_collaboration: None,
        seed: 123,
    }
}

fn delays(table: &[(&str, &str, f64)]) -> Vec<(String, String, f64)> {
    table.iter().map(|(a, b, d)| (a.to_string(), b.to_string(), *d)).collect()
}

fn link(src: &str, dst: &str, bandwidth: f64) -> LinkConfig {
    LinkConfig {
        src: src.to_owned(),
        dst: dst.to_owned(),
        bandwidth,
        unit_price: 1.,
    }
}

#[test]
// The only data center within the group's access latency bound is too small
// for its demand, so the candidate filter leaves nothing and the request
// fails without ever touching the remote data center.
fn test_no_candidate_within_latency() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let config = topology(
        vec![dc("near", "eu", 1, 8), dc("far", "us", 8, 32)],
        inter("Simple", None),
    );
    let region_delays = delays(&[("eu", "us", 50.)]);
    let sim = Simulation::new(config.seed);
    let mut sim = GeoCloudSimulation::new(sim, config, &region_delays, &[], &[], recorder.clone()).unwrap();

    let origin = sim.datacenter_id("near");
    let ur = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(0., origin, "area1", 1000.);
        let group = registry.create_group(ur, 10., 2);
        registry.create_instance(group, 16, 8, 8, 8, 20.);
        ur
    };
    sim.submit_requests_at(vec![ur], 0.);
    sim.run();

    let registry = sim.registry();
    let registry = registry.borrow();
    assert_eq!(registry.user_request(ur).state, RequestState::Failed);
    assert!(registry.user_request(ur).fail_reasons.iter().any(|r| r.contains("no candidate")));
    assert_eq!(recorder.borrow().count("instance_created"), 0);
}

#[test]
// Two requests of the same shape: one group pinned near the user, a big group
// that only fits the remote data center, and an affinity edge between them.
// The first request reserves 60 of the 100 Gb/s link; the second needs 50,
// cannot reserve it and fails, while the first keeps its reservation.
fn test_bandwidth_reservation_all_or_nothing() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let config = topology(vec![dc("near", "eu", 1, 8), dc("far", "us", 1, 32)], inter("Simple", None));
    let region_delays = delays(&[("eu", "us", 50.)]);
    let links = vec![link("near", "far", 100.)];
    let sim = Simulation::new(config.seed);
    let mut sim = GeoCloudSimulation::new(sim, config, &region_delays, &[], &links, recorder.clone()).unwrap();

    let origin = sim.datacenter_id("near");
    let submit = |sim: &mut GeoCloudSimulation, time: f64, edge_bw: f64| {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(time, origin, "area1", 1000.);
        let pinned = registry.create_group(ur, 10., 2);
        registry.create_instance(pinned, 4, 8, 8, 8, -1.);
        let big = registry.create_group(ur, 100., 2);
        registry.create_instance(big, 16, 8, 8, 8, -1.);
        registry.add_edge(ur, pinned, big, edge_bw);
        drop(registry);
        sim.submit_requests_at(vec![ur], time);
        ur
    };
    let ur1 = submit(&mut sim, 0., 60.);
    let ur2 = submit(&mut sim, 10., 50.);
    sim.run();

    let near = sim.datacenter_id("near");
    let far = sim.datacenter_id("far");
    assert_eq!(sim.network().borrow().bw_between(near, far), 40.);
    let registry = sim.registry();
    let registry = registry.borrow();
    assert_ne!(registry.user_request(ur1).state, RequestState::Failed);
    assert_eq!(registry.user_request(ur2).state, RequestState::Failed);
    assert!(registry
        .user_request(ur2)
        .fail_reasons
        .iter()
        .any(|r| r.contains("bandwidth reservation failed")));
    let big1 = registry.user_request(ur1).group_ids[1];
    assert_eq!(registry.group(big1).receive_datacenter, Some(far));
    // the final report prices the provisioned capacity, not the reservations
    assert!(recorder
        .borrow()
        .events
        .iter()
        .any(|(kind, value)| kind == "simulation_summary" && *value == 100.));
}

#[test]
// A host-target scheduler books concrete hosts from the synced per-host
// snapshot; the data center only validates and accepts them.
fn test_host_target_scheduling() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let config = topology(vec![dc("dc1", "eu", 2, 8)], inter("Simple", Some("Host")));
    let sim = Simulation::new(config.seed);
    let mut sim = GeoCloudSimulation::new(sim, config, &[], &[], &[], recorder).unwrap();

    let origin = sim.datacenter_id("dc1");
    let ur = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(0., origin, "area1", 1000.);
        let group = registry.create_group(ur, 100., 2);
        registry.create_instance(group, 8, 8, 8, 8, 20.);
        registry.create_instance(group, 8, 8, 8, 8, 20.);
        ur
    };
    sim.submit_requests_at(vec![ur], 0.);
    sim.run();

    let registry = sim.registry();
    let registry = registry.borrow();
    assert_eq!(registry.user_request(ur).state, RequestState::Success);
    let group = registry.user_request(ur).group_ids[0];
    let mut hosts: Vec<u32> = registry
        .group(group)
        .instance_ids
        .iter()
        .map(|id| registry.instance(*id).host_id.unwrap())
        .collect();
    hosts.sort_unstable();
    assert_eq!(hosts, vec![0, 1]);
    assert_eq!(sim.datacenter("dc1").borrow().total_conflicts(), 0);
}

#[test]
// The first data center is configured to forward everything; the group comes
// back to the zone queue and the round-robin policy places it at the second
// data center on the next round.
fn test_overloaded_datacenter_forwards_groups() {
    init_logger();
    let recorder = rc!(refcell!(MemoryRecorder::new()));
    let mut first = dc("first", "eu", 2, 8);
    first.forward_threshold = Some(0);
    let config = topology(vec![first, dc("second", "eu", 2, 8)], inter("Round", None));
    let sim = Simulation::new(config.seed);
    let mut sim = GeoCloudSimulation::new(sim, config, &[], &[], &[], recorder).unwrap();

    let origin = sim.datacenter_id("first");
    let ur = {
        let registry = sim.registry();
        let mut registry = registry.borrow_mut();
        let ur = registry.create_user_request(0., origin, "area1", 1000.);
        let group = registry.create_group(ur, 100., 3);
        registry.create_instance(group, 4, 8, 8, 8, 10.);
        ur
    };
    sim.submit_requests_at(vec![ur], 0.);
    sim.run();

    let second = sim.datacenter_id("second");
    let registry = sim.registry();
    let registry = registry.borrow();
    assert_eq!(registry.user_request(ur).state, RequestState::Success);
    let group = registry.user_request(ur).group_ids[0];
    assert_eq!(registry.group(group).receive_datacenter, Some(second));
}
