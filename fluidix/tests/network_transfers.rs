//! Data transfers, routes and link sharing on the network model.

use std::time::Duration;

use fluidix::action::ActionState;
use fluidix::model::network::{NetworkConfig, NetworkModel};
use fluidix::model::ResourceState;
use fluidix::simulation::Simulation;
use fluidix::solver::SharingPolicy;
use fluidix::time::MonotonicTime;

const EPSILON: f64 = 1e-6;

/// A congestion window large enough to never cap the tested transfers.
fn wide_open() -> NetworkConfig {
    NetworkConfig { tcp_gamma: 1e15 }
}

#[test]
fn transfer_waits_out_latency_then_contends() {
    let mut net = NetworkModel::new(wide_open());
    let link = net.add_link("wan", 100.0, 2.0, SharingPolicy::Shared);
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");
    net.add_route(a, b, &[link]);

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let net = simu.add_model(net);

    let action = simu.model_mut(net).transfer(a, b, 400.0).unwrap();
    assert_eq!(simu.model(net).action_state(action), ActionState::Ready);

    // During the 2 seconds of latency no byte moves.
    assert_eq!(simu.step(), Some(t0 + Duration::from_secs(2)));
    assert!((simu.model(net).remaining(action) - 400.0).abs() < EPSILON);
    assert_eq!(simu.model(net).action_state(action), ActionState::Running);

    // Then the transfer owns the link: 400 bytes at 100 bytes/s.
    assert_eq!(simu.step(), Some(t0 + Duration::from_secs(6)));
    let completion = simu.model_mut(net).completions().next().unwrap();
    assert_eq!(completion.action, action);
    assert_eq!(completion.state, ActionState::Done);
}

#[test]
fn bandwidth_is_shared_fairly() {
    let mut net = NetworkModel::new(wide_open());
    let link = net.add_link("backbone", 100.0, 0.0, SharingPolicy::Shared);
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");
    net.add_route(a, b, &[link]);

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let net = simu.add_model(net);

    // Two transfers of 500 bytes at 50 bytes/s each.
    simu.model_mut(net).transfer(a, b, 500.0).unwrap();
    simu.model_mut(net).transfer(a, b, 500.0).unwrap();

    assert_eq!(simu.step(), Some(t0 + Duration::from_secs(10)));
    assert_eq!(simu.model_mut(net).completions().count(), 2);
}

#[test]
fn fatpipe_link_grants_full_bandwidth_to_each_transfer() {
    let mut net = NetworkModel::new(wide_open());
    let link = net.add_link("duplex", 100.0, 0.0, SharingPolicy::Fatpipe);
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");
    net.add_route(a, b, &[link]);

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let net = simu.add_model(net);

    // Both transfers proceed at the full 100 bytes/s, not 50.
    simu.model_mut(net).transfer(a, b, 500.0).unwrap();
    simu.model_mut(net).transfer(a, b, 500.0).unwrap();

    assert_eq!(simu.step(), Some(t0 + Duration::from_secs(5)));
    assert_eq!(simu.model_mut(net).completions().count(), 2);
}

#[test]
fn rate_limited_transfer_leaves_bandwidth_to_others() {
    let mut net = NetworkModel::new(wide_open());
    let link = net.add_link("lan", 100.0, 0.0, SharingPolicy::Shared);
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");
    net.add_route(a, b, &[link]);

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let net = simu.add_model(net);

    // The capped transfer gets its 30 bytes/s; the other one receives the
    // remaining 70 instead of a blind half.
    let capped = simu
        .model_mut(net)
        .transfer_with_rate(a, b, 300.0, 30.0)
        .unwrap();
    let free = simu.model_mut(net).transfer(a, b, 700.0).unwrap();

    assert_eq!(simu.step(), Some(t0 + Duration::from_secs(10)));
    let completions: Vec<_> = simu.model_mut(net).completions().collect();
    assert_eq!(completions.len(), 2);
    assert!(completions.iter().any(|c| c.action == capped));
    assert!(completions.iter().any(|c| c.action == free));
}

#[test]
fn slow_start_caps_the_promoted_rate() {
    // With the default 20 kB congestion window and a 1 s route latency, the
    // transfer is capped at 10 kB/s even though the link is much faster.
    let mut net = NetworkModel::new(NetworkConfig::default());
    let link = net.add_link("fat", 1e6, 1.0, SharingPolicy::Shared);
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");
    net.add_route(a, b, &[link]);

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let net = simu.add_model(net);

    let action = simu.model_mut(net).transfer(a, b, 20_000.0).unwrap();

    // 1 s of latency, then 20000 bytes at 10000 bytes/s.
    simu.step();
    assert_eq!(simu.step(), Some(t0 + Duration::from_secs(3)));
    assert_eq!(simu.model(net).action_state(action), ActionState::Done);
}

#[test]
fn link_failure_fails_in_flight_transfers() {
    let mut net = NetworkModel::new(wide_open());
    let l1 = net.add_link("up", 100.0, 0.0, SharingPolicy::Shared);
    let l2 = net.add_link("down", 100.0, 0.0, SharingPolicy::Shared);
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");
    net.add_route(a, b, &[l1, l2]);

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let net = simu.add_model(net);

    let action = simu.model_mut(net).transfer(a, b, 1000.0).unwrap();
    simu.step_until(t0 + Duration::from_secs(1)).unwrap();

    simu.model_mut(net).set_link_state(l2, ResourceState::Off);
    simu.step();

    let completion = simu.model_mut(net).completions().next().unwrap();
    assert_eq!(completion.action, action);
    assert_eq!(completion.state, ActionState::Failed);
    // The 900 bytes still in flight when the link died were never delivered.
    assert!((completion.remains - 900.0).abs() < EPSILON);
}

#[test]
fn missing_route_is_reported() {
    let mut net = NetworkModel::default();
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");

    let err = net.transfer(a, b, 100.0).unwrap_err();
    assert_eq!(err.src, a);
    assert_eq!(err.dst, b);
}

#[test]
fn transfer_over_an_empty_route_is_a_noop() {
    let mut net = NetworkModel::default();
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");
    net.add_route(a, b, &[]);

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let net = simu.add_model(net);

    let action = simu.model_mut(net).transfer(a, b, 1000.0).unwrap();
    assert_eq!(simu.model(net).action_state(action), ActionState::Done);

    let completion = simu.model_mut(net).completions().next().unwrap();
    assert_eq!(completion.action, action);
    assert_eq!(completion.remains, 0.0);

    // Nothing else is scheduled.
    assert_eq!(simu.step(), None);
}

#[test]
fn route_crossing_a_link_twice_consumes_double() {
    let mut net = NetworkModel::new(wide_open());
    let link = net.add_link("loop", 100.0, 0.0, SharingPolicy::Shared);
    let a = net.add_endpoint("a");
    let b = net.add_endpoint("b");
    // Degenerate but legal: the route crosses the same link both ways.
    net.add_route(a, b, &[link, link]);

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let net = simu.add_model(net);

    // The transfer rate is halved since each byte crosses the link twice.
    simu.model_mut(net).transfer(a, b, 500.0).unwrap();
    assert_eq!(simu.step(), Some(t0 + Duration::from_secs(10)));
}
