//! Example: a master dispatching compute batches to two workers.
//!
//! This example demonstrates in particular:
//!
//! * assembling a platform over several resource models,
//! * reacting to completion notifications to chain activities,
//! * fair sharing of a common uplink between concurrent transfers.
//!
//! ```text
//!                        ┌────────┐   nic-0   ┌──────────┐
//!             uplink ┌──►│ link   ├──────────►│ worker-0 │
//! ┌────────┐         │   └────────┘           └──────────┘
//! │ master ├─────────┤
//! └────────┘         │   ┌────────┐   nic-1   ┌──────────┐
//!                    └──►│ link   ├──────────►│ worker-1 │
//!                        └────────┘           └──────────┘
//! ```
//!
//! Each worker receives its input batch over the shared uplink, computes it,
//! then asks for the next one until every batch is processed.

use std::collections::HashMap;

use fluidix::action::ActionState;
use fluidix::model::cpu::CpuModel;
use fluidix::model::network::{NetworkConfig, NetworkModel};
use fluidix::simulation::Simulation;
use fluidix::solver::SharingPolicy;
use fluidix::time::MonotonicTime;

/// Size of one input batch [bytes].
const BATCH_BYTES: f64 = 1e6;
/// Work needed to process one batch [flops].
const BATCH_FLOPS: f64 = 2e9;
/// Number of batches sent to each worker.
const BATCHES_PER_WORKER: usize = 3;

fn main() {
    tracing_subscriber::fmt::init();

    let mut cpus = CpuModel::new();
    let mut net = NetworkModel::new(NetworkConfig::default());

    // 1 Gbps uplink shared by both workers, 100 µs of latency.
    let uplink = net.add_link("uplink", 1.25e8, 1e-4, SharingPolicy::Shared);
    let master = net.add_endpoint("master");

    let mut workers = Vec::new();
    for i in 0..2 {
        let host = cpus.add_host(format!("worker-{}", i), 1e9);
        let nic = net.add_link(format!("nic-{}", i), 1.25e8, 5e-5, SharingPolicy::Shared);
        let endpoint = net.add_endpoint(format!("worker-{}", i));
        net.add_route(master, endpoint, &[uplink, nic]);
        workers.push((host, endpoint));
    }

    let t0 = MonotonicTime::EPOCH;
    let mut simu = Simulation::new(t0);
    let cpus = simu.add_model(cpus);
    let net = simu.add_model(net);

    // Send the first batch to every worker.
    let mut transfers = HashMap::new();
    let mut computes = HashMap::new();
    let mut sent = vec![1usize; workers.len()];
    let mut done = vec![0usize; workers.len()];
    for (worker, &(_, endpoint)) in workers.iter().enumerate() {
        let transfer = simu
            .model_mut(net)
            .transfer(master, endpoint, BATCH_BYTES)
            .unwrap();
        transfers.insert(transfer, worker);
    }

    // Drive the simulation, chaining activities as completions come in,
    // until nothing is left to wait for.
    loop {
        let arrived: Vec<_> = simu.model_mut(net).completions().collect();
        for completion in arrived {
            let worker = transfers.remove(&completion.action).unwrap();
            if completion.state != ActionState::Done {
                println!("batch lost on its way to worker-{}", worker);
                continue;
            }
            // The batch has arrived: compute it.
            let compute = simu.model_mut(cpus).execute(workers[worker].0, BATCH_FLOPS);
            computes.insert(compute, worker);
        }

        let processed: Vec<_> = simu.model_mut(cpus).completions().collect();
        for completion in processed {
            let worker = computes.remove(&completion.action).unwrap();
            done[worker] += 1;
            println!(
                "worker-{} processed batch {}/{}",
                worker, done[worker], BATCHES_PER_WORKER
            );
            // Feed the worker its next batch, if any.
            if sent[worker] < BATCHES_PER_WORKER {
                sent[worker] += 1;
                let transfer = simu
                    .model_mut(net)
                    .transfer(master, workers[worker].1, BATCH_BYTES)
                    .unwrap();
                transfers.insert(transfer, worker);
            }
        }

        if simu.step().is_none() {
            break;
        }
    }

    let total: usize = done.iter().sum();
    println!(
        "all {} batches processed, simulation ends at {:?}",
        total,
        simu.time()
    );
}
