//! A discrete-event resource-sharing kernel for distributed system
//! simulation.
//!
//! Fluidix models the platforms of distributed and parallel systems — hosts,
//! links, and the computations, data transfers and parallel tasks that
//! consume them — and replays their progress in simulated time, without
//! executing anything for real. At every simulated instant, the capacity of
//! each resource is divided among its concurrent users by a max-min
//! fair-share solver; the simulation then jumps directly to the next instant
//! at which something can happen.
//!
//! # A practical overview
//!
//! Running a simulation involves three activities:
//!
//! 1. describing the platform: registering hosts, links and routes on the
//!    [resource models](model),
//! 2. creating activities: starting computations, transfers, sleeps and
//!    parallel tasks, which the models turn into contending demands on their
//!    resources,
//! 3. driving simulated time with a [`Simulation`](simulation::Simulation)
//!    and observing the completion notifications the models emit.
//!
//! ## Resource sharing
//!
//! Each resource model owns a [`System`](solver::System): a set of
//! capacitated constraints (one per host or link) and of variables (one per
//! activity), connected by weighted elements. Solving the system performs
//! *progressive filling*: the bottleneck resource is saturated first and the
//! activities it limits are fixed, then the next bottleneck, until every
//! activity holds its max-min fair allocation. Constraints either share
//! their capacity (the common case) or grant it in full to each user
//! ("fatpipe" semantics, where only the largest consumption counts).
//!
//! ## The two-phase event loop
//!
//! The [`Simulation`](simulation::Simulation) drives every model through two
//! phases per step. In the *share* phase, each model solves its system and
//! reports the earliest instant at which one of its actions can change
//! state — finish its startup latency, exhaust its remaining work at the
//! solved rate, or hit its duration cap. In the *update* phase, the clock
//! having advanced by the smallest reported delta, each action consumes the
//! elapsed time and takes its lifecycle transitions. Faults are data, not
//! exceptions: an action on a resource that went off finishes as
//! [`Failed`](action::ActionState::Failed), a duration cap firing with work
//! left finishes as [`TimedOut`](action::ActionState::TimedOut), and every
//! finished action is reported exactly once through its model's completion
//! queue.
//!
//! # Example
//!
//! Two computations sharing one host:
//!
//! ```
//! use std::time::Duration;
//!
//! use fluidix::action::ActionState;
//! use fluidix::model::cpu::CpuModel;
//! use fluidix::simulation::Simulation;
//! use fluidix::time::MonotonicTime;
//!
//! let mut cpus = CpuModel::new();
//! let host = cpus.add_host("node-0", 1e9);
//!
//! let t0 = MonotonicTime::EPOCH;
//! let mut simu = Simulation::new(t0);
//! let cpus = simu.add_model(cpus);
//!
//! // Start two computations; the host's capacity is shared fairly.
//! let small = simu.model_mut(cpus).execute(host, 1e9);
//! let large = simu.model_mut(cpus).execute(host, 2e9);
//!
//! // Each computation initially runs at 5e8 flops/s, so the small one
//! // completes after 2 simulated seconds.
//! assert_eq!(simu.step(), Some(t0 + Duration::from_secs(2)));
//! let completion = simu.model_mut(cpus).completions().next().unwrap();
//! assert_eq!(completion.action, small);
//! assert_eq!(completion.state, ActionState::Done);
//!
//! // The large one then owns the full host: 1e9 flops remain, one more
//! // second.
//! assert_eq!(simu.step(), Some(t0 + Duration::from_secs(3)));
//! let completion = simu.model_mut(cpus).completions().next().unwrap();
//! assert_eq!(completion.action, large);
//! ```
//!
//! # Modules documentation
//!
//! More information is available in the documentation of the different
//! modules:
//!
//! * the [`solver`] module documents the fair-share system and its
//!   progressive-filling algorithm,
//! * the [`action`] module documents the lifecycle of simulated activities,
//!   suspension and completion notifications,
//! * the [`model`] module documents the compute, network and parallel-task
//!   resource models,
//! * the [`simulation`] module documents the event-loop driver.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

pub mod action;
pub mod model;
pub mod simulation;
pub mod solver;
pub mod time;
pub(crate) mod util;
