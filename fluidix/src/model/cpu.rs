//! Compute resources and the computations they run.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use slab::Slab;
use tracing::{debug, trace};

use crate::action::{Action, ActionId, ActionState, Completion, CompletionQueue, Suspension};
use crate::model::{Model, ResourceState};
use crate::solver::{ConstraintId, SharingPolicy, System};
use crate::time::{duration_from_secs, MonotonicTime, PRECISION};

/// Handle to a host of a [`CpuModel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostId(usize);

struct Host {
    name: String,
    speed: f64,
    state: ResourceState,
    constraint: ConstraintId,
}

struct Computation {
    action: Action,
    host: HostId,
}

/// Compute model: hosts whose processing power is shared fairly among the
/// computations they run.
///
/// Each host is one shared constraint with a capacity equal to its compute
/// speed in flops per second. Computations contend for that capacity with a
/// weight derived from their priority; sleeps occupy a host without consuming
/// any of it.
pub struct CpuModel {
    system: System,
    hosts: Slab<Host>,
    actions: Slab<Computation>,
    completions: CompletionQueue,
    now: MonotonicTime,
}

impl CpuModel {
    /// Creates a compute model with no hosts.
    pub fn new() -> Self {
        Self {
            system: System::new(),
            hosts: Slab::new(),
            actions: Slab::new(),
            completions: CompletionQueue::new(),
            now: MonotonicTime::EPOCH,
        }
    }

    /// Registers a host computing `speed` flops per second.
    pub fn add_host(&mut self, name: impl Into<String>, speed: f64) -> HostId {
        let constraint = self.system.add_constraint(speed, SharingPolicy::Shared);
        let key = self.hosts.insert(Host {
            name: name.into(),
            speed,
            state: ResourceState::On,
            constraint,
        });

        HostId(key)
    }

    /// Returns the name of a host.
    pub fn host_name(&self, host: HostId) -> &str {
        &self.hosts[host.0].name
    }

    /// Returns the compute speed of a host, in flops per second.
    pub fn host_speed(&self, host: HostId) -> f64 {
        self.hosts[host.0].speed
    }

    /// Returns the administrative state of a host.
    pub fn host_state(&self, host: HostId) -> ResourceState {
        self.hosts[host.0].state
    }

    /// Changes the compute speed of a host, typically when replaying an
    /// availability trace.
    pub fn set_speed(&mut self, host: HostId, speed: f64) {
        self.hosts[host.0].speed = speed;
        let constraint = self.hosts[host.0].constraint;
        self.system.set_constraint_bound(constraint, speed);
        debug!(host = host.0, speed, "host speed changed");
    }

    /// Changes the administrative state of a host.
    ///
    /// Switching a host off makes every computation using it fail at the
    /// next update phase.
    pub fn set_host_state(&mut self, host: HostId, state: ResourceState) {
        self.hosts[host.0].state = state;
        debug!(host = host.0, state = ?state, "host state changed");
    }

    /// Starts a computation of `flops` on a host.
    pub fn execute(&mut self, host: HostId, flops: f64) -> ActionId {
        self.execute_with_rate(host, flops, 0.0)
    }

    /// Starts a computation of `flops` on a host, capped at `rate` flops per
    /// second (non-positive means uncapped).
    pub fn execute_with_rate(&mut self, host: HostId, flops: f64, rate: f64) -> ActionId {
        let mut action = Action::new(self.now, flops, 0.0);
        let variable = self.system.add_variable(1.0, rate, 1);
        self.system
            .expand(self.hosts[host.0].constraint, variable, 1.0)
            .expect("the variable was sized for a single constraint");
        action.variable = Some(variable);

        let key = self.actions.insert(Computation { action, host });
        trace!(action = key, host = host.0, flops, "starting computation");

        ActionId(key)
    }

    /// Starts a pure wait on a host.
    ///
    /// A sleep consumes no compute capacity; it completes when its duration
    /// elapses, or fails if the host goes off in the meantime.
    pub fn sleep(&mut self, host: HostId, duration: Duration) -> ActionId {
        let mut action = Action::new(self.now, 0.0, 0.0);
        // A sleep never contends; freeze it so that priority changes cannot
        // pull it into the sharing.
        action.suspension = Suspension::Frozen;
        action.max_duration = Some(duration.as_secs_f64());
        let variable = self.system.add_variable(0.0, 0.0, 1);
        self.system
            .expand(self.hosts[host.0].constraint, variable, 1.0)
            .expect("the variable was sized for a single constraint");
        action.variable = Some(variable);

        let key = self.actions.insert(Computation { action, host });
        trace!(action = key, host = host.0, "starting sleep");

        ActionId(key)
    }

    /// Cancels an action. Canceling a finished action has no effect.
    pub fn cancel(&mut self, action: ActionId) {
        self.actions[action.0].action.finish(
            action,
            ActionState::Canceled,
            self.now,
            &mut self.system,
            &mut self.completions,
        );
    }

    /// Suspends an action, preserving its remaining work.
    pub fn suspend(&mut self, action: ActionId) {
        self.actions[action.0].action.suspend(&mut self.system);
    }

    /// Resumes a suspended action.
    pub fn resume(&mut self, action: ActionId) {
        self.actions[action.0].action.resume(&mut self.system);
    }

    /// Changes the priority of an action; higher values mean a larger share.
    pub fn set_priority(&mut self, action: ActionId, priority: f64) {
        // The solver weight is an inverse priority.
        self.actions[action.0]
            .action
            .set_priority(1.0 / priority, &mut self.system);
    }

    /// Caps the total lifetime of an action, counted from now; expiry
    /// finishes it as [`ActionState::TimedOut`] if work remains.
    pub fn set_deadline(&mut self, action: ActionId, deadline: Option<Duration>) {
        self.actions[action.0]
            .action
            .set_deadline(deadline.map(|deadline| deadline.as_secs_f64()));
    }

    /// Returns the lifecycle state of an action.
    pub fn action_state(&self, action: ActionId) -> ActionState {
        self.actions[action.0].action.state
    }

    /// Returns the work remaining to an action, in flops.
    pub fn remaining(&self, action: ActionId) -> f64 {
        self.actions[action.0].action.remains
    }

    /// Discards the record of a finished action.
    ///
    /// # Panics
    ///
    /// Panics if the action has not finished.
    pub fn remove(&mut self, action: ActionId) {
        assert!(
            self.actions[action.0].action.is_terminal(),
            "only finished actions can be removed"
        );
        self.actions.remove(action.0);
    }

    /// Drains the pending completion notifications, oldest first.
    pub fn completions(&mut self) -> impl Iterator<Item = Completion> + '_ {
        self.completions.drain()
    }
}

impl Model for CpuModel {
    fn share_resources(&mut self, now: MonotonicTime) -> Option<Duration> {
        self.now = now;
        self.system.solve();

        let mut min: Option<f64> = None;
        for (_, computation) in self.actions.iter() {
            if let Some(bound) = computation.action.completion_bound(&self.system) {
                min = Some(match min {
                    None => bound,
                    Some(min) => min.min(bound),
                });
            }
        }

        min.map(duration_from_secs)
    }

    fn update_actions_state(&mut self, now: MonotonicTime, delta: Duration) {
        self.now = now;
        let delta = delta.as_secs_f64();
        let keys: Vec<usize> = self.actions.iter().map(|(key, _)| key).collect();

        for key in keys {
            if self.actions[key].action.is_terminal() {
                continue;
            }

            // Failure is checked before any progress is made: the host was
            // off for the whole elapsed interval, so the action performed no
            // work during it.
            let host = self.actions[key].host;
            if self.hosts[host.0].state == ResourceState::Off {
                self.actions[key].action.finish(
                    ActionId(key),
                    ActionState::Failed,
                    now,
                    &mut self.system,
                    &mut self.completions,
                );
                continue;
            }

            let (value, weight) = match self.actions[key].action.variable {
                Some(variable) => (
                    self.system.variable_value(variable),
                    self.system.variable_weight(variable),
                ),
                None => (0.0, 0.0),
            };

            self.actions[key].action.consume(value, delta);

            if self.actions[key].action.elapse_deadline(delta) {
                let state = if self.actions[key].action.remains <= PRECISION {
                    ActionState::Done
                } else {
                    ActionState::TimedOut
                };
                self.actions[key].action.finish(
                    ActionId(key),
                    state,
                    now,
                    &mut self.system,
                    &mut self.completions,
                );
                continue;
            }

            if self.actions[key].action.remains <= PRECISION && weight > 0.0 {
                self.actions[key].action.finish(
                    ActionId(key),
                    ActionState::Done,
                    now,
                    &mut self.system,
                    &mut self.completions,
                );
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Default for CpuModel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuModel")
            .field("hosts", &self.hosts.len())
            .field("actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}
