//! Parallel tasks spanning several hosts and links at once.

use std::any::Any;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use slab::Slab;
use tracing::{debug, trace};

use crate::action::{Action, ActionId, ActionState, Completion, CompletionQueue};
use crate::model::network::NetworkConfig;
use crate::model::{promoted_bound, Model, ResourceState};
use crate::solver::{ConstraintId, SharingPolicy, System};
use crate::time::{duration_from_secs, MonotonicTime, PRECISION};

/// Handle to a host of a [`PtaskModel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostId(usize);

/// Handle to a link of a [`PtaskModel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(usize);

/// Error returned when no route was registered between two hosts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NoRouteError {
    /// Source host.
    pub src: HostId,
    /// Destination host.
    pub dst: HostId,
}

impl fmt::Display for NoRouteError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "no route was registered from host #{} to host #{}",
            self.src.0, self.dst.0
        )
    }
}

impl Error for NoRouteError {}

struct Host {
    name: String,
    speed: f64,
    state: ResourceState,
    constraint: ConstraintId,
}

struct Link {
    name: String,
    bandwidth: f64,
    latency: f64,
    state: ResourceState,
    constraint: ConstraintId,
}

struct Ptask {
    action: Action,
    /// Participating hosts, kept for failure detection.
    hosts: Vec<HostId>,
    /// Links crossed by at least one communicating pair.
    links: Vec<LinkId>,
    /// Largest end-to-end latency over the communicating pairs.
    route_latency: f64,
    /// Caller-requested rate cap; non-positive means uncapped.
    rate: f64,
}

/// Parallel-task model: a single system holding both compute and network
/// constraints, so that one action can consume several hosts and links
/// simultaneously.
///
/// The progress of a parallel task is normalized: its remaining work starts
/// at `1.0` and its solved allocation is a fraction of the task per second.
/// The per-resource amounts (flops per host, bytes per host pair) become the
/// consumption coefficients of the task's variable, so a task holding a
/// fraction rate `v` consumes `amount * v` of each resource it spans.
pub struct PtaskModel {
    config: NetworkConfig,
    system: System,
    hosts: Slab<Host>,
    links: Slab<Link>,
    routes: HashMap<(usize, usize), Vec<LinkId>>,
    actions: Slab<Ptask>,
    completions: CompletionQueue,
    now: MonotonicTime,
}

impl PtaskModel {
    /// Creates a parallel-task model with no resources.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            system: System::new(),
            hosts: Slab::new(),
            links: Slab::new(),
            routes: HashMap::new(),
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

    /// Registers a link with the given bandwidth (bytes per second) and
    /// latency (seconds).
    pub fn add_link(
        &mut self,
        name: impl Into<String>,
        bandwidth: f64,
        latency: f64,
        policy: SharingPolicy,
    ) -> LinkId {
        let constraint = self.system.add_constraint(bandwidth, policy);
        let key = self.links.insert(Link {
            name: name.into(),
            bandwidth,
            latency,
            state: ResourceState::On,
            constraint,
        });

        LinkId(key)
    }

    /// Registers the route from `src` to `dst` as an ordered link list.
    ///
    /// Routes are directional; register both directions if the tasks
    /// communicate both ways.
    pub fn add_route(&mut self, src: HostId, dst: HostId, links: &[LinkId]) {
        self.routes.insert((src.0, dst.0), links.to_vec());
    }

    /// Returns the name of a host.
    pub fn host_name(&self, host: HostId) -> &str {
        &self.hosts[host.0].name
    }

    /// Returns the compute speed of a host, in flops per second.
    pub fn host_speed(&self, host: HostId) -> f64 {
        self.hosts[host.0].speed
    }

    /// Returns the name of a link.
    pub fn link_name(&self, link: LinkId) -> &str {
        &self.links[link.0].name
    }

    /// Returns the bandwidth of a link, in bytes per second.
    pub fn link_bandwidth(&self, link: LinkId) -> f64 {
        self.links[link.0].bandwidth
    }

    /// Changes the compute speed of a host.
    pub fn set_speed(&mut self, host: HostId, speed: f64) {
        self.hosts[host.0].speed = speed;
        let constraint = self.hosts[host.0].constraint;
        self.system.set_constraint_bound(constraint, speed);
        debug!(host = host.0, speed, "host speed changed");
    }

    /// Changes the administrative state of a host.
    pub fn set_host_state(&mut self, host: HostId, state: ResourceState) {
        self.hosts[host.0].state = state;
        debug!(host = host.0, state = ?state, "host state changed");
    }

    /// Changes the bandwidth of a link.
    pub fn set_bandwidth(&mut self, link: LinkId, bandwidth: f64) {
        self.links[link.0].bandwidth = bandwidth;
        let constraint = self.links[link.0].constraint;
        self.system.set_constraint_bound(constraint, bandwidth);
        debug!(link = link.0, bandwidth, "link bandwidth changed");
    }

    /// Changes the administrative state of a link.
    pub fn set_link_state(&mut self, link: LinkId, state: ResourceState) {
        self.links[link.0].state = state;
        debug!(link = link.0, state = ?state, "link state changed");
    }

    /// Starts a parallel task over the given hosts.
    ///
    /// `flops` holds the computation amount of each host. `bytes` is a
    /// row-major `hosts.len() × hosts.len()` matrix where entry `(i, j)` is
    /// the amount sent from `hosts[i]` to `hosts[j]`; every pair with a
    /// positive amount must have a registered route. The task's startup
    /// latency is the largest end-to-end latency over the communicating
    /// pairs. A task with no positive amount at all completes immediately.
    ///
    /// # Panics
    ///
    /// Panics if `flops` or `bytes` does not match the number of hosts.
    pub fn execute_parallel(
        &mut self,
        hosts: &[HostId],
        flops: &[f64],
        bytes: &[f64],
        rate: f64,
    ) -> Result<ActionId, NoRouteError> {
        let n = hosts.len();
        assert_eq!(flops.len(), n, "one computation amount per host expected");
        assert_eq!(
            bytes.len(),
            n * n,
            "a square communication matrix expected"
        );

        // Resolve the routes of all communicating pairs and the worst-case
        // startup latency before touching the system.
        let mut pairs: Vec<(Vec<LinkId>, f64)> = Vec::new();
        let mut latency = 0.0f64;
        for i in 0..n {
            for j in 0..n {
                let amount = bytes[i * n + j];
                if amount <= 0.0 {
                    continue;
                }
                let route = self
                    .routes
                    .get(&(hosts[i].0, hosts[j].0))
                    .ok_or(NoRouteError {
                        src: hosts[i],
                        dst: hosts[j],
                    })?;
                let pair_latency: f64 = route
                    .iter()
                    .map(|link| self.links[link.0].latency)
                    .sum();
                latency = latency.max(pair_latency);
                pairs.push((route.clone(), amount));
            }
        }

        let compute_elements = flops.iter().filter(|&&amount| amount > 0.0).count();
        let link_elements: usize = pairs.iter().map(|(route, _)| route.len()).sum();

        // A task with nothing to compute and nothing to send is a no-op.
        if compute_elements + link_elements == 0 && latency <= 0.0 {
            let action = Action::new(self.now, 0.0, 0.0);
            let key = self.actions.insert(Ptask {
                action,
                hosts: hosts.to_vec(),
                links: Vec::new(),
                route_latency: 0.0,
                rate,
            });
            let id = ActionId(key);
            self.actions[key].action.finish(
                id,
                ActionState::Done,
                self.now,
                &mut self.system,
                &mut self.completions,
            );

            return Ok(id);
        }

        // Normalized progress: the task's allocation is a fraction of the
        // task per second and the amounts become consumption coefficients.
        let mut action = Action::new(self.now, 1.0, latency);
        let weight = if latency > 0.0 { 0.0 } else { 1.0 };
        let variable = self
            .system
            .add_variable(weight, rate, compute_elements + link_elements);
        for (i, &host) in hosts.iter().enumerate() {
            if flops[i] > 0.0 {
                self.system
                    .expand(self.hosts[host.0].constraint, variable, flops[i])
                    .expect("the variable was sized for all task elements");
            }
        }
        let mut used_links: Vec<LinkId> = Vec::new();
        for (route, amount) in &pairs {
            for &link in route {
                self.system
                    .expand_add(self.links[link.0].constraint, variable, *amount)
                    .expect("the variable was sized for all task elements");
                if !used_links.contains(&link) {
                    used_links.push(link);
                }
            }
        }
        action.variable = Some(variable);

        let key = self.actions.insert(Ptask {
            action,
            hosts: hosts.to_vec(),
            links: used_links,
            route_latency: latency,
            rate,
        });
        trace!(
            action = key,
            hosts = n,
            links = link_elements,
            latency,
            "starting parallel task"
        );

        Ok(ActionId(key))
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

    /// Returns the fraction of the task remaining, in `0.0..=1.0`.
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

impl Model for PtaskModel {
    fn share_resources(&mut self, now: MonotonicTime) -> Option<Duration> {
        self.now = now;
        self.system.solve();

        let mut min: Option<f64> = None;
        for (_, ptask) in self.actions.iter() {
            if let Some(bound) = ptask.action.completion_bound(&self.system) {
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

            // Failure is checked before any progress is made: a task with a
            // dead participant performed no work during the elapsed interval.
            let failed = self.actions[key]
                .hosts
                .iter()
                .any(|host| self.hosts[host.0].state == ResourceState::Off)
                || self.actions[key]
                    .links
                    .iter()
                    .any(|link| self.links[link.0].state == ResourceState::Off);
            if failed {
                self.actions[key].action.finish(
                    ActionId(key),
                    ActionState::Failed,
                    now,
                    &mut self.system,
                    &mut self.completions,
                );
                continue;
            }

            if self.actions[key].action.latency > 0.0 {
                let bound = promoted_bound(
                    self.config.tcp_gamma,
                    self.actions[key].route_latency,
                    self.actions[key].rate,
                );
                self.actions[key]
                    .action
                    .elapse_latency(delta, bound, &mut self.system);
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

impl fmt::Debug for PtaskModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtaskModel")
            .field("hosts", &self.hosts.len())
            .field("links", &self.links.len())
            .field("actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}
