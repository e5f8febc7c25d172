//! Network links, routes and data transfers.

use std::any::Any;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use slab::Slab;
use tracing::{debug, trace};

use crate::action::{Action, ActionId, ActionState, Completion, CompletionQueue};
use crate::model::{promoted_bound, Model, ResourceState};
use crate::solver::{ConstraintId, SharingPolicy, System};
use crate::time::{duration_from_secs, MonotonicTime, PRECISION};

/// Handle to a link of a [`NetworkModel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(usize);

/// Handle to a communication endpoint of a [`NetworkModel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EndpointId(usize);

/// Configuration of a network model.
#[derive(Copy, Clone, Debug)]
pub struct NetworkConfig {
    /// TCP congestion-window size, in bytes, from which the slow-start rate
    /// cap of a transfer is derived: a transfer over a route with latency
    /// `l` is capped at `tcp_gamma / (2 * l)` bytes per second.
    pub tcp_gamma: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_gamma: 20_000.0,
        }
    }
}

/// Error returned when no route was registered between two endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NoRouteError {
    /// Source endpoint.
    pub src: EndpointId,
    /// Destination endpoint.
    pub dst: EndpointId,
}

impl fmt::Display for NoRouteError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "no route was registered from endpoint #{} to endpoint #{}",
            self.src.0, self.dst.0
        )
    }
}

impl Error for NoRouteError {}

struct Link {
    name: String,
    bandwidth: f64,
    latency: f64,
    state: ResourceState,
    constraint: ConstraintId,
}

struct Endpoint {
    name: String,
}

struct Route {
    links: Vec<LinkId>,
}

struct Transfer {
    action: Action,
    /// Links of the route, kept for failure detection.
    links: Vec<LinkId>,
    /// End-to-end latency of the route when the transfer started.
    route_latency: f64,
    /// Caller-requested rate cap; non-positive means uncapped.
    rate: f64,
}

/// Network model: links whose bandwidth is shared fairly among the transfers
/// crossing them.
///
/// Each link is one constraint with a capacity equal to its bandwidth in
/// bytes per second; a transfer places one element on every link of its
/// route. A transfer first waits out the end-to-end latency of its route
/// without consuming any bandwidth, then contends for capacity under a
/// slow-start rate cap derived from that latency (see
/// [`NetworkConfig::tcp_gamma`]).
///
/// Routes are registered per ordered endpoint pair and consumed as
/// already-computed ordered link lists; this model performs no routing of
/// its own.
pub struct NetworkModel {
    config: NetworkConfig,
    system: System,
    links: Slab<Link>,
    endpoints: Slab<Endpoint>,
    routes: HashMap<(usize, usize), Route>,
    actions: Slab<Transfer>,
    completions: CompletionQueue,
    now: MonotonicTime,
}

impl NetworkModel {
    /// Creates a network model with no links.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            system: System::new(),
            links: Slab::new(),
            endpoints: Slab::new(),
            routes: HashMap::new(),
            actions: Slab::new(),
            completions: CompletionQueue::new(),
            now: MonotonicTime::EPOCH,
        }
    }

    /// Registers a link with the given bandwidth (bytes per second) and
    /// latency (seconds).
    ///
    /// A [`SharingPolicy::Shared`] link divides its bandwidth among the
    /// transfers crossing it; a [`SharingPolicy::Fatpipe`] link grants each
    /// transfer up to the full bandwidth, as a duplex or switched backplane
    /// would.
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

    /// Registers a communication endpoint.
    pub fn add_endpoint(&mut self, name: impl Into<String>) -> EndpointId {
        EndpointId(self.endpoints.insert(Endpoint { name: name.into() }))
    }

    /// Registers the route from `src` to `dst` as an ordered link list.
    ///
    /// Routes are directional; register both directions if traffic flows
    /// both ways. The end-to-end latency of the route is the sum of the
    /// latencies of its links, evaluated when a transfer starts.
    pub fn add_route(&mut self, src: EndpointId, dst: EndpointId, links: &[LinkId]) {
        self.routes.insert(
            (src.0, dst.0),
            Route {
                links: links.to_vec(),
            },
        );
    }

    /// Returns the name of a link.
    pub fn link_name(&self, link: LinkId) -> &str {
        &self.links[link.0].name
    }

    /// Returns the bandwidth of a link, in bytes per second.
    pub fn link_bandwidth(&self, link: LinkId) -> f64 {
        self.links[link.0].bandwidth
    }

    /// Returns the administrative state of a link.
    pub fn link_state(&self, link: LinkId) -> ResourceState {
        self.links[link.0].state
    }

    /// Returns the name of an endpoint.
    pub fn endpoint_name(&self, endpoint: EndpointId) -> &str {
        &self.endpoints[endpoint.0].name
    }

    /// Changes the bandwidth of a link, typically when replaying a
    /// bandwidth trace.
    pub fn set_bandwidth(&mut self, link: LinkId, bandwidth: f64) {
        self.links[link.0].bandwidth = bandwidth;
        let constraint = self.links[link.0].constraint;
        self.system.set_constraint_bound(constraint, bandwidth);
        debug!(link = link.0, bandwidth, "link bandwidth changed");
    }

    /// Changes the latency of a link. Only transfers started afterwards see
    /// the new value; in-flight transfers keep the latency sampled when they
    /// started.
    pub fn set_latency(&mut self, link: LinkId, latency: f64) {
        self.links[link.0].latency = latency;
        debug!(link = link.0, latency, "link latency changed");
    }

    /// Changes the administrative state of a link.
    ///
    /// Switching a link off makes every transfer crossing it fail at the
    /// next update phase.
    pub fn set_link_state(&mut self, link: LinkId, state: ResourceState) {
        self.links[link.0].state = state;
        debug!(link = link.0, state = ?state, "link state changed");
    }

    /// Starts a transfer of `bytes` from `src` to `dst`.
    pub fn transfer(
        &mut self,
        src: EndpointId,
        dst: EndpointId,
        bytes: f64,
    ) -> Result<ActionId, NoRouteError> {
        self.transfer_with_rate(src, dst, bytes, 0.0)
    }

    /// Starts a transfer of `bytes` from `src` to `dst`, capped at `rate`
    /// bytes per second (non-positive means uncapped).
    pub fn transfer_with_rate(
        &mut self,
        src: EndpointId,
        dst: EndpointId,
        bytes: f64,
        rate: f64,
    ) -> Result<ActionId, NoRouteError> {
        let route = self.routes.get(&(src.0, dst.0)).ok_or(NoRouteError { src, dst })?;
        let links = route.links.clone();
        let latency: f64 = links.iter().map(|link| self.links[link.0].latency).sum();

        // A transfer with neither links nor latency is a degenerate no-op.
        if links.is_empty() && latency <= 0.0 {
            let mut action = Action::new(self.now, 0.0, 0.0);
            action.remains = 0.0;
            let key = self.actions.insert(Transfer {
                action,
                links,
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

        let mut action = Action::new(self.now, bytes, latency);
        // During the latency phase the transfer consumes no bandwidth: its
        // weight stays at zero until the promotion.
        let weight = if latency > 0.0 { 0.0 } else { 1.0 };
        let variable = self.system.add_variable(weight, rate, links.len());
        for &link in &links {
            self.system
                .expand_add(self.links[link.0].constraint, variable, 1.0)
                .expect("the variable was sized for the route length");
        }
        action.variable = Some(variable);

        let key = self.actions.insert(Transfer {
            action,
            links,
            route_latency: latency,
            rate,
        });
        trace!(action = key, bytes, latency, "starting transfer");

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

    /// Returns the data remaining to a transfer, in bytes.
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

impl Model for NetworkModel {
    fn share_resources(&mut self, now: MonotonicTime) -> Option<Duration> {
        self.now = now;
        self.system.solve();

        let mut min: Option<f64> = None;
        for (_, transfer) in self.actions.iter() {
            if let Some(bound) = transfer.action.completion_bound(&self.system) {
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

            // Failure is checked before any progress is made: a route with a
            // dead link carried no data during the elapsed interval.
            let failed = self.actions[key]
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

            // Latency phase; exhausting it promotes the transfer to a
            // bandwidth contender under the slow-start cap.
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

impl Default for NetworkModel {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl fmt::Debug for NetworkModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkModel")
            .field("links", &self.links.len())
            .field("endpoints", &self.endpoints.len())
            .field("actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}
