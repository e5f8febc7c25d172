//! Simulated activities and their lifecycle.
//!
//! An *action* is one ongoing activity of the simulated platform: a
//! computation, a data transfer, a sleep or a parallel task. Every action
//! wraps at most one solver [variable](crate::solver::VariableId) whose
//! solved value is the rate at which the action currently progresses. The
//! action itself carries the bookkeeping that turns rates into lifecycle
//! events: the remaining amount of work, an optional startup latency during
//! which no capacity is consumed, an optional duration cap and the
//! terminal-state machine.
//!
//! Completions are collected per model and handed out as [`Completion`]
//! records; a finished action is reported exactly once, whatever caused it
//! to finish.

use std::collections::vec_deque::{self, VecDeque};
use std::fmt;

use tracing::trace;

use crate::solver::{System, VariableId};
use crate::time::{drain, MonotonicTime, PRECISION};

/// Handle to an action of a resource model.
///
/// Handles are only meaningful for the model that created them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionId(pub(crate) usize);

/// Lifecycle state of an action.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActionState {
    /// The action was created but does not contend for capacity yet (startup
    /// latency phase).
    Ready,
    /// The action contends for capacity and makes progress.
    Running,
    /// All work was performed.
    Done,
    /// The duration cap elapsed with work still remaining.
    TimedOut,
    /// A resource the action was using went off.
    Failed,
    /// The action was canceled by the caller.
    Canceled,
}

impl ActionState {
    /// Whether this state is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ActionState::Ready | ActionState::Running)
    }
}

/// Suspension sub-state of a live action.
///
/// Suspension is orthogonal to the lifecycle state: a suspended action keeps
/// its remaining work and stays `Running` (or `Ready`), but its variable's
/// weight is pinned to zero so it receives no capacity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Suspension {
    /// Not suspended.
    Active,
    /// Suspended after the startup latency elapsed; the weight was zeroed.
    Suspended,
    /// Suspended while the weight was already pinned to zero (startup
    /// latency, or a pure wait such as a sleep).
    Frozen,
}

/// Notification emitted when an action reaches a terminal state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Completion {
    /// The finished action.
    pub action: ActionId,
    /// Terminal state of the action.
    pub state: ActionState,
    /// Work that remained to be performed when the action finished.
    pub remains: f64,
    /// Simulation time at which the action started.
    pub start: MonotonicTime,
    /// Simulation time at which the action finished.
    pub finish: MonotonicTime,
}

/// FIFO queue of completion notifications, drained by the caller.
#[derive(Debug, Default)]
pub(crate) struct CompletionQueue {
    buffer: VecDeque<Completion>,
}

impl CompletionQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, completion: Completion) {
        self.buffer.push_back(completion);
    }

    pub(crate) fn drain(&mut self) -> vec_deque::Drain<'_, Completion> {
        self.buffer.drain(..)
    }
}

/// Common state of a simulated activity.
pub(crate) struct Action {
    pub(crate) state: ActionState,
    pub(crate) suspension: Suspension,
    /// Solver variable, released on the first terminal transition.
    pub(crate) variable: Option<VariableId>,
    /// Remaining amount of work.
    pub(crate) remains: f64,
    /// Remaining startup latency, in seconds.
    pub(crate) latency: f64,
    /// Remaining time before the duration cap fires, in seconds.
    pub(crate) max_duration: Option<f64>,
    /// Weight restored by a resume or a promotion.
    pub(crate) priority: f64,
    pub(crate) start: MonotonicTime,
}

impl Action {
    /// Creates an action; it starts in the latency phase if `latency` is
    /// positive.
    pub(crate) fn new(start: MonotonicTime, remains: f64, latency: f64) -> Self {
        Self {
            state: if latency > 0.0 {
                ActionState::Ready
            } else {
                ActionState::Running
            },
            suspension: Suspension::Active,
            variable: None,
            remains,
            latency,
            max_duration: None,
            priority: 1.0,
            start,
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves the action to a terminal state, releasing its variable and
    /// queueing exactly one completion notification.
    ///
    /// Terminal transitions are idempotent: finishing an already-finished
    /// action reports `false` and has no effect.
    pub(crate) fn finish(
        &mut self,
        id: ActionId,
        state: ActionState,
        now: MonotonicTime,
        system: &mut System,
        completions: &mut CompletionQueue,
    ) -> bool {
        debug_assert!(state.is_terminal());
        if self.is_terminal() {
            return false;
        }

        if let Some(variable) = self.variable.take() {
            system.remove_variable(variable);
        }
        self.state = state;
        completions.push(Completion {
            action: id,
            state,
            remains: self.remains,
            start: self.start,
            finish: now,
        });
        trace!(action = id.0, state = ?state, remains = self.remains, "action finished");

        true
    }

    /// Pins the variable's weight to zero without losing the remaining work.
    pub(crate) fn suspend(&mut self, system: &mut System) {
        if self.is_terminal() || self.suspension != Suspension::Active {
            return;
        }
        if self.latency > 0.0 {
            // The weight is already zero; remember to defer the promotion.
            self.suspension = Suspension::Frozen;
            return;
        }
        if let Some(variable) = self.variable {
            system.set_variable_weight(variable, 0.0);
        }
        self.suspension = Suspension::Suspended;
    }

    /// Restores the variable's weight after a suspension.
    pub(crate) fn resume(&mut self, system: &mut System) {
        if self.is_terminal() {
            return;
        }
        match self.suspension {
            Suspension::Active => {}
            Suspension::Frozen => {
                // The latency phase is still pending; the promotion will
                // restore the weight when it completes.
                self.suspension = Suspension::Active;
            }
            Suspension::Suspended => {
                if let Some(variable) = self.variable {
                    system.set_variable_weight(variable, self.priority);
                }
                if self.state == ActionState::Ready {
                    self.state = ActionState::Running;
                }
                self.suspension = Suspension::Active;
            }
        }
    }

    /// Changes the action's priority (the variable's weight).
    pub(crate) fn set_priority(&mut self, priority: f64, system: &mut System) {
        if self.is_terminal() {
            return;
        }
        self.priority = priority;
        // Only effective immediately when the weight is not pinned to zero.
        if self.suspension == Suspension::Active && self.latency <= 0.0 {
            if let Some(variable) = self.variable {
                system.set_variable_weight(variable, priority);
            }
        }
    }

    /// Sets or clears the duration cap, counted from the current instant.
    pub(crate) fn set_deadline(&mut self, deadline: Option<f64>) {
        if self.is_terminal() {
            return;
        }
        self.max_duration = deadline;
    }

    /// Advances the startup latency and performs the latency-to-bandwidth
    /// promotion when it completes, raising the weight and applying the
    /// promoted allocation cap.
    pub(crate) fn elapse_latency(&mut self, delta: f64, promoted_bound: f64, system: &mut System) {
        if self.latency <= 0.0 {
            return;
        }
        drain(&mut self.latency, delta);
        if self.latency > 0.0 {
            return;
        }

        if let Some(variable) = self.variable {
            system.set_variable_bound(variable, promoted_bound);
            match self.suspension {
                Suspension::Active => {
                    system.set_variable_weight(variable, self.priority);
                    if self.state == ActionState::Ready {
                        self.state = ActionState::Running;
                    }
                }
                // Suspended mid-latency: the resume will restore the weight.
                Suspension::Frozen => self.suspension = Suspension::Suspended,
                Suspension::Suspended => {}
            }
        }
    }

    /// Consumes `value * delta` of the remaining work.
    pub(crate) fn consume(&mut self, value: f64, delta: f64) {
        drain(&mut self.remains, value * delta);
    }

    /// Advances the duration-cap countdown; returns `true` if it expired.
    pub(crate) fn elapse_deadline(&mut self, delta: f64) -> bool {
        match self.max_duration.as_mut() {
            Some(left) => {
                *left -= delta;
                *left <= PRECISION
            }
            None => false,
        }
    }

    /// Earliest instant, in seconds from now, at which this action can
    /// change state: end of the latency phase, exhaustion of the remaining
    /// work at the currently solved rate, or expiry of the duration cap.
    ///
    /// Returns `None` for terminal and starved actions, which schedule no
    /// event by themselves.
    pub(crate) fn completion_bound(&self, system: &System) -> Option<f64> {
        if self.is_terminal() {
            return None;
        }
        let mut bound: Option<f64> = None;
        if self.latency > 0.0 {
            bound = Some(self.latency);
        } else if let Some(variable) = self.variable {
            let value = system.variable_value(variable);
            if value > 0.0 {
                bound = Some(self.remains / value);
            }
        }
        if let Some(left) = self.max_duration {
            let left = left.max(0.0);
            bound = Some(match bound {
                None => left,
                Some(bound) => bound.min(left),
            });
        }

        bound
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("state", &self.state)
            .field("remains", &self.remains)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}
