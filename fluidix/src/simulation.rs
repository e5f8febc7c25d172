//! Simulation driver.
//!
//! This module contains the [`Simulation`] environment that drives the
//! registered resource models through the two-phase event loop. Each step
//! queries every model for the earliest instant at which one of its actions
//! can change state, advances the simulation clock by the smallest reported
//! delta and lets every model consume the elapsed time.
//!
//! Models are moved into the simulation with [`Simulation::add_model`],
//! which returns a typed [`ModelId`] handle; the handle gives back typed
//! access to the model for creating actions and draining completions while
//! the simulation runs.
//!
//! The clock only advances when some model has an event scheduled: a
//! simulation where every action is starved but none carries a latency or a
//! duration cap reports quiescence through [`Simulation::step`] returning
//! `None` rather than spinning.

use std::error::Error;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use slab::Slab;

use crate::model::Model;
use crate::time::MonotonicTime;

/// Typed handle to a model registered in a [`Simulation`].
pub struct ModelId<M: ?Sized> {
    key: usize,
    _phantom: PhantomData<fn() -> M>,
}

impl<M: ?Sized> Clone for ModelId<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: ?Sized> Copy for ModelId<M> {}

impl<M: ?Sized> fmt::Debug for ModelId<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelId").field(&self.key).finish()
    }
}

/// Error returned when a simulation deadline lies in the past of the current
/// simulation time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PastDeadlineError {}

impl fmt::Display for PastDeadlineError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "the deadline lies in the past of the simulation time")
    }
}

impl Error for PastDeadlineError {}

/// Simulation environment.
///
/// A `Simulation` owns the registered resource models and the simulation
/// clock. A call to [`step()`](Simulation::step) performs one two-phase
/// cycle:
///
/// 1. every model solves its fair-share system and reports how soon one of
///    its actions can change state,
/// 2. the clock advances by the smallest reported delta, and every model
///    consumes the elapsed time, completing, failing or timing out the
///    actions concerned.
///
/// [`step_until()`](Simulation::step_until) iterates this cycle up to a
/// deadline, stopping the clock exactly there.
pub struct Simulation {
    models: Slab<Box<dyn Model>>,
    time: MonotonicTime,
}

impl Simulation {
    /// Creates an empty simulation starting at the specified time.
    pub fn new(start: MonotonicTime) -> Self {
        Self {
            models: Slab::new(),
            time: start,
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> MonotonicTime {
        self.time
    }

    /// Moves a model into the simulation and returns a typed handle to it.
    pub fn add_model<M: Model>(&mut self, model: M) -> ModelId<M> {
        ModelId {
            key: self.models.insert(Box::new(model)),
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to a registered model.
    pub fn model<M: Model>(&self, id: ModelId<M>) -> &M {
        self.models[id.key]
            .as_any()
            .downcast_ref()
            .expect("internal simulation error: mismatched model handle")
    }

    /// Returns a mutable reference to a registered model.
    pub fn model_mut<M: Model>(&mut self, id: ModelId<M>) -> &mut M {
        self.models[id.key]
            .as_any_mut()
            .downcast_mut()
            .expect("internal simulation error: mismatched model handle")
    }

    /// Advances the simulation to the next scheduled event, processing all
    /// action transitions it triggers.
    ///
    /// The new simulation time is returned, or `None` if no model has an
    /// event scheduled, in which case time does not advance.
    pub fn step(&mut self) -> Option<MonotonicTime> {
        let delta = self.next_event_delta()?;
        self.advance(delta);

        Some(self.time)
    }

    /// Iteratively advances the simulation until the specified deadline, as
    /// if by calling [`Simulation::step()`] repeatedly.
    ///
    /// The simulation time upon return is exactly the deadline, whether or
    /// not an event was scheduled for that time.
    pub fn step_until(&mut self, deadline: MonotonicTime) -> Result<(), PastDeadlineError> {
        if self.time >= deadline {
            return Err(PastDeadlineError {});
        }
        loop {
            match self.next_event_delta() {
                // Nothing is scheduled: jump to the deadline. The update
                // phase still runs so the models' clocks stay in sync.
                None => {
                    self.advance(duration_between(self.time, deadline));
                    return Ok(());
                }
                Some(delta) => {
                    let left = duration_between(self.time, deadline);
                    if delta >= left {
                        // Partial step: stop the clock exactly at the
                        // deadline.
                        self.advance(left);
                        return Ok(());
                    }
                    self.advance(delta);
                }
            }
        }
    }

    /// First phase: the earliest event over all models.
    fn next_event_delta(&mut self) -> Option<Duration> {
        let mut min: Option<Duration> = None;
        for (_, model) in self.models.iter_mut() {
            if let Some(delta) = model.share_resources(self.time) {
                min = Some(match min {
                    None => delta,
                    Some(min) => min.min(delta),
                });
            }
        }

        min
    }

    /// Second phase: move the clock and let every model consume the elapsed
    /// time.
    fn advance(&mut self, delta: Duration) {
        self.time = self.time + delta;
        for (_, model) in self.models.iter_mut() {
            model.update_actions_state(self.time, delta);
        }
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("time", &self.time)
            .field("models", &self.models.len())
            .finish_non_exhaustive()
    }
}

/// Duration from `from` to `to`; both timestamps must be ordered.
fn duration_between(from: MonotonicTime, to: MonotonicTime) -> Duration {
    debug_assert!(to >= from);
    let secs = to.as_secs() - from.as_secs();
    let nanos = to.subsec_nanos() as i64 - from.subsec_nanos() as i64;
    if nanos >= 0 {
        Duration::new(secs as u64, nanos as u32)
    } else {
        Duration::new((secs - 1) as u64, (nanos + 1_000_000_000) as u32)
    }
}
