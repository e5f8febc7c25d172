//! Max-min fair-share linear system.
//!
//! This module contains the resource-sharing solver at the heart of the
//! simulator. A [`System`] gathers the capacitated resources of one resource
//! category as [constraints](ConstraintId) and the concurrent demands placed
//! on them as [variables](VariableId), connected by weighted elements. Solving
//! the system assigns to every variable the allocation it receives at the
//! current simulated instant, using *progressive filling*: the most
//! constrained resource is saturated first and the variables it bottlenecks
//! are fixed, then the next most constrained one, until every contending
//! variable holds its max-min fair allocation.
//!
//! Two sharing semantics are supported. A [`SharingPolicy::Shared`] constraint
//! divides its capacity among its users, so the sum of their consumptions may
//! not exceed the bound. A [`SharingPolicy::Fatpipe`] constraint instead caps
//! each user individually: only the largest consumption counts against the
//! bound, which models duplex or backplane-like resources that do not degrade
//! under concurrent use.
//!
//! The solver never fails: variables that cannot receive capacity (zero
//! weight, exhausted constraints) are simply left with a zero allocation.
//! The only fallible operation is element registration, which reports a
//! [`CapacityError`] when a variable outgrows the element storage it was
//! created with.

mod system;

pub use system::{CapacityError, ConstraintId, SharingPolicy, System, VariableId};
