use std::error::Error;
use std::fmt;
use std::mem;

use slab::Slab;

use crate::time::{drain, PRECISION};

/// Handle to a constraint of a [`System`].
///
/// A constraint stands for one capacitated resource (a link's bandwidth, a
/// processor's compute power). Handles are only meaningful for the system
/// that created them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConstraintId(pub(crate) usize);

/// Handle to a variable of a [`System`].
///
/// A variable stands for the allocation granted to one concurrent activity.
/// Handles are only meaningful for the system that created them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariableId(pub(crate) usize);

/// Capacity-sharing semantics of a constraint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SharingPolicy {
    /// The consumptions of concurrent users add up against the bound.
    Shared,
    /// Each user is individually capped by the bound; only the largest
    /// consumption counts against it.
    Fatpipe,
}

/// Error returned when a variable is expanded onto more constraints than it
/// was sized for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CapacityError {
    /// Number of elements the variable was created with room for.
    pub capacity: usize,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "the variable cannot reference more than {} constraints",
            self.capacity
        )
    }
}

impl Error for CapacityError {}

/// One (variable, constraint) edge, owned by its variable.
struct Element {
    /// Referenced constraint, or `None` once the constraint was removed.
    constraint: Option<ConstraintId>,
    /// Consumption inflicted on the constraint per unit of allocation.
    value: f64,
    /// Solver scratch: the element still takes part in the current solve.
    active: bool,
}

/// Back-reference from a constraint to one element of one of its variables.
#[derive(Copy, Clone, PartialEq, Eq)]
struct ElementRef {
    var: usize,
    elem: usize,
}

struct Constraint {
    bound: f64,
    policy: SharingPolicy,
    /// Solver scratch: aggregate demand per unit of fair allocation.
    usage: f64,
    /// Solver scratch: capacity left to distribute.
    remaining: f64,
    /// Member elements, with positive-weight variables kept in front so the
    /// usage scan can stop at the first zero-weight entry.
    elements: Vec<ElementRef>,
}

struct Variable {
    /// Inverse priority; a non-positive weight withdraws the variable from
    /// contention.
    weight: f64,
    /// Hard cap on the allocation; non-positive means unbounded.
    bound: f64,
    /// Solved allocation.
    value: f64,
    elements: Vec<Element>,
    /// Maximum number of elements, fixed at creation.
    capacity: usize,
    /// Solver scratch: the allocation was fixed by a previous pass.
    resolved: bool,
}

/// A max-min fair-share linear system.
///
/// The system owns the constraints and variables of one resource category and
/// distributes constraint capacities over variables with the progressive
/// filling algorithm (see the [module documentation](crate::solver)).
///
/// All mutating operations mark the system as modified; [`System::solve`]
/// short-circuits to a no-op when nothing changed since the last solve.
///
/// # Panics
///
/// Methods taking a [`ConstraintId`] or [`VariableId`] panic if the handle
/// was removed from the system; handles must not outlive the entity they
/// designate.
pub struct System {
    constraints: Slab<Constraint>,
    variables: Slab<Variable>,
    /// Constraints achieving the current bottleneck ratio (solver scratch).
    saturated_constraints: Vec<usize>,
    /// Variables fixed by the current pass (solver scratch).
    saturated_variables: Vec<usize>,
    modified: bool,
}

impl System {
    /// Creates an empty system.
    pub fn new() -> Self {
        Self {
            constraints: Slab::new(),
            variables: Slab::new(),
            saturated_constraints: Vec::new(),
            saturated_variables: Vec::new(),
            modified: false,
        }
    }

    /// Registers a capacitated resource.
    pub fn add_constraint(&mut self, bound: f64, policy: SharingPolicy) -> ConstraintId {
        let key = self.constraints.insert(Constraint {
            bound,
            policy,
            usage: 0.0,
            remaining: 0.0,
            elements: Vec::new(),
        });
        self.modified = true;

        ConstraintId(key)
    }

    /// Removes a constraint, detaching it from all variables that reference
    /// it.
    pub fn remove_constraint(&mut self, constraint: ConstraintId) {
        if let Some(cnst) = self.constraints.try_remove(constraint.0) {
            for ElementRef { var, elem } in cnst.elements {
                self.variables[var].elements[elem].constraint = None;
            }
            self.modified = true;
        }
    }

    /// Registers the allocation variable of one activity, with room for up to
    /// `capacity` constraint references.
    pub fn add_variable(&mut self, weight: f64, bound: f64, capacity: usize) -> VariableId {
        let key = self.variables.insert(Variable {
            weight,
            bound,
            value: 0.0,
            elements: Vec::with_capacity(capacity),
            capacity,
            resolved: false,
        });
        self.modified = true;

        VariableId(key)
    }

    /// Removes a variable and withdraws its demand from all constraints.
    pub fn remove_variable(&mut self, variable: VariableId) {
        let var = match self.variables.try_remove(variable.0) {
            Some(var) => var,
            None => return,
        };
        for (elem, element) in var.elements.iter().enumerate() {
            if let Some(cid) = element.constraint {
                let refs = &mut self.constraints[cid.0].elements;
                refs.retain(|e| !(e.var == variable.0 && e.elem == elem));
            }
        }
        self.modified = true;
    }

    /// Adds an element binding `variable` to `constraint` with the given
    /// consumption coefficient.
    ///
    /// An error is returned if the variable already references as many
    /// constraints as it was created with room for.
    pub fn expand(
        &mut self,
        constraint: ConstraintId,
        variable: VariableId,
        value: f64,
    ) -> Result<(), CapacityError> {
        let var = &mut self.variables[variable.0];
        if var.elements.len() == var.capacity {
            return Err(CapacityError {
                capacity: var.capacity,
            });
        }
        let elem = var.elements.len();
        var.elements.push(Element {
            constraint: Some(constraint),
            value,
            active: false,
        });
        let contending = var.weight > 0.0;

        let eref = ElementRef {
            var: variable.0,
            elem,
        };
        let refs = &mut self.constraints[constraint.0].elements;
        if contending {
            refs.insert(0, eref);
        } else {
            refs.push(eref);
        }
        self.modified = true;

        Ok(())
    }

    /// Like [`System::expand`], but accumulates onto the existing element if
    /// the variable already references this constraint.
    ///
    /// This keeps a demand traversing the same resource several times (e.g. a
    /// route crossing one link twice) represented by a single element.
    pub fn expand_add(
        &mut self,
        constraint: ConstraintId,
        variable: VariableId,
        value: f64,
    ) -> Result<(), CapacityError> {
        let var = &mut self.variables[variable.0];
        for element in &mut var.elements {
            if element.constraint == Some(constraint) {
                element.value += value;
                self.modified = true;

                return Ok(());
            }
        }

        self.expand(constraint, variable, value)
    }

    /// Changes the weight (inverse priority) of a variable.
    ///
    /// A non-positive weight withdraws the variable from contention; its
    /// allocation solves to zero until the weight is raised again.
    pub fn set_variable_weight(&mut self, variable: VariableId, weight: f64) {
        if self.variables[variable.0].weight == weight {
            return;
        }

        // Reposition the variable's elements so every constraint keeps its
        // positive-weight entries in front.
        let len = self.variables[variable.0].elements.len();
        for elem in 0..len {
            let cid = match self.variables[variable.0].elements[elem].constraint {
                Some(cid) => cid,
                None => continue,
            };
            let refs = &mut self.constraints[cid.0].elements;
            if let Some(pos) = refs
                .iter()
                .position(|e| e.var == variable.0 && e.elem == elem)
            {
                let eref = refs.remove(pos);
                if weight > 0.0 {
                    refs.insert(0, eref);
                } else {
                    refs.push(eref);
                }
            }
        }
        self.variables[variable.0].weight = weight;
        self.modified = true;
    }

    /// Returns the weight of a variable.
    pub fn variable_weight(&self, variable: VariableId) -> f64 {
        self.variables[variable.0].weight
    }

    /// Changes the allocation cap of a variable; non-positive means
    /// unbounded.
    pub fn set_variable_bound(&mut self, variable: VariableId, bound: f64) {
        self.variables[variable.0].bound = bound;
        self.modified = true;
    }

    /// Returns the solved allocation of a variable.
    pub fn variable_value(&self, variable: VariableId) -> f64 {
        self.variables[variable.0].value
    }

    /// Changes the capacity of a constraint.
    pub fn set_constraint_bound(&mut self, constraint: ConstraintId, bound: f64) {
        self.constraints[constraint.0].bound = bound;
        self.modified = true;
    }

    /// Returns the capacity of a constraint.
    pub fn constraint_bound(&self, constraint: ConstraintId) -> f64 {
        self.constraints[constraint.0].bound
    }

    /// Returns the consumption inflicted on a constraint by the last solve:
    /// the summed consumption of its users for a shared constraint, the
    /// largest one for a fatpipe constraint.
    pub fn constraint_load(&self, constraint: ConstraintId) -> f64 {
        let cnst = &self.constraints[constraint.0];
        let mut load = 0.0;
        for &ElementRef { var, elem } in &cnst.elements {
            let consumption = self.variables[var].elements[elem].value * self.variables[var].value;
            match cnst.policy {
                SharingPolicy::Shared => load += consumption,
                SharingPolicy::Fatpipe => load = f64::max(load, consumption),
            }
        }

        load
    }

    /// Whether the system changed since the last solve.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Solves the system, fixing the allocation of every variable.
    ///
    /// This is a no-op if nothing changed since the last solve.
    pub fn solve(&mut self) {
        if !self.modified {
            return;
        }
        self.do_solve();
        self.modified = false;
    }

    fn do_solve(&mut self) {
        // The saturated sets are moved out during the solve to keep field
        // borrows disjoint; they are handed back before returning.
        let mut saturated_cnsts = mem::take(&mut self.saturated_constraints);
        let mut saturated_vars = mem::take(&mut self.saturated_variables);

        // Reset the scratch state of all variables. Variables out of
        // contention are resolved from the start, with a zero allocation.
        for (_, var) in self.variables.iter_mut() {
            var.value = 0.0;
            var.resolved = var.weight <= 0.0;
            for element in &mut var.elements {
                element.active = false;
            }
        }

        // Reset every active constraint and compute its aggregate usage. The
        // element list keeps positive-weight entries in front, so the scan
        // stops at the first zero-weight variable.
        let active: Vec<usize> = self
            .constraints
            .iter()
            .filter(|(_, cnst)| !cnst.elements.is_empty())
            .map(|(key, _)| key)
            .collect();
        for &ck in &active {
            self.constraints[ck].remaining = self.constraints[ck].bound;
            let policy = self.constraints[ck].policy;
            let len = self.constraints[ck].elements.len();
            let mut usage = 0.0;
            for i in 0..len {
                let ElementRef { var, elem } = self.constraints[ck].elements[i];
                let weight = self.variables[var].weight;
                if weight <= 0.0 {
                    break;
                }
                let value = self.variables[var].elements[elem].value;
                if value > 0.0 {
                    match policy {
                        SharingPolicy::Shared => usage += value / weight,
                        SharingPolicy::Fatpipe => usage = f64::max(usage, value / weight),
                    }
                    self.variables[var].elements[elem].active = true;
                }
            }
            self.constraints[ck].usage = usage;
        }

        // Progressive filling: each pass saturates the currently most
        // constrained resource (or the tightest per-variable cap, whichever
        // bites first) and fixes the variables it bottlenecks.
        loop {
            // Bottleneck search; ties all saturate in the same pass.
            saturated_cnsts.clear();
            let mut min_ratio: Option<f64> = None;
            for &ck in &active {
                let cnst = &self.constraints[ck];
                if cnst.usage <= PRECISION || cnst.remaining <= PRECISION {
                    continue;
                }
                let ratio = cnst.remaining / cnst.usage;
                match min_ratio {
                    None => {
                        min_ratio = Some(ratio);
                        saturated_cnsts.push(ck);
                    }
                    Some(min) if ratio < min - PRECISION => {
                        min_ratio = Some(ratio);
                        saturated_cnsts.clear();
                        saturated_cnsts.push(ck);
                    }
                    Some(min) if ratio <= min + PRECISION => saturated_cnsts.push(ck),
                    Some(_) => {}
                }
            }

            // A variable whose own cap undercuts the bottleneck ratio is
            // limited by that cap rather than by any shared resource; the
            // tightest cap lowers the allocation target of this pass.
            let mut min_bound: Option<f64> = None;
            for (_, var) in self.variables.iter() {
                if var.resolved || !self.bound_limited(var) {
                    continue;
                }
                let bound = var.bound * var.weight;
                min_bound = Some(match min_bound {
                    None => bound,
                    Some(min) => f64::min(min, bound),
                });
            }

            let (target, by_bound) = match (min_ratio, min_bound) {
                (None, None) => break,
                (Some(ratio), None) => (ratio, false),
                (None, Some(bound)) => (bound, true),
                (Some(ratio), Some(bound)) => {
                    if bound < ratio - PRECISION {
                        (bound, true)
                    } else {
                        (ratio, false)
                    }
                }
            };

            // Collect the variables fixed by this pass.
            saturated_vars.clear();
            if by_bound {
                for (vk, var) in self.variables.iter() {
                    if var.resolved || !self.bound_limited(var) {
                        continue;
                    }
                    if var.bound * var.weight <= target + PRECISION {
                        saturated_vars.push(vk);
                    }
                }
            } else {
                for ci in 0..saturated_cnsts.len() {
                    let ck = saturated_cnsts[ci];
                    let len = self.constraints[ck].elements.len();
                    for i in 0..len {
                        let ElementRef { var, elem } = self.constraints[ck].elements[i];
                        if self.variables[var].weight <= 0.0 {
                            break;
                        }
                        if self.variables[var].resolved {
                            continue;
                        }
                        if self.variables[var].elements[elem].active
                            && !saturated_vars.contains(&var)
                        {
                            saturated_vars.push(var);
                        }
                    }
                }
            }
            if saturated_vars.is_empty() {
                break;
            }

            // Fix each saturated variable and withdraw its demand from the
            // constraints it references.
            for vi in 0..saturated_vars.len() {
                let vk = saturated_vars[vi];
                let weight = self.variables[vk].weight;
                let value = if by_bound {
                    self.variables[vk].bound
                } else {
                    target / weight
                };
                self.variables[vk].value = value;
                self.variables[vk].resolved = true;

                let len = self.variables[vk].elements.len();
                for i in 0..len {
                    let (ck, coeff, was_active) = {
                        let element = &self.variables[vk].elements[i];
                        match element.constraint {
                            Some(cid) => (cid.0, element.value, element.active),
                            None => continue,
                        }
                    };
                    if !was_active {
                        continue;
                    }
                    self.variables[vk].elements[i].active = false;
                    match self.constraints[ck].policy {
                        SharingPolicy::Shared => {
                            let cnst = &mut self.constraints[ck];
                            drain(&mut cnst.remaining, coeff * value);
                            drain(&mut cnst.usage, coeff / weight);
                        }
                        SharingPolicy::Fatpipe => {
                            // Removing the largest contributor can change the
                            // maximum: rescan the remaining active elements.
                            let len = self.constraints[ck].elements.len();
                            let mut usage = 0.0;
                            for j in 0..len {
                                let ElementRef { var, elem } =
                                    self.constraints[ck].elements[j];
                                let var_ref = &self.variables[var];
                                if var_ref.weight <= 0.0 {
                                    break;
                                }
                                let element = &var_ref.elements[elem];
                                if element.active && element.value > 0.0 {
                                    usage = f64::max(usage, element.value / var_ref.weight);
                                }
                            }
                            self.constraints[ck].usage = usage;
                        }
                    }
                }
            }
        }

        self.saturated_constraints = saturated_cnsts;
        self.saturated_variables = saturated_vars;
    }

    /// Whether an unresolved variable can be fixed at its own allocation
    /// cap.
    ///
    /// A variable placing demand on an exhausted constraint is starved, not
    /// bound-limited: its allocation stays at zero however small its cap.
    fn bound_limited(&self, var: &Variable) -> bool {
        if var.bound <= 0.0 {
            return false;
        }
        var.elements.iter().all(|element| match element.constraint {
            Some(cid) => element.value <= 0.0 || self.constraints[cid.0].remaining > PRECISION,
            None => true,
        })
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("constraints", &self.constraints.len())
            .field("variables", &self.variables.len())
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::rng::Rng;

    const EPSILON: f64 = 1e-6;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPSILON,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn equal_variables_split_capacity() {
        let mut system = System::new();
        let cnst = system.add_constraint(100.0, SharingPolicy::Shared);
        let a = system.add_variable(1.0, 0.0, 1);
        let b = system.add_variable(1.0, 0.0, 1);
        system.expand(cnst, a, 1.0).unwrap();
        system.expand(cnst, b, 1.0).unwrap();

        system.solve();

        assert_close(system.variable_value(a), 50.0);
        assert_close(system.variable_value(b), 50.0);
        assert_close(system.constraint_load(cnst), 100.0);
    }

    #[test]
    fn bounded_variable_frees_capacity() {
        let mut system = System::new();
        let cnst = system.add_constraint(100.0, SharingPolicy::Shared);
        let a = system.add_variable(1.0, 30.0, 1);
        let b = system.add_variable(1.0, 0.0, 1);
        system.expand(cnst, a, 1.0).unwrap();
        system.expand(cnst, b, 1.0).unwrap();

        system.solve();

        // The bound bites before the fair share of 50; the freed capacity
        // goes to the unbounded variable.
        assert_close(system.variable_value(a), 30.0);
        assert_close(system.variable_value(b), 70.0);
    }

    #[test]
    fn fatpipe_grants_full_capacity_to_each_user() {
        let mut system = System::new();
        let cnst = system.add_constraint(100.0, SharingPolicy::Fatpipe);
        let a = system.add_variable(1.0, 0.0, 1);
        let b = system.add_variable(1.0, 0.0, 1);
        system.expand(cnst, a, 1.0).unwrap();
        system.expand(cnst, b, 1.0).unwrap();

        system.solve();

        assert_close(system.variable_value(a), 100.0);
        assert_close(system.variable_value(b), 100.0);
        assert_close(system.constraint_load(cnst), 100.0);
    }

    #[test]
    fn weight_is_inverse_priority() {
        let mut system = System::new();
        let cnst = system.add_constraint(90.0, SharingPolicy::Shared);
        let fast = system.add_variable(1.0, 0.0, 1);
        let slow = system.add_variable(2.0, 0.0, 1);
        system.expand(cnst, fast, 1.0).unwrap();
        system.expand(cnst, slow, 1.0).unwrap();

        system.solve();

        assert_close(system.variable_value(fast), 60.0);
        assert_close(system.variable_value(slow), 30.0);
    }

    #[test]
    fn bottlenecks_saturate_in_order() {
        // a uses both constraints, b only the first, c only the second. The
        // tighter first constraint fixes a and b; c then takes what is left
        // of the second one.
        let mut system = System::new();
        let c1 = system.add_constraint(100.0, SharingPolicy::Shared);
        let c2 = system.add_constraint(150.0, SharingPolicy::Shared);
        let a = system.add_variable(1.0, 0.0, 2);
        let b = system.add_variable(1.0, 0.0, 1);
        let c = system.add_variable(1.0, 0.0, 1);
        system.expand(c1, a, 1.0).unwrap();
        system.expand(c2, a, 1.0).unwrap();
        system.expand(c1, b, 1.0).unwrap();
        system.expand(c2, c, 1.0).unwrap();

        system.solve();

        assert_close(system.variable_value(a), 50.0);
        assert_close(system.variable_value(b), 50.0);
        assert_close(system.variable_value(c), 100.0);
    }

    #[test]
    fn tied_bottlenecks_saturate_together() {
        let mut system = System::new();
        let c1 = system.add_constraint(100.0, SharingPolicy::Shared);
        let c2 = system.add_constraint(100.0, SharingPolicy::Shared);
        let a = system.add_variable(1.0, 0.0, 1);
        let b = system.add_variable(1.0, 0.0, 1);
        system.expand(c1, a, 1.0).unwrap();
        system.expand(c2, b, 1.0).unwrap();

        system.solve();

        assert_close(system.variable_value(a), 100.0);
        assert_close(system.variable_value(b), 100.0);
    }

    #[test]
    fn resolve_without_changes_is_a_noop() {
        let mut system = System::new();
        let cnst = system.add_constraint(100.0, SharingPolicy::Shared);
        let a = system.add_variable(1.0, 0.0, 1);
        let b = system.add_variable(3.0, 0.0, 1);
        system.expand(cnst, a, 1.0).unwrap();
        system.expand(cnst, b, 1.0).unwrap();

        system.solve();
        let first = (system.variable_value(a), system.variable_value(b));
        assert!(!system.is_modified());

        system.solve();
        let second = (system.variable_value(a), system.variable_value(b));

        // Bit-identical, not merely close.
        assert_eq!(first, second);
    }

    #[test]
    fn expansion_beyond_capacity_is_reported() {
        let mut system = System::new();
        let c1 = system.add_constraint(100.0, SharingPolicy::Shared);
        let c2 = system.add_constraint(100.0, SharingPolicy::Shared);
        let var = system.add_variable(1.0, 0.0, 1);

        assert!(system.expand(c1, var, 1.0).is_ok());
        assert_eq!(
            system.expand(c2, var, 1.0),
            Err(CapacityError { capacity: 1 })
        );
    }

    #[test]
    fn expand_add_accumulates_on_the_same_constraint() {
        // A route crossing the same link twice consumes twice the bandwidth
        // of its allocation.
        let mut system = System::new();
        let cnst = system.add_constraint(100.0, SharingPolicy::Shared);
        let var = system.add_variable(1.0, 0.0, 1);
        system.expand_add(cnst, var, 1.0).unwrap();
        system.expand_add(cnst, var, 1.0).unwrap();

        system.solve();

        assert_close(system.variable_value(var), 50.0);
        assert_close(system.constraint_load(cnst), 100.0);
    }

    #[test]
    fn zero_weight_variables_do_not_contend() {
        let mut system = System::new();
        let cnst = system.add_constraint(100.0, SharingPolicy::Shared);
        let idle = system.add_variable(0.0, 0.0, 1);
        let busy = system.add_variable(1.0, 0.0, 1);
        system.expand(cnst, idle, 1.0).unwrap();
        system.expand(cnst, busy, 1.0).unwrap();

        system.solve();

        assert_close(system.variable_value(idle), 0.0);
        assert_close(system.variable_value(busy), 100.0);

        // Raising the weight brings the variable back into contention.
        system.set_variable_weight(idle, 1.0);
        system.solve();

        assert_close(system.variable_value(idle), 50.0);
        assert_close(system.variable_value(busy), 50.0);
    }

    #[test]
    fn bound_only_variable_is_fixed_at_its_bound() {
        let mut system = System::new();
        let var = system.add_variable(1.0, 42.0, 0);

        system.solve();

        assert_close(system.variable_value(var), 42.0);
    }

    #[test]
    fn removing_a_variable_redistributes_capacity() {
        let mut system = System::new();
        let cnst = system.add_constraint(100.0, SharingPolicy::Shared);
        let a = system.add_variable(1.0, 0.0, 1);
        let b = system.add_variable(1.0, 0.0, 1);
        system.expand(cnst, a, 1.0).unwrap();
        system.expand(cnst, b, 1.0).unwrap();

        system.solve();
        assert_close(system.variable_value(b), 50.0);

        system.remove_variable(a);
        system.solve();
        assert_close(system.variable_value(b), 100.0);
    }

    #[test]
    fn fatpipe_rescan_tracks_the_next_largest_user() {
        // The bounded variable saturates first; the fatpipe usage must then
        // be recomputed from the remaining contributor.
        let mut system = System::new();
        let cnst = system.add_constraint(100.0, SharingPolicy::Fatpipe);
        let capped = system.add_variable(1.0, 10.0, 1);
        let free = system.add_variable(1.0, 0.0, 1);
        system.expand(cnst, capped, 1.0).unwrap();
        system.expand(cnst, free, 1.0).unwrap();

        system.solve();

        assert_close(system.variable_value(capped), 10.0);
        assert_close(system.variable_value(free), 100.0);
    }

    #[test]
    fn bounded_variable_on_an_exhausted_constraint_is_starved() {
        let mut system = System::new();
        let cnst = system.add_constraint(0.0, SharingPolicy::Shared);
        let var = system.add_variable(1.0, 30.0, 1);
        system.expand(cnst, var, 1.0).unwrap();

        system.solve();

        // The cap does not entitle the variable to capacity the constraint
        // does not have.
        assert_close(system.variable_value(var), 0.0);
    }

    #[test]
    fn random_systems_conserve_capacity() {
        let rng = Rng::new(0xF1D0);

        for _ in 0..200 {
            let mut system = System::new();

            let num_cnsts = 1 + rng.gen_bounded(6) as usize;
            let mut cnsts = Vec::new();
            for _ in 0..num_cnsts {
                let policy = if rng.gen_bounded(4) == 0 {
                    SharingPolicy::Fatpipe
                } else {
                    SharingPolicy::Shared
                };
                cnsts.push(system.add_constraint(1.0 + 99.0 * rng.gen_f64(), policy));
            }

            let num_vars = 1 + rng.gen_bounded(10) as usize;
            let mut vars = Vec::new();
            for _ in 0..num_vars {
                let weight = if rng.gen_bounded(8) == 0 {
                    0.0
                } else {
                    0.5 + rng.gen_f64()
                };
                let bound = if rng.gen_bounded(3) == 0 {
                    1.0 + 49.0 * rng.gen_f64()
                } else {
                    0.0
                };
                let uses = 1 + rng.gen_bounded(num_cnsts as u64) as usize;
                let var = system.add_variable(weight, bound, uses);
                for i in 0..uses {
                    let coeff = 0.5 + rng.gen_f64();
                    system.expand_add(cnsts[i], var, coeff).unwrap();
                }
                vars.push((var, bound));
            }

            system.solve();

            // Capacity conservation on every constraint.
            for &cnst in &cnsts {
                let load = system.constraint_load(cnst);
                let bound = system.constraint_bound(cnst);
                assert!(
                    load <= bound + EPSILON,
                    "constraint overcommitted: load {} > bound {}",
                    load,
                    bound
                );
            }
            // Self-bounds are honored.
            for &(var, bound) in &vars {
                if bound > 0.0 {
                    assert!(system.variable_value(var) <= bound + EPSILON);
                }
            }
        }
    }
}
