//! Preserve-none infection.
//!
//! The engine starts from every definition already using the preserve-none
//! convention and walks the call graph towards callers, handing the attribute
//! to every caller whose ABI the compiler is free to change:
//!
//! 1. seed a FIFO worklist with the attributed definitions;
//! 2. pop a function, skip it if visited, mark it visited;
//! 3. an unattributed function that is not infectable, or whose address is used
//!    other than as a direct callee, stops the walk on that path;
//! 4. otherwise enqueue every unvisited unattributed caller, and attribute the
//!    function if it was not already.
//!
//! Every function is processed at most once, so cycles in the call graph
//! (recursion, mutual recursion) terminate without special handling.
use std::collections::{HashSet, VecDeque};

use log::{debug, info};
use pninstr::{
    analysis::UseGraph,
    modules::{CallingConvention, Function, Module, attributes::FunctionAttributes},
};
use uuid::Uuid;

/// Returns true if `function` already uses the preserve-none convention,
/// through an attribute or its calling convention.
pub fn has_preserve_none(function: &Function) -> bool {
    function.attributes.implies_restricted_convention()
        || function.cconv == CallingConvention::PreserveNoneC
}

/// Returns true if no other compilation unit can observe the ABI of `function`:
/// it is a local, non-weak definition.
pub fn is_infectable(function: &Function) -> bool {
    !function.linkage.is_weak_for_linker()
        && function.linkage.is_local()
        && function.is_definition()
}

/// Give `function` the preserve-none attribute. Returns false if it already
/// carried it.
pub fn apply_preserve_none(function: &mut Function) -> bool {
    if has_preserve_none(function) {
        return false;
    }
    function
        .attributes
        .insert(FunctionAttributes::NO_CALLEE_SAVED_REGISTERS);
    true
}

/// Outcome of one infection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfectionReport {
    /// Definitions that carried the attribute on entry.
    pub seeds: Vec<Uuid>,
    /// Functions that received the attribute, in infection order.
    pub infected: Vec<Uuid>,
    /// Number of functions taken off the worklist.
    pub visited: usize,
}

impl InfectionReport {
    /// Returns true if at least one function was newly infected.
    pub fn changed(&self) -> bool {
        !self.infected.is_empty()
    }
}

/// Propagate the preserve-none attribute from callees to eligible callers.
pub fn infect_module(module: &mut Module) -> InfectionReport {
    let uses = UseGraph::build(module);
    let mut report = InfectionReport::default();
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut worklist: VecDeque<Uuid> = VecDeque::new();

    for (uuid, function) in &module.functions {
        if function.is_definition() && has_preserve_none(function) {
            info!(
                "Found preserve-none function `{}`, start infecting",
                function.name
            );
            report.seeds.push(*uuid);
            worklist.push_back(*uuid);
        }
    }

    while let Some(uuid) = worklist.pop_front() {
        if !visited.insert(uuid) {
            continue;
        }
        report.visited += 1;

        let Some(function) = module.functions.get(&uuid) else {
            continue;
        };

        let attributed = has_preserve_none(function);
        if !attributed && !(is_infectable(function) && uses.all_uses_are_direct_calls(uuid)) {
            debug!(
                "Function `{}` cannot adopt preserve-none, infection stops here",
                function.name
            );
            continue;
        }

        for caller in uses.callers(uuid) {
            if visited.contains(&caller) {
                continue;
            }
            let Some(caller_function) = module.functions.get(&caller) else {
                continue;
            };
            if caller_function.is_definition() && !has_preserve_none(caller_function) {
                worklist.push_back(caller);
            }
        }

        if !attributed {
            if let Some(function) = module.functions.get_mut(&uuid) {
                apply_preserve_none(function);
                info!(
                    "Infected function `{}` with preserve-none",
                    function.name
                );
            }
            report.infected.push(uuid);
        }
    }

    debug!(
        "Preserve-none infection: {} seed(s), {} infected, {} visited",
        report.seeds.len(),
        report.infected.len(),
        report.visited
    );

    report
}
