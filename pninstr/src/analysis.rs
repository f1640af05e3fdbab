//! Function use analysis.
//!
//! Builds a graph whose nodes are the functions of a module and whose edges go
//! from a user function to every function it references. Each edge accumulates
//! the ways the target is used inside the source body, so a single query tells
//! whether a function is only ever reached through direct calls.
use bitflags::bitflags;
use log::trace;
use petgraph::{Direction, prelude::DiGraphMap};
use uuid::Uuid;

use crate::modules::{
    Instruction, Module,
    instructions::{Instr, Terminator},
    operand::Operand,
};

bitflags! {
    /// Kinds of uses a function may have inside another function's body.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UseFlags: u8 {
        /// Used as the callee operand of an invoke.
        const DIRECT_CALL = 1 << 0;

        /// Used as a value: passed as an argument, assigned, stored or
        /// returned. The address escapes and the function may be reached
        /// through an indirect call.
        const INDIRECT = 1 << 1;
    }
}

/// Use graph of a module.
///
/// Edge `a -> b` with weight `w` means the body of `a` uses `b` in every way
/// listed in `w`. Recursion shows up as self loops.
#[derive(Debug, Clone, Default)]
pub struct UseGraph {
    graph: DiGraphMap<Uuid, UseFlags>,
}

impl UseGraph {
    /// Scan every definition of `module` and record the function operands it
    /// contains.
    pub fn build(module: &Module) -> Self {
        let mut graph: DiGraphMap<Uuid, UseFlags> = DiGraphMap::new();
        for uuid in module.functions.keys() {
            graph.add_node(*uuid);
        }

        let mut record = |user: Uuid, used: Uuid, flags: UseFlags| {
            if let Some(weight) = graph.edge_weight_mut(user, used) {
                *weight |= flags;
            } else {
                graph.add_edge(user, used, flags);
            }
        };

        for (user, function) in &module.functions {
            for instr in function.instructions() {
                match instr {
                    Instr::Invoke(invoke) => {
                        if let Operand::Func(callee) = invoke.function {
                            record(*user, callee, UseFlags::DIRECT_CALL);
                        }
                        for arg in &invoke.args {
                            if let Operand::Func(used) = arg {
                                record(*user, *used, UseFlags::INDIRECT);
                            }
                        }
                    }
                    other => {
                        for used in other.referenced_functions() {
                            record(*user, used, UseFlags::INDIRECT);
                        }
                    }
                }
            }

            for terminator in function.terminators() {
                if let Terminator::Ret(Some(Operand::Func(used))) = terminator {
                    record(*user, *used, UseFlags::INDIRECT);
                }
            }
        }

        trace!(
            "Built use graph with {} functions and {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        Self { graph }
    }

    /// All uses of `used` inside the body of `user`.
    pub fn uses(&self, user: Uuid, used: Uuid) -> UseFlags {
        self.graph
            .edge_weight(user, used)
            .copied()
            .unwrap_or_default()
    }

    /// Functions whose body contains at least one direct call to `callee`.
    ///
    /// Each caller is listed once no matter how many call sites it has.
    pub fn callers(&self, callee: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.users(callee)
            .filter(move |user| self.uses(*user, callee).contains(UseFlags::DIRECT_CALL))
    }

    /// Functions whose body references `used` in any way.
    pub fn users(&self, used: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.graph
            .contains_node(used)
            .then(|| self.graph.neighbors_directed(used, Direction::Incoming))
            .into_iter()
            .flatten()
    }

    /// Functions directly called from the body of `caller`.
    pub fn callees(&self, caller: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.graph
            .contains_node(caller)
            .then(|| self.graph.neighbors_directed(caller, Direction::Outgoing))
            .into_iter()
            .flatten()
            .filter(move |callee| self.uses(caller, *callee).contains(UseFlags::DIRECT_CALL))
    }

    /// Returns true if every use of `function` in the module is the callee of a
    /// direct call. Unused functions trivially qualify.
    pub fn all_uses_are_direct_calls(&self, function: Uuid) -> bool {
        self.users(function)
            .all(|user| !self.uses(user, function).contains(UseFlags::INDIRECT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        Function, Linkage,
        instructions::{Assign, Invoke, Store},
    };

    #[test]
    fn callers_are_deduplicated_per_function() {
        let mut module = Module::new();
        let callee = module.add_function(Function::definition("callee", Linkage::Internal));
        let mut caller = Function::definition("caller", Linkage::Internal);
        caller.push_instruction(Invoke::direct(callee));
        caller.push_instruction(Invoke::direct(callee));
        let caller = module.add_function(caller);

        let graph = UseGraph::build(&module);
        assert_eq!(graph.callers(callee).collect::<Vec<_>>(), vec![caller]);
        assert_eq!(graph.callees(caller).collect::<Vec<_>>(), vec![callee]);
        assert!(graph.all_uses_are_direct_calls(callee));
    }

    #[test]
    fn escaping_addresses_are_indirect_uses() {
        let mut module = Module::new();
        let passed = module.add_function(Function::definition("passed", Linkage::Internal));
        let assigned = module.add_function(Function::definition("assigned", Linkage::Internal));
        let stored = module.add_function(Function::definition("stored", Linkage::Internal));
        let sink = module.add_function(Function::declaration("sink", Linkage::External));

        let mut user = Function::definition("user", Linkage::External);
        user.push_instruction(Invoke {
            args: vec![Operand::Func(passed)],
            ..Invoke::direct(sink)
        });
        user.push_instruction(Assign {
            dest: 0,
            value: Operand::Func(assigned),
        });
        user.push_instruction(Store {
            address: Operand::Reg(0),
            value: Operand::Func(stored),
        });
        user.push_instruction(Invoke::indirect(0));
        let user = module.add_function(user);

        let graph = UseGraph::build(&module);
        for f in [passed, assigned, stored] {
            assert!(!graph.all_uses_are_direct_calls(f));
            assert_eq!(graph.callers(f).count(), 0);
            assert_eq!(graph.uses(user, f), UseFlags::INDIRECT);
        }
        assert!(graph.all_uses_are_direct_calls(sink));
    }

    #[test]
    fn mixed_uses_in_one_body_accumulate() {
        let mut module = Module::new();
        let target = module.add_function(Function::definition("target", Linkage::Internal));
        let mut user = Function::definition("user", Linkage::Internal);
        user.push_instruction(Invoke::direct(target));
        user.push_instruction(Assign {
            dest: 1,
            value: Operand::Func(target),
        });
        let user = module.add_function(user);

        let graph = UseGraph::build(&module);
        assert_eq!(
            graph.uses(user, target),
            UseFlags::DIRECT_CALL | UseFlags::INDIRECT
        );
        assert_eq!(graph.callers(target).collect::<Vec<_>>(), vec![user]);
        assert!(!graph.all_uses_are_direct_calls(target));
    }

    #[test]
    fn returned_address_is_indirect_use() {
        let mut module = Module::new();
        let target = module.add_function(Function::definition("target", Linkage::Internal));
        let mut user = Function::definition("user", Linkage::Internal);
        if let Some(blocks) = user.body.as_mut() {
            blocks[0].terminator = Terminator::Ret(Some(Operand::Func(target)));
        }
        module.add_function(user);

        assert!(!UseGraph::build(&module).all_uses_are_direct_calls(target));
    }

    #[test]
    fn recursion_is_a_self_loop() {
        let mut module = Module::new();
        let mut f = Function::definition("f", Linkage::Internal);
        let uuid = f.uuid;
        f.push_instruction(Invoke::direct(uuid));
        module.add_function(f);

        let graph = UseGraph::build(&module);
        assert_eq!(graph.callers(uuid).collect::<Vec<_>>(), vec![uuid]);
        assert!(graph.all_uses_are_direct_calls(uuid));
    }

    #[test]
    fn unknown_function_has_no_users() {
        let graph = UseGraph::build(&Module::new());
        assert_eq!(graph.users(Uuid::new_v4()).count(), 0);
        assert!(graph.all_uses_are_direct_calls(Uuid::new_v4()));
    }
}
