//! Shared operand types for instructions.
//!
//! An instruction operand can be a reference to another SSA value (`Reg`),
//! an immediate integer (`Imm`) or the address of a function (`Func`).
use strum::EnumIs;
use uuid::Uuid;

use crate::modules::Module;

/// SSA value identifier used to name the destination or reference another
/// instruction's result.
pub type Name = u32;

/// Represents a basic block label. Labels never cross function boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl Label {
    /// The entry block label.
    pub const NIL: Label = Label(0);
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%block_{}", self.0)
    }
}

/// Instruction operand.
#[derive(Clone, Debug, PartialEq, Eq, Hash, EnumIs)]
pub enum Operand {
    /// Reference to a previously defined SSA value.
    Reg(Name),
    /// Immediate integer literal.
    Imm(i64),
    /// Address of a function of the module.
    ///
    /// When this operand is the callee of an invoke it denotes a direct call,
    /// in any other position the function address escapes as a value.
    Func(Uuid),
}

impl Operand {
    pub fn fmt<'a>(&'a self, module: Option<&'a Module>) -> impl std::fmt::Display + 'a {
        struct Fmt<'a> {
            operand: &'a Operand,
            module: Option<&'a Module>,
        }

        impl std::fmt::Display for Fmt<'_> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self.operand {
                    Operand::Reg(name) => write!(f, "%{}", name),
                    Operand::Imm(value) => write!(f, "{}", value),
                    Operand::Func(uuid) => {
                        match self.module.and_then(|m| m.functions.get(uuid)) {
                            Some(function) => write!(f, "@{}", function.name),
                            None => write!(f, "@{}", uuid),
                        }
                    }
                }
            }
        }

        Fmt {
            operand: self,
            module,
        }
    }
}
