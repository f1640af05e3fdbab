//! Instruction and terminator forms.
//!
//! The instruction set is intentionally narrow: it covers calls and the ways a
//! function address can flow into a value (assignments, stores, call arguments).
use strum::EnumIs;
use uuid::Uuid;

use crate::modules::{
    CallingConvention, Instruction, Module,
    operand::{Label, Name, Operand},
};

/// Call instruction.
///
/// The callee is an `Operand` so that both direct calls (`Operand::Func`) and
/// calls through a function pointer (`Operand::Reg`) can be expressed.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Invoke {
    /// The function being called.
    pub function: Operand,

    /// The argument operands to pass to the function.
    pub args: Vec<Operand>,

    /// The destination SSA name for the return value, if any.
    pub dest: Option<Name>,

    /// Calling convention override at the call site.
    pub cconv: Option<CallingConvention>,
}

impl Invoke {
    /// Direct call to `callee` without arguments nor result.
    pub fn direct(callee: Uuid) -> Self {
        Self {
            function: Operand::Func(callee),
            args: Vec::new(),
            dest: None,
            cconv: None,
        }
    }

    /// Call through the function pointer held in `pointer`.
    pub fn indirect(pointer: Name) -> Self {
        Self {
            function: Operand::Reg(pointer),
            args: Vec::new(),
            dest: None,
            cconv: None,
        }
    }

    /// The called function when this is a direct call.
    pub fn direct_callee(&self) -> Option<Uuid> {
        match self.function {
            Operand::Func(uuid) => Some(uuid),
            _ => None,
        }
    }
}

impl Instruction for Invoke {
    fn operands(&self) -> impl Iterator<Item = &Operand> {
        std::iter::once(&self.function).chain(self.args.iter())
    }
}

/// Assign a value to a new SSA name.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Assign {
    pub dest: Name,
    pub value: Operand,
}

impl Instruction for Assign {
    fn operands(&self) -> impl Iterator<Item = &Operand> {
        std::iter::once(&self.value)
    }
}

/// Store a value to memory.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Store {
    pub address: Operand,
    pub value: Operand,
}

impl Instruction for Store {
    fn operands(&self) -> impl Iterator<Item = &Operand> {
        [&self.address, &self.value].into_iter()
    }
}

/// Discriminated union covering all instruction kinds.
#[derive(Debug, Clone, Hash, PartialEq, Eq, EnumIs)]
pub enum Instr {
    Invoke(Invoke),
    Assign(Assign),
    Store(Store),
}

impl Instruction for Instr {
    fn operands(&self) -> impl Iterator<Item = &Operand> {
        let operands: Box<dyn Iterator<Item = &Operand> + '_> = match self {
            Instr::Invoke(i) => Box::new(i.operands()),
            Instr::Assign(i) => Box::new(i.operands()),
            Instr::Store(i) => Box::new(i.operands()),
        };
        operands
    }
}

impl From<Invoke> for Instr {
    fn from(value: Invoke) -> Self {
        Instr::Invoke(value)
    }
}

impl From<Assign> for Instr {
    fn from(value: Assign) -> Self {
        Instr::Assign(value)
    }
}

impl From<Store> for Instr {
    fn from(value: Store) -> Self {
        Instr::Store(value)
    }
}

impl Instr {
    pub fn fmt<'a>(&'a self, module: Option<&'a Module>) -> impl std::fmt::Display + 'a {
        struct Fmt<'a> {
            instr: &'a Instr,
            module: Option<&'a Module>,
        }

        impl std::fmt::Display for Fmt<'_> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self.instr {
                    Instr::Invoke(invoke) => {
                        if let Some(dest) = invoke.dest {
                            write!(f, "%{} = ", dest)?;
                        }
                        write!(f, "invoke")?;
                        if let Some(cconv) = invoke.cconv {
                            write!(f, " {}", cconv)?;
                        }
                        write!(f, " {}", invoke.function.fmt(self.module))?;
                        for arg in &invoke.args {
                            write!(f, ", {}", arg.fmt(self.module))?;
                        }
                        Ok(())
                    }
                    Instr::Assign(assign) => {
                        write!(f, "%{} = {}", assign.dest, assign.value.fmt(self.module))
                    }
                    Instr::Store(store) => write!(
                        f,
                        "store {}, {}",
                        store.address.fmt(self.module),
                        store.value.fmt(self.module)
                    ),
                }
            }
        }

        Fmt {
            instr: self,
            module,
        }
    }
}

/// Control flow terminator instructions.
#[derive(Debug, Clone, Hash, PartialEq, Eq, EnumIs)]
pub enum Terminator {
    /// Return from the function, optionally with a value.
    Ret(Option<Operand>),
    /// Unconditional jump to another block of the same function.
    Jump(Label),
    /// Unrecoverable error.
    Trap,
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::Ret(None)
    }
}
