//! Functions and modules.
//!
//! A [`Module`] is one compilation unit. It owns every [`Function`] the unit
//! defines or declares. Definitions carry a body made of [`BasicBlock`]s,
//! declarations do not. Functions reference each other through
//! [`operand::Operand::Func`] operands, which is what the call graph and use
//! analysis in [`crate::analysis`] are derived from.
use std::collections::{BTreeMap, BTreeSet};

use strum::{Display, EnumIs, EnumIter, EnumString};
use uuid::Uuid;

use crate::{
    modules::{
        attributes::FunctionAttributes,
        instructions::{Instr, Terminator},
        operand::{Label, Operand},
    },
    utils::Error,
};

pub mod attributes;
pub mod instructions;
pub mod operand;

/// Common interface implemented by every instruction node.
///
/// This trait provides lightweight iteration over an instruction's input
/// operands.
pub trait Instruction {
    /// Iterate over all input operands for this instruction.
    fn operands(&self) -> impl Iterator<Item = &Operand>;

    /// Functions whose address appears among the operands.
    fn referenced_functions(&self) -> impl Iterator<Item = Uuid> {
        self.operands().filter_map(|op| match op {
            Operand::Func(uuid) => Some(*uuid),
            _ => None,
        })
    }
}

/// Linkage of a function.
#[derive(
    Debug, Default, Clone, Copy, Hash, PartialEq, Eq, EnumIs, EnumIter, EnumString, Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum Linkage {
    /// Only directly accessible from the current module and absent from the
    /// object file symbol table.
    #[default]
    Private,

    /// Like `Private` but emitted as a local symbol (the C `static` keyword).
    Internal,

    /// Visible to and callable from other modules.
    External,

    /// The definition is a copy of one provided by another module and may be
    /// discarded.
    AvailableExternally,

    /// Merged with other definitions of the same name at link time.
    LinkOnce,

    /// Like `LinkOnce` but unreferenced definitions are kept.
    Weak,

    /// Tentative definition (uninitialised C globals).
    Common,

    /// Weak reference to a symbol that may be left undefined.
    ExternalWeak,
}

/// Coarse classification of a linkage from the point of view of
/// calling-convention changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIs)]
pub enum LinkageKind {
    /// No other compilation unit can reference the symbol.
    LocalPrivate,
    /// The symbol may be replaced or called by another compilation unit.
    WeakOrExternal,
    /// Anything else.
    Other,
}

impl Linkage {
    /// Returns true for linkages that keep the symbol local to the module.
    pub fn is_local(self) -> bool {
        matches!(self, Linkage::Private | Linkage::Internal)
    }

    /// Returns true when the linker may substitute another definition.
    pub fn is_weak_for_linker(self) -> bool {
        matches!(
            self,
            Linkage::LinkOnce | Linkage::Weak | Linkage::Common | Linkage::ExternalWeak
        )
    }

    pub fn kind(self) -> LinkageKind {
        if self.is_local() {
            LinkageKind::LocalPrivate
        } else if self.is_weak_for_linker() || self == Linkage::External {
            LinkageKind::WeakOrExternal
        } else {
            LinkageKind::Other
        }
    }
}

/// Calling conventions a function or a call site can use. The calling
/// convention of any pair of dynamic caller/callee must match.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, EnumIs)]
pub enum CallingConvention {
    /// The target C calling convention.
    #[default]
    C,

    /// Fast calling convention, free to deviate from the platform ABI.
    FastC,

    /// Optimises the caller under the assumption the call is rarely executed.
    ColdC,

    /// C argument passing, preserves most registers.
    PreserveMostC,

    /// Like `PreserveMostC` but also preserves floating-point registers.
    PreserveAllC,

    /// Does not preserve any general-purpose register. Every GP register is
    /// caller-saved.
    PreserveNoneC,

    /// Guarantees tail calls whenever possible.
    TailC,

    /// Target specific convention referenced by number.
    Numbered(u32),
}

impl std::fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallingConvention::C => write!(f, "ccc"),
            CallingConvention::FastC => write!(f, "fastcc"),
            CallingConvention::ColdC => write!(f, "coldcc"),
            CallingConvention::PreserveMostC => write!(f, "preserve_mostcc"),
            CallingConvention::PreserveAllC => write!(f, "preserve_allcc"),
            CallingConvention::PreserveNoneC => write!(f, "preserve_nonecc"),
            CallingConvention::TailC => write!(f, "tailcc"),
            CallingConvention::Numbered(n) => write!(f, "cc {}", n),
        }
    }
}

impl std::str::FromStr for CallingConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ccc" => Ok(CallingConvention::C),
            "fastcc" => Ok(CallingConvention::FastC),
            "coldcc" => Ok(CallingConvention::ColdC),
            "preserve_mostcc" => Ok(CallingConvention::PreserveMostC),
            "preserve_allcc" => Ok(CallingConvention::PreserveAllC),
            "preserve_nonecc" => Ok(CallingConvention::PreserveNoneC),
            "tailcc" => Ok(CallingConvention::TailC),
            other => other
                .strip_prefix("cc")
                .and_then(|n| n.trim().parse().ok())
                .map(CallingConvention::Numbered)
                .ok_or_else(|| format!("unknown calling convention `{}`", other)),
        }
    }
}

/// A basic block: straight-line instructions followed by a terminator.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct BasicBlock {
    pub label: Label,
    pub instructions: Vec<Instr>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            instructions: Vec::new(),
            terminator: Terminator::default(),
        }
    }
}

/// A function of a module.
///
/// `body` is `None` for declarations (symbols defined by another compilation
/// unit). By convention the first block of a definition is its entry block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub uuid: Uuid,
    pub name: String,
    pub linkage: Linkage,
    pub cconv: CallingConvention,
    pub attributes: FunctionAttributes,
    /// Host attributes that have no flag in [`FunctionAttributes`].
    pub string_attributes: BTreeMap<String, String>,
    pub body: Option<Vec<BasicBlock>>,
}

impl Function {
    /// Create a definition with an empty entry block.
    pub fn definition(name: impl Into<String>, linkage: Linkage) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            linkage,
            cconv: CallingConvention::default(),
            attributes: FunctionAttributes::empty(),
            string_attributes: BTreeMap::new(),
            body: Some(vec![BasicBlock::new(Label::NIL)]),
        }
    }

    /// Create a declaration (no body).
    pub fn declaration(name: impl Into<String>, linkage: Linkage) -> Self {
        Self {
            body: None,
            ..Self::definition(name, linkage)
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn is_definition(&self) -> bool {
        self.body.is_some()
    }

    /// Append `instr` to the last block of the body. Declarations are left
    /// untouched and `false` is returned.
    pub fn push_instruction(&mut self, instr: impl Into<Instr>) -> bool {
        match self.body.as_mut().and_then(|blocks| blocks.last_mut()) {
            Some(block) => {
                block.instructions.push(instr.into());
                true
            }
            None => false,
        }
    }

    /// Iterate over every instruction of the body, in block order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instr> {
        self.body
            .iter()
            .flatten()
            .flat_map(|block| block.instructions.iter())
    }

    /// Iterate over the terminators of the body, in block order.
    pub fn terminators(&self) -> impl Iterator<Item = &Terminator> {
        self.body.iter().flatten().map(|block| &block.terminator)
    }

    /// Look up a host attribute by key, whether it maps to a flag or not.
    pub fn has_fn_attribute(&self, key: &str) -> bool {
        match FunctionAttributes::from_key(key) {
            Some(flag) => self.attributes.contains(flag),
            None => self.string_attributes.contains_key(key),
        }
    }

    /// Attach a host attribute. Known keys set their flag, the value is then
    /// irrelevant. Unknown keys are kept verbatim.
    pub fn add_fn_attr(&mut self, key: &str, value: &str) {
        match FunctionAttributes::from_key(key) {
            Some(flag) => self.attributes.insert(flag),
            None => {
                self.string_attributes
                    .insert(key.to_string(), value.to_string());
            }
        }
    }
}

/// A compilation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub functions: BTreeMap<Uuid, Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a function and return its identifier.
    pub fn add_function(&mut self, function: Function) -> Uuid {
        let uuid = function.uuid;
        self.functions.insert(uuid, function);
        uuid
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Function> {
        self.functions.get(&uuid)
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Option<&mut Function> {
        self.functions.get_mut(&uuid)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.values().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check structural invariants:
    /// 1) Functions are stored under their own identifier.
    /// 2) Names are non-empty and unique.
    /// 3) Definitions have at least one block.
    /// 4) Every function operand refers to a function of the module.
    pub fn verify(&self) -> Result<(), Error> {
        let mut names = BTreeSet::new();

        for (key, function) in &self.functions {
            if *key != function.uuid {
                return Err(Error::MismatchedFunctionKey {
                    function: function.name.clone(),
                    key: *key,
                    uuid: function.uuid,
                });
            }

            if function.name.is_empty() {
                return Err(Error::EmptyFunctionName {
                    uuid: function.uuid,
                });
            }

            if !names.insert(function.name.as_str()) {
                return Err(Error::DuplicateFunctionName {
                    name: function.name.clone(),
                });
            }

            if function.body.as_ref().is_some_and(|b| b.is_empty()) {
                return Err(Error::EmptyBody {
                    function: function.name.clone(),
                });
            }

            let terminator_operands = function.terminators().filter_map(|t| match t {
                Terminator::Ret(Some(op)) => Some(op),
                _ => None,
            });
            let referenced = function
                .instructions()
                .flat_map(|instr| instr.operands())
                .chain(terminator_operands);

            for operand in referenced {
                if let Operand::Func(uuid) = operand {
                    if !self.functions.contains_key(uuid) {
                        return Err(Error::UndefinedFunction {
                            function: function.name.clone(),
                            undefined: *uuid,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for function in self.functions.values() {
            let keyword = if function.is_declaration() {
                "declare"
            } else {
                "define"
            };
            write!(
                f,
                "{} {} {} @{}()",
                keyword, function.linkage, function.cconv, function.name
            )?;
            for key in function.attributes.keys() {
                write!(f, " #{}", key)?;
            }

            match &function.body {
                None => writeln!(f)?,
                Some(blocks) => {
                    writeln!(f, " {{")?;
                    for block in blocks {
                        writeln!(f, "{}:", block.label)?;
                        for instr in &block.instructions {
                            writeln!(f, "    {}", instr.fmt(Some(self)))?;
                        }
                        match &block.terminator {
                            Terminator::Ret(Some(value)) => {
                                writeln!(f, "    ret {}", value.fmt(Some(self)))?
                            }
                            Terminator::Ret(None) => writeln!(f, "    ret void")?,
                            Terminator::Jump(label) => writeln!(f, "    jump {}", label)?,
                            Terminator::Trap => writeln!(f, "    trap")?,
                        }
                    }
                    writeln!(f, "}}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::instructions::{Assign, Invoke};

    #[test]
    fn linkage_classification() {
        assert!(Linkage::Private.kind().is_local_private());
        assert!(Linkage::Internal.kind().is_local_private());
        assert!(Linkage::External.kind().is_weak_or_external());
        assert!(Linkage::Weak.kind().is_weak_or_external());
        assert!(Linkage::AvailableExternally.kind().is_other());
        assert!(!Linkage::Internal.is_weak_for_linker());
        assert!(Linkage::LinkOnce.is_weak_for_linker());
    }

    #[test]
    fn linkage_parses_snake_case() {
        assert_eq!("external_weak".parse::<Linkage>(), Ok(Linkage::ExternalWeak));
        assert_eq!(Linkage::LinkOnce.to_string(), "link_once");
        assert!("global".parse::<Linkage>().is_err());
    }

    #[test]
    fn calling_convention_keywords() {
        assert_eq!(
            "preserve_nonecc".parse::<CallingConvention>(),
            Ok(CallingConvention::PreserveNoneC)
        );
        assert_eq!(
            "cc 64".parse::<CallingConvention>(),
            Ok(CallingConvention::Numbered(64))
        );
        assert_eq!(CallingConvention::Numbered(64).to_string(), "cc 64");
        assert!("fancycc".parse::<CallingConvention>().is_err());
    }

    #[test]
    fn string_attributes_round_trip_through_flags() {
        let mut f = Function::definition("f", Linkage::Internal);
        f.add_fn_attr("no_callee_saved_registers", "1");
        f.add_fn_attr("target-cpu", "x86-64");

        assert!(f.attributes.contains(FunctionAttributes::NO_CALLEE_SAVED_REGISTERS));
        assert!(f.has_fn_attribute("no_callee_saved_registers"));
        assert!(f.has_fn_attribute("target-cpu"));
        assert!(!f.has_fn_attribute("preserve_none"));
        assert_eq!(f.string_attributes.len(), 1);
    }

    #[test]
    fn declarations_have_no_instructions() {
        let mut d = Function::declaration("ext", Linkage::External);
        assert!(d.is_declaration());
        assert!(!d.push_instruction(Invoke::direct(Uuid::new_v4())));
        assert_eq!(d.instructions().count(), 0);
    }

    #[test]
    fn verify_rejects_dangling_function_reference() {
        let mut module = Module::new();
        let mut f = Function::definition("f", Linkage::Internal);
        let ghost = Uuid::new_v4();
        f.push_instruction(Assign {
            dest: 0,
            value: Operand::Func(ghost),
        });
        module.add_function(f);

        assert_eq!(
            module.verify(),
            Err(Error::UndefinedFunction {
                function: "f".to_string(),
                undefined: ghost,
            })
        );
    }

    #[test]
    fn verify_rejects_duplicate_names() {
        let mut module = Module::new();
        module.add_function(Function::definition("f", Linkage::Internal));
        module.add_function(Function::declaration("f", Linkage::External));

        assert!(module.verify().unwrap_err().is_duplicate_function_name());
    }

    #[test]
    fn display_lists_calls_by_name() {
        let mut module = Module::new();
        let callee = module.add_function(Function::declaration("callee", Linkage::External));
        let mut caller = Function::definition("caller", Linkage::Internal);
        caller.push_instruction(Invoke::direct(callee));
        module.add_function(caller);

        let text = module.to_string();
        assert!(text.contains("declare external ccc @callee()"));
        assert!(text.contains("invoke @callee"));
        module.verify().unwrap();
    }
}
