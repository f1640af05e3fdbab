//! TOML description of a module.
//!
//! ```toml
//! [[function]]
//! name = "leaf"
//! linkage = "internal"
//! attributes = ["preserve_none"]
//!
//! [[function]]
//! name = "dispatch"
//! linkage = "internal"
//! calls = ["leaf", "leaf"]
//! address_taken = ["leaf"]
//! indirect_calls = 1
//! ```
//!
//! Functions reference each other by name. A call becomes a direct call
//! instruction, an `address_taken` entry an assignment of the function address
//! to a register, and each indirect call a call through a register.
use std::{collections::HashMap, path::Path, str::FromStr};

use anyhow::{Context, Result, bail};
use pninstr::modules::{
    CallingConvention, Function, Linkage, Module,
    attributes::FunctionAttributes,
    instructions::{Assign, Instr, Invoke},
    operand::Operand,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionDescription {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkage: Option<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub declaration: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cconv: Option<String>,

    /// Attribute keys, `key=value` for attributes carrying a value.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address_taken: Vec<String>,

    #[serde(skip_serializing_if = "is_zero")]
    pub indirect_calls: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescription {
    #[serde(default, rename = "function")]
    pub functions: Vec<FunctionDescription>,
}

impl ModuleDescription {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let toml_str = std::fs::read_to_string(path)
            .with_context(|| format!("Reading module description '{}'", path.display()))?;
        Self::from_toml_str(&toml_str)
            .with_context(|| format!("Parsing module description '{}'", path.display()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Build the module described by `self`.
    pub fn to_module(&self) -> Result<Module> {
        let mut module = Module::new();
        let mut uuids: HashMap<&str, Uuid> = HashMap::new();

        for desc in &self.functions {
            let function = desc.skeleton()?;
            if uuids.insert(desc.name.as_str(), function.uuid).is_some() {
                bail!("Function `{}` is described more than once", desc.name);
            }
            module.add_function(function);
        }

        let resolve = |user: &str, name: &str| -> Result<Uuid> {
            uuids
                .get(name)
                .copied()
                .with_context(|| format!("Function `{}` refers to unknown function `{}`", user, name))
        };

        for desc in &self.functions {
            let mut body: Vec<Instr> = Vec::new();
            for callee in &desc.calls {
                body.push(Invoke::direct(resolve(&desc.name, callee)?).into());
            }
            for (target, reg) in desc.address_taken.iter().zip(0..) {
                body.push(
                    Assign {
                        dest: reg,
                        value: Operand::Func(resolve(&desc.name, target)?),
                    }
                    .into(),
                );
            }
            for _ in 0..desc.indirect_calls {
                body.push(Invoke::indirect(0).into());
            }

            if body.is_empty() {
                continue;
            }
            if desc.declaration {
                bail!("Declaration `{}` cannot contain calls or uses", desc.name);
            }

            let function = uuids
                .get(desc.name.as_str())
                .and_then(|uuid| module.get_mut(*uuid));
            if let Some(function) = function {
                for instr in body {
                    function.push_instruction(instr);
                }
            }
        }

        module.verify()?;
        Ok(module)
    }

    /// Describe `module`, functions sorted by name.
    pub fn from_module(module: &Module) -> Self {
        let mut functions: Vec<FunctionDescription> = module
            .functions
            .values()
            .map(|f| FunctionDescription::from_function(f, module))
            .collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        Self { functions }
    }
}

impl FunctionDescription {
    /// The function without any instruction.
    fn skeleton(&self) -> Result<Function> {
        let linkage = match &self.linkage {
            Some(linkage) => Linkage::from_str(linkage)
                .with_context(|| format!("Unknown linkage `{}` on `{}`", linkage, self.name))?,
            None => Linkage::default(),
        };

        let mut function = if self.declaration {
            Function::declaration(&self.name, linkage)
        } else {
            Function::definition(&self.name, linkage)
        };

        if let Some(cconv) = &self.cconv {
            function.cconv = CallingConvention::from_str(cconv)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("On function `{}`", self.name))?;
        }

        for attribute in &self.attributes {
            let (key, value) = attribute
                .split_once('=')
                .unwrap_or((attribute.as_str(), ""));
            function.add_fn_attr(key.trim(), value.trim());
        }

        Ok(function)
    }

    fn from_function(function: &Function, module: &Module) -> Self {
        let name_of = |uuid: Uuid| {
            module
                .get(uuid)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| uuid.to_string())
        };

        let mut desc = FunctionDescription {
            name: function.name.clone(),
            linkage: Some(function.linkage.to_string()),
            declaration: function.is_declaration(),
            cconv: (function.cconv != CallingConvention::default())
                .then(|| function.cconv.to_string()),
            ..Default::default()
        };

        desc.attributes = function.attributes.keys().map(str::to_string).collect();
        desc.attributes
            .extend(function.string_attributes.iter().map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{}={}", key, value)
                }
            }));

        for instr in function.instructions() {
            match instr {
                Instr::Invoke(invoke) => {
                    match invoke.direct_callee() {
                        Some(callee) => desc.calls.push(name_of(callee)),
                        None => desc.indirect_calls += 1,
                    }
                    for arg in &invoke.args {
                        if let Operand::Func(uuid) = arg {
                            desc.address_taken.push(name_of(*uuid));
                        }
                    }
                }
                Instr::Assign(Assign {
                    value: Operand::Func(uuid),
                    ..
                }) => desc.address_taken.push(name_of(*uuid)),
                Instr::Store(store) => {
                    for operand in [&store.address, &store.value] {
                        if let Operand::Func(uuid) = operand {
                            desc.address_taken.push(name_of(*uuid));
                        }
                    }
                }
                Instr::Assign(_) => {}
            }
        }

        desc
    }

    /// Returns true if the description asks for the preserve-none convention.
    pub fn has_preserve_none(&self) -> bool {
        self.cconv.as_deref() == Some("preserve_nonecc")
            || self.attributes.iter().any(|attr| {
                let key = attr.split_once('=').map_or(attr.as_str(), |(k, _)| k).trim();
                FunctionAttributes::from_key(key)
                    .is_some_and(FunctionAttributes::implies_restricted_convention)
            })
    }
}
