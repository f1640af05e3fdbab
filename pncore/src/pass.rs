//! Pass entry points for a host pipeline.
//!
//! The host drives two hooks: [`PreserveNonePass`] once per function (registry
//! writer or loader, depending on [`RegistryMode`]), and
//! [`PreserveNoneInfectionPass`] once per module. [`Pipeline`] runs both over a
//! module in the order a compiler would and reports whether anything changed.
use log::{debug, trace};
use pninstr::modules::{Function, Module};

use crate::{
    infection::{InfectionReport, infect_module},
    magic::{INFECTION_PASS_NAME, PRESERVE_NONE_PASS_NAME},
    registry::{RegistryLoader, RegistryWriter},
    utils::conf::{PassConfig, RegistryMode},
};

/// A pass invoked once per function.
pub trait FunctionPass {
    fn name(&self) -> &'static str;

    /// Returns true if `function` or the pass's durable state changed.
    fn run_on_function(&mut self, function: &mut Function) -> bool;
}

/// A pass invoked once per module.
pub trait ModulePass {
    fn name(&self) -> &'static str;

    /// Returns true if `module` changed and dependent analyses must be
    /// invalidated.
    fn run_on_module(&mut self, module: &mut Module) -> bool;
}

#[derive(Debug)]
enum RegistryDriver {
    Off,
    Write(RegistryWriter),
    Load(RegistryLoader),
}

/// Per-function hook recording function names to, or applying them from, the
/// registry file.
///
/// One instance lives for the whole process; its file handle and name sets
/// persist across functions and modules and are released when it is dropped.
#[derive(Debug)]
pub struct PreserveNonePass {
    driver: RegistryDriver,
    changed: bool,
}

impl PreserveNonePass {
    pub fn new(config: &PassConfig) -> Self {
        let driver = match &config.registry {
            RegistryMode::Off => RegistryDriver::Off,
            RegistryMode::Write(path) => {
                RegistryDriver::Write(RegistryWriter::new(path, config.record_policy))
            }
            RegistryMode::Load(path) => RegistryDriver::Load(RegistryLoader::new(path)),
        };

        Self {
            driver,
            changed: false,
        }
    }

    /// Returns true if any invocation so far reported a change.
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn writer(&self) -> Option<&RegistryWriter> {
        match &self.driver {
            RegistryDriver::Write(writer) => Some(writer),
            _ => None,
        }
    }

    pub fn loader(&self) -> Option<&RegistryLoader> {
        match &self.driver {
            RegistryDriver::Load(loader) => Some(loader),
            _ => None,
        }
    }
}

impl FunctionPass for PreserveNonePass {
    fn name(&self) -> &'static str {
        PRESERVE_NONE_PASS_NAME
    }

    fn run_on_function(&mut self, function: &mut Function) -> bool {
        let changed = match &mut self.driver {
            RegistryDriver::Off => false,
            RegistryDriver::Write(writer) => writer.record(function),
            RegistryDriver::Load(loader) => loader.apply(function),
        };
        trace!(
            "{} on `{}`: changed = {}",
            PRESERVE_NONE_PASS_NAME, function.name, changed
        );
        self.changed |= changed;
        changed
    }
}

/// Whole-module hook running the infection engine.
#[derive(Debug, Default)]
pub struct PreserveNoneInfectionPass {
    enabled: bool,
    last_report: Option<InfectionReport>,
}

impl PreserveNoneInfectionPass {
    pub fn new(config: &PassConfig) -> Self {
        Self {
            enabled: config.infect,
            last_report: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Report of the last run that actually traversed a module.
    pub fn last_report(&self) -> Option<&InfectionReport> {
        self.last_report.as_ref()
    }
}

impl ModulePass for PreserveNoneInfectionPass {
    fn name(&self) -> &'static str {
        INFECTION_PASS_NAME
    }

    fn run_on_module(&mut self, module: &mut Module) -> bool {
        if !self.enabled {
            return false;
        }

        if module.is_empty() {
            debug!("{}: empty module, nothing to infect", INFECTION_PASS_NAME);
            return false;
        }

        let report = infect_module(module);
        let changed = report.changed();
        self.last_report = Some(report);
        changed
    }
}

/// Result of running the [`Pipeline`] over one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub infection_changed: bool,
    /// Number of functions for which the per-function pass reported a change.
    pub functions_changed: usize,
}

impl PipelineOutcome {
    /// Returns true if dependent analyses must be invalidated.
    pub fn changed(&self) -> bool {
        self.infection_changed || self.functions_changed > 0
    }
}

/// Both passes, configured once and reused for every module of the process.
#[derive(Debug)]
pub struct Pipeline {
    pub infection: PreserveNoneInfectionPass,
    pub registry: PreserveNonePass,
}

impl Pipeline {
    pub fn new(config: &PassConfig) -> Self {
        Self {
            infection: PreserveNoneInfectionPass::new(config),
            registry: PreserveNonePass::new(config),
        }
    }

    /// Run the infection pass, then the per-function pass over every function.
    pub fn run(&mut self, module: &mut Module) -> PipelineOutcome {
        let infection_changed = self.infection.run_on_module(module);

        let mut functions_changed = 0;
        for function in module.functions.values_mut() {
            if self.registry.run_on_function(function) {
                functions_changed += 1;
            }
        }

        let outcome = PipelineOutcome {
            infection_changed,
            functions_changed,
        };
        debug!("Pipeline outcome: {:?}", outcome);
        outcome
    }
}
