use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};

use pncore::{
    magic::DISABLED_PATH,
    pass::Pipeline,
    utils::conf::{PassConfig, RegistryMode},
};

use crate::description::ModuleDescription;

mod description;

/// Run the preserve-none passes over module descriptions
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Module descriptions (TOML), processed in order by the same passes
    #[clap(required = true)]
    modules: Vec<PathBuf>,

    /// Append every function definition name to this file
    #[clap(long, default_value = DISABLED_PATH)]
    write_preserve_none_file: String,

    /// Mark every function listed in this file as preserve-none
    #[clap(long, default_value = DISABLED_PATH)]
    load_preserve_none_file: String,

    /// Propagate preserve-none from callees to eligible callers
    #[clap(long)]
    preserve_none_infect: bool,

    /// Pass configuration file (TOML); `PN_CONFIG_PATH` is used when absent
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Write the updated module description here (single module only)
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Print the resulting modules
    #[clap(long)]
    print: bool,
}

impl Args {
    fn pass_config(&self) -> Result<PassConfig> {
        let mut config = match &self.config {
            Some(path) => PassConfig::load_from_toml(path)?,
            None => PassConfig::from_env()?.unwrap_or_default(),
        };

        let flags = RegistryMode::from_paths(
            Some(&self.write_preserve_none_file),
            Some(&self.load_preserve_none_file),
        );
        if !flags.is_off() {
            if !config.registry.is_off() {
                warn!(
                    "Registry mode from the command line overrides the configuration file ({:?})",
                    config.registry
                );
            }
            config.registry = flags;
        }
        config.infect |= self.preserve_none_infect;

        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if args.output.is_some() && args.modules.len() > 1 {
        bail!("--output requires exactly one module");
    }

    let config = args.pass_config()?;
    info!("Pass configuration: {:?}", config);

    let mut pipeline = Pipeline::new(&config);
    for path in &args.modules {
        let mut module = ModuleDescription::load(path)?.to_module()?;
        let outcome = pipeline.run(&mut module);
        let description = ModuleDescription::from_module(&module);
        info!(
            "Processed '{}': {} of {} function(s) preserve-none, infection changed = {}, {} function(s) changed",
            path.display(),
            description
                .functions
                .iter()
                .filter(|f| f.has_preserve_none())
                .count(),
            module.len(),
            outcome.infection_changed,
            outcome.functions_changed
        );

        if args.print {
            print!("{}", module);
        }

        if let Some(output) = &args.output {
            let text = description.to_toml_string()?;
            std::fs::write(output, text)
                .with_context(|| format!("Writing '{}'", output.display()))?;
        }
    }

    Ok(())
}
