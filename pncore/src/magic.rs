/// Path value meaning "this registry direction is disabled".
pub const DISABLED_PATH: &str = "-";

/// Attribute key written on functions that receive the preserve-none convention.
pub const PRESERVE_NONE_ATTR_KEY: &str = "no_callee_saved_registers";

/// Name of the per-function registry pass.
pub const PRESERVE_NONE_PASS_NAME: &str = "x86-preserve-none";

/// Name of the whole-module infection pass.
pub const INFECTION_PASS_NAME: &str = "x86-preserve-none-infection";

/// Name of the environment variable containing the path to a pass configuration
/// file. Consulted by [`crate::utils::conf::PassConfig::from_env`].
pub const ENV_PASS_CONFIG_PATH: &str = "PN_CONFIG_PATH";
