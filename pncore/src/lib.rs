//! Preserve-none calling convention passes.
//!
//! - [`infection`] propagates the preserve-none attribute from callees to the
//!   callers that can adopt it within one module.
//! - [`registry`] records attributed function names in a file shared by
//!   independent compiler processes, and reapplies them in later runs.
//! - [`pass`] wires both into per-function and per-module hooks driven by a
//!   [`utils::conf::PassConfig`].

pub mod infection;
pub mod magic;
pub mod pass;
pub mod registry;
pub mod utils;
