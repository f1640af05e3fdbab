//! Program representation consumed by the preserve-none passes.
//!
//! Only the parts of a compilation unit the passes need are modelled: functions
//! with their linkage, calling convention and attributes, and function bodies made
//! of basic blocks whose instructions may reference other functions.

pub mod analysis;
pub mod modules;
pub mod utils;
