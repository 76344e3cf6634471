//! Command implementations for dyk CLI.
//!
//! Each submodule implements the logic for one subcommand.

pub mod run;
pub mod similarity;
pub mod validate;
