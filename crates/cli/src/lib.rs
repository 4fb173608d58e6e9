//! bk CLI library
//!
//! Exposes the command definitions, exit codes and output helpers.

pub mod commands;
pub mod exit_code;
pub mod output;
