//! Command implementations for the graphforge CLI
//!
//! Each command module provides a `run` function that executes the command logic.

pub mod build;
pub mod doctor;
pub mod key;
