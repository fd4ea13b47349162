//! flutter-resident
//!
//! The `resident` command line. Sessions, the run loop and everything below
//! live in the `resident-*` crates; this crate parses arguments and wires
//! production collaborators together.

pub mod cli;
pub mod commands;

pub use cli::Cli;
pub use commands::run;
