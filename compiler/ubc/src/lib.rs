//! Command-line front end for `ub_build`.
//!
//! The binary (`ubuild`) only dispatches; option parsing and the commands
//! live here so they can be tested.

pub mod commands;
