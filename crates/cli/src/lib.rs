//! # Connector CLI
//!
//! Operator commands for inspecting the plugin catalog, checking a
//! configuration file and running a connector locally against the
//! in-memory transport.

pub mod commands;
