//! Storage infrastructure: peer configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML file that describes a
//! `urtps-peer` process (network settings, log level and the nodes it
//! publishes and subscribes to), and falls back to defaults when the file
//! does not exist yet.

pub mod config;
