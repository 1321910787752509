//! simloc: locate simulation directories across hosts
//!
//! Simulations are directories tagged with a uuid in a metadata directory.
//! simloc caches them per host, finds them on other hosts through a
//! concurrent fan-out over ssh, and mounts remote ones locally with sshfs
//! for as long as they are in use.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod extract;
pub mod logging;
pub mod mount;
pub mod remote;
pub mod resolver;
pub mod store;
pub mod tooling;
pub mod types;
