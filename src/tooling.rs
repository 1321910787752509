//! Tooling & Integration Layer
//!
//! The command line front end. The same binary serves users and, through
//! `cache --json`, the remote end of a fan-out.

pub mod cli;
pub mod format;

pub use cli::{
    resolve_invocation, CacheArgs, Cli, CliContext, Commands, ConfigCommands, Invocation,
    MountCommands, SearchArgs,
};
