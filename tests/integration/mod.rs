//! Integration tests for simloc

mod cli_contracts;
mod mount_flow;
mod resolver_flow;
mod search_properties;
mod support;
