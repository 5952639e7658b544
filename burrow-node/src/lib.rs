//! The `burrow` binary as a library: configuration, CLI, and the endpoint and
//! proxy runners.

pub mod banner;
pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod overlay;
pub mod proxy;
pub mod reporter;
pub mod signal;
