//! Command-line interface for jobvisor.
//!
//! Provides the worker and monitor loops plus one-shot commands for queue
//! inspection and worker process control.

mod commands;

pub use commands::{execute, parse_cli, run, run_with_cli, Cli, Commands};
