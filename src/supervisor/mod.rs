//! Remote process control for worker processes.
//!
//! Worker processes run under a supervisor daemon that exposes an XML-RPC
//! control interface over HTTP. This module provides:
//!
//! - **ProcessSupervisor**: the capability set the orchestrator needs
//!   (daemon state, process listing, start/stop of processes and groups)
//! - **SupervisorClient**: the HTTP/XML-RPC implementation
//! - **MemorySupervisor**: an in-process stand-in with the daemon's rules
//!
//! The daemon is authoritative for process liveness.

pub mod client;
pub mod memory;
pub mod process;
pub mod xmlrpc;

pub use client::SupervisorClient;
pub use memory::MemorySupervisor;
pub use process::{
    faults, GroupActionResult, ProcessInfo, ProcessState, ProcessSupervisor, SupervisorError,
    SupervisorState,
};
