//! Side-effecting adapters: filesystem, HTTP and child processes.

pub mod artifacts;
pub mod atomic;
pub mod bridge;
pub mod codex;
pub mod config;
pub mod env_store;
pub mod overrides_store;
pub mod process;
pub mod steps;
pub mod store;
