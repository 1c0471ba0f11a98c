// crates/nlagent-rs-linux/src/lib.rs
#![cfg(target_os = "linux")]

//! Linux host for the nlagent relay: the tokio event loop, the role
//! adapters and the concrete kernel-netlink and route-service backends.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod kernel;
pub mod rib;
pub mod roles;
pub mod stream;

pub use agent::{Agent, Role};
