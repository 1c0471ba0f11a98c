// crates/nlagent-rs-linux/src/roles/mod.rs

pub mod knlm;
pub mod prpd;
pub mod tcp;

pub use knlm::KnlmRole;
pub use prpd::PrpdRole;
pub use tcp::TcpRole;
