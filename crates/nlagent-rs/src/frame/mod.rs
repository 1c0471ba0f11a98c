// crates/nlagent-rs/src/frame/mod.rs
//! Wire formats moved through the relay: netlink route messages, the FPM
//! framing that carries them over TCP, and the length-delimited reader
//! shared by every framed transport.

pub mod codec;
pub mod fpm;
pub mod netlink;
pub mod reader;

pub use codec::Codec;
pub use fpm::FpmHeader;
pub use netlink::{RouteOp, RouteUpdate};
pub use reader::{FrameReader, Framing};
