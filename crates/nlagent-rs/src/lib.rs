//! Platform-agnostic core of the nlagent routing relay: module identity
//! and event model, resolved configuration, the policy engine, the wire
//! codecs, the framed reader and the dispatch state machine. Platform
//! crates supply the sockets, timers and RPC stubs behind the HAL traits.

// --- Foundation Modules ---
pub mod config;
pub mod error;
pub mod hal;
pub mod types;

// --- Wire Formats ---
pub mod frame;

// --- Relay Engine ---
pub mod dispatch;
pub mod policy;

// --- Top-level Exports ---
pub use config::{AgentConfig, ModuleConfig, PolicyKind, PolicySet};
pub use dispatch::{ConnState, DispatchAction, Dispatcher};
pub use error::AgentError;
pub use frame::codec::Codec;
pub use frame::netlink::{RouteOp, RouteUpdate};
pub use frame::reader::{FrameReader, Framing};
pub use hal::{ChannelState, ChannelStateSource, KernelConnector, KernelLink, RouteService};
pub use types::{EventInfo, EventKind, ModuleId};
