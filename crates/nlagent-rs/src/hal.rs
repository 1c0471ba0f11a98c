// crates/nlagent-rs/src/hal.rs

use crate::error::AgentError;
use crate::frame::netlink::RouteUpdate;
use core::time::Duration;

/// Coarse state of an RPC channel as seen by the state watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Down,
    Up,
}

/// Abstraction over the kernel routing netlink socket.
///
/// The core never talks to the kernel directly; the platform crate supplies
/// an implementation bound to the IPv4 and IPv6 route multicast groups.
pub trait KernelLink: Send {
    /// Attempts to receive raw netlink bytes into the provided buffer.
    ///
    /// Blocks up to the implementation's read timeout. Returns the number
    /// of bytes read, or `Ok(0)` on a timeout so callers can poll for
    /// cancellation between reads.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, AgentError>;

    /// Sends one netlink message to the kernel.
    fn send_message(&mut self, msg: &[u8]) -> Result<(), AgentError>;

    /// Requests a full route dump (`RTM_GETROUTE` with `NLM_F_DUMP`).
    /// The dump replies arrive through `receive`.
    fn request_dump(&mut self) -> Result<(), AgentError>;
}

/// Opens kernel netlink links. A fresh link is created on every module
/// init so a reset can drop the previous socket entirely.
pub trait KernelConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn KernelLink>, AgentError>;
}

/// Produces the coarse connection state of the programmable-routing RPC
/// channel. Implementations block; the agent polls this from a dedicated
/// watcher thread, never from the event loop.
pub trait ChannelStateSource: Send {
    /// Blocks up to `timeout` waiting for the channel to leave `current`.
    /// Returns the latest observed state, which may equal `current`.
    fn wait_for_state_change(&mut self, current: ChannelState, timeout: Duration) -> ChannelState;
}

/// Route programming surface of the programmable routing daemon.
///
/// Calls may block on the RPC round-trip; the PRPD adapter invokes them
/// off the event loop.
pub trait RouteService: Send + Sync {
    fn add_route(&self, route: &RouteUpdate) -> Result<(), AgentError>;

    fn remove_route(&self, route: &RouteUpdate) -> Result<(), AgentError>;

    /// A fresh state source for the channel watcher thread.
    fn state_source(&self) -> Box<dyn ChannelStateSource>;
}
