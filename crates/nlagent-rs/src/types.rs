// crates/nlagent-rs/src/types.rs

use crate::error::AgentError;
use core::fmt;
use core::time::Duration;

/// Number of relay roles the agent can participate in.
pub const MODULE_COUNT: usize = 6;

/// Delay before a supervisor retries a connect or bind attempt.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Identity of a relay role. The discriminants are stable indices used
/// for the module table, the subscription matrix and fan-out ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ModuleId {
    /// Kernel Netlink Manager: exchanges route netlink messages with the kernel.
    Knlm = 0,
    /// Programmable-routing client: programs routes into a routing daemon over RPC.
    PrpdClient = 1,
    /// TCP server speaking the framed FPM protocol.
    FpmServer = 2,
    /// TCP client speaking the framed FPM protocol.
    FpmClient = 3,
    /// TCP server exchanging raw netlink messages.
    NlmServer = 4,
    /// TCP client exchanging raw netlink messages.
    NlmClient = 5,
}

impl ModuleId {
    /// All roles in dispatch order.
    pub const ALL: [ModuleId; MODULE_COUNT] = [
        ModuleId::Knlm,
        ModuleId::PrpdClient,
        ModuleId::FpmServer,
        ModuleId::FpmClient,
        ModuleId::NlmServer,
        ModuleId::NlmClient,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The role name as it appears in the configuration file and traces.
    pub fn name(self) -> &'static str {
        match self {
            ModuleId::Knlm => "NLA_KNLM",
            ModuleId::PrpdClient => "NLA_PRPD_CLIENT",
            ModuleId::FpmServer => "NLA_FPM_SERVER",
            ModuleId::FpmClient => "NLA_FPM_CLIENT",
            ModuleId::NlmServer => "NLA_NLM_SERVER",
            ModuleId::NlmClient => "NLA_NLM_CLIENT",
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<&str> for ModuleId {
    type Error = AgentError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "NLA_KNLM" => Ok(ModuleId::Knlm),
            "NLA_PRPD_CLIENT" => Ok(ModuleId::PrpdClient),
            "NLA_FPM_SERVER" => Ok(ModuleId::FpmServer),
            "NLA_FPM_CLIENT" => Ok(ModuleId::FpmClient),
            "NLA_NLM_SERVER" => Ok(ModuleId::NlmServer),
            "NLA_NLM_CLIENT" => Ok(ModuleId::NlmClient),
            other => Err(AgentError::UnknownModule(other.into())),
        }
    }
}

/// Events exchanged between role adapters and the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    ConnectionDown = 1,
    ConnectionUp = 2,
    Write = 3,
    GetAll = 4,
}

impl EventKind {
    /// Connection-status events drive initialization ordering and are
    /// never fanned out to subscribers.
    pub fn is_connection_status(self) -> bool {
        matches!(self, EventKind::ConnectionDown | EventKind::ConnectionUp)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::ConnectionDown => "CONNECTION_DOWN",
            EventKind::ConnectionUp => "CONNECTION_UP",
            EventKind::Write => "WRITE",
            EventKind::GetAll => "GET_ALL",
        };
        f.write_str(name)
    }
}

/// A single event raised by a role. `msg` is owned by the event; the
/// dispatcher clones it per destination before policy evaluation so
/// transformations stay isolated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
    pub kind: EventKind,
    pub msg: Vec<u8>,
}

impl EventInfo {
    pub fn new(kind: EventKind, msg: Vec<u8>) -> Self {
        EventInfo { kind, msg }
    }

    /// A connection-status event carrying no payload.
    pub fn connection(kind: EventKind) -> Self {
        EventInfo { kind, msg: Vec::new() }
    }

    /// A payload event carrying one netlink message.
    pub fn write(msg: Vec<u8>) -> Self {
        EventInfo { kind: EventKind::Write, msg }
    }

    pub fn len(&self) -> usize {
        self.msg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msg.is_empty()
    }
}
