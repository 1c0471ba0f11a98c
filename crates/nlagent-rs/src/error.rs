// crates/nlagent-rs/src/error.rs

use core::array::TryFromSliceError;
use core::fmt;

/// Defines a portable, descriptive Error type for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The provided buffer is too small for the operation.
    BufferTooShort,
    /// An underlying I/O error occurred.
    Io(String),
    /// An FPM header carried an unsupported protocol version.
    InvalidFpmVersion(u8),
    /// An FPM header carried an unsupported message type.
    InvalidFpmMsgType(u8),
    /// An FPM header length field is shorter than the header itself.
    InvalidFpmLength(u16),
    /// The payload is too large to be described by an FPM length field.
    FpmPayloadTooLarge(usize),
    /// A netlink message header carried an impossible length.
    InvalidNlMsgLength(u32),
    /// A value in the configuration is not a known module name.
    UnknownModule(String),
    /// A key in the configuration is not a known policy kind.
    UnknownPolicy(String),
    /// A network role is missing its server address or port.
    EndpointMissing(&'static str),
    /// A configured server address is not an IPv4 dotted quad.
    InvalidAddress(String),
    /// The configuration file could not be understood at all.
    Config(String),
    /// No module could be enabled from the configuration.
    NoModulesEnabled,
    /// A netlink route message could not be interpreted.
    RouteParse(&'static str),
    /// The peer closed the connection.
    PeerClosed,
    /// The transport is not connected.
    NotConnected,
    /// A multi-byte value could not be parsed from a slice.
    SliceConversion,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "Buffer is too short"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::InvalidFpmVersion(v) => write!(f, "Invalid FPM version: {}", v),
            Self::InvalidFpmMsgType(t) => write!(f, "Invalid FPM message type: {}", t),
            Self::InvalidFpmLength(l) => write!(f, "Invalid FPM message length: {}", l),
            Self::FpmPayloadTooLarge(l) => write!(f, "Payload of {} bytes exceeds FPM framing", l),
            Self::InvalidNlMsgLength(l) => write!(f, "Invalid netlink message length: {}", l),
            Self::UnknownModule(name) => write!(f, "Unknown module name: {}", name),
            Self::UnknownPolicy(name) => write!(f, "Unknown policy kind: {}", name),
            Self::EndpointMissing(what) => write!(f, "Missing server {}", what),
            Self::InvalidAddress(addr) => write!(f, "Invalid server address: {}", addr),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::NoModulesEnabled => write!(f, "No module enabled by the configuration"),
            Self::RouteParse(what) => write!(f, "Route message parse error: {}", what),
            Self::PeerClosed => write!(f, "Connection closed by peer"),
            Self::NotConnected => write!(f, "Transport is not connected"),
            Self::SliceConversion => write!(f, "Failed to convert slice to fixed-size array"),
        }
    }
}

impl std::error::Error for AgentError {}

// --- From Implementations for Error Conversion ---

impl From<TryFromSliceError> for AgentError {
    fn from(_: TryFromSliceError) -> Self {
        AgentError::SliceConversion
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}
