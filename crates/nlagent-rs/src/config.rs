// crates/nlagent-rs/src/config.rs

use crate::error::AgentError;
use crate::types::{MODULE_COUNT, ModuleId};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Upper bound on values per policy kind; extra entries are ignored.
pub const POLICY_ENTRIES_MAX: usize = 30;

/// The per-destination transformations a module may configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    FilterFamily,
    FilterTable,
    FilterProtocol,
    SetTable,
    SetProtocol,
    StripRtattr,
}

impl PolicyKind {
    pub const COUNT: usize = 6;

    pub const ALL: [PolicyKind; PolicyKind::COUNT] = [
        PolicyKind::FilterFamily,
        PolicyKind::FilterTable,
        PolicyKind::FilterProtocol,
        PolicyKind::SetTable,
        PolicyKind::SetProtocol,
        PolicyKind::StripRtattr,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Key under which this policy kind appears in the configuration file.
    pub fn config_key(self) -> &'static str {
        match self {
            PolicyKind::FilterFamily => "filter-family",
            PolicyKind::FilterTable => "filter-table",
            PolicyKind::FilterProtocol => "filter-protocol",
            PolicyKind::SetTable => "set-table",
            PolicyKind::SetProtocol => "set-protocol",
            PolicyKind::StripRtattr => "strip-rtattr",
        }
    }
}

impl TryFrom<&str> for PolicyKind {
    type Error = AgentError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        PolicyKind::ALL
            .into_iter()
            .find(|kind| kind.config_key() == value)
            .ok_or_else(|| AgentError::UnknownPolicy(value.into()))
    }
}

/// An ordered, bounded list of integer policy values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyList {
    values: Vec<i32>,
}

impl PolicyList {
    /// Appends a value; returns `false` when the list is full and the
    /// value was ignored.
    pub fn push(&mut self, value: i32) -> bool {
        if self.values.len() >= POLICY_ENTRIES_MAX {
            return false;
        }
        self.values.push(value);
        true
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: i32) -> bool {
        self.values.contains(&value)
    }
}

/// The full policy configuration of one module, indexed by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    lists: [PolicyList; PolicyKind::COUNT],
}

impl Default for PolicySet {
    fn default() -> Self {
        PolicySet { lists: std::array::from_fn(|_| PolicyList::default()) }
    }
}

impl PolicySet {
    pub fn get(&self, kind: PolicyKind) -> &PolicyList {
        &self.lists[kind.index()]
    }

    /// Appends `value` to the list for `kind`, honoring the entry cap.
    pub fn add(&mut self, kind: PolicyKind, value: i32) -> bool {
        self.lists[kind.index()].push(value)
    }
}

/// Resolved configuration of a single module.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    /// A module participates if and only if it appears in the config file.
    pub enabled: bool,
    pub addr: Option<String>,
    pub port: Option<u16>,
    /// Source roles this module wants events from.
    pub notify_me: [bool; MODULE_COUNT],
    pub policy: PolicySet,
}

impl ModuleConfig {
    pub fn subscribes_to(&self, source: ModuleId) -> bool {
        self.notify_me[source.index()]
    }

    pub fn subscribe(&mut self, source: ModuleId) {
        self.notify_me[source.index()] = true;
    }
}

/// The resolved configuration of the whole agent: one entry per role.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    modules: [ModuleConfig; MODULE_COUNT],
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig { modules: std::array::from_fn(|_| ModuleConfig::default()) }
    }
}

impl AgentConfig {
    pub fn module(&self, id: ModuleId) -> &ModuleConfig {
        &self.modules[id.index()]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut ModuleConfig {
        &mut self.modules[id.index()]
    }

    pub fn enabled_count(&self) -> usize {
        self.modules.iter().filter(|m| m.enabled).count()
    }

    /// Derives the IPv4 endpoint a network role binds or connects to.
    pub fn server_addr(&self, id: ModuleId) -> Result<SocketAddrV4, AgentError> {
        let config = self.module(id);
        let addr = config.addr.as_deref().ok_or(AgentError::EndpointMissing("address"))?;
        let port = config.port.ok_or(AgentError::EndpointMissing("port"))?;
        let ip: Ipv4Addr =
            addr.parse().map_err(|_| AgentError::InvalidAddress(addr.to_string()))?;
        Ok(SocketAddrV4::new(ip, port))
    }
}
