// crates/nlagent-rs/src/dispatch.rs
//! The event-dispatch engine: module registry, subscription fan-out,
//! connection-state tracking and the readiness rules that order module
//! bring-up.
//!
//! The dispatcher is a pure state machine. Feeding it an event yields a
//! list of [`DispatchAction`]s; the runtime executes those against the
//! live role adapters. This keeps every lifecycle rule testable without
//! sockets or timers.

use crate::config::{AgentConfig, PolicySet};
use crate::policy;
use crate::types::{EventInfo, EventKind, MODULE_COUNT, ModuleId};
use log::{info, warn};

/// Connection state of a module, as reported by its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Down,
    Up,
}

/// What the runtime must do in response to an event.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    /// Start the module's adapter (its readiness check passed).
    Init(ModuleId),
    /// Ask the module for a full dump towards its subscribers.
    Flash(ModuleId),
    /// Deliver a policy-transformed event to a destination's notify entry.
    Deliver { to: ModuleId, event: EventInfo },
    /// A connection went down somewhere: reset and re-init everything.
    /// Multiple simultaneous downs coalesce into one restart.
    ScheduleReinit,
}

#[derive(Debug, Default)]
struct ModuleEntry {
    enabled: bool,
    notify_me: [bool; MODULE_COUNT],
    policy: PolicySet,
    state: ConnState,
}

/// The module table plus the dispatch rules operating on it.
#[derive(Debug)]
pub struct Dispatcher {
    modules: [ModuleEntry; MODULE_COUNT],
}

impl Dispatcher {
    pub fn new(config: &AgentConfig) -> Self {
        let modules = std::array::from_fn(|i| {
            let module_config = config.module(ModuleId::ALL[i]);
            ModuleEntry {
                enabled: module_config.enabled,
                notify_me: module_config.notify_me,
                policy: module_config.policy.clone(),
                state: ConnState::Down,
            }
        });
        Dispatcher { modules }
    }

    pub fn is_enabled(&self, module: ModuleId) -> bool {
        self.modules[module.index()].enabled
    }

    pub fn is_up(&self, module: ModuleId) -> bool {
        let entry = &self.modules[module.index()];
        entry.enabled && entry.state == ConnState::Up
    }

    pub fn connection_state(&self, module: ModuleId) -> ConnState {
        self.modules[module.index()].state
    }

    /// Does `module` want events from `source`?
    fn subscribes(&self, module: ModuleId, source: ModuleId) -> bool {
        self.modules[module.index()].notify_me[source.index()]
    }

    /// The single entry point by which roles raise events.
    pub fn handle_event(&mut self, from: ModuleId, event: &EventInfo) -> Vec<DispatchAction> {
        if event.kind.is_connection_status() {
            return self.connection_status_change(from, event.kind);
        }

        let mut actions = Vec::new();
        for dest in ModuleId::ALL {
            if !self.is_enabled(dest) || !self.subscribes(dest, from) || !self.is_up(dest) {
                continue;
            }

            // Evaluate the destination's policies to format the message.
            match policy::evaluate(&self.modules[dest.index()].policy, event) {
                Some(transformed) => {
                    info!("from {} to {} -> event {}", from, dest, transformed.kind);
                    actions.push(DispatchAction::Deliver { to: dest, event: transformed });
                }
                None => {
                    info!("policy evaluation failed: skip notifying this msg to {}", dest);
                }
            }
        }
        actions
    }

    fn connection_status_change(&mut self, module: ModuleId, kind: EventKind) -> Vec<DispatchAction> {
        let new_state =
            if kind == EventKind::ConnectionUp { ConnState::Up } else { ConnState::Down };

        if self.modules[module.index()].state == new_state {
            // No change in connection status
            return Vec::new();
        }
        self.modules[module.index()].state = new_state;

        info!("module {} status {}", module, kind);

        match new_state {
            ConnState::Down => {
                warn!("something went wrong, scheduling a fresh start");
                vec![DispatchAction::ScheduleReinit]
            }
            ConnState::Up => {
                let mut actions = Vec::new();

                // Init every module this one wants events from; their
                // subscriber just came up.
                for source in ModuleId::ALL {
                    if self.subscribes(module, source) {
                        actions.extend(self.check_init(source));
                    }
                }

                // Flash this module towards its subscribers, and request
                // flashes from everything it subscribes to.
                actions.extend(self.request_flash(module));
                for source in ModuleId::ALL {
                    if self.subscribes(module, source) {
                        actions.extend(self.request_flash(source));
                    }
                }

                actions
            }
        }
    }

    /// Init `module` only once every enabled role subscribed to its events
    /// is up. Mutually subscribed pairs skip each other so cycles cannot
    /// deadlock bring-up.
    fn check_init(&self, module: ModuleId) -> Option<DispatchAction> {
        if !self.is_enabled(module) || self.is_up(module) {
            return None;
        }

        for subscriber in ModuleId::ALL {
            if !self.is_enabled(subscriber) || !self.subscribes(subscriber, module) {
                continue;
            }
            if self.subscribes(module, subscriber) {
                info!("{} and {} are interdependent", module, subscriber);
                continue;
            }
            if !self.is_up(subscriber) {
                info!("{} : {} is not up; defer module init", module, subscriber);
                return None;
            }
        }

        Some(DispatchAction::Init(module))
    }

    /// Flash `module` iff it is up, at least one enabled role subscribes
    /// to it, and all such subscribers are up.
    fn request_flash(&self, module: ModuleId) -> Option<DispatchAction> {
        if !self.is_up(module) {
            return None;
        }

        let mut has_subscriber = false;
        for subscriber in ModuleId::ALL {
            if !self.is_enabled(subscriber) || !self.subscribes(subscriber, module) {
                continue;
            }
            if !self.is_up(subscriber) {
                return None;
            }
            has_subscriber = true;
        }

        has_subscriber.then_some(DispatchAction::Flash(module))
    }

    /// Readiness pass over every module in id order; used at startup and
    /// after a global reset.
    pub fn startup_actions(&self) -> Vec<DispatchAction> {
        ModuleId::ALL.iter().filter_map(|&module| self.check_init(module)).collect()
    }

    /// Marks every module down. The runtime calls this after resetting
    /// the adapters, before re-running `startup_actions`.
    pub fn reset_all(&mut self) {
        for entry in &mut self.modules {
            entry.state = ConnState::Down;
        }
    }
}
