// crates/nlagent-rs-linux/src/agent.rs
//! The agent context: owns the dispatcher, the live role adapters and the
//! event channel they all report into. Runs the single-threaded event
//! loop and executes the dispatcher's actions against the adapters.

use crate::kernel::NetlinkRouteConnector;
use crate::rib::TcpRouteService;
use crate::roles::{KnlmRole, PrpdRole, TcpRole};
use log::{debug, info};
use nlagent_rs::types::MODULE_COUNT;
use nlagent_rs::{AgentConfig, AgentError, DispatchAction, Dispatcher, EventInfo, ModuleId};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

/// Depth of the channel carrying events from the adapters to the loop.
pub const EVENT_QUEUE_DEPTH: usize = 1024;

/// Sender half used by every adapter to raise events.
pub type EventSender = mpsc::Sender<(ModuleId, EventInfo)>;

/// The capability set every role adapter publishes to the agent.
pub trait Role: Send {
    fn module(&self) -> ModuleId;

    /// Start the adapter: spawn its supervisor and allocate its queues.
    fn init(&mut self);

    /// Tear everything down again. Must be safe to call on an adapter
    /// that was never initialized.
    fn reset(&mut self);

    /// Push a full dump of current state towards subscribers.
    fn init_flash(&mut self);

    /// Deliver a policy-transformed event.
    fn notify(&mut self, from: ModuleId, event: &EventInfo);
}

pub struct Agent {
    dispatcher: Dispatcher,
    roles: [Option<Box<dyn Role>>; MODULE_COUNT],
    events_rx: mpsc::Receiver<(ModuleId, EventInfo)>,
}

impl Agent {
    /// Builds the agent and one adapter per enabled module.
    pub fn new(config: &AgentConfig) -> Result<Agent, AgentError> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let mut roles: [Option<Box<dyn Role>>; MODULE_COUNT] = std::array::from_fn(|_| None);
        for module in ModuleId::ALL {
            if !config.module(module).enabled {
                continue;
            }
            let role: Box<dyn Role> = match module {
                ModuleId::Knlm => {
                    Box::new(KnlmRole::new(Arc::new(NetlinkRouteConnector), events_tx.clone()))
                }
                ModuleId::PrpdClient => {
                    let service = Arc::new(TcpRouteService::new(config.server_addr(module)?));
                    Box::new(PrpdRole::new(service, events_tx.clone()))
                }
                ModuleId::FpmServer => {
                    Box::new(TcpRole::fpm_server(config.server_addr(module)?, events_tx.clone()))
                }
                ModuleId::FpmClient => {
                    Box::new(TcpRole::fpm_client(config.server_addr(module)?, events_tx.clone()))
                }
                ModuleId::NlmServer => {
                    Box::new(TcpRole::nlm_server(config.server_addr(module)?, events_tx.clone()))
                }
                ModuleId::NlmClient => {
                    Box::new(TcpRole::nlm_client(config.server_addr(module)?, events_tx.clone()))
                }
            };
            roles[module.index()] = Some(role);
        }

        Ok(Agent { dispatcher: Dispatcher::new(config), roles, events_rx })
    }

    #[cfg(test)]
    fn with_roles(
        config: &AgentConfig,
        roles: [Option<Box<dyn Role>>; MODULE_COUNT],
        events_rx: mpsc::Receiver<(ModuleId, EventInfo)>,
    ) -> Agent {
        Agent { dispatcher: Dispatcher::new(config), roles, events_rx }
    }

    /// Runs the event loop until shutdown is requested.
    pub async fn run(mut self) -> Result<(), AgentError> {
        let mut sigterm = signal(SignalKind::terminate())?;

        // Fresh start: bring every module through its readiness check.
        self.reinit();

        loop {
            tokio::select! {
                received = self.events_rx.recv() => {
                    let Some((from, event)) = received else { break };
                    let mut reinit_pending = self.process(from, &event);

                    // Drain whatever is already queued so simultaneous
                    // down edges coalesce into a single restart.
                    while let Ok((from, event)) = self.events_rx.try_recv() {
                        reinit_pending |= self.process(from, &event);
                    }

                    if reinit_pending {
                        self.reinit();
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("terminate received, shutting down");
                    break;
                }
            }
        }

        self.reset_roles();
        Ok(())
    }

    /// Feeds one event to the dispatcher and executes the resulting
    /// actions. Returns whether a global reinit was requested.
    fn process(&mut self, from: ModuleId, event: &EventInfo) -> bool {
        let mut reinit_pending = false;

        for action in self.dispatcher.handle_event(from, event) {
            match action {
                DispatchAction::Init(module) => {
                    if let Some(role) = self.roles[module.index()].as_mut() {
                        info!("init module {}", module);
                        role.init();
                    }
                }
                DispatchAction::Flash(module) => {
                    if let Some(role) = self.roles[module.index()].as_mut() {
                        role.init_flash();
                    }
                }
                DispatchAction::Deliver { to, event } => {
                    if let Some(role) = self.roles[to.index()].as_mut() {
                        role.notify(from, &event);
                    }
                }
                DispatchAction::ScheduleReinit => reinit_pending = true,
            }
        }

        reinit_pending
    }

    /// Resets every module in id order, then re-runs the readiness pass.
    fn reinit(&mut self) {
        info!("start cleaning up the modules");
        self.reset_roles();

        // Events raised by the torn-down adapters are stale now.
        while self.events_rx.try_recv().is_ok() {}
        self.dispatcher.reset_all();

        info!("start bringing up the modules");
        for action in self.dispatcher.startup_actions() {
            if let DispatchAction::Init(module) = action {
                if let Some(role) = self.roles[module.index()].as_mut() {
                    info!("init module {}", module);
                    role.init();
                }
            }
        }
    }

    fn reset_roles(&mut self) {
        for module in ModuleId::ALL {
            if let Some(role) = self.roles[module.index()].as_mut() {
                debug!("reset module {}", role.module());
                role.reset();
            }
        }
    }
}
