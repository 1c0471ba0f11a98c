// crates/nlagent-rs-linux/src/roles/prpd.rs
//! Programmable-routing client: watches the RPC channel state through
//! the thread bridge and programs relayed routes into the daemon.

use crate::agent::{EventSender, Role};
use crate::bridge::StateWatcher;
use crate::stream::OUT_QUEUE_DEPTH;
use log::{debug, info, warn};
use nlagent_rs::frame::netlink::parse_route_update;
use nlagent_rs::{EventInfo, EventKind, ModuleId, RouteOp, RouteService};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

pub struct PrpdRole {
    service: Arc<dyn RouteService>,
    events: EventSender,
    routes_tx: Option<mpsc::Sender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    watcher: Option<StateWatcher>,
}

impl PrpdRole {
    pub fn new(service: Arc<dyn RouteService>, events: EventSender) -> Self {
        PrpdRole { service, events, routes_tx: None, writer: None, watcher: None }
    }
}

impl Role for PrpdRole {
    fn module(&self) -> ModuleId {
        ModuleId::PrpdClient
    }

    fn init(&mut self) {
        // Connection state lives on the watcher thread; route writes are
        // drained by a loop task.
        self.watcher =
            Some(StateWatcher::spawn(self.service.state_source(), self.events.clone()));

        let (routes_tx, routes_rx) = mpsc::channel(OUT_QUEUE_DEPTH);
        self.writer = Some(tokio::spawn(run_route_writer(self.service.clone(), routes_rx)));
        self.routes_tx = Some(routes_tx);
    }

    fn reset(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.routes_tx = None;
    }

    fn init_flash(&mut self) {
        // The routing daemon pulls nothing from us; there is no dump.
        debug!("[{}] flash requested, nothing to do", ModuleId::PrpdClient);
    }

    fn notify(&mut self, _from: ModuleId, event: &EventInfo) {
        match event.kind {
            EventKind::Write => {
                let Some(routes_tx) = &self.routes_tx else {
                    warn!("[{}] not initialized, dropping msg", ModuleId::PrpdClient);
                    return;
                };
                debug!(
                    "[{}] {} : write to prpd server, len {}",
                    ModuleId::PrpdClient,
                    event.kind,
                    event.len()
                );
                match routes_tx.try_send(event.msg.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!(
                        "[{}] route queue full, dropping {} byte msg",
                        ModuleId::PrpdClient,
                        event.len()
                    ),
                    Err(TrySendError::Closed(_)) => {
                        warn!("[{}] route queue closed, dropping msg", ModuleId::PrpdClient)
                    }
                }
            }
            _ => debug!("[{}] {} : ok", ModuleId::PrpdClient, event.kind),
        }
    }
}

/// Parses queued route messages and programs them through the service.
/// The RPC round-trip blocks, so each call runs off the loop.
async fn run_route_writer(service: Arc<dyn RouteService>, mut routes_rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(msg) = routes_rx.recv().await {
        let update = match parse_route_update(&msg) {
            Ok(update) => update,
            Err(error) => {
                info!("[{}] route parse error: {}", ModuleId::PrpdClient, error);
                continue;
            }
        };

        let call_service = service.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = match update.op {
                RouteOp::Add => call_service.add_route(&update),
                RouteOp::Delete => call_service.remove_route(&update),
            };
            (update, outcome)
        })
        .await;

        match joined {
            Ok((_, Ok(()))) => debug!("[{}] route update delivered", ModuleId::PrpdClient),
            Ok((update, Err(error))) => {
                info!(
                    "[{}] rib client write operation failed for {:?}: {}",
                    ModuleId::PrpdClient, update.dst, error
                );
            }
            Err(error) => warn!("[{}] route writer task failed: {}", ModuleId::PrpdClient, error),
        }
    }
}
