// crates/nlagent-rs-linux/src/roles/tcp.rs
//! The four framed TCP roles, expressed as one configurable adapter:
//! FPM server/client and NLM server/client differ only in direction,
//! framing and whether writes are FPM-wrapped.

use crate::agent::{EventSender, Role};
use crate::stream::{self, OUT_QUEUE_DEPTH, StreamParams};
use log::{debug, warn};
use nlagent_rs::{EventInfo, EventKind, Framing, ModuleId};
use std::net::SocketAddrV4;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Listen,
    Connect,
}

pub struct TcpRole {
    params: StreamParams,
    direction: Direction,
    events: EventSender,
    out_tx: Option<mpsc::Sender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl TcpRole {
    pub fn fpm_server(addr: SocketAddrV4, events: EventSender) -> Self {
        Self::new(ModuleId::FpmServer, Direction::Listen, Framing::Fpm, true, addr, events)
    }

    pub fn fpm_client(addr: SocketAddrV4, events: EventSender) -> Self {
        Self::new(ModuleId::FpmClient, Direction::Connect, Framing::Fpm, true, addr, events)
    }

    pub fn nlm_server(addr: SocketAddrV4, events: EventSender) -> Self {
        Self::new(ModuleId::NlmServer, Direction::Listen, Framing::Netlink, false, addr, events)
    }

    pub fn nlm_client(addr: SocketAddrV4, events: EventSender) -> Self {
        Self::new(ModuleId::NlmClient, Direction::Connect, Framing::Netlink, false, addr, events)
    }

    fn new(
        module: ModuleId,
        direction: Direction,
        framing: Framing,
        wrap_fpm: bool,
        addr: SocketAddrV4,
        events: EventSender,
    ) -> Self {
        TcpRole {
            params: StreamParams { module, framing, wrap_fpm, addr },
            direction,
            events,
            out_tx: None,
            task: None,
        }
    }
}

impl Role for TcpRole {
    fn module(&self) -> ModuleId {
        self.params.module
    }

    fn init(&mut self) {
        let (out_tx, out_rx) = mpsc::channel(OUT_QUEUE_DEPTH);
        let params = self.params.clone();
        let events = self.events.clone();

        let task = match self.direction {
            Direction::Listen => tokio::spawn(stream::run_server(params, events, out_rx)),
            Direction::Connect => tokio::spawn(stream::run_client(params, events, out_rx)),
        };

        self.out_tx = Some(out_tx);
        self.task = Some(task);
    }

    fn reset(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.out_tx = None;
    }

    fn init_flash(&mut self) {
        // Framed peers push state on their own; nothing to dump.
        debug!("[{}] flash requested, nothing to do", self.params.module);
    }

    fn notify(&mut self, _from: ModuleId, event: &EventInfo) {
        match event.kind {
            EventKind::Write => {
                let Some(out_tx) = &self.out_tx else {
                    warn!("[{}] not initialized, dropping msg", self.params.module);
                    return;
                };
                debug!(
                    "[{}] {} : queue msg for peer, len {}",
                    self.params.module,
                    event.kind,
                    event.len()
                );
                match out_tx.try_send(event.msg.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!(
                        "[{}] outbound queue full, dropping {} byte msg",
                        self.params.module,
                        event.len()
                    ),
                    Err(TrySendError::Closed(_)) => {
                        warn!("[{}] outbound queue closed, dropping msg", self.params.module)
                    }
                }
            }
            _ => debug!("[{}] {} : ok", self.params.module, event.kind),
        }
    }
}
