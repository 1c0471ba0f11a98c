// crates/nlagent-rs-linux/src/roles/knlm.rs
//! Kernel Netlink Manager: mirrors kernel route events into the relay
//! and replays relayed routes back into the kernel table.

use crate::agent::{EventSender, Role};
use crate::stream::OUT_QUEUE_DEPTH;
use log::{debug, info, warn};
use nlagent_rs::frame::netlink::{
    NLM_F_CREATE, NLM_F_REQUEST, RTM_BASE, RTM_DELROUTE, RTM_NEWROUTE, nlmsg_type,
    set_nlmsg_flags, walk_messages,
};
use nlagent_rs::types::RETRY_DELAY;
use nlagent_rs::{AgentError, EventInfo, EventKind, KernelConnector, KernelLink, ModuleId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Sized for a full multipart route dump chunk.
const RECV_BUF_LEN: usize = 32768;

/// Work queued for the kernel I/O loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnlmOp {
    /// Replay one relayed route message into the kernel.
    Write(Vec<u8>),
    /// Issue an `RTM_GETROUTE` dump of the whole table.
    Flash,
}

pub struct KnlmRole {
    connector: Arc<dyn KernelConnector>,
    events: EventSender,
    ops_tx: Option<mpsc::Sender<KnlmOp>>,
    task: Option<JoinHandle<()>>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl KnlmRole {
    pub fn new(connector: Arc<dyn KernelConnector>, events: EventSender) -> Self {
        KnlmRole { connector, events, ops_tx: None, task: None, shutdown: None }
    }

    fn queue(&self, op: KnlmOp) {
        let Some(ops_tx) = &self.ops_tx else {
            warn!("[{}] not initialized, dropping request", ModuleId::Knlm);
            return;
        };
        match ops_tx.try_send(op) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("[{}] kernel queue full, dropping request", ModuleId::Knlm)
            }
            Err(TrySendError::Closed(_)) => {
                warn!("[{}] kernel queue closed, dropping request", ModuleId::Knlm)
            }
        }
    }
}

impl Role for KnlmRole {
    fn module(&self) -> ModuleId {
        ModuleId::Knlm
    }

    fn init(&mut self) {
        let (ops_tx, ops_rx) = mpsc::channel(OUT_QUEUE_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_knlm(
            self.connector.clone(),
            self.events.clone(),
            ops_rx,
            shutdown.clone(),
        ));

        self.ops_tx = Some(ops_tx);
        self.task = Some(task);
        self.shutdown = Some(shutdown);
    }

    fn reset(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.store(true, Ordering::Relaxed);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.ops_tx = None;
    }

    fn init_flash(&mut self) {
        info!("request route flash from knlm");
        self.queue(KnlmOp::Flash);
    }

    fn notify(&mut self, _from: ModuleId, event: &EventInfo) {
        match event.kind {
            EventKind::Write => {
                debug!("[{}] {} : write to kernel, len {}", ModuleId::Knlm, event.kind, event.len());
                self.queue(KnlmOp::Write(event.msg.clone()));
            }
            _ => debug!("[{}] {} : ok", ModuleId::Knlm, event.kind),
        }
    }
}

/// Supervisor: opens the kernel link, runs the blocking I/O loop and
/// retries after a delay when the socket fails.
async fn run_knlm(
    connector: Arc<dyn KernelConnector>,
    events: EventSender,
    mut ops_rx: mpsc::Receiver<KnlmOp>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        tokio::time::sleep(RETRY_DELAY).await;
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        match connector.connect() {
            Ok(link) => {
                if !report(&events, EventKind::ConnectionUp).await {
                    return;
                }

                let loop_events = events.clone();
                let loop_shutdown = shutdown.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    kernel_io_loop(link, ops_rx, loop_events, loop_shutdown)
                })
                .await;

                let (returned_rx, result) = match joined {
                    Ok(returned) => returned,
                    Err(error) => {
                        warn!("[{}] kernel io task failed: {}", ModuleId::Knlm, error);
                        return;
                    }
                };
                ops_rx = returned_rx;

                match result {
                    Ok(()) => return, // reset requested
                    Err(error) => warn!("[{}] kernel link error: {}", ModuleId::Knlm, error),
                }
                if !report(&events, EventKind::ConnectionDown).await {
                    return;
                }
            }
            Err(error) => {
                warn!("[{}] failed to open netlink socket: {}", ModuleId::Knlm, error);
                if !report(&events, EventKind::ConnectionDown).await {
                    return;
                }
            }
        }
    }
}

async fn report(events: &EventSender, kind: EventKind) -> bool {
    events.send((ModuleId::Knlm, EventInfo::connection(kind))).await.is_ok()
}

/// Blocking kernel pump: drains queued writes, then polls the socket
/// with a short read timeout so shutdown is observed promptly.
///
/// Returns the op receiver for the next connect attempt and `Ok(())`
/// when asked to stop, `Err` on a socket fault.
fn kernel_io_loop(
    mut link: Box<dyn KernelLink>,
    mut ops_rx: mpsc::Receiver<KnlmOp>,
    events: EventSender,
    shutdown: Arc<AtomicBool>,
) -> (mpsc::Receiver<KnlmOp>, Result<(), AgentError>) {
    let mut buf = [0u8; RECV_BUF_LEN];

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return (ops_rx, Ok(()));
        }

        while let Ok(op) = ops_rx.try_recv() {
            let outcome = match op {
                KnlmOp::Write(msg) => write_route(link.as_mut(), msg),
                KnlmOp::Flash => link.request_dump(),
            };
            if let Err(error) = outcome {
                warn!("[{}] kernel write failed: {}", ModuleId::Knlm, error);
            }
        }

        match link.receive(&mut buf) {
            Ok(0) => continue, // read timeout, poll again
            Ok(count) => {
                if !emit_messages(&buf[..count], &events) {
                    return (ops_rx, Ok(()));
                }
            }
            Err(error) => return (ops_rx, Err(error)),
        }
    }
}

/// Re-emits every route message in a receive buffer as a `Write` event,
/// with `nlmsg_flags` cleared so request bits never leak to peers.
/// Returns `false` when the dispatcher is gone.
fn emit_messages(buf: &[u8], events: &EventSender) -> bool {
    for msg in walk_messages(buf) {
        match nlmsg_type(msg) {
            Ok(msg_type) if msg_type >= RTM_BASE => {
                let mut owned = msg.to_vec();
                if set_nlmsg_flags(&mut owned, 0).is_err() {
                    continue;
                }
                debug!("[{}] read msg type {}, len {}", ModuleId::Knlm, msg_type, owned.len());
                if events.blocking_send((ModuleId::Knlm, EventInfo::write(owned))).is_err() {
                    return false;
                }
            }
            Ok(msg_type) => {
                debug!("[{}] skip control msg type {}", ModuleId::Knlm, msg_type);
            }
            Err(_) => return true,
        }
    }
    true
}

/// Replays a relayed route message into the kernel with the request
/// flags the mutation needs.
fn write_route(link: &mut dyn KernelLink, mut msg: Vec<u8>) -> Result<(), AgentError> {
    let flags = match nlmsg_type(&msg)? {
        RTM_NEWROUTE => NLM_F_REQUEST | NLM_F_CREATE,
        RTM_DELROUTE => NLM_F_REQUEST,
        _ => return Err(AgentError::RouteParse("not a route mutation")),
    };
    set_nlmsg_flags(&mut msg, flags)?;
    link.send_message(&msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlagent_rs::frame::netlink::{AF_INET, build_route_message, nlmsg_flags};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockState {
        incoming: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        dumps: usize,
    }

    struct MockLink {
        state: Arc<Mutex<MockState>>,
    }

    impl KernelLink for MockLink {
        fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, AgentError> {
            let mut state = self.state.lock().unwrap();
            match state.incoming.pop_front() {
                Some(msg) => {
                    buffer[..msg.len()].copy_from_slice(&msg);
                    Ok(msg.len())
                }
                None => {
                    drop(state);
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(0)
                }
            }
        }

        fn send_message(&mut self, msg: &[u8]) -> Result<(), AgentError> {
            self.state.lock().unwrap().sent.push(msg.to_vec());
            Ok(())
        }

        fn request_dump(&mut self) -> Result<(), AgentError> {
            self.state.lock().unwrap().dumps += 1;
            Ok(())
        }
    }

    #[test]
    fn test_kernel_io_loop_pumps_both_directions() {
        let state = Arc::new(Mutex::new(MockState::default()));

        // One buffer holding a control message and a real route event.
        let control = build_route_message(3, 0, 0, 0, 0, &[]); // NLMSG_DONE
        let route =
            build_route_message(RTM_NEWROUTE, 0x0863, AF_INET, 254, 22, &[(1, &[10, 0, 0, 1])]);
        let mut incoming = control.clone();
        incoming.extend_from_slice(&route);
        state.lock().unwrap().incoming.push_back(incoming);

        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (ops_tx, ops_rx) = mpsc::channel(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        // Queue a kernel write and a flash before starting the loop.
        let update = build_route_message(RTM_NEWROUTE, 0, AF_INET, 254, 0, &[]);
        ops_tx.blocking_send(KnlmOp::Write(update.clone())).unwrap();
        ops_tx.blocking_send(KnlmOp::Flash).unwrap();

        let link = Box::new(MockLink { state: state.clone() });
        let loop_shutdown = shutdown.clone();
        let handle =
            std::thread::spawn(move || kernel_io_loop(link, ops_rx, events_tx, loop_shutdown));

        // Only the route message is re-emitted, with its flags cleared.
        let (from, event) = events_rx.blocking_recv().unwrap();
        assert_eq!(from, ModuleId::Knlm);
        assert_eq!(event.kind, EventKind::Write);
        assert_eq!(nlmsg_flags(&event.msg).unwrap(), 0);
        assert_eq!(&event.msg[8..], &route[8..]);

        shutdown.store(true, Ordering::Relaxed);
        let (_ops_rx, result) = handle.join().unwrap();
        assert_eq!(result, Ok(()));

        let state = state.lock().unwrap();
        assert_eq!(state.dumps, 1);
        assert_eq!(state.sent.len(), 1);
        assert_eq!(nlmsg_flags(&state.sent[0]).unwrap(), NLM_F_REQUEST | NLM_F_CREATE);
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_write_route_rejects_non_mutations() {
        struct NullLink;
        impl KernelLink for NullLink {
            fn receive(&mut self, _buffer: &mut [u8]) -> Result<usize, AgentError> {
                Ok(0)
            }
            fn send_message(&mut self, _msg: &[u8]) -> Result<(), AgentError> {
                Ok(())
            }
            fn request_dump(&mut self) -> Result<(), AgentError> {
                Ok(())
            }
        }

        let dump = build_route_message(26, 0, 0, 0, 0, &[]);
        let mut link = NullLink;
        assert_eq!(
            write_route(&mut link, dump),
            Err(AgentError::RouteParse("not a route mutation"))
        );
    }
}
