// crates/nlagent-rs-linux/src/bridge.rs
//! Thread-to-event-loop bridge for the PRPD RPC channel state.
//!
//! The channel state is produced by a blocking wait loop that must not
//! run on the event loop. A dedicated thread polls the state source and
//! forwards only real edges into the dispatcher's event channel.

use crate::agent::EventSender;
use log::info;
use nlagent_rs::{ChannelState, ChannelStateSource, EventInfo, EventKind, ModuleId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Granularity at which the watcher re-checks its shutdown flag. Also
/// bounds how long a reset blocks on the join.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Handle to the running watcher thread.
pub struct StateWatcher {
    thread: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StateWatcher {
    /// Spawns the watcher. Edges are reported for [`ModuleId::PrpdClient`].
    pub fn spawn(mut source: Box<dyn ChannelStateSource>, events: EventSender) -> StateWatcher {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let thread = thread::spawn(move || watch_loop(source.as_mut(), events, flag));
        StateWatcher { thread: Some(thread), shutdown }
    }

    /// Signals the thread and waits for it to observe the signal.
    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StateWatcher {
    fn drop(&mut self) {
        self.join();
    }
}

fn watch_loop(source: &mut dyn ChannelStateSource, events: EventSender, shutdown: Arc<AtomicBool>) {
    info!("connection manager init");

    // Edges only: the dispatcher must never see a repeated state.
    let mut reported = ChannelState::Down;

    while !shutdown.load(Ordering::Relaxed) {
        let state = source.wait_for_state_change(reported, STATE_POLL_INTERVAL);
        if state == reported {
            continue;
        }
        reported = state;

        let kind = match state {
            ChannelState::Up => EventKind::ConnectionUp,
            ChannelState::Down => EventKind::ConnectionDown,
        };
        if events.blocking_send((ModuleId::PrpdClient, EventInfo::connection(kind))).is_err() {
            break;
        }
    }

    info!("connection manager terminate");
}
