// crates/nlagent-rs-linux/src/stream.rs
//! Framed TCP transport shared by the FPM and NLM roles: the retrying
//! connection supervisor, the single-peer accept rule and the stream
//! driver that pumps the framed reader and the outbound queue.

use crate::agent::EventSender;
use log::{debug, info, warn};
use nlagent_rs::frame::fpm::{self, FPM_MSG_HDR_LEN};
use nlagent_rs::frame::netlink;
use nlagent_rs::types::RETRY_DELAY;
use nlagent_rs::{AgentError, EventInfo, EventKind, FrameReader, Framing, ModuleId};
use std::net::SocketAddrV4;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, tcp};
use tokio::sync::mpsc;

/// Depth of the per-connection outbound queue. Overflow drops the
/// message instead of stalling the dispatcher.
pub const OUT_QUEUE_DEPTH: usize = 1024;

const READ_CHUNK: usize = 8192;

/// Wiring of one framed TCP transport.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub module: ModuleId,
    pub framing: Framing,
    /// Wrap every outbound message in an FPM header.
    pub wrap_fpm: bool,
    pub addr: SocketAddrV4,
}

/// Supervises an outward connection: connect, drive, report edges,
/// retry after [`RETRY_DELAY`]. Runs until the role is reset or the
/// agent goes away.
pub async fn run_client(
    params: StreamParams,
    events: EventSender,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
) {
    loop {
        tokio::time::sleep(RETRY_DELAY).await;

        match TcpStream::connect(params.addr).await {
            Ok(stream) => {
                info!("[{}] connection with server {} established", params.module, params.addr);
                if !report(&events, params.module, EventKind::ConnectionUp).await {
                    return;
                }

                match drive_stream(stream, &params, &events, &mut out_rx).await {
                    Ok(()) => return,
                    Err(error) => warn!("[{}] connection error: {}", params.module, error),
                }

                if !report(&events, params.module, EventKind::ConnectionDown).await {
                    return;
                }
            }
            Err(error) => {
                debug!("[{}] connect {} failed: {}", params.module, params.addr, error);
            }
        }
    }
}

/// Supervises a listening transport. A single peer is served at a time;
/// anyone else connecting meanwhile is dropped on accept.
pub async fn run_server(
    params: StreamParams,
    events: EventSender,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
) {
    loop {
        tokio::time::sleep(RETRY_DELAY).await;

        let listener = match TcpListener::bind(params.addr).await {
            Ok(listener) => listener,
            Err(error) => {
                warn!("[{}] failed to bind {}: {}", params.module, params.addr, error);
                continue;
            }
        };
        info!("[{}] listening on {}", params.module, params.addr);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!("[{}] accept error: {}, retry listener", params.module, error);
                    break;
                }
            };
            info!("[{}] connection with client {} established", params.module, peer);
            if !report(&events, params.module, EventKind::ConnectionUp).await {
                return;
            }

            let result = tokio::select! {
                result = drive_stream(stream, &params, &events, &mut out_rx) => result,
                _ = reject_extra_peers(&listener, params.module) => Ok(()),
            };
            match result {
                Ok(()) => return,
                Err(error) => warn!("[{}] connection error: {}", params.module, error),
            }

            if !report(&events, params.module, EventKind::ConnectionDown).await {
                return;
            }
        }
    }
}

/// Only one peer may be attached per listening role.
async fn reject_extra_peers(listener: &TcpListener, module: ModuleId) {
    loop {
        match listener.accept().await {
            Ok((_extra, peer)) => {
                info!("[{}] only 1 connection allowed, dropping {}", module, peer);
            }
            Err(_) => tokio::time::sleep(RETRY_DELAY).await,
        }
    }
}

async fn report(events: &EventSender, module: ModuleId, kind: EventKind) -> bool {
    events.send((module, EventInfo::connection(kind))).await.is_ok()
}

/// Pumps one established connection: inbound bytes feed the framed
/// reader and every decoded netlink message is re-emitted as a `Write`
/// event; outbound messages are framed and written. Returns `Ok(())`
/// only when the outbound queue is closed, i.e. the role was reset.
async fn drive_stream(
    stream: TcpStream,
    params: &StreamParams,
    events: &EventSender,
    out_rx: &mut mpsc::Receiver<Vec<u8>>,
) -> Result<(), AgentError> {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(params.framing);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = read_half.read(&mut chunk) => {
                let count = read?;
                if count == 0 {
                    return Err(AgentError::PeerClosed);
                }
                reader.extend(&chunk[..count]);
                while let Some(frame) = reader.next_frame()? {
                    deliver_frame(params, &frame, events).await?;
                }
            }
            outbound = out_rx.recv() => {
                let Some(msg) = outbound else { return Ok(()) };
                write_message(params, &mut write_half, &msg).await?;
            }
        }
    }
}

/// Re-emits every netlink message inside one received frame.
async fn deliver_frame(
    params: &StreamParams,
    frame: &[u8],
    events: &EventSender,
) -> Result<(), AgentError> {
    let payload = match params.framing {
        Framing::Fpm => &frame[FPM_MSG_HDR_LEN..],
        Framing::Netlink => frame,
    };

    for msg in netlink::walk_messages(payload) {
        debug!("[{}] read msg, len {}", params.module, msg.len());
        events
            .send((params.module, EventInfo::write(msg.to_vec())))
            .await
            .map_err(|_| AgentError::NotConnected)?;
    }
    Ok(())
}

async fn write_message(
    params: &StreamParams,
    write_half: &mut tcp::OwnedWriteHalf,
    msg: &[u8],
) -> Result<(), AgentError> {
    debug!("[{}] write msg, len {}", params.module, msg.len());
    if params.wrap_fpm {
        write_half.write_all(&fpm::build_frame(msg)?).await?;
    } else {
        write_half.write_all(msg).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlagent_rs::frame::netlink::{AF_INET, RTM_NEWROUTE, build_route_message, nlmsg_len};
    use std::net::Ipv4Addr;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn fpm_params() -> StreamParams {
        StreamParams {
            module: ModuleId::FpmClient,
            framing: Framing::Fpm,
            wrap_fpm: true,
            addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        }
    }

    #[tokio::test]
    async fn test_inbound_fpm_frame_becomes_write_event() {
        let (ours, mut peer) = connected_pair().await;
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (_out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(16);
        let params = fpm_params();

        let driver = tokio::spawn(async move {
            let _ = drive_stream(ours, &params, &events_tx, &mut out_rx).await;
        });

        let msg = build_route_message(RTM_NEWROUTE, 0, AF_INET, 254, 22, &[(1, &[10, 0, 0, 1])]);
        peer.write_all(&fpm::build_frame(&msg).unwrap()).await.unwrap();

        let (from, event) = events_rx.recv().await.unwrap();
        assert_eq!(from, ModuleId::FpmClient);
        assert_eq!(event.kind, EventKind::Write);
        assert_eq!(event.msg, msg);

        driver.abort();
    }

    #[tokio::test]
    async fn test_outbound_message_is_fpm_wrapped() {
        let (ours, mut peer) = connected_pair().await;
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(16);
        let params = fpm_params();

        let driver = tokio::spawn(async move {
            let _ = drive_stream(ours, &params, &events_tx, &mut out_rx).await;
        });

        // A 60-byte netlink message must arrive as a 64-byte FPM frame.
        let msg = build_route_message(
            RTM_NEWROUTE,
            0,
            AF_INET,
            254,
            22,
            &[(1, &[10, 0, 0, 1]), (5, &[10, 0, 0, 2]), (4, &[1, 0, 0, 0]), (6, &[0, 0, 0, 100])],
        );
        assert_eq!(msg.len(), 60);
        assert_eq!(nlmsg_len(&msg).unwrap(), 60);
        out_tx.send(msg.clone()).await.unwrap();

        let mut received = vec![0u8; 64];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..4], &[0x01, 0x01, 0x00, 0x40]);
        assert_eq!(&received[4..], &msg[..]);

        driver.abort();
    }

    #[tokio::test]
    async fn test_raw_netlink_frames_pass_unwrapped() {
        let (ours, mut peer) = connected_pair().await;
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(16);
        let params = StreamParams { framing: Framing::Netlink, wrap_fpm: false, ..fpm_params() };

        let driver = tokio::spawn(async move {
            let _ = drive_stream(ours, &params, &events_tx, &mut out_rx).await;
        });

        let msg = build_route_message(RTM_NEWROUTE, 0, AF_INET, 254, 2, &[]);
        peer.write_all(&msg).await.unwrap();
        let (_, event) = events_rx.recv().await.unwrap();
        assert_eq!(event.msg, msg);

        out_tx.send(msg.clone()).await.unwrap();
        let mut received = vec![0u8; msg.len()];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, msg);

        driver.abort();
    }

    #[tokio::test]
    async fn test_peer_close_ends_the_drive() {
        let (ours, peer) = connected_pair().await;
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (_out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(16);
        let params = fpm_params();

        drop(peer);
        let result = drive_stream(ours, &params, &events_tx, &mut out_rx).await;
        assert_eq!(result, Err(AgentError::PeerClosed));
    }

    #[tokio::test]
    async fn test_closing_outbound_queue_stops_cleanly() {
        let (ours, _peer) = connected_pair().await;
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(16);
        let params = fpm_params();

        drop(out_tx);
        let result = drive_stream(ours, &params, &events_tx, &mut out_rx).await;
        assert_eq!(result, Ok(()));
    }
}
