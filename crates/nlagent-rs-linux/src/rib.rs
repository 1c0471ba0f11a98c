// crates/nlagent-rs-linux/src/rib.rs
//! Stand-in client for the programmable routing daemon: newline-delimited
//! JSON requests over TCP. The real daemon speaks gRPC; this stub keeps
//! the same surface (route add/remove, a login handshake, channel-state
//! probing) behind the [`RouteService`] seam so the relay never depends
//! on the RPC flavor.

use log::{debug, info};
use nlagent_rs::frame::netlink::{AF_INET, AF_INET6};
use nlagent_rs::{AgentError, ChannelState, ChannelStateSource, RouteService, RouteUpdate};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpStream};
use std::sync::Mutex;
use std::time::Duration;

const RIB_CLIENT_ID: &str = "nlagent";
const RIB_COOKIE: u64 = 1234;
const RIB_COLOR: u32 = 100;
const RIB_PURGE_TIME: u32 = 1;
const RPC_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct RibRequest<'a> {
    method: &'a str,
    #[serde(rename = "client-id")]
    client_id: &'a str,
    cookie: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    route: Option<RibRoute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RibRoute {
    table: &'static str,
    prefix: String,
    #[serde(rename = "prefix-len")]
    prefix_len: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway: Option<String>,
    #[serde(rename = "interface-index", skip_serializing_if = "Option::is_none")]
    interface_index: Option<u32>,
    colors: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct RibReply {
    ret_code: i32,
}

fn table_name(update: &RouteUpdate) -> &'static str {
    match update.family {
        AF_INET => "inet.0",
        AF_INET6 => "inet6.0",
        _ => "unknown",
    }
}

fn rib_route(update: &RouteUpdate) -> RibRoute {
    let prefix = match update.dst {
        Some(dst) => dst.to_string(),
        None if update.family == AF_INET6 => "::".to_string(),
        None => "0.0.0.0".to_string(),
    };
    RibRoute {
        table: table_name(update),
        prefix,
        prefix_len: update.dst_len,
        gateway: update.gateway.map(|gw| gw.to_string()),
        interface_index: update.oif,
        colors: vec![RIB_COLOR],
    }
}

fn request<'a>(method: &'a str, route: Option<RibRoute>, time: Option<u32>) -> RibRequest<'a> {
    RibRequest { method, client_id: RIB_CLIENT_ID, cookie: RIB_COOKIE, route, time }
}

/// One JSON request/reply exchange on an established stream.
fn exchange(stream: &mut TcpStream, req: &RibRequest<'_>) -> Result<RibReply, AgentError> {
    let mut line = serde_json::to_vec(req).map_err(|e| AgentError::Io(e.to_string()))?;
    line.push(b'\n');
    stream.write_all(&line)?;

    let mut reply = String::new();
    BufReader::new(&mut *stream).read_line(&mut reply)?;
    if reply.is_empty() {
        return Err(AgentError::PeerClosed);
    }
    serde_json::from_str(&reply).map_err(|e| AgentError::Io(e.to_string()))
}

fn connect(addr: SocketAddrV4) -> Result<TcpStream, AgentError> {
    let stream = TcpStream::connect_timeout(&SocketAddr::V4(addr), RPC_TIMEOUT)?;
    stream.set_read_timeout(Some(RPC_TIMEOUT))?;
    stream.set_write_timeout(Some(RPC_TIMEOUT))?;
    Ok(stream)
}

/// [`RouteService`] over the JSON stub protocol. The connection is
/// opened lazily and dropped on any fault; the next call reconnects.
pub struct TcpRouteService {
    addr: SocketAddrV4,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpRouteService {
    pub fn new(addr: SocketAddrV4) -> Self {
        TcpRouteService { addr, stream: Mutex::new(None) }
    }

    fn call(&self, req: &RibRequest<'_>) -> Result<RibReply, AgentError> {
        let mut guard = self.stream.lock().unwrap();
        if guard.is_none() {
            *guard = Some(connect(self.addr)?);
        }
        let stream = guard.as_mut().ok_or(AgentError::NotConnected)?;

        match exchange(stream, req) {
            Ok(reply) => Ok(reply),
            Err(error) => {
                // Drop the stream; the next call starts fresh.
                *guard = None;
                Err(error)
            }
        }
    }

    fn mutate(&self, method: &str, update: &RouteUpdate) -> Result<(), AgentError> {
        let reply = self.call(&request(method, Some(rib_route(update)), None))?;
        if reply.ret_code != 0 {
            // Application-level refusal is logged, not retried.
            info!("{} failed with status {}", method, reply.ret_code);
        } else {
            debug!("{} successful", method);
        }
        Ok(())
    }
}

impl RouteService for TcpRouteService {
    fn add_route(&self, route: &RouteUpdate) -> Result<(), AgentError> {
        self.mutate("RouteAdd", route)
    }

    fn remove_route(&self, route: &RouteUpdate) -> Result<(), AgentError> {
        self.mutate("RouteRemove", route)
    }

    fn state_source(&self) -> Box<dyn ChannelStateSource> {
        Box::new(RibStateProbe { addr: self.addr })
    }
}

/// Probes the daemon endpoint. A probe counts as up only after the
/// purge-time login round-trip succeeds on a fresh connection.
pub struct RibStateProbe {
    addr: SocketAddrV4,
}

impl RibStateProbe {
    fn login(&self) -> Result<(), AgentError> {
        let mut stream = connect(self.addr)?;
        let reply = exchange(&mut stream, &request("RoutePurgeTimeConfig", None, Some(RIB_PURGE_TIME)))?;
        if reply.ret_code != 0 {
            info!("login failed with status {}", reply.ret_code);
            return Err(AgentError::NotConnected);
        }
        debug!("login successful");
        Ok(())
    }
}

impl ChannelStateSource for RibStateProbe {
    fn wait_for_state_change(&mut self, current: ChannelState, timeout: Duration) -> ChannelState {
        let state = match current {
            // Coming from down, a probe must prove the daemon answers.
            ChannelState::Down => match self.login() {
                Ok(()) => ChannelState::Up,
                Err(_) => ChannelState::Down,
            },
            // While up, reachability is enough.
            ChannelState::Up => match connect(self.addr) {
                Ok(_) => ChannelState::Up,
                Err(_) => ChannelState::Down,
            },
        };

        if state == current {
            std::thread::sleep(timeout);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlagent_rs::RouteOp;
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    fn sample_update() -> RouteUpdate {
        RouteUpdate {
            op: RouteOp::Add,
            family: AF_INET,
            table: 254,
            protocol: 22,
            dst: Some(Ipv4Addr::new(192, 0, 2, 0).into()),
            dst_len: 24,
            gateway: Some(Ipv4Addr::new(192, 0, 2, 1).into()),
            oif: Some(3),
            priority: None,
        }
    }

    /// Accepts one connection, answers every request line with `ret_code`
    /// and returns the request lines it saw.
    fn one_shot_server(listener: TcpListener, ret_code: i32) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut lines = Vec::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                lines.push(line);
                writeln!(writer, "{{\"ret_code\":{}}}", ret_code).unwrap();
            }
            lines
        })
    }

    fn local_service() -> (TcpRouteService, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match listener.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            other => panic!("unexpected listener addr {}", other),
        };
        let server = one_shot_server(listener, 0);
        (TcpRouteService::new(addr), server)
    }

    #[test]
    fn test_add_route_round_trip() {
        let (service, server) = local_service();
        service.add_route(&sample_update()).unwrap();
        drop(service);

        let lines = server.join().unwrap();
        assert_eq!(lines.len(), 1);
        let request: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(request["method"], "RouteAdd");
        assert_eq!(request["client-id"], "nlagent");
        assert_eq!(request["cookie"], 1234);
        assert_eq!(request["route"]["table"], "inet.0");
        assert_eq!(request["route"]["prefix"], "192.0.2.0");
        assert_eq!(request["route"]["prefix-len"], 24);
        assert_eq!(request["route"]["gateway"], "192.0.2.1");
        assert_eq!(request["route"]["colors"][0], 100);
    }

    #[test]
    fn test_remove_route_reuses_the_connection() {
        let (service, server) = local_service();
        service.add_route(&sample_update()).unwrap();
        service.remove_route(&sample_update()).unwrap();
        drop(service);

        let lines = server.join().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("RouteRemove"));
    }

    #[test]
    fn test_call_fails_when_nobody_listens() {
        // A reserved port with no listener behind it.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match listener.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            other => panic!("unexpected listener addr {}", other),
        };
        drop(listener);

        let service = TcpRouteService::new(addr);
        assert!(service.add_route(&sample_update()).is_err());
    }

    #[test]
    fn test_state_probe_reports_login_success_as_up() {
        let (service, server) = local_service();
        let mut probe = service.state_source();

        let state = probe.wait_for_state_change(ChannelState::Down, Duration::from_millis(10));
        assert_eq!(state, ChannelState::Up);
        drop(probe);

        let lines = server.join().unwrap();
        assert!(lines[0].contains("RoutePurgeTimeConfig"));
    }
}
