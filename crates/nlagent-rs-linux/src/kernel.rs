// crates/nlagent-rs-linux/src/kernel.rs
//! Kernel netlink backend: a blocking `NETLINK_ROUTE` socket joined to
//! the IPv4 and IPv6 route multicast groups.

use log::{debug, info};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use nlagent_rs::frame::netlink::{NLM_F_DUMP, NLM_F_REQUEST, RTM_GETROUTE, build_route_message};
use nlagent_rs::{AgentError, KernelConnector, KernelLink};
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Read timeout on the kernel socket; bounds how quickly the I/O loop
/// notices a shutdown request.
pub const KERNEL_READ_TIMEOUT: Duration = Duration::from_millis(100);

const RTNL_GROUPS: u32 = (libc::RTMGRP_IPV4_ROUTE | libc::RTMGRP_IPV6_ROUTE) as u32;

/// Opens route netlink sockets subscribed to kernel route notifications.
pub struct NetlinkRouteConnector;

impl KernelConnector for NetlinkRouteConnector {
    fn connect(&self) -> Result<Box<dyn KernelLink>, AgentError> {
        let mut socket = Socket::new(NETLINK_ROUTE)?;
        socket.bind(&SocketAddr::new(0, RTNL_GROUPS))?;
        set_read_timeout(&socket, KERNEL_READ_TIMEOUT)?;

        info!("netlink socket subscribed to IPv4+IPv6 route groups");
        Ok(Box::new(NetlinkRouteLink { socket }))
    }
}

fn set_read_timeout(socket: &Socket, timeout: Duration) -> Result<(), AgentError> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const libc::c_void,
            size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

struct NetlinkRouteLink {
    socket: Socket,
}

impl KernelLink for NetlinkRouteLink {
    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, AgentError> {
        let mut slice = &mut buffer[..];
        match self.socket.recv(&mut slice, 0) {
            Ok(count) => Ok(count),
            Err(error)
                if matches!(
                    error.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn send_message(&mut self, msg: &[u8]) -> Result<(), AgentError> {
        self.socket.send(msg, 0)?;
        Ok(())
    }

    fn request_dump(&mut self) -> Result<(), AgentError> {
        debug!("sending RTM_GETROUTE dump request");
        let msg = build_route_message(RTM_GETROUTE, NLM_F_REQUEST | NLM_F_DUMP, 0, 0, 0, &[]);
        self.send_message(&msg)
    }
}
