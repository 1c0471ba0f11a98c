// crates/nlagent-rs/src/frame/netlink.rs
//! Raw accessors and surgery over route netlink messages.
//!
//! A route message is an `nlmsghdr` (16 bytes, host byte order) followed by
//! an `rtmsg` (12 bytes) and a run of route attributes (RTA TLVs, 4-byte
//! aligned). See rtnetlink(7). The relay treats messages as byte buffers
//! end to end; only the handful of fields the policy engine and the role
//! adapters need are interpreted here.

use crate::error::AgentError;
use log::info;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Length of `struct nlmsghdr`.
pub const NLMSG_HDRLEN: usize = 16;
/// Length of `struct rtmsg`.
pub const RTMSG_LEN: usize = 12;
/// Length of a route attribute header.
pub const RTA_HDRLEN: usize = 4;
/// Netlink messages and attributes are padded to 4-byte boundaries.
pub const NLMSG_ALIGNTO: usize = 4;

/// First routing message type; anything below is a netlink control message.
pub const RTM_BASE: u16 = 16;
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;
pub const RTM_GETROUTE: u16 = 26;

pub const NLM_F_REQUEST: u16 = 0x0001;
/// `NLM_F_ROOT | NLM_F_MATCH`: return the whole table.
pub const NLM_F_DUMP: u16 = 0x0300;
pub const NLM_F_CREATE: u16 = 0x0400;

pub const AF_INET: u8 = 2;
pub const AF_INET6: u8 = 10;

pub const RTA_DST: u16 = 1;
pub const RTA_OIF: u16 = 4;
pub const RTA_GATEWAY: u16 = 5;
pub const RTA_PRIORITY: u16 = 6;
pub const RTA_TABLE: u16 = 15;

pub fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

pub fn rta_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

fn read_u16(msg: &[u8], offset: usize) -> Result<u16, AgentError> {
    let bytes = msg.get(offset..offset + 2).ok_or(AgentError::BufferTooShort)?;
    Ok(u16::from_ne_bytes(bytes.try_into()?))
}

fn read_u32(msg: &[u8], offset: usize) -> Result<u32, AgentError> {
    let bytes = msg.get(offset..offset + 4).ok_or(AgentError::BufferTooShort)?;
    Ok(u32::from_ne_bytes(bytes.try_into()?))
}

fn read_u8(msg: &[u8], offset: usize) -> Result<u8, AgentError> {
    msg.get(offset).copied().ok_or(AgentError::BufferTooShort)
}

fn write_u8(msg: &mut [u8], offset: usize, value: u8) -> Result<(), AgentError> {
    *msg.get_mut(offset).ok_or(AgentError::BufferTooShort)? = value;
    Ok(())
}

// --- nlmsghdr fields ---

pub fn nlmsg_len(msg: &[u8]) -> Result<u32, AgentError> {
    read_u32(msg, 0)
}

pub fn set_nlmsg_len(msg: &mut [u8], len: u32) -> Result<(), AgentError> {
    let bytes = msg.get_mut(0..4).ok_or(AgentError::BufferTooShort)?;
    bytes.copy_from_slice(&len.to_ne_bytes());
    Ok(())
}

pub fn nlmsg_type(msg: &[u8]) -> Result<u16, AgentError> {
    read_u16(msg, 4)
}

pub fn nlmsg_flags(msg: &[u8]) -> Result<u16, AgentError> {
    read_u16(msg, 6)
}

pub fn set_nlmsg_flags(msg: &mut [u8], flags: u16) -> Result<(), AgentError> {
    let bytes = msg.get_mut(6..8).ok_or(AgentError::BufferTooShort)?;
    bytes.copy_from_slice(&flags.to_ne_bytes());
    Ok(())
}

// --- rtmsg fields ---

pub fn rtm_family(msg: &[u8]) -> Result<u8, AgentError> {
    read_u8(msg, NLMSG_HDRLEN)
}

pub fn rtm_dst_len(msg: &[u8]) -> Result<u8, AgentError> {
    read_u8(msg, NLMSG_HDRLEN + 1)
}

pub fn rtm_table(msg: &[u8]) -> Result<u8, AgentError> {
    read_u8(msg, NLMSG_HDRLEN + 4)
}

pub fn set_rtm_table(msg: &mut [u8], table: u8) -> Result<(), AgentError> {
    write_u8(msg, NLMSG_HDRLEN + 4, table)
}

pub fn rtm_protocol(msg: &[u8]) -> Result<u8, AgentError> {
    read_u8(msg, NLMSG_HDRLEN + 5)
}

pub fn set_rtm_protocol(msg: &mut [u8], protocol: u8) -> Result<(), AgentError> {
    write_u8(msg, NLMSG_HDRLEN + 5, protocol)
}

/// One top-level route attribute inside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rta<'a> {
    pub rta_type: u16,
    /// Offset of the attribute header from the start of the message.
    pub offset: usize,
    /// Aligned size of header plus payload.
    pub total_len: usize,
    pub payload: &'a [u8],
}

/// Iterates the top-level attributes of a route message. Nested
/// attributes are not descended into. Iteration stops at the first
/// malformed attribute.
pub struct RtaIter<'a> {
    msg: &'a [u8],
    offset: usize,
    end: usize,
}

pub fn rta_iter(msg: &[u8]) -> RtaIter<'_> {
    let end = nlmsg_len(msg).map(|l| l as usize).unwrap_or(0).min(msg.len());
    RtaIter { msg, offset: NLMSG_HDRLEN + nlmsg_align(RTMSG_LEN), end }
}

impl<'a> Iterator for RtaIter<'a> {
    type Item = Rta<'a>;

    fn next(&mut self) -> Option<Rta<'a>> {
        if self.offset + RTA_HDRLEN > self.end {
            return None;
        }
        let rta_len = read_u16(self.msg, self.offset).ok()? as usize;
        let rta_type = read_u16(self.msg, self.offset + 2).ok()?;
        if rta_len < RTA_HDRLEN || self.offset + rta_len > self.end {
            return None;
        }
        let rta = Rta {
            rta_type,
            offset: self.offset,
            total_len: rta_align(rta_len).min(self.end - self.offset),
            payload: &self.msg[self.offset + RTA_HDRLEN..self.offset + rta_len],
        };
        self.offset += rta.total_len;
        Some(rta)
    }
}

/// Strips every top-level attribute of `rta_type` from the message,
/// shrinking the buffer and repairing `nlmsg_len` in place.
pub fn strip_rtattr(msg: &mut Vec<u8>, rta_type: u16) {
    loop {
        let Some((offset, total_len)) =
            rta_iter(msg).find(|rta| rta.rta_type == rta_type).map(|rta| (rta.offset, rta.total_len))
        else {
            return;
        };

        msg.drain(offset..offset + total_len);
        if let Ok(len) = nlmsg_len(msg) {
            let _ = set_nlmsg_len(msg, len - total_len as u32);
        }

        info!("stripped attr_type [{}] from msg", rta_type);
    }
}

/// Iterates the netlink messages packed back to back in a receive buffer.
pub struct NlMsgIter<'a> {
    buf: &'a [u8],
}

/// Walks a buffer of one or more netlink messages, yielding each message
/// (header included, inter-message padding excluded).
pub fn walk_messages(buf: &[u8]) -> NlMsgIter<'_> {
    NlMsgIter { buf }
}

impl<'a> Iterator for NlMsgIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.buf.len() < NLMSG_HDRLEN {
            return None;
        }
        let len = nlmsg_len(self.buf).ok()? as usize;
        if len < NLMSG_HDRLEN || len > self.buf.len() {
            return None;
        }
        let msg = &self.buf[..len];
        self.buf = &self.buf[nlmsg_align(len).min(self.buf.len())..];
        Some(msg)
    }
}

/// Builds a route netlink message from scratch: header, `rtmsg` and the
/// given attributes. Used for dump requests and kernel writes.
pub fn build_route_message(
    msg_type: u16,
    flags: u16,
    family: u8,
    table: u8,
    protocol: u8,
    attrs: &[(u16, &[u8])],
) -> Vec<u8> {
    let mut msg = vec![0u8; NLMSG_HDRLEN + RTMSG_LEN];
    msg[4..6].copy_from_slice(&msg_type.to_ne_bytes());
    msg[6..8].copy_from_slice(&flags.to_ne_bytes());
    msg[NLMSG_HDRLEN] = family;
    msg[NLMSG_HDRLEN + 4] = table;
    msg[NLMSG_HDRLEN + 5] = protocol;

    for (rta_type, payload) in attrs {
        let rta_len = RTA_HDRLEN + payload.len();
        msg.extend_from_slice(&(rta_len as u16).to_ne_bytes());
        msg.extend_from_slice(&rta_type.to_ne_bytes());
        msg.extend_from_slice(payload);
        msg.resize(nlmsg_align(msg.len()), 0);
    }

    let len = msg.len() as u32;
    msg[0..4].copy_from_slice(&len.to_ne_bytes());
    msg
}

/// Direction of a route mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOp {
    Add,
    Delete,
}

/// The subset of a route message the programmable-routing service needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUpdate {
    pub op: RouteOp,
    pub family: u8,
    pub table: u8,
    pub protocol: u8,
    pub dst: Option<IpAddr>,
    pub dst_len: u8,
    pub gateway: Option<IpAddr>,
    pub oif: Option<u32>,
    pub priority: Option<u32>,
}

fn parse_addr(family: u8, payload: &[u8]) -> Result<IpAddr, AgentError> {
    match family {
        AF_INET => {
            let octets: [u8; 4] =
                payload.try_into().map_err(|_| AgentError::RouteParse("bad IPv4 address"))?;
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        AF_INET6 => {
            let octets: [u8; 16] =
                payload.try_into().map_err(|_| AgentError::RouteParse("bad IPv6 address"))?;
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => Err(AgentError::RouteParse("unsupported address family")),
    }
}

/// Interprets an `RTM_NEWROUTE`/`RTM_DELROUTE` message.
pub fn parse_route_update(msg: &[u8]) -> Result<RouteUpdate, AgentError> {
    if msg.len() < NLMSG_HDRLEN + RTMSG_LEN {
        return Err(AgentError::BufferTooShort);
    }

    let op = match nlmsg_type(msg)? {
        RTM_NEWROUTE => RouteOp::Add,
        RTM_DELROUTE => RouteOp::Delete,
        _ => return Err(AgentError::RouteParse("not a route mutation")),
    };

    let family = rtm_family(msg)?;
    let mut update = RouteUpdate {
        op,
        family,
        table: rtm_table(msg)?,
        protocol: rtm_protocol(msg)?,
        dst: None,
        dst_len: rtm_dst_len(msg)?,
        gateway: None,
        oif: None,
        priority: None,
    };

    for rta in rta_iter(msg) {
        match rta.rta_type {
            RTA_DST => update.dst = Some(parse_addr(family, rta.payload)?),
            RTA_GATEWAY => update.gateway = Some(parse_addr(family, rta.payload)?),
            RTA_OIF => update.oif = Some(read_u32(rta.payload, 0)?),
            RTA_PRIORITY => update.priority = Some(read_u32(rta.payload, 0)?),
            _ => {}
        }
    }

    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_accessors() {
        let msg = build_route_message(RTM_NEWROUTE, NLM_F_REQUEST, AF_INET, 254, 22, &[]);
        assert_eq!(msg.len(), NLMSG_HDRLEN + RTMSG_LEN);
        assert_eq!(nlmsg_len(&msg).unwrap() as usize, msg.len());
        assert_eq!(nlmsg_type(&msg).unwrap(), RTM_NEWROUTE);
        assert_eq!(nlmsg_flags(&msg).unwrap(), NLM_F_REQUEST);
        assert_eq!(rtm_family(&msg).unwrap(), AF_INET);
        assert_eq!(rtm_table(&msg).unwrap(), 254);
        assert_eq!(rtm_protocol(&msg).unwrap(), 22);
    }

    #[test]
    fn test_set_and_clear_flags() {
        let mut msg = build_route_message(RTM_NEWROUTE, 0x0863, AF_INET, 0, 0, &[]);
        set_nlmsg_flags(&mut msg, 0).unwrap();
        assert_eq!(nlmsg_flags(&msg).unwrap(), 0);
        set_nlmsg_flags(&mut msg, NLM_F_REQUEST | NLM_F_CREATE).unwrap();
        assert_eq!(nlmsg_flags(&msg).unwrap(), 0x0401);
    }

    #[test]
    fn test_rta_iteration_with_padding() {
        // A 5-byte payload forces 3 bytes of alignment padding.
        let msg = build_route_message(
            RTM_NEWROUTE,
            0,
            AF_INET,
            254,
            2,
            &[(RTA_DST, &[10, 0, 0, 0]), (99, &[1, 2, 3, 4, 5]), (RTA_OIF, &[7, 0, 0, 0])],
        );
        let attrs: Vec<_> = rta_iter(&msg).collect();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0].rta_type, RTA_DST);
        assert_eq!(attrs[1].rta_type, 99);
        assert_eq!(attrs[1].payload, &[1, 2, 3, 4, 5]);
        assert_eq!(attrs[1].total_len, 12);
        assert_eq!(attrs[2].rta_type, RTA_OIF);
        assert_eq!(attrs[2].offset + attrs[2].total_len, msg.len());
    }

    #[test]
    fn test_strip_rtattr_repairs_length() {
        let mut msg = build_route_message(
            RTM_NEWROUTE,
            0,
            AF_INET,
            254,
            2,
            &[(1, &[10, 0, 0, 1]), (RTA_TABLE, &[0; 12]), (3, &[1, 2, 3, 4])],
        );
        let original_len = msg.len();

        strip_rtattr(&mut msg, RTA_TABLE);

        assert_eq!(msg.len(), original_len - 16);
        assert_eq!(nlmsg_len(&msg).unwrap() as usize, msg.len());
        let remaining: Vec<u16> = rta_iter(&msg).map(|rta| rta.rta_type).collect();
        assert_eq!(remaining, vec![1, 3]);

        // Stripping again must be a no-op.
        let before = msg.clone();
        strip_rtattr(&mut msg, RTA_TABLE);
        assert_eq!(msg, before);
    }

    #[test]
    fn test_strip_rtattr_removes_every_occurrence() {
        let mut msg = build_route_message(
            RTM_NEWROUTE,
            0,
            AF_INET,
            254,
            2,
            &[(7, &[1]), (2, &[0, 0, 0, 0]), (7, &[9, 9, 9, 9, 9, 9, 9, 9])],
        );
        strip_rtattr(&mut msg, 7);
        let remaining: Vec<u16> = rta_iter(&msg).map(|rta| rta.rta_type).collect();
        assert_eq!(remaining, vec![2]);
        assert_eq!(nlmsg_len(&msg).unwrap() as usize, msg.len());
    }

    #[test]
    fn test_walk_packed_messages() {
        let first = build_route_message(RTM_NEWROUTE, 0, AF_INET, 254, 2, &[(RTA_OIF, &[1, 0, 0, 0])]);
        let second = build_route_message(RTM_DELROUTE, 0, AF_INET6, 254, 3, &[]);
        let mut buf = first.clone();
        buf.extend_from_slice(&second);

        let messages: Vec<&[u8]> = walk_messages(&buf).collect();
        assert_eq!(messages, vec![&first[..], &second[..]]);
    }

    #[test]
    fn test_walk_stops_on_truncated_tail() {
        let first = build_route_message(RTM_NEWROUTE, 0, AF_INET, 254, 2, &[]);
        let mut buf = first.clone();
        buf.extend_from_slice(&[40, 0, 0, 0, 0, 0]); // claims 40 bytes, has 6

        let messages: Vec<&[u8]> = walk_messages(&buf).collect();
        assert_eq!(messages, vec![&first[..]]);
    }

    #[test]
    fn test_parse_route_update() {
        let msg = build_route_message(
            RTM_NEWROUTE,
            0,
            AF_INET,
            254,
            22,
            &[
                (RTA_DST, &[192, 0, 2, 0]),
                (RTA_GATEWAY, &[192, 0, 2, 1]),
                (RTA_OIF, &3u32.to_ne_bytes()),
                (RTA_PRIORITY, &100u32.to_ne_bytes()),
            ],
        );
        let update = parse_route_update(&msg).unwrap();
        assert_eq!(update.op, RouteOp::Add);
        assert_eq!(update.family, AF_INET);
        assert_eq!(update.table, 254);
        assert_eq!(update.protocol, 22);
        assert_eq!(update.dst, Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 0))));
        assert_eq!(update.gateway, Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))));
        assert_eq!(update.oif, Some(3));
        assert_eq!(update.priority, Some(100));
    }

    #[test]
    fn test_parse_route_update_rejects_non_routes() {
        let msg = build_route_message(RTM_GETROUTE, NLM_F_REQUEST | NLM_F_DUMP, 0, 0, 0, &[]);
        assert_eq!(parse_route_update(&msg), Err(AgentError::RouteParse("not a route mutation")));
    }
}
