// crates/nlagent-rs/src/policy.rs
//! Per-destination policy evaluation: filter, set and strip
//! transformations over a cloned route netlink message.

use crate::config::{PolicyKind, PolicySet};
use crate::frame::netlink::{
    NLMSG_HDRLEN, RTMSG_LEN, rtm_family, rtm_protocol, rtm_table, set_rtm_protocol, set_rtm_table,
    strip_rtattr,
};
use crate::types::EventInfo;
use log::info;

fn match_filter(policy: &PolicySet, kind: PolicyKind, field: &str, value: i32) -> bool {
    let list = policy.get(kind);
    if list.is_empty() {
        // No policy configured
        return true;
    }

    if list.contains(value) {
        info!("[{} {}] matched a filter policy", field, value);
        return true;
    }

    info!("[{} {}] didn't match any filter policies", field, value);
    false
}

/// Evaluates a destination's policy against an event.
///
/// The input is never mutated: all transformation happens on a clone,
/// which is returned for delivery. `None` means the destination rejected
/// the message and nothing is delivered to it.
pub fn evaluate(policy: &PolicySet, event: &EventInfo) -> Option<EventInfo> {
    let mut out = event.clone();

    if out.msg.len() < NLMSG_HDRLEN + RTMSG_LEN {
        info!("message too short for a route header, discarding");
        return None;
    }

    let family = rtm_family(&out.msg).ok()?;
    let table = rtm_table(&out.msg).ok()?;
    let protocol = rtm_protocol(&out.msg).ok()?;

    // Filter policies: any rejection discards the clone.
    if !match_filter(policy, PolicyKind::FilterFamily, "rtm_family", family as i32) {
        return None;
    }
    if !match_filter(policy, PolicyKind::FilterTable, "rtm_table", table as i32) {
        return None;
    }
    if !match_filter(policy, PolicyKind::FilterProtocol, "rtm_protocol", protocol as i32) {
        return None;
    }

    // Set policies overwrite sequentially; the last value wins.
    for &value in policy.get(PolicyKind::SetTable).values() {
        set_rtm_table(&mut out.msg, value as u8).ok()?;
        info!("set rtm_table field to [{}]", value);
    }
    for &value in policy.get(PolicyKind::SetProtocol).values() {
        set_rtm_protocol(&mut out.msg, value as u8).ok()?;
        info!("set rtm_protocol field to [{}]", value);
    }

    // Remove the configured attributes from the clone.
    for &rta_type in policy.get(PolicyKind::StripRtattr).values() {
        strip_rtattr(&mut out.msg, rta_type as u16);
    }

    Some(out)
}
