// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The set of payload header types a [`crate::ipv4::Ipv4`] or [`crate::ipv6::Ipv6`] header can
//! carry, joined into one enum so `ParsePayload`/`ParsePayloadWith` impls can share a `Next` type.

use crate::icmp4::Icmp4;
use crate::icmp6::Icmp6;
use crate::ipv6::Ipv6Ext;
use crate::tcp::Tcp;
use crate::udp::Udp;

/// Any header this crate knows how to parse as the payload of an IP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// A TCP header.
    Tcp(Tcp),
    /// A UDP header.
    Udp(Udp),
    /// An ICMPv4 header.
    Icmp4(Icmp4),
    /// An ICMPv6 header.
    Icmp6(Icmp6),
    /// An IPv6 extension header.
    IpV6Ext(Ipv6Ext),
}
