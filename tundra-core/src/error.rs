// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error taxonomy shared by every translation and I/O path.
//!
//! Five kinds exist, matching five different propagation policies: packet-drops and
//! policy-drops are ordinary `Result::Err` values the worker loop recovers from locally;
//! I/O errors are retriable or fatal depending on the errno; invariant violations are
//! also ordinary values up to the worker boundary, where they terminate the process
//! rather than unwind through a panic.

use thiserror::Error;

/// A single packet is discarded silently: malformed header, forbidden address, an
/// unsupported extension header, or an ICMP type with no translation. Counted and
/// logged at `debug!`, never replied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketDrop {
    /// Fewer than 20 bytes were read; too short to hold even a minimal IP header.
    #[error("packet of {actual} bytes is shorter than the minimum IP header")]
    TooShort {
        /// The number of bytes actually present.
        actual: usize,
    },
    /// The first nibble was neither 4 nor 6.
    #[error("unrecognized ip version nibble {0:#x}")]
    UnsupportedIpVersion(u8),
    /// The IPv4 header failed structural validation (IHL, total length, checksum).
    #[error("malformed ipv4 header: {0}")]
    MalformedIpv4(&'static str),
    /// The IPv6 header or an extension header in its chain failed structural validation.
    #[error("malformed ipv6 header: {0}")]
    MalformedIpv6(&'static str),
    /// An upper-layer (TCP/UDP/ICMP) header failed structural validation.
    #[error("malformed upper-layer header: {0}")]
    MalformedUpperLayer(&'static str),
    /// Source or destination falls outside what the active mode may translate (e.g. a
    /// multicast or loopback address presented as a unicast endpoint).
    #[error("address forbidden for translation: {0}")]
    ForbiddenAddress(&'static str),
    /// An IPv6 address did not embed a valid IPv4 address under the configured prefix,
    /// or vice versa.
    #[error("address does not embed under the configured prefix")]
    AddressNotEmbeddable,
    /// An IPv6 extension header type outside {Hop-by-hop, Routing, Fragment,
    /// Destination-Options} was encountered.
    #[error("unsupported ipv6 extension header type {0}")]
    UnsupportedExtensionHeader(u8),
    /// The upper-layer protocol number has no translation (neither TCP, UDP, nor ICMP).
    #[error("unsupported upper-layer protocol {0}")]
    UnsupportedProtocol(u8),
    /// An ICMP type this translator does not map to the other address family.
    #[error("icmp type {0} has no translation")]
    UntranslatableIcmpType(u8),
    /// The input was fragmented and `allow_forwarding_fragmented_packets` is false.
    #[error("fragmented input forwarding is disabled")]
    FragmentationForbidden,
}

/// A packet is discarded *and* a translator-originated ICMP reply is sent to the
/// original source via [`crate::router`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyDrop {
    /// TTL/hop-limit reached zero before decrement.
    #[error("ttl/hop limit expired")]
    TtlExpired,
    /// The translated datagram would exceed the egress MTU and may not be fragmented.
    #[error("packet exceeds egress mtu {mtu} and fragmentation is not permitted")]
    FragmentationNeeded {
        /// The MTU the sender should use instead.
        mtu: u16,
    },
    /// An IPv6 Routing Header of type 0 with `segments_left != 0` was present.
    #[error("ipv6 routing header type 0 with nonzero segments_left at offset {offset}")]
    RoutingHeaderType0 {
        /// Offset of the offending octet, for the Parameter Problem pointer.
        offset: u32,
    },
}

/// Either kind of recoverable per-packet outcome a translator step can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// Silently discard, no reply.
    #[error(transparent)]
    Drop(#[from] PacketDrop),
    /// Discard and reply via the router.
    #[error(transparent)]
    Policy(#[from] PolicyDrop),
}

/// An I/O error observed on a read or write endpoint, carrying the raw errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("i/o error (errno {errno})")]
pub struct IoError {
    /// The raw POSIX errno value.
    pub errno: i32,
}

impl IoError {
    /// Wrap a raw errno value observed from a `read`/`write` system call.
    #[must_use]
    pub fn from_raw(errno: i32) -> Self {
        IoError { errno }
    }

    /// Whether the worker loop should simply retry the same operation.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.errno == errno::EINTR || self.errno == errno::EAGAIN
    }

    /// Whether the worker must abort: the endpoint itself is no longer usable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retriable()
    }
}

/// An invariant the implementation itself must uphold was violated: a bug, never an
/// operational condition. The worker loop logs this at `error!` and exits the process
/// with code 3 rather than attempting to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalError {
    /// A buffer write would have exceeded [`crate::buffer::MTU_MAX`].
    #[error("packet buffer capacity exceeded: {0}")]
    BufferCapacity(#[from] crate::buffer::CapacityExceeded),
    /// A read or write endpoint reported an unrecoverable I/O error.
    #[error("fatal i/o error: {0}")]
    Io(#[from] IoError),
}
