// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The I/O façade (C2).
//!
//! Every read and write in this module is packet-granular: Linux TUN devices (and the
//! inherited-fd mode that stands in for them) deliver and accept exactly one IP datagram
//! per `read(2)`/`write(2)`, so there is no framing to parse here. Retriable errors
//! (`EINTR`, `EAGAIN`) loop internally and never reach the caller; everything else is
//! [`IoError`] for the worker loop to classify as fatal.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};

use crate::buffer::MTU_MAX;
use crate::context::ThreadContext;
use crate::error::IoError;

/// The minimum number of bytes that could possibly hold an IP header, per `spec.md`
/// §4.3: reads shorter than this are treated as an empty, silently-droppable packet
/// rather than a read failure.
const MIN_IP_HEADER_LEN: usize = 20;

fn raw_errno(err: &std::io::Error) -> i32 {
    err.raw_os_error().unwrap_or(errno::EIO)
}

fn is_retriable(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

/// Read one datagram from `ctx.read_endpoint` into `ctx.in_buffer`.
///
/// Short reads below [`MIN_IP_HEADER_LEN`] leave `in_buffer`'s length at the short
/// count; it is the translate step's job to recognize that and drop the packet.
/// Retriable errors are retried internally; anything else is returned for the worker
/// loop to classify via [`IoError::is_fatal`].
///
/// # Errors
///
/// Returns [`IoError`] if the underlying read fails with a non-retriable errno.
pub fn recv_into_in(ctx: &mut ThreadContext) -> Result<usize, IoError> {
    loop {
        let buf = ctx.in_buffer.full_mut();
        match ctx.read_endpoint.read(&mut buf[..]) {
            Ok(n) => {
                // `n <= MTU_MAX` always holds since `buf` has exactly that length.
                #[allow(clippy::expect_used)] // n is bounded by buf.len() == MTU_MAX above
                ctx.in_buffer
                    .set_len(n)
                    .expect("read length bounded by buffer capacity");
                return Ok(n);
            }
            Err(err) if is_retriable(&err) => continue,
            Err(err) => return Err(IoError::from_raw(raw_errno(&err))),
        }
    }
}

/// Whether a read returned enough bytes to be worth attempting to translate at all.
#[must_use]
pub fn is_plausible_ip_datagram(len: usize) -> bool {
    len >= MIN_IP_HEADER_LEN
}

fn write_all_retrying(write_endpoint: &mut File, packet: &[u8]) -> Result<(), IoError> {
    loop {
        match write_endpoint.write_all(packet) {
            Ok(()) => return Ok(()),
            Err(err) if is_retriable(&err) => continue,
            Err(err) => return Err(IoError::from_raw(raw_errno(&err))),
        }
    }
}

/// Write `ctx.out_buffer`'s live bytes as a single IPv4 datagram, splitting into
/// 8-byte-aligned fragments first if it exceeds `link_mtu_ipv4` and fragmentation is
/// permitted.
///
/// The common, unfragmented case writes straight out of `ctx.out_buffer` with no
/// intermediate copy (`spec.md` §5: "no dynamic allocation per packet" on the hot path);
/// only the uncommon oversized-packet path allocates, to build the fragment series.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_ipv4_possibly_fragmented(ctx: &mut ThreadContext) -> Result<(), IoError> {
    let mtu = ctx.config.link_mtu_ipv4 as usize;
    let packet = ctx.out_buffer.as_slice();

    if packet.len() <= mtu || !dont_fragment_would_allow_split(packet) {
        return write_all_retrying(&mut ctx.write_endpoint, packet);
    }

    let fragments = crate::xlat::fragment::fragment_ipv4(packet, mtu);
    for fragment in fragments {
        write_all_retrying(&mut ctx.write_endpoint, &fragment)?;
    }
    Ok(())
}

/// An IPv4 packet may only be split if its Don't-Fragment bit is clear.
fn dont_fragment_would_allow_split(packet: &[u8]) -> bool {
    packet.len() >= MIN_IP_HEADER_LEN && packet[6] & 0x40 == 0
}

/// Write `ctx.out_buffer`'s live bytes as a single IPv6 datagram, splitting into an
/// IPv6 Fragment Header series if it exceeds the effective IPv6 link MTU and
/// fragmentation is permitted.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_ipv6_possibly_fragmented(ctx: &mut ThreadContext) -> Result<(), IoError> {
    let mtu = ctx.config.effective_link_mtu_ipv6() as usize;

    if ctx.out_buffer.len() <= mtu {
        return write_all_retrying(&mut ctx.write_endpoint, ctx.out_buffer.as_slice());
    }

    let identifier = ctx.next_fragment_identifier();
    let fragments = crate::xlat::fragment::fragment_ipv6(ctx.out_buffer.as_slice(), mtu, identifier);
    for fragment in fragments {
        write_all_retrying(&mut ctx.write_endpoint, &fragment)?;
    }
    Ok(())
}
