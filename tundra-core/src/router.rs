// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The router (C7): ICMP messages the translator originates itself.
//!
//! Every function here builds a complete datagram directly into `ctx.out_buffer` and
//! writes it out `ctx.write_endpoint`, bypassing the normal translate step entirely — the
//! source address is always the translator's own endpoint, never a translated peer
//! address, and the destination is always the original sender of the packet that
//! triggered the reply. `in_buffer` supplies both that destination address and the quoted
//! "offending packet" bytes; it is read here, never a translation target.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::checksum;
use crate::context::ThreadContext;
use crate::error::IoError;
use crate::io;

/// Largest self-originated ICMPv4 message, per `spec.md` invariant 4.
const MAX_ICMPV4_MESSAGE: usize = 576;
/// Largest self-originated ICMPv6 message, per `spec.md` invariant 4.
const MAX_ICMPV6_MESSAGE: usize = 1280;

const ICMPV4_HEADER_LEN: usize = 8;
const ICMPV6_HEADER_LEN: usize = 8;

const ICMPV4_DEST_UNREACHABLE: u8 = 3;
const ICMPV4_TIME_EXCEEDED: u8 = 11;
const ICMPV4_FRAGMENTATION_NEEDED_CODE: u8 = 4;

const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_PACKET_TOO_BIG: u8 = 2;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_PARAMETER_PROBLEM: u8 = 4;

/// Codes for ICMPv4 Destination Unreachable, as used by [`send_icmpv4_destination_unreachable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icmpv4UnreachableCode {
    /// Code 1: host unreachable.
    Host = 1,
    /// Code 3: port unreachable.
    Port = 3,
}

fn build_icmpv4_message(ctx: &mut ThreadContext, icmp_type: u8, icmp_code: u8, rest_of_header: [u8; 4]) {
    let original = ctx.in_buffer.as_slice();
    let dst = Ipv4Addr::new(original[12], original[13], original[14], original[15]);

    let quoted_budget = MAX_ICMPV4_MESSAGE - 20 - ICMPV4_HEADER_LEN;
    let quoted_len = original.len().min(quoted_budget);

    let ttl = ctx.config.router_generated_packet_ttl;
    let src = ctx.config.translator_ipv4;
    let total_len = 20 + ICMPV4_HEADER_LEN + quoted_len;

    let out = ctx.out_buffer.full_mut();
    out[0] = 0x45;
    out[1] = 0;
    #[allow(clippy::cast_possible_truncation)] // total_len <= MAX_ICMPV4_MESSAGE
    out[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    out[4..8].copy_from_slice(&[0, 0, 0x40, 0]); // id=0, DF=1, no fragment offset
    out[8] = ttl;
    out[9] = 1; // ICMP
    out[10] = 0;
    out[11] = 0;
    out[12..16].copy_from_slice(&src.octets());
    out[16..20].copy_from_slice(&dst.octets());
    let ip_checksum = checksum::ipv4_header_checksum(&out[..20]);
    out[10..12].copy_from_slice(&ip_checksum.to_be_bytes());

    out[20] = icmp_type;
    out[21] = icmp_code;
    out[22] = 0;
    out[23] = 0;
    out[24..28].copy_from_slice(&rest_of_header);
    out[28..28 + quoted_len].copy_from_slice(&ctx.in_buffer.as_slice()[..quoted_len]);

    let out = ctx.out_buffer.as_mut_slice();
    let icmp_checksum = checksum::rfc1071(&out[20..total_len]);
    out[22..24].copy_from_slice(&icmp_checksum.to_be_bytes());

    #[allow(clippy::expect_used)] // total_len <= MAX_ICMPV4_MESSAGE << MTU_MAX
    ctx.out_buffer
        .set_len(total_len)
        .expect("self-originated ICMPv4 message fits in buffer capacity");
}

/// Reply to the sender of the packet currently in `ctx.in_buffer` with an ICMPv4
/// Destination Unreachable message.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_icmpv4_destination_unreachable(ctx: &mut ThreadContext, code: Icmpv4UnreachableCode) -> Result<(), IoError> {
    build_icmpv4_message(ctx, ICMPV4_DEST_UNREACHABLE, code as u8, [0; 4]);
    io::send_ipv4_possibly_fragmented(ctx)
}

/// Reply to the sender of the packet currently in `ctx.in_buffer` with an ICMPv4 Time
/// Exceeded (TTL expired in transit) message.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_icmpv4_time_exceeded(ctx: &mut ThreadContext) -> Result<(), IoError> {
    build_icmpv4_message(ctx, ICMPV4_TIME_EXCEEDED, 0, [0; 4]);
    io::send_ipv4_possibly_fragmented(ctx)
}

/// Reply to the sender of the packet currently in `ctx.in_buffer` with an ICMPv4
/// Fragmentation Needed message advertising `mtu` as the usable next-hop MTU.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_icmpv4_fragmentation_needed(ctx: &mut ThreadContext, mtu: u16) -> Result<(), IoError> {
    let mut rest = [0u8; 4];
    rest[2..4].copy_from_slice(&mtu.to_be_bytes());
    build_icmpv4_message(ctx, ICMPV4_DEST_UNREACHABLE, ICMPV4_FRAGMENTATION_NEEDED_CODE, rest);
    io::send_ipv4_possibly_fragmented(ctx)
}

fn build_icmpv6_message(ctx: &mut ThreadContext, icmp_type: u8, icmp_code: u8, rest_of_header: [u8; 4]) {
    let original = ctx.in_buffer.as_slice();
    let dst = Ipv6Addr::from({
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&original[8..24]);
        octets
    });

    let quoted_budget = MAX_ICMPV6_MESSAGE - 40 - ICMPV6_HEADER_LEN;
    let quoted_len = original.len().min(quoted_budget);

    let hop_limit = ctx.config.router_generated_packet_ttl;
    let src = ctx.config.translator_ipv6;
    let icmp_len = ICMPV6_HEADER_LEN + quoted_len;
    let total_len = 40 + icmp_len;

    let out = ctx.out_buffer.full_mut();
    out[0] = 0x60;
    out[1..4].copy_from_slice(&[0, 0, 0]);
    #[allow(clippy::cast_possible_truncation)] // icmp_len <= MAX_ICMPV6_MESSAGE
    out[4..6].copy_from_slice(&(icmp_len as u16).to_be_bytes());
    out[6] = 58; // ICMPv6
    out[7] = hop_limit;
    out[8..24].copy_from_slice(&src.octets());
    out[24..40].copy_from_slice(&dst.octets());

    out[40] = icmp_type;
    out[41] = icmp_code;
    out[42] = 0;
    out[43] = 0;
    out[44..48].copy_from_slice(&rest_of_header);
    out[48..48 + quoted_len].copy_from_slice(&ctx.in_buffer.as_slice()[..quoted_len]);

    let out = ctx.out_buffer.as_mut_slice();
    #[allow(clippy::cast_possible_truncation)] // icmp_len fits u32 comfortably
    let pseudo_header = checksum::ipv6_pseudo_header(src, dst, 58, icmp_len as u32);
    let icmp_checksum = checksum::rfc1071_with_pseudo_header(&pseudo_header, &out[40..total_len]);
    out[42..44].copy_from_slice(&icmp_checksum.to_be_bytes());

    #[allow(clippy::expect_used)] // total_len <= MAX_ICMPV6_MESSAGE << MTU_MAX
    ctx.out_buffer
        .set_len(total_len)
        .expect("self-originated ICMPv6 message fits in buffer capacity");
}

/// Reply to the sender of the packet currently in `ctx.in_buffer` with an ICMPv6
/// Destination Unreachable (code 0, "no route to destination") message.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_icmpv6_destination_unreachable(ctx: &mut ThreadContext) -> Result<(), IoError> {
    build_icmpv6_message(ctx, ICMPV6_DEST_UNREACHABLE, 0, [0; 4]);
    io::send_ipv6_possibly_fragmented(ctx)
}

/// Reply to the sender of the packet currently in `ctx.in_buffer` with an ICMPv6 Time
/// Exceeded (hop limit expired in transit) message.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_icmpv6_time_exceeded(ctx: &mut ThreadContext) -> Result<(), IoError> {
    build_icmpv6_message(ctx, ICMPV6_TIME_EXCEEDED, 0, [0; 4]);
    io::send_ipv6_possibly_fragmented(ctx)
}

/// Reply to the sender of the packet currently in `ctx.in_buffer` with an ICMPv6 Packet
/// Too Big message advertising `mtu`.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_icmpv6_packet_too_big(ctx: &mut ThreadContext, mtu: u32) -> Result<(), IoError> {
    build_icmpv6_message(ctx, ICMPV6_PACKET_TOO_BIG, 0, mtu.to_be_bytes());
    io::send_ipv6_possibly_fragmented(ctx)
}

/// Reply to the sender of the packet currently in `ctx.in_buffer` with an ICMPv6
/// Parameter Problem message (code 0, "erroneous header field") pointing at byte offset
/// `pointer` within the offending packet.
///
/// # Errors
///
/// Returns [`IoError`] on a non-retriable write failure.
pub fn send_icmpv6_parameter_problem(ctx: &mut ThreadContext, pointer: u32) -> Result<(), IoError> {
    build_icmpv6_message(ctx, ICMPV6_PARAMETER_PROBLEM, 0, pointer.to_be_bytes());
    io::send_ipv6_possibly_fragmented(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, IoMode, Ipv6Prefix, TranslationMode};
    use std::fs::File;
    use std::sync::Arc;

    fn test_ctx() -> ThreadContext {
        let config = Arc::new(
            ConfigBuilder::default()
                .mode(TranslationMode::Siit)
                .translator_ipv4(Ipv4Addr::new(203, 0, 113, 1))
                .translator_ipv6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))
                .ipv6_prefix(Ipv6Prefix::well_known())
                .router_generated_packet_ttl(64u8)
                .translator_ipv6_fragment_identifier_prefix(0u16)
                .link_mtu_ipv4(1500u16)
                .link_mtu_ipv6(1500u16)
                .io_mode(IoMode::Tun {
                    name: "tun0".to_string(),
                })
                .build()
                .expect("valid test config"),
        );
        ThreadContext::from_files(
            0,
            config,
            File::open("/dev/null").expect("/dev/null"),
            File::options().write(true).open("/dev/null").expect("/dev/null"),
            1,
        )
    }

    fn sample_ipv4_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 48];
        packet[0] = 0x45;
        let total_len: u16 = 48;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());
        packet[8] = 1; // ttl
        packet[9] = 17;
        packet[12..16].copy_from_slice(&Ipv4Addr::new(192, 0, 2, 55).octets());
        packet[16..20].copy_from_slice(&Ipv4Addr::new(198, 51, 100, 9).octets());
        let checksum = checksum::ipv4_header_checksum(&packet[..20]);
        packet[10..12].copy_from_slice(&checksum.to_be_bytes());
        packet
    }

    #[test]
    fn time_exceeded_addresses_reply_to_original_source() {
        let mut ctx = test_ctx();
        let packet = sample_ipv4_packet();
        ctx.in_buffer.fill_from(&packet).expect("fits");
        build_icmpv4_message(&mut ctx, ICMPV4_TIME_EXCEEDED, 0, [0; 4]);

        let out = ctx.out_buffer.as_slice();
        assert_eq!(out[9], 1);
        assert_eq!(&out[12..16], &ctx.config.translator_ipv4.octets());
        assert_eq!(&out[16..20], &[192, 0, 2, 55]);
        assert_eq!(out[20], ICMPV4_TIME_EXCEEDED);
        assert_eq!(checksum::ipv4_header_checksum(&out[..20]), 0);
    }

    #[test]
    fn fragmentation_needed_carries_mtu_in_header() {
        let mut ctx = test_ctx();
        ctx.in_buffer.fill_from(&sample_ipv4_packet()).expect("fits");
        build_icmpv4_message(&mut ctx, ICMPV4_DEST_UNREACHABLE, ICMPV4_FRAGMENTATION_NEEDED_CODE, {
            let mut rest = [0u8; 4];
            rest[2..4].copy_from_slice(&1400u16.to_be_bytes());
            rest
        });
        let out = ctx.out_buffer.as_slice();
        assert_eq!(out[20], ICMPV4_DEST_UNREACHABLE);
        assert_eq!(out[21], ICMPV4_FRAGMENTATION_NEEDED_CODE);
        assert_eq!(u16::from_be_bytes([out[26], out[27]]), 1400);
    }

    fn sample_ipv6_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 64];
        packet[0] = 0x60;
        let payload_len: u16 = 24;
        packet[4..6].copy_from_slice(&payload_len.to_be_bytes());
        packet[6] = 17;
        packet[7] = 1; // hop limit
        packet[8..24].copy_from_slice(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2).octets());
        packet[24..40].copy_from_slice(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 3).octets());
        packet
    }

    #[test]
    fn icmpv6_time_exceeded_checksum_validates() {
        let mut ctx = test_ctx();
        ctx.in_buffer.fill_from(&sample_ipv6_packet()).expect("fits");
        build_icmpv6_message(&mut ctx, ICMPV6_TIME_EXCEEDED, 0, [0; 4]);

        let out = ctx.out_buffer.as_slice();
        let icmp_len = out.len() - 40;
        #[allow(clippy::cast_possible_truncation)]
        let pseudo_header = checksum::ipv6_pseudo_header(
            Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1),
            Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2),
            58,
            icmp_len as u32,
        );
        assert_eq!(
            checksum::rfc1071_with_pseudo_header(&pseudo_header, &out[40..]),
            0
        );
    }

    #[test]
    fn self_originated_messages_never_exceed_family_caps() {
        let mut ctx = test_ctx();
        ctx.in_buffer.fill_from(&vec![0xAB; 4000]).expect("fits");
        ctx.in_buffer.full_mut()[0] = 0x45;
        build_icmpv4_message(&mut ctx, ICMPV4_TIME_EXCEEDED, 0, [0; 4]);
        assert!(ctx.out_buffer.len() <= MAX_ICMPV4_MESSAGE);

        let mut ctx6 = test_ctx();
        ctx6.in_buffer.fill_from(&vec![0xCD; 4000]).expect("fits");
        ctx6.in_buffer.full_mut()[0] = 0x60;
        build_icmpv6_message(&mut ctx6, ICMPV6_TIME_EXCEEDED, 0, [0; 4]);
        assert!(ctx6.out_buffer.len() <= MAX_ICMPV6_MESSAGE);
    }

    /// P5: no translator-originated ICMP message exceeds its family's byte cap,
    /// regardless of how long the quoted original packet was.
    #[test]
    fn self_originated_messages_never_exceed_family_caps_fuzzed() {
        bolero::check!().with_type().for_each(|len: &u16| {
            let len = usize::from(*len);

            let mut ctx = test_ctx();
            ctx.in_buffer.fill_from(&vec![0xABu8; len.max(20)]).expect("fits");
            ctx.in_buffer.full_mut()[0] = 0x45;
            build_icmpv4_message(&mut ctx, ICMPV4_TIME_EXCEEDED, 0, [0; 4]);
            assert!(ctx.out_buffer.len() <= MAX_ICMPV4_MESSAGE);

            let mut ctx6 = test_ctx();
            ctx6.in_buffer.fill_from(&vec![0xCDu8; len.max(40)]).expect("fits");
            ctx6.in_buffer.full_mut()[0] = 0x60;
            build_icmpv6_message(&mut ctx6, ICMPV6_TIME_EXCEEDED, 0, [0; 4]);
            assert!(ctx6.out_buffer.len() <= MAX_ICMPV6_MESSAGE);
        });
    }
}
