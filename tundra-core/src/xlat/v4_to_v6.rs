// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The 4→6 translator (C3): rewrite one IPv4 datagram in `ctx.in_buffer` as an IPv6
//! datagram in `ctx.out_buffer`, per RFC 7915 §4 and `spec.md` §4.4.
//!
//! IPv4 carries no flow label and the upper-layer pseudo-header shrinks from 12 bytes to
//! 40, so — unlike the 6→4 direction, which only ever swaps two fixed-width addresses —
//! the checksum delta here is always a family-crossing one; see
//! [`crate::checksum::incremental`]'s "multi-word delta" doc.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use net::ipv4::UnicastIpv4Addr;

use crate::addr;
use crate::checksum;
use crate::config::{Config, FlowLabelPolicy, TranslationMode};
use crate::context::ThreadContext;
use crate::error::{PacketDrop, PolicyDrop, TranslateError};
use crate::icmp;

const IPV4_HEADER_MIN_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const IPV6_FRAGMENT_HEADER_LEN: usize = 8;
const NEXT_HEADER_FRAGMENT: u8 = 44;
const NEXT_HEADER_ICMPV6: u8 = 58;

const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

/// Translate the complete IPv4 datagram currently in `ctx.in_buffer` into an IPv6
/// datagram written to `ctx.out_buffer`.
///
/// On success, `ctx.out_buffer`'s length is set to the translated datagram and the
/// caller (`crate::worker`) is expected to hand it to
/// [`crate::io::send_ipv6_possibly_fragmented`]. On [`TranslateError::Policy`], the
/// caller instead routes to the matching [`crate::router`] entry point; on
/// [`TranslateError::Drop`] the packet is simply discarded.
///
/// # Errors
///
/// See [`PacketDrop`] and [`PolicyDrop`] for the conditions under which each is
/// returned.
pub fn translate(ctx: &mut ThreadContext) -> Result<(), TranslateError> {
    let config = Arc::clone(&ctx.config);

    let in_len = ctx.in_buffer.len();
    let packet = ctx.in_buffer.as_slice();
    if in_len < IPV4_HEADER_MIN_LEN {
        return Err(PacketDrop::TooShort { actual: in_len }.into());
    }
    let version = packet[0] >> 4;
    if version != 4 {
        return Err(PacketDrop::UnsupportedIpVersion(version).into());
    }
    let ihl = usize::from(packet[0] & 0x0F) * 4;
    if !(IPV4_HEADER_MIN_LEN..=60).contains(&ihl) || ihl > in_len {
        return Err(PacketDrop::MalformedIpv4("ihl out of range").into());
    }
    let total_len = usize::from(u16::from_be_bytes([packet[2], packet[3]]));
    if total_len > in_len || total_len < ihl {
        return Err(PacketDrop::MalformedIpv4("total length inconsistent with bytes read").into());
    }
    if checksum::ipv4_header_checksum(&packet[..ihl]) != 0 {
        return Err(PacketDrop::MalformedIpv4("header checksum invalid").into());
    }

    let dscp_ecn = packet[1];
    let identification = u16::from_be_bytes([packet[4], packet[5]]);
    let flags_and_offset = u16::from_be_bytes([packet[6], packet[7]]);
    let dont_fragment = flags_and_offset & 0x4000 != 0;
    let more_fragments = flags_and_offset & 0x2000 != 0;
    let fragment_offset_words = flags_and_offset & 0x1FFF;
    let is_fragment = more_fragments || fragment_offset_words != 0;
    let carries_upper_layer_header = !is_fragment || fragment_offset_words == 0;

    let ttl = packet[8];
    let protocol = packet[9];
    let src4 = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst4 = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);

    if UnicastIpv4Addr::new(src4).is_err() || UnicastIpv4Addr::new(dst4).is_err() {
        return Err(PacketDrop::ForbiddenAddress("multicast address presented as translation endpoint").into());
    }

    if is_fragment && !config.allow_forwarding_fragmented_packets {
        return Err(PacketDrop::FragmentationForbidden.into());
    }

    if ttl <= 1 {
        return Err(PolicyDrop::TtlExpired.into());
    }
    let hop_limit = ttl - 1;

    let (src6, dst6) = synthesize_addresses(&config, src4, dst4)?;

    let payload = &packet[ihl..total_len];
    let inner_next_header = if protocol == PROTO_ICMP { NEXT_HEADER_ICMPV6 } else { protocol };
    let outer_next_header = if is_fragment { NEXT_HEADER_FRAGMENT } else { inner_next_header };
    let header_len = IPV6_HEADER_LEN + if is_fragment { IPV6_FRAGMENT_HEADER_LEN } else { 0 };

    let flow_label = if config.copy_dscp_and_flow_label {
        compute_flow_label(config.flow_label_policy, src4, dst4, protocol, payload)
    } else {
        0
    };
    let traffic_class = if config.copy_dscp_and_flow_label { dscp_ecn } else { 0 };

    let out = ctx.out_buffer.full_mut();

    let body_len = write_body(
        &config,
        protocol,
        carries_upper_layer_header,
        src4,
        dst4,
        src6,
        dst6,
        payload,
        &mut out[header_len..],
    )?;

    out[0] = 0x60 | (traffic_class >> 4);
    out[1] = (traffic_class << 4) | ((flow_label >> 16) as u8 & 0x0F);
    out[2..4].copy_from_slice(&(flow_label as u16).to_be_bytes());
    let inner_payload_len = (header_len - IPV6_HEADER_LEN + body_len) as u32;
    #[allow(clippy::cast_possible_truncation)] // bounded by MTU_MAX
    out[4..6].copy_from_slice(&(inner_payload_len as u16).to_be_bytes());
    out[6] = outer_next_header;
    out[7] = hop_limit;
    out[8..24].copy_from_slice(&src6.octets());
    out[24..40].copy_from_slice(&dst6.octets());

    if is_fragment {
        let frag_id = (u32::from(config.translator_ipv6_fragment_identifier_prefix) << 16) | u32::from(identification);
        out[40] = inner_next_header;
        out[41] = 0;
        let offset_and_m = (fragment_offset_words << 3) | u16::from(more_fragments);
        out[42..44].copy_from_slice(&offset_and_m.to_be_bytes());
        out[44..48].copy_from_slice(&frag_id.to_be_bytes());
    }

    let total_out_len = header_len + body_len;
    let effective_mtu6 = usize::from(config.effective_link_mtu_ipv6());
    if !is_fragment && dont_fragment && total_out_len > effective_mtu6 {
        #[allow(clippy::cast_possible_truncation)]
        let mtu4 = effective_mtu6.saturating_sub(20).min(usize::from(u16::MAX)) as u16;
        return Err(PolicyDrop::FragmentationNeeded { mtu: mtu4 }.into());
    }

    #[allow(clippy::expect_used)] // total_out_len <= MTU_MAX by construction
    ctx.out_buffer
        .set_len(total_out_len)
        .expect("translated ipv6 datagram fits in buffer capacity");
    Ok(())
}

/// Resolve the outer IPv6 source/destination for the active mode, per `spec.md` §4.4
/// step 3. `translator_ipv6`/`translator_ipv4` are this translator's own endpoint
/// addresses; `single_translation_ipv6`/`single_translation_ipv4` are the fixed address
/// the *other* side's translated direction decomposes back to (see the mirrored
/// resolution in `crate::xlat::v6_to_4::synthesize_addresses`, and DESIGN.md for why the
/// pairing is split this way).
fn synthesize_addresses(config: &Config, src4: Ipv4Addr, dst4: Ipv4Addr) -> Result<(Ipv6Addr, Ipv6Addr), PacketDrop> {
    match config.mode {
        TranslationMode::Nat64 => {
            let src6 = addr::compose(&config.ipv6_prefix, src4);
            let dst6 = config
                .single_translation_ipv6
                .ok_or(PacketDrop::ForbiddenAddress("nat64 mode requires single_translation_ipv6"))?;
            Ok((src6, dst6))
        }
        TranslationMode::Clat => {
            let src6 = config.translator_ipv6;
            let dst6 = addr::compose(&config.ipv6_prefix, dst4);
            Ok((src6, dst6))
        }
        TranslationMode::Siit => {
            let src6 = addr::compose(&config.ipv6_prefix, src4);
            let dst6 = addr::compose(&config.ipv6_prefix, dst4);
            Ok((src6, dst6))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_body(
    config: &Config,
    protocol: u8,
    carries_upper_layer_header: bool,
    src4: Ipv4Addr,
    dst4: Ipv4Addr,
    src6: Ipv6Addr,
    dst6: Ipv6Addr,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, PacketDrop> {
    if !carries_upper_layer_header {
        out[..payload.len()].copy_from_slice(payload);
        return Ok(payload.len());
    }

    match protocol {
        PROTO_ICMP => {
            let body_len = icmp::translate_icmpv4_to_icmpv6(payload, config, out)?;
            #[allow(clippy::cast_possible_truncation)] // body_len <= MTU_MAX
            let pseudo_header = checksum::ipv6_pseudo_header(src6, dst6, NEXT_HEADER_ICMPV6, body_len as u32);
            let icmp_checksum = checksum::rfc1071_with_pseudo_header(&pseudo_header, &out[..body_len]);
            out[2..4].copy_from_slice(&icmp_checksum.to_be_bytes());
            Ok(body_len)
        }
        PROTO_TCP => {
            if payload.len() < 20 {
                return Err(PacketDrop::MalformedUpperLayer("tcp header truncated"));
            }
            out[..payload.len()].copy_from_slice(payload);
            let old_checksum = u16::from_be_bytes([payload[16], payload[17]]);
            #[allow(clippy::cast_possible_truncation)]
            let old_pseudo = checksum::ipv4_pseudo_header(src4, dst4, PROTO_TCP, payload.len() as u16);
            let new_pseudo = checksum::ipv6_pseudo_header(src6, dst6, PROTO_TCP, payload.len() as u32);
            let new_checksum = checksum::incremental(old_checksum, &old_pseudo, &new_pseudo);
            out[16..18].copy_from_slice(&new_checksum.to_be_bytes());
            Ok(payload.len())
        }
        PROTO_UDP => {
            if payload.len() < 8 {
                return Err(PacketDrop::MalformedUpperLayer("udp header truncated"));
            }
            out[..payload.len()].copy_from_slice(payload);
            let old_checksum = u16::from_be_bytes([payload[6], payload[7]]);
            let new_pseudo = checksum::ipv6_pseudo_header(src6, dst6, PROTO_UDP, payload.len() as u32);
            let new_checksum = if old_checksum == 0 {
                // RFC 6145 §4.3: IPv6 forbids a zero UDP checksum, so one must be computed
                // in full rather than incrementally carried over from the absent IPv4 one.
                let computed = checksum::rfc1071_with_pseudo_header(&new_pseudo, &out[..payload.len()]);
                if computed == 0 { 0xFFFF } else { computed }
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let old_pseudo = checksum::ipv4_pseudo_header(src4, dst4, PROTO_UDP, payload.len() as u16);
                checksum::incremental(old_checksum, &old_pseudo, &new_pseudo)
            };
            out[6..8].copy_from_slice(&new_checksum.to_be_bytes());
            Ok(payload.len())
        }
        other => Err(PacketDrop::UnsupportedProtocol(other)),
    }
}

/// Derive the IPv6 flow label per [`FlowLabelPolicy`], resolving `spec.md` §9's flow-label
/// Open Question (see DESIGN.md).
fn compute_flow_label(policy: FlowLabelPolicy, src4: Ipv4Addr, dst4: Ipv4Addr, protocol: u8, payload: &[u8]) -> u32 {
    match policy {
        FlowLabelPolicy::Zero => 0,
        FlowLabelPolicy::ComputedHash => {
            let (sport, dport) = match protocol {
                PROTO_TCP | PROTO_UDP if payload.len() >= 4 => (
                    u16::from_be_bytes([payload[0], payload[1]]),
                    u16::from_be_bytes([payload[2], payload[3]]),
                ),
                PROTO_ICMP if payload.len() >= 6 => (u16::from_be_bytes([payload[4], payload[5]]), 0),
                _ => (0, 0),
            };
            hash_5tuple_20bit(src4, dst4, protocol, sport, dport)
        }
    }
}

/// A fixed-seed, non-cryptographic FNV-1a hash of the IPv4 5-tuple, truncated to 20 bits.
/// Only needs to give stable per-flow entropy for ECMP, never to resist an adversary.
fn hash_5tuple_20bit(src4: Ipv4Addr, dst4: Ipv4Addr, protocol: u8, sport: u16, dport: u16) -> u32 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

    let mut hash = FNV_OFFSET_BASIS;
    let mut mix = |byte: u8| {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    };
    src4.octets().into_iter().for_each(&mut mix);
    dst4.octets().into_iter().for_each(&mut mix);
    mix(protocol);
    sport.to_be_bytes().into_iter().for_each(&mut mix);
    dport.to_be_bytes().into_iter().for_each(&mut mix);

    #[allow(clippy::cast_possible_truncation)]
    let truncated = hash as u32;
    truncated & 0x000F_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, IoMode, Ipv6Prefix};
    use crate::context::ThreadContext;
    use std::fs::File;

    fn nat64_config() -> Arc<Config> {
        Arc::new(
            ConfigBuilder::default()
                .mode(TranslationMode::Nat64)
                .translator_ipv4(Ipv4Addr::new(203, 0, 113, 1))
                .translator_ipv6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))
                .ipv6_prefix(Ipv6Prefix::well_known())
                .single_translation_ipv6(Some(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)))
                .router_generated_packet_ttl(64u8)
                .translator_ipv6_fragment_identifier_prefix(0xBEEFu16)
                .link_mtu_ipv4(1500u16)
                .link_mtu_ipv6(1500u16)
                .io_mode(IoMode::Tun {
                    name: "tun0".to_string(),
                })
                .build()
                .expect("valid test config"),
        )
    }

    fn test_ctx(config: Arc<Config>) -> ThreadContext {
        ThreadContext::from_files(
            0,
            config,
            File::open("/dev/null").expect("/dev/null"),
            File::options().write(true).open("/dev/null").expect("/dev/null"),
            1,
        )
    }

    fn build_udp_ipv4(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8, udp_payload: &[u8]) -> Vec<u8> {
        let udp_len = 8 + udp_payload.len();
        let total_len = 20 + udp_len;
        let mut packet = vec![0u8; total_len];
        packet[0] = 0x45;
        packet[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        packet[6] = 0x40; // DF
        packet[8] = ttl;
        packet[9] = 17;
        packet[12..16].copy_from_slice(&src.octets());
        packet[16..20].copy_from_slice(&dst.octets());
        let ip_checksum = checksum::ipv4_header_checksum(&packet[..20]);
        packet[10..12].copy_from_slice(&ip_checksum.to_be_bytes());

        packet[20..22].copy_from_slice(&12345u16.to_be_bytes());
        packet[22..24].copy_from_slice(&53u16.to_be_bytes());
        packet[24..26].copy_from_slice(&(udp_len as u16).to_be_bytes());
        packet[28..28 + udp_payload.len()].copy_from_slice(udp_payload);
        let pseudo = checksum::ipv4_pseudo_header(src, dst, 17, udp_len as u16);
        let udp_checksum = checksum::rfc1071_with_pseudo_header(&pseudo, &packet[20..total_len]);
        packet[26..28].copy_from_slice(&udp_checksum.to_be_bytes());
        packet
    }

    #[test]
    fn plain_udp_nat64_translates_addresses_and_recomputes_checksum() {
        let config = nat64_config();
        let mut ctx = test_ctx(Arc::clone(&config));
        let src = Ipv4Addr::new(192, 0, 2, 1);
        let dst = Ipv4Addr::new(198, 51, 100, 10);
        let packet = build_udp_ipv4(src, dst, 64, &[0u8; 40]);
        ctx.in_buffer.fill_from(&packet).expect("fits");

        translate(&mut ctx).expect("translation succeeds");

        let out = ctx.out_buffer.as_slice();
        assert_eq!(out[0] >> 4, 6);
        let out_src = Ipv6Addr::from({
            let mut b = [0u8; 16];
            b.copy_from_slice(&out[8..24]);
            b
        });
        let out_dst = Ipv6Addr::from({
            let mut b = [0u8; 16];
            b.copy_from_slice(&out[24..40]);
            b
        });
        assert_eq!(out_src, Ipv6Addr::new(0x0064, 0xff9b, 0, 0, 0, 0, 0xc000, 0x0201));
        assert_eq!(out_dst, Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        assert_eq!(out[6], 17);
        assert_eq!(out[7], 63);

        let payload_length = u16::from_be_bytes([out[4], out[5]]);
        assert_eq!(usize::from(payload_length), out.len() - 40);

        let udp = &out[40..];
        let pseudo = checksum::ipv6_pseudo_header(out_src, out_dst, 17, udp.len() as u32);
        assert_eq!(checksum::rfc1071_with_pseudo_header(&pseudo, udp), 0);
        assert_ne!(u16::from_be_bytes([udp[6], udp[7]]), 0);
    }

    #[test]
    fn expired_ttl_is_a_policy_drop() {
        let config = nat64_config();
        let mut ctx = test_ctx(config);
        let packet = build_udp_ipv4(Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(198, 51, 100, 10), 1, &[0u8; 8]);
        ctx.in_buffer.fill_from(&packet).expect("fits");
        let err = translate(&mut ctx).unwrap_err();
        assert!(matches!(err, TranslateError::Policy(PolicyDrop::TtlExpired)));
    }

    #[test]
    fn echo_request_delegates_to_icmp_translator() {
        let config = nat64_config();
        let mut ctx = test_ctx(config);
        let mut packet = vec![0u8; 20 + 8];
        packet[0] = 0x45;
        let total_len: u16 = 28;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());
        packet[8] = 64;
        packet[9] = 1;
        packet[12..16].copy_from_slice(&Ipv4Addr::new(192, 0, 2, 1).octets());
        packet[16..20].copy_from_slice(&Ipv4Addr::new(198, 51, 100, 10).octets());
        let ip_checksum = checksum::ipv4_header_checksum(&packet[..20]);
        packet[10..12].copy_from_slice(&ip_checksum.to_be_bytes());
        packet[20] = 8; // echo request
        packet[24..26].copy_from_slice(&0x1234u16.to_be_bytes());
        packet[26..28].copy_from_slice(&1u16.to_be_bytes());
        ctx.in_buffer.fill_from(&packet).expect("fits");

        translate(&mut ctx).expect("translation succeeds");
        let out = ctx.out_buffer.as_slice();
        assert_eq!(out[6], 58);
        assert_eq!(out[40], 128);
        assert_eq!(&out[44..48], &[0x12, 0x34, 0x00, 0x01]);
    }

    #[test]
    fn non_first_fragment_copies_payload_without_checksum_touch() {
        let config = nat64_config();
        let mut ctx = test_ctx(config);
        let udp_tail = [0xABu8; 32];
        let mut packet = vec![0u8; 20 + udp_tail.len()];
        packet[0] = 0x45;
        let total_len = packet.len() as u16;
        packet[2..4].copy_from_slice(&total_len.to_be_bytes());
        packet[6..8].copy_from_slice(&(0x2000u16 | 40u16).to_be_bytes()); // MF=1, offset=40*8
        packet[8] = 64;
        packet[9] = 17;
        packet[12..16].copy_from_slice(&Ipv4Addr::new(192, 0, 2, 1).octets());
        packet[16..20].copy_from_slice(&Ipv4Addr::new(198, 51, 100, 10).octets());
        let ip_checksum = checksum::ipv4_header_checksum(&packet[..20]);
        packet[10..12].copy_from_slice(&ip_checksum.to_be_bytes());
        packet[20..].copy_from_slice(&udp_tail);
        ctx.in_buffer.fill_from(&packet).expect("fits");

        translate(&mut ctx).expect("translation succeeds");
        let out = ctx.out_buffer.as_slice();
        assert_eq!(out[6], 44); // Fragment Header
        assert_eq!(out[40], 17); // inner next header carried in fragment header
        assert_eq!(&out[48..], &udp_tail[..]);
    }

    /// P2/P3, fuzzed: for any well-formed UDP-over-IPv4 datagram, the translated IPv6
    /// datagram's `payload_length` matches its actual emitted byte count and its UDP
    /// checksum validates against the freshly synthesized pseudo-header.
    #[test]
    fn udp_translation_preserves_checksum_and_length_invariants_fuzzed() {
        let config = nat64_config();
        bolero::check!()
            .with_type()
            .for_each(|(a, b, c, d, ttl, payload): &(u8, u8, u8, u8, u8, Vec<u8>)| {
                let src = Ipv4Addr::new((*a).max(1), *b, *c, (*d).max(1));
                let dst = Ipv4Addr::new(198, 51, 100, 10);
                let ttl = (*ttl).max(2);
                let payload: Vec<u8> = payload.iter().take(1400).copied().collect();

                let mut ctx = test_ctx(Arc::clone(&config));
                let packet = build_udp_ipv4(src, dst, ttl, &payload);
                ctx.in_buffer.fill_from(&packet).expect("fits");

                let Ok(()) = translate(&mut ctx) else {
                    return;
                };

                let out = ctx.out_buffer.as_slice();
                assert_eq!(out[0] >> 4, 6);

                let payload_length = u16::from_be_bytes([out[4], out[5]]);
                assert_eq!(usize::from(payload_length), out.len() - 40);

                let out_src = Ipv6Addr::from({
                    let mut b = [0u8; 16];
                    b.copy_from_slice(&out[8..24]);
                    b
                });
                let out_dst = Ipv6Addr::from({
                    let mut b = [0u8; 16];
                    b.copy_from_slice(&out[24..40]);
                    b
                });
                let udp = &out[40..];
                let pseudo = checksum::ipv6_pseudo_header(out_src, out_dst, 17, udp.len() as u32);
                assert_eq!(checksum::rfc1071_with_pseudo_header(&pseudo, udp), 0);
            });
    }
}
