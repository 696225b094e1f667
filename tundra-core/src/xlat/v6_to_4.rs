// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The 6→4 translator (C4): rewrite one IPv6 datagram in `ctx.in_buffer` as an IPv4
//! datagram in `ctx.out_buffer`, per RFC 7915 §5 and `spec.md` §4.5.
//!
//! Unlike the 4→6 direction, an IPv6 datagram may carry a chain of extension headers
//! before its upper-layer payload. [`walk_extension_headers`] follows that chain far
//! enough to classify the datagram (and to extract Fragment Header fields, when
//! present) without attempting to translate headers IPv4 has no notion of.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use net::ipv6::UnicastIpv6Addr;

use crate::addr;
use crate::checksum;
use crate::config::{Config, TranslationMode};
use crate::context::ThreadContext;
use crate::error::{PacketDrop, PolicyDrop, TranslateError};
use crate::icmp;

const IPV6_HEADER_LEN: usize = 40;
const NEXT_HEADER_HOP_BY_HOP: u8 = 0;
const NEXT_HEADER_ROUTING: u8 = 43;
const NEXT_HEADER_FRAGMENT: u8 = 44;
const NEXT_HEADER_DESTINATION_OPTIONS: u8 = 60;
const NEXT_HEADER_ICMPV6: u8 = 58;

const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

/// Fragment Header fields extracted while walking the extension header chain.
#[derive(Clone, Copy)]
struct FragmentInfo {
    identification: u16,
    offset_words: u16,
    more_fragments: bool,
}

/// The result of walking past every extension header this translator understands.
struct ExtensionWalk {
    upper_layer_protocol: u8,
    payload_offset: usize,
    fragment: Option<FragmentInfo>,
}

/// Translate the complete IPv6 datagram currently in `ctx.in_buffer` into an IPv4
/// datagram written to `ctx.out_buffer`.
///
/// # Errors
///
/// See [`PacketDrop`] and [`PolicyDrop`] for the conditions under which each is
/// returned.
pub fn translate(ctx: &mut ThreadContext) -> Result<(), TranslateError> {
    let config = Arc::clone(&ctx.config);

    let in_len = ctx.in_buffer.len();
    let packet = ctx.in_buffer.as_slice();
    if in_len < IPV6_HEADER_LEN {
        return Err(PacketDrop::TooShort { actual: in_len }.into());
    }
    let version = packet[0] >> 4;
    if version != 6 {
        return Err(PacketDrop::UnsupportedIpVersion(version).into());
    }
    let payload_len = usize::from(u16::from_be_bytes([packet[4], packet[5]]));
    if IPV6_HEADER_LEN + payload_len > in_len {
        return Err(PacketDrop::MalformedIpv6("payload length inconsistent with bytes read").into());
    }
    let total_len = IPV6_HEADER_LEN + payload_len;

    let traffic_class = ((packet[0] & 0x0F) << 4) | (packet[1] >> 4);
    let hop_limit = packet[7];
    let src6 = Ipv6Addr::from({
        let mut o = [0u8; 16];
        o.copy_from_slice(&packet[8..24]);
        o
    });
    let dst6 = Ipv6Addr::from({
        let mut o = [0u8; 16];
        o.copy_from_slice(&packet[24..40]);
        o
    });

    if UnicastIpv6Addr::new(src6).is_err() || UnicastIpv6Addr::new(dst6).is_err() {
        return Err(PacketDrop::ForbiddenAddress("multicast address presented as translation endpoint").into());
    }

    if hop_limit <= 1 {
        return Err(PolicyDrop::TtlExpired.into());
    }
    let ttl = hop_limit - 1;

    let mut walk = walk_extension_headers(packet, packet[6], IPV6_HEADER_LEN)?;
    if walk.payload_offset > total_len {
        return Err(PacketDrop::MalformedIpv6("extension header chain runs past payload length").into());
    }
    let fragment = walk.fragment.take();
    let upper_layer_protocol = walk.upper_layer_protocol;
    let payload_offset = walk.payload_offset;

    if let Some(fragment) = fragment {
        if !config.allow_forwarding_fragmented_packets {
            return Err(PacketDrop::FragmentationForbidden.into());
        }
        if fragment.offset_words != 0 {
            return finish_non_first_fragment(
                ctx,
                &config,
                traffic_class,
                ttl,
                src6,
                dst6,
                upper_layer_protocol,
                payload_offset,
                fragment,
                total_len,
            );
        }
    }

    let (src4, dst4) = synthesize_addresses(&config, src6, dst6)?;

    let protocol = if upper_layer_protocol == NEXT_HEADER_ICMPV6 { PROTO_ICMP } else { upper_layer_protocol };
    let dont_fragment = fragment.is_none();
    let (identification, more_fragments, fragment_offset_words) = match fragment {
        Some(f) => (f.identification, f.more_fragments, f.offset_words),
        None => (0, false, 0),
    };

    let packet = ctx.in_buffer.as_slice();
    let payload = &packet[payload_offset..total_len];

    let out = ctx.out_buffer.full_mut();
    let body_len = write_body(&config, protocol, upper_layer_protocol, src6, dst6, src4, dst4, payload, &mut out[20..])?;

    out[0] = 0x45;
    out[1] = if config.copy_dscp_and_flow_label { traffic_class } else { 0 };
    let total_out_len = 20 + body_len;
    #[allow(clippy::cast_possible_truncation)] // bounded by MTU_MAX
    out[2..4].copy_from_slice(&(total_out_len as u16).to_be_bytes());
    out[4..6].copy_from_slice(&identification.to_be_bytes());
    let flags_and_offset = (u16::from(dont_fragment) << 14) | (u16::from(more_fragments) << 13) | fragment_offset_words;
    out[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());
    out[8] = ttl;
    out[9] = protocol;
    out[10] = 0;
    out[11] = 0;
    out[12..16].copy_from_slice(&src4.octets());
    out[16..20].copy_from_slice(&dst4.octets());
    let header_checksum = checksum::ipv4_header_checksum(&out[..20]);
    out[10..12].copy_from_slice(&header_checksum.to_be_bytes());

    let link_mtu4 = usize::from(config.link_mtu_ipv4);
    if dont_fragment && total_out_len > link_mtu4 {
        #[allow(clippy::cast_possible_truncation)]
        let mtu = link_mtu4.min(usize::from(u16::MAX)) as u16;
        return Err(PolicyDrop::FragmentationNeeded { mtu }.into());
    }

    #[allow(clippy::expect_used)] // total_out_len <= MTU_MAX by construction
    ctx.out_buffer
        .set_len(total_out_len)
        .expect("translated ipv4 datagram fits in buffer capacity");
    Ok(())
}

/// Continuation fragments (offset != 0) carry no upper-layer header, so there is no
/// checksum to repair and no protocol-specific translation to apply: only the header
/// fields themselves move across families.
#[allow(clippy::too_many_arguments)]
fn finish_non_first_fragment(
    ctx: &mut ThreadContext,
    config: &Config,
    traffic_class: u8,
    ttl: u8,
    src6: Ipv6Addr,
    dst6: Ipv6Addr,
    upper_layer_protocol: u8,
    payload_offset: usize,
    fragment: FragmentInfo,
    total_len: usize,
) -> Result<(), TranslateError> {
    let (src4, dst4) = synthesize_addresses(config, src6, dst6)?;
    let protocol = if upper_layer_protocol == NEXT_HEADER_ICMPV6 { PROTO_ICMP } else { upper_layer_protocol };

    let in_len = ctx.in_buffer.len();
    let payload_end = total_len.min(in_len);
    let body_len = payload_end - payload_offset;

    let out = ctx.out_buffer.full_mut();
    out[0] = 0x45;
    out[1] = if config.copy_dscp_and_flow_label { traffic_class } else { 0 };
    let total_out_len = 20 + body_len;
    #[allow(clippy::cast_possible_truncation)]
    out[2..4].copy_from_slice(&(total_out_len as u16).to_be_bytes());
    out[4..6].copy_from_slice(&fragment.identification.to_be_bytes());
    let flags_and_offset = (u16::from(fragment.more_fragments) << 13) | fragment.offset_words;
    out[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());
    out[8] = ttl;
    out[9] = protocol;
    out[10] = 0;
    out[11] = 0;
    out[12..16].copy_from_slice(&src4.octets());
    out[16..20].copy_from_slice(&dst4.octets());
    let header_checksum = checksum::ipv4_header_checksum(&out[..20]);
    out[10..12].copy_from_slice(&header_checksum.to_be_bytes());

    out[20..20 + body_len].copy_from_slice(&ctx.in_buffer.as_slice()[payload_offset..payload_end]);

    #[allow(clippy::expect_used)]
    ctx.out_buffer
        .set_len(total_out_len)
        .expect("translated ipv4 fragment fits in buffer capacity");
    Ok(())
}

/// Walk past every IPv6 extension header this translator understands, starting from
/// `next_header` at `offset`, returning the upper-layer protocol and the offset its
/// header begins at.
///
/// # Errors
///
/// Returns [`PacketDrop::UnsupportedExtensionHeader`] for any header type outside
/// {Hop-by-hop, Routing, Fragment, Destination-Options}, [`PacketDrop::MalformedIpv6`] if
/// the chain runs past the end of the packet, and [`PolicyDrop::RoutingHeaderType0`] for
/// a Routing Header of type 0 with a nonzero Segments Left field.
fn walk_extension_headers(packet: &[u8], mut next_header: u8, mut offset: usize) -> Result<ExtensionWalk, TranslateError> {
    let mut fragment = None;
    const MAX_EXTENSION_HEADERS: usize = 8;

    for _ in 0..MAX_EXTENSION_HEADERS {
        match next_header {
            NEXT_HEADER_HOP_BY_HOP | NEXT_HEADER_DESTINATION_OPTIONS => {
                if offset + 2 > packet.len() {
                    return Err(PacketDrop::MalformedIpv6("extension header truncated").into());
                }
                let ext_next_header = packet[offset];
                let hdr_ext_len = usize::from(packet[offset + 1]);
                let header_len = (hdr_ext_len + 1) * 8;
                if offset + header_len > packet.len() {
                    return Err(PacketDrop::MalformedIpv6("extension header truncated").into());
                }
                next_header = ext_next_header;
                offset += header_len;
            }
            NEXT_HEADER_ROUTING => {
                if offset + 4 > packet.len() {
                    return Err(PacketDrop::MalformedIpv6("routing header truncated").into());
                }
                let ext_next_header = packet[offset];
                let hdr_ext_len = usize::from(packet[offset + 1]);
                let routing_type = packet[offset + 2];
                let segments_left = packet[offset + 3];
                let header_len = (hdr_ext_len + 1) * 8;
                if offset + header_len > packet.len() {
                    return Err(PacketDrop::MalformedIpv6("routing header truncated").into());
                }
                if routing_type == 0 && segments_left != 0 {
                    #[allow(clippy::cast_possible_truncation)]
                    let pointer_offset = (offset + 3) as u32;
                    return Err(PolicyDrop::RoutingHeaderType0 { offset: pointer_offset }.into());
                }
                if routing_type != 0 {
                    return Err(PacketDrop::UnsupportedExtensionHeader(NEXT_HEADER_ROUTING).into());
                }
                next_header = ext_next_header;
                offset += header_len;
            }
            NEXT_HEADER_FRAGMENT => {
                if offset + 8 > packet.len() {
                    return Err(PacketDrop::MalformedIpv6("fragment header truncated").into());
                }
                let ext_next_header = packet[offset];
                let offset_and_m = u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]);
                let identification = u32::from_be_bytes([
                    packet[offset + 4],
                    packet[offset + 5],
                    packet[offset + 6],
                    packet[offset + 7],
                ]);
                fragment = Some(FragmentInfo {
                    #[allow(clippy::cast_possible_truncation)]
                    identification: identification as u16,
                    offset_words: offset_and_m >> 3,
                    more_fragments: offset_and_m & 0x1 != 0,
                });
                next_header = ext_next_header;
                offset += 8;
            }
            _ => {
                return Ok(ExtensionWalk {
                    upper_layer_protocol: next_header,
                    payload_offset: offset,
                    fragment,
                });
            }
        }
    }
    Err(PacketDrop::MalformedIpv6("extension header chain too long").into())
}

/// Resolve the outer IPv4 source/destination for the active mode, mirroring
/// [`super::v4_to_v6::translate`]'s address resolution in the opposite direction.
///
/// # Errors
///
/// Returns [`PacketDrop::AddressNotEmbeddable`] if a prefix-composed address does not
/// decompose under the configured prefix, and [`PacketDrop::ForbiddenAddress`] if CLAT
/// mode has no fixed destination configured.
fn synthesize_addresses(config: &Config, src6: Ipv6Addr, dst6: Ipv6Addr) -> Result<(Ipv4Addr, Ipv4Addr), PacketDrop> {
    match config.mode {
        TranslationMode::Nat64 => {
            let src4 = config.translator_ipv4;
            let dst4 = addr::decompose(&config.ipv6_prefix, dst6).map_err(|_| PacketDrop::AddressNotEmbeddable)?;
            Ok((src4, dst4))
        }
        TranslationMode::Clat => {
            let src4 = addr::decompose(&config.ipv6_prefix, src6).map_err(|_| PacketDrop::AddressNotEmbeddable)?;
            let dst4 = config
                .single_translation_ipv4
                .ok_or(PacketDrop::ForbiddenAddress("clat mode requires single_translation_ipv4"))?;
            Ok((src4, dst4))
        }
        TranslationMode::Siit => {
            let src4 = addr::decompose(&config.ipv6_prefix, src6).map_err(|_| PacketDrop::AddressNotEmbeddable)?;
            let dst4 = addr::decompose(&config.ipv6_prefix, dst6).map_err(|_| PacketDrop::AddressNotEmbeddable)?;
            Ok((src4, dst4))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_body(
    config: &Config,
    protocol: u8,
    original_next_header: u8,
    src6: Ipv6Addr,
    dst6: Ipv6Addr,
    src4: Ipv4Addr,
    dst4: Ipv4Addr,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, PacketDrop> {
    match protocol {
        PROTO_ICMP => {
            let body_len = icmp::translate_icmpv6_to_icmpv4(payload, config, out)?;
            let icmp_checksum = checksum::rfc1071(&out[..body_len]);
            out[2..4].copy_from_slice(&icmp_checksum.to_be_bytes());
            Ok(body_len)
        }
        PROTO_TCP => {
            if payload.len() < 20 {
                return Err(PacketDrop::MalformedUpperLayer("tcp header truncated"));
            }
            out[..payload.len()].copy_from_slice(payload);
            let old_checksum = u16::from_be_bytes([payload[16], payload[17]]);
            let old_pseudo = checksum::ipv6_pseudo_header(src6, dst6, original_next_header, payload.len() as u32);
            #[allow(clippy::cast_possible_truncation)]
            let new_pseudo = checksum::ipv4_pseudo_header(src4, dst4, PROTO_TCP, payload.len() as u16);
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
            let old_pseudo = checksum::ipv6_pseudo_header(src6, dst6, original_next_header, payload.len() as u32);
            #[allow(clippy::cast_possible_truncation)]
            let new_pseudo = checksum::ipv4_pseudo_header(src4, dst4, PROTO_UDP, payload.len() as u16);
            // UDP/IPv6 never carries a zero checksum (RFC 8200), so the "compute in full"
            // special case only exists on the 4→6 side; here the incremental update
            // always has a valid starting checksum to work from.
            let new_checksum = checksum::incremental(old_checksum, &old_pseudo, &new_pseudo);
            out[6..8].copy_from_slice(&new_checksum.to_be_bytes());
            Ok(payload.len())
        }
        other => Err(PacketDrop::UnsupportedProtocol(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, IoMode, Ipv6Prefix};
    use crate::context::ThreadContext;
    use std::fs::File;

    fn siit_config() -> Arc<Config> {
        Arc::new(
            ConfigBuilder::default()
                .mode(TranslationMode::Siit)
                .translator_ipv4(Ipv4Addr::new(203, 0, 113, 1))
                .translator_ipv6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))
                .ipv6_prefix(Ipv6Prefix::well_known())
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

    fn build_udp_ipv6(src: Ipv6Addr, dst: Ipv6Addr, hop_limit: u8, udp_payload: &[u8]) -> Vec<u8> {
        let udp_len = 8 + udp_payload.len();
        let mut packet = vec![0u8; 40 + udp_len];
        packet[0] = 0x60;
        #[allow(clippy::cast_possible_truncation)]
        packet[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        packet[6] = 17;
        packet[7] = hop_limit;
        packet[8..24].copy_from_slice(&src.octets());
        packet[24..40].copy_from_slice(&dst.octets());
        packet[40..42].copy_from_slice(&12345u16.to_be_bytes());
        packet[42..44].copy_from_slice(&53u16.to_be_bytes());
        #[allow(clippy::cast_possible_truncation)]
        packet[44..46].copy_from_slice(&(udp_len as u16).to_be_bytes());
        packet[48..48 + udp_payload.len()].copy_from_slice(udp_payload);
        let pseudo = checksum::ipv6_pseudo_header(src, dst, 17, udp_len as u32);
        let udp_checksum = checksum::rfc1071_with_pseudo_header(&pseudo, &packet[40..40 + udp_len]);
        packet[46..48].copy_from_slice(&udp_checksum.to_be_bytes());
        packet
    }

    #[test]
    fn plain_udp_siit_translates_addresses_and_recomputes_checksum() {
        let config = siit_config();
        let mut ctx = test_ctx(config);
        let src = addr::compose(&Ipv6Prefix::well_known(), Ipv4Addr::new(192, 0, 2, 1));
        let dst = addr::compose(&Ipv6Prefix::well_known(), Ipv4Addr::new(198, 51, 100, 10));
        let packet = build_udp_ipv6(src, dst, 64, &[0u8; 40]);
        ctx.in_buffer.fill_from(&packet).expect("fits");

        translate(&mut ctx).expect("translation succeeds");

        let out = ctx.out_buffer.as_slice();
        assert_eq!(out[0] >> 4, 4);
        assert_eq!(&out[12..16], &[192, 0, 2, 1]);
        assert_eq!(&out[16..20], &[198, 51, 100, 10]);
        assert_eq!(out[8], 63);
        assert_eq!(out[9], 17);
        assert_eq!(checksum::ipv4_header_checksum(&out[..20]), 0);
        assert!(out[6] & 0x40 != 0); // DF set: no fragment header on input
    }

    #[test]
    fn expired_hop_limit_is_a_policy_drop() {
        let config = siit_config();
        let mut ctx = test_ctx(config);
        let src = Ipv6Addr::new(0x0064, 0xff9b, 0, 0, 0, 0, 0xc000, 0x0201);
        let dst = Ipv6Addr::new(0x0064, 0xff9b, 0, 0, 0, 0, 0xc633, 0x640a);
        let packet = build_udp_ipv6(src, dst, 1, &[0u8; 8]);
        ctx.in_buffer.fill_from(&packet).expect("fits");
        let err = translate(&mut ctx).unwrap_err();
        assert!(matches!(err, TranslateError::Policy(PolicyDrop::TtlExpired)));
    }

    #[test]
    fn routing_header_type0_with_segments_left_is_policy_drop() {
        let config = siit_config();
        let mut ctx = test_ctx(config);
        let src = Ipv6Addr::new(0x0064, 0xff9b, 0, 0, 0, 0, 0xc000, 0x0201);
        let dst = Ipv6Addr::new(0x0064, 0xff9b, 0, 0, 0, 0, 0xc633, 0x640a);
        let mut packet = vec![0u8; 40 + 8 + 8];
        packet[0] = 0x60;
        packet[4..6].copy_from_slice(&16u16.to_be_bytes());
        packet[6] = NEXT_HEADER_ROUTING;
        packet[7] = 64;
        packet[8..24].copy_from_slice(&src.octets());
        packet[24..40].copy_from_slice(&dst.octets());
        packet[40] = 17; // next header after routing: UDP
        packet[41] = 0; // hdr_ext_len
        packet[42] = 0; // routing type 0
        packet[43] = 1; // segments_left != 0
        ctx.in_buffer.fill_from(&packet).expect("fits");

        let err = translate(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::Policy(PolicyDrop::RoutingHeaderType0 { offset: 43 })
        ));
    }

    #[test]
    fn fragment_header_is_translated_to_ipv4_fragment_fields() {
        let config = siit_config();
        let mut ctx = test_ctx(config);
        let src = addr::compose(&Ipv6Prefix::well_known(), Ipv4Addr::new(192, 0, 2, 1));
        let dst = addr::compose(&Ipv6Prefix::well_known(), Ipv4Addr::new(198, 51, 100, 10));
        let udp_payload = [0u8; 40];
        let udp_len = 8 + udp_payload.len();
        let mut packet = vec![0u8; 40 + 8 + udp_len];
        packet[0] = 0x60;
        #[allow(clippy::cast_possible_truncation)]
        packet[4..6].copy_from_slice(&((8 + udp_len) as u16).to_be_bytes());
        packet[6] = NEXT_HEADER_FRAGMENT;
        packet[7] = 64;
        packet[8..24].copy_from_slice(&src.octets());
        packet[24..40].copy_from_slice(&dst.octets());
        packet[40] = 17; // next header: UDP
        packet[41] = 0; // reserved
        packet[42..44].copy_from_slice(&0u16.to_be_bytes()); // offset 0, M=0 (first and only fragment)
        packet[44..48].copy_from_slice(&0xCAFEu32.to_be_bytes());
        packet[48..50].copy_from_slice(&12345u16.to_be_bytes());
        packet[50..52].copy_from_slice(&53u16.to_be_bytes());
        #[allow(clippy::cast_possible_truncation)]
        packet[52..54].copy_from_slice(&(udp_len as u16).to_be_bytes());
        let pseudo = checksum::ipv6_pseudo_header(src, dst, 17, udp_len as u32);
        let udp_checksum = checksum::rfc1071_with_pseudo_header(&pseudo, &packet[48..48 + udp_len]);
        packet[54..56].copy_from_slice(&udp_checksum.to_be_bytes());
        ctx.in_buffer.fill_from(&packet).expect("fits");

        translate(&mut ctx).expect("translation succeeds");
        let out = ctx.out_buffer.as_slice();
        assert_eq!(out[4..6], 0xCAFEu16.to_be_bytes());
        assert_eq!(out[6] & 0x40, 0); // DF clear: fragment header was present
    }
}
