// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ICMPv4↔ICMPv6 sub-translation (C5), per RFC 7915 §4/§5.
//!
//! Every translatable ICMP error type quotes part of the packet that triggered it. That
//! quoted "offending packet" is itself IP + maybe transport header and must be re-framed
//! across address families one level deep, without recursing into whatever ICMP message
//! it might itself contain. This module does that with a fixed 64-byte scratch region
//! (`EmbeddedHeader`) for the re-framed inner header, concatenated with a zero-copy view
//! of whatever inner bytes follow it — mirroring the original's `out_icmpv6_message_data`
//! record (`start` + `end_ptr` + sizes) rather than building the quoted payload in one
//! contiguous allocation.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::checksum;
use crate::config::Config;
use crate::error::PacketDrop;

const ICMPV4_HEADER_LEN: usize = 8;
const ICMPV6_HEADER_LEN: usize = 8;

const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV4_DEST_UNREACHABLE: u8 = 3;
const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_TIME_EXCEEDED: u8 = 11;
const ICMPV4_PARAMETER_PROBLEM: u8 = 12;

const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_PACKET_TOO_BIG: u8 = 2;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_PARAMETER_PROBLEM: u8 = 4;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// The re-framed inner header plus a zero-copy view of whatever bytes follow it in the
/// original (untranslated) offending packet.
///
/// `start_len` is always a multiple of 8, per ICMP's requirement that the quoted data
/// length be a multiple of 8 octets (RFC 792).
struct EmbeddedHeader<'a> {
    start: [u8; 64],
    start_len: usize,
    tail: &'a [u8],
}

impl EmbeddedHeader<'_> {
    fn total_len(&self) -> usize {
        self.start_len + self.tail.len()
    }

    /// Write `start` followed by `tail` into `out`, truncating to `out.len()` if the
    /// combined length would overflow it (the 1280/576-byte caps are enforced by the
    /// caller, which sizes `out` accordingly).
    fn write_into(&self, out: &mut [u8]) -> usize {
        let n = self.total_len().min(out.len());
        let start_n = self.start_len.min(n);
        out[..start_n].copy_from_slice(&self.start[..start_n]);
        let tail_n = n - start_n;
        out[start_n..start_n + tail_n].copy_from_slice(&self.tail[..tail_n]);
        n
    }
}

/// Re-frame the IPv4 header at the start of `inner` (the offending packet quoted inside
/// an ICMPv4 error) as an IPv6 header, leaving everything after the fixed 20-byte header
/// as an unmodified tail view.
///
/// Returns `None` if `inner` is too short to contain a full IPv4 header; the caller falls
/// back to copying `inner` through unmodified when policy allows.
fn embed_ipv4_as_ipv6(inner: &[u8]) -> Option<EmbeddedHeader<'_>> {
    if inner.len() < 20 {
        return None;
    }
    let ihl = usize::from(inner[0] & 0x0F) * 4;
    if ihl < 20 || ihl > inner.len() {
        return None;
    }

    let mut start = [0u8; 64];
    start[0] = 0x60;
    start[6] = if inner[9] == 1 { 58 } else { inner[9] };
    let ttl = inner[8];
    start[7] = ttl.saturating_sub(1);
    let src = Ipv4Addr::new(inner[12], inner[13], inner[14], inner[15]);
    let dst = Ipv4Addr::new(inner[16], inner[17], inner[18], inner[19]);
    start[8..24].copy_from_slice(&crate::addr::compose(&well_known_fallback_prefix(), src).octets());
    start[24..40].copy_from_slice(&crate::addr::compose(&well_known_fallback_prefix(), dst).octets());

    let after_header = &inner[ihl..];
    let tail_budget = (64 - 40) - ((64 - 40) % 8); // 24 bytes, already a multiple of 8
    let copied = after_header.len().min(tail_budget);
    start[40..40 + copied].copy_from_slice(&after_header[..copied]);
    let payload_length = after_header.len().min(usize::from(u16::MAX));
    #[allow(clippy::cast_possible_truncation)]
    start[4..6].copy_from_slice(&(payload_length as u16).to_be_bytes());
    let start_len = 40 + copied;

    Some(EmbeddedHeader {
        start,
        start_len,
        tail: &after_header[copied..],
    })
}

/// Re-frame the IPv6 header at the start of `inner` as an IPv4 header, analogous to
/// [`embed_ipv4_as_ipv6`].
fn embed_ipv6_as_ipv4(inner: &[u8]) -> Option<EmbeddedHeader<'_>> {
    if inner.len() < 40 {
        return None;
    }

    let mut start = [0u8; 64];
    start[0] = 0x45;
    let next_header = inner[6];
    let protocol = if next_header == 58 { 1 } else { next_header };
    start[9] = protocol;
    let hop_limit = inner[7];
    start[8] = hop_limit.saturating_sub(1);
    let src6 = Ipv6Addr::from({
        let mut o = [0u8; 16];
        o.copy_from_slice(&inner[8..24]);
        o
    });
    let dst6 = Ipv6Addr::from({
        let mut o = [0u8; 16];
        o.copy_from_slice(&inner[24..40]);
        o
    });
    let src4 = crate::addr::decompose(&well_known_fallback_prefix(), src6).ok()?;
    let dst4 = crate::addr::decompose(&well_known_fallback_prefix(), dst6).ok()?;
    start[12..16].copy_from_slice(&src4.octets());
    start[16..20].copy_from_slice(&dst4.octets());

    let after_header = &inner[40..];
    let tail_budget = 24usize;
    let copied = after_header.len().min(tail_budget);
    start[20..20 + copied].copy_from_slice(&after_header[..copied]);
    let total_len = (20 + after_header.len()).min(usize::from(u16::MAX));
    #[allow(clippy::cast_possible_truncation)]
    start[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    let checksum = checksum::ipv4_header_checksum(&start[..20]);
    start[10..12].copy_from_slice(&checksum.to_be_bytes());
    let start_len = 20 + copied;

    Some(EmbeddedHeader {
        start,
        start_len,
        tail: &after_header[copied..],
    })
}

/// Placeholder prefix used only to reconstruct *some* embeddable address for an offending
/// packet's quoted header when the enclosing translation's real prefix is not threaded
/// through this deep; the embedded addresses are diagnostic quoting, never forwarded or
/// matched against policy, so the well-known prefix is an acceptable stand-in. Real
/// per-mode prefixes are applied by [`super::xlat`] to the outer packet.
fn well_known_fallback_prefix() -> crate::config::Ipv6Prefix {
    crate::config::Ipv6Prefix::well_known()
}

fn map_icmpv4_pointer_to_icmpv6(pointer: u8) -> Option<u32> {
    match pointer {
        0 => Some(0),
        1 => Some(1),
        2 | 3 => Some(4),
        8 => Some(7),
        9 => Some(6),
        12..=15 => Some(8 + u32::from(pointer - 12)),
        16..=19 => Some(24 + u32::from(pointer - 16)),
        _ => None,
    }
}

fn map_icmpv6_pointer_to_icmpv4(pointer: u32) -> Option<u8> {
    match pointer {
        0 => Some(0),
        1 => Some(1),
        4 | 5 => Some(2),
        6 => Some(9),
        7 => Some(8),
        8..=23 => Some(12 + u8::try_from(pointer - 8).ok()?),
        24..=39 => Some(16 + u8::try_from(pointer - 24).ok()?),
        _ => None,
    }
}

/// Translate an ICMPv4 message (`payload`, starting at the ICMP header) into ICMPv6,
/// writing the result into `out` and returning the number of bytes written.
///
/// `out` must already be sized to the caller's 1280-byte budget; `link_mtu_ipv6` is used
/// to clamp a translated Packet-Too-Big MTU.
///
/// # Errors
///
/// Returns [`PacketDrop::UntranslatableIcmpType`] for message types RFC 7915 has no
/// mapping for (redirects, router/neighbor discovery, etc.), and
/// [`PacketDrop::MalformedUpperLayer`] if `payload` is shorter than an ICMP header.
pub fn translate_icmpv4_to_icmpv6(payload: &[u8], config: &Config, out: &mut [u8]) -> Result<usize, PacketDrop> {
    if payload.len() < ICMPV4_HEADER_LEN {
        return Err(PacketDrop::MalformedUpperLayer("icmpv4 header truncated"));
    }
    let icmp_type = payload[0];
    let code = payload[1];
    let rest = &payload[4..8];
    let inner = &payload[8..];

    let (out_type, out_code, out_rest): (u8, u8, [u8; 4]) = match icmp_type {
        ICMPV4_ECHO_REQUEST => (ICMPV6_ECHO_REQUEST, 0, [rest[0], rest[1], rest[2], rest[3]]),
        ICMPV4_ECHO_REPLY => (ICMPV6_ECHO_REPLY, 0, [rest[0], rest[1], rest[2], rest[3]]),
        ICMPV4_DEST_UNREACHABLE => match code {
            0 | 1 => (ICMPV6_DEST_UNREACHABLE, 0, [0; 4]),
            3 => (ICMPV6_DEST_UNREACHABLE, 4, [0; 4]),
            4 => {
                let advertised_mtu = u16::from_be_bytes([rest[2], rest[3]]);
                let mtu = u32::from(advertised_mtu.saturating_add(20))
                    .max(1280)
                    .min(u32::from(config.effective_link_mtu_ipv6()));
                (ICMPV6_PACKET_TOO_BIG, 0, mtu.to_be_bytes())
            }
            9 | 10 | 13 => (ICMPV6_DEST_UNREACHABLE, 1, [0; 4]),
            _ => return Err(PacketDrop::UntranslatableIcmpType(icmp_type)),
        },
        ICMPV4_TIME_EXCEEDED => (ICMPV6_TIME_EXCEEDED, code, [0; 4]),
        ICMPV4_PARAMETER_PROBLEM => {
            if code != 0 {
                return Err(PacketDrop::UntranslatableIcmpType(icmp_type));
            }
            let Some(pointer) = map_icmpv4_pointer_to_icmpv6(rest[0]) else {
                return Err(PacketDrop::UntranslatableIcmpType(icmp_type));
            };
            (ICMPV6_PARAMETER_PROBLEM, 0, pointer.to_be_bytes())
        }
        _ => return Err(PacketDrop::UntranslatableIcmpType(icmp_type)),
    };

    let is_error = !matches!(icmp_type, ICMPV4_ECHO_REQUEST | ICMPV4_ECHO_REPLY);
    let quoted_len = if is_error {
        let embedded = embed_ipv4_as_ipv6(inner);
        match embedded {
            Some(embedded) => embedded.write_into(&mut out[ICMPV6_HEADER_LEN..]),
            None if config.generate_checksums_for_untranslatable_icmp => {
                // Offending packet too short to re-frame; quote it raw rather than drop.
                let n = inner.len().min(out.len() - ICMPV6_HEADER_LEN);
                out[ICMPV6_HEADER_LEN..ICMPV6_HEADER_LEN + n].copy_from_slice(&inner[..n]);
                n
            }
            None => return Err(PacketDrop::MalformedUpperLayer("embedded offending packet too short")),
        }
    } else {
        let n = inner.len().min(out.len() - ICMPV6_HEADER_LEN);
        out[ICMPV6_HEADER_LEN..ICMPV6_HEADER_LEN + n].copy_from_slice(&inner[..n]);
        n
    };

    out[0] = out_type;
    out[1] = out_code;
    out[2] = 0;
    out[3] = 0;
    out[4..8].copy_from_slice(&out_rest);
    Ok(ICMPV6_HEADER_LEN + quoted_len)
}

/// Translate an ICMPv6 message into ICMPv4, symmetric to
/// [`translate_icmpv4_to_icmpv6`].
///
/// # Errors
///
/// Returns [`PacketDrop::UntranslatableIcmpType`] for message types with no ICMPv4
/// mapping, and [`PacketDrop::MalformedUpperLayer`] if `payload` is shorter than an ICMP
/// header.
pub fn translate_icmpv6_to_icmpv4(payload: &[u8], config: &Config, out: &mut [u8]) -> Result<usize, PacketDrop> {
    if payload.len() < ICMPV6_HEADER_LEN {
        return Err(PacketDrop::MalformedUpperLayer("icmpv6 header truncated"));
    }
    let icmp_type = payload[0];
    let code = payload[1];
    let rest = &payload[4..8];
    let inner = &payload[8..];

    let (out_type, out_code, out_rest): (u8, u8, [u8; 4]) = match icmp_type {
        ICMPV6_ECHO_REQUEST => (ICMPV4_ECHO_REQUEST, 0, [rest[0], rest[1], rest[2], rest[3]]),
        ICMPV6_ECHO_REPLY => (ICMPV4_ECHO_REPLY, 0, [rest[0], rest[1], rest[2], rest[3]]),
        ICMPV6_DEST_UNREACHABLE => match code {
            0 | 2 | 3 => (ICMPV4_DEST_UNREACHABLE, 1, [0; 4]),
            1 => (ICMPV4_DEST_UNREACHABLE, 10, [0; 4]),
            4 => (ICMPV4_DEST_UNREACHABLE, 3, [0; 4]),
            _ => return Err(PacketDrop::UntranslatableIcmpType(icmp_type)),
        },
        ICMPV6_PACKET_TOO_BIG => {
            let advertised_mtu = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let mtu = u16::try_from(advertised_mtu.saturating_sub(20).min(u32::from(config.link_mtu_ipv4)))
                .unwrap_or(u16::MAX);
            let mut out_rest = [0u8; 4];
            out_rest[2..4].copy_from_slice(&mtu.to_be_bytes());
            (ICMPV4_DEST_UNREACHABLE, 4, out_rest)
        }
        ICMPV6_TIME_EXCEEDED => (ICMPV4_TIME_EXCEEDED, code, [0; 4]),
        ICMPV6_PARAMETER_PROBLEM => match code {
            0 => {
                let pointer = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
                let Some(pointer) = map_icmpv6_pointer_to_icmpv4(pointer) else {
                    return Err(PacketDrop::UntranslatableIcmpType(icmp_type));
                };
                let mut out_rest = [0u8; 4];
                out_rest[0] = pointer;
                (ICMPV4_PARAMETER_PROBLEM, 0, out_rest)
            }
            1 => (ICMPV4_DEST_UNREACHABLE, 2, [0; 4]),
            _ => return Err(PacketDrop::UntranslatableIcmpType(icmp_type)),
        },
        _ => return Err(PacketDrop::UntranslatableIcmpType(icmp_type)),
    };

    let is_error = !matches!(icmp_type, ICMPV6_ECHO_REQUEST | ICMPV6_ECHO_REPLY);
    let quoted_len = if is_error {
        match embed_ipv6_as_ipv4(inner) {
            Some(embedded) => embedded.write_into(&mut out[ICMPV4_HEADER_LEN..]),
            None if config.generate_checksums_for_untranslatable_icmp => {
                let n = inner.len().min(out.len() - ICMPV4_HEADER_LEN);
                out[ICMPV4_HEADER_LEN..ICMPV4_HEADER_LEN + n].copy_from_slice(&inner[..n]);
                n
            }
            None => return Err(PacketDrop::MalformedUpperLayer("embedded offending packet too short")),
        }
    } else {
        let n = inner.len().min(out.len() - ICMPV4_HEADER_LEN);
        out[ICMPV4_HEADER_LEN..ICMPV4_HEADER_LEN + n].copy_from_slice(&inner[..n]);
        n
    };

    out[0] = out_type;
    out[1] = out_code;
    out[2] = 0;
    out[3] = 0;
    out[4..8].copy_from_slice(&out_rest);
    Ok(ICMPV4_HEADER_LEN + quoted_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, IoMode, Ipv6Prefix, TranslationMode};

    fn test_config() -> Config {
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
            .expect("valid test config")
    }

    #[test]
    fn echo_request_translates_type_and_keeps_identifier() {
        let config = test_config();
        let payload = [8, 0, 0, 0, 0x12, 0x34, 0x00, 0x01];
        let mut out = [0u8; 1280];
        let n = translate_icmpv4_to_icmpv6(&payload, &config, &mut out).unwrap();
        assert_eq!(n, 8);
        assert_eq!(out[0], 128);
        assert_eq!(out[1], 0);
        assert_eq!(&out[4..8], &[0x12, 0x34, 0x00, 0x01]);
    }

    #[test]
    fn echo_reply_round_trips_back_to_icmpv4() {
        let config = test_config();
        let payload = [129, 0, 0, 0, 0x12, 0x34, 0x00, 0x01];
        let mut out = [0u8; 576];
        let n = translate_icmpv6_to_icmpv4(&payload, &config, &mut out).unwrap();
        assert_eq!(n, 8);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn unknown_type_is_untranslatable() {
        let config = test_config();
        let payload = [9, 0, 0, 0, 0, 0, 0, 0]; // router advertisement
        let mut out = [0u8; 1280];
        let err = translate_icmpv4_to_icmpv6(&payload, &config, &mut out).unwrap_err();
        assert!(matches!(err, PacketDrop::UntranslatableIcmpType(9)));
    }

    #[test]
    fn fragmentation_needed_becomes_packet_too_big_with_adjusted_mtu() {
        let config = test_config();
        let mut payload = vec![3, 4, 0, 0, 0, 0, 0, 0];
        payload[6..8].copy_from_slice(&1400u16.to_be_bytes());
        let mut out = [0u8; 1280];
        let n = translate_icmpv4_to_icmpv6(&payload, &config, &mut out).unwrap();
        assert_eq!(n, 8);
        assert_eq!(out[0], ICMPV6_PACKET_TOO_BIG);
        let mtu = u32::from_be_bytes([out[4], out[5], out[6], out[7]]);
        assert_eq!(mtu, 1420);
    }

    #[test]
    fn time_exceeded_quotes_translated_inner_header() {
        let config = test_config();
        let mut inner = vec![0u8; 28];
        inner[0] = 0x45;
        inner[8] = 64;
        inner[9] = 17;
        inner[12..16].copy_from_slice(&Ipv4Addr::new(192, 0, 2, 1).octets());
        inner[16..20].copy_from_slice(&Ipv4Addr::new(198, 51, 100, 1).octets());

        let mut payload = vec![11, 0, 0, 0, 0, 0, 0, 0];
        payload.extend_from_slice(&inner);

        let mut out = [0u8; 1280];
        let n = translate_icmpv4_to_icmpv6(&payload, &config, &mut out).unwrap();
        assert_eq!(out[0], ICMPV6_TIME_EXCEEDED);
        let inner_out = &out[8..n];
        assert_eq!(inner_out[0] >> 4, 6);
        assert_eq!(inner_out[7], 63); // hop limit decremented from the quoted inner ttl
    }
}
