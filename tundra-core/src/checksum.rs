// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The checksum engine.
//!
//! TCP and UDP have no [`net::checksum::Checksum`] trait implementation in the `net`
//! crate (only `Ipv4` and `Icmp4` do), so this module works directly over raw byte
//! slices and pseudo-headers, matching what every translated protocol needs uniformly.
//! The incremental-update math mirrors `net::checksum::Checksum`'s RFC 1624 default
//! methods, generalized here to operate over an arbitrary span of changed bytes rather
//! than one pre-identified 16- or 32-bit field.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Sum a byte slice as a sequence of big-endian 16-bit words, returning the raw (not yet
/// folded or complemented) 32-bit accumulator. An odd trailing byte is treated as the
/// high byte of a final word padded with zero, per RFC 1071 §4.1.
fn sum16(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

/// Fold a 32-bit accumulator down to 16 bits, carrying the overflow back in (RFC 1071
/// §4.1), then return its one's complement.
fn fold_and_complement(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    #[allow(clippy::cast_possible_truncation)] // folded to 16 bits above
    let folded = sum as u16;
    !folded
}

/// Compute the RFC 1071 Internet checksum of `data`.
///
/// The caller is responsible for zeroing any existing checksum field within `data`
/// before calling this (the checksum field must read as zero while it is itself being
/// computed), and for having already appended or otherwise accounted for any pseudo-
/// header bytes that participate in the sum (see [`ipv4_pseudo_header`] and
/// [`ipv6_pseudo_header`]).
#[must_use]
pub fn rfc1071(data: &[u8]) -> u16 {
    fold_and_complement(sum16(data))
}

/// Compute the checksum of an IPv4 header (the fixed 20 bytes plus any options), with
/// the header checksum field read as zero regardless of its actual contents.
///
/// # Panics
///
/// Panics if `header` is shorter than 20 bytes or its length is not a multiple of 4;
/// both are invariant violations for a well-formed IPv4 header, never caller conditions
/// this function is expected to validate.
#[must_use]
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    assert!(header.len() >= 20 && header.len() % 4 == 0);
    let mut sum = sum16(&header[..10]);
    sum += sum16(&header[12..header.len()]);
    fold_and_complement(sum)
}

/// Build the 12-byte RFC 793/768 IPv4 pseudo-header used by TCP and UDP checksums.
#[must_use]
pub fn ipv4_pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, upper_layer_len: u16) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&src.octets());
    buf[4..8].copy_from_slice(&dst.octets());
    buf[8] = 0;
    buf[9] = protocol;
    buf[10..12].copy_from_slice(&upper_layer_len.to_be_bytes());
    buf
}

/// Build the 40-byte RFC 8200 §8.1 IPv6 pseudo-header used by TCP, UDP and ICMPv6
/// checksums.
#[must_use]
pub fn ipv6_pseudo_header(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    next_header: u8,
    upper_layer_len: u32,
) -> [u8; 40] {
    let mut buf = [0u8; 40];
    buf[0..16].copy_from_slice(&src.octets());
    buf[16..32].copy_from_slice(&dst.octets());
    buf[32..36].copy_from_slice(&upper_layer_len.to_be_bytes());
    buf[39] = next_header;
    buf
}

/// Compute an upper-layer (TCP/UDP/ICMPv6) checksum over a pseudo-header followed by
/// the upper-layer segment itself, with the segment's checksum field read as zero.
#[must_use]
pub fn rfc1071_with_pseudo_header(pseudo_header: &[u8], segment: &[u8]) -> u16 {
    let mut sum = sum16(pseudo_header);
    sum += sum16(segment);
    fold_and_complement(sum)
}

/// Apply an RFC 1624 incremental checksum update: given the checksum that was valid for
/// `old_bytes`, compute the checksum that is valid after replacing those bytes in place
/// with `new_bytes`.
///
/// `old_bytes` and `new_bytes` each describe an aligned sequence of complete 16-bit words
/// (e.g. a 4-byte address, or a single changed 2-byte field) and must individually have
/// even length, but — per `spec.md` §4.1's "generalized over multi-word deltas" — they
/// need *not* be the same length as each other: RFC 1624 Eqn. 4 sums the old and new
/// regions independently, so this is exactly what lets a 4→6 pseudo-header swap (12
/// IPv4-pseudo-header bytes out, 40 IPv6-pseudo-header bytes in) go through the same
/// incremental path as an address-for-address swap within one family.
///
/// # Panics
///
/// Panics if either slice has odd length; a programmer error at the call site, not an
/// operational condition.
#[must_use]
pub fn incremental(old_checksum: u16, old_bytes: &[u8], new_bytes: &[u8]) -> u16 {
    assert_eq!(old_bytes.len() % 2, 0);
    assert_eq!(new_bytes.len() % 2, 0);

    // HC' = ~(~HC + sum(~m) + sum(m'))  (RFC 1624 Eqn. 4), applied one word at a time.
    let mut acc = u32::from(!old_checksum);
    for old_word in old_bytes.chunks_exact(2) {
        let m = u32::from(u16::from_be_bytes([old_word[0], old_word[1]]));
        acc += (!m) & 0xFFFF;
    }
    for new_word in new_bytes.chunks_exact(2) {
        let m_prime = u32::from(u16::from_be_bytes([new_word[0], new_word[1]]));
        acc += m_prime;
    }
    fold_and_complement(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1071_of_empty_is_all_ones() {
        assert_eq!(rfc1071(&[]), 0xFFFF);
    }

    #[test]
    fn rfc1071_known_vector() {
        // RFC 1071 §3's worked example.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(rfc1071(&data), 0x224d);
    }

    #[test]
    fn ipv4_header_checksum_zero_field_round_trips() {
        #[rustfmt::skip]
        let mut header: [u8; 20] = [
            0x45, 0x00, 0x00, 0x3c,
            0x1c, 0x46, 0x40, 0x00,
            0x40, 0x06, 0x00, 0x00,
            0xac, 0x10, 0x0a, 0x63,
            0xac, 0x10, 0x0a, 0x0c,
        ];
        let checksum = ipv4_header_checksum(&header);
        header[10..12].copy_from_slice(&checksum.to_be_bytes());
        assert_eq!(ipv4_header_checksum(&header), 0);
    }

    #[test]
    fn incremental_matches_full_recompute_for_address_change() {
        #[rustfmt::skip]
        let mut header: [u8; 20] = [
            0x45, 0x00, 0x00, 0x3c,
            0x1c, 0x46, 0x40, 0x00,
            0x40, 0x06, 0x00, 0x00,
            0xac, 0x10, 0x0a, 0x63,
            0xac, 0x10, 0x0a, 0x0c,
        ];
        let original_checksum = ipv4_header_checksum(&header);
        header[10..12].copy_from_slice(&original_checksum.to_be_bytes());

        let old_dst = [header[16], header[17], header[18], header[19]];
        let new_dst = [203, 0, 113, 55];

        let updated = incremental(original_checksum, &old_dst, &new_dst);

        header[16..20].copy_from_slice(&new_dst);
        header[10..12].copy_from_slice(&[0, 0]);
        let recomputed = ipv4_header_checksum(&header);

        assert_eq!(updated, recomputed);
    }

    #[test]
    fn incremental_handles_pseudo_header_family_swap() {
        let src4 = Ipv4Addr::new(192, 0, 2, 1);
        let dst4 = Ipv4Addr::new(198, 51, 100, 10);
        let segment = [0u8; 16]; // UDP header, checksum field zeroed
        let old_pseudo = ipv4_pseudo_header(src4, dst4, 17, 16);
        let old_checksum = rfc1071_with_pseudo_header(&old_pseudo, &segment);

        let src6 = Ipv6Addr::new(0x64, 0xff9b, 0, 0, 0, 0, 0xc000, 0x0201);
        let dst6 = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        let new_pseudo = ipv6_pseudo_header(src6, dst6, 17, 16);

        let updated = incremental(old_checksum, &old_pseudo, &new_pseudo);
        let recomputed = rfc1071_with_pseudo_header(&new_pseudo, &segment);
        assert_eq!(updated, recomputed);
    }

    #[test]
    fn pseudo_header_checksum_is_stable_under_equivalent_framing() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let ph = ipv4_pseudo_header(src, dst, 6, 20);
        let segment = [0u8; 20];
        let checksum = rfc1071_with_pseudo_header(&ph, &segment);
        assert_ne!(checksum, 0);
    }

    /// Force a byte vector to an even length by dropping a trailing odd byte;
    /// [`incremental`] only accepts whole 16-bit-word regions.
    fn even_length(bytes: &[u8]) -> Vec<u8> {
        let mut bytes = bytes.to_vec();
        if bytes.len() % 2 != 0 {
            bytes.pop();
        }
        bytes
    }

    /// P4: the incremental update equals a full recomputation for any pair of packets
    /// differing only in header bytes, fuzzed over random header/payload shapes.
    #[test]
    fn incremental_matches_full_recompute_fuzzed() {
        bolero::check!()
            .with_type()
            .for_each(|(old_header, new_header, payload): &(Vec<u8>, Vec<u8>, Vec<u8>)| {
                let old_header = even_length(old_header);
                let new_header = even_length(new_header);

                let mut old_packet = old_header.clone();
                old_packet.extend_from_slice(payload);
                let old_checksum = rfc1071(&old_packet);

                let mut new_packet = new_header.clone();
                new_packet.extend_from_slice(payload);
                let new_checksum_full = rfc1071(&new_packet);

                let updated = incremental(old_checksum, &old_header, &new_header);
                assert_eq!(updated, new_checksum_full);
            });
    }
}
