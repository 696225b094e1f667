// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Output-path fragmentation.
//!
//! Both translators always produce one complete, unfragmented datagram in `out_buffer`;
//! splitting it across the wire, if it is too large for the egress link, is purely a
//! function of the already-translated bytes and belongs with [`crate::io`] rather than
//! with the translators themselves (`spec.md` §4.3).

/// Split an IPv4 datagram into 8-byte-aligned fragments no larger than `mtu`.
///
/// Returns `vec![packet.to_vec()]` unchanged if it already fits, or if it is too short
/// to carry a parseable header (the caller has already validated the input, so this is
/// purely defensive). The original header (including any options) is reused verbatim in
/// every fragment; only the length, flags/offset, and header checksum fields differ.
#[must_use]
pub fn fragment_ipv4(packet: &[u8], mtu: usize) -> Vec<Vec<u8>> {
    if packet.len() < 20 {
        return vec![packet.to_vec()];
    }
    let ihl = usize::from(packet[0] & 0x0F) * 4;
    if ihl < 20 || ihl > packet.len() {
        return vec![packet.to_vec()];
    }
    let header = &packet[..ihl];
    let payload = &packet[ihl..];
    let max_payload = (mtu.saturating_sub(ihl) / 8) * 8;
    if max_payload == 0 || payload.len() + ihl <= mtu {
        return vec![packet.to_vec()];
    }

    let mut fragments = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() {
        let end = (offset + max_payload).min(payload.len());
        let chunk = &payload[offset..end];
        let more = end < payload.len();

        let mut frag = Vec::with_capacity(ihl + chunk.len());
        frag.extend_from_slice(header);
        frag.extend_from_slice(chunk);

        #[allow(clippy::cast_possible_truncation)] // bounded by mtu <= MTU_MAX
        let total_len = (ihl + chunk.len()) as u16;
        frag[2..4].copy_from_slice(&total_len.to_be_bytes());

        #[allow(clippy::cast_possible_truncation)] // offset/8 fits 13 bits given MTU_MAX bound
        let offset_units = (offset / 8) as u16;
        let flags_and_offset = (u16::from(more) << 13) | (offset_units & 0x1FFF);
        frag[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());

        frag[10] = 0;
        frag[11] = 0;
        let checksum = crate::checksum::ipv4_header_checksum(&frag[..ihl]);
        frag[10..12].copy_from_slice(&checksum.to_be_bytes());

        fragments.push(frag);
        offset = end;
    }
    fragments
}

/// Split an IPv6 datagram into fragments carrying a Fragment Header (RFC 8200 §4.5), no
/// larger than `mtu` each, assigning `identifier` to every fragment in the series.
#[must_use]
pub fn fragment_ipv6(packet: &[u8], mtu: usize, identifier: u32) -> Vec<Vec<u8>> {
    const FIXED_HEADER_LEN: usize = 40;
    const FRAGMENT_HEADER_LEN: usize = 8;

    if packet.len() < FIXED_HEADER_LEN {
        return vec![packet.to_vec()];
    }
    let header = &packet[..FIXED_HEADER_LEN];
    let original_next_header = packet[6];
    let payload = &packet[FIXED_HEADER_LEN..];

    if payload.len() + FIXED_HEADER_LEN <= mtu {
        return vec![packet.to_vec()];
    }
    let max_payload = (mtu.saturating_sub(FIXED_HEADER_LEN + FRAGMENT_HEADER_LEN) / 8) * 8;
    if max_payload == 0 {
        return vec![packet.to_vec()];
    }

    let mut fragments = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() {
        let end = (offset + max_payload).min(payload.len());
        let chunk = &payload[offset..end];
        let more = end < payload.len();

        let mut frag = Vec::with_capacity(FIXED_HEADER_LEN + FRAGMENT_HEADER_LEN + chunk.len());
        frag.extend_from_slice(header);
        frag[6] = 44; // Fragment Header next-header value.
        #[allow(clippy::cast_possible_truncation)] // bounded by mtu <= MTU_MAX
        let payload_length = (FRAGMENT_HEADER_LEN + chunk.len()) as u16;
        frag[4..6].copy_from_slice(&payload_length.to_be_bytes());

        let mut frag_header = [0u8; FRAGMENT_HEADER_LEN];
        frag_header[0] = original_next_header;
        #[allow(clippy::cast_possible_truncation)] // offset/8 fits 13 bits given MTU_MAX bound
        let offset_units = (offset / 8) as u16;
        let offset_and_m = (offset_units << 3) | u16::from(more);
        frag_header[2..4].copy_from_slice(&offset_and_m.to_be_bytes());
        frag_header[4..8].copy_from_slice(&identifier.to_be_bytes());

        frag.extend_from_slice(&frag_header);
        frag.extend_from_slice(chunk);
        fragments.push(frag);
        offset = end;
    }
    fragments
}
