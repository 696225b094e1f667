// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! RFC 6052 address composition and decomposition.
//!
//! An RFC 6052 prefix embeds a full 32-bit IPv4 address into a 128-bit IPv6 address,
//! skipping a reserved all-zero byte at position 8 when the prefix is 32, 40, or 48 bits
//! long (so the embedded address never straddles the `::` notation boundary at bit 64).

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::config::Ipv6Prefix;

/// An IPv6 address that does not embed a valid IPv4 address under the given prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("address {address} does not embed an ipv4 address under prefix {prefix}/{length}")]
pub struct NotEmbedded {
    /// The address that failed to decompose.
    pub address: Ipv6Addr,
    /// The prefix it was checked against.
    pub prefix: Ipv6Addr,
    /// The prefix length it was checked against.
    pub length: u8,
}

/// Compose an IPv6 address embedding `v4` under `prefix`, per RFC 6052 §2.2.
///
/// # Panics
///
/// Never panics for a validated [`Ipv6Prefix`] (`length` is one of 32/40/48/56/64/96,
/// enforced by [`crate::config::Config::validate`]); any other length is an invariant
/// violation in the caller.
#[must_use]
pub fn compose(prefix: &Ipv6Prefix, v4: Ipv4Addr) -> Ipv6Addr {
    let prefix_bytes = prefix.prefix.octets();
    let v4_bytes = v4.octets();
    let mut out = [0u8; 16];

    match prefix.length {
        32 => {
            out[..4].copy_from_slice(&prefix_bytes[..4]);
            out[4..8].copy_from_slice(&v4_bytes);
        }
        40 => {
            out[..5].copy_from_slice(&prefix_bytes[..5]);
            out[5..8].copy_from_slice(&v4_bytes[..3]);
            out[9] = v4_bytes[3];
        }
        48 => {
            out[..6].copy_from_slice(&prefix_bytes[..6]);
            out[6..8].copy_from_slice(&v4_bytes[..2]);
            out[9..11].copy_from_slice(&v4_bytes[2..]);
        }
        56 => {
            out[..7].copy_from_slice(&prefix_bytes[..7]);
            out[7] = v4_bytes[0];
            out[9..12].copy_from_slice(&v4_bytes[1..]);
        }
        64 => {
            out[..8].copy_from_slice(&prefix_bytes[..8]);
            out[9..13].copy_from_slice(&v4_bytes);
        }
        96 => {
            out[..12].copy_from_slice(&prefix_bytes[..12]);
            out[12..16].copy_from_slice(&v4_bytes);
        }
        other => unreachable!("unsupported prefix length /{other} reached compose()"),
    }

    Ipv6Addr::from(out)
}

/// Decompose `v6` into the IPv4 address it embeds under `prefix`, per RFC 6052 §2.2.
///
/// # Errors
///
/// Returns [`NotEmbedded`] if `v6`'s prefix bits (or reserved byte, for
/// prefix lengths shorter than 64) do not match `prefix`.
pub fn decompose(prefix: &Ipv6Prefix, v6: Ipv6Addr) -> Result<Ipv4Addr, NotEmbedded> {
    let prefix_bytes = prefix.prefix.octets();
    let v6_bytes = v6.octets();
    let mismatch = || NotEmbedded {
        address: v6,
        prefix: prefix.prefix,
        length: prefix.length,
    };

    let v4 = match prefix.length {
        32 => {
            if v6_bytes[..4] != prefix_bytes[..4] {
                return Err(mismatch());
            }
            [v6_bytes[4], v6_bytes[5], v6_bytes[6], v6_bytes[7]]
        }
        40 => {
            if v6_bytes[..5] != prefix_bytes[..5] || v6_bytes[8] != 0 {
                return Err(mismatch());
            }
            [v6_bytes[5], v6_bytes[6], v6_bytes[7], v6_bytes[9]]
        }
        48 => {
            if v6_bytes[..6] != prefix_bytes[..6] || v6_bytes[8] != 0 {
                return Err(mismatch());
            }
            [v6_bytes[6], v6_bytes[7], v6_bytes[9], v6_bytes[10]]
        }
        56 => {
            if v6_bytes[..7] != prefix_bytes[..7] || v6_bytes[8] != 0 {
                return Err(mismatch());
            }
            [v6_bytes[7], v6_bytes[9], v6_bytes[10], v6_bytes[11]]
        }
        64 => {
            if v6_bytes[..8] != prefix_bytes[..8] || v6_bytes[8] != 0 {
                return Err(mismatch());
            }
            [v6_bytes[9], v6_bytes[10], v6_bytes[11], v6_bytes[12]]
        }
        96 => {
            if v6_bytes[..12] != prefix_bytes[..12] {
                return Err(mismatch());
            }
            [v6_bytes[12], v6_bytes[13], v6_bytes[14], v6_bytes[15]]
        }
        other => unreachable!("unsupported prefix length /{other} reached decompose()"),
    };

    Ok(Ipv4Addr::from(v4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_prefix_round_trips() {
        let prefix = Ipv6Prefix::well_known();
        let v4 = Ipv4Addr::new(192, 0, 2, 33);
        let v6 = compose(&prefix, v4);
        assert_eq!(v6, Ipv6Addr::new(0x0064, 0xff9b, 0, 0, 0, 0, 0xc000, 0x0221));
        assert_eq!(decompose(&prefix, v6).unwrap(), v4);
    }

    #[test]
    fn every_supported_length_round_trips() {
        let v4 = Ipv4Addr::new(203, 0, 113, 77);
        for length in [32u8, 40, 48, 56, 64, 96] {
            let prefix = Ipv6Prefix {
                prefix: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0),
                length,
            };
            let v6 = compose(&prefix, v4);
            assert_eq!(decompose(&prefix, v6).unwrap(), v4, "length /{length}");
        }
    }

    #[test]
    fn reserved_byte_is_zero_for_short_prefixes() {
        let prefix = Ipv6Prefix {
            prefix: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0),
            length: 40,
        };
        let v6 = compose(&prefix, Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(v6.octets()[8], 0);
    }

    #[test]
    fn decompose_rejects_mismatched_prefix() {
        let prefix = Ipv6Prefix::well_known();
        let unrelated = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        assert!(decompose(&prefix, unrelated).is_err());
    }
}
