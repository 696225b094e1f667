// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The translator's configuration snapshot.
//!
//! Built once, validated once, then shared read-only (behind an `Arc`) across every
//! worker for the lifetime of the process. Nothing here is mutated after validation.

use std::net::{Ipv4Addr, Ipv6Addr};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The three translation modes, differing in which side's address is prefix-composed
/// versus fixed to a single configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationMode {
    /// IPv6-only network reaching an IPv4-only destination: source is prefix-composed,
    /// destination is a fixed, single-mapped IPv6 address.
    Nat64,
    /// Customer-side translator in a 464XLAT deployment: source is a fixed endpoint,
    /// destination is prefix-composed.
    Clat,
    /// Stateless IP/ICMP translation: both sides are prefix-composed.
    Siit,
}

/// Policy for synthesizing the IPv6 flow label on 4→6 translation.
///
/// Resolves the flow-label Open Question: the source's exact hashing policy was
/// ambiguous, so this is made an explicit, documented, configurable choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowLabelPolicy {
    /// Always emit a zero flow label.
    #[default]
    Zero,
    /// Derive a 20-bit flow label from a non-cryptographic hash of the IPv4 5-tuple, for
    /// stable per-flow ECMP entropy.
    ComputedHash,
}

/// How this worker's read/write endpoints are obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoMode {
    /// Open (and, if needed, create) a persistent TUN interface by name.
    Tun {
        /// The interface name (e.g. `tun0`).
        name: String,
    },
    /// Use file descriptors inherited from the parent process (e.g. handed down by a
    /// supervisor that already opened the TUN device).
    InheritedFds {
        /// The fd to read incoming datagrams from.
        read: i32,
        /// The fd to write translated datagrams to.
        write: i32,
    },
}

/// A 96-bit (or shorter) IPv6 prefix used for RFC 6052 address composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Prefix {
    /// The prefix bits, stored left-justified in a full address (trailing bits zero).
    pub prefix: Ipv6Addr,
    /// The prefix length in bits. RFC 6052 only defines 32/40/48/56/64/96; this
    /// implementation accepts any of those six values.
    pub length: u8,
}

impl Ipv6Prefix {
    /// The well-known NAT64 prefix `64:ff9b::/96`.
    #[must_use]
    pub fn well_known() -> Self {
        Ipv6Prefix {
            prefix: Ipv6Addr::new(0x0064, 0xff9b, 0, 0, 0, 0, 0, 0),
            length: 96,
        }
    }
}

/// An IPv4 prefix, used by SIIT's reverse (6→4) composition when a custom IPv4 range
/// (rather than a single fixed address) maps to the IPv6 side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Prefix {
    /// The prefix bits.
    pub prefix: Ipv4Addr,
    /// The prefix length in bits.
    pub length: u8,
}

/// The validated, immutable configuration shared by every worker.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Config::validate", error = "ConfigError"))]
pub struct Config {
    /// The active translation mode.
    pub mode: TranslationMode,
    /// The translator's own IPv4 endpoint address, used as the source of self-originated
    /// ICMPv4 and as the 6→4 single-mapped destination under NAT64.
    pub translator_ipv4: Ipv4Addr,
    /// The translator's own IPv6 endpoint address, used as the source of self-originated
    /// ICMPv6 and as the 4→6 single-mapped source under CLAT.
    pub translator_ipv6: Ipv6Addr,
    /// The prefix used to compose/decompose IPv6 addresses that embed an IPv4 address.
    pub ipv6_prefix: Ipv6Prefix,
    /// Only consulted under SIIT, when the IPv4 side is also a range rather than a
    /// single address.
    #[builder(default)]
    pub ipv4_prefix: Option<Ipv4Prefix>,
    /// Under NAT64, the fixed IPv6 address all translated destinations map to.
    #[builder(default)]
    pub single_translation_ipv6: Option<Ipv6Addr>,
    /// Under CLAT, the fixed IPv4 address all translated sources map to.
    #[builder(default)]
    pub single_translation_ipv4: Option<Ipv4Addr>,
    /// Hop-limit/TTL used for ICMP this translator originates itself.
    pub router_generated_packet_ttl: u8,
    /// High 16 bits of every IPv6 fragment identifier this translator assigns; the low
    /// 16 bits come from the per-worker PRNG.
    pub translator_ipv6_fragment_identifier_prefix: u16,
    /// Whether DSCP/ECN (4→6) and traffic-class (6→4) are copied across translation.
    #[builder(default = "true")]
    pub copy_dscp_and_flow_label: bool,
    /// Whether fragmented input may be forwarded as fragmented output, versus dropped.
    #[builder(default = "true")]
    pub allow_forwarding_fragmented_packets: bool,
    /// Whether a best-effort checksum is still computed for an ICMP message whose type
    /// cannot be translated, rather than dropping it outright.
    #[builder(default)]
    pub generate_checksums_for_untranslatable_icmp: bool,
    /// Flow-label synthesis policy for 4→6 translation.
    #[builder(default)]
    pub flow_label_policy: FlowLabelPolicy,
    /// Number of parallel worker threads.
    #[builder(default = "1")]
    pub num_workers: u16,
    /// Egress link MTU on the IPv4 side, used to decide whether 6→4 output needs
    /// fragmentation.
    pub link_mtu_ipv4: u16,
    /// Egress link MTU on the IPv6 side. Clamped to a 1280-byte floor at validation
    /// time, since RFC 8200 forbids a smaller IPv6 path MTU.
    pub link_mtu_ipv6: u16,
    /// How this process's read/write endpoints are obtained.
    pub io_mode: IoMode,
}

/// An error in the configuration itself, detected once before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `derive_builder` reported a required field was never set.
    #[error("incomplete configuration: {0}")]
    Incomplete(String),
    /// An IPv6 prefix length outside RFC 6052's defined set (32/40/48/56/64/96).
    #[error("unsupported ipv6 prefix length /{0} (must be one of 32/40/48/56/64/96)")]
    BadPrefixLength(u8),
    /// NAT64 mode requires a fixed destination-side IPv6 address.
    #[error("mode {0:?} requires single_translation_ipv6 to be set")]
    MissingSingleTranslationIpv6(TranslationMode),
    /// CLAT mode requires a fixed source-side IPv4 address.
    #[error("mode {0:?} requires single_translation_ipv4 to be set")]
    MissingSingleTranslationIpv4(TranslationMode),
    /// `num_workers` was zero.
    #[error("num_workers must be at least 1")]
    ZeroWorkers,
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(value: derive_builder::UninitializedFieldError) -> Self {
        ConfigError::Incomplete(value.to_string())
    }
}

/// The minimum legal IPv6 path MTU (RFC 8200 §5).
pub const MIN_IPV6_MTU: u16 = 1280;

impl Config {
    fn validate(builder: &ConfigBuilder) -> Result<(), ConfigError> {
        if let Some(prefix) = &builder.ipv6_prefix {
            if !matches!(prefix.length, 32 | 40 | 48 | 56 | 64 | 96) {
                return Err(ConfigError::BadPrefixLength(prefix.length));
            }
        }
        if let Some(TranslationMode::Nat64) = builder.mode {
            if matches!(builder.single_translation_ipv6, None | Some(None)) {
                return Err(ConfigError::MissingSingleTranslationIpv6(
                    TranslationMode::Nat64,
                ));
            }
        }
        if let Some(TranslationMode::Clat) = builder.mode {
            if matches!(builder.single_translation_ipv4, None | Some(None)) {
                return Err(ConfigError::MissingSingleTranslationIpv4(
                    TranslationMode::Clat,
                ));
            }
        }
        if let Some(0) = builder.num_workers {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// The egress IPv6 MTU this worker should fragment against, clamped to the RFC 8200
    /// floor of 1280 bytes. Resolves the MTU-clamping Open Question from `spec.md` §9.
    #[must_use]
    pub fn effective_link_mtu_ipv6(&self) -> u16 {
        if self.link_mtu_ipv6 < MIN_IPV6_MTU {
            tracing::warn!(
                configured = self.link_mtu_ipv6,
                floor = MIN_IPV6_MTU,
                "configured IPv6 link MTU below RFC 8200 floor, clamping"
            );
            MIN_IPV6_MTU
        } else {
            self.link_mtu_ipv6
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> ConfigBuilder {
        let mut b = ConfigBuilder::default();
        b.mode(TranslationMode::Siit)
            .translator_ipv4(Ipv4Addr::new(203, 0, 113, 1))
            .translator_ipv6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))
            .ipv6_prefix(Ipv6Prefix::well_known())
            .router_generated_packet_ttl(64u8)
            .translator_ipv6_fragment_identifier_prefix(0u16)
            .link_mtu_ipv4(1500u16)
            .link_mtu_ipv6(1500u16)
            .io_mode(IoMode::Tun {
                name: "tun0".to_string(),
            });
        b
    }

    #[test]
    fn siit_builds_without_single_translation_addresses() {
        assert!(base_builder().build().is_ok());
    }

    #[test]
    fn nat64_requires_single_translation_ipv6() {
        let mut b = base_builder();
        b.mode(TranslationMode::Nat64);
        assert_eq!(
            b.build().unwrap_err(),
            ConfigError::MissingSingleTranslationIpv6(TranslationMode::Nat64)
        );
    }

    #[test]
    fn rejects_bad_prefix_length() {
        let mut b = base_builder();
        b.ipv6_prefix(Ipv6Prefix {
            prefix: Ipv6Addr::UNSPECIFIED,
            length: 50,
        });
        assert_eq!(b.build().unwrap_err(), ConfigError::BadPrefixLength(50));
    }

    #[test]
    fn clamps_small_ipv6_mtu() {
        let mut b = base_builder();
        b.link_mtu_ipv6(1300u16);
        let cfg = b.build().unwrap();
        assert_eq!(cfg.effective_link_mtu_ipv6(), 1300);
        let mut b2 = base_builder();
        b2.link_mtu_ipv6(576u16);
        let cfg2 = b2.build().unwrap();
        assert_eq!(cfg2.effective_link_mtu_ipv6(), MIN_IPV6_MTU);
    }
}
