// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration file parsing and validation (deliberately out of scope for
//! `tundra-core` itself, per `spec.md` §1 — this is the external collaborator that
//! loads a YAML file into a validated [`tundra_core::config::Config`]).

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tundra_core::config::{
    Config, ConfigBuilder, ConfigError, FlowLabelPolicy, Ipv4Prefix, Ipv6Prefix, IoMode, TranslationMode,
};

/// Everything that can go wrong turning a file on disk into a validated [`Config`].
#[derive(Debug, Error)]
pub(crate) enum ConfigFileError {
    /// The file could not be read.
    #[error("reading configuration file {path}: {source}")]
    Read {
        /// The path that failed to read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents were not valid YAML for the expected shape.
    #[error("parsing configuration file: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
    /// An `ipv6_prefix`/`ipv4_prefix` string was not `addr/length`.
    #[error("invalid prefix {value:?}: {reason}")]
    BadPrefix {
        /// The offending string.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The assembled configuration failed [`Config`]'s own validation.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ConfigError),
}

fn default_true() -> bool {
    true
}

fn default_num_workers() -> u16 {
    1
}

/// The on-disk shape of a configuration file. Optional fields default exactly as
/// [`tundra_core::config::ConfigBuilder`]'s own `#[builder(default)]` fields do, kept in
/// sync by the tests in this module.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFile {
    mode: TranslationMode,
    translator_ipv4: Ipv4Addr,
    translator_ipv6: Ipv6Addr,
    ipv6_prefix: String,
    #[serde(default)]
    ipv4_prefix: Option<String>,
    #[serde(default)]
    single_translation_ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    single_translation_ipv4: Option<Ipv4Addr>,
    router_generated_packet_ttl: u8,
    translator_ipv6_fragment_identifier_prefix: u16,
    #[serde(default = "default_true")]
    copy_dscp_and_flow_label: bool,
    #[serde(default = "default_true")]
    allow_forwarding_fragmented_packets: bool,
    #[serde(default)]
    generate_checksums_for_untranslatable_icmp: bool,
    #[serde(default)]
    flow_label_policy: FlowLabelPolicy,
    #[serde(default = "default_num_workers")]
    num_workers: u16,
    link_mtu_ipv4: u16,
    link_mtu_ipv6: u16,
    io_mode: IoMode,
}

/// Parse an RFC 6052-style `addr/length` prefix string.
fn parse_ipv6_prefix(value: &str) -> Result<Ipv6Prefix, ConfigFileError> {
    let (addr, len) = value.split_once('/').ok_or_else(|| ConfigFileError::BadPrefix {
        value: value.to_string(),
        reason: "expected addr/length",
    })?;
    let prefix = addr.parse::<Ipv6Addr>().map_err(|_| ConfigFileError::BadPrefix {
        value: value.to_string(),
        reason: "not a valid ipv6 address",
    })?;
    let length = len.parse::<u8>().map_err(|_| ConfigFileError::BadPrefix {
        value: value.to_string(),
        reason: "not a valid prefix length",
    })?;
    Ok(Ipv6Prefix { prefix, length })
}

fn parse_ipv4_prefix(value: &str) -> Result<Ipv4Prefix, ConfigFileError> {
    let (addr, len) = value.split_once('/').ok_or_else(|| ConfigFileError::BadPrefix {
        value: value.to_string(),
        reason: "expected addr/length",
    })?;
    let prefix = addr.parse::<Ipv4Addr>().map_err(|_| ConfigFileError::BadPrefix {
        value: value.to_string(),
        reason: "not a valid ipv4 address",
    })?;
    let length = len.parse::<u8>().map_err(|_| ConfigFileError::BadPrefix {
        value: value.to_string(),
        reason: "not a valid prefix length",
    })?;
    Ok(Ipv4Prefix { prefix, length })
}

impl ConfigFile {
    fn into_config(self) -> Result<Config, ConfigFileError> {
        let mut builder = ConfigBuilder::default();
        builder
            .mode(self.mode)
            .translator_ipv4(self.translator_ipv4)
            .translator_ipv6(self.translator_ipv6)
            .ipv6_prefix(parse_ipv6_prefix(&self.ipv6_prefix)?)
            .router_generated_packet_ttl(self.router_generated_packet_ttl)
            .translator_ipv6_fragment_identifier_prefix(self.translator_ipv6_fragment_identifier_prefix)
            .copy_dscp_and_flow_label(self.copy_dscp_and_flow_label)
            .allow_forwarding_fragmented_packets(self.allow_forwarding_fragmented_packets)
            .generate_checksums_for_untranslatable_icmp(self.generate_checksums_for_untranslatable_icmp)
            .flow_label_policy(self.flow_label_policy)
            .num_workers(self.num_workers)
            .link_mtu_ipv4(self.link_mtu_ipv4)
            .link_mtu_ipv6(self.link_mtu_ipv6)
            .io_mode(self.io_mode);
        if let Some(ipv4_prefix) = &self.ipv4_prefix {
            builder.ipv4_prefix(Some(parse_ipv4_prefix(ipv4_prefix)?));
        }
        if let Some(addr) = self.single_translation_ipv6 {
            builder.single_translation_ipv6(Some(addr));
        }
        if let Some(addr) = self.single_translation_ipv4 {
            builder.single_translation_ipv4(Some(addr));
        }
        Ok(builder.build()?)
    }
}

/// Read, parse, and validate the configuration file at `path`.
pub(crate) fn load(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let file: ConfigFile = serde_yaml_ng::from_str(&contents)?;
    file.into_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_NAT64: &str = r#"
mode: nat64
translator_ipv4: 203.0.113.1
translator_ipv6: "2001:db8::1"
ipv6_prefix: "64:ff9b::/96"
single_translation_ipv6: "2001:db8::53"
router_generated_packet_ttl: 64
translator_ipv6_fragment_identifier_prefix: 0
link_mtu_ipv4: 1500
link_mtu_ipv6: 1500
io_mode:
  tun:
    name: tun0
"#;

    #[test]
    fn parses_minimal_nat64_config() {
        let file: ConfigFile = serde_yaml_ng::from_str(MINIMAL_NAT64).expect("valid yaml");
        let config = file.into_config().expect("valid config");
        assert_eq!(config.mode, TranslationMode::Nat64);
        assert_eq!(config.num_workers, 1);
        assert!(config.copy_dscp_and_flow_label);
        assert!(config.allow_forwarding_fragmented_packets);
    }

    #[test]
    fn rejects_malformed_prefix() {
        let bad = MINIMAL_NAT64.replace("64:ff9b::/96", "not-a-prefix");
        let file: ConfigFile = serde_yaml_ng::from_str(&bad).expect("valid yaml");
        assert!(matches!(file.into_config(), Err(ConfigFileError::BadPrefix { .. })));
    }

    #[test]
    fn rejects_nat64_missing_single_translation() {
        let bad = MINIMAL_NAT64.replace("single_translation_ipv6: \"2001:db8::53\"\n", "");
        let file: ConfigFile = serde_yaml_ng::from_str(&bad).expect("valid yaml");
        assert!(matches!(file.into_config(), Err(ConfigFileError::Invalid(_))));
    }
}
