// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-worker thread context (C1).
//!
//! A [`ThreadContext`] is allocated once per worker at spawn time and lives for the
//! worker's entire lifetime: its two buffers, its endpoint handles, and its PRNG state
//! are never touched by any other thread. Only the validated [`crate::config::Config`]
//! is shared, and only read-only, via the `Arc` every context clones at spawn.

use std::cell::Cell;
use std::fs::File;
use std::marker::PhantomData;
use std::os::fd::{FromRawFd, RawFd};
use std::sync::Arc;

use crate::buffer::PacketBuffer;
use crate::config::Config;
use crate::prng::Xorshift32;

/// Scratch space, endpoints, and PRNG state exclusively owned by one worker thread.
///
/// `ThreadContext` is deliberately `!Sync` (via the `PhantomData<Cell<()>>` marker):
/// nothing about it may ever be accessed concurrently from two threads, matching
/// `spec.md` invariant 5. It is still `Send`, since it is moved wholesale into the
/// thread that owns it and never touched again from the spawning thread.
pub struct ThreadContext {
    /// This worker's identifying index, used only for logging.
    pub id: u16,
    /// The shared, read-only configuration snapshot.
    pub config: Arc<Config>,
    /// Scratch space for the datagram currently being read and translated.
    pub in_buffer: PacketBuffer,
    /// Scratch space for the datagram about to be written.
    pub out_buffer: PacketBuffer,
    /// The endpoint packets are read from.
    pub read_endpoint: File,
    /// The endpoint translated packets are written to.
    pub write_endpoint: File,
    /// This worker's private fragment-identifier generator.
    pub prng: Xorshift32,
    _not_sync: PhantomData<Cell<()>>,
}

impl ThreadContext {
    /// Build a context taking ownership of `read_fd` and `write_fd`.
    ///
    /// `seed` should differ across workers (e.g. derived from `id`) so that concurrent
    /// workers do not assign colliding fragment identifiers to otherwise-identical flows.
    ///
    /// # Safety
    ///
    /// `read_fd` and `write_fd` must be valid, open, and not owned elsewhere: this
    /// function takes exclusive ownership of both and will close them on drop.
    #[allow(unsafe_code)]
    #[must_use]
    pub unsafe fn new(id: u16, config: Arc<Config>, read_fd: RawFd, write_fd: RawFd, seed: u32) -> Self {
        // Safety: forwarded from the caller's contract above.
        let (read_endpoint, write_endpoint) =
            unsafe { (File::from_raw_fd(read_fd), File::from_raw_fd(write_fd)) };
        ThreadContext {
            id,
            config,
            in_buffer: PacketBuffer::new(),
            out_buffer: PacketBuffer::new(),
            read_endpoint,
            write_endpoint,
            prng: Xorshift32::new(seed),
            _not_sync: PhantomData,
        }
    }

    /// Build a context from an already-open pair of endpoints (e.g. inherited stdio-like
    /// descriptors already wrapped as `File` by the caller).
    #[must_use]
    pub fn from_files(
        id: u16,
        config: Arc<Config>,
        read_endpoint: File,
        write_endpoint: File,
        seed: u32,
    ) -> Self {
        ThreadContext {
            id,
            config,
            in_buffer: PacketBuffer::new(),
            out_buffer: PacketBuffer::new(),
            read_endpoint,
            write_endpoint,
            prng: Xorshift32::new(seed),
            _not_sync: PhantomData,
        }
    }

    /// Assign the next IPv6 fragment identifier: the configured high 16 bits followed by
    /// 16 bits drawn from this worker's private PRNG.
    pub fn next_fragment_identifier(&mut self) -> u32 {
        let high = u32::from(self.config.translator_ipv6_fragment_identifier_prefix);
        let low = u32::from(self.prng.next_u16());
        (high << 16) | low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, IoMode, Ipv6Prefix, TranslationMode};
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn test_config() -> Arc<Config> {
        Arc::new(
            crate::config::ConfigBuilder::default()
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

    #[test]
    fn fragment_identifiers_carry_configured_high_bits() {
        let config = test_config();
        let mut ctx = ThreadContext::from_files(
            0,
            config,
            File::open("/dev/null").expect("/dev/null"),
            File::options()
                .write(true)
                .open("/dev/null")
                .expect("/dev/null"),
            7,
        );
        for _ in 0..4 {
            let id = ctx.next_fragment_identifier();
            assert_eq!(id >> 16, 0xBEEF);
        }
    }
}
