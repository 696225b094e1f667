// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The worker loop (§4.8): `receive → classify-by-version → translate → send`.
//!
//! This is the only state machine in the core. Per-packet processing is itself
//! stateless — a straight-line pipeline with early-return on validation failure — and
//! the loop around it has exactly two states: `RUNNING`, in which it repeatedly reads,
//! translates, and writes, and `EXITED`, entered once [`ShouldKeepRunning`] reports
//! false at the top of an iteration. There is no `DRAINING` state to model explicitly:
//! the predicate is only ever sampled between packets, so a packet already in flight
//! always finishes before the loop re-checks it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, warn};

use crate::context::ThreadContext;
use crate::error::{PolicyDrop, TranslateError};
use crate::io;
use crate::router;
use crate::xlat::{v4_to_v6, v6_to_4};

/// The process-wide "keep running" predicate every worker samples at the top of its
/// loop (`spec.md` §5, "Cancellation").
///
/// Cloning this handle is cheap and is how every worker thread and the process's signal
/// handler share the same flag without a lock: the signal handler only ever clears it,
/// and a worker only ever reads it, so `Relaxed` would already be race-free, but
/// `Acquire`/`Release` costs nothing extra here and documents the happens-before
/// relationship explicitly.
#[derive(Clone, Debug)]
pub struct ShouldKeepRunning(Arc<AtomicBool>);

impl ShouldKeepRunning {
    /// Build a new flag, initially set to keep running.
    #[must_use]
    pub fn new() -> Self {
        ShouldKeepRunning(Arc::new(AtomicBool::new(true)))
    }

    /// Sample the flag. `true` means the worker should perform another iteration.
    #[must_use]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, e.g. from a signal handler. Async-signal-safe.
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for ShouldKeepRunning {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a worker's loop ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// [`ShouldKeepRunning`] reported false; this worker shut down cleanly.
    Stopped,
    /// A non-retriable I/O error made the endpoint unusable. Per `spec.md` §7, this is
    /// fatal: the caller is expected to terminate the process (exit code 2) rather than
    /// attempt to continue with a broken endpoint.
    FatalIo(crate::error::IoError),
}

/// Run one worker's `receive → classify → translate → send` loop until
/// `should_keep_running` reports false or a fatal I/O error occurs.
///
/// Every recoverable per-packet outcome — a silent drop, a policy drop answered with a
/// translator-originated ICMP reply, or a clean translate-and-forward — is handled
/// without ever returning from this function; only [`ShouldKeepRunning`] flipping or a
/// fatal I/O error ends the loop.
pub fn run(ctx: &mut ThreadContext, should_keep_running: &ShouldKeepRunning) -> WorkerExit {
    let _span = tracing::info_span!("worker", id = ctx.id).entered();
    while should_keep_running.get() {
        let len = match io::recv_into_in(ctx) {
            Ok(len) => len,
            Err(err) if err.is_retriable() => continue,
            Err(err) => return WorkerExit::FatalIo(err),
        };

        if !io::is_plausible_ip_datagram(len) {
            continue;
        }

        if let Err(err) = process_one_packet(ctx) {
            return WorkerExit::FatalIo(err);
        }
    }
    WorkerExit::Stopped
}

/// Classify the packet currently in `ctx.in_buffer` by IP version and drive it through
/// the matching translator, sending the result (or a translator-originated ICMP reply
/// on a policy drop) out `ctx.write_endpoint`.
///
/// Returns `Err` only for a fatal I/O error on the write side; every per-packet
/// classification, validation, or translation failure is handled internally as a
/// silent drop or a reply and never propagates past this function.
fn process_one_packet(ctx: &mut ThreadContext) -> Result<(), crate::error::IoError> {
    let version = ctx.in_buffer.as_slice().first().map(|b| b >> 4);
    match version {
        Some(4) => dispatch_v4_to_v6(ctx),
        Some(6) => dispatch_v6_to_4(ctx),
        Some(other) => {
            debug!(version = other, "dropping packet with unrecognized ip version nibble");
            Ok(())
        }
        None => Ok(()),
    }
}

fn dispatch_v4_to_v6(ctx: &mut ThreadContext) -> Result<(), crate::error::IoError> {
    match v4_to_v6::translate(ctx) {
        Ok(()) => io::send_ipv6_possibly_fragmented(ctx),
        Err(TranslateError::Drop(drop)) => {
            debug!(%drop, direction = "4to6", "dropping packet");
            Ok(())
        }
        Err(TranslateError::Policy(PolicyDrop::TtlExpired)) => router::send_icmpv4_time_exceeded(ctx),
        Err(TranslateError::Policy(PolicyDrop::FragmentationNeeded { mtu })) => {
            router::send_icmpv4_fragmentation_needed(ctx, mtu)
        }
        Err(TranslateError::Policy(PolicyDrop::RoutingHeaderType0 { offset })) => {
            // RFC 7915 has no IPv4 analogue for this; the input was IPv4, so a routing
            // header drop can only originate on the 6→4 side. Unreachable in practice,
            // but handled explicitly rather than panicking on an internal invariant.
            warn!(offset, "unexpected routing-header drop on 4to6 path, dropping silently");
            Ok(())
        }
    }
}

fn dispatch_v6_to_4(ctx: &mut ThreadContext) -> Result<(), crate::error::IoError> {
    match v6_to_4::translate(ctx) {
        Ok(()) => io::send_ipv4_possibly_fragmented(ctx),
        Err(TranslateError::Drop(drop)) => {
            debug!(%drop, direction = "6to4", "dropping packet");
            Ok(())
        }
        Err(TranslateError::Policy(PolicyDrop::TtlExpired)) => router::send_icmpv6_time_exceeded(ctx),
        Err(TranslateError::Policy(PolicyDrop::FragmentationNeeded { mtu })) => {
            router::send_icmpv6_packet_too_big(ctx, u32::from(mtu))
        }
        Err(TranslateError::Policy(PolicyDrop::RoutingHeaderType0 { offset })) => {
            router::send_icmpv6_parameter_problem(ctx, offset)
        }
    }
}

/// Spawn `config.num_workers` OS threads, each owning one [`ThreadContext`], and run
/// [`run`] on each until `should_keep_running` clears or a worker hits a fatal error.
///
/// Returns once every worker thread has exited, yielding each worker's [`WorkerExit`]
/// in the order its context appeared in `contexts`. Panics propagate from a worker
/// thread are not caught here: an invariant violation (`spec.md` §7's "Invariant
/// violation" kind) is expected to abort the process, and `thread::Builder::spawn`
/// plus `JoinHandle::join` already surface that as an `Err` the caller can match on.
///
/// # Panics
///
/// Panics if spawning an OS thread fails (e.g. the process is out of resources); there
/// is no sensible recovery from that at this layer.
#[must_use]
pub fn run_all(mut contexts: Vec<ThreadContext>, should_keep_running: &ShouldKeepRunning) -> Vec<WorkerExit> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = contexts
            .iter_mut()
            .map(|ctx| {
                let flag = should_keep_running.clone();
                let id = ctx.id;
                #[allow(clippy::expect_used)] // thread spawn failure has no local recovery
                let handle = scope
                    .builder()
                    .name(format!("tundra-worker-{id}"))
                    .spawn(move || run(ctx, &flag))
                    .expect("failed to spawn worker thread");
                handle
            })
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    error!("worker thread panicked");
                    WorkerExit::FatalIo(crate::error::IoError::from_raw(errno::EIO))
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_defaults_to_running_and_can_be_stopped() {
        let flag = ShouldKeepRunning::new();
        assert!(flag.get());
        flag.stop();
        assert!(!flag.get());
    }

    #[test]
    fn clones_share_state() {
        let flag = ShouldKeepRunning::new();
        let clone = flag.clone();
        clone.stop();
        assert!(!flag.get());
    }
}
