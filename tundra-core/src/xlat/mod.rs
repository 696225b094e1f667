// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The two translation directions (C3/C4) and the output-path fragmentation helper (C2)
//! they share.
//!
//! [`v4_to_v6`] and [`v6_to_4`] each expose a single `translate` entry point that reads a
//! complete datagram from `ctx.in_buffer`, synthesizes the translated datagram directly
//! into `ctx.out_buffer`, and returns [`crate::error::TranslateError`] for anything the
//! worker loop (`crate::worker`) should instead turn into a silent drop or a
//! translator-originated ICMP reply via [`crate::router`].

pub mod fragment;
pub mod v4_to_v6;
pub mod v6_to_4;
