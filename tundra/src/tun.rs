// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TUN device lifecycle: open, create-persistent, destroy-persistent.
//!
//! Deliberately out of scope for `tundra-core` itself (`spec.md` §1 lists "TUN device
//! creation / persistent-interface management and inherited file-descriptor plumbing"
//! as an external collaborator); this module is that collaborator, grounded on
//! `original_source/src/t64_init_io.h`'s `open_tun_interface` /
//! `set_tun_interface_persistent` and `t64_opmode_mktun.c`/`opmode_rmtun.c`.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, FromRawFd};

use thiserror::Error;

const TUN_CLONE_DEVICE_PATH: &str = "/dev/net/tun";

/// Failure opening, configuring, or persisting a TUN interface.
#[derive(Debug, Error)]
pub(crate) enum TunError {
    /// `/dev/net/tun` could not be opened.
    #[error("opening {TUN_CLONE_DEVICE_PATH}: {0}")]
    OpenClone(std::io::Error),
    /// The interface name contained an interior NUL or exceeded `IFNAMSIZ - 1` bytes.
    #[error("interface name {0:?} is not a valid TUN interface name")]
    BadName(String),
    /// The `TUNSETIFF` ioctl failed.
    #[error("TUNSETIFF ioctl for interface {name:?}: {source}")]
    SetIff {
        /// The interface name that was being configured.
        name: String,
        /// The underlying OS error.
        source: std::io::Error,
    },
    /// The `TUNSETPERSIST` ioctl failed.
    #[error("TUNSETPERSIST ioctl for interface {name:?}: {source}")]
    SetPersist {
        /// The interface name that was being (un)persisted.
        name: String,
        /// The underlying OS error.
        source: std::io::Error,
    },
    /// Duplicating a file descriptor for an additional worker failed.
    #[error("duplicating endpoint file descriptor: {0}")]
    Dup(std::io::Error),
}

fn build_ifreq(name: &str, multi_queue: bool) -> Result<libc::ifreq, TunError> {
    let c_name = CString::new(name).map_err(|_| TunError::BadName(name.to_string()))?;
    let name_bytes = c_name.as_bytes_with_nul();
    if name_bytes.len() > libc::IFNAMSIZ {
        return Err(TunError::BadName(name.to_string()));
    }

    #[allow(unsafe_code)] // zero-initializing a plain-old-data ioctl struct
    let mut ifreq: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifreq.ifr_name.iter_mut().zip(name_bytes.iter()) {
        #[allow(clippy::cast_possible_wrap)]
        {
            *dst = *src as libc::c_char;
        }
    }
    let mut flags = libc::IFF_TUN | libc::IFF_NO_PI;
    if multi_queue {
        flags |= libc::IFF_MULTI_QUEUE;
    }
    #[allow(unsafe_code)] // the union's ifru_flags member is the one TUNSETIFF reads
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    unsafe {
        ifreq.ifr_ifru.ifru_flags = flags as libc::c_short;
    }
    Ok(ifreq)
}

/// Open `/dev/net/tun` and configure it as interface `name`.
///
/// `multi_queue` requests `IFF_MULTI_QUEUE` so that the same interface name may be
/// opened more than once (one queue per worker); without it, a second open of the same
/// name fails once the interface already exists.
pub(crate) fn open_tun_interface(name: &str, multi_queue: bool) -> Result<File, TunError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(TUN_CLONE_DEVICE_PATH)
        .map_err(TunError::OpenClone)?;
    let mut ifreq = build_ifreq(name, multi_queue)?;
    #[allow(unsafe_code, clippy::cast_possible_wrap)] // well-checked ioctl call
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), libc::TUNSETIFF as _, &mut ifreq) };
    if ret < 0 {
        return Err(TunError::SetIff {
            name: name.to_string(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(file)
}

/// Set (or clear) the `IFF_PERSIST` flag on an already-open TUN fd.
pub(crate) fn set_persistent(file: &File, persist: bool, name: &str) -> Result<(), TunError> {
    #[allow(unsafe_code)] // TUNSETPERSIST takes its argument by value, not by pointer
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), libc::TUNSETPERSIST as _, libc::c_int::from(persist)) };
    if ret < 0 {
        return Err(TunError::SetPersist {
            name: name.to_string(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Create a persistent TUN interface named `name` and exit.
pub(crate) fn mktun(name: &str) -> Result<(), TunError> {
    let file = open_tun_interface(name, false)?;
    set_persistent(&file, true, name)
}

/// Destroy the persistent TUN interface named `name`.
pub(crate) fn rmtun(name: &str) -> Result<(), TunError> {
    let file = open_tun_interface(name, false)?;
    set_persistent(&file, false, name)
}

/// Open `num_workers` independent read/write endpoint pairs against TUN interface
/// `name`, requesting `IFF_MULTI_QUEUE` whenever more than one worker is configured.
pub(crate) fn open_worker_endpoints(name: &str, num_workers: u16) -> Result<Vec<(File, File)>, TunError> {
    let multi_queue = num_workers > 1;
    (0..num_workers)
        .map(|_| {
            let file = open_tun_interface(name, multi_queue)?;
            let write_half = file.try_clone().map_err(TunError::Dup)?;
            Ok((file, write_half))
        })
        .collect()
}

/// Split `read_fd:write_fd` (e.g. as inherited from a supervisor) into a raw fd pair.
pub(crate) fn parse_inherited_fds(spec: &str) -> Result<(i32, i32), TunError> {
    let (read, write) = spec.split_once(':').ok_or_else(|| TunError::BadName(spec.to_string()))?;
    let read_fd = read.parse::<i32>().map_err(|_| TunError::BadName(spec.to_string()))?;
    let write_fd = write.parse::<i32>().map_err(|_| TunError::BadName(spec.to_string()))?;
    Ok((read_fd, write_fd))
}

/// Build `num_workers` endpoint pairs from a single inherited `(read_fd, write_fd)`,
/// duplicating each descriptor once per worker so that every worker's `ThreadContext`
/// owns distinct, independently closeable `File`s.
///
/// # Safety
///
/// `read_fd` and `write_fd` must be valid, open, and not owned or closed elsewhere for
/// the remainder of the process's lifetime.
#[allow(unsafe_code)]
pub(crate) unsafe fn open_inherited_endpoints(
    read_fd: i32,
    write_fd: i32,
    num_workers: u16,
) -> Result<Vec<(File, File)>, TunError> {
    // Safety: forwarded from the caller's contract above.
    let base_read = unsafe { File::from_raw_fd(read_fd) };
    let base_write = unsafe { File::from_raw_fd(write_fd) };
    (0..num_workers)
        .map(|_| {
            let read = base_read.try_clone().map_err(TunError::Dup)?;
            let write = base_write.try_clone().map_err(TunError::Dup)?;
            Ok((read, write))
        })
        .collect()
}
