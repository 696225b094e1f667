// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

//! The thin CLI shell around the `tundra-core` translation engine: configuration file
//! loading, TUN device lifecycle, process-wide cancellation, and structured logging —
//! every external collaborator `spec.md` §1 names as deliberately out of scope for the
//! core itself.

mod args;
mod config_file;
mod tun;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use args::{CmdArgs, Command, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tundra_core::config::{Config, IoMode};
use tundra_core::context::ThreadContext;
use tundra_core::worker::{self, ShouldKeepRunning, WorkerExit};

/// Process exit codes, per `spec.md` §6.
mod exit_code {
    /// Clean shutdown.
    pub(crate) const CLEAN: u8 = 0;
    /// Configuration error: the file failed to load, parse, or validate.
    pub(crate) const CONFIG_ERROR: u8 = 1;
    /// I/O error: a worker's endpoint became unusable.
    pub(crate) const IO_ERROR: u8 = 2;
    /// Fatal internal invariant violation.
    pub(crate) const FATAL: u8 = 3;
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_env_filter(filter)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let args = CmdArgs::parse();

    let code = match args.command {
        Command::Translate { config, inherited_fds } => run_translate(&config, inherited_fds.as_deref()),
        Command::Mktun { config } => run_mktun(&config),
        Command::Rmtun { config } => run_rmtun(&config),
    };
    ExitCode::from(code)
}

fn run_mktun(config_path: &Path) -> u8 {
    let config = match config_file::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return exit_code::CONFIG_ERROR;
        }
    };
    let IoMode::Tun { name } = &config.io_mode else {
        error!("mktun requires io_mode: tun in the configuration file");
        return exit_code::CONFIG_ERROR;
    };
    match tun::mktun(name) {
        Ok(()) => {
            info!(interface = %name, "created persistent TUN interface");
            exit_code::CLEAN
        }
        Err(err) => {
            error!(%err, "failed to create persistent TUN interface");
            exit_code::IO_ERROR
        }
    }
}

fn run_rmtun(config_path: &Path) -> u8 {
    let config = match config_file::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return exit_code::CONFIG_ERROR;
        }
    };
    let IoMode::Tun { name } = &config.io_mode else {
        error!("rmtun requires io_mode: tun in the configuration file");
        return exit_code::CONFIG_ERROR;
    };
    match tun::rmtun(name) {
        Ok(()) => {
            info!(interface = %name, "destroyed persistent TUN interface");
            exit_code::CLEAN
        }
        Err(err) => {
            error!(%err, "failed to destroy persistent TUN interface");
            exit_code::IO_ERROR
        }
    }
}

/// Open one `(read, write)` endpoint pair per configured worker, per `config.io_mode`
/// and the `--inherited-fds` override.
fn open_endpoints(config: &Config, inherited_fds: Option<&str>) -> Result<Vec<(std::fs::File, std::fs::File)>, String> {
    if let Some(spec) = inherited_fds {
        let (read_fd, write_fd) = tun::parse_inherited_fds(spec).map_err(|e| e.to_string())?;
        // Safety: the operator passing `--inherited-fds` is asserting these descriptors
        // are open, valid, and not owned elsewhere, exactly as `spec.md` §1's
        // "inherited file-descriptor plumbing" collaborator contract requires.
        #[allow(unsafe_code)]
        return unsafe { tun::open_inherited_endpoints(read_fd, write_fd, config.num_workers) }
            .map_err(|e| e.to_string());
    }
    match &config.io_mode {
        IoMode::Tun { name } => tun::open_worker_endpoints(name, config.num_workers).map_err(|e| e.to_string()),
        IoMode::InheritedFds { read, write } => {
            #[allow(unsafe_code)]
            unsafe {
                tun::open_inherited_endpoints(*read, *write, config.num_workers)
            }
            .map_err(|e| e.to_string())
        }
    }
}

fn run_translate(config_path: &Path, inherited_fds: Option<&str>) -> u8 {
    let config = match config_file::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return exit_code::CONFIG_ERROR;
        }
    };
    let config = Arc::new(config);

    let endpoints = match open_endpoints(&config, inherited_fds) {
        Ok(endpoints) => endpoints,
        Err(err) => {
            error!(%err, "failed to open worker endpoints");
            return exit_code::IO_ERROR;
        }
    };

    let should_keep_running = ShouldKeepRunning::new();
    {
        let flag = should_keep_running.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            warn!("received interrupt, draining in-flight packets and shutting down");
            flag.stop();
        }) {
            error!(%err, "failed to install signal handler");
            return exit_code::FATAL;
        }
    }

    let contexts: Vec<ThreadContext> = endpoints
        .into_iter()
        .enumerate()
        .map(|(id, (read_endpoint, write_endpoint))| {
            #[allow(clippy::cast_possible_truncation)] // num_workers is u16
            let id = id as u16;
            let seed = u32::from(id).wrapping_mul(0x9E37_79B9).wrapping_add(1);
            ThreadContext::from_files(id, Arc::clone(&config), read_endpoint, write_endpoint, seed)
        })
        .collect();

    info!(num_workers = contexts.len(), mode = ?config.mode, "starting translation workers");
    let results = worker::run_all(contexts, &should_keep_running);

    let mut worst = exit_code::CLEAN;
    for result in results {
        match result {
            WorkerExit::Stopped => {}
            WorkerExit::FatalIo(err) => {
                error!(%err, "worker exited on fatal i/o error");
                worst = worst.max(exit_code::IO_ERROR);
            }
        }
    }
    info!("all workers have exited");
    worst
}
