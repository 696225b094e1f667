// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command-line surface (`spec.md` §6): `translate`, `mktun`, `rmtun`.

use std::path::PathBuf;

pub(crate) use clap::Parser;
use clap::Subcommand;

/// A stateless IPv4↔IPv6 packet translator.
#[derive(Parser)]
#[command(name = "tundra")]
#[command(version)]
#[command(about = "Stateless IPv4<->IPv6 packet translation", long_about = None)]
pub(crate) struct CmdArgs {
    /// Which operational mode to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the translation workers until interrupted.
    Translate {
        /// Path to the YAML configuration file.
        #[arg(long, short = 'c', value_name = "PATH")]
        config: PathBuf,
        /// Inherited file descriptors to use instead of opening a TUN device, as
        /// `read_fd:write_fd`. Overrides `io_mode` in the configuration file.
        #[arg(long, value_name = "READ_FD:WRITE_FD")]
        inherited_fds: Option<String>,
    },
    /// Create a persistent TUN interface named by the configuration file and exit.
    Mktun {
        /// Path to the YAML configuration file.
        #[arg(long, short = 'c', value_name = "PATH")]
        config: PathBuf,
    },
    /// Destroy a persistent TUN interface named by the configuration file and exit.
    Rmtun {
        /// Path to the YAML configuration file.
        #[arg(long, short = 'c', value_name = "PATH")]
        config: PathBuf,
    },
}
