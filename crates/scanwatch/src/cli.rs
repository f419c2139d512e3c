//! Command-line arguments.
//!
//! Flags only override what the config file and `SCANWATCH_*` environment
//! already set; anything left unset here falls through to those layers.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;
use scanwatch_core::ConfigOverrides;

/// BLE scanning diagnostic monitor.
#[derive(Debug, Parser)]
#[command(name = "scanwatch", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// HCI adapter index (`hci<N>`). Defaults to the system adapter.
    #[arg(long, value_name = "N")]
    pub device: Option<u32>,

    /// Report extended advertising as enabled.
    #[arg(long)]
    pub extended: bool,

    /// Deliver repeated advertisements from the same device.
    #[arg(long)]
    pub allow_duplicates: bool,

    /// Milliseconds between periodic summaries.
    #[arg(long, value_name = "MS")]
    pub summary_interval: Option<u64>,

    /// Pause and resume scanning on a fixed cycle.
    #[arg(long)]
    pub simulate: bool,

    /// Scan window of each simulate cycle, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub simulate_on: Option<u64>,

    /// Pause window of each simulate cycle, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub simulate_off: Option<u64>,

    /// Print a line for every discovered peripheral.
    #[arg(long)]
    pub log_discoveries: bool,

    /// Debug-level internal logging.
    #[arg(long, short)]
    pub verbose: bool,

    /// Serve the HTTP status API on this address.
    #[arg(long, value_name = "ADDR")]
    pub status_addr: Option<SocketAddr>,

    /// Also write JSON logs to daily files in this directory.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

/// What to do after parsing arguments.
#[derive(Debug)]
pub enum ParseOutcome {
    /// Run the monitor.
    Run(Box<Cli>),
    /// Help or version was printed.
    Exit,
    /// Arguments were rejected; usage was printed.
    Invalid,
}

impl Cli {
    /// Parse process arguments, printing help, version or usage errors.
    #[must_use]
    pub fn parse_args() -> ParseOutcome {
        Self::parse_from_args(std::env::args_os())
    }

    /// Parse an explicit argument list. See [`Cli::parse_args`].
    pub fn parse_from_args<I, T>(args: I) -> ParseOutcome
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match Self::try_parse_from(args) {
            Ok(cli) => ParseOutcome::Run(Box::new(cli)),
            Err(err) => {
                // Nothing sensible to do if stdout/stderr is gone.
                let _ = err.print();
                match err.kind() {
                    ErrorKind::DisplayHelp
                    | ErrorKind::DisplayVersion
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => ParseOutcome::Exit,
                    _ => ParseOutcome::Invalid,
                }
            }
        }
    }

    /// Layer of settings given explicitly on the command line.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            device_id: self.device,
            extended: self.extended.then_some(true),
            allow_duplicates: self.allow_duplicates.then_some(true),
            summary_interval_ms: self.summary_interval,
            simulate: self.simulate.then_some(true),
            simulate_on_ms: self.simulate_on,
            simulate_off_ms: self.simulate_off,
            log_discoveries: self.log_discoveries.then_some(true),
            verbose: self.verbose.then_some(true),
            log_level: None,
            log_dir: self.log_dir.clone(),
            status_addr: self.status_addr,
        }
    }
}
