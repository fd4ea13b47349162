//! Command-line arguments

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use resident_core::RunMode;

/// Resident hot reload runner for Flutter applications
#[derive(Parser, Debug)]
#[command(name = "resident", version)]
#[command(about = "Resident hot reload runner for Flutter applications", long_about = None)]
pub struct Cli {
    /// Flutter project directory (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Launch the application and stay resident
    Run(RunArgs),

    /// Attach to an application that is already running
    Attach(AttachArgs),

    /// List attached devices
    Devices,

    /// Ask a running application to exit
    Stop {
        #[arg(long, value_name = "URI")]
        debug_uri: String,
    },

    /// Capture the screen of a running application
    Screenshot {
        #[arg(long, value_name = "URI")]
        debug_uri: String,

        /// Output file (defaults to the next free flutter_NN.png)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Device id or name prefix; repeat for several devices, or pass `all`
    #[arg(long = "device-id", value_name = "ID")]
    pub device_ids: Vec<String>,

    /// Entry point relative to the project (defaults to lib/main.dart)
    #[arg(long, value_name = "PATH")]
    pub target: Option<PathBuf>,

    #[arg(long, conflicts_with = "release")]
    pub profile: bool,

    #[arg(long)]
    pub release: bool,

    /// Start the isolate paused
    #[arg(long)]
    pub start_paused: bool,

    /// Exit once the application has started
    #[arg(long)]
    pub no_resident: bool,

    /// Leave the application running when the runner is interrupted
    #[arg(long)]
    pub keep_app_running: bool,
}

impl RunArgs {
    pub fn mode(&self) -> RunMode {
        if self.release {
            RunMode::Release
        } else if self.profile {
            RunMode::Profile
        } else {
            RunMode::Debug
        }
    }
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("endpoint").required(true).args(["debug_uri", "debug_port"])))]
pub struct AttachArgs {
    #[arg(long, value_name = "URI")]
    pub debug_uri: Option<String>,

    /// Service port on localhost
    #[arg(long, value_name = "N")]
    pub debug_port: Option<u16>,

    #[arg(long = "device-id", value_name = "ID")]
    pub device_id: Option<String>,
}

impl AttachArgs {
    pub fn service_uri(&self) -> String {
        match (&self.debug_uri, self.debug_port) {
            (Some(uri), _) => uri.clone(),
            (None, Some(port)) => format!("http://127.0.0.1:{port}/"),
            (None, None) => String::new(),
        }
    }
}
