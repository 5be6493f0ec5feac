use clap::{Args, Subcommand};
use std::path::PathBuf;

use multipdp_frame::DEFAULT_MAX_PAYLOAD;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
#[cfg(unix)]
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the multiplexer on a DPRAM device and print deliveries.
    #[cfg(unix)]
    Run(RunArgs),
    /// Frame a payload for one channel.
    Encode(EncodeArgs),
    /// Parse a capture of link traffic and print its frames.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        #[cfg(unix)]
        Command::Run(args) => run::run(args, format),
        Command::Encode(args) => encode::run(args),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Device node carrying the multiplexed link.
    #[arg(default_value = multipdp_transport::DpramDevice::DEFAULT_PATH)]
    pub device: PathBuf,
    /// JSON configuration file.
    #[arg(long, value_name = "FILE", env = "MULTIPDP_CONFIG")]
    pub config: Option<PathBuf>,
    /// Data channels to activate at start (comma-separated or repeated).
    #[arg(long = "data-channel", value_name = "ID", value_delimiter = ',')]
    pub data_channels: Vec<i32>,
    /// Offset applied to data-channel ids (overrides the config file).
    #[arg(long, value_name = "OFFSET", allow_negative_numbers = true)]
    pub id_adjustment: Option<i32>,
    /// List active channels once started.
    #[arg(long)]
    pub list: bool,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Channel id to address.
    #[arg(long, short = 'c')]
    pub channel: u8,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Write frames to this file instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub out: Option<PathBuf>,
    /// Maximum payload per frame.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file; reads stdin when omitted or `-`.
    pub file: Option<PathBuf>,
    /// Only print frames for these channels (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<u8>>,
    /// Maximum payload per frame.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
