mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "multipdp", version, about = "DPRAM channel multiplexer CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_data_channels() {
        let cli = Cli::try_parse_from([
            "multipdp",
            "run",
            "/dev/dpram1",
            "--data-channel",
            "1,2",
            "--data-channel",
            "3",
            "--id-adjustment",
            "-1",
        ])
        .expect("run args should parse");

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.data_channels, vec![1, 2, 3]);
        assert_eq!(args.id_adjustment, Some(-1));
        assert_eq!(args.device.to_str(), Some("/dev/dpram1"));
    }

    #[test]
    fn run_defaults_to_standard_device() {
        let cli = Cli::try_parse_from(["multipdp", "run"]).expect("run args should parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            args.device.to_str(),
            Some(multipdp_transport::DpramDevice::DEFAULT_PATH)
        );
        assert!(args.data_channels.is_empty());
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "multipdp", "encode", "-c", "1", "--data", "hi", "--file", "/tmp/x",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn encode_requires_a_payload() {
        let err = Cli::try_parse_from(["multipdp", "encode", "-c", "1"])
            .expect_err("missing payload should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_decode_channel_filter() {
        let cli = Cli::try_parse_from(["multipdp", "--format", "json", "decode", "--channels", "1,25"])
            .expect("decode args should parse");
        let Command::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        assert_eq!(args.channels, Some(vec![1, 25]));
        assert!(args.file.is_none());
    }
}
