use crate::config;
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM3")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SourceArgs {
    /// Generate a synthetic reading instead of querying the device
    #[arg(short, long)]
    pub simulate: bool,

    /// Serial port device path or port label (e.g., /dev/ttyUSB0, "COM3 - USB Serial Device")
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// List serial ports that look like USB-serial adapters
    Ports,
    /// Read the BMS once and print the decoded values
    Read {
        #[command(flatten)]
        source: SourceArgs,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read the BMS once and write a PDF diagnostic report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        /// Report file (default: Amplyze_Report_<YYYY-MM-DD_HH-MM>.pdf in the output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Image shown next to the report title
        #[arg(long)]
        logo: Option<PathBuf>,
    },
}

const fn about_text() -> &'static str {
    "battery management unit diagnostics and report tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Configuration file; missing file means built-in defaults
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Serial baud rate (default 115200)
    #[arg(long)]
    pub baud_rate: Option<u32>,

    /// Timeout for reading the response line (e.g., "500ms", "2s")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    /// Delay after opening the port before the first request (e.g., "1s")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub settle_delay: Option<Duration>,

    #[command(subcommand)]
    pub command: CliCommands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parse_report_command() {
        let args = CliArgs::parse_from([
            "amplyze",
            "--timeout",
            "500ms",
            "report",
            "--simulate",
            "-o",
            "out.pdf",
        ]);
        assert_eq!(args.timeout, Some(Duration::from_millis(500)));
        assert_eq!(args.config, PathBuf::from("amplyze.yaml"));
        match args.command {
            CliCommands::Report { source, output, logo } => {
                assert!(source.simulate);
                assert_eq!(output, Some(PathBuf::from("out.pdf")));
                assert_eq!(logo, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
