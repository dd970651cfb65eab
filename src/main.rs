use amplyze_lib::acquisition::{AcquisitionFacade, Session};
use amplyze_lib::protocol::Snapshot;
use amplyze_lib::report::{self, ReportLayout};
use amplyze_lib::serialport::SerialSettings;
use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::path::PathBuf;
use std::{ops::Deref, panic};

mod commandline;
mod config;

use commandline::{CliArgs, CliCommands, SourceArgs};
use config::AppConfig;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

/// Reads once, connecting first unless simulating.
fn acquire(session: &mut Session, source: &SourceArgs) -> Result<Snapshot> {
    if !source.simulate {
        session
            .facade_mut()
            .connect(&source.device)
            .with_context(|| format!("Cannot connect to '{}'", source.device))?;
    }
    let snapshot = session
        .read(source.simulate)
        .with_context(|| "Cannot read BMS")?
        .clone();
    session.facade_mut().disconnect();
    Ok(snapshot)
}

fn print_snapshot(snapshot: &Snapshot) {
    let layout = ReportLayout::build(snapshot, chrono::Local::now().naive_local());
    for row in layout.overview.iter().skip(1) {
        println!("{}: {}", row[0], row[1]);
        println!("{}: {}", row[2], row[3]);
    }
    for row in layout.diagnostics.iter().skip(1) {
        println!("{}: {}", row[0], row[1]);
    }
    println!("Cells: {:?}", snapshot.cells());
    if let Some(caption) = layout.statistics_caption() {
        println!("{caption}");
    }
    println!("{}", layout.status_line());
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = AppConfig::load_or_default(&args.config)?;
    let settings: SerialSettings =
        config.serial_settings(args.baud_rate, args.timeout, args.settle_delay);
    let mut session = Session::new(AcquisitionFacade::new(settings));

    match args.command {
        CliCommands::Ports => {
            let ports = session
                .facade()
                .list_ports()
                .with_context(|| "Cannot enumerate serial ports")?;
            if ports.is_empty() {
                info!("No USB serial ports found");
            }
            for port in ports {
                println!("{port}");
            }
        }
        CliCommands::Read { source, json } => {
            let snapshot = acquire(&mut session, &source)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        CliCommands::Report {
            source,
            output,
            logo,
        } => {
            acquire(&mut session, &source)?;
            let destination = output.unwrap_or_else(|| {
                config
                    .output_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(report::default_report_name(
                        chrono::Local::now().naive_local(),
                    ))
            });
            let logo = logo.or_else(|| config.logo.clone());
            if !session.save_report(&destination, logo.as_deref()) {
                bail!("Cannot write report '{}'", destination.display());
            }
            println!("Report saved to {}", destination.display());
        }
    }

    Ok(())
}
