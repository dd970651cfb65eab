//! Single page PDF diagnostic report.
//!
//! # Example
//!
//! ```no_run
//! use amplyze_lib::protocol::Snapshot;
//! use amplyze_lib::simulator::SimulatedSource;
//! use amplyze_lib::report;
//! use std::path::Path;
//!
//! let snapshot = Snapshot::decode(&SimulatedSource::new().generate());
//! if !report::compose(&snapshot, Path::new("report.pdf"), None) {
//!     eprintln!("Report could not be written");
//! }
//! ```

pub mod chart;
mod pdf;

use crate::protocol::{CellStatistics, Snapshot, FALLBACK_MARKER};
use crate::{Error, Result};
use chrono::NaiveDateTime;
use image::DynamicImage;
use std::fmt;
use std::path::{Path, PathBuf};

pub const TITLE: &str = "BATTERY DIAGNOSTIC REPORT";
pub const FOOTER: &str = "End of Report - Generated by Amplyze";
/// Cell chemistry printed in the overview; the device does not report it.
pub const CHEMISTRY: &str = "LION";
pub const REPORT_NAME_PREFIX: &str = "Amplyze_Report_";

/// Suggested file name for a report created at `at`.
pub fn default_report_name(at: NaiveDateTime) -> String {
    format!("{}{}.pdf", REPORT_NAME_PREFIX, at.format("%Y-%m-%d_%H-%M"))
}

/// Overall outcome printed in the status banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Attention,
}

impl Verdict {
    /// Pass only if both decoded statuses are exactly nominal.
    pub fn of(snapshot: &Snapshot) -> Self {
        if snapshot.is_nominal() {
            Verdict::Pass
        } else {
            Verdict::Attention
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Attention => write!(f, "FAIL / ATTENTION"),
        }
    }
}

/// Content of the report, independent of how it is drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayout {
    pub generated: String,
    pub verdict: Verdict,
    /// Two parameter/value column pairs, first row is the header.
    pub overview: Vec<[String; 4]>,
    /// Check/status rows, first row is the header.
    pub diagnostics: Vec<[String; 2]>,
    pub cells: Vec<u32>,
    pub statistics: Option<CellStatistics>,
}

fn with_unit(value: Option<i64>, unit: &str) -> String {
    match value {
        Some(value) => format!("{value} {unit}"),
        None => format!("{FALLBACK_MARKER} {unit}"),
    }
}

fn plain(value: Option<i64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| FALLBACK_MARKER.to_string())
}

impl ReportLayout {
    pub fn build(snapshot: &Snapshot, generated_at: NaiveDateTime) -> Self {
        let row = |a: &str, b: String, c: &str, d: String| [a.to_string(), b, c.to_string(), d];
        Self {
            generated: format!("Generated: {}", generated_at.format("%d %B %Y - %H:%M:%S")),
            verdict: Verdict::of(snapshot),
            overview: vec![
                row("Parameter", "Value".to_string(), "Parameter", "Value".to_string()),
                row(
                    "Pack Voltage",
                    with_unit(snapshot.pack_voltage_mv(), "mV"),
                    "Gauge Type",
                    snapshot.gauge_type().unwrap_or(FALLBACK_MARKER).to_string(),
                ),
                row(
                    "Current",
                    with_unit(snapshot.current_ma(), "mA"),
                    "Cycle Count",
                    plain(snapshot.cycle_count()),
                ),
                row(
                    "Temperature",
                    with_unit(snapshot.temperature_c(), "°C"),
                    "Chemistry",
                    CHEMISTRY.to_string(),
                ),
                row(
                    "Rem. Capacity",
                    with_unit(snapshot.remain_capacity_mah(), "mAh"),
                    "Full Capacity",
                    with_unit(snapshot.full_capacity_mah(), "mAh"),
                ),
            ],
            diagnostics: vec![
                ["Diagnostic Check".to_string(), "Status".to_string()],
                [
                    "Safety Alerts".to_string(),
                    snapshot.safety_status_text().to_string(),
                ],
                [
                    "Permanent Failures".to_string(),
                    snapshot.pf_status_text().to_string(),
                ],
            ],
            cells: snapshot.cells().to_vec(),
            statistics: snapshot.cell_statistics(),
        }
    }

    pub fn status_line(&self) -> String {
        format!("OVERALL STATUS: {}", self.verdict)
    }

    pub fn statistics_caption(&self) -> Option<String> {
        self.statistics.map(|stats| format!("Statistics: {stats}"))
    }
}

/// Where the transient chart for a report at `destination` is written.
pub fn chart_path_for(destination: &Path) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    destination.with_file_name(format!("{stem}_plot.png"))
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    let image = image::open(path)
        .map_err(|e| Error::Composition(format!("Cannot load image {}: {e}", path.display())))?;
    // alpha channels are not embedded, flatten to RGB
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Writes the report and reduces any failure to `false`.
///
/// Exactly one file is written at `destination`; the transient chart image is
/// removed whether or not composition succeeds.
pub fn compose(snapshot: &Snapshot, destination: &Path, logo: Option<&Path>) -> bool {
    match try_compose(snapshot, destination, logo) {
        Ok(()) => {
            log::info!("Report written to {}", destination.display());
            true
        }
        Err(e) => {
            log::error!("Error generating PDF: {e}");
            false
        }
    }
}

/// Like [`compose`] but returns the failure cause.
pub fn try_compose(snapshot: &Snapshot, destination: &Path, logo: Option<&Path>) -> Result<()> {
    let chart_path = chart_path_for(destination);
    let result = write_report(snapshot, destination, logo, &chart_path);
    if chart_path.exists() {
        if let Err(e) = std::fs::remove_file(&chart_path) {
            log::warn!("Cannot remove chart {}: {e}", chart_path.display());
        }
    }
    result
}

fn write_report(
    snapshot: &Snapshot,
    destination: &Path,
    logo: Option<&Path>,
    chart_path: &Path,
) -> Result<()> {
    let layout = ReportLayout::build(snapshot, chrono::Local::now().naive_local());

    let chart = if chart::render(&layout.cells, chart_path) {
        Some(load_image(chart_path)?)
    } else {
        None
    };

    let logo = match logo {
        Some(path) if path.exists() => Some(load_image(path)?),
        Some(path) => {
            log::warn!("Logo {} not found, header without logo", path.display());
            None
        }
        None => None,
    };

    pdf::write(&layout, chart.as_ref(), logo.as_ref(), destination)
}
