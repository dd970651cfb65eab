//! Cell voltage chart: bars, trend line with markers and a dashed mean line.
//!
//! The image carries no text so no system font is required. Titles, axis captions
//! and tick numbers are placed by the report using [`ChartGeometry`].

use crate::protocol::CellStatistics;
use crate::{Error, Result};
use plotters::prelude::*;
use std::path::Path;

pub const WIDTH: u32 = 1200;
pub const HEIGHT: u32 = 450;
/// Padding in pixels between the image border and the plotting area.
pub const MARGIN: u32 = 30;
/// Space added above the highest and below the lowest cell, in mV.
pub const Y_PADDING: f64 = 50.0;

const BAR_HALF_WIDTH: f64 = 0.3;
const BAR_COLOR: RGBColor = RGBColor(0x00, 0x7a, 0xcc);
const TREND_COLOR: RGBColor = RGBColor(0x00, 0x30, 0x45);
const MEAN_COLOR: RGBColor = RGBColor(0xff, 0x6b, 0x6b);
const GRID_COLOR: RGBColor = RGBColor(0xdc, 0xdc, 0xdc);
const AXIS_COLOR: RGBColor = RGBColor(0x33, 0x33, 0x33);
const GRID_MULTIPLIERS: [f64; 4] = [1.0, 2.0, 5.0, 10.0];
const MAX_GRID_INTERVALS: f64 = 8.0;

/// Coordinate mapping shared by the image and the text drawn around it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartGeometry {
    count: usize,
    y_min: f64,
    y_max: f64,
}

impl ChartGeometry {
    pub fn for_cells(cells: &[u32]) -> Option<Self> {
        let stats = CellStatistics::from_cells(cells)?;
        Some(Self {
            count: cells.len(),
            y_min: f64::from(stats.min) - Y_PADDING,
            y_max: f64::from(stats.max) + Y_PADDING,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Y axis bounds in mV, `[min - 50, max + 50]`.
    pub fn y_range(&self) -> (f64, f64) {
        (self.y_min, self.y_max)
    }

    fn x_range(&self) -> (f64, f64) {
        (0.5, self.count as f64 + 0.5)
    }

    /// Values of the horizontal grid lines, at most nine for any span.
    ///
    /// The step is the smallest 1, 2 or 5 times a power of ten that covers an
    /// eighth of the span.
    pub fn grid_values(&self) -> Vec<f64> {
        let span = self.y_max - self.y_min;
        let rough = span / MAX_GRID_INTERVALS;
        let magnitude = 10f64.powi(rough.log10().floor() as i32);
        let step = GRID_MULTIPLIERS
            .into_iter()
            .map(|multiplier| multiplier * magnitude)
            .find(|&step| step >= rough)
            .unwrap_or(10.0 * magnitude);
        let first = (self.y_min / step).ceil();
        (0u32..)
            .map(|n| (first + f64::from(n)) * step)
            .take_while(|&value| value <= self.y_max)
            .collect()
    }

    /// Horizontal position of cell `index` (1-based) as a fraction of the image width.
    pub fn x_fraction(&self, index: usize) -> f64 {
        let (start, end) = self.x_range();
        let plot_width = f64::from(WIDTH - 2 * MARGIN);
        (f64::from(MARGIN) + (index as f64 - start) / (end - start) * plot_width) / f64::from(WIDTH)
    }

    /// Vertical position of `value` as a fraction of the image height, from the bottom.
    pub fn y_fraction(&self, value: f64) -> f64 {
        let plot_height = f64::from(HEIGHT - 2 * MARGIN);
        (f64::from(MARGIN) + (value - self.y_min) / (self.y_max - self.y_min) * plot_height)
            / f64::from(HEIGHT)
    }
}

fn chart_error<E: std::fmt::Display>(err: E) -> Error {
    Error::Composition(format!("Cannot draw chart: {err}"))
}

/// Renders the chart of `cells` (mV) as PNG to `destination`.
///
/// Returns `false` without creating a file when `cells` is empty.
pub fn render(cells: &[u32], destination: &Path) -> bool {
    if cells.is_empty() {
        log::debug!("No cell voltages, chart skipped");
        return false;
    }
    match try_render(cells, destination) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Error plotting: {e}");
            false
        }
    }
}

pub fn try_render(cells: &[u32], destination: &Path) -> Result<()> {
    let geometry = ChartGeometry::for_cells(cells)
        .ok_or_else(|| Error::Composition("No cell voltages to plot".to_string()))?;
    let (x_start, x_end) = geometry.x_range();
    let (y_min, y_max) = geometry.y_range();

    let root = BitMapBackend::new(destination, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(MARGIN)
        .build_cartesian_2d(x_start..x_end, y_min..y_max)
        .map_err(chart_error)?;

    chart
        .draw_series(geometry.grid_values().into_iter().map(|y| {
            PathElement::new(vec![(x_start, y), (x_end, y)], GRID_COLOR.stroke_width(1))
        }))
        .map_err(chart_error)?;

    let points: Vec<(f64, f64)> = cells
        .iter()
        .enumerate()
        .map(|(i, &volt)| ((i + 1) as f64, f64::from(volt)))
        .collect();

    chart
        .draw_series(points.iter().map(|&(x, volt)| {
            Rectangle::new(
                [(x - BAR_HALF_WIDTH, y_min), (x + BAR_HALF_WIDTH, volt)],
                BAR_COLOR.mix(0.7).filled(),
            )
        }))
        .map_err(chart_error)?;

    chart
        .draw_series(LineSeries::new(
            points.iter().copied(),
            TREND_COLOR.stroke_width(3),
        ))
        .map_err(chart_error)?;
    chart
        .draw_series(
            points
                .iter()
                .map(|&point| Circle::new(point, 6, TREND_COLOR.filled())),
        )
        .map_err(chart_error)?;

    let mean = points.iter().map(|&(_, volt)| volt).sum::<f64>() / points.len() as f64;
    let dash = (x_end - x_start) / 80.0;
    let dashes = (0..40).map(|n| {
        let from = x_start + 2.0 * dash * n as f64;
        PathElement::new(
            vec![(from, mean), (from + dash, mean)],
            MEAN_COLOR.mix(0.8).stroke_width(2),
        )
    });
    chart.draw_series(dashes).map_err(chart_error)?;

    // axes with a tick at every cell index
    let tick = (y_max - y_min) * 0.03;
    let axes = [
        vec![(x_start, y_min), (x_end, y_min)],
        vec![(x_start, y_min), (x_start, y_max)],
    ];
    chart
        .draw_series(
            axes.into_iter()
                .chain(points.iter().map(|&(x, _)| vec![(x, y_min), (x, y_min + tick)]))
                .map(|path| PathElement::new(path, AXIS_COLOR.stroke_width(2))),
        )
        .map_err(chart_error)?;

    root.present().map_err(chart_error)?;
    log::debug!(
        "Chart of {} cells written to {}",
        cells.len(),
        destination.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cells_create_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("chart.png");
        assert!(!render(&[], &destination));
        assert!(!destination.exists());
    }

    #[test]
    fn render_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("chart.png");
        assert!(render(&[3800, 3820, 3790, 3810], &destination));
        let bytes = std::fs::read(&destination).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn render_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let cells = [3701, 3899, 3750];
        assert!(render(&cells, &a));
        assert!(render(&cells, &b));
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }

    #[test]
    fn render_single_cell() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("one.png");
        assert!(render(&[3800], &destination));
    }

    #[test]
    fn render_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("missing").join("chart.png");
        assert!(!render(&[3800, 3810], &destination));
    }

    #[test]
    fn geometry_bounds_and_ticks() {
        let geometry = ChartGeometry::for_cells(&[3800, 3820, 3790, 3810]).unwrap();
        assert_eq!(geometry.y_range(), (3740.0, 3870.0));
        assert_eq!(geometry.count(), 4);

        let fractions: Vec<f64> = (1..=4).map(|i| geometry.x_fraction(i)).collect();
        assert!(fractions.windows(2).all(|w| w[0] < w[1]));
        assert!(fractions.iter().all(|f| (0.0..1.0).contains(f)));
        // first cell centred in the first eighth of the plot area
        let expected = (30.0 + 0.125 * 1140.0) / 1200.0;
        assert!((fractions[0] - expected).abs() < 1e-9);

        assert!((geometry.y_fraction(3740.0) - 30.0 / 450.0).abs() < 1e-9);
        assert!((geometry.y_fraction(3870.0) - 420.0 / 450.0).abs() < 1e-9);
    }

    #[test]
    fn grid_values_within_range() {
        let geometry = ChartGeometry::for_cells(&[3800, 3820, 3790, 3810]).unwrap();
        let grid = geometry.grid_values();
        assert_eq!(grid, vec![3740.0, 3760.0, 3780.0, 3800.0, 3820.0, 3840.0, 3860.0]);
        assert!(ChartGeometry::for_cells(&[]).is_none());
    }

    #[test]
    fn grid_values_bounded_for_any_span() {
        for cells in [
            vec![3800],
            vec![0, 65535],
            vec![1, 1_000_000],
            vec![1, 100_000_000],
            vec![0, u32::MAX],
        ] {
            let geometry = ChartGeometry::for_cells(&cells).unwrap();
            let grid = geometry.grid_values();
            let (y_min, y_max) = geometry.y_range();
            assert!(!grid.is_empty(), "{cells:?}");
            assert!(grid.len() <= 9, "{cells:?} gave {} lines", grid.len());
            assert!(grid.iter().all(|v| (y_min..=y_max).contains(v)));
        }
        let geometry = ChartGeometry::for_cells(&[0, u32::MAX]).unwrap();
        assert_eq!(geometry.grid_values(), vec![0.0, 1e9, 2e9, 3e9, 4e9]);
    }

    #[test]
    fn render_extreme_span() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("wide.png");
        assert!(render(&[1, u32::MAX], &destination));
    }
}
