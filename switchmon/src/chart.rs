//! SVG charts of per-interval traffic.
//!
//! A chart has two stacked panels, inbound on top and outbound below. The x
//! axis is wall-clock time and the y axis octets per polling interval, labeled
//! in binary units.

use std::{fmt, fs, path::Path};

use chrono::{DateTime, NaiveDateTime};
use plotters::{
    coord::Shift,
    prelude::{
        BLACK, BLUE, CYAN, ChartBuilder, Color, DrawingArea, GREEN, IntoDrawingArea, LineSeries,
        MAGENTA, PathElement, RED, RGBColor, SVGBackend, SeriesLabelPosition, WHITE, YELLOW,
    },
};
use tracing::{debug, info};

use crate::{
    delta::{self, DeltaSeries},
    port::PortId,
    sample::{Direction, Sample},
    units,
};

/// Timestamp format of x axis ticks.
pub const TIME_FORMAT: &str = "%m-%d %H:%M:%S";

/// Colors assigned to ports in turn on multi-port charts.
pub const PALETTE: [RGBColor; 7] = [BLUE, GREEN, RED, CYAN, MAGENTA, YELLOW, BLACK];

const SIZE_SINGLE: (u32, u32) = (1400, 600);
const SIZE_ALL: (u32, u32) = (1400, 1400);

/// Errors produced when rendering charts
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The plotting backend failed.
    #[error("Failed to draw chart: {0}")]
    Plotters(String),
    /// The output directory could not be created.
    #[error("Failed to prepare chart output: {0}")]
    Io(#[from] std::io::Error),
    /// There is nothing to draw.
    #[error("No data to plot")]
    NoData,
}

fn plotters_error<E: fmt::Display>(err: E) -> Error {
    Error::Plotters(err.to_string())
}

/// The plottable form of one port's stored samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plot {
    port: PortId,
    deltas: DeltaSeries,
}

impl Plot {
    /// Normalize `samples` into per-interval deltas for both directions.
    #[must_use]
    pub fn from_series(port: PortId, samples: &[Sample]) -> Self {
        Self {
            port,
            deltas: delta::normalize(samples),
        }
    }

    /// The port this plot describes.
    #[must_use]
    pub fn port(&self) -> PortId {
        self.port
    }

    /// The underlying deltas.
    #[must_use]
    pub fn deltas(&self) -> &DeltaSeries {
        &self.deltas
    }

    /// True if there are fewer than two samples, so nothing to draw.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// `(timestamp, octets)` points for `direction`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn points(&self, direction: Direction) -> Vec<(NaiveDateTime, f64)> {
        self.deltas
            .points(direction)
            .into_iter()
            .map(|(t, v)| (t, v as f64))
            .collect()
    }

    /// `(timestamp, label)` points for `direction`, magnitudes formatted with
    /// [`units::format_bytes`].
    #[must_use]
    pub fn formatted(&self, direction: Direction) -> Vec<(NaiveDateTime, String)> {
        self.points(direction)
            .into_iter()
            .map(|(t, v)| (t, units::format_bytes(v)))
            .collect()
    }

    /// Title of the panel for `direction`.
    #[must_use]
    pub fn title(&self, direction: Direction) -> String {
        format!("Switch Info for Port {} ({})", self.port, direction.long())
    }
}

struct Line {
    label: Option<String>,
    color: RGBColor,
    points: Vec<(f64, f64)>,
}

#[allow(clippy::cast_precision_loss)]
fn epoch(t: NaiveDateTime) -> f64 {
    t.and_utc().timestamp() as f64
}

#[allow(clippy::cast_possible_truncation)]
fn time_label(x: &f64) -> String {
    DateTime::from_timestamp(x.round() as i64, 0)
        .map(|t| t.naive_utc().format(TIME_FORMAT).to_string())
        .unwrap_or_default()
}

fn octet_label(y: &f64) -> String {
    units::axis_label(*y)
}

fn bounds(lines: &[Line]) -> ((f64, f64), (f64, f64)) {
    let mut x = (f64::INFINITY, f64::NEG_INFINITY);
    let mut y = (0.0_f64, 1.0_f64);
    for (px, py) in lines.iter().flat_map(|l| l.points.iter()) {
        x = (x.0.min(*px), x.1.max(*px));
        y = (y.0.min(*py), y.1.max(*py));
    }
    if x.0 >= x.1 {
        x = (x.0 - 1.0, x.0 + 1.0);
    }
    (x, y)
}

fn draw_panel(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    caption: &str,
    direction: Direction,
    lines: &[Line],
) -> Result<(), Error> {
    let ((x_min, x_max), (y_min, y_max)) = bounds(lines);

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(90)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plotters_error)?;

    chart
        .configure_mesh()
        .x_labels(8)
        .x_label_formatter(&time_label)
        .y_label_formatter(&octet_label)
        .x_desc("Timestamps")
        .y_desc(direction.axis())
        .draw()
        .map_err(plotters_error)?;

    let mut labeled = false;
    for line in lines {
        let style = line.color.stroke_width(2);
        let series = chart
            .draw_series(LineSeries::new(line.points.iter().copied(), style).point_size(3))
            .map_err(plotters_error)?;
        if let Some(label) = &line.label {
            labeled = true;
            series
                .label(label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
        }
    }

    if labeled {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(plotters_error)?;
    }
    Ok(())
}

fn prepare(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn to_xy(points: Vec<(NaiveDateTime, f64)>) -> Vec<(f64, f64)> {
    points.into_iter().map(|(t, v)| (epoch(t), v)).collect()
}

/// Draw one port: inbound in blue above, outbound in red below.
///
/// # Errors
///
/// Returns [`Error::NoData`] if the plot has no deltas, otherwise any error
/// writing `path`.
pub fn render_port(plot: &Plot, path: &Path) -> Result<(), Error> {
    if plot.is_empty() {
        return Err(Error::NoData);
    }
    prepare(path)?;

    let root = SVGBackend::new(path, SIZE_SINGLE).into_drawing_area();
    root.fill(&WHITE).map_err(plotters_error)?;
    let panels = root.split_evenly((2, 1));

    for (area, (direction, color)) in panels
        .iter()
        .zip(Direction::ALL.into_iter().zip([BLUE, RED]))
    {
        let line = Line {
            label: None,
            color,
            points: to_xy(plot.points(direction)),
        };
        draw_panel(area, &plot.title(direction), direction, &[line])?;
    }

    root.present().map_err(plotters_error)?;
    info!("Wrote chart for port {} to {}", plot.port, path.display());
    Ok(())
}

/// Overlay every port, inbound above and outbound below, one color per port.
///
/// Ports without deltas are skipped.
///
/// # Errors
///
/// Returns [`Error::NoData`] if no port has deltas, otherwise any error
/// writing `path`.
pub fn render_all(plots: &[Plot], path: &Path) -> Result<(), Error> {
    let drawable: Vec<&Plot> = plots.iter().filter(|p| !p.is_empty()).collect();
    if drawable.is_empty() {
        return Err(Error::NoData);
    }
    debug!(
        "Skipping {} ports without deltas",
        plots.len() - drawable.len()
    );
    prepare(path)?;

    let root = SVGBackend::new(path, SIZE_ALL).into_drawing_area();
    root.fill(&WHITE).map_err(plotters_error)?;
    let panels = root.split_evenly((2, 1));

    for (area, direction) in panels.iter().zip(Direction::ALL) {
        let lines: Vec<Line> = drawable
            .iter()
            .zip(PALETTE.iter().cycle())
            .map(|(plot, color)| Line {
                label: Some(format!("Port {} {}", plot.port, direction.short())),
                color: *color,
                points: to_xy(plot.points(direction)),
            })
            .collect();
        let caption = format!("All Ports ({})", direction.long());
        draw_panel(area, &caption, direction, &lines)?;
    }

    root.present().map_err(plotters_error)?;
    info!("Wrote chart for {} ports to {}", drawable.len(), path.display());
    Ok(())
}
