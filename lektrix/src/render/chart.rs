//! Line chart of the trailing window.
//!
//! plotters draws the grid, axes and series into an RGB buffer. The title,
//! axis names and tick labels are then drawn on top with the bitmap font in
//! [`super::text`]. A window with one measurement is drawn as a marker.

use std::fmt::Display;
use std::io::Cursor;
use std::ops::Range;

use chrono::{Local, TimeZone};
use image::{ImageFormat, Rgb, RgbImage};
use lektrix_store::{Measurement, Timestamp};
use plotters::prelude::*;

use super::text::{self, GLYPH};
use super::RenderError;

const TITLE: &str = "Last Hour Measurements";
const X_LABEL: &str = "Time";
const Y_LABEL: &str = "Value";

const GRID: RGBColor = RGBColor(225, 225, 225);
const AXIS: RGBColor = RGBColor(40, 40, 40);
const SERIES: RGBColor = RGBColor(31, 119, 180);
const LABEL: Rgb<u8> = Rgb([70, 70, 70]);

const MARGIN_LEFT: u32 = 90;
const MARGIN_RIGHT: u32 = 30;
const MARGIN_TOP: u32 = 50;
const MARGIN_BOTTOM: u32 = 60;
const TICKS: u32 = 5;
const TITLE_SCALE: u32 = 2;
const MARKER_RADIUS: u32 = 5;

/// Half-width of the x range around a lone measurement, in seconds.
const SINGLE_POINT_SPAN: f64 = 30.0;

/// Data ranges of the plot area.
#[derive(Debug, Clone)]
struct Frame {
    t: Range<f64>,
    v: Range<f64>,
}

impl Frame {
    fn new(points: &[Measurement], width: u32, height: u32) -> Result<Self, RenderError> {
        let (first, last) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(RenderError::Chart("no measurements to draw".into())),
        };
        if width <= MARGIN_LEFT + MARGIN_RIGHT || height <= MARGIN_TOP + MARGIN_BOTTOM {
            return Err(RenderError::Chart(format!("canvas {width}x{height} is too small")));
        }

        let t = if first.timestamp == last.timestamp {
            let t = first.timestamp as f64;
            (t - SINGLE_POINT_SPAN)..(t + SINGLE_POINT_SPAN)
        } else {
            (first.timestamp as f64)..(last.timestamp as f64)
        };

        let (low, high) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), m| {
            (lo.min(m.value), hi.max(m.value))
        });
        if !low.is_finite() || !high.is_finite() {
            return Err(RenderError::Chart("values are not finite".into()));
        }
        let pad = if high > low {
            (high - low) * 0.05
        } else {
            (low.abs() * 0.1).max(1.0)
        };

        Ok(Self {
            t,
            v: (low - pad)..(high + pad),
        })
    }

    fn value_step(&self) -> f64 {
        (self.v.end - self.v.start) / f64::from(TICKS)
    }

    fn value_ticks(&self) -> impl Iterator<Item = f64> + '_ {
        let step = self.value_step();
        (0..=TICKS).map(move |i| {
            let value = self.v.start + step * f64::from(i);
            if value.abs() < step * 1e-6 {
                0.0
            } else {
                value
            }
        })
    }

    fn time_ticks(&self) -> impl Iterator<Item = f64> + '_ {
        let step = (self.t.end - self.t.start) / f64::from(TICKS);
        (0..=TICKS).map(move |i| self.t.start + step * f64::from(i))
    }
}

/// Tick label texts with the pixel row or column they belong to.
#[derive(Debug, Default)]
struct Labels {
    values: Vec<(String, i32)>,
    times: Vec<(String, i32)>,
}

fn chart_err(e: impl Display) -> RenderError {
    RenderError::Chart(e.to_string())
}

/// Render `points` (ascending by timestamp) as a PNG.
pub fn render_png(points: &[Measurement], width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
    let img = draw(points, width, height)?;

    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| RenderError::Chart(format!("png encoding failed: {e}")))?;
    Ok(bytes)
}

fn draw(points: &[Measurement], width: u32, height: u32) -> Result<RgbImage, RenderError> {
    let frame = Frame::new(points, width, height)?;

    let mut buf = vec![0u8; width as usize * height as usize * 3];
    let labels = plot(&mut buf, (width, height), &frame, points)?;
    let mut img = RgbImage::from_raw(width, height, buf)
        .ok_or_else(|| RenderError::Chart("chart buffer has the wrong size".into()))?;

    draw_labels(&mut img, &labels);
    Ok(img)
}

fn plot(
    buf: &mut [u8],
    size: (u32, u32),
    frame: &Frame,
    points: &[Measurement],
) -> Result<Labels, RenderError> {
    let root = BitMapBackend::with_buffer(buf, size).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin_top(MARGIN_TOP)
        .margin_bottom(MARGIN_BOTTOM)
        .margin_left(MARGIN_LEFT)
        .margin_right(MARGIN_RIGHT)
        .build_cartesian_2d(frame.t.clone(), frame.v.clone())
        .map_err(chart_err)?;

    let (t, v) = (&frame.t, &frame.v);
    let decimals = decimals_for(frame.value_step());
    let area = chart.plotting_area();
    let labels = Labels {
        values: frame
            .value_ticks()
            .map(|value| (format!("{value:.decimals$}"), area.map_coordinate(&(t.start, value)).1))
            .collect(),
        times: frame
            .time_ticks()
            .map(|time| (time_label(time.round() as Timestamp), area.map_coordinate(&(time, v.start)).0))
            .collect(),
    };

    chart
        .draw_series(
            frame
                .value_ticks()
                .map(|value| PathElement::new(vec![(t.start, value), (t.end, value)], GRID)),
        )
        .map_err(chart_err)?;
    chart
        .draw_series(
            frame
                .time_ticks()
                .map(|time| PathElement::new(vec![(time, v.start), (time, v.end)], GRID)),
        )
        .map_err(chart_err)?;
    // Axes go over the grid.
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(t.start, v.end), (t.start, v.start), (t.end, v.start)],
            AXIS,
        )))
        .map_err(chart_err)?;

    match points {
        [only] => {
            chart
                .draw_series(std::iter::once(Circle::new(
                    (only.timestamp as f64, only.value),
                    MARKER_RADIUS,
                    SERIES.filled(),
                )))
                .map_err(chart_err)?;
        }
        _ => {
            chart
                .draw_series(LineSeries::new(
                    points.iter().map(|m| (m.timestamp as f64, m.value)),
                    SERIES.stroke_width(2),
                ))
                .map_err(chart_err)?;
        }
    }

    root.present().map_err(chart_err)?;
    Ok(labels)
}

fn draw_labels(img: &mut RgbImage, labels: &Labels) {
    let (width, height) = (i64::from(img.width()), i64::from(img.height()));
    let glyph = i64::from(GLYPH);
    let plot_bottom = height - i64::from(MARGIN_BOTTOM);

    let title_width = i64::from(text::text_width(TITLE, TITLE_SCALE));
    text::draw_text(img, TITLE, (width - title_width) / 2, 16, TITLE_SCALE, LABEL);

    for (value, y) in &labels.values {
        let w = i64::from(text::text_width(value, 1));
        text::draw_text(img, value, i64::from(MARGIN_LEFT) - 8 - w, i64::from(*y) - glyph / 2, 1, LABEL);
    }
    for (time, x) in &labels.times {
        let w = i64::from(text::text_width(time, 1));
        text::draw_text(img, time, i64::from(*x) - w / 2, plot_bottom + 10, 1, LABEL);
    }

    let plot_center_x = (i64::from(MARGIN_LEFT) + width - i64::from(MARGIN_RIGHT)) / 2;
    let x_label_width = i64::from(text::text_width(X_LABEL, 1));
    text::draw_text(img, X_LABEL, plot_center_x - x_label_width / 2, plot_bottom + 32, 1, LABEL);

    let plot_center_y = (i64::from(MARGIN_TOP) + plot_bottom) / 2;
    let y_label_height = i64::from(text::text_width(Y_LABEL, 1));
    text::draw_text_vertical(img, Y_LABEL, 12, plot_center_y + y_label_height / 2, 1, LABEL);
}

/// Local time of day as `HH:MM`.
fn time_label(timestamp: Timestamp) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default()
}

fn decimals_for(step: f64) -> usize {
    if step >= 10.0 {
        0
    } else if step >= 1.0 {
        1
    } else if step >= 0.1 {
        2
    } else {
        3
    }
}
