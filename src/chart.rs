//! Minimal SVG charts.
//!
//! Supports scatter plots, line plots with optional error bars and grouped
//! bar charts, which is all the report needs. A chart without any data
//! point refuses to render with [`ChartError::NoData`] so the caller can
//! report it as skipped.

use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

const WIDTH: f64 = 900.0;
const HEIGHT: f64 = 540.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 200.0;
const MARGIN_TOP: f64 = 56.0;
const MARGIN_BOTTOM: f64 = 70.0;
const TICKS: usize = 5;

const PALETTE: [&str; 8] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
];

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("chart '{0}' has no data points")]
    NoData(String),

    #[error("failed to render chart: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("failed to write chart {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Scatter,
    Line,
    /// Grouped bars; x values are indices into the chart's categories
    Bar,
}

/// One named set of points
#[derive(Debug, Clone, Default)]
pub struct Series {
    pub label: String,
    pub points: Vec<(f64, f64)>,
    /// Symmetric error per point (line charts only)
    pub errors: Option<Vec<f64>>,
}

impl Series {
    pub fn new(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.into(),
            points,
            errors: None,
        }
    }

    pub fn with_errors(mut self, errors: Vec<f64>) -> Self {
        self.errors = Some(errors);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Chart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub kind: ChartKind,
    pub series: Vec<Series>,
    pub categories: Vec<String>,
    /// Horizontal reference line with its label
    pub reference: Option<(f64, String)>,
}

impl Chart {
    pub fn new(
        title: impl Into<String>,
        x_label: impl Into<String>,
        y_label: impl Into<String>,
        kind: ChartKind,
    ) -> Self {
        Self {
            title: title.into(),
            x_label: x_label.into(),
            y_label: y_label.into(),
            kind,
            series: Vec::new(),
            categories: Vec::new(),
            reference: None,
        }
    }

    pub fn with_series(mut self, series: Series) -> Self {
        if !series.points.is_empty() {
            self.series.push(series);
        }
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_reference(mut self, y: f64, label: impl Into<String>) -> Self {
        self.reference = Some((y, label.into()));
        self
    }

    pub fn point_count(&self) -> usize {
        self.series.iter().map(|s| s.points.len()).sum()
    }

    fn x_range(&self) -> (f64, f64) {
        if self.kind == ChartKind::Bar {
            return (-0.5, self.categories.len().max(1) as f64 - 0.5);
        }
        let xs = self.series.iter().flat_map(|s| s.points.iter().map(|p| p.0));
        let (min, max) = min_max(xs);
        pad_range(min, max)
    }

    fn y_range(&self) -> (f64, f64) {
        let mut ys: Vec<f64> = Vec::new();
        for series in &self.series {
            for (i, (_, y)) in series.points.iter().enumerate() {
                let err = series
                    .errors
                    .as_ref()
                    .and_then(|e| e.get(i))
                    .copied()
                    .unwrap_or(0.0);
                ys.push(y + err);
                ys.push(y - err);
            }
        }
        if let Some((y, _)) = self.reference {
            ys.push(y);
        }
        let (_, max) = min_max(ys.iter().copied());
        let min = ys.iter().copied().fold(0.0_f64, f64::min);
        let max = if max <= min { min + 1.0 } else { max };
        (min, max * 1.1)
    }

    /// Render the chart as a standalone SVG document
    pub fn render_svg(&self) -> Result<String, ChartError> {
        if self.point_count() == 0 {
            return Err(ChartError::NoData(self.title.clone()));
        }
        let mut svg = String::new();
        self.draw(&mut svg)?;
        Ok(svg)
    }

    fn draw(&self, svg: &mut String) -> std::fmt::Result {
        let (x_min, x_max) = self.x_range();
        let (y_min, y_max) = self.y_range();
        let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
        let sx = |x: f64| MARGIN_LEFT + (x - x_min) / (x_max - x_min) * plot_w;
        let sy = |y: f64| MARGIN_TOP + plot_h - (y - y_min) / (y_max - y_min) * plot_h;

        writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="12">"#,
            w = WIDTH,
            h = HEIGHT
        )?;
        writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
        writeln!(
            svg,
            r#"<text x="{}" y="28" text-anchor="middle" font-size="16" font-weight="bold">{}</text>"#,
            MARGIN_LEFT + plot_w / 2.0,
            escape(&self.title)
        )?;

        // Grid and y ticks
        for i in 0..=TICKS {
            let value = y_min + (y_max - y_min) * i as f64 / TICKS as f64;
            let y = sy(value);
            writeln!(
                svg,
                r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#e0e0e0"/>"##,
                MARGIN_LEFT,
                y,
                MARGIN_LEFT + plot_w,
                y
            )?;
            writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"#,
                MARGIN_LEFT - 6.0,
                y + 4.0,
                format_tick(value, y_max - y_min)
            )?;
        }

        // X ticks
        if self.kind == ChartKind::Bar {
            for (i, category) in self.categories.iter().enumerate() {
                writeln!(
                    svg,
                    r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
                    sx(i as f64),
                    MARGIN_TOP + plot_h + 18.0,
                    escape(category)
                )?;
            }
        } else {
            for i in 0..=TICKS {
                let value = x_min + (x_max - x_min) * i as f64 / TICKS as f64;
                writeln!(
                    svg,
                    r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
                    sx(value),
                    MARGIN_TOP + plot_h + 18.0,
                    format_tick(value, x_max - x_min)
                )?;
            }
        }

        // Axes
        writeln!(
            svg,
            r#"<line x1="{l}" y1="{b}" x2="{r}" y2="{b}" stroke="black"/><line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="black"/>"#,
            l = MARGIN_LEFT,
            r = MARGIN_LEFT + plot_w,
            t = MARGIN_TOP,
            b = MARGIN_TOP + plot_h
        )?;
        writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            MARGIN_LEFT + plot_w / 2.0,
            HEIGHT - 20.0,
            escape(&self.x_label)
        )?;
        writeln!(
            svg,
            r#"<text x="20" y="{:.1}" text-anchor="middle" transform="rotate(-90 20 {:.1})">{}</text>"#,
            MARGIN_TOP + plot_h / 2.0,
            MARGIN_TOP + plot_h / 2.0,
            escape(&self.y_label)
        )?;

        if let Some((value, label)) = &self.reference {
            let y = sy(*value);
            writeln!(
                svg,
                r##"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="#555" stroke-dasharray="6 4"/>"##,
                MARGIN_LEFT,
                y,
                MARGIN_LEFT + plot_w,
                y
            )?;
            writeln!(
                svg,
                r##"<text x="{:.1}" y="{:.1}" fill="#555">{}</text>"##,
                MARGIN_LEFT + 4.0,
                y - 4.0,
                escape(label)
            )?;
        }

        let series_count = self.series.len().max(1) as f64;
        for (index, series) in self.series.iter().enumerate() {
            let color = PALETTE[index % PALETTE.len()];
            match self.kind {
                ChartKind::Scatter => {
                    for (x, y) in &series.points {
                        writeln!(
                            svg,
                            r#"<circle cx="{:.1}" cy="{:.1}" r="4" fill="{}" fill-opacity="0.7"/>"#,
                            sx(*x),
                            sy(*y),
                            color
                        )?;
                    }
                }
                ChartKind::Line => {
                    let mut points = series.points.clone();
                    points.sort_by(|a, b| a.0.total_cmp(&b.0));
                    let path: Vec<String> = points
                        .iter()
                        .map(|(x, y)| format!("{:.1},{:.1}", sx(*x), sy(*y)))
                        .collect();
                    writeln!(
                        svg,
                        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
                        path.join(" "),
                        color
                    )?;
                    for (i, (x, y)) in series.points.iter().enumerate() {
                        if let Some(err) = series.errors.as_ref().and_then(|e| e.get(i)) {
                            writeln!(
                                svg,
                                r#"<line x1="{x:.1}" y1="{:.1}" x2="{x:.1}" y2="{:.1}" stroke="{}"/>"#,
                                sy(y - err),
                                sy(y + err),
                                color,
                                x = sx(*x)
                            )?;
                        }
                        writeln!(
                            svg,
                            r#"<circle cx="{:.1}" cy="{:.1}" r="3" fill="{}"/>"#,
                            sx(*x),
                            sy(*y),
                            color
                        )?;
                    }
                }
                ChartKind::Bar => {
                    let slot = plot_w / self.categories.len().max(1) as f64 * 0.8;
                    let bar_w = slot / series_count;
                    for (x, y) in &series.points {
                        let left = sx(*x) - slot / 2.0 + bar_w * index as f64;
                        let top = sy(y.max(0.0));
                        writeln!(
                            svg,
                            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"#,
                            left,
                            top,
                            bar_w,
                            (sy(0.0_f64.max(y_min)) - top).max(0.0),
                            color
                        )?;
                    }
                }
            }

            // Legend
            let ly = MARGIN_TOP + 10.0 + index as f64 * 20.0;
            let lx = WIDTH - MARGIN_RIGHT + 16.0;
            writeln!(
                svg,
                r#"<rect x="{:.1}" y="{:.1}" width="12" height="12" fill="{}"/><text x="{:.1}" y="{:.1}">{}</text>"#,
                lx,
                ly - 10.0,
                color,
                lx + 18.0,
                ly,
                escape(&series.label)
            )?;
        }

        svg.push_str("</svg>\n");
        Ok(())
    }

    pub fn write_svg(&self, path: &Path) -> Result<(), ChartError> {
        let svg = self.render_svg()?;
        std::fs::write(path, svg).map_err(|source| ChartError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

fn min_max<I: Iterator<Item = f64>>(values: I) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn pad_range(min: f64, max: f64) -> (f64, f64) {
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        let pad = if min == 0.0 { 1.0 } else { min.abs() * 0.1 };
        return (min - pad, max + pad);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

fn format_tick(value: f64, span: f64) -> String {
    if span >= 10.0 {
        format!("{:.0}", value)
    } else if span >= 1.0 {
        format!("{:.1}", value)
    } else {
        format!("{:.3}", value)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
