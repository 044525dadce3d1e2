use std::{
    path::Path,
    sync::{LazyLock, Mutex},
};

use eyre::{Result, eyre};
use plotters::prelude::*;
use tracing::debug;

use crate::series::SeriesSet;

/// Process-wide chart styling, mutated by the caller between charts;
/// last writer wins.
#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub font_family: String,
    pub title_font_size: u32,
    pub label_font_size: u32,
    pub legend_font_size: u32,
    pub canvas_size: (u32, u32),
    /// Width of one bar in x-axis units.
    pub bar_width: f64,
    /// Gap between bucket groups in x-axis units.
    pub group_gap: f64,
    /// Multiplier applied to the tallest bar+whisker for y-axis headroom.
    pub headroom: f64,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            font_family: "sans-serif".to_owned(),
            title_font_size: 22,
            label_font_size: 15,
            legend_font_size: 13,
            canvas_size: (900, 540),
            bar_width: 0.8,
            group_gap: 1.0,
            headroom: 1.15,
        }
    }
}

static STYLE: LazyLock<Mutex<ChartStyle>> = LazyLock::new(|| Mutex::new(ChartStyle::default()));

pub fn set_style(style: ChartStyle) {
    *STYLE.lock().unwrap() = style;
}

/// Snapshot of the current global style.
pub fn style() -> ChartStyle {
    STYLE.lock().unwrap().clone()
}

#[derive(Debug, Clone)]
pub struct BarChartOptions {
    pub title: String,
    pub legend: bool,
    pub error_bars: bool,
    /// Axis description overrides; the series set's labels otherwise.
    pub x_label: Option<String>,
    pub y_label: Option<String>,
}

impl BarChartOptions {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            legend: true,
            error_bars: true,
            x_label: None,
            y_label: None,
        }
    }

    pub fn without_legend(mut self) -> Self {
        self.legend = false;
        self
    }

    pub fn without_error_bars(mut self) -> Self {
        self.error_bars = false;
        self
    }
}

/// Renders a grouped bar chart: one group per x bucket, one bar per series,
/// whiskers at mean ± dispersion. Writes (or overwrites) an SVG at `path`;
/// the parent directory must already exist.
pub fn render_bar_chart(set: &SeriesSet, options: &BarChartOptions, path: &Path) -> Result<()> {
    if set.is_empty() {
        return Err(eyre!("nothing to plot for `{}`", options.title));
    }
    let style = style();
    let n_series = set.series.len();
    let n_buckets = set.x_buckets.len();
    let group_width = n_series as f64 * style.bar_width + style.group_gap;
    let total_width = n_buckets as f64 * group_width;
    let tallest = set
        .series
        .iter()
        .flat_map(|s| s.points.iter())
        .map(|p| if options.error_bars { p.mean + p.dev } else { p.mean })
        .fold(0.0f64, f64::max);
    let y_max = if tallest > 0.0 {
        tallest * style.headroom
    } else {
        1.0
    };

    let root = SVGBackend::new(path, style.canvas_size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            &options.title,
            (style.font_family.as_str(), style.title_font_size as i32).into_font(),
        )
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..total_width, 0f64..y_max)?;

    // Bucket labels sit under the middle of each group of bars.
    let x_labels = set.x_labels.clone();
    let group_center = (group_width - style.group_gap) / 2.0;
    let half_window = style.bar_width / 2.0;
    let formatter = move |x: &f64| {
        let bucket = (*x / group_width) as usize;
        let within = *x - bucket as f64 * group_width;
        if (within - group_center).abs() <= half_window {
            x_labels.get(bucket).cloned().unwrap_or_default()
        } else {
            String::new()
        }
    };

    let mut mesh = chart.configure_mesh();
    mesh.disable_x_mesh()
        .x_labels(n_buckets * (n_series + 1))
        .x_label_formatter(&formatter)
        .label_style((style.font_family.as_str(), style.label_font_size as i32));
    let y_desc = options.y_label.clone().unwrap_or_else(|| set.y_label.clone());
    mesh.y_desc(y_desc);
    if let Some(x_desc) = options.x_label.as_deref().or(set.x_axis_label.as_deref()) {
        mesh.x_desc(x_desc);
    }
    mesh.draw()?;

    for (series_idx, series) in set.series.iter().enumerate() {
        let color = Palette99::pick(series_idx).mix(0.9);
        let bars = chart.draw_series(series.points.iter().filter_map(|point| {
            let bucket = set.x_buckets.iter().position(|x| *x == point.x)?;
            let x0 = bucket as f64 * group_width + series_idx as f64 * style.bar_width;
            Some(Rectangle::new(
                [(x0, 0.0), (x0 + style.bar_width * 0.9, point.mean)],
                color.filled(),
            ))
        }))?;
        if options.legend {
            bars.label(series.label.clone()).legend(move |(x, y)| {
                Rectangle::new([(x, y - 6), (x + 14, y + 6)], color.filled())
            });
        }

        if options.error_bars {
            chart.draw_series(series.points.iter().filter_map(|point| {
                if point.dev <= 0.0 {
                    return None;
                }
                let bucket = set.x_buckets.iter().position(|x| *x == point.x)?;
                let x_center = bucket as f64 * group_width
                    + series_idx as f64 * style.bar_width
                    + style.bar_width * 0.45;
                Some(ErrorBar::new_vertical(
                    x_center,
                    (point.mean - point.dev).max(0.0),
                    point.mean,
                    point.mean + point.dev,
                    BLACK.filled(),
                    6,
                ))
            }))?;
        }
    }

    if options.legend {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .margin(8)
            .border_style(BLACK)
            .background_style(WHITE.mix(0.85))
            .label_font((style.font_family.as_str(), style.legend_font_size as i32))
            .draw()?;
    }

    root.present()?;
    debug!("wrote chart {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::Record,
        series::{SeriesSpec, build_series},
        variable::{Direction, Registry, Variable},
    };
    use std::fs;
    use tempfile::tempdir;

    fn sample_set() -> SeriesSet {
        let mut registry = Registry::new();
        registry.register(Variable::stored("impl", Direction::Input));
        registry.register(Variable::stored("size", Direction::Input).with_display("Size"));
        registry.register(Variable::stored("time", Direction::Output).with_display("Time (us)"));

        let mut records = Vec::new();
        for (impl_name, size, time) in [
            ("mdspan", 20, 10.0),
            ("mdspan", 20, 12.0),
            ("mdspan", 200, 100.0),
            ("raw", 20, 8.0),
            ("raw", 200, 90.0),
        ] {
            let mut record = Record::default();
            record.set("impl", impl_name);
            record.set("size", size);
            record.set("time", time);
            records.push(record);
        }
        build_series(&records, &registry, &SeriesSpec::new("impl", "size", "time")).unwrap()
    }

    #[test]
    fn writes_svg_with_bars_and_legend() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        let set = sample_set();

        render_bar_chart(&set, &BarChartOptions::new("Sum3D Benchmark"), &path).unwrap();

        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<?xml") || svg.contains("<svg"));
        assert!(svg.contains("mdspan"));
    }

    #[test]
    fn overwrites_existing_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        fs::write(&path, "stale").unwrap();
        let set = sample_set();

        render_bar_chart(
            &set,
            &BarChartOptions::new("t").without_legend().without_error_bars(),
            &path,
        )
        .unwrap();
        assert!(!fs::read_to_string(&path).unwrap().contains("stale"));
    }

    #[test]
    fn empty_set_is_an_error() {
        let dir = tempdir().unwrap();
        let registry = {
            let mut registry = Registry::new();
            registry.register(Variable::stored("impl", Direction::Input));
            registry.register(Variable::stored("size", Direction::Input));
            registry.register(Variable::stored("time", Direction::Output));
            registry
        };
        let set = build_series(&[], &registry, &SeriesSpec::new("impl", "size", "time")).unwrap();
        let err = render_bar_chart(
            &set,
            &BarChartOptions::new("empty"),
            &dir.path().join("x.svg"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("nothing to plot"));
    }
}
