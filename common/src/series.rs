use std::collections::HashMap;

use eyre::Result;
use itertools::Itertools;
use tracing::warn;

use crate::{
    record::{Record, Value},
    variable::{Filter, Registry},
};

/// Everything needed to turn the record set into one named series map.
#[derive(Debug, Clone)]
pub struct SeriesSpec {
    pub series_by: &'static str,
    pub x: &'static str,
    pub y: &'static str,
    pub include_only: Filter,
    pub baseline: Option<Filter>,
    pub warn_if_different: Vec<&'static str>,
}

impl SeriesSpec {
    pub fn new(series_by: &'static str, x: &'static str, y: &'static str) -> Self {
        Self {
            series_by,
            x,
            y,
            include_only: Filter::All,
            baseline: None,
            warn_if_different: Vec::new(),
        }
    }

    pub fn include_only(mut self, filter: Filter) -> Self {
        self.include_only = filter;
        self
    }

    /// Divide every bucket's statistic by the mean of the records matching
    /// `baseline` for the same x bucket.
    pub fn normalize_against(mut self, baseline: Filter) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Variables expected to be constant across the whole selection.
    pub fn warn_if_different(mut self, vars: &[&'static str]) -> Self {
        self.warn_if_different = vars.to_vec();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub x: Value,
    pub mean: f64,
    /// Sample standard deviation, scaled along with the mean when normalized.
    pub dev: f64,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct Series {
    pub key: Value,
    pub label: String,
    pub points: Vec<SeriesPoint>,
}

impl Series {
    pub fn point(&self, x: &Value) -> Option<&SeriesPoint> {
        self.points.iter().find(|p| p.x == *x)
    }
}

/// Built series map plus the context the summary printer and renderer need.
#[derive(Debug, Clone)]
pub struct SeriesSet {
    pub series: Vec<Series>,
    pub x_buckets: Vec<Value>,
    pub x_labels: Vec<String>,
    /// `None` when the x variable opts out of axis labeling.
    pub x_axis_label: Option<String>,
    pub y_label: String,
    pub normalized: bool,
    pub warnings: Vec<String>,
    records: Vec<Record>,
}

impl SeriesSet {
    /// The records that contributed at least one measurement.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn series_named(&self, label: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.label == label)
    }
}

/// Filters, groups and aggregates `records` according to `spec`.
///
/// A record contributes only if it passes the inclusion filter and the
/// series/x/y variables are all valid for it. X buckets and series keep
/// first-appearance order unless the x variable declares an ordering.
pub fn build_series(
    records: &[Record],
    registry: &Registry,
    spec: &SeriesSpec,
) -> Result<SeriesSet> {
    let mut picked = Vec::new();
    for (idx, record) in records.iter().enumerate() {
        if spec.include_only.matches(registry, record)? != Some(true) {
            continue;
        }
        let Some(series_val) = registry.eval(spec.series_by, record)? else {
            continue;
        };
        let Some(x_val) = registry.eval(spec.x, record)? else {
            continue;
        };
        let Some(y) = registry.eval(spec.y, record)?.and_then(|v| v.as_f64()) else {
            continue;
        };
        picked.push((idx, series_val, x_val, y));
    }

    let mut x_buckets: Vec<Value> = Vec::new();
    let mut series_keys: Vec<Value> = Vec::new();
    let mut groups: HashMap<(Value, Value), Vec<f64>> = HashMap::new();
    for (_, series_val, x_val, y) in &picked {
        if !x_buckets.contains(x_val) {
            x_buckets.push(x_val.clone());
        }
        if !series_keys.contains(series_val) {
            series_keys.push(series_val.clone());
        }
        groups
            .entry((series_val.clone(), x_val.clone()))
            .or_default()
            .push(*y);
    }
    if let Some(order) = registry.get(spec.x)?.x_order() {
        x_buckets.sort_by(order);
    }

    let mut warnings = Vec::new();

    let mut baseline: HashMap<Value, f64> = HashMap::new();
    if let Some(predicate) = &spec.baseline {
        let mut per_bucket: HashMap<Value, Vec<f64>> = HashMap::new();
        for record in records {
            if predicate.matches(registry, record)? != Some(true) {
                continue;
            }
            let Some(x_val) = registry.eval(spec.x, record)? else {
                continue;
            };
            let Some(y) = registry.eval(spec.y, record)?.and_then(|v| v.as_f64()) else {
                continue;
            };
            per_bucket.entry(x_val).or_default().push(y);
        }
        baseline = per_bucket
            .into_iter()
            .map(|(x_val, ys)| (x_val, mean(&ys)))
            .collect();

        let missing = x_buckets
            .iter()
            .filter(|x_val| !baseline.contains_key(x_val))
            .map(|x_val| registry.format(spec.x, x_val))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            let message = format!(
                "no baseline measurements for x bucket(s) {}; dropping them",
                missing.iter().join(", ")
            );
            warn!("{message}");
            warnings.push(message);
            x_buckets.retain(|x_val| baseline.contains_key(x_val));
        }
    }

    let mut series = Vec::new();
    for key in &series_keys {
        let mut points = Vec::new();
        for x_val in &x_buckets {
            let Some(ys) = groups.get(&(key.clone(), x_val.clone())) else {
                continue;
            };
            let mut stat_mean = mean(ys);
            let mut stat_dev = sample_stddev(ys);
            if let Some(base) = baseline.get(x_val) {
                stat_mean /= base;
                stat_dev /= base;
            }
            points.push(SeriesPoint {
                x: x_val.clone(),
                mean: stat_mean,
                dev: stat_dev,
                count: ys.len(),
            });
        }
        series.push(Series {
            key: key.clone(),
            label: registry.format(spec.series_by, key),
            points,
        });
    }

    let contributing: Vec<Record> = picked
        .iter()
        .map(|(idx, ..)| records[*idx].clone())
        .collect();

    for var in &spec.warn_if_different {
        let mut distinct = Vec::new();
        for record in &contributing {
            if let Some(value) = registry.eval(var, record)? {
                let formatted = registry.format(var, &value);
                if !distinct.contains(&formatted) {
                    distinct.push(formatted);
                }
            }
        }
        if distinct.len() > 1 {
            let message = format!(
                "{} is expected to be constant here but takes {} values: {}",
                registry.get(var)?.display_name(),
                distinct.len(),
                distinct.iter().join(", ")
            );
            warn!("{message}");
            warnings.push(message);
        }
    }

    let x_var = registry.get(spec.x)?;
    let x_labels = x_buckets
        .iter()
        .map(|x_val| registry.format(spec.x, x_val))
        .collect();
    let x_axis_label = x_var
        .labels_x_axis()
        .then(|| x_var.display_name().to_owned());
    let y_display = registry.get(spec.y)?.display_name();
    let y_label = if spec.baseline.is_some() {
        format!("{y_display} (relative)")
    } else {
        y_display.to_owned()
    };

    Ok(SeriesSet {
        series,
        x_buckets,
        x_labels,
        x_axis_label,
        y_label,
        normalized: spec.baseline.is_some(),
        warnings,
        records: contributing,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
