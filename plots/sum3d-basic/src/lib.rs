use std::path::Path;

use common::{
    chart::{BarChartOptions, render_bar_chart},
    figure::Figure,
    record::{Record, SOURCE_FILE_FIELD},
    series::{SeriesSet, SeriesSpec, build_series},
    summary::print_series_summary,
    variable::{Direction, Filter, Registry, Variable},
};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod vars;

pub use vars::registry;

fn cube(edge: i64) -> i64 {
    edge * edge * edge
}

fn base_spec() -> SeriesSpec {
    SeriesSpec::new("sum_3d_layout", "sum_3d_type_and_shape", "execution_time")
}

// Input variables worth auditing; the source path is unique per file and
// would drown the rest.
fn audit_variables(registry: &Registry) -> Vec<&'static str> {
    registry
        .variables()
        .filter(|var| var.direction() == Direction::Input && var.name() != SOURCE_FILE_FIELD)
        .map(Variable::name)
        .collect()
}

fn render_or_skip(
    set: &SeriesSet,
    options: &BarChartOptions,
    path: &Path,
    figure: &str,
) -> Result<()> {
    if set.is_empty() {
        warn!("{figure}: no matching records for {}, skipping", path.display());
        return Ok(());
    }
    for warning in &set.warnings {
        warn!("{figure}: {warning}");
    }
    render_bar_chart(set, options, path).with_context(|| format!("render {figure}"))?;
    info!("wrote {}", path.display());
    Ok(())
}

/// Cuda runs from one toolkit build on one host: layout series over
/// data-structure/shape buckets, one chart per edge length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sum3dCuda {
    pub sizes: Vec<i64>,
    /// Toolkit token expected in the data file path, e.g. `cuda-10.1`.
    pub toolkit: String,
    /// Host token expected in the data file path.
    pub host: String,
    /// Device note appended to the title, e.g. `V100`.
    #[serde(default)]
    pub device: Option<String>,
}

#[typetag::serde]
impl Figure for Sum3dCuda {
    fn name(&self) -> String {
        "sum3d-cuda".to_owned()
    }

    fn render(&self, records: &[Record], registry: &Registry, figure_dir: &Path) -> Result<()> {
        for &size in &self.sizes {
            let spec = base_spec()
                .include_only(
                    Filter::eq("sum_3d_size", cube(size))
                        .and(Filter::eq("sum_3d_iter_order", "Cuda"))
                        .and(Filter::contains(SOURCE_FILE_FIELD, self.toolkit.clone()))
                        .and(Filter::contains(SOURCE_FILE_FIELD, self.host.clone())),
                )
                .warn_if_different(&["host_name"]);
            let set = build_series(records, registry, &spec)?;

            let mut title = format!("Sum3D Benchmark ({size}x{size}x{size}), {}", self.toolkit);
            if let Some(device) = &self.device {
                title.push_str(&format!(", {device}"));
            }
            let path = figure_dir.join(format!("cuda_{size}_sum3d.svg"));
            render_or_skip(&set, &BarChartOptions::new(title), &path, &self.name())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerSpec {
    /// Toolchain token expected in the data file path, e.g. `intel-17.0.1_opt`.
    pub pattern: String,
    /// Name shown in the chart title.
    pub label: String,
}

/// Serial right-iteration runs on one host: layout series over
/// data-structure/shape buckets, one chart per edge length and compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sum3dLayoutComparison {
    pub sizes: Vec<i64>,
    pub compilers: Vec<CompilerSpec>,
    pub host: String,
}

#[typetag::serde]
impl Figure for Sum3dLayoutComparison {
    fn name(&self) -> String {
        "sum3d-layout".to_owned()
    }

    fn render(&self, records: &[Record], registry: &Registry, figure_dir: &Path) -> Result<()> {
        for &size in &self.sizes {
            for compiler in &self.compilers {
                let spec = base_spec()
                    .include_only(
                        Filter::eq("sum_3d_size", cube(size))
                            .and(Filter::eq("sum_3d_iter_order", "Right"))
                            .and(Filter::contains(SOURCE_FILE_FIELD, compiler.pattern.clone()))
                            .and(Filter::contains(SOURCE_FILE_FIELD, self.host.clone())),
                    )
                    .warn_if_different(&["host_name"]);
                let set = build_series(records, registry, &spec)?;

                let title = format!(
                    "Sum3D Benchmark ({size}x{size}x{size}), {} serial ({})",
                    self.host, compiler.label
                );
                let path = figure_dir.join(format!(
                    "{}_{}_{size}_sum3d.svg",
                    self.host, compiler.pattern
                ));
                render_or_skip(&set, &BarChartOptions::new(title), &path, &self.name())?;
            }
        }
        Ok(())
    }
}

/// Serial right-iteration, right-layout runs compared across every non-Cuda
/// compiler found in the data, one chart per edge length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sum3dCompilerComparison {
    pub sizes: Vec<i64>,
    /// Print the distinct input-variable values feeding each chart.
    #[serde(default)]
    pub print_summary: bool,
    /// Compiler path token to normalize every series against.
    #[serde(default)]
    pub normalize_against: Option<String>,
}

#[typetag::serde]
impl Figure for Sum3dCompilerComparison {
    fn name(&self) -> String {
        "sum3d-compilers".to_owned()
    }

    fn render(&self, records: &[Record], registry: &Registry, figure_dir: &Path) -> Result<()> {
        for &size in &self.sizes {
            let include = Filter::eq("sum_3d_size", cube(size))
                .and(Filter::eq("sum_3d_iter_order", "Right"))
                .and(Filter::eq("sum_3d_layout", "Right"))
                .and(Filter::contains("compiler", "cuda").not());
            let mut spec =
                SeriesSpec::new("compiler", "sum_3d_type_and_shape", "execution_time")
                    .include_only(include.clone())
                    .warn_if_different(&["host_name"]);
            if let Some(token) = &self.normalize_against {
                spec = spec
                    .normalize_against(include.and(Filter::contains("compiler", token.clone())));
            }
            let set = build_series(records, registry, &spec)?;

            if self.print_summary && !set.is_empty() {
                print_series_summary(&set, registry, &audit_variables(registry))?;
            }

            let stem = if self.normalize_against.is_some() {
                "layout_right_norm"
            } else {
                "layout_right"
            };
            let title = format!("Sum3D Benchmark, Layout Right ({size}x{size}x{size})");
            let path = figure_dir.join(format!("{stem}_{size}_sum3d.svg"));
            render_or_skip(&set, &BarChartOptions::new(title), &path, &self.name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::record::load_dir;
    use std::fs;
    use tempfile::tempdir;

    fn benchmark_file(host: &str, cpu_times: &[(&str, f64)]) -> String {
        let benchmarks = cpu_times
            .iter()
            .map(|(name, time)| {
                format!(
                    r#"{{"name": "{name}", "run_name": "{name}", "run_type": "iteration",
                        "iterations": 100, "cpu_time": {time}, "time_unit": "ns"}}"#
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        format!(r#"{{"context": {{"host_name": "{host}"}}, "benchmarks": [{benchmarks}]}}"#)
    }

    #[test]
    fn compiler_comparison_renders_end_to_end() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let figure_dir = dir.path().join("figures");
        fs::create_dir_all(&data_dir).unwrap();
        fs::create_dir_all(&figure_dir).unwrap();

        let runs: &[(&str, f64)] = &[
            ("BM_MDSpan_Sum_3D_right/right_d20_d20_d20", 4000.0),
            ("BM_MDSpan_Sum_3D_right/right_d20_d20_d20", 4400.0),
            ("BM_Raw_Sum_3D_right/right_20_20_20", 3000.0),
        ];
        fs::write(
            data_dir.join("apollo_gcc-8.2.0.json"),
            benchmark_file("apollo", runs),
        )
        .unwrap();
        fs::write(
            data_dir.join("apollo_intel-18.0.5.json"),
            benchmark_file("apollo", runs),
        )
        .unwrap();

        let registry = registry();
        let records = load_dir(&data_dir).unwrap();
        assert_eq!(records.len(), 6);

        let figure = Sum3dCompilerComparison {
            sizes: vec![20],
            print_summary: true,
            normalize_against: None,
        };
        figure.render(&records, &registry, &figure_dir).unwrap();
        assert!(figure_dir.join("layout_right_20_sum3d.svg").exists());
    }

    #[test]
    fn normalized_comparison_pins_baseline_to_one() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();

        let runs: &[(&str, f64)] = &[
            ("BM_MDSpan_Sum_3D_right/right_d20_d20_d20", 4000.0),
            ("BM_Raw_Sum_3D_right/right_20_20_20", 3000.0),
        ];
        fs::write(
            data_dir.join("apollo_gcc-8.2.0.json"),
            benchmark_file("apollo", runs),
        )
        .unwrap();
        fs::write(
            data_dir.join("apollo_intel-18.0.5.json"),
            benchmark_file("apollo", runs),
        )
        .unwrap();

        let registry = registry();
        let records = load_dir(&data_dir).unwrap();

        let include = Filter::eq("sum_3d_size", cube(20))
            .and(Filter::eq("sum_3d_iter_order", "Right"))
            .and(Filter::eq("sum_3d_layout", "Right"));
        let spec = SeriesSpec::new("compiler", "sum_3d_type_and_shape", "execution_time")
            .include_only(include.clone())
            .normalize_against(include.and(Filter::contains("compiler", "gcc-8.2.0")));
        let set = build_series(&records, &registry, &spec).unwrap();

        let baseline = set.series_named("GCC 8.2.0").unwrap();
        for point in &baseline.points {
            assert_eq!(point.mean, 1.0);
        }
        assert!(set.series_named("ICC 18.0.5").is_some());
    }

    #[test]
    fn figures_round_trip_through_yaml_config() {
        let yaml = r#"
name: sum3d
settings:
  data_dir: data
  figure_dir: figures
figures:
  - type: Sum3dCuda
    sizes: [80, 400]
    toolkit: cuda-10.1
    host: apollo
    device: V100
  - type: Sum3dLayoutComparison
    sizes: [20, 200]
    host: apollo
    compilers:
      - pattern: intel-17.0.1_opt
        label: ICC 17.0.1
  - type: Sum3dCompilerComparison
    sizes: [20, 200]
    print_summary: true
"#;
        let config: common::config::Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.figures.len(), 3);
        assert_eq!(config.figures[0].name(), "sum3d-cuda");
        assert_eq!(config.figures[2].name(), "sum3d-compilers");
    }
}
