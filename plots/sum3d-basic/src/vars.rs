use std::sync::LazyLock;

use common::{
    record::{Record, SOURCE_FILE_FIELD, Value},
    variable::{Direction, Expr, Registry, Variable},
};
use regex::Regex;

/// The harness reports nanoseconds; the plots show microseconds.
const NS_PER_US: f64 = 1000.0;

pub const UNKNOWN_COMPILER: &str = "<unknown>";

/// Shape token embedded in Sum3D benchmark names: three `_`-separated
/// extents, each prefixed with `d` when that extent is dynamic.
static SHAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(d?)(\d+)_(d?)(\d+)_(d?)(\d+)").unwrap());

/// Toolchain tokens recognized in data file paths, first match wins. The
/// naming convention drifted over the life of the data set, so these are
/// best-effort; anything unmatched becomes [`UNKNOWN_COMPILER`].
static KNOWN_COMPILERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(cuda)-(\d+\.\d+)_gcc-\d+\.\d+\.\d+",
        r"(gcc)-(\d+\.\d+\.\d+)",
        r"(intel)-(\d+\.\d+\.\d+)",
        r"(clang)-(\d+\.\d+)",
        r"(gcc)-(\d+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// One parsed shape token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub extents: [u64; 3],
    pub dynamic: [bool; 3],
}

impl Shape {
    pub fn volume(&self) -> i64 {
        self.extents.iter().product::<u64>() as i64
    }
}

pub fn parse_shape(name: &str) -> Option<Shape> {
    let caps = SHAPE_RE.captures(name)?;
    let extent = |idx: usize| caps[idx].parse::<u64>().ok();
    Some(Shape {
        extents: [extent(2)?, extent(4)?, extent(6)?],
        dynamic: [!caps[1].is_empty(), !caps[3].is_empty(), !caps[5].is_empty()],
    })
}

fn run_name(record: &Record) -> Option<&str> {
    record.get("run_name").and_then(Value::as_str)
}

fn outside_sum3d(_: &Registry, record: &Record) -> bool {
    !run_name(record).is_some_and(|name| name.contains("Sum_3D"))
}

fn missing_shape(registry: &Registry, record: &Record) -> bool {
    outside_sum3d(registry, record) || run_name(record).and_then(parse_shape).is_none()
}

// Raw-pointer runs without a Static marker size every extent at runtime, no
// matter what the shape token claims.
fn kind_and_dynamics(name: &str, shape: &Shape) -> (&'static str, [bool; 3]) {
    if name.contains("MDSpan") {
        ("mdspan", shape.dynamic)
    } else if name.contains("Static") {
        ("raw pointer", shape.dynamic)
    } else {
        ("raw pointer", [true; 3])
    }
}

fn layout_value(_: &Registry, record: &Record) -> Option<Value> {
    let name = run_name(record)?;
    if name.contains("/left_") {
        return Some("Left".into());
    }
    if name.contains("/right_") {
        return Some("Right".into());
    }
    if name.contains("Raw") {
        if name.contains("_right/") {
            return Some("Right".into());
        }
        if name.contains("_left/") {
            return Some("Left".into());
        }
    }
    None
}

fn size_value(_: &Registry, record: &Record) -> Option<Value> {
    run_name(record)
        .and_then(parse_shape)
        .map(|shape| Value::Int(shape.volume()))
}

fn iter_order_value(_: &Registry, record: &Record) -> Option<Value> {
    let name = run_name(record)?;
    if name.contains("Cuda") {
        return Some("Cuda".into());
    }
    if name.contains("_right/") {
        return Some("Right".into());
    }
    if name.contains("_left/") {
        return Some("Left".into());
    }
    None
}

fn type_and_shape_value(_: &Registry, record: &Record) -> Option<Value> {
    let name = run_name(record)?;
    let shape = parse_shape(name)?;
    let (kind, dynamics) = kind_and_dynamics(name, &shape);
    let flag = |idx: usize| if dynamics[idx] { 'D' } else { 'S' };
    Some(Value::Str(format!(
        "{kind} ({}x{}x{})",
        flag(0),
        flag(1),
        flag(2)
    )))
}

fn compiler_value(_: &Registry, record: &Record) -> Option<Value> {
    let source = record.get(SOURCE_FILE_FIELD)?.as_str()?;
    let token = KNOWN_COMPILERS
        .iter()
        .find_map(|re| re.find(source))
        .map(|m| m.as_str().to_owned());
    Some(Value::Str(token.unwrap_or_else(|| UNKNOWN_COMPILER.to_owned())))
}

fn format_compiler(value: &Value) -> String {
    let Some(token) = value.as_str() else {
        return value.to_string();
    };
    for re in KNOWN_COMPILERS.iter() {
        if let Some(caps) = re.captures(token) {
            let vendor = match &caps[1] {
                "gcc" => "GCC",
                "intel" => "ICC",
                "clang" => "Clang",
                "cuda" => "Cuda",
                _ => return token.to_owned(),
            };
            return format!("{vendor} {}", &caps[2]);
        }
    }
    UNKNOWN_COMPILER.to_owned()
}

fn format_run_name(value: &Value) -> String {
    let Some(name) = value.as_str() else {
        return value.to_string();
    };
    if !name.contains("Sum_3D") {
        return name.to_owned();
    }
    let Some(shape) = parse_shape(name) else {
        return name.to_owned();
    };
    let (kind, dynamics) = kind_and_dynamics(name, &shape);
    let layout = if name.contains("/left_") {
        ", layout left"
    } else if name.contains("/right_") {
        ", layout right"
    } else {
        ""
    };
    let note = if name.contains("Cuda") { ", Cuda" } else { "" };
    let marker = |idx: usize| if dynamics[idx] { "d" } else { "" };
    let [x, y, z] = shape.extents;
    format!(
        "{kind}{layout} ({x}{}x{y}{}x{z}{}){note}",
        marker(0),
        marker(1),
        marker(2)
    )
}

/// Builds the variable registry for the Sum3D microbenchmark family. Called
/// once at startup; the result is passed explicitly through the pipeline.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(Variable::stored("cpu_time", Direction::Output).with_display("Time"));
    registry.register(
        Variable::stored("repeats", Direction::Input)
            .with_display("Repeats")
            .with_default(1i64),
    );
    registry.register(
        Variable::expr(
            "execution_time",
            Direction::Output,
            Expr::var("cpu_time")
                .div(Expr::var("repeats"))
                .div(Expr::constant(NS_PER_US)),
        )
        .with_display("Time (us)"),
    );
    registry.register(Variable::stored("host_name", Direction::Input));
    registry.register(Variable::stored(SOURCE_FILE_FIELD, Direction::Input));
    registry.register(
        Variable::stored("run_name", Direction::Input)
            .with_display("Benchmark Name")
            .with_format(format_run_name),
    );
    registry.register(
        Variable::func("sum_3d_layout", Direction::Input, layout_value)
            .invalid_if(outside_sum3d)
            .with_display("Layout"),
    );
    registry.register(
        Variable::func("sum_3d_size", Direction::Input, size_value)
            .invalid_if(missing_shape)
            .with_display("Problem Size"),
    );
    registry.register(
        Variable::func("sum_3d_iter_order", Direction::Input, iter_order_value)
            .invalid_if(outside_sum3d)
            .with_display("Iteration Order"),
    );
    registry.register(
        Variable::func("sum_3d_type_and_shape", Direction::Input, type_and_shape_value)
            .invalid_if(missing_shape)
            .without_x_label()
            .with_display("Type and Shape"),
    );
    registry.register(
        Variable::func("compiler", Direction::Input, compiler_value)
            .with_display("Compiler")
            .with_format(format_compiler),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum3d_record(name: &str, source: &str) -> Record {
        let mut record = Record::default();
        record.set("run_name", name);
        record.set(SOURCE_FILE_FIELD, source);
        record.set("cpu_time", 5000.0);
        record
    }

    #[test]
    fn shape_token_parses_extents_and_dynamic_flags() {
        let shape = parse_shape("BM_Raw_Sum_3D_right/d20_200_d300").unwrap();
        assert_eq!(shape.extents, [20, 200, 300]);
        assert_eq!(shape.dynamic, [true, false, true]);
        assert_eq!(shape.volume(), 20 * 200 * 300);
    }

    #[test]
    fn names_without_shape_token_are_invalid() {
        assert_eq!(parse_shape("BM_MDSpan_Sum_3D/warmup"), None);
        let registry = registry();
        let record = sum3d_record("BM_MDSpan_Sum_3D/warmup", "data/gcc-8.2.0/out.json");
        assert_eq!(registry.eval("sum_3d_size", &record).unwrap(), None);
    }

    #[test]
    fn compiler_resolves_known_path_tokens() {
        let registry = registry();

        let gcc = sum3d_record("x", "data/apollo_gcc-8.2.0/out.json");
        let value = registry.eval("compiler", &gcc).unwrap().unwrap();
        assert_eq!(registry.format("compiler", &value), "GCC 8.2.0");

        let intel = sum3d_record("x", "data/apollo_intel-18.0.5/out.json");
        let value = registry.eval("compiler", &intel).unwrap().unwrap();
        assert_eq!(registry.format("compiler", &value), "ICC 18.0.5");

        let cuda = sum3d_record("x", "data/cuda-10.1_gcc-7.2.0/out.json");
        let value = registry.eval("compiler", &cuda).unwrap().unwrap();
        assert_eq!(registry.format("compiler", &value), "Cuda 10.1");
    }

    #[test]
    fn unmatched_compiler_paths_resolve_to_unknown() {
        let registry = registry();
        let record = sum3d_record("x", "data/somewhere/out.json");
        let value = registry.eval("compiler", &record).unwrap().unwrap();
        assert_eq!(value, Value::Str(UNKNOWN_COMPILER.to_owned()));
        assert_eq!(registry.format("compiler", &value), UNKNOWN_COMPILER);
    }

    #[test]
    fn layout_and_iteration_order_come_from_name_tokens() {
        let registry = registry();

        let mdspan = sum3d_record(
            "BM_MDSpan_Sum_3D_right/left_d20_d20_d20",
            "data/gcc-8.2.0/out.json",
        );
        assert_eq!(
            registry.eval("sum_3d_layout", &mdspan).unwrap(),
            Some(Value::Str("Left".to_owned()))
        );
        assert_eq!(
            registry.eval("sum_3d_iter_order", &mdspan).unwrap(),
            Some(Value::Str("Right".to_owned()))
        );

        let raw = sum3d_record(
            "BM_Raw_Static_Sum_3D_left/20_20_20",
            "data/gcc-8.2.0/out.json",
        );
        assert_eq!(
            registry.eval("sum_3d_layout", &raw).unwrap(),
            Some(Value::Str("Left".to_owned()))
        );

        let cuda = sum3d_record(
            "BM_MDSpan_Cuda_Sum_3D_right/right_d80_d80_d80",
            "data/cuda-10.1_gcc-7.2.0/out.json",
        );
        assert_eq!(
            registry.eval("sum_3d_iter_order", &cuda).unwrap(),
            Some(Value::Str("Cuda".to_owned()))
        );
    }

    #[test]
    fn layout_variable_is_invalid_outside_sum3d() {
        let registry = registry();
        let record = sum3d_record("BM_Something_Else/20", "data/gcc-8.2.0/out.json");
        assert_eq!(registry.eval("sum_3d_layout", &record).unwrap(), None);
    }

    #[test]
    fn type_and_shape_distinguishes_static_and_dynamic_extents() {
        let registry = registry();

        let mdspan = sum3d_record(
            "BM_MDSpan_Sum_3D_right/d20_20_d20",
            "data/gcc-8.2.0/out.json",
        );
        assert_eq!(
            registry.eval("sum_3d_type_and_shape", &mdspan).unwrap(),
            Some(Value::Str("mdspan (DxSxD)".to_owned()))
        );

        // Raw pointers without a Static marker are fully dynamic whatever the
        // token says.
        let raw = sum3d_record("BM_Raw_Sum_3D_right/20_20_20", "data/gcc-8.2.0/out.json");
        assert_eq!(
            registry.eval("sum_3d_type_and_shape", &raw).unwrap(),
            Some(Value::Str("raw pointer (DxDxD)".to_owned()))
        );

        let raw_static = sum3d_record(
            "BM_RawStatic_Sum_3D_right/20_20_20",
            "data/gcc-8.2.0/out.json",
        );
        assert_eq!(
            registry.eval("sum_3d_type_and_shape", &raw_static).unwrap(),
            Some(Value::Str("raw pointer (SxSxS)".to_owned()))
        );
    }

    #[test]
    fn run_name_formatter_summarizes_sum3d_names() {
        let registry = registry();
        let value = Value::Str("BM_MDSpan_Cuda_Sum_3D_right/right_d80_80_d80".to_owned());
        assert_eq!(
            registry.format("run_name", &value),
            "mdspan, layout right (80dx80x80d), Cuda"
        );
        let plain = Value::Str("BM_Other/20".to_owned());
        assert_eq!(registry.format("run_name", &plain), "BM_Other/20");
    }

    #[test]
    fn execution_time_scales_by_repeats_and_unit() {
        let registry = registry();
        let mut record = sum3d_record(
            "BM_MDSpan_Sum_3D_right/d20_d20_d20",
            "data/gcc-8.2.0/out.json",
        );
        record.set("repeats", 5i64);
        assert_eq!(
            registry.eval("execution_time", &record).unwrap(),
            Some(Value::Float(1.0))
        );
    }
}
