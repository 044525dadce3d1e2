use std::{
    collections::BTreeMap,
    fmt, fs,
    hash::{Hash, Hasher},
    mem,
    path::{Path, PathBuf},
};

use eyre::{Context, Result, eyre};
use tracing::{debug, info, warn};

/// Field stamped onto every record with the path it was loaded from.
pub const SOURCE_FILE_FIELD: &str = "source_data_file";
/// Subdirectory unparseable input files are moved into.
pub const QUARANTINE_DIR: &str = "broken";

const RUN_TYPE_FIELD: &str = "run_type";
const AGGREGATE_RUN_TYPE: &str = "aggregate";

/// Scalar value carried by a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_json::Value::String(s) => Some(Value::Str(s.clone())),
            other => Some(Value::Str(other.to_string())),
        }
    }
}

impl Eq for Value {}

// Floats hash by bit pattern so values can key group maps.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Value::Str(s) => s.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// One benchmark run's measured and contextual data, immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Loads every `*.json` file under `dir`, in path order.
pub fn load_dir(dir: &Path) -> Result<Vec<Record>> {
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("read data directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    load_files(&files)
}

/// Expands each benchmark file into records. Unparseable files are moved to
/// the quarantine directory next to them and the batch continues; a file
/// missing the `context` or `benchmarks` key aborts the whole load.
pub fn load_files(files: &[PathBuf]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for path in files {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let doc: serde_json::Value = match serde_json::from_str(&text) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(
                    "{}: not parseable as benchmark output ({err}), quarantining",
                    path.display()
                );
                quarantine(path)?;
                continue;
            }
        };
        let file_records = expand_runs(&doc, path)?;
        debug!("{}: {} records", path.display(), file_records.len());
        records.extend(file_records);
    }
    info!("loaded {} records", records.len());
    Ok(records)
}

fn expand_runs(doc: &serde_json::Value, path: &Path) -> Result<Vec<Record>> {
    let context = doc
        .get("context")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| eyre!("{}: missing required top-level `context`", path.display()))?;
    let benchmarks = doc
        .get("benchmarks")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| eyre!("{}: missing required top-level `benchmarks`", path.display()))?;

    let mut records = Vec::new();
    for entry in benchmarks {
        let Some(entry) = entry.as_object() else {
            warn!("{}: skipping non-mapping benchmark entry", path.display());
            continue;
        };
        let run_type = entry.get(RUN_TYPE_FIELD).and_then(serde_json::Value::as_str);
        if run_type.is_none() {
            warn!("{}: skipping entry without `{RUN_TYPE_FIELD}`", path.display());
            continue;
        }
        if run_type == Some(AGGREGATE_RUN_TYPE) {
            continue;
        }

        let mut record = Record::default();
        // Context fields are defaults; entry fields override them.
        for (key, json) in context.iter().chain(entry.iter()) {
            if let Some(value) = Value::from_json(json) {
                record.fields.insert(key.clone(), value);
            }
        }
        record
            .fields
            .insert(SOURCE_FILE_FIELD.to_owned(), Value::Str(path.display().to_string()));
        records.push(record);
    }
    Ok(records)
}

fn quarantine(path: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let broken = parent.join(QUARANTINE_DIR);
    fs::create_dir_all(&broken)
        .with_context(|| format!("create quarantine directory {}", broken.display()))?;
    let name = path
        .file_name()
        .ok_or_else(|| eyre!("no file name in {}", path.display()))?;
    fs::rename(path, broken.join(name))
        .with_context(|| format!("quarantine {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const GOOD: &str = r#"{
        "context": {
            "date": "2019-04-02 11:34:08",
            "host_name": "apollo",
            "num_cpus": 40,
            "library_build_type": "release"
        },
        "benchmarks": [
            {
                "name": "BM_MDSpan_Sum_3D_right/d20_d20_d20",
                "run_name": "BM_MDSpan_Sum_3D_right/d20_d20_d20",
                "run_type": "iteration",
                "iterations": 1000,
                "cpu_time": 125.5,
                "time_unit": "ns",
                "host_name": "apollo-gpu"
            },
            {
                "name": "BM_MDSpan_Sum_3D_right/d20_d20_d20_mean",
                "run_name": "BM_MDSpan_Sum_3D_right/d20_d20_d20",
                "run_type": "aggregate",
                "cpu_time": 125.5
            }
        ]
    }"#;

    fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn expands_non_aggregate_runs_with_context() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "apollo.json", GOOD);

        let records = load_dir(dir.path()).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(
            record.get("num_cpus"),
            Some(&Value::Int(40)),
            "context fields are inherited"
        );
        assert_eq!(record.get("cpu_time"), Some(&Value::Float(125.5)));
        assert!(
            record
                .get(SOURCE_FILE_FIELD)
                .and_then(Value::as_str)
                .unwrap()
                .ends_with("apollo.json")
        );
    }

    #[test]
    fn entry_fields_override_context() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "apollo.json", GOOD);

        let records = load_dir(dir.path()).unwrap();
        assert_eq!(
            records[0].get("host_name"),
            Some(&Value::Str("apollo-gpu".to_owned()))
        );
    }

    #[test]
    fn quarantines_unparseable_files_and_continues() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "apollo.json", GOOD);
        let bad = write_file(dir.path(), "corrupt.json", "not json at all {{{");

        let records = load_dir(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!bad.exists());
        assert!(dir.path().join(QUARANTINE_DIR).join("corrupt.json").exists());

        // Re-running after quarantine simply omits the moved file.
        let records = load_dir(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn missing_context_is_fatal() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "apollo.json", r#"{"benchmarks": []}"#);

        let err = load_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("context"));
    }

    #[test]
    fn missing_benchmarks_is_fatal() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "apollo.json", r#"{"context": {}}"#);

        let err = load_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("benchmarks"));
    }

    #[test]
    fn entries_without_run_type_are_skipped() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "apollo.json",
            r#"{"context": {}, "benchmarks": [{"name": "BM_x", "cpu_time": 1.0}]}"#,
        );

        let records = load_dir(dir.path()).unwrap();
        assert!(records.is_empty());
    }
}
