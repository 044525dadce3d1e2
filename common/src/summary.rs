use eyre::Result;
use itertools::Itertools;

use crate::{series::SeriesSet, variable::Registry};

/// Sorted distinct formatted values a variable takes across the records that
/// contributed to the series set.
pub fn distinct_values(
    set: &SeriesSet,
    registry: &Registry,
    variable: &str,
) -> Result<Vec<String>> {
    let mut values = Vec::new();
    for record in set.records() {
        if let Some(value) = registry.eval(variable, record)? {
            let formatted = registry.format(variable, &value);
            if !values.contains(&formatted) {
                values.push(formatted);
            }
        }
    }
    values.sort();
    Ok(values)
}

/// Prints the distinct values of each given variable, for manual auditing of
/// plot filters. Read-only.
pub fn print_series_summary(
    set: &SeriesSet,
    registry: &Registry,
    variables: &[&str],
) -> Result<()> {
    println!(
        "Series summary: {} records in {} series",
        set.records().len(),
        set.series.len()
    );
    for variable in variables {
        let display = registry.get(variable)?.display_name();
        let values = distinct_values(set, registry, variable)?;
        if values.is_empty() {
            println!("  {display}: <none>");
        } else {
            println!("  {display}: {}", values.iter().join(", "));
        }
    }
    Ok(())
}
