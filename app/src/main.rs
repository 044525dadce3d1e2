use std::{collections::BTreeMap, fs};

use clap::{Parser, Subcommand};
use common::{
    chart,
    config::Config,
    record::{self, SOURCE_FILE_FIELD, Value},
};
use eyre::{Context, Result, bail};
use itertools::Itertools;
use tracing::{debug, error};
use tracing_subscriber::{
    EnvFilter,
    fmt::{layer, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long)]
    log: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every figure declared in the config
    Plot {
        #[arg(short, long, default_value = "config.yaml")]
        config_file: String,
    },
    /// List loaded benchmark files with their record counts
    Ls {
        #[arg(short, long, default_value = "config.yaml")]
        config_file: String,
    },
    /// List the registered plottable variables
    Vars,
}

fn main() -> Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or("warn".to_owned());
    let args = Cli::parse();
    let file_appender = tracing_appender::rolling::never(".", "log.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let mut env_filter = EnvFilter::new(format!(
        "gbench_plot={log_level},common={log_level},sum3d_basic={log_level}"
    ));
    for log in &args.log {
        env_filter = env_filter.add_directive(log.parse()?);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            layer()
                .with_timer(ChronoLocal::new("%v %k:%M:%S %z".to_owned()))
                .compact(),
        )
        .with(layer().with_writer(non_blocking))
        .init();

    match args.command {
        Commands::Plot { config_file } => {
            if let Err(err) = plot(&config_file) {
                error!("{err:#?}");
                return Err(err);
            }
        }
        Commands::Ls { config_file } => list_data_files(&config_file)?,
        Commands::Vars => list_variables(),
    };

    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    let text = fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
    serde_yml::from_str(&text).with_context(|| format!("parse config {path}"))
}

fn plot(config_file: &str) -> Result<()> {
    let config = load_config(config_file)?;
    let registry = sum3d_basic::registry();
    let records = record::load_dir(&config.settings.data_dir)?;
    if records.is_empty() {
        bail!(
            "no benchmark records under {}",
            config.settings.data_dir.display()
        );
    }

    fs::create_dir_all(&config.settings.figure_dir).with_context(|| {
        format!(
            "create figure directory {}",
            config.settings.figure_dir.display()
        )
    })?;
    if let Some(overrides) = &config.settings.style {
        chart::set_style(overrides.apply(chart::style()));
    }

    for figure in &config.figures {
        debug!("rendering {}", figure.name());
        figure
            .render(&records, &registry, &config.settings.figure_dir)
            .with_context(|| format!("figure {}", figure.name()))?;
    }
    Ok(())
}

fn list_data_files(config_file: &str) -> Result<()> {
    let config = load_config(config_file)?;
    let records = record::load_dir(&config.settings.data_dir)?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &records {
        let source = record
            .get(SOURCE_FILE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("<unknown>");
        *counts.entry(source).or_default() += 1;
    }
    for (source, count) in &counts {
        println!("{source} -> {count} records");
    }
    println!("{} records total", records.len());
    Ok(())
}

fn list_variables() {
    let registry = sum3d_basic::registry();
    for var in registry
        .variables()
        .sorted_by_key(|var| (var.direction().to_string(), var.name()))
    {
        println!(
            "{:<24} {:<7} {:<10} {}",
            var.name(),
            var.direction().to_string(),
            var.kind_label(),
            var.display_name()
        );
    }
}
