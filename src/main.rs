use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use star_warehouse::{
    integrity_check, load_csv, missing_tables, open_warehouse, table_counts, Pipeline,
    PipelineConfig, FACT_SALES,
};

#[derive(Parser)]
#[command(name = "star-warehouse")]
#[command(about = "Validate a sales extract and rebuild the star-schema warehouse", long_about = None)]
#[command(version)]
struct Cli {
    /// -v for debug, -vv for trace (RUST_LOG wins when set)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a CSV extract and fully replace the warehouse with it
    Load {
        /// CSV extract to load
        #[arg(long, short)]
        input: PathBuf,

        /// TOML pipeline configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Warehouse SQLite file (overrides config)
        #[arg(long)]
        warehouse: Option<PathBuf>,

        /// Primary-key column of the extract (overrides config)
        #[arg(long)]
        primary_key: Option<String>,

        /// Fail when more than this share of facts needed a default key
        #[arg(long)]
        max_default_ratio: Option<f64>,
    },

    /// Report table counts and orphaned foreign keys of an existing warehouse
    Check {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        warehouse: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Load {
            input,
            config,
            warehouse,
            primary_key,
            max_default_ratio,
        } => {
            let mut config = read_config(config.as_deref())?;
            if let Some(path) = warehouse {
                config.warehouse_path = path;
            }
            if let Some(pk) = primary_key {
                config.primary_key = pk;
            }
            if max_default_ratio.is_some() {
                config.max_default_ratio = max_default_ratio;
            }
            config.validate()?;
            run_load(&input, config)
        }
        Commands::Check { config, warehouse } => {
            let mut config = read_config(config.as_deref())?;
            if let Some(path) = warehouse {
                config.warehouse_path = path;
            }
            run_check(&config)
        }
    }
}

fn read_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_load(input: &Path, config: PipelineConfig) -> Result<()> {
    eprintln!("📂 Loading extract {}", input.display());
    let batch = load_csv(input)?;
    eprintln!("✓ {} rows, {} columns", batch.len(), batch.columns.len());

    let pipeline = Pipeline::new(config);
    if let Some(parent) = pipeline.config().warehouse_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let run = pipeline.run(&batch);

    eprintln!("\n🔍 Quality: {}", run.quality.summary());
    for outcome in run.quality.outcomes() {
        let mark = if outcome.passed { "✓" } else { "✗" };
        eprintln!(
            "   {} {} [{}] {}",
            mark,
            outcome.rule_name,
            outcome.targets.join(", "),
            outcome.message
        );
    }

    println!("{}", run.record().to_json_line()?);

    let record = run.into_result()?;
    eprintln!("\n🎉 Warehouse rebuilt at {}", record.db_path);
    for (table, count) in &record.tables_loaded {
        eprintln!("   {:<28} {}", table, count);
    }
    if record.key_substitutions.any() {
        eprintln!(
            "⚠️  {} of {} fact rows used a default key",
            record.key_substitutions.rows_with_defaults, record.key_substitutions.total_rows
        );
    }

    Ok(())
}

fn run_check(config: &PipelineConfig) -> Result<()> {
    let path = &config.warehouse_path;
    if !path.exists() {
        anyhow::bail!("Warehouse not found at {}", path.display());
    }

    let conn = open_warehouse(path)
        .with_context(|| format!("Failed to open warehouse {}", path.display()))?;

    let missing = missing_tables(&conn)?;
    if missing.contains(&FACT_SALES) {
        anyhow::bail!(
            "{} is not a loaded warehouse (missing tables: {})",
            path.display(),
            missing.join(", ")
        );
    }

    println!("🗄️  {}", path.display());
    for (table, count) in table_counts(&conn)? {
        println!("   {:<28} {}", table, count);
    }

    let integrity = integrity_check(&conn)?;
    println!(
        "\n🔗 Orphaned keys: date={} category={} trend={}",
        integrity.missing_date_fk, integrity.missing_category_fk, integrity.missing_trend_fk
    );

    if integrity.is_clean() {
        println!("✅ {} fact rows, referential integrity intact", integrity.fact_rows);
        Ok(())
    } else {
        anyhow::bail!("warehouse has orphaned foreign keys")
    }
}
