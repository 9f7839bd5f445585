#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use heartrisk::config::EngineConfig;
use heartrisk::engine::{Assessment, InferenceContext, Section};
use heartrisk::io::{load_input_record, load_reference_dataset, render_report, write_report};
use heartrisk::schema::{FeatureSchema, InputControl};
use heartrisk::types::DatasetSummary;

#[derive(Parser)]
#[command(
    name = "heartrisk",
    about = "Coronary heart disease risk inference and explanation",
    long_about = "Scores a subject's clinical record against a reference case/control \
                 population, places the subject on a population map and explains the result."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the input controls and summary of a reference table
    #[command(about = "Describe the reference table (fields, ranges, categories)")]
    Schema {
        /// Path to the reference table (tab-separated unless configured otherwise)
        #[arg(long, value_name = "TSV")]
        reference: PathBuf,

        /// Optional engine configuration file
        #[arg(long, value_name = "TOML")]
        config: Option<PathBuf>,
    },

    /// Assess one subject record
    #[command(about = "Assess a subject record (outputs: report.toml with --output)")]
    Assess {
        /// Path to the reference table
        #[arg(long, value_name = "TSV")]
        reference: PathBuf,

        /// Path to the trained logistic model
        #[arg(long, value_name = "TOML")]
        model: PathBuf,

        /// Path to the subject record (a TOML table of field = value)
        #[arg(long, value_name = "TOML")]
        record: PathBuf,

        /// Optional engine configuration file
        #[arg(long, value_name = "TOML")]
        config: Option<PathBuf>,

        /// Number of features in the attribution ranking
        #[arg(long, value_name = "N")]
        top_k: Option<usize>,

        /// Write the full report to this file
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

#[derive(Serialize)]
struct SchemaReport {
    dataset: DatasetSummary,
    controls: Vec<InputControl>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Schema { reference, config }) => run_schema(reference, config),
        Some(Commands::Assess {
            reference,
            model,
            record,
            config,
            top_k,
            output,
        }) => run_assess(reference, model, record, config, top_k, output),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn path_str(path: &Path) -> Result<&str, Box<dyn Error>> {
    path.to_str()
        .ok_or_else(|| format!("Path '{}' is not valid UTF-8", path.display()).into())
}

fn load_config(config: Option<PathBuf>) -> Result<EngineConfig, Box<dyn Error>> {
    match config {
        Some(path) => Ok(EngineConfig::load(path_str(&path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn run_schema(reference: PathBuf, config: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let config = load_config(config)?;
    let dataset = load_reference_dataset(
        path_str(&reference)?,
        &config.label_column,
        config.separator_byte()?,
    )?;
    let schema = FeatureSchema::build(&dataset)?;
    let report = SchemaReport {
        dataset: dataset.summary()?,
        controls: schema.input_controls(),
    };
    print!("{}", render_report(&report)?);
    Ok(())
}

fn run_assess(
    reference: PathBuf,
    model: PathBuf,
    record: PathBuf,
    config: Option<PathBuf>,
    top_k: Option<usize>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(config)?;
    if let Some(k) = top_k {
        config.top_k = k;
    }

    let context = InferenceContext::open(path_str(&reference)?, path_str(&model)?, &config)?;
    let subject = load_input_record(path_str(&record)?)?;
    let assessment = context.assess(&subject)?;

    print_assessment(&assessment);

    if let Some(path) = output {
        write_report(path_str(&path)?, &assessment)?;
        println!("Report saved to '{}'", path.display());
    }
    Ok(())
}

fn print_assessment(assessment: &Assessment) {
    println!("{}", assessment.verdict);
    println!(
        "Risk level: {} (P(case) = {:.3}, confidence {:.1}%)",
        assessment.risk_level, assessment.risk.probability_case, assessment.confidence
    );
    println!(
        "Risk age: {} ({:+} years)",
        assessment.derived.risk_age, assessment.derived.age_delta
    );

    println!("Recommendations:");
    for recommendation in &assessment.derived.recommendations {
        println!("  [{}] {}", recommendation.category, recommendation.message);
    }

    match &assessment.attribution {
        Section::Available(ranking) => {
            println!("Most influential features:");
            for feature in &ranking.features {
                println!("  {:<24} {:>6.2}%", feature.feature, feature.weight);
            }
        }
        Section::Unavailable { reason } => println!("Feature attribution unavailable: {reason}"),
    }

    match &assessment.projection {
        Section::Available(projection) => {
            let [first, second] = projection.explained_variance;
            if let Some(subject) = projection.subject() {
                println!(
                    "Population map: subject at ({:.3}, {:.3}); axes explain {:.1}% and {:.1}% of variance",
                    subject.x, subject.y, first, second
                );
            }
        }
        Section::Unavailable { reason } => println!("Population map unavailable: {reason}"),
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("HEARTRISK_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("heartrisk {version}");
    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let age = now.saturating_sub(build_timestamp);
        println!("Built: {}", format_duration_ago(age));
    }
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    match seconds {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{} minutes ago", seconds / 60),
        3_600..=86_399 => format!("{:.1} hours ago", seconds as f64 / 3_600.0),
        _ => format!("{:.1} days ago", seconds as f64 / 86_400.0),
    }
}
