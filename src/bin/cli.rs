//! Binary entry point for the sombra-ask query CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sombra_ask::cli::ask::{parse_property, run_query, QueryCmdConfig, QueryReport};
use sombra_ask::query::{Description, QueryConfig, QueryMode, QueryOutcome, SortKey};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sombra-ask",
    version,
    about = "Answer semantic queries against a relational property store",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct QueryCmd {
    #[arg(value_name = "DB")]
    db_path: PathBuf,

    #[arg(value_name = "QUERY", help = "JSON file containing the description")]
    query_path: PathBuf,

    #[arg(long, value_enum, default_value_t = ModeArg::Instances, help = "Result mode")]
    mode: ModeArg,

    #[arg(long, help = "Maximum number of results")]
    limit: Option<usize>,

    #[arg(long, default_value_t = 0, help = "Number of results to skip")]
    offset: usize,

    #[arg(
        long = "sort",
        value_name = "KEY[:asc|desc|random]",
        help = "Sort key, repeatable; an empty key sorts by the entity sort key"
    )]
    sort: Vec<String>,

    #[arg(long, value_name = "FILE", help = "TOML query configuration")]
    config: Option<PathBuf>,

    #[arg(
        long = "property",
        value_name = "KEY=TYPE",
        help = "Declare a property datatype, e.g. Population=_num"
    )]
    properties: Vec<String>,
}

#[derive(Args, Debug)]
struct DescribeCmd {
    #[arg(value_name = "QUERY", help = "JSON file containing the description")]
    query_path: PathBuf,

    #[arg(long, value_name = "FILE", help = "TOML query configuration")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Run a query against a store database")]
    Query(QueryCmd),

    #[command(about = "Print size, depth and features of a description")]
    Describe(DescribeCmd),
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Instances,
    Count,
    Debug,
    None,
}

impl From<ModeArg> for QueryMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Instances => QueryMode::Instances,
            ModeArg::Count => QueryMode::Count,
            ModeArg::Debug => QueryMode::Debug,
            ModeArg::None => QueryMode::None,
        }
    }
}

#[derive(Serialize)]
struct DescribeReport {
    condition: String,
    size: i64,
    depth: i64,
    features: Vec<String>,
    allowed: bool,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sombra_ask=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Query(cmd) => {
            let sort = cmd
                .sort
                .iter()
                .map(|key| key.parse::<SortKey>())
                .collect::<Result<Vec<_>, _>>()?;
            let properties = cmd
                .properties
                .iter()
                .map(|arg| parse_property(arg))
                .collect::<Result<Vec<_>, _>>()?;
            let cfg = QueryCmdConfig {
                db_path: cmd.db_path,
                query_path: cmd.query_path,
                mode: cmd.mode.into(),
                limit: cmd.limit,
                offset: cmd.offset,
                sort,
                config_path: cmd.config,
                properties,
            };
            let report = run_query(&cfg)?;
            emit(&cli.format, &report, |fmt| print_query_text(fmt, &report))?;
        }
        Command::Describe(cmd) => {
            let config = match &cmd.config {
                Some(path) => QueryConfig::load(path)?,
                None => QueryConfig::default(),
            };
            let description: Description =
                serde_json::from_str(&fs::read_to_string(&cmd.query_path)?)?;
            let features = description.query_features();
            let report = DescribeReport {
                condition: description.query_string(false),
                size: description.size(config.cost_model()),
                depth: description.depth(),
                features: features.names().into_iter().map(str::to_owned).collect(),
                allowed: features.excess(config.features).is_empty(),
            };
            emit(&cli.format, &report, |fmt| print_describe_text(fmt, &report))?;
        }
    }

    Ok(())
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_query_text(_: OutputFormat, report: &QueryReport) {
    match &report.outcome {
        QueryOutcome::Instances(set) => {
            for row in &set.rows {
                let entity = &row.entity;
                if entity.interwiki.is_empty() {
                    println!("{}\t{}:{}", row.id.0, entity.namespace, entity.title);
                } else {
                    println!(
                        "{}\t{}:{}:{}",
                        row.id.0, entity.interwiki, entity.namespace, entity.title
                    );
                }
            }
            println!(
                "{} result(s){}",
                set.rows.len(),
                if set.has_further_results {
                    ", more available"
                } else {
                    ""
                }
            );
        }
        QueryOutcome::Count(count) => println!("{count}"),
        QueryOutcome::Debug(trace) => print!("{trace}"),
    }
    for issue in &report.issues {
        eprintln!("warning: {issue}");
    }
    if let Some(profile) = &report.profile {
        eprintln!(
            "profile: compile {}ns/{}, execute {}ns/{}, hierarchy {}ns/{}, select {}ns/{}",
            profile.compile_ns,
            profile.compile_count,
            profile.execute_ns,
            profile.execute_count,
            profile.hierarchy_ns,
            profile.hierarchy_count,
            profile.select_ns,
            profile.select_count
        );
    }
}

fn print_describe_text(_: OutputFormat, report: &DescribeReport) {
    println!("Condition: {}", report.condition);
    println!("Size: {}, depth: {}", report.size, report.depth);
    println!("Features: {}", report.features.join(", "));
    if !report.allowed {
        println!("Some features are not allowed by the configuration");
    }
}
