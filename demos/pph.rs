use clap::{Parser, Subcommand};
use pphash::{
    KeyFunctionId, KeyFunctionRegistry, PerfectHashBuilder, PerfectHashTable, RetryPolicy,
    SeedGenerator,
};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Info(args) => run_info(args),
        Command::Build(args) => run_build(args),
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "utility for building and inspecting perfect hash tables",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect a perfect hash table file and print basic information
    Info(InfoArgs),
    /// Build a perfect hash table from a key list or a JSON object
    Build(BuildArgs),
}

#[derive(clap::Args)]
struct InfoArgs {
    /// Path to the table file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional key to look up in the table
    #[arg(short, long)]
    key: Option<String>,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Source file: a JSON object of string entries, or one key per line
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Path to the table file to produce
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Ratio of slots to keys
    #[arg(long, value_name = "RATIO", default_value_t = 1.25)]
    load_factor: f64,

    /// Expected number of keys per bucket
    #[arg(long, value_name = "KEYS", default_value_t = 4.0)]
    bucket_size: f64,

    /// State of the seed generator; random when omitted
    #[arg(long, value_name = "STATE")]
    seed_state: Option<u64>,

    /// Seeds tried per key function
    #[arg(long, value_name = "COUNT", default_value_t = 3)]
    max_tries: usize,

    /// Key functions to try, by name or identifier; all when omitted
    #[arg(long = "key-function", value_name = "NAME")]
    key_functions: Vec<String>,
}

fn run_info(args: InfoArgs) -> Result<()> {
    let file = File::open(&args.input)?;
    let table = PerfectHashTable::load(&file).map_err(Error::other)?;

    let json = serde_json::to_string_pretty(&table.info())
        .map_err(|e| Error::other(format!("Failed to format JSON: {e}")))?;
    println!("{}", json);

    if let Some(key) = args.key {
        let value = table.get(&key).map(String::from_utf8_lossy);
        println!("{}: {:?}", key, value);
    }

    Ok(())
}

fn run_build(args: BuildArgs) -> Result<()> {
    let entries = load_entries(&args.input)?;
    let key_functions = args
        .key_functions
        .iter()
        .map(|name| resolve_key_function(name))
        .collect::<Result<Vec<_>>>()?;

    let mut builder = PerfectHashBuilder::default()
        .with_load_factor(args.load_factor)
        .with_bucket_size(args.bucket_size);
    for (key, value) in &entries {
        builder.set(key, value).map_err(Error::other)?;
    }

    let mut seeds = match args.seed_state {
        Some(state) => SeedGenerator::new(state),
        None => SeedGenerator::default(),
    };
    let policy = RetryPolicy::default()
        .with_max_tries(args.max_tries)
        .with_key_functions(key_functions);
    let builder = builder
        .build_with_retries(&mut seeds, &policy)
        .map_err(Error::other)?;

    let writer = File::create(&args.output)?;
    let info = builder.save(&writer).map_err(Error::other)?;

    let json = serde_json::to_string_pretty(&info)
        .map_err(|e| Error::other(format!("Failed to format JSON: {e}")))?;
    println!("{}", json);

    Ok(())
}

fn resolve_key_function(name: &str) -> Result<KeyFunctionId> {
    let registry = KeyFunctionRegistry::global();
    registry
        .identifiers()
        .find(|id| registry.name(id).is_some_and(|n| n.eq_ignore_ascii_case(name)))
        .or_else(|| name.parse().ok())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("unknown key function: {name}"),
            )
        })
}

fn load_entries(path: &Path) -> Result<Vec<(String, String)>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "json") {
        let value: Value = serde_json::from_reader(reader)
            .map_err(|e| invalid_data(format!("Failed to parse JSON input: {e}")))?;
        return extract_entries(value);
    }

    let mut entries = Vec::new();
    let mut line = String::new();
    while reader.read_line(&mut line)? > 0 {
        let key = line.trim();
        if !key.is_empty() {
            entries.push((key.to_string(), key.to_string()));
        }
        line.clear();
    }
    Ok(entries)
}

fn extract_entries(value: Value) -> Result<Vec<(String, String)>> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect()),
        other => Err(invalid_data(format!(
            "unsupported JSON top-level type: {other}"
        ))),
    }
}

fn invalid_data(message: String) -> Error {
    Error::new(ErrorKind::InvalidData, message)
}
