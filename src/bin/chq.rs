//! chq: run queries against a ClickHouse server over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Execute a query
//! chq "SELECT number FROM system.numbers LIMIT 5"
//!
//! # With parameters
//! chq "SELECT {id:UInt32} + 1" --bind id=41
//!
//! # Dry run (show the request only)
//! chq "SELECT {id:UInt32}" --bind id=41 --dry-run --server-version 19.1
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clickhouse_http::prelude::*;
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chq")]
#[command(version)]
#[command(about = "ClickHouse HTTP query runner", long_about = None)]
#[command(after_help = "EXAMPLES:
    chq 'SELECT version()'
    chq 'SELECT * FROM events WHERE id = {id:UInt64}' --bind id=7
    chq 'SELECT {s:String}' --bind s=hello --dry-run
    chq version")]
struct Cli {
    /// SQL to execute
    query: Option<String>,

    /// Don't execute, just show the SQL and URI that would be sent
    #[arg(short, long)]
    dry_run: bool,

    /// Server version to render for in dry-run mode (inline binding when omitted)
    #[arg(long, requires = "dry_run")]
    server_version: Option<String>,

    /// Parameter bindings as name=value
    #[arg(short, long)]
    bind: Vec<String>,

    /// Query id sent with the request
    #[arg(long)]
    query_id: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Connection string, e.g. "Host=localhost;Port=8123;Username=default"
    #[arg(long, env = "CHQ_CONNECTION")]
    connection: Option<String>,

    /// TOML config file with a [connection] table
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Raw,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and show the server version and negotiated features
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Version) => show_version(&cli).await,
        None => match &cli.query {
            Some(query) => execute_query(query, &cli).await,
            None => {
                println!("{}", "chq - ClickHouse HTTP query runner".cyan().bold());
                println!();
                println!("Usage: chq <QUERY> [OPTIONS]");
                println!();
                println!("Try: chq --help");
                Ok(())
            }
        },
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "clickhouse_http=debug" } else { "clickhouse_http=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Connection string first, then an explicit config file, then the default
/// config file if it exists.
fn load_settings(cli: &Cli) -> Result<ConnectionSettings> {
    if let Some(conn) = &cli.connection {
        return conn
            .parse::<ConnectionSettings>()
            .context("invalid connection string");
    }
    if let Some(path) = &cli.config {
        return ConnectionSettings::from_toml_file(path)
            .with_context(|| format!("cannot read {}", path.display()));
    }
    match ConnectionSettings::default_config_path() {
        Some(path) if path.exists() => ConnectionSettings::from_toml_file(&path)
            .with_context(|| format!("cannot read {}", path.display())),
        _ => Ok(ConnectionSettings::default()),
    }
}

/// `name=value`; numbers and booleans are bound with their own types.
fn parse_binding(binding: &str) -> Result<(String, Value)> {
    let Some((name, raw)) = binding.split_once('=') else {
        bail!("binding '{}' is not in name=value form", binding);
    };
    let value = if let Ok(n) = raw.parse::<i64>() {
        Value::from(n)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::from(f)
    } else if raw == "true" || raw == "false" {
        Value::from(raw == "true")
    } else if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else {
        Value::from(raw)
    };
    Ok((name.trim().to_string(), value))
}

async fn execute_query(query: &str, cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    if cli.verbose {
        println!("{} {}", "Input:".dimmed(), query.yellow());
        println!("{} {}:{}", "Server:".dimmed(), settings.host, settings.port);
    }

    let conn = Connection::new(settings)?;
    let mut cmd = conn.create_command();
    cmd.set_sql(query).set_query_id(cli.query_id.clone());
    for binding in &cli.bind {
        let (name, value) = parse_binding(binding)?;
        cmd.bind(name, value);
    }

    if cli.dry_run {
        let flags = match &cli.server_version {
            Some(v) => FeatureFlags::for_version(v.parse()?),
            None => FeatureFlags::empty(),
        };
        let rendered = cmd.render(flags)?;
        println!("{}", "SQL:".green().bold());
        println!("{}", rendered.sql.white());
        println!();
        println!("{}", "URI:".green().bold());
        println!("{}", rendered.uri.as_str().white());

        if !cmd.parameters().is_empty() {
            println!();
            println!("{}", "Bindings:".cyan());
            for p in cmd.parameters() {
                println!("  {} = {}", p.name, p.value.to_string().yellow());
            }
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    conn.open_with(&cancel).await?;

    match cli.format {
        OutputFormat::Raw => {
            let result = cmd.execute_raw(&cancel).await?;
            print!("{}", result.text()?);
        }
        OutputFormat::Table => {
            let rows = cmd
                .execute_with(CommandBehavior::Default, &TabSeparated, &cancel)
                .await?;
            print_table(&rows);
        }
    }

    if cli.verbose {
        if let Some(id) = cmd.query_id() {
            println!("{} {}", "Query id:".dimmed(), id);
        }
    }
    Ok(())
}

fn print_table(rows: &[Vec<Option<String>>]) {
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    let cell = |v: &Option<String>| v.clone().unwrap_or_else(|| "NULL".to_string());
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (i, v) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell(v).chars().count());
        }
    }

    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    println!("{}", sep.join("─┬─").dimmed());
    for row in rows {
        let cells: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let text = row.get(i).map(cell).unwrap_or_default();
                format!("{:width$}", text, width = *w)
            })
            .collect();
        println!("{}", cells.join(" │ "));
    }

    println!();
    println!("{} row(s) returned", rows.len().to_string().cyan());
}

async fn show_version(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    let conn = Connection::new(settings)?;
    conn.open().await?;

    let version = conn.server_version()?;
    let features = conn.supported_features()?;
    println!("{} {}", "Server:".dimmed(), version.to_string().cyan().bold());
    println!("{}", "Features:".green().bold());
    let names: Vec<&str> = features.iter_names().collect();
    if names.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for name in names {
        println!("  • {}", name.white());
    }
    Ok(())
}
