//! ArchiveHunter search CLI - run a paginated search from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Method;
use serde_json::Value;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use archivehunter_search::{
    ChannelHandler, ClientConfig, HttpTransport, RequestBody, SearchEvent, SearchQuery,
    SearchSession,
};

/// ArchiveHunter search - page through archive search results
#[derive(Parser)]
#[command(name = "archivehunter-search")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a search and print its entries
    Search(SearchArgs),

    /// Print the default client configuration as JSON
    Config,
}

#[derive(Parser)]
struct SearchArgs {
    /// Search endpoint, absolute or relative to --base-url
    endpoint: String,

    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Extra query parameter as key=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Request body, sent verbatim with every page
    #[arg(short, long)]
    body: Option<String>,

    /// Content type of the request body
    #[arg(long, default_value = "application/json")]
    content_type: String,

    /// Entries per page
    #[arg(short = 's', long)]
    page_size: Option<u32>,

    /// Maximum number of entries to fetch
    #[arg(short, long, default_value = "100")]
    limit: usize,

    /// Base URL for relative endpoints
    #[arg(long)]
    base_url: Option<String>,

    /// Request timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON array output
    Json,
    /// One JSON entry per line
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    if cli.verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Search(args) => run_search(args).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&ClientConfig::default())?);
            Ok(())
        }
    }
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn load_config(args: &SearchArgs) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            ClientConfig::from_json(&json)?
        }
        None => ClientConfig::default(),
    };
    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = Some(timeout);
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    Ok(config)
}

fn build_query(args: &SearchArgs, config: &ClientConfig) -> Result<SearchQuery> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", args.method))?;
    let mut query = SearchQuery::new(method, &args.endpoint, config.page_size)
        .with_params(args.params.clone());
    if let Some(body) = &args.body {
        query = query.with_body(RequestBody::new(body).with_content_type(&args.content_type));
    }
    Ok(query)
}

async fn run_search(args: SearchArgs) -> Result<()> {
    let config = load_config(&args)?;
    let query = build_query(&args, &config)?;
    let transport = HttpTransport::from_config(&config)?;
    let session = SearchSession::new(Arc::new(transport));

    let (handler, mut events) = ChannelHandler::new(args.limit);
    let load = handler.load_target();
    let search_id = session.start_new_search(query, Arc::new(handler)).await?;
    if matches!(args.format, OutputFormat::Text) {
        eprintln!("Search {} started", search_id);
    }

    let mut collected: Vec<Value> = Vec::new();
    let mut shown = 0usize;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                session.stop_current_search("interrupted").await;
                eprintln!("Interrupted");
                break;
            }
        };
        let Some(event) = event else { break };

        match &event {
            SearchEvent::Page { page, .. } => {
                for entry in page.entries() {
                    if shown >= args.limit {
                        break;
                    }
                    shown += 1;
                    print_entry(args.format, shown, entry, &mut collected)?;
                }
            }
            SearchEvent::Completed { .. } => {
                if matches!(args.format, OutputFormat::Text) {
                    eprintln!("\nEnd of results ({} entries)", shown);
                }
            }
            SearchEvent::Cancelled { .. } => eprintln!("Search cancelled"),
            SearchEvent::Error { message, .. } => anyhow::bail!("Search failed: {}", message),
        }

        if event.is_terminal() || load.received() >= load.target() {
            break;
        }
    }

    if matches!(args.format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&collected)?);
    }
    Ok(())
}

fn print_entry(
    format: OutputFormat,
    index: usize,
    entry: &Value,
    collected: &mut Vec<Value>,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let bucket = entry.get("bucket").and_then(Value::as_str);
            let path = entry.get("path").and_then(Value::as_str);
            match (bucket, path) {
                (Some(bucket), Some(path)) => println!("{}. {}:{}", index, bucket, path),
                _ => println!("{}. {}", index, entry),
            }
            if let Some(id) = entry.get("id").and_then(Value::as_str) {
                println!("   ID: {}", id);
            }
        }
        OutputFormat::Json => collected.push(entry.clone()),
        OutputFormat::Compact => println!("{}", serde_json::to_string(entry)?),
    }
    Ok(())
}
