use bedrock_usage::config::{self, UsageConfig};
use bedrock_usage::source::{CloudWatchSource, LogSource, ReplaySource};
use bedrock_usage::tools::{Tool, ToolServer};
use bedrock_usage::{mcp, serve};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// Summarize AWS Bedrock token usage from CloudWatch model-invocation logs,
/// served as MCP tools over stdio (default) or HTTP.
#[derive(Parser, Debug)]
#[command(name = "bedrock-usage", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "bedrock-usage.toml")]
    config: PathBuf,

    /// Read exported log events from this file instead of CloudWatch
    #[arg(long, value_name = "FILE")]
    events_file: Option<PathBuf>,

    /// AWS region (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// AWS profile (overrides config)
    #[arg(long)]
    profile: Option<String>,

    /// Print resolved config and exit
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (fetch pages, skipped events)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP over stdin/stdout
    Mcp,
    /// Serve the tools over HTTP
    Serve {
        /// Port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one tool and print its JSON result
    Run {
        /// get_raw_usage, get_model_usage_stats, get_user_usage_stats or get_daily_usage_stats
        tool: String,
        /// Lookback window in days (default: from config)
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "bedrock_usage=debug"
    } else if cli.quiet {
        "bedrock_usage=warn"
    } else {
        "bedrock_usage=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    // stdout carries the MCP protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = config::load_config(&cli.config)?;
    if let Some(region) = cli.region {
        cfg.source.region = Some(region);
    }
    if let Some(profile) = cli.profile {
        cfg.source.profile = Some(profile);
    }
    if let Some(Command::Serve { port: Some(port) }) = &cli.command {
        cfg.serve.port = *port;
    }

    tracing::debug!(?cfg, "resolved config");

    if cli.dry_run {
        println!("{}", toml::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let source = build_source(cli.events_file.as_deref(), &cfg).await?;
    tracing::info!(source = source.name(), "bedrock-usage starting");
    let server = Arc::new(ToolServer::new(source, cfg));

    match cli.command.unwrap_or(Command::Mcp) {
        Command::Mcp => mcp::run_stdio(server).await?,
        Command::Serve { .. } => serve::run(server).await?,
        Command::Run { tool, days } => {
            let tool = Tool::from_name(&tool).ok_or_else(|| format!("unknown tool: {tool}"))?;
            let days = days.unwrap_or(server.config().tools.default_days);
            let output = server.call(tool, days).await;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

async fn build_source(
    events_file: Option<&std::path::Path>,
    cfg: &UsageConfig,
) -> Result<Box<dyn LogSource>, Box<dyn std::error::Error>> {
    match events_file {
        Some(path) => Ok(Box::new(ReplaySource::open(path)?)),
        None => Ok(Box::new(CloudWatchSource::from_config(&cfg.source).await)),
    }
}
