mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use spotspof_core::config::Config;
use spotspof_extract::{Extractor, ToolRegistry, YtDlpExtractor};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise the verbose flag picks the defaults.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "spotspof=trace,spotspof_server=debug,spotspof_extract=debug,spotspof_core=debug,tower_http=debug".to_string()
        } else {
            "spotspof=info,spotspof_server=info,spotspof_extract=info,spotspof_core=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Search { query, limit, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(search(&query.join(" "), limit, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("spotspof {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::HashPassword { password } => {
            let hash = spotspof_server::middleware::auth::hash_password(&password)?;
            println!("{hash}");
            Ok(())
        }
    }
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting spotspof server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    spotspof_server::start(config).await?;
    Ok(())
}

async fn search(
    query: &str,
    limit: Option<u32>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools);
    let extractor = YtDlpExtractor::from_config(&tools, &config.extraction);

    let limit = limit.unwrap_or(config.extraction.search_results);
    let entries = extractor
        .search(query, limit)
        .await
        .with_context(|| format!("search for '{query}' failed"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No results for '{query}'");
        return Ok(());
    }

    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>2}. {} [{}]",
            i + 1,
            entry.title.as_deref().unwrap_or("(untitled)"),
            entry.duration.as_deref().unwrap_or("?:??")
        );
        println!("    {}/{}", entry.source, entry.id);
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. yt-dlp is required; ffmpeg is needed for downloads.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            Config::load(p)?
        }
        None => {
            println!("No config file specified, searching default locations");
            Config::load_or_default(None)?
        }
    };

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Auth enabled: {}", config.auth.enabled);
    println!("  Temp dir: {}", config.stream.temp_dir.display());
    println!(
        "  Transcode: {} @ {} kbps",
        config.transcode.codec, config.transcode.bitrate_kbps
    );
    println!("  Live pipe relay: {}", config.stream.live_pipe);
    println!("  Queue capacity: {}", config.queue.capacity);

    for warning in config.validate() {
        println!("  ! {warning}");
    }

    Ok(())
}
