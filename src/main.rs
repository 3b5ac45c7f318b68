use anyhow::Context;
use clap::Parser;
use docsite_devserver::config::{validate_proxy_timeout, Config};
use docsite_devserver::logging::{self, parse_log_format, parse_log_level};
use docsite_devserver::DevServer;
use log::info;
use std::path::{Path, PathBuf};
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Local development server for the library site: static files, legacy redirects and search/portal proxying"
)]
struct Args {
    #[clap(short, long, value_name = "ADDRESS", help = "Bind address [default: 127.0.0.1]")]
    bind: Option<String>,

    #[clap(short, long, value_name = "PORT", help = "Port to listen on [default: 8000]")]
    port: Option<u16>,

    #[clap(long, value_name = "SEARCH_URL", help = "URL to proxy search requests to")]
    search_proxy_url: Option<String>,

    #[clap(long, value_name = "PORTAL_URL", help = "URL to proxy portal requests to")]
    portal_proxy_url: Option<String>,

    #[clap(long = "root", value_name = "DIR", help = "Document root [default: current directory]")]
    root_dir: Option<PathBuf>,

    #[clap(long, value_name = "DIR", help = "Static assets directory [default: <root>/static-assets]")]
    static_assets_dir: Option<PathBuf>,

    #[clap(long, value_name = "FILE", help = "404 page template [default: <root>/404.html]")]
    error_template: Option<PathBuf>,

    #[clap(long = "redirects", value_name = "FILE", help = "Redirect list [default: <root>/redirects.json]")]
    redirects_file: Option<PathBuf>,

    #[clap(long = "proxy-timeout", value_name = "SECONDS", help = "Upstream round-trip timeout [default: 30]")]
    proxy_timeout_secs: Option<u64>,

    #[clap(long, value_name = "LEVEL", help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<String>,

    #[clap(long, value_name = "FORMAT", help = "Log format: text or json")]
    log_format: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path (JSON)")]
    config: Option<PathBuf>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        Config::sample()
            .to_file(config_file)
            .with_context(|| format!("Cannot write {}", config_file.display()))?;
        println!("Sample configuration file generated: {}", config_file.display());
        return Ok(());
    }

    let config = build_config(&args)?;
    logging::init(config.log_level, config.log_format);

    let server = DevServer::bind(&config)
        .await
        .context("Cannot start server")?;
    server.log_banner();

    tokio::select! {
        result = server.run() => {
            result.context("Server error")?;
        }
        _ = signal::ctrl_c() => {
            info!("Keyboard interrupt received, exiting.");
        }
    }

    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };

    if let Some(bind) = &args.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = &args.search_proxy_url {
        config.search_proxy_url = Some(url.clone());
    }
    if let Some(url) = &args.portal_proxy_url {
        config.portal_proxy_url = Some(url.clone());
    }
    if let Some(root_dir) = &args.root_dir {
        config.root_dir = root_dir.clone();
    }
    if let Some(dir) = &args.static_assets_dir {
        config.static_assets_dir = Some(dir.clone());
    }
    if let Some(path) = &args.error_template {
        config.error_template = Some(path.clone());
    }
    if let Some(path) = &args.redirects_file {
        config.redirects_file = Some(path.clone());
    }
    if let Some(secs) = args.proxy_timeout_secs {
        config.proxy_timeout_secs = validate_proxy_timeout(secs)?;
    }
    if let Some(level) = &args.log_level {
        config.log_level = parse_log_level(level)?;
    }
    if let Some(format) = &args.log_format {
        config.log_format = parse_log_format(format)?;
    }

    Ok(config)
}

fn load_config_file(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }
    Ok(Config::from_file(path)?)
}
