use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};

use spacecap_core::{
    load_spacecap_config, sanitize_filename, BroadcastMetadata, CaptureError, CaptureOrchestrator,
    CapturePlan, ChainError, NameContext, ResolverError, SpaceResolver, SpacecapConfig, UrlChain,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] spacecap_core::ConfigError),
    #[error("resolution failed: {0}")]
    Resolver(#[from] ResolverError),
    #[error("url derivation failed: {0}")]
    Chain(#[from] ChainError),
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Usage(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Download live audio broadcasts (spaces)", long_about = None)]
pub struct Cli {
    /// Space url, e.g. https://twitter.com/i/spaces/<id>
    #[arg(short = 'i', long, value_name = "SPACE_URL")]
    pub input_url: Option<String>,
    /// Filename template with %(field)s tokens
    #[arg(short = 'o', long, value_name = "FORMAT_STR")]
    pub output: Option<String>,
    /// Start from this master url (useful for spaces that already ended)
    #[arg(short = 'f', long, value_name = "URL")]
    pub from_master_url: Option<String>,
    /// Parallel capture workers (default: hardware parallelism)
    #[arg(short = 't', long, value_name = "THREADS")]
    pub threads: Option<usize>,
    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
    /// Write the full metadata json to a file
    #[arg(short = 'm', long)]
    pub write_metadata: bool,
    /// Write the m3u8 used to download the stream
    /// (e.g. to hand it to another downloader)
    #[arg(short = 'p', long)]
    pub write_playlist: bool,
    /// Display the master url
    #[arg(short = 'u', long)]
    pub url: bool,
    /// Skip the download itself
    #[arg(short = 's', long)]
    pub skip_download: bool,
    /// Keep the scratch directory after the run
    #[arg(short = 'k', long)]
    pub keep_files: bool,
    /// Config file; defaults apply when the file does not exist
    #[arg(long, default_value = "spacecap.toml")]
    pub config: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    if cli.input_url.is_none() && cli.from_master_url.is_none() {
        return Err(AppError::Usage(
            "either a space url or a master url must be provided".to_string(),
        ));
    }

    let metadata = match &cli.input_url {
        Some(url) => {
            let space_id = SpaceResolver::space_id_from_url(url).ok_or_else(|| {
                AppError::Usage(format!("no spaces/<id> segment in input url {url}"))
            })?;
            let resolver = SpaceResolver::new(space_id, &config.network)?;
            resolver.resolve().await?.clone()
        }
        None => {
            warn!("no space url given, the file won't carry any metadata");
            BroadcastMetadata::placeholder()
        }
    };

    let base_name = match &cli.input_url {
        Some(_) => {
            let template = cli
                .output
                .as_deref()
                .unwrap_or(&config.output.name_template);
            sanitize_filename(&NameContext::from_metadata(&metadata).render(template))
        }
        None => "no_info".to_string(),
    };

    if cli.write_metadata {
        let path = format!("{base_name}.json");
        std::fs::write(&path, serde_json::to_string_pretty(&metadata.raw)?)?;
        info!(path = %path, "metadata written to disk");
    }

    let needs_endpoints = !cli.skip_download || cli.url || cli.write_playlist;
    if !needs_endpoints {
        return Ok(());
    }

    let mut capture_config = config.capture.clone();
    if let Some(threads) = cli.threads {
        capture_config.parallelism = threads;
    }
    let orchestrator = CaptureOrchestrator::new(capture_config, None);
    // A missing muxer must fail the run before derivation spends
    // network round-trips.
    if !cli.skip_download {
        orchestrator.ensure_muxer().await?;
    }

    let mut chain = UrlChain::new(&config.network)?;
    if let Some(master_url) = &cli.from_master_url {
        chain = chain.with_master_override(master_url.as_str());
    }
    let endpoints = chain.derive(&metadata).await?;

    if cli.url {
        println!("{}", endpoints.master_url);
    }
    if cli.write_playlist {
        let path = format!("{base_name}.m3u8");
        std::fs::write(&path, &endpoints.playlist_text)?;
        info!(path = %path, "playlist written to disk");
    }

    if cli.skip_download {
        return Ok(());
    }

    let plan = CapturePlan::new(
        base_name,
        &config.output.output_dir,
        &config.capture.scratch_dir,
    );
    let result = orchestrator.capture(&metadata, endpoints, &plan).await;
    if !cli.keep_files {
        let _ = tokio::fs::remove_dir_all(&plan.scratch_dir).await;
    }
    let final_path = result?;
    info!(path = %final_path.display(), "finished downloading");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<SpacecapConfig> {
    if cli.config.exists() {
        Ok(load_spacecap_config(&cli.config)?)
    } else {
        Ok(SpacecapConfig::default())
    }
}
