use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tiled_upscale::config::ServiceConfig;
use tiled_upscale::engine::EngineKind;
use tiled_upscale::error::classify;
use tiled_upscale::server::send_request;
use tiled_upscale::{Outcome, TransformRequest};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Tiled image upscaling service:
/// - `serve`: listen for `INPUT|OUTPUT|SCALE` requests over TCP
/// - `upscale`: run one job (file or directory) without a socket
/// - `send`: send one request line to a running service
#[derive(Parser, Debug)]
#[command(name = "upscaled")]
#[command(version)]
#[command(about = "Bounded-memory tiled image upscaling service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the request server
    Serve(ServeArgs),
    /// Upscale a file or a directory of images once and exit
    Upscale(UpscaleArgs),
    /// Send a raw request line (e.g. PING) and print the reply
    Send(SendArgs),
}

/// Overrides shared by every command that builds a pipeline.
#[derive(Args, Debug)]
struct EngineArgs {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in engine
    #[arg(long, value_enum)]
    engine: Option<EngineKind>,

    /// Engine upscale ratio
    #[arg(long)]
    ratio: Option<u32>,

    /// Tile side in source pixels (0 disables tiling)
    #[arg(long)]
    tile_size: Option<u32>,

    /// Context margin around each tile
    #[arg(long)]
    tile_pad: Option<u32>,

    /// Skip the enhancement filter stack
    #[arg(long = "no-post-process")]
    #[arg(action = clap::ArgAction::SetTrue)]
    no_post_process: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port (0 picks a free port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct UpscaleArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Input image, or a directory for batch mode
    #[arg(short, long)]
    input: PathBuf,

    /// Output image, or the output directory in batch mode
    #[arg(short, long)]
    output: PathBuf,

    /// Scale relative to the input size
    #[arg(short, long, default_value_t = 4.0)]
    scale: f64,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Service address
    #[arg(short, long, default_value = "127.0.0.1:50051")]
    addr: String,

    /// Request line, e.g. `PING` or `in.png|out.png|2.0`
    line: String,
}

impl EngineArgs {
    fn load(&self) -> Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        if let Some(kind) = self.engine {
            config.engine.kind = kind;
        }
        if let Some(ratio) = self.ratio {
            config.engine.ratio = ratio;
        }
        if let Some(tile_size) = self.tile_size {
            config.tiling.tile_size = tile_size;
        }
        if let Some(tile_pad) = self.tile_pad {
            config.tiling.tile_pad = tile_pad;
        }
        if self.no_post_process {
            config.post_process.enabled = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    match Cli::parse().command {
        Commands::Serve(args) => serve(args).await,
        Commands::Upscale(args) => upscale(args).await,
        Commands::Send(args) => {
            let reply = send_request(&args.addr, &args.line).await?;
            println!("{}", reply);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = args.engine.load()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    match tiled_upscale::serve(config, shutdown_signal()).await {
        Ok(()) => Ok(()),
        Err(e) if classify::is_fatal_to_process(&e) => {
            error!(category = e.category(), "Service failed to start: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!(category = e.category(), "Service stopped: {}", e);
            Err(e.into())
        }
    }
}

async fn upscale(args: UpscaleArgs) -> Result<()> {
    let config = args.engine.load()?;
    let request = TransformRequest {
        input: args.input,
        output: args.output,
        scale: args.scale,
    };

    let outcome = tokio::task::spawn_blocking(move || tiled_upscale::upscale_once(&config, &request)).await??;
    match outcome {
        Outcome::Single { size } => info!("Done: wrote a {} image", size),
        Outcome::Batch { processed } => info!("Done: {} images upscaled", processed),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received");
}
