//! trajcache - trajectory playback through the caching proxy
//!
//! Plays a range of frames from an HTTP trajectory server through a
//! [`TrajectoryCacheProxy`] and prints the cache metrics as JSON.
//!
//! ```text
//! ┌────────────┐    ┌──────────────────────┐    ┌──────────────────┐
//! │  Playback  │───▶│ TrajectoryCacheProxy │───▶│ HttpFrameSource  │
//! │   loop     │    │  tier 1 / tier 2     │    │ (remote server)  │
//! └────────────┘    └──────────┬───────────┘    └──────────────────┘
//!                              │
//!                        /metrics (optional)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trajcache::{
    CompressionAlgorithm, DirectoryTierStore, HttpFrameSource, HttpSourceConfig,
    InMemoryTierStore, PersistentTierStore, ProxyConfig, TrajectoryCacheProxy,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Play trajectory frames through a two-tier caching proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Trajectory server base URL
    #[arg(long, env = "TRAJCACHE_SOURCE_URL")]
    source_url: String,

    /// YAML configuration file
    #[arg(long, env = "TRAJCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// First frame to play
    #[arg(long, default_value = "0")]
    start: u64,

    /// Number of frames to play (default: through the last frame)
    #[arg(long)]
    count: Option<u64>,

    /// Chunk byte budget
    #[arg(long, env = "TRAJCACHE_TARGET_CHUNK_BYTES")]
    target_chunk_bytes: Option<u64>,

    /// Tier-1 capacity in chunks
    #[arg(long, env = "TRAJCACHE_TIER1_CAPACITY")]
    tier1_capacity: Option<usize>,

    /// Tier-2 byte budget
    #[arg(long, env = "TRAJCACHE_TIER2_BUDGET_BYTES")]
    tier2_budget_bytes: Option<u64>,

    /// Disable next-chunk prefetch
    #[arg(long, env = "TRAJCACHE_NO_PREFETCH")]
    no_prefetch: bool,

    /// Tier-2 compression (none, lz4)
    #[arg(long, env = "TRAJCACHE_TIER2_COMPRESSION")]
    tier2_compression: Option<CompressionAlgorithm>,

    /// Keep tier-2 blobs in this directory instead of memory
    #[arg(long, env = "TRAJCACHE_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, env = "TRAJCACHE_REQUEST_TIMEOUT_SECONDS", default_value = "60")]
    request_timeout_seconds: u64,

    /// Serve Prometheus metrics on this address while playing
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// File configuration with command-line overrides applied
    fn proxy_config(&self) -> anyhow::Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(bytes) = self.target_chunk_bytes {
            config.target_chunk_bytes = bytes;
        }
        if let Some(capacity) = self.tier1_capacity {
            config.tier1_capacity = capacity;
        }
        if let Some(budget) = self.tier2_budget_bytes {
            config.tier2_budget_bytes = budget;
        }
        if self.no_prefetch {
            config.prefetch = false;
        }
        if let Some(algorithm) = self.tier2_compression {
            config.tier2_compression = algorithm;
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.proxy_config()?;
    info!("Starting trajcache {}", trajcache::VERSION);
    info!("  Source: {}", args.source_url);
    info!("  Target chunk bytes: {}", config.target_chunk_bytes);
    info!("  Tier-1 capacity: {} chunks", config.tier1_capacity);
    info!("  Tier-2 budget: {} bytes", config.tier2_budget_bytes);
    info!("  Prefetch: {}", config.prefetch);
    info!("  Tier-2 compression: {}", config.tier2_compression);

    let source = HttpFrameSource::new(HttpSourceConfig {
        base_url: args.source_url.clone(),
        request_timeout: Duration::from_secs(args.request_timeout_seconds),
    })?;

    let store: Arc<dyn PersistentTierStore> = match &args.store_dir {
        Some(dir) => {
            info!("  Tier-2 directory: {}", dir.display());
            Arc::new(DirectoryTierStore::new(dir))
        }
        None => Arc::new(InMemoryTierStore::new()),
    };

    let proxy = TrajectoryCacheProxy::with_store(Arc::new(source), store, config)?;
    proxy
        .init()
        .await
        .with_context(|| format!("initializing from {}", args.source_url))?;

    // Start metrics server
    if let Some(addr) = args.metrics_addr.clone() {
        let metrics_proxy = proxy.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, metrics_proxy).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let outcome = play(&proxy, args.start, args.count).await;

    let snapshot = proxy.metrics();
    if let Err(e) = proxy.close().await {
        error!("Failed to clear tier-2 store: {}", e);
    }
    outcome?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Read frames `[start, start + count)` in order
async fn play(proxy: &TrajectoryCacheProxy, start: u64, count: Option<u64>) -> anyhow::Result<()> {
    let frame_count = proxy.get_frame_count()?;
    let end = match count {
        Some(count) => start.saturating_add(count).min(frame_count),
        None => frame_count,
    };

    info!(
        "Playing frames {}..{} ({} per chunk, mode {:?})",
        start,
        end,
        proxy.frames_per_chunk().unwrap_or(0),
        proxy.mode()
    );

    let started = Instant::now();
    let mut atoms = 0usize;
    for index in start..end {
        let frame = proxy
            .get_frame(index)
            .await
            .with_context(|| format!("reading frame {}", index))?;
        atoms += frame.atom_count();
    }

    let elapsed = started.elapsed();
    let played = end.saturating_sub(start);
    info!(
        "Played {} frames ({} atoms) in {:.2?} ({:.1} frames/s)",
        played,
        atoms,
        elapsed,
        played as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, proxy: TrajectoryCacheProxy) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics server to {}", addr))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept error")?;

        let io = TokioIo::new(stream);
        let proxy = proxy.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let proxy = proxy.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match proxy.metrics().export_prometheus() {
                            Ok(text) => respond(StatusCode::OK, text),
                            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        "/healthz" => respond(StatusCode::OK, "ok"),
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
