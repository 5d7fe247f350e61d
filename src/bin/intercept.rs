use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tama_dns::config::InterceptConfig;
use tama_dns::proxy::InterceptResolver;
use tama_dns::server::DnsServer;

/// Forwarder with per-domain overrides, skip globs and NXDOMAIN globs
#[derive(Parser, Debug)]
#[command(name = "tama-intercept", version)]
struct Args {
    /// TOML config file
    #[arg(short, long, default_value = "tama-intercept.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tama_dns=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = InterceptConfig::load(&args.config)?;
    info!("config loaded from {}", args.config);

    let upstream = config
        .upstream
        .to_socket_addrs()?
        .next()
        .with_context(|| format!("cannot resolve upstream {}", config.upstream))?;

    let resolver = InterceptResolver::new(
        &config.zone_text()?,
        config.skip.clone(),
        config.nxdomain.clone(),
        upstream,
        Duration::from_millis(config.timeout_ms),
    )?;
    info!(
        "🐾 tama-intercept: {} override records, {} skip globs, {} nxdomain globs, upstream {}",
        resolver.record_count(),
        config.skip.len(),
        config.nxdomain.len(),
        upstream
    );

    DnsServer::new(Arc::new(resolver), &config.address, config.port)
        .run()
        .await
}
