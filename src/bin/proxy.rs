use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tama_dns::proxy::ProxyResolver;
use tama_dns::server::DnsServer;

/// UDP/TCP DNS forwarder
#[derive(Parser, Debug)]
#[command(name = "tama-proxy", version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = 5053)]
    port: u16,
    /// Upstream server, host:port
    #[arg(short, long, default_value = "8.8.8.8:53")]
    upstream: String,
    /// Upstream timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
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
    let upstream = args
        .upstream
        .to_socket_addrs()?
        .next()
        .with_context(|| format!("cannot resolve upstream {}", args.upstream))?;

    info!("🐾 tama-proxy forwarding to {}", upstream);
    let resolver = ProxyResolver::new(upstream, Duration::from_millis(args.timeout_ms));
    DnsServer::new(Arc::new(resolver), &args.address, args.port)
        .run()
        .await
}
