use std::sync::Arc;

use clap::Parser;
use tracing::info;

use tama_dns::resolver::ZoneResolver;
use tama_dns::server::DnsServer;

/// Authoritative-style server answering from a zone file
#[derive(Parser, Debug)]
#[command(name = "tama-zoneresolver", version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = 5053)]
    port: u16,
    /// Zone file to serve
    #[arg(short, long)]
    zone: String,
    /// Treat record names as shell-style globs
    #[arg(short, long)]
    glob: bool,
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
    let zone_text = std::fs::read_to_string(&args.zone)?;
    let resolver = ZoneResolver::new(&zone_text, args.glob)?;
    info!(
        "🐾 tama-zoneresolver: {} records from {} (glob: {})",
        resolver.record_count(),
        args.zone,
        args.glob
    );

    DnsServer::new(Arc::new(resolver), &args.address, args.port)
        .run()
        .await
}
