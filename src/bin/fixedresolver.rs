use std::sync::Arc;

use clap::Parser;
use tracing::info;

use tama_dns::resolver::FixedResolver;
use tama_dns::server::DnsServer;

/// Answers every query with the same fixed records
#[derive(Parser, Debug)]
#[command(name = "tama-fixedresolver", version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = 5053)]
    port: u16,
    /// Zone file holding the fixed response records
    #[arg(short, long)]
    zone: Option<String>,
    /// Inline record in zone format (repeatable)
    #[arg(short, long)]
    record: Vec<String>,
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
    let mut zone_text = String::new();
    if let Some(path) = &args.zone {
        zone_text.push_str(&std::fs::read_to_string(path)?);
        zone_text.push('\n');
    }
    for record in &args.record {
        zone_text.push_str(record);
        zone_text.push('\n');
    }
    if zone_text.trim().is_empty() {
        anyhow::bail!("no records given; use --zone or --record");
    }

    let resolver = FixedResolver::from_zone(&zone_text)?;
    info!("🐾 tama-fixedresolver: {} answer records", resolver.answers.len());

    DnsServer::new(Arc::new(resolver), &args.address, args.port)
        .run()
        .await
}
