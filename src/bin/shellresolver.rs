use std::sync::Arc;

use clap::Parser;
use tracing::info;

use tama_dns::resolver::ShellResolver;
use tama_dns::server::DnsServer;

/// Delegates each query to a shell command producing zone-format records
#[derive(Parser, Debug)]
#[command(name = "tama-shellresolver", version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = 5053)]
    port: u16,
    /// Shell command; sees the query as $QNAME and $QTYPE
    #[arg(short, long)]
    command: String,
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
    info!("🐾 tama-shellresolver: {:?}", args.command);
    let resolver = ShellResolver::new(&args.command);

    DnsServer::new(Arc::new(resolver), &args.address, args.port)
        .run()
        .await
}
