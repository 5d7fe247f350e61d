use std::net::ToSocketAddrs;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use tama_dns::client::send_query;
use tama_dns::server::Protocol;
use tama_dns::{DnsRecord, RR};

/// dig-style DNS query client
#[derive(Parser, Debug)]
#[command(name = "tama-client", version)]
struct Args {
    /// Domain to query
    domain: String,
    /// Query type mnemonic (A, AAAA, MX, TXT, ..., TYPE<n>)
    #[arg(default_value = "A")]
    qtype: String,
    /// Server to query, host:port
    #[arg(short, long, default_value = "8.8.8.8:53")]
    server: String,
    /// Query over TCP instead of UDP
    #[arg(long)]
    tcp: bool,
    /// Advertise EDNS0 with this UDP payload size
    #[arg(long)]
    edns: Option<u16>,
    /// Set the DNSSEC OK bit (implies --edns 4096)
    #[arg(long)]
    dnssec: bool,
    /// Query timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tama_dns=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut query = DnsRecord::question(&args.domain, &args.qtype.to_uppercase())?;
    if args.edns.is_some() || args.dnssec {
        query.add_ar(RR::edns0(
            args.edns.unwrap_or(4096),
            0,
            0,
            args.dnssec,
            vec![],
        ));
    }

    let server = args
        .server
        .to_socket_addrs()?
        .next()
        .with_context(|| format!("cannot resolve server {}", args.server))?;
    let protocol = if args.tcp { Protocol::Tcp } else { Protocol::Udp };

    let reply = send_query(&query, server, protocol, Duration::from_millis(args.timeout_ms))?;
    print!("{}", reply);
    Ok(())
}
