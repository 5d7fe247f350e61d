use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info, warn};

use crate::bimap::rcode;
use crate::dns::record::DnsRecord;
use crate::error::DnsError;

/// TCP connections are dropped after this long without a complete query.
pub const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Replies on UDP may not exceed this unless the client advertised more.
pub const UDP_DEFAULT_PAYLOAD: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Transport details for one query, handed to the resolver next to the
/// request.
#[derive(Clone, Debug)]
pub struct Handler {
    pub peer: SocketAddr,
    pub protocol: Protocol,
}

/// The caller-supplied resolution object. `resolve` runs on a worker per
/// query and must be reentrant; a returned error becomes SERVFAIL.
pub trait Resolver: Send + Sync + 'static {
    fn resolve(&self, request: &DnsRecord, handler: &Handler) -> anyhow::Result<DnsRecord>;
}

/// SERVFAIL reply carrying the request's id and question.
pub fn servfail(request: &DnsRecord) -> DnsRecord {
    let mut reply = request.reply();
    reply.header.rcode = rcode::SERVFAIL;
    reply
}

/// Last-resort SERVFAIL for queries we could not even parse: patch the raw
/// header bits in place and zero the record counts.
pub fn servfail_bytes(query: &[u8]) -> Option<Vec<u8>> {
    if query.len() < 12 {
        return None;
    }
    let mut response = query.to_vec();
    response[2] = (response[2] | 0x80) & !0x02; // QR=1, TC=0
    response[3] = (response[3] & 0xf0) | 0x02; // RCODE=SERVFAIL
    for b in &mut response[6..12] {
        *b = 0;
    }
    Some(response)
}

/// Validate a reply against the request it answers.
pub fn validate_reply(request: &DnsRecord, reply: &DnsRecord) -> Result<(), DnsError> {
    if reply.header.id != request.header.id {
        return Err(DnsError::TransactionId {
            sent: request.header.id,
            got: reply.header.id,
        });
    }
    Ok(())
}

/// Run one query through the resolver and produce wire bytes ready to send.
///
/// Resolver failures and transaction-id mismatches both degrade to SERVFAIL;
/// only an unparseable request or an unpackable response error out.
pub async fn process_query(
    resolver: Arc<dyn Resolver>,
    packet: &[u8],
    handler: Handler,
) -> anyhow::Result<Vec<u8>> {
    let request = DnsRecord::parse(packet)?;
    let udp_limit = request
        .opt()
        .map(|o| o.edns_udp_len() as usize)
        .unwrap_or(UDP_DEFAULT_PAYLOAD)
        .max(UDP_DEFAULT_PAYLOAD);

    let reply = {
        let request = request.clone();
        let handler = handler.clone();
        // resolvers are synchronous and may block (shell, upstream sockets)
        tokio::task::spawn_blocking(move || match resolver.resolve(&request, &handler) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("resolver error for {}: {}", handler.peer, e);
                servfail(&request)
            }
        })
        .await?
    };

    let reply = match validate_reply(&request, &reply) {
        Ok(()) => reply,
        Err(e) => {
            warn!("dropping response: {}", e);
            servfail(&request)
        }
    };

    let mut bytes = reply.pack()?;
    if handler.protocol == Protocol::Udp && bytes.len() > udp_limit {
        debug!(
            "truncating {} byte reply for {} (limit {})",
            bytes.len(),
            handler.peer,
            udp_limit
        );
        bytes = reply.truncate().pack()?;
    }
    Ok(bytes)
}

/// UDP + TCP server dispatching every query to one resolver.
pub struct DnsServer {
    resolver: Arc<dyn Resolver>,
    address: String,
    port: u16,
}

impl DnsServer {
    pub fn new(resolver: Arc<dyn Resolver>, address: &str, port: u16) -> Self {
        Self {
            resolver,
            address: address.to_string(),
            port,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let bind_addr = format!("{}:{}", self.address, self.port);
        let udp_socket = Arc::new(UdpSocket::bind(&bind_addr).await?);
        info!("🐾 listening on {} (UDP)", bind_addr);
        let tcp_listener = TcpListener::bind(&bind_addr).await?;
        info!("🐾 listening on {} (TCP)", bind_addr);

        let tcp_resolver = self.resolver.clone();
        tokio::spawn(async move {
            loop {
                match tcp_listener.accept().await {
                    Ok((stream, peer)) => {
                        let resolver = tcp_resolver.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_tcp(resolver, stream, peer).await {
                                warn!("TCP handler error from {}: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => error!("TCP accept error: {}", e),
                }
            }
        });

        let mut buf = vec![0u8; 65535];
        loop {
            match udp_socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    let packet = buf[..len].to_vec();
                    let socket = udp_socket.clone();
                    let resolver = self.resolver.clone();
                    tokio::spawn(async move {
                        let handler = Handler {
                            peer,
                            protocol: Protocol::Udp,
                        };
                        match process_query(resolver, &packet, handler).await {
                            Ok(response) => {
                                if let Err(e) = socket.send_to(&response, peer).await {
                                    warn!("failed to send response to {}: {}", peer, e);
                                }
                            }
                            Err(e) => {
                                warn!("query handling error from {}: {}", peer, e);
                                if let Some(response) = servfail_bytes(&packet) {
                                    let _ = socket.send_to(&response, peer).await;
                                }
                            }
                        }
                    });
                }
                Err(e) => error!("UDP recv error: {}", e),
            }
        }
    }
}

/// Length-prefixed query loop over one TCP connection, with an idle timeout.
async fn handle_tcp(
    resolver: Arc<dyn Resolver>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    debug!("TCP connection from {}", peer);
    loop {
        let mut len_buf = [0u8; 2];
        match tokio::time::timeout(TCP_IDLE_TIMEOUT, stream.read_exact(&mut len_buf)).await {
            Err(_) => {
                debug!("TCP idle timeout for {}", peer);
                break;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }
        let msg_len = u16::from_be_bytes(len_buf) as usize;
        if msg_len == 0 {
            break;
        }

        let mut msg = vec![0u8; msg_len];
        tokio::time::timeout(TCP_IDLE_TIMEOUT, stream.read_exact(&mut msg)).await??;

        let handler = Handler {
            peer,
            protocol: Protocol::Tcp,
        };
        let response = match process_query(resolver.clone(), &msg, handler).await {
            Ok(response) => response,
            Err(e) => {
                warn!("query handling error from {}: {}", peer, e);
                match servfail_bytes(&msg) {
                    Some(response) => response,
                    None => break,
                }
            }
        };

        stream
            .write_all(&(response.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(&response).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::Rdata;
    use crate::dns::record::RR;

    struct EchoResolver;

    impl Resolver for EchoResolver {
        fn resolve(&self, request: &DnsRecord, _handler: &Handler) -> anyhow::Result<DnsRecord> {
            Ok(request.reply())
        }
    }

    struct WrongIdResolver;

    impl Resolver for WrongIdResolver {
        fn resolve(&self, request: &DnsRecord, _handler: &Handler) -> anyhow::Result<DnsRecord> {
            let mut reply = request.reply();
            reply.header.id = request.header.id.wrapping_add(1);
            Ok(reply)
        }
    }

    struct FailingResolver;

    impl Resolver for FailingResolver {
        fn resolve(&self, _request: &DnsRecord, _handler: &Handler) -> anyhow::Result<DnsRecord> {
            anyhow::bail!("boom")
        }
    }

    struct BigTxtResolver;

    impl Resolver for BigTxtResolver {
        fn resolve(&self, request: &DnsRecord, _handler: &Handler) -> anyhow::Result<DnsRecord> {
            let mut reply = request.reply();
            let qname = request.questions[0].qname.clone();
            for _ in 0..8 {
                reply.add_answer(RR::new(
                    qname.clone(),
                    60,
                    Rdata::Txt(vec![vec![b'x'; 200]]),
                )?);
            }
            Ok(reply)
        }
    }

    fn handler(protocol: Protocol) -> Handler {
        Handler {
            peer: "127.0.0.1:5353".parse().unwrap(),
            protocol,
        }
    }

    #[tokio::test]
    async fn resolver_error_becomes_servfail() {
        let query = DnsRecord::question("abc.com", "A").unwrap();
        let bytes = process_query(
            Arc::new(FailingResolver),
            &query.pack().unwrap(),
            handler(Protocol::Udp),
        )
        .await
        .unwrap();
        let reply = DnsRecord::parse(&bytes).unwrap();
        assert_eq!(reply.header.rcode, rcode::SERVFAIL);
        assert_eq!(reply.header.id, query.header.id);
    }

    #[tokio::test]
    async fn id_mismatch_becomes_servfail() {
        let query = DnsRecord::question("abc.com", "A").unwrap();
        let bytes = process_query(
            Arc::new(WrongIdResolver),
            &query.pack().unwrap(),
            handler(Protocol::Udp),
        )
        .await
        .unwrap();
        let reply = DnsRecord::parse(&bytes).unwrap();
        assert_eq!(reply.header.id, query.header.id);
        assert_eq!(reply.header.rcode, rcode::SERVFAIL);
    }

    #[tokio::test]
    async fn oversized_udp_reply_is_truncated() {
        let query = DnsRecord::question("abc.com", "TXT").unwrap();
        let bytes = process_query(
            Arc::new(BigTxtResolver),
            &query.pack().unwrap(),
            handler(Protocol::Udp),
        )
        .await
        .unwrap();
        assert!(bytes.len() <= UDP_DEFAULT_PAYLOAD);
        let reply = DnsRecord::parse(&bytes).unwrap();
        assert!(reply.header.tc);
        assert!(reply.answers.is_empty());

        // same reply over TCP stays intact
        let bytes = process_query(
            Arc::new(BigTxtResolver),
            &query.pack().unwrap(),
            handler(Protocol::Tcp),
        )
        .await
        .unwrap();
        let reply = DnsRecord::parse(&bytes).unwrap();
        assert!(!reply.header.tc);
        assert_eq!(reply.answers.len(), 8);
    }

    #[tokio::test]
    async fn edns_payload_size_raises_udp_limit() {
        let mut query = DnsRecord::question("abc.com", "TXT").unwrap();
        query.add_ar(RR::edns0(4096, 0, 0, false, vec![]));
        let bytes = process_query(
            Arc::new(BigTxtResolver),
            &query.pack().unwrap(),
            handler(Protocol::Udp),
        )
        .await
        .unwrap();
        let reply = DnsRecord::parse(&bytes).unwrap();
        assert!(!reply.header.tc);
        assert_eq!(reply.answers.len(), 8);
    }

    #[tokio::test]
    async fn echo_resolver_round_trip() {
        let query = DnsRecord::question("abc.com", "A").unwrap();
        let bytes = process_query(
            Arc::new(EchoResolver),
            &query.pack().unwrap(),
            handler(Protocol::Udp),
        )
        .await
        .unwrap();
        let reply = DnsRecord::parse(&bytes).unwrap();
        assert!(reply.header.qr);
        assert_eq!(reply.questions, query.questions);
    }

    #[test]
    fn servfail_bytes_patches_raw_header() {
        let query = DnsRecord::question("abc.com", "A").unwrap();
        let raw = query.pack().unwrap();
        let patched = servfail_bytes(&raw).unwrap();
        let reply = DnsRecord::parse(&patched).unwrap();
        assert!(reply.header.qr);
        assert_eq!(reply.header.rcode, rcode::SERVFAIL);
        assert_eq!(reply.header.id, query.header.id);

        assert!(servfail_bytes(&[0u8; 4]).is_none());
    }
}
