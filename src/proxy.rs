use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::bimap::{rcode, rtype};
use crate::dns::record::{DnsRecord, RR};
use crate::error::DnsError;
use crate::server::{validate_reply, Handler, Protocol, Resolver};
use crate::zone::parse_zone;

/// Forward raw packet bytes upstream over UDP and wait for one reply.
pub fn forward_udp(packet: &[u8], upstream: SocketAddr, timeout: Duration) -> anyhow::Result<Vec<u8>> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(timeout))?;
    socket
        .send_to(packet, upstream)
        .with_context(|| format!("sending to {}", upstream))?;
    let mut buf = vec![0u8; 65535];
    let (len, _) = socket
        .recv_from(&mut buf)
        .with_context(|| format!("waiting for {}", upstream))?;
    buf.truncate(len);
    Ok(buf)
}

/// Forward over TCP with the 2-byte length framing.
pub fn forward_tcp(packet: &[u8], upstream: SocketAddr, timeout: Duration) -> anyhow::Result<Vec<u8>> {
    let mut stream = TcpStream::connect_timeout(&upstream, timeout)
        .with_context(|| format!("connecting to {}", upstream))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(&(packet.len() as u16).to_be_bytes())?;
    stream.write_all(packet)?;
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf)?;
    let mut msg = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut msg)?;
    Ok(msg)
}

/// Forwards every query verbatim to one upstream server on the transport it
/// arrived on. A truncated UDP reply is retried over TCP.
pub struct ProxyResolver {
    upstream: SocketAddr,
    timeout: Duration,
}

impl ProxyResolver {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }
}

impl Resolver for ProxyResolver {
    fn resolve(&self, request: &DnsRecord, handler: &Handler) -> anyhow::Result<DnsRecord> {
        let packet = request.pack()?;
        let bytes = match handler.protocol {
            Protocol::Tcp => forward_tcp(&packet, self.upstream, self.timeout)?,
            Protocol::Udp => {
                let bytes = forward_udp(&packet, self.upstream, self.timeout)?;
                let reply = DnsRecord::parse(&bytes)?;
                if reply.header.tc {
                    debug!("upstream reply truncated, retrying over TCP");
                    forward_tcp(&packet, self.upstream, self.timeout)?
                } else {
                    bytes
                }
            }
        };
        let reply = DnsRecord::parse(&bytes)?;
        validate_reply(request, &reply)?;
        Ok(reply)
    }
}

/// Proxy with per-domain overrides: a local zone of (possibly glob) records
/// answered directly, a skip list that always forwards, and an nxdomain list
/// answered with NXDOMAIN. Everything else goes upstream.
pub struct InterceptResolver {
    zone: Vec<RR>,
    skip: Vec<String>,
    nxdomain: Vec<String>,
    proxy: ProxyResolver,
}

impl InterceptResolver {
    pub fn new(
        zone_text: &str,
        skip: Vec<String>,
        nxdomain: Vec<String>,
        upstream: SocketAddr,
        timeout: Duration,
    ) -> Result<Self, DnsError> {
        Ok(Self {
            zone: parse_zone(zone_text)?,
            skip,
            nxdomain,
            proxy: ProxyResolver::new(upstream, timeout),
        })
    }

    pub fn record_count(&self) -> usize {
        self.zone.len()
    }
}

impl Resolver for InterceptResolver {
    fn resolve(&self, request: &DnsRecord, handler: &Handler) -> anyhow::Result<DnsRecord> {
        let question = request
            .questions
            .first()
            .context("empty question section")?;
        let qname = &question.qname;

        if !self.skip.iter().any(|glob| qname.match_glob(glob)) {
            let mut reply = request.reply();
            for rr in &self.zone {
                let matched = qname == &rr.rname || qname.match_glob(&rr.rname.to_string());
                if matched
                    && (question.qtype == rtype::ANY
                        || question.qtype == rr.rtype
                        || rr.rtype == rtype::CNAME)
                {
                    let mut answer = rr.clone();
                    answer.rname = qname.clone();
                    reply.add_answer(answer);
                }
            }
            if !reply.answers.is_empty() {
                debug!("intercepting {} {}", qname, question.qtype);
                return Ok(reply);
            }
            if self.nxdomain.iter().any(|glob| qname.match_glob(glob)) {
                debug!("forcing NXDOMAIN for {}", qname);
                reply.header.rcode = rcode::NXDOMAIN;
                return Ok(reply);
            }
        }

        self.proxy.resolve(request, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::Rdata;
    use std::net::Ipv4Addr;

    fn handler() -> Handler {
        Handler {
            peer: "127.0.0.1:4242".parse().unwrap(),
            protocol: Protocol::Udp,
        }
    }

    fn intercept() -> InterceptResolver {
        InterceptResolver::new(
            "local.dev. 60 IN A 127.0.0.1\n*.apps.dev. 60 IN A 127.0.0.2\n",
            vec!["passthru.dev.".to_string()],
            vec!["*.blocked.dev.".to_string()],
            // nothing listens here; forwarding attempts fail fast
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_millis(50),
        )
        .unwrap()
    }

    #[test]
    fn intercept_serves_local_records() {
        let resolver = intercept();
        let query = DnsRecord::question("local.dev", "A").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(
            reply.answers[0].rdata,
            Rdata::A(Ipv4Addr::new(127, 0, 0, 1))
        );

        let query = DnsRecord::question("web.apps.dev", "A").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.answers[0].rname.to_string(), "web.apps.dev.");
        assert_eq!(
            reply.answers[0].rdata,
            Rdata::A(Ipv4Addr::new(127, 0, 0, 2))
        );
    }

    #[test]
    fn intercept_nxdomain_list() {
        let resolver = intercept();
        let query = DnsRecord::question("ads.blocked.dev", "A").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.header.rcode, rcode::NXDOMAIN);
        assert!(reply.answers.is_empty());
    }

    #[test]
    fn intercept_skip_list_bypasses_local_zone() {
        let resolver = InterceptResolver::new(
            "passthru.dev. 60 IN A 127.0.0.1\n",
            vec!["passthru.dev.".to_string()],
            vec![],
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_millis(50),
        )
        .unwrap();
        // the local record would match, but the skip list forces forwarding,
        // and the dead upstream turns that into an error
        let query = DnsRecord::question("passthru.dev", "A").unwrap();
        assert!(resolver.resolve(&query, &handler()).is_err());
    }

    #[test]
    fn unmatched_names_are_forwarded() {
        let resolver = intercept();
        let query = DnsRecord::question("example.com", "A").unwrap();
        assert!(resolver.resolve(&query, &handler()).is_err());
    }
}
