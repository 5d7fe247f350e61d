use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::dns::record::DnsRecord;
use crate::proxy::{forward_tcp, forward_udp};
use crate::server::{validate_reply, Protocol};

/// Send one query and return the validated reply.
///
/// The reply's transaction id must match the query's; a mismatch surfaces as
/// `DnsError::TransactionId`. A truncated UDP reply is retried over TCP.
pub fn send_query(
    query: &DnsRecord,
    server: SocketAddr,
    protocol: Protocol,
    timeout: Duration,
) -> anyhow::Result<DnsRecord> {
    let packet = query.pack()?;
    let reply = match protocol {
        Protocol::Tcp => DnsRecord::parse(&forward_tcp(&packet, server, timeout)?)?,
        Protocol::Udp => {
            let reply = DnsRecord::parse(&forward_udp(&packet, server, timeout)?)?;
            if reply.header.tc {
                debug!("reply from {} truncated, retrying over TCP", server);
                DnsRecord::parse(&forward_tcp(&packet, server, timeout)?)?
            } else {
                reply
            }
        }
    };
    validate_reply(query, &reply)?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::Rdata;
    use crate::dns::record::RR;
    use crate::error::DnsError;
    use std::net::UdpSocket;
    use std::net::Ipv4Addr;

    /// One-shot UDP responder on an ephemeral loopback port.
    fn spawn_responder(mutate_id: bool) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            let (len, peer) = socket.recv_from(&mut buf).unwrap();
            let request = DnsRecord::parse(&buf[..len]).unwrap();
            let mut reply = request.reply();
            if mutate_id {
                reply.header.id = request.header.id.wrapping_add(1);
            }
            reply.add_answer(
                RR::new(
                    request.questions[0].qname.clone(),
                    60,
                    Rdata::A(Ipv4Addr::new(10, 0, 0, 1)),
                )
                .unwrap(),
            );
            socket.send_to(&reply.pack().unwrap(), peer).unwrap();
        });
        addr
    }

    #[test]
    fn udp_query_round_trip() {
        let addr = spawn_responder(false);
        let query = DnsRecord::question("abc.com", "A").unwrap();
        let reply = send_query(&query, addr, Protocol::Udp, Duration::from_secs(2)).unwrap();
        assert_eq!(reply.header.id, query.header.id);
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.short(), "10.0.0.1");
    }

    #[test]
    fn transaction_id_mismatch_is_a_dns_error() {
        let addr = spawn_responder(true);
        let query = DnsRecord::question("abc.com", "A").unwrap();
        let err = send_query(&query, addr, Protocol::Udp, Duration::from_secs(2)).unwrap_err();
        match err.downcast_ref::<DnsError>() {
            Some(DnsError::TransactionId { sent, got }) => {
                assert_eq!(*sent, query.header.id);
                assert_eq!(*got, query.header.id.wrapping_add(1));
            }
            other => panic!("expected transaction id mismatch, got {:?}", other),
        }
    }
}
