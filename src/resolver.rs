use std::process::Command;

use anyhow::Context;
use tracing::debug;

use crate::bimap::{rcode, rtype, QTYPE};
use crate::dns::record::{DnsRecord, RR};
use crate::error::DnsError;
use crate::server::{Handler, Resolver};
use crate::zone::parse_zone;

/// Replays one fixed RR set for every query, with the answer names rewritten
/// to the query name.
pub struct FixedResolver {
    pub answers: Vec<RR>,
    pub auth: Vec<RR>,
    pub ar: Vec<RR>,
}

impl FixedResolver {
    pub fn new(answers: Vec<RR>) -> Self {
        Self {
            answers,
            auth: Vec::new(),
            ar: Vec::new(),
        }
    }

    pub fn from_zone(zone_text: &str) -> Result<Self, DnsError> {
        Ok(Self::new(parse_zone(zone_text)?))
    }
}

impl Resolver for FixedResolver {
    fn resolve(&self, request: &DnsRecord, _handler: &Handler) -> anyhow::Result<DnsRecord> {
        let question = request
            .questions
            .first()
            .context("empty question section")?;
        let mut reply = request.reply();
        for rr in &self.answers {
            let mut rr = rr.clone();
            rr.rname = question.qname.clone();
            reply.add_answer(rr);
        }
        for rr in &self.auth {
            reply.add_auth(rr.clone());
        }
        for rr in &self.ar {
            reply.add_ar(rr.clone());
        }
        Ok(reply)
    }
}

/// Answers from a parsed zone. With `glob` enabled, record names are treated
/// as shell-style patterns and matching answers take the query's name.
pub struct ZoneResolver {
    zone: Vec<RR>,
    glob: bool,
}

impl ZoneResolver {
    pub fn new(zone_text: &str, glob: bool) -> Result<Self, DnsError> {
        Ok(Self {
            zone: parse_zone(zone_text)?,
            glob,
        })
    }

    pub fn from_records(zone: Vec<RR>, glob: bool) -> Self {
        Self { zone, glob }
    }

    pub fn record_count(&self) -> usize {
        self.zone.len()
    }
}

impl Resolver for ZoneResolver {
    fn resolve(&self, request: &DnsRecord, _handler: &Handler) -> anyhow::Result<DnsRecord> {
        let question = request
            .questions
            .first()
            .context("empty question section")?;
        let mut reply = request.reply();
        for rr in &self.zone {
            let matched = if self.glob {
                question.qname.match_glob(&rr.rname.to_string())
            } else {
                question.qname == rr.rname
            };
            // CNAMEs are returned for any qtype at the owner name
            if matched
                && (question.qtype == rtype::ANY
                    || question.qtype == rr.rtype
                    || rr.rtype == rtype::CNAME)
            {
                let mut answer = rr.clone();
                if self.glob {
                    answer.rname = question.qname.clone();
                }
                reply.add_answer(answer);
            }
        }
        if reply.answers.is_empty() {
            reply.header.rcode = rcode::NXDOMAIN;
        }
        Ok(reply)
    }
}

/// Delegates each query to a shell command; stdout is parsed as zone text
/// and becomes the answer section. The query is passed in `QNAME`/`QTYPE`.
pub struct ShellResolver {
    command: String,
}

impl ShellResolver {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

impl Resolver for ShellResolver {
    fn resolve(&self, request: &DnsRecord, _handler: &Handler) -> anyhow::Result<DnsRecord> {
        let question = request
            .questions
            .first()
            .context("empty question section")?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("QNAME", question.qname.to_string())
            .env("QTYPE", QTYPE.name_of(question.qtype))
            .output()
            .context("failed to spawn shell command")?;
        if !output.status.success() {
            anyhow::bail!(
                "shell command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("shell output for {}: {:?}", question.qname, stdout);
        let answers = parse_zone(&stdout)?;

        let mut reply = request.reply();
        if answers.is_empty() {
            reply.header.rcode = rcode::NXDOMAIN;
        }
        for rr in answers {
            reply.add_answer(rr);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::Rdata;
    use crate::server::Protocol;
    use std::net::Ipv4Addr;

    fn handler() -> Handler {
        Handler {
            peer: "127.0.0.1:4242".parse().unwrap(),
            protocol: Protocol::Udp,
        }
    }

    #[test]
    fn fixed_resolver_rewrites_answer_names() {
        let resolver = FixedResolver::from_zone("ignored.com. 60 IN A 1.2.3.4\n").unwrap();
        let query = DnsRecord::question("other.org", "A").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.answers[0].rname.to_string(), "other.org.");
        assert_eq!(reply.answers[0].rdata, Rdata::A(Ipv4Addr::new(1, 2, 3, 4)));
    }

    const ZONE: &str = "\
$TTL 60
$ORIGIN abc.com
@ IN A 1.2.3.4
www IN CNAME abc.com.
www IN TXT \"site\"
";

    #[test]
    fn zone_resolver_matches_name_and_type() {
        let resolver = ZoneResolver::new(ZONE, false).unwrap();
        assert_eq!(resolver.record_count(), 3);

        let query = DnsRecord::question("abc.com", "A").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.header.rcode, rcode::NOERROR);

        // CNAME comes back regardless of qtype
        let query = DnsRecord::question("www.abc.com", "A").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.answers[0].rtype, rtype::CNAME);

        // ANY matches every record at the name
        let query = DnsRecord::question("www.abc.com", "ANY").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.answers.len(), 2);

        let query = DnsRecord::question("nope.abc.com", "A").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert!(reply.answers.is_empty());
        assert_eq!(reply.header.rcode, rcode::NXDOMAIN);
    }

    #[test]
    fn zone_resolver_glob_matching() {
        let resolver = ZoneResolver::new("*.wild.com. 60 IN A 9.9.9.9\n", true).unwrap();
        let query = DnsRecord::question("anything.wild.com", "A").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.answers[0].rname.to_string(), "anything.wild.com.");
    }

    #[test]
    fn shell_resolver_parses_command_output() {
        let resolver = ShellResolver::new("echo \"$QNAME 60 IN TXT \\\"type=$QTYPE\\\"\"");
        let query = DnsRecord::question("abc.com", "TXT").unwrap();
        let reply = resolver.resolve(&query, &handler()).unwrap();
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.answers[0].rname.to_string(), "abc.com.");
        assert_eq!(
            reply.answers[0].rdata,
            Rdata::Txt(vec![b"type=TXT".to_vec()])
        );
    }

    #[test]
    fn shell_resolver_failure_is_an_error() {
        let resolver = ShellResolver::new("exit 3");
        let query = DnsRecord::question("abc.com", "A").unwrap();
        assert!(resolver.resolve(&query, &handler()).is_err());
    }
}
