use crate::bimap::{class, CLASS, OPCODE, QTYPE, RCODE};
use crate::dns::label::DnsLabel;
use crate::dns::rdata::Rdata;
use crate::dns::record::{DnsHeader, DnsQuestion, DnsRecord, RR};
use crate::error::DnsError;
use crate::zone::{complete_name, tokenize_line, Token};

/// Parser for `dig +qr` debug output. Yields one DnsRecord per
/// `->>HEADER<<-` marker found; everything before the first marker is
/// ignored. Used by the test harness to compare captured traffic.
pub fn parse_dig(text: &str) -> Result<Vec<DnsRecord>, DnsError> {
    let mut records: Vec<DnsRecord> = Vec::new();
    let mut current: Option<DnsRecord> = None;
    let mut section = Section::Answer;

    for raw in text.lines() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(pos) = line.find("->>HEADER<<-") {
            if let Some(done) = current.take() {
                records.push(done);
            }
            let mut record = DnsRecord::new();
            record.header = parse_header_line(&line[pos + "->>HEADER<<-".len()..])?;
            section = Section::Answer;
            current = Some(record);
            continue;
        }

        let Some(record) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix(";; flags:") {
            let flags = rest.split(';').next().unwrap_or("");
            for flag in flags.split_whitespace() {
                record.header.set_flag(flag.trim_end_matches(','));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("; EDNS:") {
            record.add_ar(parse_edns_line(rest)?);
            continue;
        }
        if line.starts_with(";; QUESTION SECTION") {
            section = Section::Question;
            continue;
        }
        if line.starts_with(";; ANSWER SECTION") {
            section = Section::Answer;
            continue;
        }
        if line.starts_with(";; AUTHORITY SECTION") {
            section = Section::Authority;
            continue;
        }
        if line.starts_with(";; ADDITIONAL SECTION") {
            section = Section::Additional;
            continue;
        }
        if line.starts_with(";;") {
            // OPT PSEUDOSECTION header, query time, message size, ...
            continue;
        }
        if let Some(qline) = line.strip_prefix(';') {
            if section == Section::Question {
                record.add_question(parse_question_line(qline)?);
            }
            continue;
        }

        let rr = parse_rr_line(line)?;
        match section {
            Section::Question => {
                return Err(DnsError::Dig(format!(
                    "record line in question section: {:?}",
                    line
                )))
            }
            Section::Answer => record.add_answer(rr),
            Section::Authority => record.add_auth(rr),
            Section::Additional => record.add_ar(rr),
        }
    }

    if let Some(done) = current.take() {
        records.push(done);
    }
    if records.is_empty() {
        return Err(DnsError::Dig("no ->>HEADER<<- marker found".to_string()));
    }
    Ok(records)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

fn parse_header_line(rest: &str) -> Result<DnsHeader, DnsError> {
    let mut header = DnsHeader::new();
    header.id = 0;
    for part in rest.split(',') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "opcode" => header.opcode = OPCODE.code_of(value)? as u8,
            "status" => header.rcode = RCODE.code_of(value)? as u8,
            "id" => {
                header.id = value
                    .parse()
                    .map_err(|_| DnsError::Dig(format!("bad header id {:?}", value)))?
            }
            _ => {}
        }
    }
    Ok(header)
}

fn parse_edns_line(rest: &str) -> Result<RR, DnsError> {
    let mut version = 0u8;
    let mut udp_len = 512u16;
    let mut dnssec_ok = false;
    for segment in rest.split(';') {
        for part in segment.split(',') {
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "version" => {
                    version = value
                        .parse()
                        .map_err(|_| DnsError::Dig(format!("bad EDNS version {:?}", value)))?
                }
                "udp" => {
                    udp_len = value
                        .parse()
                        .map_err(|_| DnsError::Dig(format!("bad EDNS udp size {:?}", value)))?
                }
                "flags" => dnssec_ok = value.split_whitespace().any(|f| f == "do"),
                _ => {}
            }
        }
    }
    Ok(RR::edns0(udp_len, 0, version, dnssec_ok, vec![]))
}

fn parse_question_line(line: &str) -> Result<DnsQuestion, DnsError> {
    let tokens = tokenize_line(line)?;
    if tokens.len() < 2 {
        return Err(DnsError::Dig(format!("short question line {:?}", line)));
    }
    let qname = complete_name(tokens[0].text()?, &DnsLabel::root())?;
    let mut qclass = class::IN;
    for tok in &tokens[1..tokens.len() - 1] {
        let text = tok.text()?;
        if let Ok(code) = CLASS.code_of(text) {
            qclass = code;
        }
    }
    let qtype = QTYPE.code_of(tokens[tokens.len() - 1].text()?)?;
    Ok(DnsQuestion {
        qname,
        qtype,
        qclass,
    })
}

fn parse_rr_line(line: &str) -> Result<RR, DnsError> {
    let tokens = tokenize_line(line)?;
    parse_rr_tokens(&tokens).map_err(|e| DnsError::Dig(format!("{} in {:?}", e, line)))
}

fn parse_rr_tokens(tokens: &[Token]) -> Result<RR, DnsError> {
    if tokens.is_empty() {
        return Err(DnsError::Dig("empty record line".to_string()));
    }
    let root = DnsLabel::root();
    let rname = complete_name(tokens[0].text()?, &root)?;
    let mut ttl = 0u32;
    let mut rclass = class::IN;
    let mut idx = 1;
    let rtype;
    loop {
        let tok = tokens
            .get(idx)
            .ok_or_else(|| DnsError::Dig("missing record type".to_string()))?;
        let text = tok.text()?;
        if !tok.quoted && !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            ttl = text
                .parse()
                .map_err(|_| DnsError::Dig("bad ttl".to_string()))?;
            idx += 1;
        } else if let Ok(code) = CLASS.code_of(text) {
            rclass = code;
            idx += 1;
        } else {
            rtype = QTYPE.code_of(text)?;
            idx += 1;
            break;
        }
    }
    let rdata = Rdata::from_zone(rtype, &tokens[idx..], &root)?;
    Ok(RR {
        rname,
        rtype,
        rclass,
        ttl,
        rdata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::record::DnsRecord;
    use std::net::Ipv4Addr;

    #[test]
    fn own_rendering_round_trips() {
        let mut reply = DnsRecord::question("abc.com", "A").unwrap().reply();
        reply.add_answer(
            RR::new(
                "abc.com".parse().unwrap(),
                60,
                Rdata::A(Ipv4Addr::new(1, 2, 3, 4)),
            )
            .unwrap(),
        );
        reply.add_answer(
            RR::new(
                "abc.com".parse().unwrap(),
                60,
                Rdata::Txt(vec![b"hello world".to_vec()]),
            )
            .unwrap(),
        );
        reply.add_ar(RR::edns0(4096, 0, 0, true, vec![]));

        let text = reply.to_string();
        let parsed = parse_dig(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], reply);
    }

    #[test]
    fn parses_real_dig_output() {
        let text = "\
; <<>> DiG 9.16.1 <<>> +qr www.google.com
;; global options: +cmd
;; Got answer:
;; ->>HEADER<<- opcode: QUERY, status: NOERROR, id: 54786
;; flags: qr rd ra; QUERY: 1, ANSWER: 1, AUTHORITY: 0, ADDITIONAL: 1

;; OPT PSEUDOSECTION:
; EDNS: version: 0, flags:; udp: 512
;; QUESTION SECTION:
;www.google.com.             IN      A

;; ANSWER SECTION:
www.google.com.      63      IN      A       172.217.169.68

;; Query time: 6 msec
;; SERVER: 127.0.0.1#53(127.0.0.1)
;; MSG SIZE  rcvd: 59
";
        let records = parse_dig(text).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.header.id, 54786);
        assert!(r.header.qr && r.header.rd && r.header.ra);
        assert!(!r.header.aa);
        assert_eq!(r.questions.len(), 1);
        assert_eq!(r.questions[0].qname.to_string(), "www.google.com.");
        assert_eq!(r.answers.len(), 1);
        assert_eq!(r.answers[0].ttl, 63);
        assert_eq!(
            r.answers[0].rdata,
            Rdata::A(Ipv4Addr::new(172, 217, 169, 68))
        );
        assert_eq!(r.opt().unwrap().edns_udp_len(), 512);
        assert!(!r.opt().unwrap().edns_dnssec_ok());
    }

    #[test]
    fn one_record_per_header_marker() {
        let q = DnsRecord::question("example.com", "MX").unwrap();
        let mut reply = q.reply();
        reply.add_answer(
            RR::new(
                "example.com".parse().unwrap(),
                300,
                Rdata::Mx {
                    preference: 10,
                    exchange: "mail.example.com".parse().unwrap(),
                },
            )
            .unwrap(),
        );
        let text = format!("{}\n{}", q, reply);
        let records = parse_dig(&text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], q);
        assert_eq!(records[1], reply);
    }

    #[test]
    fn missing_header_marker_fails() {
        assert!(parse_dig("just some text\n").is_err());
    }
}
