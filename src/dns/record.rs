use std::fmt;

use crate::bimap::{class, rtype, CLASS, EDNS_OPTION, OPCODE, QTYPE, RCODE};
use crate::buffer::Buffer;
use crate::dns::label::{DnsLabel, NameMap};
use crate::dns::rdata::{EdnsOption, Rdata};
use crate::error::DnsError;

/// RFC 1035 header minus the four counts, which are derived from the actual
/// section lengths at encode time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: u8,
}

impl DnsHeader {
    /// Fresh query header with a random transaction id.
    pub fn new() -> Self {
        Self {
            id: rand::random(),
            qr: false,
            opcode: 0,
            aa: false,
            tc: false,
            rd: false,
            ra: false,
            z: false,
            ad: false,
            cd: false,
            rcode: 0,
        }
    }

    fn decode(buf: &mut Buffer) -> Result<(Self, [u16; 4]), DnsError> {
        let id = buf.get_u16()?;
        let flags = buf.get_u16()?;
        let counts = [buf.get_u16()?, buf.get_u16()?, buf.get_u16()?, buf.get_u16()?];
        let header = Self {
            id,
            qr: (flags >> 15) & 1 == 1,
            opcode: ((flags >> 11) & 0xf) as u8,
            aa: (flags >> 10) & 1 == 1,
            tc: (flags >> 9) & 1 == 1,
            rd: (flags >> 8) & 1 == 1,
            ra: (flags >> 7) & 1 == 1,
            z: (flags >> 6) & 1 == 1,
            ad: (flags >> 5) & 1 == 1,
            cd: (flags >> 4) & 1 == 1,
            rcode: (flags & 0xf) as u8,
        };
        Ok((header, counts))
    }

    fn encode(&self, buf: &mut Buffer, counts: [u16; 4]) -> Result<(), DnsError> {
        if self.opcode > 0xf {
            return Err(DnsError::Encode(format!("opcode {} does not fit 4 bits", self.opcode)));
        }
        if self.rcode > 0xf {
            return Err(DnsError::Encode(format!("rcode {} does not fit 4 bits", self.rcode)));
        }
        let mut flags: u16 = 0;
        flags |= (self.qr as u16) << 15;
        flags |= (self.opcode as u16) << 11;
        flags |= (self.aa as u16) << 10;
        flags |= (self.tc as u16) << 9;
        flags |= (self.rd as u16) << 8;
        flags |= (self.ra as u16) << 7;
        flags |= (self.z as u16) << 6;
        flags |= (self.ad as u16) << 5;
        flags |= (self.cd as u16) << 4;
        flags |= self.rcode as u16;

        buf.put_u16(self.id);
        buf.put_u16(flags);
        for c in counts {
            buf.put_u16(c);
        }
        Ok(())
    }

    /// Active flag mnemonics, lowercased, in dig order.
    pub fn flags_text(&self) -> String {
        let mut out = Vec::new();
        for (set, name) in [
            (self.qr, "qr"),
            (self.aa, "aa"),
            (self.tc, "tc"),
            (self.rd, "rd"),
            (self.ra, "ra"),
            (self.z, "z"),
            (self.ad, "ad"),
            (self.cd, "cd"),
        ] {
            if set {
                out.push(name);
            }
        }
        out.join(" ")
    }

    pub fn set_flag(&mut self, name: &str) -> bool {
        match name {
            "qr" => self.qr = true,
            "aa" => self.aa = true,
            "tc" => self.tc = true,
            "rd" => self.rd = true,
            "ra" => self.ra = true,
            "z" => self.z = true,
            "ad" => self.ad = true,
            "cd" => self.cd = true,
            _ => return false,
        }
        true
    }
}

impl Default for DnsHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsQuestion {
    pub qname: DnsLabel,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuestion {
    pub fn new(qname: DnsLabel, qtype: u16) -> Self {
        Self {
            qname,
            qtype,
            qclass: class::IN,
        }
    }

    fn decode(buf: &mut Buffer) -> Result<Self, DnsError> {
        Ok(Self {
            qname: DnsLabel::decode(buf)?,
            qtype: buf.get_u16()?,
            qclass: buf.get_u16()?,
        })
    }

    fn encode(&self, buf: &mut Buffer, map: &mut NameMap) -> Result<(), DnsError> {
        self.qname.encode(buf, map)?;
        buf.put_u16(self.qtype);
        buf.put_u16(self.qclass);
        Ok(())
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ";{}\t{}\t{}",
            self.qname,
            CLASS.name_of(self.qclass),
            QTYPE.name_of(self.qtype)
        )
    }
}

/// One resource record. For OPT the rclass carries the sender's UDP payload
/// size and the ttl carries (ext-rcode << 24 | version << 16 | DO << 15 | Z).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RR {
    pub rname: DnsLabel,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Rdata,
}

impl RR {
    /// Build an RR whose rtype is taken from the rdata variant. Opaque rdata
    /// needs `new_unknown` instead.
    pub fn new(rname: DnsLabel, ttl: u32, rdata: Rdata) -> Result<Self, DnsError> {
        let rtype = rdata
            .rtype()
            .ok_or_else(|| DnsError::Encode("opaque rdata needs an explicit rtype".to_string()))?;
        Ok(Self {
            rname,
            rtype,
            rclass: class::IN,
            ttl,
            rdata,
        })
    }

    pub fn new_unknown(rname: DnsLabel, rtype: u16, ttl: u32, data: Vec<u8>) -> Self {
        Self {
            rname,
            rtype,
            rclass: class::IN,
            ttl,
            rdata: Rdata::Unknown(data),
        }
    }

    /// EDNS0 OPT pseudo-record (RFC 6891): root name, udp size in the class
    /// field, flags packed into the ttl field.
    pub fn edns0(udp_len: u16, ext_rcode: u8, version: u8, dnssec_ok: bool, options: Vec<EdnsOption>) -> Self {
        let ttl = ((ext_rcode as u32) << 24) | ((version as u32) << 16) | ((dnssec_ok as u32) << 15);
        Self {
            rname: DnsLabel::root(),
            rtype: rtype::OPT,
            rclass: udp_len,
            ttl,
            rdata: Rdata::Opt(options),
        }
    }

    pub fn is_opt(&self) -> bool {
        self.rtype == rtype::OPT
    }

    pub fn edns_udp_len(&self) -> u16 {
        self.rclass
    }

    pub fn edns_version(&self) -> u8 {
        ((self.ttl >> 16) & 0xff) as u8
    }

    pub fn edns_ext_rcode(&self) -> u8 {
        ((self.ttl >> 24) & 0xff) as u8
    }

    pub fn edns_dnssec_ok(&self) -> bool {
        (self.ttl >> 15) & 1 == 1
    }

    fn decode(buf: &mut Buffer) -> Result<Self, DnsError> {
        let rname = DnsLabel::decode(buf)?;
        let rtype = buf.get_u16()?;
        let rclass = buf.get_u16()?;
        let ttl = buf.get_u32()?;
        let rdlength = buf.get_u16()?;
        let rdata = Rdata::decode(buf, rtype, rdlength)?;
        Ok(Self {
            rname,
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }

    fn encode(&self, buf: &mut Buffer, map: &mut NameMap) -> Result<(), DnsError> {
        if let Some(t) = self.rdata.rtype() {
            if t != self.rtype {
                return Err(DnsError::Encode(format!(
                    "rtype {} does not match rdata variant {}",
                    QTYPE.name_of(self.rtype),
                    QTYPE.name_of(t)
                )));
            }
        }
        self.rname.encode(buf, map)?;
        buf.put_u16(self.rtype);
        buf.put_u16(self.rclass);
        buf.put_u32(self.ttl);
        let len_at = buf.len();
        buf.put_u16(0); // RDLENGTH placeholder
        let start = buf.len();
        self.rdata.encode(buf, map)?;
        let rdlen = buf.len() - start;
        if rdlen > u16::MAX as usize {
            return Err(DnsError::Encode(format!("rdata of {} bytes exceeds 65535", rdlen)));
        }
        buf.patch_u16(len_at, rdlen as u16)?;
        Ok(())
    }
}

impl fmt::Display for RR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.rname,
            self.ttl,
            CLASS.name_of(self.rclass),
            QTYPE.name_of(self.rtype),
            self.rdata.to_zone()
        )
    }
}

/// A whole DNS message: header, question section, and the three record
/// sections. Counts live in the section vectors, never separately.
#[derive(Clone, Debug)]
pub struct DnsRecord {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<RR>,
    pub auth: Vec<RR>,
    pub ar: Vec<RR>,
}

impl DnsRecord {
    pub fn new() -> Self {
        Self {
            header: DnsHeader::new(),
            questions: Vec::new(),
            answers: Vec::new(),
            auth: Vec::new(),
            ar: Vec::new(),
        }
    }

    /// Standard query skeleton: random id, RD set, one question.
    pub fn question(qname: &str, qtype_name: &str) -> Result<Self, DnsError> {
        let mut record = Self::new();
        record.header.rd = true;
        record
            .questions
            .push(DnsQuestion::new(qname.parse()?, QTYPE.code_of(qtype_name)?));
        Ok(record)
    }

    /// Reply skeleton: id, opcode and rd copied from the request; qr, ra and
    /// aa set; questions copied; record sections empty.
    pub fn reply(&self) -> DnsRecord {
        let mut header = DnsHeader::new();
        header.id = self.header.id;
        header.opcode = self.header.opcode;
        header.rd = self.header.rd;
        header.qr = true;
        header.ra = true;
        header.aa = true;
        DnsRecord {
            header,
            questions: self.questions.clone(),
            answers: Vec::new(),
            auth: Vec::new(),
            ar: Vec::new(),
        }
    }

    /// Empty-sectioned copy with TC set, for oversized UDP replies.
    pub fn truncate(&self) -> DnsRecord {
        let mut header = self.header.clone();
        header.tc = true;
        DnsRecord {
            header,
            questions: self.questions.clone(),
            answers: Vec::new(),
            auth: Vec::new(),
            ar: Vec::new(),
        }
    }

    pub fn add_question(&mut self, q: DnsQuestion) {
        self.questions.push(q);
    }

    pub fn add_answer(&mut self, rr: RR) {
        self.answers.push(rr);
    }

    pub fn add_auth(&mut self, rr: RR) {
        self.auth.push(rr);
    }

    pub fn add_ar(&mut self, rr: RR) {
        self.ar.push(rr);
    }

    /// The EDNS0 OPT record, if the additional section carries one.
    pub fn opt(&self) -> Option<&RR> {
        self.ar.iter().find(|rr| rr.is_opt())
    }

    /// Parse a complete packet. All-or-nothing: any failure in any record
    /// surfaces as an error and no partial tree is returned.
    pub fn parse(packet: &[u8]) -> Result<DnsRecord, DnsError> {
        let mut buf = Buffer::from_bytes(packet);
        let (header, counts) = DnsHeader::decode(&mut buf)?;
        let mut questions = Vec::new();
        for _ in 0..counts[0] {
            questions.push(DnsQuestion::decode(&mut buf)?);
        }
        let answers = Self::parse_section(&mut buf, counts[1])?;
        let auth = Self::parse_section(&mut buf, counts[2])?;
        let ar = Self::parse_section(&mut buf, counts[3])?;
        Ok(DnsRecord {
            header,
            questions,
            answers,
            auth,
            ar,
        })
    }

    fn parse_section(buf: &mut Buffer, count: u16) -> Result<Vec<RR>, DnsError> {
        let mut out = Vec::new();
        for _ in 0..count {
            out.push(RR::decode(buf)?);
        }
        Ok(out)
    }

    /// Pack to wire bytes. One compression dictionary spans the packet;
    /// header counts are the section lengths at this moment.
    pub fn pack(&self) -> Result<Vec<u8>, DnsError> {
        for rr in self.answers.iter().chain(&self.auth) {
            if rr.is_opt() {
                return Err(DnsError::Encode(
                    "OPT record outside the additional section".to_string(),
                ));
            }
        }
        if self.ar.iter().filter(|rr| rr.is_opt()).count() > 1 {
            return Err(DnsError::Encode("more than one OPT record".to_string()));
        }

        let counts = [
            section_count(self.questions.len())?,
            section_count(self.answers.len())?,
            section_count(self.auth.len())?,
            section_count(self.ar.len())?,
        ];

        let mut buf = Buffer::new();
        let mut map = NameMap::new();
        self.header.encode(&mut buf, counts)?;
        for q in &self.questions {
            q.encode(&mut buf, &mut map)?;
        }
        for rr in self.answers.iter().chain(&self.auth).chain(&self.ar) {
            rr.encode(&mut buf, &mut map)?;
        }
        Ok(buf.into_bytes())
    }

    /// First answer's rdata in zone text, dig +short style.
    pub fn short(&self) -> String {
        self.answers
            .first()
            .map(|rr| rr.rdata.to_zone())
            .unwrap_or_default()
    }

    /// All non-OPT records in zone file form.
    pub fn to_zone(&self) -> String {
        let mut out = String::new();
        for rr in self
            .answers
            .iter()
            .chain(&self.auth)
            .chain(self.ar.iter().filter(|rr| !rr.is_opt()))
        {
            out.push_str(&rr.to_string());
            out.push('\n');
        }
        out
    }
}

fn section_count(len: usize) -> Result<u16, DnsError> {
    u16::try_from(len).map_err(|_| DnsError::Encode(format!("section of {} records", len)))
}

impl Default for DnsRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            ";; ->>HEADER<<- opcode: {}, status: {}, id: {}",
            OPCODE.name_of(self.header.opcode as u16),
            RCODE.name_of(self.header.rcode as u16),
            self.header.id
        )?;
        writeln!(
            f,
            ";; flags: {}; QUERY: {}, ANSWER: {}, AUTHORITY: {}, ADDITIONAL: {}",
            self.header.flags_text(),
            self.questions.len(),
            self.answers.len(),
            self.auth.len(),
            self.ar.len()
        )?;

        if let Some(opt) = self.opt() {
            writeln!(f, ";; OPT PSEUDOSECTION:")?;
            let do_flag = if opt.edns_dnssec_ok() { " do" } else { "" };
            writeln!(
                f,
                "; EDNS: version: {}, flags:{}; udp: {}",
                opt.edns_version(),
                do_flag,
                opt.edns_udp_len()
            )?;
            if let Rdata::Opt(options) = &opt.rdata {
                for o in options {
                    writeln!(f, "; {}: {}", EDNS_OPTION.name_of(o.code), hex::encode(&o.data))?;
                }
            }
        }

        if !self.questions.is_empty() {
            writeln!(f, ";; QUESTION SECTION:")?;
            for q in &self.questions {
                writeln!(f, "{}", q)?;
            }
        }
        for (name, section) in [
            ("ANSWER", &self.answers),
            ("AUTHORITY", &self.auth),
            ("ADDITIONAL", &self.ar),
        ] {
            let rrs: Vec<&RR> = section.iter().filter(|rr| !rr.is_opt()).collect();
            if rrs.is_empty() {
                continue;
            }
            writeln!(f, ";; {} SECTION:", name)?;
            for rr in rrs {
                writeln!(f, "{}", rr)?;
            }
        }
        Ok(())
    }
}

/// Two records compare equal iff their canonical text forms are equal.
impl PartialEq for DnsRecord {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for DnsRecord {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BufferError;
    use std::net::Ipv4Addr;

    // dig www.google.com A (captured response, 1 CNAME + 4 A answers)
    const GOOGLE_RESPONSE: &str = "d5ad818000010005000000000377777706676f6f676c6503636f6d0000010001c00c0005000100000005000803777777016cc010c02c0001000100000005000442f95b68c02c0001000100000005000442f95b63c02c0001000100000005000442f95b67c02c0001000100000005000442f95b93";

    #[test]
    fn parse_google_response() {
        let bytes = hex::decode(GOOGLE_RESPONSE).unwrap();
        let record = DnsRecord::parse(&bytes).unwrap();

        assert_eq!(record.header.id, 0xd5ad);
        assert!(record.header.qr);
        assert!(record.header.rd);
        assert!(record.header.ra);
        assert_eq!(record.questions.len(), 1);
        assert_eq!(record.questions[0].qname.to_string(), "www.google.com.");
        assert_eq!(record.questions[0].qtype, rtype::A);
        assert_eq!(record.answers.len(), 5);

        assert_eq!(
            record.answers[0].rdata,
            Rdata::Cname("www.l.google.com.".parse().unwrap())
        );
        let ips: Vec<Ipv4Addr> = record.answers[1..]
            .iter()
            .map(|rr| match rr.rdata {
                Rdata::A(ip) => ip,
                _ => panic!("expected A"),
            })
            .collect();
        assert_eq!(
            ips,
            vec![
                Ipv4Addr::new(66, 249, 91, 104),
                Ipv4Addr::new(66, 249, 91, 99),
                Ipv4Addr::new(66, 249, 91, 103),
                Ipv4Addr::new(66, 249, 91, 147),
            ]
        );
        for rr in &record.answers {
            assert_eq!(rr.ttl, 5);
        }
    }

    #[test]
    fn repack_of_parsed_packet_is_equivalent() {
        let bytes = hex::decode(GOOGLE_RESPONSE).unwrap();
        let record = DnsRecord::parse(&bytes).unwrap();
        let repacked = record.pack().unwrap();
        // byte layout may differ (compression choices), text form may not
        assert_eq!(DnsRecord::parse(&repacked).unwrap(), record);
    }

    #[test]
    fn question_round_trip() {
        let q = DnsRecord::question("google.com", "A").unwrap();
        let packed = q.pack().unwrap();
        let parsed = DnsRecord::parse(&packed).unwrap();
        assert_eq!(parsed, q);
        assert_eq!(parsed.header.opcode, 0);
        assert!(parsed.header.rd);
        assert!(!parsed.header.qr);
        assert_eq!(parsed.questions.len(), 1);
    }

    #[test]
    fn reply_skeleton_and_answer() {
        let query = DnsRecord::question("abc.com", "ANY").unwrap();
        let mut reply = query.reply();
        assert!(reply.header.qr);
        assert!(reply.header.aa);
        assert!(reply.header.rd);
        assert!(reply.header.ra);
        assert_eq!(reply.header.id, query.header.id);
        assert_eq!(reply.questions, query.questions);

        reply.add_answer(
            RR::new(
                "abc.com".parse().unwrap(),
                60,
                Rdata::A(Ipv4Addr::new(1, 2, 3, 4)),
            )
            .unwrap(),
        );
        let parsed = DnsRecord::parse(&reply.pack().unwrap()).unwrap();
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(parsed.answers[0].ttl, 60);
        assert_eq!(parsed.answers[0].rdata, Rdata::A(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(parsed, reply);
    }

    #[test]
    fn edns0_do_flag_and_rendering() {
        let mut q = DnsRecord::question("example.com", "A").unwrap();
        q.add_ar(RR::edns0(4096, 0, 0, true, vec![]));

        let opt = q.opt().unwrap();
        assert_eq!(opt.edns_udp_len(), 4096);
        assert!(opt.edns_dnssec_ok());
        assert_eq!(opt.ttl, 0x8000);

        let text = q.to_string();
        assert!(text.contains("; EDNS: version: 0, flags: do; udp: 4096"));

        let parsed = DnsRecord::parse(&q.pack().unwrap()).unwrap();
        assert_eq!(parsed.opt().unwrap().edns_udp_len(), 4096);
        assert!(parsed.opt().unwrap().edns_dnssec_ok());
    }

    #[test]
    fn at_most_one_opt_and_only_in_additional() {
        let mut q = DnsRecord::question("example.com", "A").unwrap();
        q.add_ar(RR::edns0(512, 0, 0, false, vec![]));
        q.add_ar(RR::edns0(512, 0, 0, false, vec![]));
        assert!(q.pack().is_err());

        let mut q = DnsRecord::question("example.com", "A").unwrap();
        q.add_answer(RR::edns0(512, 0, 0, false, vec![]));
        assert!(q.pack().is_err());
    }

    #[test]
    fn pointer_cycle_parses_to_buffer_error() {
        // header claims one question whose name points at itself
        let mut packet = vec![0u8; 12];
        packet[5] = 1; // qdcount = 1
        packet.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x01, 0x00, 0x01]);
        match DnsRecord::parse(&packet) {
            Err(DnsError::Buffer(BufferError::PointerLoop(_))) => {}
            other => panic!("expected pointer loop, got {:?}", other),
        }
    }

    #[test]
    fn parse_is_total_over_garbage() {
        // short, truncated and nonsense inputs all fail cleanly
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x00],
            vec![0xff; 11],
            vec![0x00; 13],
            {
                let mut v = vec![0u8; 12];
                v[5] = 0xff; // 255 questions, no body
                v
            },
            {
                let bytes = hex::decode(GOOGLE_RESPONSE).unwrap();
                bytes[..bytes.len() / 2].to_vec()
            },
        ];
        for case in cases {
            // must terminate with Ok or a typed error, never panic
            let _ = DnsRecord::parse(&case);
        }
    }

    #[test]
    fn counts_match_sections_after_pack() {
        let mut reply = DnsRecord::question("abc.com", "A").unwrap().reply();
        for i in 0..3 {
            reply.add_answer(
                RR::new(
                    "abc.com".parse().unwrap(),
                    60,
                    Rdata::A(Ipv4Addr::new(1, 2, 3, i)),
                )
                .unwrap(),
            );
        }
        reply.add_ar(RR::edns0(4096, 0, 0, false, vec![]));
        let packed = reply.pack().unwrap();
        assert_eq!(u16::from_be_bytes([packed[4], packed[5]]), 1);
        assert_eq!(u16::from_be_bytes([packed[6], packed[7]]), 3);
        assert_eq!(u16::from_be_bytes([packed[8], packed[9]]), 0);
        assert_eq!(u16::from_be_bytes([packed[10], packed[11]]), 1);
    }

    #[test]
    fn truncate_keeps_question_and_sets_tc() {
        let mut reply = DnsRecord::question("abc.com", "A").unwrap().reply();
        reply.add_answer(
            RR::new(
                "abc.com".parse().unwrap(),
                60,
                Rdata::A(Ipv4Addr::new(1, 2, 3, 4)),
            )
            .unwrap(),
        );
        let t = reply.truncate();
        assert!(t.header.tc);
        assert_eq!(t.questions, reply.questions);
        assert!(t.answers.is_empty());
    }
}
