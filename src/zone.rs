use crate::bimap::{class, CLASS, QTYPE};
use crate::dns::label::DnsLabel;
use crate::dns::rdata::Rdata;
use crate::dns::record::RR;
use crate::error::DnsError;

/// One zone-file token. Atoms keep their raw bytes (escapes intact, for the
/// label parser); quoted strings arrive with escapes already decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub value: Vec<u8>,
    pub quoted: bool,
}

impl Token {
    pub fn text(&self) -> Result<&str, DnsError> {
        std::str::from_utf8(&self.value)
            .map_err(|_| DnsError::Encode("token is not valid UTF-8".to_string()))
    }
}

/// One logical line: physical lines joined across parenthesized groups.
#[derive(Debug)]
struct LogicalLine {
    line: usize,
    indented: bool,
    tokens: Vec<Token>,
}

fn zone_err(line: usize, msg: impl Into<String>) -> DnsError {
    DnsError::Zone {
        line,
        msg: msg.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<LogicalLine>, DnsError> {
    let bytes = text.as_bytes();
    let mut lines: Vec<LogicalLine> = Vec::new();

    let mut i = 0;
    let mut line_no = 1usize;
    let mut depth = 0usize;

    let mut cur_tokens: Vec<Token> = Vec::new();
    let mut cur_indented = false;
    let mut cur_line = 1usize;
    let mut started = false;

    let mut at_line_start = true;
    let mut leading_ws = false;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                if depth == 0 && started {
                    lines.push(LogicalLine {
                        line: cur_line,
                        indented: cur_indented,
                        tokens: std::mem::take(&mut cur_tokens),
                    });
                    started = false;
                }
                line_no += 1;
                at_line_start = true;
                leading_ws = false;
                i += 1;
            }
            b' ' | b'\t' | b'\r' => {
                if at_line_start {
                    leading_ws = true;
                    at_line_start = false;
                }
                i += 1;
            }
            b';' => {
                // comment to end of physical line
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'(' => {
                at_line_start = false;
                depth += 1;
                i += 1;
            }
            b')' => {
                if depth == 0 {
                    return Err(zone_err(line_no, "unbalanced ')'"));
                }
                at_line_start = false;
                depth -= 1;
                i += 1;
            }
            b'"' => {
                if !started {
                    started = true;
                    cur_indented = leading_ws && depth == 0;
                    cur_line = line_no;
                }
                at_line_start = false;
                i += 1;
                let mut value = Vec::new();
                loop {
                    if i >= bytes.len() || bytes[i] == b'\n' {
                        return Err(zone_err(line_no, "unterminated quoted string"));
                    }
                    match bytes[i] {
                        b'"' => {
                            i += 1;
                            break;
                        }
                        b'\\' => {
                            if i + 3 < bytes.len()
                                && bytes[i + 1].is_ascii_digit()
                                && bytes[i + 2].is_ascii_digit()
                                && bytes[i + 3].is_ascii_digit()
                            {
                                let code = (bytes[i + 1] - b'0') as u16 * 100
                                    + (bytes[i + 2] - b'0') as u16 * 10
                                    + (bytes[i + 3] - b'0') as u16;
                                if code > 255 {
                                    return Err(zone_err(
                                        line_no,
                                        format!("escape \\{} out of range", code),
                                    ));
                                }
                                value.push(code as u8);
                                i += 4;
                            } else if i + 1 < bytes.len() {
                                value.push(bytes[i + 1]);
                                i += 2;
                            } else {
                                return Err(zone_err(line_no, "dangling backslash"));
                            }
                        }
                        b => {
                            value.push(b);
                            i += 1;
                        }
                    }
                }
                cur_tokens.push(Token {
                    value,
                    quoted: true,
                });
            }
            _ => {
                if !started {
                    started = true;
                    cur_indented = leading_ws && depth == 0;
                    cur_line = line_no;
                }
                at_line_start = false;
                let mut value = Vec::new();
                while i < bytes.len() {
                    match bytes[i] {
                        b' ' | b'\t' | b'\r' | b'\n' | b';' | b'(' | b')' | b'"' => break,
                        b'\\' => {
                            // keep the escape raw; downstream parsers decode it
                            value.push(b'\\');
                            if i + 1 < bytes.len() && bytes[i + 1] != b'\n' {
                                value.push(bytes[i + 1]);
                                i += 2;
                            } else {
                                i += 1;
                            }
                        }
                        b => {
                            value.push(b);
                            i += 1;
                        }
                    }
                }
                cur_tokens.push(Token {
                    value,
                    quoted: false,
                });
            }
        }
    }

    if depth > 0 {
        return Err(zone_err(line_no, "unbalanced '(' at end of input"));
    }
    if started {
        lines.push(LogicalLine {
            line: cur_line,
            indented: cur_indented,
            tokens: cur_tokens,
        });
    }
    Ok(lines)
}

/// Tokenize a single record line (quotes honored). Used by the dig parser.
pub fn tokenize_line(text: &str) -> Result<Vec<Token>, DnsError> {
    Ok(tokenize(text)?
        .into_iter()
        .flat_map(|l| l.tokens)
        .collect())
}

/// Complete a name token against the current origin. `@` is the origin
/// itself; names whose final dot is escaped are still relative.
pub fn complete_name(text: &str, origin: &DnsLabel) -> Result<DnsLabel, DnsError> {
    if text == "@" {
        return Ok(origin.clone());
    }
    let name: DnsLabel = text.parse()?;
    if has_absolute_dot(text) {
        Ok(name)
    } else {
        name.add(origin)
    }
}

fn has_absolute_dot(text: &str) -> bool {
    if !text.ends_with('.') {
        return false;
    }
    let body = &text.as_bytes()[..text.len() - 1];
    let trailing_backslashes = body.iter().rev().take_while(|&&b| b == b'\\').count();
    trailing_backslashes % 2 == 0
}

/// Streaming BIND zone parser: `$TTL`, `$ORIGIN`, name/ttl/class inheritance.
/// `$INCLUDE` is rejected.
pub struct ZoneParser {
    origin: DnsLabel,
    ttl: u32,
    last_name: Option<DnsLabel>,
}

impl ZoneParser {
    pub fn new() -> Self {
        Self::with_origin(DnsLabel::root())
    }

    pub fn with_origin(origin: DnsLabel) -> Self {
        Self {
            origin,
            ttl: 0,
            last_name: None,
        }
    }

    pub fn parse(&mut self, text: &str) -> Result<Vec<RR>, DnsError> {
        let mut records = Vec::new();
        for line in tokenize(text)? {
            if !line.indented && line.tokens[0].value.starts_with(b"$") {
                self.directive(&line)?;
            } else {
                records.push(self.record(&line)?);
            }
        }
        Ok(records)
    }

    fn directive(&mut self, line: &LogicalLine) -> Result<(), DnsError> {
        let name = line.tokens[0].text()?;
        match name {
            "$TTL" => {
                let tok = line
                    .tokens
                    .get(1)
                    .ok_or_else(|| zone_err(line.line, "$TTL needs a value"))?;
                self.ttl = tok
                    .text()?
                    .parse()
                    .map_err(|_| zone_err(line.line, "bad $TTL value"))?;
            }
            "$ORIGIN" => {
                let tok = line
                    .tokens
                    .get(1)
                    .ok_or_else(|| zone_err(line.line, "$ORIGIN needs a name"))?;
                self.origin = tok
                    .text()?
                    .parse()
                    .map_err(|e: DnsError| zone_err(line.line, e.to_string()))?;
            }
            "$INCLUDE" => return Err(zone_err(line.line, "$INCLUDE is not supported")),
            other => return Err(zone_err(line.line, format!("unknown directive {}", other))),
        }
        Ok(())
    }

    fn record(&mut self, line: &LogicalLine) -> Result<RR, DnsError> {
        let mut idx = 0;

        let rname = if line.indented {
            self.last_name
                .clone()
                .ok_or_else(|| zone_err(line.line, "no previous record name to inherit"))?
        } else {
            let tok = &line.tokens[0];
            idx = 1;
            let name = complete_name(tok.text()?, &self.origin)
                .map_err(|e| zone_err(line.line, e.to_string()))?;
            self.last_name = Some(name.clone());
            name
        };

        let mut ttl = self.ttl;
        let mut rclass = class::IN;
        let rtype;
        loop {
            let tok = line
                .tokens
                .get(idx)
                .ok_or_else(|| zone_err(line.line, "missing record type"))?;
            let text = tok.text()?;
            if !tok.quoted && !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                ttl = text
                    .parse()
                    .map_err(|_| zone_err(line.line, "bad ttl"))?;
                idx += 1;
            } else if is_class_mnemonic(text) {
                rclass = CLASS
                    .code_of(text)
                    .map_err(|e| zone_err(line.line, e.to_string()))?;
                idx += 1;
            } else {
                rtype = QTYPE
                    .code_of(text)
                    .map_err(|_| zone_err(line.line, format!("unknown record type {:?}", text)))?;
                idx += 1;
                break;
            }
        }

        let rdata = Rdata::from_zone(rtype, &line.tokens[idx..], &self.origin)
            .map_err(|e| zone_err(line.line, e.to_string()))?;
        Ok(RR {
            rname,
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }
}

impl Default for ZoneParser {
    fn default() -> Self {
        Self::new()
    }
}

fn is_class_mnemonic(text: &str) -> bool {
    matches!(text, "IN" | "CS" | "CH" | "HS" | "NONE") || text.starts_with("CLASS")
}

/// Parse a whole zone with the root origin and no default TTL.
pub fn parse_zone(text: &str) -> Result<Vec<RR>, DnsError> {
    ZoneParser::new().parse(text)
}

/// Render records one per line in zone form.
pub fn render_zone(records: &[RR]) -> String {
    let mut out = String::new();
    for rr in records {
        out.push_str(&rr.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bimap::rtype;
    use std::net::Ipv4Addr;

    #[test]
    fn multiline_zone_with_inheritance() {
        let zone = r#"
$TTL 300
$ORIGIN abc.com
@ IN MX 10 mail.abc.com.
www IN A 1.2.3.4
        IN TXT "Some Text"
mail IN CNAME www.abc.com.
"#;
        let rrs = parse_zone(zone).unwrap();
        assert_eq!(rrs.len(), 4);
        for rr in &rrs {
            assert_eq!(rr.ttl, 300);
            assert_eq!(rr.rclass, class::IN);
        }
        assert_eq!(rrs[0].rname.to_string(), "abc.com.");
        assert_eq!(
            rrs[0].rdata,
            Rdata::Mx {
                preference: 10,
                exchange: "mail.abc.com.".parse().unwrap()
            }
        );
        assert_eq!(rrs[1].rname.to_string(), "www.abc.com.");
        // continuation line inherits the previous name
        assert_eq!(rrs[2].rname.to_string(), "www.abc.com.");
        assert_eq!(rrs[2].rdata, Rdata::Txt(vec![b"Some Text".to_vec()]));
        assert_eq!(rrs[3].rname.to_string(), "mail.abc.com.");
    }

    #[test]
    fn parenthesized_soa_with_comments() {
        let zone = r#"
$ORIGIN example.com.
@   3600 IN SOA ns1.example.com. hostmaster.example.com. (
        2024010101 ; serial
        7200       ; refresh
        3600       ; retry
        1209600    ; expire
        300 )      ; minimum
"#;
        let rrs = parse_zone(zone).unwrap();
        assert_eq!(rrs.len(), 1);
        assert_eq!(rrs[0].ttl, 3600);
        match &rrs[0].rdata {
            Rdata::Soa {
                serial, minimum, ..
            } => {
                assert_eq!(*serial, 2024010101);
                assert_eq!(*minimum, 300);
            }
            other => panic!("expected SOA, got {:?}", other),
        }
    }

    #[test]
    fn relative_names_complete_against_origin() {
        let zone = "$ORIGIN abc.com.\nwww IN CNAME web\n";
        let rrs = parse_zone(zone).unwrap();
        assert_eq!(
            rrs[0].rdata,
            Rdata::Cname("web.abc.com.".parse().unwrap())
        );
    }

    #[test]
    fn include_is_rejected() {
        let err = parse_zone("$INCLUDE other.zone\n").unwrap_err();
        match err {
            DnsError::Zone { msg, .. } => assert!(msg.contains("$INCLUDE")),
            other => panic!("expected zone error, got {:?}", other),
        }
    }

    #[test]
    fn quoted_strings_and_escapes() {
        let zone = "t.example.com. 60 IN TXT \"say \\\"hi\\\"\" \"tab\\009end\"\n";
        let rrs = parse_zone(zone).unwrap();
        assert_eq!(
            rrs[0].rdata,
            Rdata::Txt(vec![b"say \"hi\"".to_vec(), b"tab\tend".to_vec()])
        );
    }

    #[test]
    fn unknown_type_generic_form() {
        let zone = "x.example.com. 60 IN TYPE999 \\# 4 deadbeef\n";
        let rrs = parse_zone(zone).unwrap();
        assert_eq!(rrs[0].rtype, 999);
        assert_eq!(rrs[0].rdata, Rdata::Unknown(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn render_parse_round_trip() {
        let zone = "\
abc.com.\t300\tIN\tMX\t10 mail.abc.com.
www.abc.com.\t300\tIN\tA\t1.2.3.4
www.abc.com.\t300\tIN\tTXT\t\"Some Text\"
mail.abc.com.\t300\tIN\tCNAME\twww.abc.com.
ns.abc.com.\t300\tIN\tAAAA\t2001:db8::1
srv.abc.com.\t60\tIN\tSRV\t10 5 5060 sip.abc.com.
abc.com.\t60\tIN\tCAA\t0 issue \"letsencrypt.org\"
";
        let rrs = parse_zone(zone).unwrap();
        assert_eq!(rrs.len(), 7);
        let rendered = render_zone(&rrs);
        let reparsed = parse_zone(&rendered).unwrap();
        assert_eq!(rrs, reparsed);
        assert_eq!(rendered, zone);
    }

    #[test]
    fn class_and_ttl_in_either_order() {
        let rrs = parse_zone("a.example.com. IN 120 A 9.9.9.9\n").unwrap();
        assert_eq!(rrs[0].ttl, 120);
        assert_eq!(rrs[0].rdata, Rdata::A(Ipv4Addr::new(9, 9, 9, 9)));
        assert_eq!(rrs[0].rtype, rtype::A);
    }
}
