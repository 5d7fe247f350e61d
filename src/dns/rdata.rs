use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use chrono::{NaiveDateTime, TimeZone, Utc};

use crate::bimap::{rtype, QTYPE};
use crate::buffer::Buffer;
use crate::dns::label::{DnsLabel, NameMap};
use crate::error::DnsError;
use crate::zone::Token;

/// One EDNS0 option: (option-code, opaque option-data).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

/// One SVCB/HTTPS service parameter (RFC 9460).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SvcParam {
    pub key: u16,
    pub value: Vec<u8>,
}

/// The typed payload of a resource record, selected by rtype.
///
/// Types outside this family are carried opaquely and rendered in the
/// RFC 3597 generic form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rdata {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(DnsLabel),
    Cname(DnsLabel),
    Ptr(DnsLabel),
    Mx {
        preference: u16,
        exchange: DnsLabel,
    },
    Soa {
        mname: DnsLabel,
        rname: DnsLabel,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Txt(Vec<Vec<u8>>),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DnsLabel,
    },
    Naptr {
        order: u16,
        preference: u16,
        flags: Vec<u8>,
        services: Vec<u8>,
        regexp: Vec<u8>,
        replacement: DnsLabel,
    },
    Opt(Vec<EdnsOption>),
    Rrsig {
        type_covered: u16,
        algorithm: u8,
        labels: u8,
        original_ttl: u32,
        expiration: u32,
        inception: u32,
        key_tag: u16,
        signer: DnsLabel,
        signature: Vec<u8>,
    },
    Dnskey {
        flags: u16,
        protocol: u8,
        algorithm: u8,
        key: Vec<u8>,
    },
    Nsec {
        next: DnsLabel,
        types: Vec<u16>,
    },
    Ds {
        key_tag: u16,
        algorithm: u8,
        digest_type: u8,
        digest: Vec<u8>,
    },
    Sshfp {
        algorithm: u8,
        fp_type: u8,
        fingerprint: Vec<u8>,
    },
    Tlsa {
        usage: u8,
        selector: u8,
        matching_type: u8,
        data: Vec<u8>,
    },
    Svcb {
        priority: u16,
        target: DnsLabel,
        params: Vec<SvcParam>,
    },
    Https {
        priority: u16,
        target: DnsLabel,
        params: Vec<SvcParam>,
    },
    Caa {
        flags: u8,
        tag: Vec<u8>,
        value: Vec<u8>,
    },
    Unknown(Vec<u8>),
}

impl Rdata {
    /// The rtype this variant belongs to. `Unknown` takes its rtype from the
    /// enclosing RR.
    pub fn rtype(&self) -> Option<u16> {
        Some(match self {
            Rdata::A(_) => rtype::A,
            Rdata::Aaaa(_) => rtype::AAAA,
            Rdata::Ns(_) => rtype::NS,
            Rdata::Cname(_) => rtype::CNAME,
            Rdata::Ptr(_) => rtype::PTR,
            Rdata::Mx { .. } => rtype::MX,
            Rdata::Soa { .. } => rtype::SOA,
            Rdata::Txt(_) => rtype::TXT,
            Rdata::Srv { .. } => rtype::SRV,
            Rdata::Naptr { .. } => rtype::NAPTR,
            Rdata::Opt(_) => rtype::OPT,
            Rdata::Rrsig { .. } => rtype::RRSIG,
            Rdata::Dnskey { .. } => rtype::DNSKEY,
            Rdata::Nsec { .. } => rtype::NSEC,
            Rdata::Ds { .. } => rtype::DS,
            Rdata::Sshfp { .. } => rtype::SSHFP,
            Rdata::Tlsa { .. } => rtype::TLSA,
            Rdata::Svcb { .. } => rtype::SVCB,
            Rdata::Https { .. } => rtype::HTTPS,
            Rdata::Caa { .. } => rtype::CAA,
            Rdata::Unknown(_) => return None,
        })
    }

    /// Decode exactly `rdlength` bytes of rdata for `rt` at the cursor.
    pub fn decode(buf: &mut Buffer, rt: u16, rdlength: u16) -> Result<Rdata, DnsError> {
        let start = buf.tell();
        let end = start + rdlength as usize;

        let rdata = match rt {
            rtype::A => {
                let b = buf.read(4)?;
                Rdata::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
            }
            rtype::AAAA => {
                let b = buf.read(16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&b);
                Rdata::Aaaa(Ipv6Addr::from(octets))
            }
            rtype::NS => Rdata::Ns(DnsLabel::decode(buf)?),
            rtype::CNAME => Rdata::Cname(DnsLabel::decode(buf)?),
            rtype::PTR => Rdata::Ptr(DnsLabel::decode(buf)?),
            rtype::MX => Rdata::Mx {
                preference: buf.get_u16()?,
                exchange: DnsLabel::decode(buf)?,
            },
            rtype::SOA => Rdata::Soa {
                mname: DnsLabel::decode(buf)?,
                rname: DnsLabel::decode(buf)?,
                serial: buf.get_u32()?,
                refresh: buf.get_u32()?,
                retry: buf.get_u32()?,
                expire: buf.get_u32()?,
                minimum: buf.get_u32()?,
            },
            rtype::TXT => {
                let mut strings = Vec::new();
                while buf.tell() < end {
                    let len = buf.get_u8()? as usize;
                    strings.push(buf.read(len)?);
                }
                Rdata::Txt(strings)
            }
            rtype::SRV => Rdata::Srv {
                priority: buf.get_u16()?,
                weight: buf.get_u16()?,
                port: buf.get_u16()?,
                target: DnsLabel::decode(buf)?,
            },
            rtype::NAPTR => {
                let order = buf.get_u16()?;
                let preference = buf.get_u16()?;
                let flags = read_char_string(buf)?;
                let services = read_char_string(buf)?;
                let regexp = read_char_string(buf)?;
                Rdata::Naptr {
                    order,
                    preference,
                    flags,
                    services,
                    regexp,
                    replacement: DnsLabel::decode(buf)?,
                }
            }
            rtype::OPT => {
                let mut options = Vec::new();
                while buf.tell() < end {
                    let code = buf.get_u16()?;
                    let len = buf.get_u16()? as usize;
                    options.push(EdnsOption {
                        code,
                        data: buf.read(len)?,
                    });
                }
                Rdata::Opt(options)
            }
            rtype::RRSIG => {
                let type_covered = buf.get_u16()?;
                let algorithm = buf.get_u8()?;
                let labels = buf.get_u8()?;
                let original_ttl = buf.get_u32()?;
                let expiration = buf.get_u32()?;
                let inception = buf.get_u32()?;
                let key_tag = buf.get_u16()?;
                let signer = DnsLabel::decode(buf)?;
                let rest = end.saturating_sub(buf.tell());
                Rdata::Rrsig {
                    type_covered,
                    algorithm,
                    labels,
                    original_ttl,
                    expiration,
                    inception,
                    key_tag,
                    signer,
                    signature: buf.read(rest)?,
                }
            }
            rtype::DNSKEY => {
                let flags = buf.get_u16()?;
                let protocol = buf.get_u8()?;
                let algorithm = buf.get_u8()?;
                let rest = end.saturating_sub(buf.tell());
                Rdata::Dnskey {
                    flags,
                    protocol,
                    algorithm,
                    key: buf.read(rest)?,
                }
            }
            rtype::NSEC => {
                let next = DnsLabel::decode(buf)?;
                Rdata::Nsec {
                    next,
                    types: decode_type_bitmap(buf, end)?,
                }
            }
            rtype::DS => {
                let key_tag = buf.get_u16()?;
                let algorithm = buf.get_u8()?;
                let digest_type = buf.get_u8()?;
                let rest = end.saturating_sub(buf.tell());
                Rdata::Ds {
                    key_tag,
                    algorithm,
                    digest_type,
                    digest: buf.read(rest)?,
                }
            }
            rtype::SSHFP => {
                let algorithm = buf.get_u8()?;
                let fp_type = buf.get_u8()?;
                let rest = end.saturating_sub(buf.tell());
                Rdata::Sshfp {
                    algorithm,
                    fp_type,
                    fingerprint: buf.read(rest)?,
                }
            }
            rtype::TLSA => {
                let usage = buf.get_u8()?;
                let selector = buf.get_u8()?;
                let matching_type = buf.get_u8()?;
                let rest = end.saturating_sub(buf.tell());
                Rdata::Tlsa {
                    usage,
                    selector,
                    matching_type,
                    data: buf.read(rest)?,
                }
            }
            rtype::SVCB | rtype::HTTPS => {
                let priority = buf.get_u16()?;
                let target = DnsLabel::decode(buf)?;
                let mut params = Vec::new();
                // bounded by rdlength, never by the packet end
                while buf.tell() < end {
                    let key = buf.get_u16()?;
                    let len = buf.get_u16()? as usize;
                    params.push(SvcParam {
                        key,
                        value: buf.read(len)?,
                    });
                }
                if rt == rtype::SVCB {
                    Rdata::Svcb {
                        priority,
                        target,
                        params,
                    }
                } else {
                    Rdata::Https {
                        priority,
                        target,
                        params,
                    }
                }
            }
            rtype::CAA => {
                let flags = buf.get_u8()?;
                let tag = read_char_string(buf)?;
                let rest = end.saturating_sub(buf.tell());
                Rdata::Caa {
                    flags,
                    tag,
                    value: buf.read(rest)?,
                }
            }
            _ => Rdata::Unknown(buf.read(rdlength as usize)?),
        };

        let consumed = buf.tell() - start;
        if consumed != rdlength as usize {
            return Err(DnsError::RdataLength {
                rtype: rt,
                consumed,
                expected: rdlength,
            });
        }
        Ok(rdata)
    }

    /// Write the rdata content. The enclosing RR writer owns the RDLENGTH
    /// placeholder and patches it afterwards.
    pub fn encode(&self, buf: &mut Buffer, map: &mut NameMap) -> Result<(), DnsError> {
        match self {
            Rdata::A(ip) => buf.write(&ip.octets()),
            Rdata::Aaaa(ip) => buf.write(&ip.octets()),
            Rdata::Ns(name) => name.encode(buf, map)?,
            Rdata::Cname(name) => name.encode(buf, map)?,
            Rdata::Ptr(name) => name.encode(buf, map)?,
            Rdata::Mx {
                preference,
                exchange,
            } => {
                buf.put_u16(*preference);
                exchange.encode(buf, map)?;
            }
            Rdata::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                mname.encode(buf, map)?;
                rname.encode(buf, map)?;
                buf.put_u32(*serial);
                buf.put_u32(*refresh);
                buf.put_u32(*retry);
                buf.put_u32(*expire);
                buf.put_u32(*minimum);
            }
            Rdata::Txt(strings) => {
                for s in strings {
                    write_char_string(buf, s)?;
                }
            }
            Rdata::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buf.put_u16(*priority);
                buf.put_u16(*weight);
                buf.put_u16(*port);
                target.encode_uncompressed(buf)?;
            }
            Rdata::Naptr {
                order,
                preference,
                flags,
                services,
                regexp,
                replacement,
            } => {
                buf.put_u16(*order);
                buf.put_u16(*preference);
                write_char_string(buf, flags)?;
                write_char_string(buf, services)?;
                write_char_string(buf, regexp)?;
                replacement.encode_uncompressed(buf)?;
            }
            Rdata::Opt(options) => {
                for opt in options {
                    buf.put_u16(opt.code);
                    buf.put_u16(opt.data.len() as u16);
                    buf.write(&opt.data);
                }
            }
            Rdata::Rrsig {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer,
                signature,
            } => {
                buf.put_u16(*type_covered);
                buf.put_u8(*algorithm);
                buf.put_u8(*labels);
                buf.put_u32(*original_ttl);
                buf.put_u32(*expiration);
                buf.put_u32(*inception);
                buf.put_u16(*key_tag);
                signer.encode_uncompressed(buf)?;
                buf.write(signature);
            }
            Rdata::Dnskey {
                flags,
                protocol,
                algorithm,
                key,
            } => {
                buf.put_u16(*flags);
                buf.put_u8(*protocol);
                buf.put_u8(*algorithm);
                buf.write(key);
            }
            Rdata::Nsec { next, types } => {
                next.encode_uncompressed(buf)?;
                encode_type_bitmap(buf, types);
            }
            Rdata::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                buf.put_u16(*key_tag);
                buf.put_u8(*algorithm);
                buf.put_u8(*digest_type);
                buf.write(digest);
            }
            Rdata::Sshfp {
                algorithm,
                fp_type,
                fingerprint,
            } => {
                buf.put_u8(*algorithm);
                buf.put_u8(*fp_type);
                buf.write(fingerprint);
            }
            Rdata::Tlsa {
                usage,
                selector,
                matching_type,
                data,
            } => {
                buf.put_u8(*usage);
                buf.put_u8(*selector);
                buf.put_u8(*matching_type);
                buf.write(data);
            }
            Rdata::Svcb {
                priority,
                target,
                params,
            }
            | Rdata::Https {
                priority,
                target,
                params,
            } => {
                buf.put_u16(*priority);
                target.encode_uncompressed(buf)?;
                let mut sorted: Vec<&SvcParam> = params.iter().collect();
                sorted.sort_by_key(|p| p.key);
                for p in sorted {
                    buf.put_u16(p.key);
                    buf.put_u16(p.value.len() as u16);
                    buf.write(&p.value);
                }
            }
            Rdata::Caa { flags, tag, value } => {
                buf.put_u8(*flags);
                write_char_string(buf, tag)?;
                buf.write(value);
            }
            Rdata::Unknown(data) => buf.write(data),
        }
        Ok(())
    }

    /// Build rdata from zone-format tokens for `rt`. Unqualified names are
    /// completed against `origin`.
    pub fn from_zone(rt: u16, tokens: &[Token], origin: &DnsLabel) -> Result<Rdata, DnsError> {
        let mut t = TokenReader::new(rt, tokens, origin);
        let rdata = match rt {
            rtype::A => Rdata::A(
                Ipv4Addr::from_str(t.next_str()?)
                    .map_err(|e| t.bad(&format!("bad IPv4 address: {}", e)))?,
            ),
            rtype::AAAA => Rdata::Aaaa(
                Ipv6Addr::from_str(t.next_str()?)
                    .map_err(|e| t.bad(&format!("bad IPv6 address: {}", e)))?,
            ),
            rtype::NS => Rdata::Ns(t.next_label()?),
            rtype::CNAME => Rdata::Cname(t.next_label()?),
            rtype::PTR => Rdata::Ptr(t.next_label()?),
            rtype::MX => Rdata::Mx {
                preference: t.next_u16()?,
                exchange: t.next_label()?,
            },
            rtype::SOA => Rdata::Soa {
                mname: t.next_label()?,
                rname: t.next_label()?,
                serial: t.next_u32()?,
                refresh: t.next_u32()?,
                retry: t.next_u32()?,
                expire: t.next_u32()?,
                minimum: t.next_u32()?,
            },
            rtype::TXT => {
                let mut strings = Vec::new();
                while !t.done() {
                    strings.push(t.next_bytes()?);
                }
                if strings.is_empty() {
                    return Err(t.bad("TXT needs at least one string"));
                }
                Rdata::Txt(strings)
            }
            rtype::SRV => Rdata::Srv {
                priority: t.next_u16()?,
                weight: t.next_u16()?,
                port: t.next_u16()?,
                target: t.next_label()?,
            },
            rtype::NAPTR => Rdata::Naptr {
                order: t.next_u16()?,
                preference: t.next_u16()?,
                flags: t.next_bytes()?,
                services: t.next_bytes()?,
                regexp: t.next_bytes()?,
                replacement: t.next_label()?,
            },
            rtype::OPT => return Err(t.bad("OPT is a wire-only pseudo record")),
            rtype::RRSIG => Rdata::Rrsig {
                type_covered: QTYPE.code_of(t.next_str()?)?,
                algorithm: t.next_u8()?,
                labels: t.next_u8()?,
                original_ttl: t.next_u32()?,
                expiration: parse_rrsig_time(t.next_str()?)?,
                inception: parse_rrsig_time(t.next_str()?)?,
                key_tag: t.next_u16()?,
                signer: t.next_label()?,
                signature: t.rest_base64()?,
            },
            rtype::DNSKEY => Rdata::Dnskey {
                flags: t.next_u16()?,
                protocol: t.next_u8()?,
                algorithm: t.next_u8()?,
                key: t.rest_base64()?,
            },
            rtype::NSEC => {
                let next = t.next_label()?;
                let mut types = Vec::new();
                while !t.done() {
                    types.push(QTYPE.code_of(t.next_str()?)?);
                }
                Rdata::Nsec { next, types }
            }
            rtype::DS => Rdata::Ds {
                key_tag: t.next_u16()?,
                algorithm: t.next_u8()?,
                digest_type: t.next_u8()?,
                digest: t.rest_hex()?,
            },
            rtype::SSHFP => Rdata::Sshfp {
                algorithm: t.next_u8()?,
                fp_type: t.next_u8()?,
                fingerprint: t.rest_hex()?,
            },
            rtype::TLSA => Rdata::Tlsa {
                usage: t.next_u8()?,
                selector: t.next_u8()?,
                matching_type: t.next_u8()?,
                data: t.rest_hex()?,
            },
            rtype::SVCB | rtype::HTTPS => {
                let priority = t.next_u16()?;
                let target = t.next_label()?;
                let mut params = Vec::new();
                while !t.done() {
                    params.push(svcparam_from_zone(t.next_str()?, &t)?);
                }
                if rt == rtype::SVCB {
                    Rdata::Svcb {
                        priority,
                        target,
                        params,
                    }
                } else {
                    Rdata::Https {
                        priority,
                        target,
                        params,
                    }
                }
            }
            rtype::CAA => Rdata::Caa {
                flags: t.next_u8()?,
                tag: t.next_bytes()?,
                value: t.next_bytes()?,
            },
            _ => {
                // RFC 3597 generic form: \# <len> <hex>
                let marker = t.next_bytes()?;
                if marker != b"\\#" {
                    return Err(t.bad("unknown type rdata must use the \\# generic form"));
                }
                let len = t.next_u16()? as usize;
                let data = t.rest_hex()?;
                if data.len() != len {
                    return Err(t.bad(&format!(
                        "generic rdata length {} does not match declared {}",
                        data.len(),
                        len
                    )));
                }
                Rdata::Unknown(data)
            }
        };
        if !t.done() {
            return Err(t.bad("trailing rdata tokens"));
        }
        Ok(rdata)
    }

    /// Zone-format text of the rdata alone.
    pub fn to_zone(&self) -> String {
        match self {
            Rdata::A(ip) => ip.to_string(),
            Rdata::Aaaa(ip) => ip.to_string(),
            Rdata::Ns(name) | Rdata::Cname(name) | Rdata::Ptr(name) => name.to_string(),
            Rdata::Mx {
                preference,
                exchange,
            } => format!("{} {}", preference, exchange),
            Rdata::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => format!(
                "{} {} {} {} {} {} {}",
                mname, rname, serial, refresh, retry, expire, minimum
            ),
            Rdata::Txt(strings) => strings
                .iter()
                .map(|s| quote_string(s))
                .collect::<Vec<_>>()
                .join(" "),
            Rdata::Srv {
                priority,
                weight,
                port,
                target,
            } => format!("{} {} {} {}", priority, weight, port, target),
            Rdata::Naptr {
                order,
                preference,
                flags,
                services,
                regexp,
                replacement,
            } => format!(
                "{} {} {} {} {} {}",
                order,
                preference,
                quote_string(flags),
                quote_string(services),
                quote_string(regexp),
                replacement
            ),
            Rdata::Opt(options) => {
                // no zone form; fall back to the generic encoding
                let mut buf = Buffer::new();
                for opt in options {
                    buf.put_u16(opt.code);
                    buf.put_u16(opt.data.len() as u16);
                    buf.write(&opt.data);
                }
                let data = buf.into_bytes();
                format!("\\# {} {}", data.len(), hex::encode(data))
            }
            Rdata::Rrsig {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer,
                signature,
            } => format!(
                "{} {} {} {} {} {} {} {} {}",
                QTYPE.name_of(*type_covered),
                algorithm,
                labels,
                original_ttl,
                format_rrsig_time(*expiration),
                format_rrsig_time(*inception),
                key_tag,
                signer,
                base64::encode(signature)
            ),
            Rdata::Dnskey {
                flags,
                protocol,
                algorithm,
                key,
            } => format!(
                "{} {} {} {}",
                flags,
                protocol,
                algorithm,
                base64::encode(key)
            ),
            Rdata::Nsec { next, types } => {
                let mut out = next.to_string();
                for ty in types {
                    out.push(' ');
                    out.push_str(&QTYPE.name_of(*ty));
                }
                out
            }
            Rdata::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => format!(
                "{} {} {} {}",
                key_tag,
                algorithm,
                digest_type,
                hex::encode_upper(digest)
            ),
            Rdata::Sshfp {
                algorithm,
                fp_type,
                fingerprint,
            } => format!(
                "{} {} {}",
                algorithm,
                fp_type,
                hex::encode_upper(fingerprint)
            ),
            Rdata::Tlsa {
                usage,
                selector,
                matching_type,
                data,
            } => format!(
                "{} {} {} {}",
                usage,
                selector,
                matching_type,
                hex::encode_upper(data)
            ),
            Rdata::Svcb {
                priority,
                target,
                params,
            }
            | Rdata::Https {
                priority,
                target,
                params,
            } => {
                let mut out = format!("{} {}", priority, target);
                for p in params {
                    out.push(' ');
                    out.push_str(&svcparam_to_zone(p));
                }
                out
            }
            Rdata::Caa { flags, tag, value } => format!(
                "{} {} {}",
                flags,
                String::from_utf8_lossy(tag),
                quote_string(value)
            ),
            Rdata::Unknown(data) => format!("\\# {} {}", data.len(), hex::encode(data)),
        }
    }
}

impl fmt::Display for Rdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_zone())
    }
}

fn read_char_string(buf: &mut Buffer) -> Result<Vec<u8>, DnsError> {
    let len = buf.get_u8()? as usize;
    Ok(buf.read(len)?)
}

fn write_char_string(buf: &mut Buffer, s: &[u8]) -> Result<(), DnsError> {
    if s.len() > 255 {
        return Err(DnsError::Encode(format!(
            "character-string of {} bytes exceeds 255",
            s.len()
        )));
    }
    buf.put_u8(s.len() as u8);
    buf.write(s);
    Ok(())
}

/// Quote a byte string for zone output, escaping `"`, `\` and non-printables.
fn quote_string(s: &[u8]) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for &b in s {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
    out.push('"');
    out
}

fn encode_type_bitmap(buf: &mut Buffer, types: &[u16]) {
    let mut sorted = types.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut i = 0;
    while i < sorted.len() {
        let window = (sorted[i] >> 8) as u8;
        let mut bitmap = [0u8; 32];
        let mut max_byte = 0usize;
        while i < sorted.len() && (sorted[i] >> 8) as u8 == window {
            let low = (sorted[i] & 0xff) as usize;
            bitmap[low >> 3] |= 0x80 >> (low & 7);
            max_byte = low >> 3;
            i += 1;
        }
        buf.put_u8(window);
        buf.put_u8((max_byte + 1) as u8);
        buf.write(&bitmap[..=max_byte]);
    }
}

fn decode_type_bitmap(buf: &mut Buffer, end: usize) -> Result<Vec<u16>, DnsError> {
    let mut types = Vec::new();
    while buf.tell() < end {
        let window = buf.get_u8()? as u16;
        let len = buf.get_u8()? as usize;
        if len == 0 || len > 32 {
            return Err(DnsError::Packet(format!(
                "type bitmap window length {} outside 1..=32",
                len
            )));
        }
        let bytes = buf.read(len)?;
        for (byte_idx, &b) in bytes.iter().enumerate() {
            for bit in 0..8 {
                if b & (0x80 >> bit) != 0 {
                    types.push((window << 8) | (byte_idx * 8 + bit) as u16);
                }
            }
        }
    }
    Ok(types)
}

fn parse_rrsig_time(s: &str) -> Result<u32, DnsError> {
    if s.len() == 14 && s.bytes().all(|b| b.is_ascii_digit()) {
        let dt = NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S")
            .map_err(|e| DnsError::Encode(format!("bad RRSIG time {:?}: {}", s, e)))?;
        return Ok(dt.and_utc().timestamp() as u32);
    }
    s.parse::<u32>()
        .map_err(|_| DnsError::Encode(format!("bad RRSIG time {:?}", s)))
}

fn format_rrsig_time(ts: u32) -> String {
    match Utc.timestamp_opt(ts as i64, 0).single() {
        Some(dt) => dt.format("%Y%m%d%H%M%S").to_string(),
        None => ts.to_string(),
    }
}

const SVC_KEYS: &[(u16, &str)] = &[
    (0, "mandatory"),
    (1, "alpn"),
    (2, "no-default-alpn"),
    (3, "port"),
    (4, "ipv4hint"),
    (5, "ech"),
    (6, "ipv6hint"),
];

fn svc_key_name(key: u16) -> String {
    for &(code, name) in SVC_KEYS {
        if code == key {
            return name.to_string();
        }
    }
    format!("key{}", key)
}

fn svc_key_code(name: &str) -> Option<u16> {
    for &(code, known) in SVC_KEYS {
        if known == name {
            return Some(code);
        }
    }
    name.strip_prefix("key").and_then(|n| n.parse().ok())
}

fn svcparam_to_zone(p: &SvcParam) -> String {
    let name = svc_key_name(p.key);
    let mut rd = Buffer::from_bytes(&p.value);
    match p.key {
        0 => {
            // mandatory: list of keys
            let mut keys = Vec::new();
            while rd.remaining() >= 2 {
                if let Ok(k) = rd.get_u16() {
                    keys.push(svc_key_name(k));
                }
            }
            format!("{}={}", name, keys.join(","))
        }
        1 => {
            // alpn: length-prefixed ids
            let mut ids = Vec::new();
            while rd.remaining() > 0 {
                match read_char_string(&mut rd) {
                    Ok(id) => ids.push(String::from_utf8_lossy(&id).into_owned()),
                    Err(_) => break,
                }
            }
            format!("{}={}", name, ids.join(","))
        }
        2 => name,
        3 => {
            let port = rd.get_u16().unwrap_or(0);
            format!("{}={}", name, port)
        }
        4 | 6 => {
            let step = if p.key == 4 { 4 } else { 16 };
            let mut addrs = Vec::new();
            while rd.remaining() >= step {
                if let Ok(b) = rd.read(step) {
                    if step == 4 {
                        addrs.push(Ipv4Addr::new(b[0], b[1], b[2], b[3]).to_string());
                    } else {
                        let mut o = [0u8; 16];
                        o.copy_from_slice(&b);
                        addrs.push(Ipv6Addr::from(o).to_string());
                    }
                }
            }
            format!("{}={}", name, addrs.join(","))
        }
        5 => format!("{}={}", name, base64::encode(&p.value)),
        _ => format!("{}={}", name, quote_string(&p.value)),
    }
}

fn svcparam_from_zone(token: &str, t: &TokenReader<'_>) -> Result<SvcParam, DnsError> {
    let (key_name, value) = match token.split_once('=') {
        Some((k, v)) => (k, Some(v)),
        None => (token, None),
    };
    let key = svc_key_code(key_name).ok_or_else(|| t.bad(&format!("bad SvcParam key {:?}", key_name)))?;

    let value_bytes = match key {
        0 => {
            let v = value.ok_or_else(|| t.bad("mandatory needs a value"))?;
            let mut buf = Buffer::new();
            let mut keys: Vec<u16> = Vec::new();
            for part in v.split(',') {
                keys.push(svc_key_code(part).ok_or_else(|| t.bad(&format!("bad SvcParam key {:?}", part)))?);
            }
            keys.sort_unstable();
            for k in keys {
                buf.put_u16(k);
            }
            buf.into_bytes()
        }
        1 => {
            let v = value.ok_or_else(|| t.bad("alpn needs a value"))?;
            let mut buf = Buffer::new();
            for part in v.split(',') {
                write_char_string(&mut buf, part.as_bytes())?;
            }
            buf.into_bytes()
        }
        2 => {
            if value.is_some() {
                return Err(t.bad("no-default-alpn takes no value"));
            }
            Vec::new()
        }
        3 => {
            let v = value.ok_or_else(|| t.bad("port needs a value"))?;
            let port: u16 = v.parse().map_err(|_| t.bad(&format!("bad port {:?}", v)))?;
            port.to_be_bytes().to_vec()
        }
        4 => {
            let v = value.ok_or_else(|| t.bad("ipv4hint needs a value"))?;
            let mut out = Vec::new();
            for part in v.split(',') {
                let ip = Ipv4Addr::from_str(part)
                    .map_err(|_| t.bad(&format!("bad IPv4 hint {:?}", part)))?;
                out.extend_from_slice(&ip.octets());
            }
            out
        }
        5 => {
            let v = value.ok_or_else(|| t.bad("ech needs a value"))?;
            base64::decode(v).map_err(|e| t.bad(&format!("bad ech value: {}", e)))?
        }
        6 => {
            let v = value.ok_or_else(|| t.bad("ipv6hint needs a value"))?;
            let mut out = Vec::new();
            for part in v.split(',') {
                let ip = Ipv6Addr::from_str(part)
                    .map_err(|_| t.bad(&format!("bad IPv6 hint {:?}", part)))?;
                out.extend_from_slice(&ip.octets());
            }
            out
        }
        _ => value.map(|v| v.as_bytes().to_vec()).unwrap_or_default(),
    };

    Ok(SvcParam {
        key,
        value: value_bytes,
    })
}

/// Sequential reader over the rdata tokens of one record line.
struct TokenReader<'a> {
    rtype: u16,
    tokens: &'a [Token],
    origin: &'a DnsLabel,
    pos: usize,
}

impl<'a> TokenReader<'a> {
    fn new(rtype: u16, tokens: &'a [Token], origin: &'a DnsLabel) -> Self {
        Self {
            rtype,
            tokens,
            origin,
            pos: 0,
        }
    }

    fn done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn bad(&self, msg: &str) -> DnsError {
        DnsError::Encode(format!("{} rdata: {}", QTYPE.name_of(self.rtype), msg))
    }

    fn next(&mut self) -> Result<&'a Token, DnsError> {
        let tok = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| self.bad("missing field"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn next_bytes(&mut self) -> Result<Vec<u8>, DnsError> {
        Ok(self.next()?.value.clone())
    }

    fn next_str(&mut self) -> Result<&'a str, DnsError> {
        let rt = self.rtype;
        let tok = self.next()?;
        std::str::from_utf8(&tok.value).map_err(|_| {
            DnsError::Encode(format!(
                "{} rdata: field is not valid UTF-8",
                QTYPE.name_of(rt)
            ))
        })
    }

    fn next_label(&mut self) -> Result<DnsLabel, DnsError> {
        let s = self.next_str()?;
        crate::zone::complete_name(s, self.origin)
    }

    fn next_u8(&mut self) -> Result<u8, DnsError> {
        let s = self.next_str()?;
        s.parse().map_err(|_| self.bad(&format!("bad number {:?}", s)))
    }

    fn next_u16(&mut self) -> Result<u16, DnsError> {
        let s = self.next_str()?;
        s.parse().map_err(|_| self.bad(&format!("bad number {:?}", s)))
    }

    fn next_u32(&mut self) -> Result<u32, DnsError> {
        let s = self.next_str()?;
        s.parse().map_err(|_| self.bad(&format!("bad number {:?}", s)))
    }

    /// Remaining tokens joined and decoded as Base64.
    fn rest_base64(&mut self) -> Result<Vec<u8>, DnsError> {
        let mut joined = String::new();
        while !self.done() {
            joined.push_str(self.next_str()?);
        }
        base64::decode(&joined).map_err(|e| self.bad(&format!("bad base64: {}", e)))
    }

    /// Remaining tokens joined and decoded as hex.
    fn rest_hex(&mut self) -> Result<Vec<u8>, DnsError> {
        let mut joined = String::new();
        while !self.done() {
            joined.push_str(self.next_str()?);
        }
        hex::decode(&joined).map_err(|e| self.bad(&format!("bad hex: {}", e)))
    }
}
