use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::BimapError;

/// Two-way map between small integer codes and their mnemonics.
///
/// Forward lookup never fails: unknown codes render through the table's
/// fallback prefix (`TYPE<n>`, `CLASS<n>`, ...). Reverse lookup accepts the
/// same fallback form back. Tables are built once and never mutated.
pub struct Bimap {
    table: &'static str,
    prefix: &'static str,
    forward: HashMap<u16, &'static str>,
    reverse: HashMap<&'static str, u16>,
}

impl Bimap {
    fn new(table: &'static str, prefix: &'static str, pairs: &[(u16, &'static str)]) -> Self {
        let mut forward = HashMap::with_capacity(pairs.len());
        let mut reverse = HashMap::with_capacity(pairs.len());
        for &(code, name) in pairs {
            forward.insert(code, name);
            reverse.insert(name, code);
        }
        Self {
            table,
            prefix,
            forward,
            reverse,
        }
    }

    pub fn name_of(&self, code: u16) -> String {
        match self.forward.get(&code) {
            Some(name) => (*name).to_string(),
            None => format!("{}{}", self.prefix, code),
        }
    }

    pub fn code_of(&self, name: &str) -> Result<u16, BimapError> {
        if let Some(code) = self.reverse.get(name) {
            return Ok(*code);
        }
        // canonical fallback form, e.g. TYPE4096
        if let Some(num) = name.strip_prefix(self.prefix) {
            if !num.is_empty() {
                if let Ok(code) = num.parse::<u16>() {
                    return Ok(code);
                }
            }
        }
        Err(BimapError {
            table: self.table,
            name: name.to_string(),
        })
    }

    pub fn contains_code(&self, code: u16) -> bool {
        self.forward.contains_key(&code)
    }
}

pub static QTYPE: LazyLock<Bimap> = LazyLock::new(|| {
    Bimap::new(
        "QTYPE",
        "TYPE",
        &[
            (1, "A"),
            (2, "NS"),
            (5, "CNAME"),
            (6, "SOA"),
            (12, "PTR"),
            (15, "MX"),
            (16, "TXT"),
            (17, "RP"),
            (18, "AFSDB"),
            (28, "AAAA"),
            (29, "LOC"),
            (33, "SRV"),
            (35, "NAPTR"),
            (39, "DNAME"),
            (41, "OPT"),
            (43, "DS"),
            (44, "SSHFP"),
            (46, "RRSIG"),
            (47, "NSEC"),
            (48, "DNSKEY"),
            (50, "NSEC3"),
            (51, "NSEC3PARAM"),
            (52, "TLSA"),
            (59, "CDS"),
            (60, "CDNSKEY"),
            (64, "SVCB"),
            (65, "HTTPS"),
            (99, "SPF"),
            (251, "IXFR"),
            (252, "AXFR"),
            (255, "ANY"),
            (256, "URI"),
            (257, "CAA"),
        ],
    )
});

pub static CLASS: LazyLock<Bimap> = LazyLock::new(|| {
    Bimap::new(
        "CLASS",
        "CLASS",
        &[
            (1, "IN"),
            (2, "CS"),
            (3, "CH"),
            (4, "HS"),
            (254, "NONE"),
            (255, "ANY"),
        ],
    )
});

pub static QR: LazyLock<Bimap> =
    LazyLock::new(|| Bimap::new("QR", "QR", &[(0, "QUERY"), (1, "RESPONSE")]));

pub static OPCODE: LazyLock<Bimap> = LazyLock::new(|| {
    Bimap::new(
        "OPCODE",
        "OPCODE",
        &[
            (0, "QUERY"),
            (1, "IQUERY"),
            (2, "STATUS"),
            (4, "NOTIFY"),
            (5, "UPDATE"),
        ],
    )
});

pub static RCODE: LazyLock<Bimap> = LazyLock::new(|| {
    Bimap::new(
        "RCODE",
        "RCODE",
        &[
            (0, "NOERROR"),
            (1, "FORMERR"),
            (2, "SERVFAIL"),
            (3, "NXDOMAIN"),
            (4, "NOTIMP"),
            (5, "REFUSED"),
            (6, "YXDOMAIN"),
            (7, "YXRRSET"),
            (8, "NXRRSET"),
            (9, "NOTAUTH"),
            (10, "NOTZONE"),
        ],
    )
});

pub static EDNS_OPTION: LazyLock<Bimap> = LazyLock::new(|| {
    Bimap::new(
        "EDNS_OPTION",
        "EDNS",
        &[
            (1, "LLQ"),
            (2, "UL"),
            (3, "NSID"),
            (5, "DAU"),
            (6, "DHU"),
            (7, "N3U"),
            (8, "ECS"),
            (9, "EXPIRE"),
            (10, "COOKIE"),
            (11, "KEEPALIVE"),
            (12, "PADDING"),
            (13, "CHAIN"),
            (14, "KEYTAG"),
        ],
    )
});

/// Well-known rtype codes used across the codec.
pub mod rtype {
    pub const A: u16 = 1;
    pub const NS: u16 = 2;
    pub const CNAME: u16 = 5;
    pub const SOA: u16 = 6;
    pub const PTR: u16 = 12;
    pub const MX: u16 = 15;
    pub const TXT: u16 = 16;
    pub const AAAA: u16 = 28;
    pub const SRV: u16 = 33;
    pub const NAPTR: u16 = 35;
    pub const OPT: u16 = 41;
    pub const DS: u16 = 43;
    pub const SSHFP: u16 = 44;
    pub const RRSIG: u16 = 46;
    pub const NSEC: u16 = 47;
    pub const DNSKEY: u16 = 48;
    pub const TLSA: u16 = 52;
    pub const SVCB: u16 = 64;
    pub const HTTPS: u16 = 65;
    pub const ANY: u16 = 255;
    pub const CAA: u16 = 257;
}

/// Well-known class and rcode values.
pub mod class {
    pub const IN: u16 = 1;
}

pub mod rcode {
    pub const NOERROR: u8 = 0;
    pub const SERVFAIL: u8 = 2;
    pub const NXDOMAIN: u8 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_known_and_fallback() {
        assert_eq!(QTYPE.name_of(1), "A");
        assert_eq!(QTYPE.name_of(65), "HTTPS");
        assert_eq!(QTYPE.name_of(4096), "TYPE4096");
        assert_eq!(CLASS.name_of(1), "IN");
        assert_eq!(CLASS.name_of(42), "CLASS42");
        assert_eq!(RCODE.name_of(3), "NXDOMAIN");
    }

    #[test]
    fn reverse_known_and_fallback() {
        assert_eq!(QTYPE.code_of("AAAA").unwrap(), 28);
        assert_eq!(QTYPE.code_of("TYPE4096").unwrap(), 4096);
        assert_eq!(CLASS.code_of("CLASS42").unwrap(), 42);
    }

    #[test]
    fn reverse_unknown_fails() {
        let err = QTYPE.code_of("BOGUS").unwrap_err();
        assert_eq!(err.table, "QTYPE");
        assert!(QTYPE.code_of("TYPE").is_err());
        assert!(QTYPE.code_of("TYPEabc").is_err());
    }
}
