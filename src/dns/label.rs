use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::buffer::Buffer;
use crate::error::{BufferError, DnsError};

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;

/// Per-packet compression dictionary: canonical (lowercased) suffix tuple to
/// the absolute offset where it was first written. Lifetime = one `pack`.
pub type NameMap = HashMap<Vec<Vec<u8>>, usize>;

/// A domain name as an ordered sequence of opaque byte labels.
///
/// Labels are owned; decoding never borrows from the source packet.
/// Equality and hashing are case-insensitive over ASCII letters.
/// The empty sequence is the DNS root.
#[derive(Clone, Debug, Default)]
pub struct DnsLabel {
    labels: Vec<Vec<u8>>,
}

impl DnsLabel {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_labels(labels: Vec<Vec<u8>>) -> Result<Self, DnsError> {
        let out = Self { labels };
        out.validate()?;
        Ok(out)
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Serialized length: one length byte per label, the label bytes, and the
    /// terminating zero byte.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    fn validate(&self) -> Result<(), DnsError> {
        for label in &self.labels {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(DnsError::Label(format!(
                    "label length {} outside 1..=63",
                    label.len()
                )));
            }
        }
        if self.wire_len() > MAX_NAME_LEN {
            return Err(DnsError::Label(format!(
                "name serializes to {} bytes, limit is {}",
                self.wire_len(),
                MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    /// Concatenate, e.g. `www` + `abc.com.` = `www.abc.com.`
    pub fn add(&self, suffix: &DnsLabel) -> Result<DnsLabel, DnsError> {
        let mut labels = self.labels.clone();
        labels.extend(suffix.labels.iter().cloned());
        DnsLabel::from_labels(labels)
    }

    /// Case-insensitive test that `suffix` is a trailing run of this name's
    /// labels. Every name ends with the root.
    pub fn match_suffix(&self, suffix: &DnsLabel) -> bool {
        if suffix.labels.len() > self.labels.len() {
            return false;
        }
        let tail = &self.labels[self.labels.len() - suffix.labels.len()..];
        tail.iter()
            .zip(&suffix.labels)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    pub fn strip_suffix(&self, suffix: &DnsLabel) -> Option<DnsLabel> {
        if !self.match_suffix(suffix) {
            return None;
        }
        Some(DnsLabel {
            labels: self.labels[..self.labels.len() - suffix.labels.len()].to_vec(),
        })
    }

    /// Shell-style glob over the canonical text form, case-insensitive.
    /// `*` spans any characters (including dots), `?` matches one.
    pub fn match_glob(&self, pattern: &str) -> bool {
        let mut pat = pattern.to_ascii_lowercase();
        if !pat.ends_with('.') {
            pat.push('.');
        }
        let text = self.to_string().to_ascii_lowercase();
        glob_match(pat.as_bytes(), text.as_bytes())
    }

    /// Read a name at the buffer's cursor, following compression pointers.
    ///
    /// The cursor is left just past the first pointer encountered, not past
    /// the pointer's target. Revisiting any pointer target fails.
    pub fn decode(buf: &mut Buffer) -> Result<DnsLabel, DnsError> {
        let mut labels: Vec<Vec<u8>> = Vec::new();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut return_pos: Option<usize> = None;

        loop {
            let len = buf.get_u8()?;
            match len & 0xc0 {
                0x00 => {
                    if len == 0 {
                        break;
                    }
                    labels.push(buf.read(len as usize)?);
                }
                0xc0 => {
                    let low = buf.get_u8()?;
                    let target = (((len & 0x3f) as usize) << 8) | low as usize;
                    if return_pos.is_none() {
                        return_pos = Some(buf.tell());
                    }
                    if !visited.insert(target) {
                        return Err(BufferError::PointerLoop(target).into());
                    }
                    buf.seek(target)?;
                }
                // 01 and 10 prefixes are reserved
                _ => {
                    return Err(DnsError::Label(format!(
                        "reserved label prefix {:#04x}",
                        len
                    )))
                }
            }
        }

        if let Some(pos) = return_pos {
            buf.seek(pos)?;
        }
        let out = DnsLabel { labels };
        out.validate()?;
        Ok(out)
    }

    /// Append the name using RFC 1035 suffix compression against `map`.
    pub fn encode(&self, buf: &mut Buffer, map: &mut NameMap) -> Result<(), DnsError> {
        self.encode_inner(buf, Some(map))
    }

    /// Append the name literally. Used for rdata fields where compression is
    /// forbidden (SRV, NAPTR, RRSIG, NSEC, SVCB/HTTPS targets).
    pub fn encode_uncompressed(&self, buf: &mut Buffer) -> Result<(), DnsError> {
        self.encode_inner(buf, None)
    }

    fn encode_inner(&self, buf: &mut Buffer, mut map: Option<&mut NameMap>) -> Result<(), DnsError> {
        self.validate()?;
        for i in 0..self.labels.len() {
            if let Some(m) = map.as_deref_mut() {
                let key: Vec<Vec<u8>> = self.labels[i..]
                    .iter()
                    .map(|l| l.to_ascii_lowercase())
                    .collect();
                if let Some(&offset) = m.get(&key) {
                    buf.put_u16(0xc000 | offset as u16);
                    return Ok(());
                }
                // offsets past the 14-bit pointer range are not usable targets
                if buf.len() < 0x4000 {
                    m.insert(key, buf.len());
                }
            }
            let label = &self.labels[i];
            buf.put_u8(label.len() as u8);
            buf.write(label);
        }
        buf.put_u8(0);
        Ok(())
    }
}

impl FromStr for DnsLabel {
    type Err = DnsError;

    /// Parse the text form. A trailing dot is optional, `\DDD` decodes to a
    /// single byte, `\x` for any other x is the literal x.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "." {
            return Ok(DnsLabel::root());
        }
        let bytes = s.as_bytes();
        let mut labels: Vec<Vec<u8>> = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
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
                            return Err(DnsError::Label(format!("escape \\{} out of range", code)));
                        }
                        current.push(code as u8);
                        i += 4;
                    } else if i + 1 < bytes.len() {
                        current.push(bytes[i + 1]);
                        i += 2;
                    } else {
                        return Err(DnsError::Label("dangling backslash".to_string()));
                    }
                }
                b'.' => {
                    if current.is_empty() {
                        return Err(DnsError::Label(format!("empty label in {:?}", s)));
                    }
                    labels.push(std::mem::take(&mut current));
                    i += 1;
                }
                b => {
                    current.push(b);
                    i += 1;
                }
            }
        }
        if !current.is_empty() {
            labels.push(current);
        }
        DnsLabel::from_labels(labels)
    }
}

impl fmt::Display for DnsLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, ".");
        }
        for label in &self.labels {
            for &b in label {
                match b {
                    b'.' => write!(f, "\\.")?,
                    b'\\' => write!(f, "\\\\")?,
                    0x21..=0x7e => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{:03}", b)?,
                }
            }
            write!(f, ".")?;
        }
        Ok(())
    }
}

impl PartialEq for DnsLabel {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for DnsLabel {}

impl Hash for DnsLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in &self.labels {
            state.write_usize(label.len());
            for &b in label {
                state.write_u8(b.to_ascii_lowercase());
            }
        }
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text)
                || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(&p), Some(&t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}
