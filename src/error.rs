use thiserror::Error;

/// Out-of-bounds access on the wire buffer, or a compression pointer loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("read of {wanted} bytes at offset {offset} overruns buffer of {size}")]
    Read {
        offset: usize,
        wanted: usize,
        size: usize,
    },
    #[error("seek to offset {offset} outside buffer of {size}")]
    Seek { offset: usize, size: usize },
    #[error("patch of {wanted} bytes at offset {offset} outside written range {size}")]
    Patch {
        offset: usize,
        wanted: usize,
        size: usize,
    },
    #[error("compression pointer loop at offset {0}")]
    PointerLoop(usize),
}

/// Reverse lookup of a mnemonic that is neither registered nor in the
/// canonical `TYPE<n>` / `CLASS<n>` fallback form.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {table} mnemonic {name:?}")]
pub struct BimapError {
    pub table: &'static str,
    pub name: String,
}

/// Any higher-level inconsistency: bad labels, rdata length mismatches,
/// unsupported values on encode, transaction id mismatch, text parse errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Bimap(#[from] BimapError),
    #[error("invalid label: {0}")]
    Label(String),
    #[error("rdata decoder for {rtype} consumed {consumed} bytes, rdlength is {expected}")]
    RdataLength {
        rtype: u16,
        consumed: usize,
        expected: u16,
    },
    #[error("cannot encode: {0}")]
    Encode(String),
    #[error("malformed packet: {0}")]
    Packet(String),
    #[error("transaction id mismatch: sent {sent:#06x}, got {got:#06x}")]
    TransactionId { sent: u16, got: u16 },
    #[error("zone parse error at line {line}: {msg}")]
    Zone { line: usize, msg: String },
    #[error("dig parse error: {0}")]
    Dig(String),
}
