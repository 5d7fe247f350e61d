//! tama-dns: DNS wire-format codec and embeddable resolver framework.
//!
//! The codec converts between raw packets, owned record trees, and two text
//! forms (BIND zone files and `dig +qr` output), with RFC 1035 name
//! compression and RFC 3597 handling for unknown types. `parse` is total:
//! arbitrary bytes either produce a well-formed [`dns::record::DnsRecord`]
//! or a typed error, never a panic.
//!
//! The server side is one trait: implement [`server::Resolver`] and hand it
//! to [`server::DnsServer`]. Fixed, zone, shell, proxy and intercept
//! resolvers ship as examples of the pattern.

pub mod bimap;
pub mod buffer;
pub mod client;
pub mod config;
pub mod dig;
pub mod dns;
pub mod error;
pub mod proxy;
pub mod resolver;
pub mod server;
pub mod zone;

pub use dns::label::DnsLabel;
pub use dns::rdata::{EdnsOption, Rdata, SvcParam};
pub use dns::record::{DnsHeader, DnsQuestion, DnsRecord, RR};
pub use error::{BimapError, BufferError, DnsError};
