//! Prometheus exporter for PHP OPcache.
//!
//! The status document is fetched either from a status page over HTTP, or by running a PHP
//! snippet inside PHP-FPM through the FastCGI client in this crate (`session`, `transport`, and
//! the record layer in `lowlevel`).

#[macro_use] extern crate enum_primitive;
#[macro_use] extern crate log;

mod endian;
mod rawstruct;
mod s11n;

pub mod collector;
pub mod config;
pub mod error;
pub mod lowlevel;
pub mod metrics;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use lowlevel::{decode_frame, decode_header, encode_frame, encode_name_value, encode_params,
                   BeginRequest, EndRequest, FastcgiRecord, FastcgiRecordBody,
                   FastcgiRecordCodec, Frame, RecordHeader};
pub use s11n::{FASTCGI_VERSION, HEADER_LEN, MAX_CONTENT_LEN, ProtocolStatus, RecordType, Role};
pub use session::{build_request, Completion, RequestState, Response, Session, SessionConfig};
