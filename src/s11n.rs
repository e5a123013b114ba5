//! s11n == serialization. Structs that match the bytes that make up FastCGI messages.

use super::endian::*;
use super::rawstruct::Plain;

use std::mem::size_of;

pub const FASTCGI_VERSION: u8 = 1;

/// Size of `FastcgiRecordHeader` on the wire.
pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LEN: usize = 0xFFFF;

/// Bit 0 of `BeginRequestBody::flags`.
pub const FCGI_KEEP_CONN: u8 = 1;

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum RecordType {
        BeginRequest = 1,
        AbortRequest = 2,
        EndRequest = 3,
        Params = 4,
        Stdin = 5,
        Stdout = 6,
        Stderr = 7,
        Data = 8,
        GetValues = 9,
        GetValuesResult = 10,
        UnknownType = 11,
    }
}

enum_from_primitive! {
    #[repr(u16)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Role {
        Responder = 1,
        Authorizer = 2,
        Filter = 3,
    }
}

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ProtocolStatus {
        RequestComplete = 0,
        CantMultiplexConnections = 1,
        Overloaded = 2,
        UnknownRole = 3,
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct FastcgiRecordHeader {
    pub version: u8,
    pub record_type: u8,
    pub request_id: NetworkU16,
    pub content_length: NetworkU16,
    pub padding_length: u8,
    pub reserved: u8,
}

unsafe impl Plain for FastcgiRecordHeader {}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct BeginRequestBody {
    pub role: NetworkU16,
    pub flags: u8,
    pub reserved: [u8; 5],
}

unsafe impl Plain for BeginRequestBody {}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct EndRequestBody {
    pub app_status: NetworkU32,
    pub protocol_status: u8,
    pub reserved: [u8; 3],
}

unsafe impl Plain for EndRequestBody {}

// The wire layouts are fixed by the protocol.
const _: () = assert!(size_of::<FastcgiRecordHeader>() == HEADER_LEN);
const _: () = assert!(size_of::<BeginRequestBody>() == 8);
const _: () = assert!(size_of::<EndRequestBody>() == 8);
