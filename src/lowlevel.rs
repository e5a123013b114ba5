//! Record framing: the 8-byte header, name/value pairs, and a `tokio_util` codec that turns
//! frames into typed records.

use super::endian::*;
use super::error::{Error, Result};
use super::rawstruct::*;
use super::s11n::*;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{Buf, Bytes, BytesMut};
use enum_primitive::FromPrimitive;
use tokio_util::codec::{Decoder, Encoder};

use std::mem::size_of;

/// Header fields of one record, in host byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub record_type: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
    pub reserved: u8,
}

impl RecordHeader {
    /// The decoded record type, or `None` for a code this crate doesn't know.
    pub fn kind(&self) -> Option<RecordType> {
        RecordType::from_u8(self.record_type)
    }
}

/// One record off the wire, with the padding already stripped.
#[derive(Debug)]
pub struct Frame {
    pub header: RecordHeader,
    pub content: BytesMut,
}

#[derive(Debug)]
pub struct FastcgiRecord {
    pub request_id: u16,
    pub body: FastcgiRecordBody,
}

#[derive(Debug)]
pub enum FastcgiRecordBody {
    // client -> server
    BeginRequest(BeginRequest),
    /// Already name/value encoded; see `encode_params`.
    Params(Bytes),
    Stdin(Bytes),

    // server -> client
    Stdout(BytesMut),
    Stderr(BytesMut),
    EndRequest(EndRequest),
    /// The server didn't understand a record type we sent it.
    UnknownTypeResponse(u8),
    /// A record type this client doesn't consume: a code outside the protocol, or one only a
    /// client or a management exchange would use.
    Unrecognized(u8, BytesMut),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeginRequest {
    pub role: Role,
    pub keep_connection: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    /// Raw status byte; see `status()`.
    pub protocol_status: u8,
}

impl EndRequest {
    /// The protocol status, or `None` for a code outside the protocol.
    pub fn status(&self) -> Option<ProtocolStatus> {
        ProtocolStatus::from_u8(self.protocol_status)
    }
}

fn violation(msg: String) -> Error {
    error!("{}", msg);
    Error::ProtocolViolation(msg)
}

/// Produce the header followed by `content`. Padding is never emitted.
pub fn encode_frame(record_type: RecordType, request_id: u16, content: &[u8]) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + content.len());
    write_frame(&mut buf, record_type, request_id, content)?;
    Ok(buf)
}

fn write_frame(buf: &mut BytesMut, record_type: RecordType, request_id: u16, content: &[u8])
    -> Result<()>
{
    if content.len() > MAX_CONTENT_LEN {
        return Err(violation(
            format!("{:?} record is too long: {}", record_type, content.len())));
    }

    let header = FastcgiRecordHeader {
        version: FASTCGI_VERSION,
        record_type: record_type as u8,
        request_id: NetworkU16::new(request_id),
        content_length: NetworkU16::new(content.len() as u16),
        padding_length: 0,
        reserved: 0,
    };
    buf.extend_from_slice(as_bytes(&header));
    buf.extend_from_slice(content);
    Ok(())
}

fn write_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    if len < 0x80 {
        buf.extend_from_slice(&[len as u8]);
    } else if len < 0x8000_0000 {
        let mut bytes = [0u8; 4];
        NetworkEndian::write_u32(&mut bytes, len as u32 | 0x8000_0000);
        buf.extend_from_slice(&bytes);
    } else {
        return Err(violation(format!("un-encodable name-value pair length: {:#x}", len)));
    }
    Ok(())
}

fn write_name_value(buf: &mut BytesMut, name: &[u8], value: &[u8]) -> Result<()> {
    write_len(buf, name.len())?;
    write_len(buf, value.len())?;
    buf.extend_from_slice(name);
    buf.extend_from_slice(value);
    Ok(())
}

/// Encode one name/value pair: each length is 1 byte below 128, else 4 bytes with the top bit set.
pub fn encode_name_value(name: &[u8], value: &[u8]) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(8 + name.len() + value.len());
    write_name_value(&mut buf, name, value)?;
    Ok(buf)
}

/// Concatenate the encoding of every pair; this is the content of a Params stream.
pub fn encode_params<I, K, V>(params: I) -> Result<BytesMut>
    where I: IntoIterator<Item = (K, V)>,
          K: AsRef<[u8]>,
          V: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for (name, value) in params {
        debug!("param ({}, {})",
               String::from_utf8_lossy(name.as_ref()),
               String::from_utf8_lossy(value.as_ref()));
        write_name_value(&mut out, name.as_ref(), value.as_ref())?;
    }
    Ok(out)
}

/// Pure parse of a record header.
pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> RecordHeader {
    let raw: FastcgiRecordHeader = from_bytes(bytes);
    RecordHeader {
        version: raw.version,
        record_type: raw.record_type,
        request_id: raw.request_id.get(),
        content_length: raw.content_length.get(),
        padding_length: raw.padding_length,
        reserved: raw.reserved,
    }
}

/// Take the next complete record off the front of `buf`.
///
/// Returns `Ok(None)` when no further record is available: either fewer than 8 bytes remain, or
/// the content and padding announced by the header haven't all arrived. Nothing is consumed in
/// that case.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let mut header_bytes = [0u8; HEADER_LEN];
    header_bytes.copy_from_slice(&buf[..HEADER_LEN]);
    let header = decode_header(&header_bytes);

    if header.version != FASTCGI_VERSION {
        return Err(violation(format!("unexpected FCGI version {}", header.version)));
    }

    let content_len = header.content_length as usize;
    let padding_len = header.padding_length as usize;
    if buf.len() < HEADER_LEN + content_len + padding_len {
        debug!("insufficient buffer for record: have {}, need {}",
               buf.len(), HEADER_LEN + content_len + padding_len);
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    let content = buf.split_to(content_len);
    buf.advance(padding_len);

    Ok(Some(Frame { header, content }))
}

/// A short body is zero-filled: the record still ends the request.
fn read_end_request_body(content: &[u8]) -> EndRequest {
    let mut body = [0u8; size_of::<EndRequestBody>()];
    if content.len() < body.len() {
        warn!("EndRequest body is {} bytes, expected {}", content.len(), body.len());
    }
    let len = content.len().min(body.len());
    body[..len].copy_from_slice(&content[..len]);

    let raw: EndRequestBody = from_bytes(&body);
    let end = EndRequest {
        app_status: raw.app_status.get(),
        protocol_status: raw.protocol_status,
    };
    if end.status().is_none() {
        warn!("unknown protocol status {}", end.protocol_status);
    }
    end
}

/// Client side of the record layer: decodes what a FastCGI server sends, encodes what a client
/// sends.
#[derive(Debug, Default)]
pub struct FastcgiRecordCodec;

impl Decoder for FastcgiRecordCodec {
    type Item = FastcgiRecord;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<FastcgiRecord>> {
        debug!("buffer: {} bytes", buf.len());

        let Frame { header, content } = match decode_frame(buf)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let request_id = header.request_id;

        debug!("request id: {}; record type: {:?}, {} bytes of content",
               request_id, header.kind(), content.len());

        let body = match header.kind() {
            Some(RecordType::Stdout) => FastcgiRecordBody::Stdout(content),
            Some(RecordType::Stderr) => FastcgiRecordBody::Stderr(content),
            Some(RecordType::EndRequest) => {
                FastcgiRecordBody::EndRequest(read_end_request_body(&content))
            },
            Some(RecordType::UnknownType) => {
                let typ = content.first().copied().unwrap_or(0);
                FastcgiRecordBody::UnknownTypeResponse(typ)
            },
            Some(record_type) => {
                warn!("unexpected record type {:?} from FastCGI server", record_type);
                FastcgiRecordBody::Unrecognized(header.record_type, content)
            },
            None => {
                warn!("unknown record type {}", header.record_type);
                FastcgiRecordBody::Unrecognized(header.record_type, content)
            },
        };

        Ok(Some(FastcgiRecord { request_id, body }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<FastcgiRecord>> {
        match self.decode(buf)? {
            Some(record) => Ok(Some(record)),
            None => {
                if !buf.is_empty() {
                    warn!("discarding {} bytes of truncated record at end of stream", buf.len());
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<FastcgiRecord> for FastcgiRecordCodec {
    type Error = Error;

    fn encode(&mut self, msg: FastcgiRecord, buf: &mut BytesMut) -> Result<()> {
        match msg.body {
            FastcgiRecordBody::BeginRequest(begin) => {
                let s11n_body = BeginRequestBody {
                    role: NetworkU16::new(begin.role as u16),
                    flags: if begin.keep_connection { FCGI_KEEP_CONN } else { 0 },
                    reserved: [0u8; 5],
                };
                write_frame(buf, RecordType::BeginRequest, msg.request_id, as_bytes(&s11n_body))
            },
            FastcgiRecordBody::Params(data) => {
                write_frame(buf, RecordType::Params, msg.request_id, &data)
            },
            FastcgiRecordBody::Stdin(data) => {
                write_frame(buf, RecordType::Stdin, msg.request_id, &data)
            },
            other => {
                Err(violation(format!("illegal record {:?} from FastCGI client", other)))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Independent reference decoder for one length prefix.
    fn read_len(bytes: &[u8]) -> (usize, usize) {
        if bytes[0] & 0x80 == 0 {
            (bytes[0] as usize, 1)
        } else {
            let len = ((bytes[0] as usize & 0x7F) << 24)
                | ((bytes[1] as usize) << 16)
                | ((bytes[2] as usize) << 8)
                | bytes[3] as usize;
            (len, 4)
        }
    }

    #[test]
    fn header_layout() {
        let buf = encode_frame(RecordType::Stdin, 0x0102, b"hello").unwrap();
        assert_eq!(&buf[..HEADER_LEN], &[1, 5, 0x01, 0x02, 0x00, 0x05, 0, 0]);
        assert_eq!(&buf[HEADER_LEN..], b"hello");
    }

    #[test]
    fn rejects_oversize_content() {
        let content = vec![0u8; MAX_CONTENT_LEN + 1];
        match encode_frame(RecordType::Stdin, 1, &content) {
            Err(Error::ProtocolViolation(_)) => (),
            other => panic!("expected a protocol violation, got {:?}", other),
        }
        assert!(encode_frame(RecordType::Stdin, 1, &content[..MAX_CONTENT_LEN]).is_ok());
    }

    #[test]
    fn name_value_length_prefixes() {
        for &len in &[0usize, 1, 127, 128, 300, 70_000] {
            let name = vec![b'n'; len];
            let value = vec![b'v'; 300 - len.min(300)];
            let encoded = encode_name_value(&name, &value).unwrap();

            let (name_len, name_prefix) = read_len(&encoded);
            assert_eq!(name_prefix, if len < 128 { 1 } else { 4 });
            assert_eq!(name_len, len);
            if len >= 128 {
                assert_eq!(encoded[0] & 0x80, 0x80);
            }

            let (value_len, value_prefix) = read_len(&encoded[name_prefix..]);
            assert_eq!(value_len, value.len());
            assert_eq!(value_prefix, if value.len() < 128 { 1 } else { 4 });

            let body = &encoded[name_prefix + value_prefix..];
            assert_eq!(&body[..len], name.as_slice());
            assert_eq!(&body[len..], value.as_slice());
        }
    }

    #[test]
    fn params_concatenate() {
        let params = encode_params(vec![("A", "1"), ("BB", "")]).unwrap();
        assert_eq!(&params[..], b"\x01\x01A1\x02\x00BB");
    }

    #[test]
    fn decode_frame_skips_padding() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[1, 6, 0, 7, 0, 2, 3, 0]);
        buf.extend_from_slice(b"hi\0\0\0");
        buf.extend_from_slice(&encode_frame(RecordType::Stdout, 7, b"x").unwrap());

        let first = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(first.header.padding_length, 3);
        assert_eq!(&first.content[..], b"hi");

        let second = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(second.header.kind(), Some(RecordType::Stdout));
        assert_eq!(&second.content[..], b"x");

        assert!(decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_frame_waits_for_whole_record() {
        let full = encode_frame(RecordType::Stdout, 3, b"abcdef").unwrap();
        let mut buf = BytesMut::from(&full[..HEADER_LEN + 2]);
        assert!(decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_LEN + 2);
    }

    #[test]
    fn decode_frame_rejects_bad_version() {
        let mut buf = BytesMut::from(&[2u8, 6, 0, 1, 0, 0, 0, 0][..]);
        assert!(matches!(decode_frame(&mut buf), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn codec_decodes_end_request() {
        let mut buf = encode_frame(RecordType::EndRequest, 9, &[0, 0, 0, 42, 2, 0, 0, 0]).unwrap();
        let record = FastcgiRecordCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record.request_id, 9);
        match record.body {
            FastcgiRecordBody::EndRequest(end) => {
                assert_eq!(end.app_status, 42);
                assert_eq!(end.status(), Some(ProtocolStatus::Overloaded));
            },
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn codec_passes_through_records_it_does_not_consume() {
        let mut buf = encode_frame(RecordType::Stdin, 1, b"").unwrap();
        buf.extend_from_slice(&encode_frame(RecordType::Data, 1, b"zz").unwrap());

        match FastcgiRecordCodec.decode(&mut buf).unwrap().unwrap().body {
            FastcgiRecordBody::Unrecognized(5, content) => assert!(content.is_empty()),
            other => panic!("unexpected body {:?}", other),
        }
        match FastcgiRecordCodec.decode(&mut buf).unwrap().unwrap().body {
            FastcgiRecordBody::Unrecognized(8, content) => assert_eq!(&content[..], b"zz"),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn codec_keeps_end_request_with_unknown_status() {
        let mut buf = encode_frame(RecordType::EndRequest, 4, &[0, 0, 0, 1, 7, 0, 0, 0]).unwrap();
        match FastcgiRecordCodec.decode(&mut buf).unwrap().unwrap().body {
            FastcgiRecordBody::EndRequest(end) => {
                assert_eq!(end.app_status, 1);
                assert_eq!(end.protocol_status, 7);
                assert_eq!(end.status(), None);
            },
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn codec_zero_fills_short_end_request() {
        let mut buf = encode_frame(RecordType::EndRequest, 4, &[0, 0, 1]).unwrap();
        match FastcgiRecordCodec.decode(&mut buf).unwrap().unwrap().body {
            FastcgiRecordBody::EndRequest(end) => {
                assert_eq!(end.app_status, 0x100);
                assert_eq!(end.status(), Some(ProtocolStatus::RequestComplete));
            },
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn codec_keeps_unrecognized_types() {
        let mut buf = BytesMut::from(&[1u8, 42, 0, 1, 0, 1, 0, 0, b'z'][..]);
        match FastcgiRecordCodec.decode(&mut buf).unwrap().unwrap().body {
            FastcgiRecordBody::Unrecognized(42, content) => assert_eq!(&content[..], b"z"),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn codec_drops_truncated_tail_at_eof() {
        let mut buf = encode_frame(RecordType::Stdout, 1, b"ok").unwrap();
        buf.extend_from_slice(&[1, 6, 0, 1, 0, 9, 0, 0, b'p']);

        let mut codec = FastcgiRecordCodec;
        assert!(codec.decode_eof(&mut buf).unwrap().is_some());
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_encodes_begin_request() {
        let mut buf = BytesMut::new();
        FastcgiRecordCodec.encode(FastcgiRecord {
            request_id: 0xABCD,
            body: FastcgiRecordBody::BeginRequest(BeginRequest {
                role: Role::Responder,
                keep_connection: false,
            }),
        }, &mut buf).unwrap();
        assert_eq!(&buf[..], &[1, 1, 0xAB, 0xCD, 0, 8, 0, 0,
                               0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn codec_refuses_to_encode_server_records() {
        let mut buf = BytesMut::new();
        let result = FastcgiRecordCodec.encode(FastcgiRecord {
            request_id: 1,
            body: FastcgiRecordBody::Stdout(BytesMut::new()),
        }, &mut buf);
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
        assert!(buf.is_empty());
    }
}
