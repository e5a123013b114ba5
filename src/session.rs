//! One FastCGI request/response exchange over a fresh connection.

use super::error::Result;
use super::lowlevel::*;
use super::s11n::*;
use super::transport::Connection;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use rand::Rng;
use tokio_util::codec::{Decoder, Encoder};

use std::time::Duration;

/// Whether a Stderr record was seen while draining the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Sending,
    Success,
    Error,
}

/// How the end of a response is recognized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Stop at the EndRequest record for our request, or when the peer closes, whichever is first.
    EndRequest,
    /// Read until the peer closes, then decode everything received.
    PeerClose,
}

impl Default for Completion {
    fn default() -> Completion {
        Completion::EndRequest
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub completion: Completion,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(3),
            completion: Completion::default(),
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub request_id: u16,
    pub state: RequestState,
    pub stdout: Bytes,
    pub stderr: Bytes,
    pub end_request: Option<EndRequest>,
}

impl Response {
    pub fn is_error(&self) -> bool {
        self.state == RequestState::Error
    }
}

/// What the drain loop should do after a record.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// Per-call bookkeeping for the single request in flight.
#[derive(Debug)]
pub struct RequestSession {
    request_id: u16,
    state: RequestState,
    stdout: BytesMut,
    stderr: BytesMut,
    end_request: Option<EndRequest>,
}

impl RequestSession {
    pub fn new(request_id: u16) -> RequestSession {
        RequestSession {
            request_id,
            state: RequestState::Sending,
            stdout: BytesMut::new(),
            stderr: BytesMut::new(),
            end_request: None,
        }
    }

    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Fold one response record into the session.
    pub fn absorb(&mut self, record: FastcgiRecord) -> Flow {
        if record.request_id != self.request_id {
            warn!("ignoring {:?} for request {}; ours is {}",
                  record.body, record.request_id, self.request_id);
            return Flow::Continue;
        }

        match record.body {
            FastcgiRecordBody::Stdout(content) => {
                debug!("stdout: {} bytes", content.len());
                self.stdout.extend_from_slice(&content);
            },
            FastcgiRecordBody::Stderr(content) => {
                if !content.is_empty() {
                    debug!("stderr: {} bytes", content.len());
                    self.state = RequestState::Error;
                }
                self.stderr.extend_from_slice(&content);
            },
            FastcgiRecordBody::EndRequest(end) => {
                debug!("request {} ended: {:?}", self.request_id, end);
                if end.status() != Some(ProtocolStatus::RequestComplete) {
                    warn!("request {} was not completed: status {}",
                          self.request_id, end.protocol_status);
                }
                self.end_request = Some(end);
                return Flow::Done;
            },
            FastcgiRecordBody::UnknownTypeResponse(typ) => {
                warn!("peer did not understand record type {}", typ);
            },
            FastcgiRecordBody::Unrecognized(typ, content) => {
                debug!("skipping record type {} ({} bytes)", typ, content.len());
            },
            other => {
                warn!("ignoring unexpected record {:?}", other);
            },
        }
        Flow::Continue
    }

    pub fn finish(mut self) -> Response {
        if self.state == RequestState::Sending {
            self.state = RequestState::Success;
        }
        Response {
            request_id: self.request_id,
            state: self.state,
            stdout: self.stdout.freeze(),
            stderr: self.stderr.freeze(),
            end_request: self.end_request,
        }
    }
}

/// A fresh request id for one call.
pub fn random_request_id() -> u16 {
    rand::thread_rng().gen_range(1..=u16::MAX)
}

/// Emit `data` as records of `kind`, at most `MAX_CONTENT_LEN` bytes each, and then the empty
/// record that terminates the stream.
fn encode_stream<F>(codec: &mut FastcgiRecordCodec, buf: &mut BytesMut, request_id: u16,
                    data: Bytes, kind: F) -> Result<()>
    where F: Fn(Bytes) -> FastcgiRecordBody
{
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + MAX_CONTENT_LEN).min(data.len());
        codec.encode(FastcgiRecord { request_id, body: kind(data.slice(offset..end)) }, buf)?;
        offset = end;
    }
    codec.encode(FastcgiRecord { request_id, body: kind(Bytes::new()) }, buf)
}

/// Assemble the complete request: BeginRequest, the Params stream, the Stdin stream.
pub fn build_request<I, K, V>(request_id: u16, params: I, payload: &[u8]) -> Result<BytesMut>
    where I: IntoIterator<Item = (K, V)>,
          K: AsRef<[u8]>,
          V: AsRef<[u8]>,
{
    let mut codec = FastcgiRecordCodec;
    let mut buf = BytesMut::new();

    codec.encode(FastcgiRecord {
        request_id,
        body: FastcgiRecordBody::BeginRequest(BeginRequest {
            role: Role::Responder,
            keep_connection: false,
        }),
    }, &mut buf)?;

    let params = encode_params(params)?.freeze();
    encode_stream(&mut codec, &mut buf, request_id, params, FastcgiRecordBody::Params)?;
    encode_stream(&mut codec, &mut buf, request_id, Bytes::copy_from_slice(payload),
                  FastcgiRecordBody::Stdin)?;

    Ok(buf)
}

#[derive(Clone, Debug, Default)]
pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Session {
        Session { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one request as a Responder and collect its output.
    ///
    /// Connect and I/O failures abort the call; no partial output is returned for them. A Stderr
    /// record does not: it only marks the response `RequestState::Error`.
    pub async fn execute<I, K, V>(&self, host: &str, port: u16, params: I, payload: &[u8])
        -> Result<Response>
        where I: IntoIterator<Item = (K, V)>,
              K: AsRef<[u8]>,
              V: AsRef<[u8]>,
    {
        let request_id = random_request_id();
        let request = build_request(request_id, params, payload)?;

        let mut conn = Connection::connect(host, port, self.config.connect_timeout).await?;
        info!("request {} to {}: {} bytes", request_id, conn.peer_addr(), request.len());
        conn.send_all(&request).await?;

        let mut session = RequestSession::new(request_id);
        match self.config.completion {
            Completion::EndRequest => {
                let mut records = conn.records();
                while let Some(record) = records.next().await {
                    if session.absorb(record?) == Flow::Done {
                        break;
                    }
                }
                if session.end_request.is_none() {
                    warn!("peer closed without ending request {}", request_id);
                }
            },
            Completion::PeerClose => {
                let mut data = conn.receive_until_closed().await?;
                let mut codec = FastcgiRecordCodec;
                while let Some(record) = codec.decode_eof(&mut data)? {
                    session.absorb(record);
                }
            },
        }
        conn.shutdown().await;

        let response = session.finish();
        debug!("request {} finished {:?}: {} bytes stdout, {} bytes stderr",
               request_id, response.state, response.stdout.len(), response.stderr.len());
        Ok(response)
    }
}
