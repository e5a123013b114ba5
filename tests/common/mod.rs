//! A stand-in PHP-FPM: accepts connections, reads one FastCGI request from each, and answers
//! with canned records.

#![allow(dead_code)]

use php_opcache_exporter::{decode_frame, encode_frame, Frame, RecordType};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the stub does after writing its reply.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AfterReply {
    Close,
    /// Keep the connection open until the client closes it.
    Hold,
}

pub fn record(kind: RecordType, request_id: u16, content: &[u8]) -> Vec<u8> {
    encode_frame(kind, request_id, content).unwrap().to_vec()
}

pub fn end_request(request_id: u16) -> Vec<u8> {
    record(RecordType::EndRequest, request_id, &[0, 0, 0, 0, 0, 0, 0, 0])
}

async fn read_request(socket: &mut TcpStream) -> Vec<Frame> {
    let mut buf = BytesMut::new();
    let mut frames = vec![];
    loop {
        while let Some(frame) = decode_frame(&mut buf).unwrap() {
            let done = frame.header.kind() == Some(RecordType::Stdin) && frame.content.is_empty();
            frames.push(frame);
            if done {
                return frames;
            }
        }
        let mut chunk = [0u8; 1024];
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before finishing its request");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Serve `connections` requests. `reply` gets the request id and returns the bytes to send.
/// The handle yields the frames of every request received.
pub async fn spawn_peer<F>(connections: usize, after: AfterReply, reply: F)
    -> (u16, JoinHandle<Vec<Vec<Frame>>>)
    where F: Fn(u16) -> Vec<u8> + Send + 'static
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut requests = vec![];
        for _ in 0..connections {
            let (mut socket, _) = listener.accept().await.unwrap();
            let frames = read_request(&mut socket).await;
            let request_id = frames[0].header.request_id;
            socket.write_all(&reply(request_id)).await.unwrap();
            if after == AfterReply::Hold {
                let mut rest = vec![];
                socket.read_to_end(&mut rest).await.unwrap();
            }
            requests.push(frames);
        }
        requests
    });

    (port, handle)
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
