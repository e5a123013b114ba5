//! The raw socket under a FastCGI session: one connection, one exchange, then closed.

use super::error::{Error, Result};
use super::lowlevel::FastcgiRecordCodec;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::FramedRead;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Bytes asked of the socket per read.
pub const RECV_CHUNK_SIZE: usize = 4096;

#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    /// Resolve `host` and connect to the first address that accepts, all within `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Connection> {
        let target = format!("{}:{}", host, port);
        match timeout(connect_timeout, Self::connect_any(host, port)).await {
            Ok(Ok((stream, peer))) => {
                debug!("connected to {} ({})", target, peer);
                Ok(Connection { stream, peer })
            },
            Ok(Err(source)) => {
                error!("connect to {} failed: {}", target, source);
                Err(Error::Connect { addr: target, source })
            },
            Err(_elapsed) => {
                error!("connect to {} timed out after {:?}", target, connect_timeout);
                Err(Error::Connect {
                    addr: target,
                    source: io::Error::new(io::ErrorKind::TimedOut,
                        format!("no connection within {:?}", connect_timeout)),
                })
            },
        }
    }

    async fn connect_any(host: &str, port: u16) -> io::Result<(TcpStream, SocketAddr)> {
        let mut last_err = None;
        for addr in lookup_host((host, port)).await? {
            let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
            socket.set_reuseaddr(true)?;
            // A socket that fails to connect is dropped, and closed, here.
            match socket.connect(addr).await {
                Ok(stream) => return Ok((stream, addr)),
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                },
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", host))
        }))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Write the whole buffer. `write_all` retries partial writes until done or the socket fails.
    pub async fn send_all(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("sending {} bytes to {}", bytes.len(), self.peer);
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one chunk of at most `RECV_CHUNK_SIZE` bytes onto the end of `buf`. Zero means the
    /// peer closed the connection.
    pub async fn receive_chunk(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let mut chunk = [0u8; RECV_CHUNK_SIZE];
        let n = self.stream.read(&mut chunk).await?;
        buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Accumulate everything the peer sends until it closes the connection.
    pub async fn receive_until_closed(&mut self) -> Result<BytesMut> {
        let mut data = BytesMut::new();
        while self.receive_chunk(&mut data).await? != 0 {}
        debug!("peer {} closed after {} bytes", self.peer, data.len());
        Ok(data)
    }

    /// The incoming side as a stream of typed records. Ends when the peer closes.
    pub fn records(&mut self) -> FramedRead<&mut TcpStream, FastcgiRecordCodec> {
        FramedRead::with_capacity(&mut self.stream, FastcgiRecordCodec, RECV_CHUNK_SIZE)
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("shutdown of connection to {} failed: {}", self.peer, e);
        }
    }
}
