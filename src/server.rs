//! The scrape endpoint. Every request runs one fresh collection.

use super::collector::{CollectError, Source};
use super::metrics::{self, CollectTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

const MAX_REQUEST_HEAD: usize = 8192;
const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct Exporter {
    source: Source,
    collect_time: CollectTime,
}

impl Exporter {
    pub fn new(source: Source) -> Exporter {
        Exporter {
            source,
            collect_time: CollectTime::default(),
        }
    }

    /// Fetch, map, and render everything for one scrape. Only successful collections are timed.
    pub async fn collect(&self) -> Result<String, CollectError> {
        let start = Instant::now();
        let raw = self.source.fetch().await?;
        let gauges = metrics::parse(&raw)?;
        self.collect_time.observe(start.elapsed());

        let mut out = String::new();
        metrics::render(&gauges, &mut out);
        self.collect_time.render(&mut out);
        Ok(out)
    }
}

/// Read the request head; only the request line is used.
async fn read_request_line(socket: &mut TcpStream) -> io::Result<Option<String>> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if head.len() >= MAX_REQUEST_HEAD {
            return Ok(None);
        }
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }
    let text = String::from_utf8_lossy(&head);
    Ok(text.lines().next().map(|line| line.to_owned()))
}

async fn write_response(socket: &mut TcpStream, status: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status, CONTENT_TYPE, body.len(), body);
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

async fn handle(exporter: &Exporter, mut socket: TcpStream, remote: SocketAddr) -> io::Result<()> {
    let request_line = match read_request_line(&mut socket).await? {
        Some(line) => line,
        None => return write_response(&mut socket, "400 Bad Request", "bad request\n").await,
    };
    debug!("{} -> {:?}", remote, request_line);

    if !request_line.starts_with("GET ") {
        return write_response(&mut socket, "405 Method Not Allowed", "only GET is supported\n")
            .await;
    }

    match exporter.collect().await {
        Ok(body) => write_response(&mut socket, "200 OK", &body).await,
        Err(e) => {
            error!("collection failed: {}: {}", e.summary(), e);
            let body = format!("ERROR: {}: {}\n", e.summary(), e);
            write_response(&mut socket, "500 Internal Server Error", &body).await
        },
    }
}

/// Accept scrapes forever. A failed collection fails only that scrape.
pub async fn serve(listener: TcpListener, exporter: Arc<Exporter>) {
    loop {
        let (socket, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        let exporter = exporter.clone();
        tokio::spawn(async move {
            if let Err(e) = handle(&exporter, socket, remote).await {
                warn!("connection from {}: {}", remote, e);
            }
        });
    }
}
