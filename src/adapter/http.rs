//! Minimal HTTP/1.1 flavoured text protocol: headers up to a blank line, a
//! `Content-Length` body carrying one command, one reply, connection closed.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    time::Duration,
};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    codec,
    command::{Response, ResponseEnvelope},
    config::ServerConfig,
    dispatcher::CommandDispatcher,
    store::AccountStore,
};

use super::{accept_loop, is_timeout};

const SERVER_NAME: &str = "bank-ledger";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Connection closed before the headers were complete")]
    Incomplete,
    #[error("Missing Content-Length header")]
    MissingContentLength,
    #[error("Invalid Content-Length header `{0}`")]
    InvalidContentLength(String),
    #[error("Request of {length} bytes exceeds limit of {limit}")]
    TooLarge { length: usize, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
}

impl Status {
    fn line(self) -> &'static str {
        match self {
            Status::Ok => "HTTP/1.1 200 OK",
            Status::BadRequest => "HTTP/1.1 400 Bad Request",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "200" => Some(Status::Ok),
            "400" => Some(Status::BadRequest),
            _ => None,
        }
    }
}

/// Reads the start line and headers, returns the body.
pub fn read_request<R: BufRead>(reader: &mut R, max_bytes: usize) -> Result<Vec<u8>, HttpError> {
    let length = read_headers(reader, max_bytes)?.ok_or(HttpError::MissingContentLength)?;
    if length > max_bytes {
        return Err(HttpError::TooLarge {
            length,
            limit: max_bytes,
        });
    }
    let mut body = vec![0; length];
    reader.read_exact(&mut body)?;
    Ok(body)
}

/// Reads up to and including the next `\n`, but never more than `limit` bytes.
fn read_line_capped<R: BufRead>(reader: &mut R, limit: usize, line: &mut Vec<u8>) -> io::Result<usize> {
    line.clear();
    reader.by_ref().take(limit as u64).read_until(b'\n', line)
}

fn read_headers<R: BufRead>(reader: &mut R, max_bytes: usize) -> Result<Option<usize>, HttpError> {
    let mut content_length = None;
    let mut header_bytes = 0;
    let mut line = Vec::new();
    loop {
        // one byte past the budget is enough to tell that it was exceeded
        let read = read_line_capped(reader, max_bytes - header_bytes + 1, &mut line)?;
        if read == 0 {
            return Err(HttpError::Incomplete);
        }
        header_bytes += read;
        if header_bytes > max_bytes {
            return Err(HttpError::TooLarge {
                length: header_bytes,
                limit: max_bytes,
            });
        }
        let text = String::from_utf8_lossy(&line);
        let header = text.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            return Ok(content_length);
        }
        debug!(header, "http header");
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| HttpError::InvalidContentLength(value.to_string()))?,
                );
            }
        }
    }
}

pub fn write_response<W: Write>(writer: &mut W, status: Status, body: &[u8]) -> io::Result<()> {
    write!(
        writer,
        "{}\r\nServer: {SERVER_NAME}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status.line(),
        body.len()
    )?;
    writer.write_all(body)?;
    writer.flush()
}

pub fn write_request<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    write!(
        writer,
        "POST /bank HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )?;
    writer.write_all(body)?;
    writer.flush()
}

/// Parses a reply produced by [`write_response`].
pub fn read_response<R: BufRead>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<(Status, Vec<u8>), HttpError> {
    let mut status_line = Vec::new();
    if read_line_capped(reader, max_bytes, &mut status_line)? == 0 {
        return Err(HttpError::Incomplete);
    }
    let status = String::from_utf8_lossy(&status_line)
        .split_whitespace()
        .nth(1)
        .and_then(Status::from_code)
        .ok_or(HttpError::Incomplete)?;
    let body = read_request(reader, max_bytes)?;
    Ok((status, body))
}

pub struct HttpServer<S> {
    listener: TcpListener,
    dispatcher: CommandDispatcher<S>,
    max_frame_bytes: usize,
    read_timeout: Duration,
}

impl<S> HttpServer<S>
where
    S: AccountStore + 'static,
{
    pub fn bind(config: &ServerConfig, dispatcher: CommandDispatcher<S>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .with_context(|| format!("Failed to bind http server to {}", config.bind_addr))?;
        Ok(Self {
            listener,
            dispatcher,
            max_frame_bytes: config.max_frame_bytes,
            read_timeout: config.read_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(self) -> Result<()> {
        let Self {
            listener,
            dispatcher,
            max_frame_bytes,
            read_timeout,
        } = self;
        accept_loop(listener, "http", move |stream| {
            serve_connection(stream, &dispatcher, max_frame_bytes, read_timeout)
        })
    }
}

fn serve_connection<S: AccountStore>(
    stream: TcpStream,
    dispatcher: &CommandDispatcher<S>,
    max_frame_bytes: usize,
    read_timeout: Duration,
) -> Result<()> {
    stream.set_read_timeout(Some(read_timeout))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let envelope = match read_request(&mut reader, max_frame_bytes) {
        Ok(body) => match codec::decode_request(&body) {
            Ok(envelope) => dispatcher.execute(envelope),
            Err(err) => {
                warn!(%err, "malformed request");
                ResponseEnvelope::malformed(err.to_string())
            }
        },
        Err(HttpError::Io(err)) if is_timeout(&err) => {
            info!(timeout = ?read_timeout, "closing idle http connection");
            return Ok(());
        }
        Err(HttpError::Io(err)) => return Err(err.into()),
        Err(err) => {
            warn!(%err, "unreadable http request");
            ResponseEnvelope::malformed(err.to_string())
        }
    };
    let status = match envelope.reply {
        Response::Malformed { .. } => Status::BadRequest,
        _ => Status::Ok,
    };
    let body = codec::encode_response(&envelope)?;
    write_response(&mut writer, status, &body)?;
    Ok(())
}

pub struct HttpClient {
    addr: SocketAddr,
    max_frame_bytes: usize,
}

impl HttpClient {
    pub fn new(addr: SocketAddr, max_frame_bytes: usize) -> Self {
        Self {
            addr,
            max_frame_bytes,
        }
    }

    /// Opens a fresh connection per call, the server closes it after replying.
    pub fn post(&self, body: &[u8]) -> Result<(Status, Vec<u8>)> {
        let mut stream = TcpStream::connect(self.addr)
            .with_context(|| format!("Failed to connect to {}", self.addr))?;
        write_request(&mut stream, body)?;
        let mut reader = BufReader::new(stream);
        Ok(read_response(&mut reader, self.max_frame_bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn parse_request() {
        let raw = "POST /bank HTTP/1.1\r\nHost: localhost:1337\r\ncontent-length: 5\r\n\r\nhello trailing";
        let body = read_request(&mut Cursor::new(raw), 1024).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn reject_bad_headers() {
        let raw = "POST /bank HTTP/1.1\r\n\r\n{}";
        assert!(matches!(
            read_request(&mut Cursor::new(raw), 1024).unwrap_err(),
            HttpError::MissingContentLength
        ));

        let raw = "POST /bank HTTP/1.1\r\nContent-Length: many\r\n\r\n";
        let err = read_request(&mut Cursor::new(raw), 1024).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Content-Length header `many`");

        let raw = "POST /bank HTTP/1.1\r\nContent-Length: 4096\r\n\r\n";
        assert!(matches!(
            read_request(&mut Cursor::new(raw), 1024).unwrap_err(),
            HttpError::TooLarge { length: 4096, .. }
        ));

        let raw = "POST /bank HTTP/1.1\r\nContent-Length: 2\r\n";
        assert!(matches!(
            read_request(&mut Cursor::new(raw), 1024).unwrap_err(),
            HttpError::Incomplete
        ));
    }

    #[test]
    fn endless_header_line_stops_at_the_limit() {
        let mut raw = b"POST /bank HTTP/1.1\r\nX-Filler: ".to_vec();
        raw.resize(raw.len() + 64 * 1024, b'a');
        let mut reader = Cursor::new(raw);
        assert!(matches!(
            read_request(&mut reader, 1024).unwrap_err(),
            HttpError::TooLarge {
                length: 1025,
                limit: 1024
            }
        ));
        // nothing past the limit was pulled off the stream
        assert_eq!(reader.position(), 1025);
    }

    #[test]
    fn response_round_trip() {
        let mut wire = Vec::new();
        write_response(&mut wire, Status::BadRequest, b"{}").unwrap();
        let text = String::from_utf8(wire.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));

        let (status, body) = read_response(&mut Cursor::new(wire), 1024).unwrap();
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body, b"{}");
    }
}
