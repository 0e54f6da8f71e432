//! Length-prefixed frames over TCP: a 4-byte big-endian length followed by
//! the payload. A connection carries any number of request frames, each one
//! answered by exactly one response frame.

use std::{
    io::{self, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::{
    codec,
    command::{RequestEnvelope, ResponseEnvelope},
    config::ServerConfig,
    dispatcher::CommandDispatcher,
    store::AccountStore,
};

use super::{accept_loop, is_timeout};

/// Returns `None` when the stream ends on a frame boundary. Ending anywhere
/// inside a frame, the length prefix included, is `UnexpectedEof`.
pub fn read_frame<R: Read>(reader: &mut R, max_frame_bytes: usize) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    loop {
        match reader.read(&mut len_buf[..1]) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    reader.read_exact(&mut len_buf[1..])?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {max_frame_bytes}"),
        ));
    }
    let mut payload = vec![0; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "frame does not fit a u32 length")
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

pub struct SocketServer<S> {
    listener: TcpListener,
    dispatcher: CommandDispatcher<S>,
    max_frame_bytes: usize,
    read_timeout: Duration,
}

impl<S> SocketServer<S>
where
    S: AccountStore + 'static,
{
    pub fn bind(config: &ServerConfig, dispatcher: CommandDispatcher<S>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .with_context(|| format!("Failed to bind socket server to {}", config.bind_addr))?;
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
        accept_loop(listener, "socket", move |stream| {
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
    loop {
        let payload = match read_frame(&mut reader, max_frame_bytes) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(()),
            Err(err) if is_timeout(&err) => {
                info!(timeout = ?read_timeout, "closing idle socket connection");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        debug!(bytes = payload.len(), "request frame received");
        let reply = dispatcher.handle(&payload);
        write_frame(&mut writer, &reply)?;
    }
}

/// Client side of the framing, one request at a time on an open connection.
pub struct SocketClient {
    stream: TcpStream,
    max_frame_bytes: usize,
}

impl SocketClient {
    pub fn connect(addr: SocketAddr, max_frame_bytes: usize) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).with_context(|| format!("Failed to connect to {addr}"))?;
        Ok(Self {
            stream,
            max_frame_bytes,
        })
    }

    pub fn send(&mut self, request: &RequestEnvelope) -> Result<ResponseEnvelope> {
        write_frame(&mut self.stream, &codec::encode_request(request)?)?;
        let payload = read_frame(&mut self.stream, self.max_frame_bytes)?
            .context("Server closed the connection without replying")?;
        Ok(codec::decode_response(&payload)?)
    }
}
