//! Length-prefixed framing over a blocking byte stream.

use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{error::TransportError, option::ConnectionConfig};

/// Size of the big-endian length prefix.
pub(crate) const FRAME_HEADER_SIZE: usize = 4;

/// Largest frame accepted from the peer.
pub(crate) const MAX_FRAME_SIZE: usize = 16_384_000;

/// Frames over a blocking stream: writes send one length-prefixed frame per
/// message; reads return each received frame as one immutable buffer.
#[derive(Debug)]
pub(crate) struct FramedTransport<S> {
    stream: S,
    write_buf: BytesMut,
}

impl<S: Read + Write> FramedTransport<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            write_buf: BytesMut::new(),
        }
    }

    pub(crate) fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(TransportError::protocol(format!(
                "outgoing frame of {} bytes exceeds {MAX_FRAME_SIZE}",
                payload.len()
            )));
        }
        self.write_buf.clear();
        self.write_buf.reserve(FRAME_HEADER_SIZE + payload.len());
        self.write_buf.put_u32(payload.len() as u32);
        self.write_buf.put_slice(payload);
        self.stream.write_all(&self.write_buf)?;
        self.stream.flush()?;
        Ok(())
    }

    pub(crate) fn read_frame(&mut self) -> Result<Bytes, TransportError> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        read_fully(&mut self.stream, &mut header)?;
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::protocol(format!(
                "incoming frame of {len} bytes exceeds {MAX_FRAME_SIZE}"
            )));
        }
        let mut frame = vec![0u8; len];
        read_fully(&mut self.stream, &mut frame)?;
        Ok(Bytes::from(frame))
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> S {
        self.stream
    }
}

fn read_fully<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<(), TransportError> {
    stream.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::Io(err),
    })
}

/// Open a socket to the configured broker with connect, read and write
/// timeouts set.
pub(crate) fn connect(config: &ConnectionConfig) -> Result<TcpStream, TransportError> {
    let timeout = config.request_timeout();
    let mut last_err = None;
    for addr in (config.host_name(), config.port_number()).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(TransportError::Io(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} did not resolve", config.address()),
        )
    })))
}
