//! Framed transport reader
//!
//! Turns a chunked byte stream into fixed-length frames. The stream carries
//! no framing of its own; the only alignment signal is that command frames
//! start with the destination address `0x00`.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::{verify_checksum, ProtocolError, Transport, COMMAND_FRAME_LEN, FRAME_START};

/// Size of a single transport read
const READ_CHUNK: usize = 64;

/// How frame boundaries are recovered while assembling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resync {
    /// Frames begin at `0x00`; a full frame failing its checksum is
    /// realigned at its next `0x00`
    FrameStart,
    /// Bytes are taken as they come; `0x00` is ordinary payload
    Off,
}

impl Resync {
    /// Command frames begin with the frame-start marker, response frames
    /// carry payload from their first byte.
    pub fn for_length(len: usize) -> Self {
        if len == COMMAND_FRAME_LEN {
            Resync::FrameStart
        } else {
            Resync::Off
        }
    }
}

/// Closes a [`FrameReader`] from another thread
#[derive(Debug, Clone, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    /// Make pending and future operations fail with [`ProtocolError::Closed`]
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CloseHandle::close`] has been called on any clone
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Frame assembly on top of a [`Transport`]
pub struct FrameReader<T: Transport> {
    transport: T,
    timeout: Duration,
    /// Bytes that arrived after the last completed frame
    backlog: Vec<u8>,
    closed: CloseHandle,
}

impl<T: Transport> FrameReader<T> {
    /// Wrap a transport; `timeout` bounds each `receive`
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            backlog: Vec::new(),
            closed: CloseHandle::default(),
        }
    }

    /// Handle that closes this reader from another thread
    pub fn close_handle(&self) -> CloseHandle {
        self.closed.clone()
    }

    /// Drop anything received but not yet taken as a frame
    ///
    /// Clears the backlog and whatever the transport has buffered, so a late
    /// or stray response cannot shift the next frame.
    pub fn discard_input(&mut self) -> Result<(), ProtocolError> {
        if self.closed.is_closed() {
            return Err(ProtocolError::Closed);
        }
        if !self.backlog.is_empty() {
            debug!("discarding {} buffered bytes", self.backlog.len());
            self.backlog.clear();
        }
        self.transport.discard_input()?;
        Ok(())
    }

    /// Write a complete frame in one operation
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.closed.is_closed() {
            return Err(ProtocolError::Closed);
        }

        let written = self.transport.write(bytes)?;
        if written != bytes.len() {
            return Err(ProtocolError::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        self.transport.flush()?;
        debug!("sent {} bytes: {:02x?}", written, bytes);
        Ok(())
    }

    /// Receive a frame of `expected_len` bytes with the default resync rule
    pub fn receive(&mut self, expected_len: usize) -> Result<Vec<u8>, ProtocolError> {
        self.receive_with(expected_len, Resync::for_length(expected_len))
    }

    /// Receive a frame of `expected_len` bytes
    ///
    /// Returns as soon as the frame is complete. Gives up with
    /// [`ProtocolError::Timeout`] once the timeout has elapsed or a read
    /// returns no data.
    ///
    /// With [`Resync::FrameStart`], bytes before a `0x00` are skipped, and a
    /// complete frame whose checksum fails is realigned at the next `0x00`
    /// inside it. A frame without such a byte is returned as is and left
    /// to the caller's checksum check.
    pub fn receive_with(
        &mut self,
        expected_len: usize,
        resync: Resync,
    ) -> Result<Vec<u8>, ProtocolError> {
        if self.closed.is_closed() {
            return Err(ProtocolError::Closed);
        }
        if expected_len == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + self.timeout;
        let mut frame = Vec::with_capacity(expected_len);
        let mut chunk = std::mem::take(&mut self.backlog);
        let mut buf = [0u8; READ_CHUNK];

        loop {
            for (i, &byte) in chunk.iter().enumerate() {
                if resync == Resync::FrameStart && frame.is_empty() && byte != FRAME_START {
                    trace!("skipping {:#04x} before frame start", byte);
                    continue;
                }
                frame.push(byte);
                if frame.len() < expected_len {
                    continue;
                }

                if resync == Resync::FrameStart && verify_checksum(&frame).is_err() {
                    if let Some(start) = frame.iter().skip(1).position(|&b| b == FRAME_START) {
                        debug!(
                            "torn frame {:02x?}, realigning at offset {}",
                            frame,
                            start + 1
                        );
                        frame.drain(..=start);
                        continue;
                    }
                }

                self.backlog = chunk[i + 1..].to_vec();
                debug!("received frame: {:02x?}", frame);
                return Ok(frame);
            }

            if self.closed.is_closed() {
                return Err(ProtocolError::Closed);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::Timeout {
                    received: frame.len(),
                    expected: expected_len,
                });
            }
            self.transport.set_read_timeout(remaining)?;

            let n = match self.transport.read(&mut buf) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => 0,
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    chunk.clear();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if n == 0 {
                if self.closed.is_closed() {
                    return Err(ProtocolError::Closed);
                }
                debug!("no more data after {} of {} bytes", frame.len(), expected_len);
                return Err(ProtocolError::Timeout {
                    received: frame.len(),
                    expected: expected_len,
                });
            }

            trace!("read {} bytes: {:02x?}", n, &buf[..n]);
            chunk.clear();
            chunk.extend_from_slice(&buf[..n]);
        }
    }
}
