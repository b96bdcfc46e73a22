//! Sync session: one connection's lifetime
//!
//! A session exclusively owns the transport stream from construction to
//! drop, tracks cumulative bytes moved in both directions, and renders
//! progress through its sink. All wire traffic goes through the methods
//! here so that any stream or protocol failure poisons the session:
//! a poisoned session drops its stream immediately, without the QUIT
//! handshake or the orderly drain.

use std::io::{Read, Write};
use std::time::Instant;

use crate::error::SyncError;
use crate::printer::{PrintMode, ProgressSink};
use crate::protocol;
use crate::wire::{self, Frame, StatInfo};

type Result<T> = std::result::Result<T, SyncError>;

/// Bidirectional byte stream, as handed over by the embedder's connect
/// primitive. The session never learns whether this is a socket or a pipe.
pub trait Stream: Read + Write {}

impl<T: Read + Write> Stream for T {}

pub struct SyncSession<S: Stream> {
    stream: S,
    sink: Box<dyn ProgressSink>,
    max_chunk: usize,
    total_bytes: u64,
    started: Instant,
    poisoned: bool,
    /// Scratch for DATA header + payload, so each chunk goes out in one write.
    scratch: Vec<u8>,
}

impl<S: Stream> SyncSession<S> {
    pub fn new(stream: S, sink: Box<dyn ProgressSink>) -> Self {
        SyncSession {
            stream,
            sink,
            max_chunk: protocol::DATA_MAX,
            total_bytes: 0,
            started: Instant::now(),
            poisoned: false,
            scratch: Vec::new(),
        }
    }

    pub fn with_chunk_size(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// True once a stream or protocol error has been observed. Batch
    /// operations stop retrying further sources on a poisoned session.
    pub fn poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) fn add_bytes(&mut self, n: u64) {
        self.total_bytes += n;
    }

    fn poison<T>(&mut self, err: SyncError) -> Result<T> {
        self.poisoned = true;
        Err(err)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self.stream.write_all(buf) {
            Ok(()) => Ok(()),
            Err(e) => self.poison(SyncError::Stream(e)),
        }
    }

    /// Writes a request frame (header and path in a single write).
    pub fn send_request(&mut self, tag: u32, path: &str) -> Result<()> {
        let buf = wire::request(tag, path)?;
        self.write_all(&buf)
    }

    /// Uploads a whole small file in a single write and counts its payload.
    pub fn send_small_file(&mut self, path_and_mode: &str, data: &[u8], mtime: u32) -> Result<()> {
        debug_assert!(data.len() <= self.max_chunk);
        let buf = wire::small_file(path_and_mode, data, mtime)?;
        self.write_all(&buf)?;
        self.total_bytes += data.len() as u64;
        Ok(())
    }

    /// Writes one DATA chunk (header and payload in a single write).
    pub fn send_data(&mut self, chunk: &[u8]) -> Result<()> {
        debug_assert!(chunk.len() <= self.max_chunk);
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend_from_slice(&wire::header(protocol::ID_DATA, chunk.len() as u32));
        scratch.extend_from_slice(chunk);
        let res = self.write_all(&scratch);
        self.scratch = scratch;
        res?;
        self.total_bytes += chunk.len() as u64;
        Ok(())
    }

    pub fn send_done(&mut self, mtime: u32) -> Result<()> {
        let hdr = wire::header(protocol::ID_DONE, mtime);
        self.write_all(&hdr)
    }

    /// Reads one frame, poisoning the session on stream or framing errors.
    pub fn frame(&mut self) -> Result<Frame> {
        match wire::read_frame(&mut self.stream, self.max_chunk as u32) {
            Ok(f) => Ok(f),
            Err(e) => self.poison(e),
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) => self.poison(SyncError::Stream(e)),
        }
    }

    pub fn read_string(&mut self, len: usize) -> Result<String> {
        match wire::read_string(&mut self.stream, len) {
            Ok(s) => Ok(s),
            Err(e) => self.poison(e),
        }
    }

    pub(crate) fn read_fail_message(&mut self, len: u32) -> Result<String> {
        match wire::read_fail_message(&mut self.stream, len) {
            Ok(s) => Ok(s),
            Err(e) => self.poison(e),
        }
    }

    /// Reads the response to a STAT request.
    pub fn read_stat(&mut self) -> Result<StatInfo> {
        match self.frame()? {
            Frame::Stat(st) => Ok(st),
            other => self.unexpected("STAT", other),
        }
    }

    /// Issues a STAT request and reads its response.
    pub fn stat(&mut self, path: &str) -> Result<StatInfo> {
        self.send_request(protocol::ID_STAT, path)?;
        self.read_stat()
    }

    /// Reads the OKAY/FAIL status that terminates an upload. A FAIL leaves
    /// the stream in sync (its message is fully consumed), so the batch may
    /// continue; any other tag poisons the session.
    pub fn copy_done(&mut self, from: &str, to: &str) -> Result<()> {
        match self.frame()? {
            Frame::Okay => Ok(()),
            Frame::Fail { msg_len } => {
                let msg = self.read_fail_message(msg_len)?;
                Err(SyncError::CopyFailed {
                    from: from.to_string(),
                    to: to.to_string(),
                    msg,
                })
            }
            other => self.unexpected("OKAY or FAIL", other),
        }
    }

    pub(crate) fn unexpected<T>(&mut self, expected: &'static str, got: Frame) -> Result<T> {
        let name = match got {
            Frame::Stat(_) => "STAT",
            Frame::Dent { .. } => "DENT",
            Frame::Data { .. } => "DATA",
            Frame::Done { .. } => "DONE",
            Frame::Okay => "OKAY",
            Frame::Fail { .. } => "FAIL",
        };
        self.poison(SyncError::Protocol {
            expected,
            got: name.to_string(),
        })
    }

    /// Human transfer rate, e.g. `" 12.3 MB/s (1234 bytes in 0.100s)"`.
    /// Empty when nothing moved or no time passed.
    pub fn transfer_rate(&self) -> String {
        let secs = self.started.elapsed().as_secs_f64();
        if self.total_bytes == 0 || secs <= 0.0 {
            return String::new();
        }
        let rate = (self.total_bytes as f64 / secs) / (1024.0 * 1024.0);
        format!(
            " {:.1} MB/s ({} bytes in {:.3}s)",
            rate, self.total_bytes, secs
        )
    }

    /// Progress line, elide mode (may be overwritten by the next one).
    pub fn print(&mut self, line: &str) {
        self.sink.print(line, PrintMode::Elide);
    }

    /// Error line, full mode, prefixed with the fixed tag.
    pub fn error(&mut self, msg: &str) {
        self.sink.print(&format!("error: {msg}"), PrintMode::Full);
    }

    pub fn report(&mut self, err: &SyncError) {
        self.error(&err.to_string());
    }
}

impl<S: Stream> Drop for SyncSession<S> {
    fn drop(&mut self) {
        if !self.poisoned {
            // Best-effort QUIT, then wait for the peer's orderly shutdown.
            // The drain also soaks up any data the server was still sending
            // when we decided to stop.
            if let Ok(buf) = wire::request(protocol::ID_QUIT, "") {
                if self.stream.write_all(&buf).is_ok() {
                    let mut sink = [0u8; 4096];
                    while matches!(self.stream.read(&mut sink), Ok(n) if n > 0) {}
                }
            }
        }
        self.sink.flush();
    }
}
