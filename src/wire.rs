//! Frame codec for the sync protocol
//!
//! Pure encode/decode over opaque byte streams. Session state, byte
//! accounting and progress live in `session`; this module only knows the
//! wire layout.
//!
//! Every frame starts with a 4-byte little-endian tag. STAT responses and
//! DENT entries carry extra fixed fields after the tag; every other frame
//! carries a single u32 whose meaning depends on the tag (payload length,
//! mtime, or message length). Variable trailers (paths, names, chunks,
//! failure messages) follow the fixed part.

use std::io::Read;

use crate::error::SyncError;
use crate::protocol::{self, tag_name};

type Result<T> = std::result::Result<T, SyncError>;

/// STAT response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

/// A decoded frame header with the overloaded field typed per tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Stat(StatInfo),
    /// Directory entry; the name trailer is read separately via [`read_string`].
    Dent {
        mode: u32,
        size: u32,
        mtime: u32,
        name_len: u32,
    },
    /// A data chunk of `len` payload bytes follows.
    Data { len: u32 },
    /// End of a stream; `arg` is the mtime on SEND/RECV, unused elsewhere.
    Done { arg: u32 },
    Okay,
    /// A failure message of `msg_len` bytes follows.
    Fail { msg_len: u32 },
}

/// Builds a request frame (header + path) as one buffer so the caller can
/// issue a single stream write. Merging header and payload into one write
/// measurably dominates small-file throughput.
pub fn request(tag: u32, path: &str) -> Result<Vec<u8>> {
    if path.len() > protocol::PATH_MAX {
        return Err(SyncError::PathTooLong {
            len: path.len(),
            max: protocol::PATH_MAX,
        });
    }
    let mut buf = Vec::with_capacity(8 + path.len());
    buf.extend_from_slice(&tag.to_le_bytes());
    buf.extend_from_slice(&(path.len() as u32).to_le_bytes());
    buf.extend_from_slice(path.as_bytes());
    Ok(buf)
}

/// Builds a complete small-file upload (SEND + path, DATA + payload, DONE)
/// as one buffer for a single write. The DATA header is always present, so
/// an empty file yields a zero-length chunk. Only valid when `data` fits
/// under the session chunk ceiling; callers enforce that.
pub fn small_file(path_and_mode: &str, data: &[u8], mtime: u32) -> Result<Vec<u8>> {
    if path_and_mode.len() > protocol::PATH_MAX {
        return Err(SyncError::PathTooLong {
            len: path_and_mode.len(),
            max: protocol::PATH_MAX,
        });
    }
    let mut buf = Vec::with_capacity(8 + path_and_mode.len() + 8 + data.len() + 8);
    buf.extend_from_slice(&protocol::ID_SEND.to_le_bytes());
    buf.extend_from_slice(&(path_and_mode.len() as u32).to_le_bytes());
    buf.extend_from_slice(path_and_mode.as_bytes());
    buf.extend_from_slice(&protocol::ID_DATA.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(&protocol::ID_DONE.to_le_bytes());
    buf.extend_from_slice(&mtime.to_le_bytes());
    Ok(buf)
}

/// Fixed 8-byte header for DATA/DONE frames of the streaming upload path.
pub fn header(tag: u32, arg: u32) -> [u8; 8] {
    let mut hdr = [0u8; 8];
    hdr[0..4].copy_from_slice(&tag.to_le_bytes());
    hdr[4..8].copy_from_slice(&arg.to_le_bytes());
    hdr
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Reads one frame header, dispatching the fixed layout on the tag.
/// `max_data` is the session chunk ceiling; DATA frames above it are
/// rejected before any payload is read.
pub fn read_frame<R: Read>(r: &mut R, max_data: u32) -> Result<Frame> {
    let tag = read_u32(r)?;
    match tag {
        t if t == protocol::ID_STAT => Ok(Frame::Stat(StatInfo {
            mode: read_u32(r)?,
            size: read_u32(r)?,
            mtime: read_u32(r)?,
        })),
        t if t == protocol::ID_DENT => {
            let mode = read_u32(r)?;
            let size = read_u32(r)?;
            let mtime = read_u32(r)?;
            let name_len = read_u32(r)?;
            if name_len > protocol::NAME_MAX as u32 {
                return Err(SyncError::Oversize {
                    what: "dirent name",
                    len: name_len,
                    max: protocol::NAME_MAX as u32,
                });
            }
            Ok(Frame::Dent {
                mode,
                size,
                mtime,
                name_len,
            })
        }
        t if t == protocol::ID_DATA => {
            let len = read_u32(r)?;
            if len > max_data {
                return Err(SyncError::Oversize {
                    what: "data chunk",
                    len,
                    max: max_data,
                });
            }
            Ok(Frame::Data { len })
        }
        t if t == protocol::ID_DONE => Ok(Frame::Done { arg: read_u32(r)? }),
        t if t == protocol::ID_OKAY => {
            read_u32(r)?; // unused
            Ok(Frame::Okay)
        }
        t if t == protocol::ID_FAIL => Ok(Frame::Fail {
            msg_len: read_u32(r)?,
        }),
        t => Err(SyncError::Protocol {
            expected: "a known frame tag",
            got: tag_name(t),
        }),
    }
}

/// Reads an exact-length UTF-8 trailer (dirent names, failure messages).
pub fn read_string<R: Read>(r: &mut R, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Reads a FAIL message of remote-declared length, capped at
/// [`protocol::FAIL_MSG_MAX`]. The excess is drained so the stream stays
/// in sync and the batch can continue.
pub fn read_fail_message<R: Read>(r: &mut R, len: u32) -> Result<String> {
    let take = (len as usize).min(protocol::FAIL_MSG_MAX);
    let msg = read_string(r, take)?;
    let mut remaining = len as usize - take;
    let mut sink = [0u8; 4096];
    while remaining > 0 {
        let n = remaining.min(sink.len());
        r.read_exact(&mut sink[..n])?;
        remaining -= n;
    }
    Ok(msg)
}
