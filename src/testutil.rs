//! Scripted in-memory streams for protocol unit tests

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use crate::protocol::{ID_DATA, ID_DONE, ID_FAIL, ID_OKAY, ID_STAT};

/// Every write call recorded separately, so tests can assert how many
/// stream writes an operation issued.
pub type WriteLog = Arc<Mutex<Vec<Vec<u8>>>>;

pub struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    writes: WriteLog,
}

impl ScriptedStream {
    pub fn new(input: Vec<u8>) -> (Self, WriteLog) {
        let writes: WriteLog = Arc::default();
        (
            ScriptedStream {
                input: Cursor::new(input),
                writes: writes.clone(),
            },
            writes,
        )
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.lock().unwrap().push(buf.to_vec());
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn flat(log: &WriteLog) -> Vec<u8> {
    log.lock().unwrap().concat()
}

pub fn frame(tag: u32, words: &[u32]) -> Vec<u8> {
    let mut v = tag.to_le_bytes().to_vec();
    for w in words {
        v.extend_from_slice(&w.to_le_bytes());
    }
    v
}

pub fn okay() -> Vec<u8> {
    frame(ID_OKAY, &[0])
}

pub fn stat(mode: u32, size: u32, mtime: u32) -> Vec<u8> {
    frame(ID_STAT, &[mode, size, mtime])
}

pub fn data(payload: &[u8]) -> Vec<u8> {
    let mut v = frame(ID_DATA, &[payload.len() as u32]);
    v.extend_from_slice(payload);
    v
}

pub fn done(arg: u32) -> Vec<u8> {
    frame(ID_DONE, &[arg])
}

pub fn fail(msg: &str) -> Vec<u8> {
    let mut v = frame(ID_FAIL, &[msg.len() as u32]);
    v.extend_from_slice(msg.as_bytes());
    v
}
