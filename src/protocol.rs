//! Wire constants for the framed sync protocol

/// Builds a tag value from its 4-byte ASCII name, little-endian.
const fn tag(name: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*name)
}

// Request/response tags. Numeric values are fixed by the wire format;
// reading converts to these and rejects anything else.
pub const ID_LIST: u32 = tag(b"LIST");
pub const ID_RECV: u32 = tag(b"RECV");
pub const ID_SEND: u32 = tag(b"SEND");
pub const ID_STAT: u32 = tag(b"STAT");
pub const ID_DENT: u32 = tag(b"DENT");
pub const ID_DATA: u32 = tag(b"DATA");
pub const ID_DONE: u32 = tag(b"DONE");
pub const ID_OKAY: u32 = tag(b"OKAY");
pub const ID_FAIL: u32 = tag(b"FAIL");
pub const ID_QUIT: u32 = tag(b"QUIT");

/// Default DATA chunk ceiling. Sessions may negotiate a different value.
pub const DATA_MAX: usize = 64 * 1024;

/// Request path fields are capped at this many bytes.
pub const PATH_MAX: usize = 1024;

/// Directory-entry names are capped at this many bytes.
pub const NAME_MAX: usize = 256;

/// FAIL messages are read up to this many bytes; the remote-declared
/// remainder is drained and discarded.
pub const FAIL_MSG_MAX: usize = 16 * 1024;

/// Local paths longer than this are skipped during enumeration.
pub const LOCAL_PATH_MAX: usize = 4096;

/// Renders a tag for error messages: ASCII name when printable, hex otherwise.
pub fn tag_name(t: u32) -> String {
    let b = t.to_le_bytes();
    if b.iter().all(|c| c.is_ascii_uppercase()) {
        String::from_utf8_lossy(&b).into_owned()
    } else {
        format!("{t:#010x}")
    }
}

/// POSIX mode-bit tests over wire-format (u32) modes.
pub mod mode {
    const IFMT: u32 = libc::S_IFMT as u32;

    pub fn is_reg(mode: u32) -> bool {
        mode & IFMT == libc::S_IFREG as u32
    }

    pub fn is_dir(mode: u32) -> bool {
        mode & IFMT == libc::S_IFDIR as u32
    }

    pub fn is_lnk(mode: u32) -> bool {
        mode & IFMT == libc::S_IFLNK as u32
    }

    pub fn is_chr(mode: u32) -> bool {
        mode & IFMT == libc::S_IFCHR as u32
    }

    pub fn is_blk(mode: u32) -> bool {
        mode & IFMT == libc::S_IFBLK as u32
    }
}
