//! Directory enumeration into a flat transfer plan
//!
//! Local and remote trees walk identically; only the enumeration
//! primitive differs. Both drain the current directory's listing
//! completely before recursing: locally that caps the number of open
//! directory handles, remotely it keeps the sequential LIST stream from
//! interleaving.

use std::fs;

use crate::error::SyncError;
use crate::protocol::{self, mode};
use crate::session::{Stream, SyncSession};
use crate::wire::Frame;

type Result<T> = std::result::Result<T, SyncError>;

/// One planned file transfer. `src` and `dst` are full paths built by
/// concatenation, with a trailing slash on directories.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub src: String,
    pub dst: String,
    pub mode: u32,
    pub mtime: u32,
    pub size: u64,
    /// Set by the incremental planner when the remote copy is up to date.
    pub skip: bool,
}

/// One directory entry as the enumeration primitive reports it.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub mtime: u32,
}

/// Enumeration capability over one tree, local or remote.
pub trait TreeSource {
    /// Lists one directory. `dir` ends with a slash. The returned listing
    /// is complete before the walker recurses into any subdirectory.
    fn entries(&mut self, dir: &str) -> Result<Vec<RawEntry>>;

    /// Reports a non-fatal irregularity (special file, unusable path).
    fn notice(&mut self, line: &str);
}

/// Local enumeration: OS directory iteration plus `lstat`, so symlinks are
/// recorded as themselves. The session is only used for notices.
pub struct LocalTree<'a, S: Stream> {
    pub sc: &'a mut SyncSession<S>,
}

impl<S: Stream> TreeSource for LocalTree<'_, S> {
    fn entries(&mut self, dir: &str) -> Result<Vec<RawEntry>> {
        let iter = fs::read_dir(dir).map_err(|e| SyncError::local(dir, e))?;
        let mut out = Vec::new();
        for entry in iter {
            let entry = entry.map_err(|e| SyncError::local(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if dir.len() + name.len() + 1 > protocol::LOCAL_PATH_MAX {
                self.sc.error(&format!("skipping long path '{dir}{name}'"));
                continue;
            }
            match entry.metadata() {
                Ok(md) => {
                    use std::os::unix::fs::MetadataExt;
                    out.push(RawEntry {
                        name,
                        mode: md.mode(),
                        size: md.len(),
                        mtime: md.mtime() as u32,
                    });
                }
                Err(e) => {
                    self.sc.error(&format!("cannot lstat '{dir}{name}': {e}"));
                }
            }
        }
        Ok(out)
    }

    fn notice(&mut self, line: &str) {
        self.sc.error(line);
    }
}

/// Remote enumeration: one LIST request per directory, drained to DONE.
pub struct RemoteTree<'a, S: Stream> {
    pub sc: &'a mut SyncSession<S>,
}

impl<S: Stream> TreeSource for RemoteTree<'_, S> {
    fn entries(&mut self, dir: &str) -> Result<Vec<RawEntry>> {
        self.sc.send_request(protocol::ID_LIST, dir)?;
        let mut out = Vec::new();
        loop {
            match self.sc.frame()? {
                Frame::Done { .. } => break,
                Frame::Dent {
                    mode,
                    size,
                    mtime,
                    name_len,
                } => {
                    let name = self.sc.read_string(name_len as usize)?;
                    out.push(RawEntry {
                        name,
                        mode,
                        size: size as u64,
                        mtime,
                    });
                }
                other => return self.sc.unexpected("DENT or DONE", other),
            }
        }
        Ok(out)
    }

    fn notice(&mut self, line: &str) {
        self.sc.print(line);
    }
}

fn is_dot_or_dot_dot(name: &str) -> bool {
    name == "." || name == ".."
}

/// Depth-first walk producing the flat plan. `src_root` and `dst_root`
/// must end with a slash; the walker preserves that shape as it descends.
pub fn build_transfer_list<T: TreeSource>(
    tree: &mut T,
    src_root: &str,
    dst_root: &str,
    out: &mut Vec<TransferRecord>,
) -> Result<()> {
    let listing = tree.entries(src_root)?;
    let mut subdirs = Vec::new();
    for e in listing {
        if is_dot_or_dot_dot(&e.name) {
            continue;
        }
        if mode::is_dir(e.mode) {
            subdirs.push((
                format!("{}{}/", src_root, e.name),
                format!("{}{}/", dst_root, e.name),
            ));
        } else if mode::is_reg(e.mode) || mode::is_lnk(e.mode) {
            out.push(TransferRecord {
                src: format!("{}{}", src_root, e.name),
                dst: format!("{}{}", dst_root, e.name),
                mode: e.mode,
                mtime: e.mtime,
                size: e.size,
                skip: false,
            });
        } else {
            tree.notice(&format!("skipping special file '{}{}'", src_root, e.name));
        }
    }
    // The listing above is fully consumed; only now descend.
    for (src, dst) in subdirs {
        build_transfer_list(tree, &src, &dst, out)?;
    }
    Ok(())
}
