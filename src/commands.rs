//! Top-level operations: list, push, pull, sync
//!
//! Destination resolution is uniform across push and pull: a target that
//! ends in `/` must already exist as a directory, and a batch of more than
//! one source requires a directory target. Per-source failures inside a
//! batch are reported and the batch continues; the command still reports
//! overall failure at the end. A poisoned session aborts the batch.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};

use filetime::FileTime;

use crate::error::SyncError;
use crate::logger::Logger;
use crate::plan;
use crate::protocol::{self, mode};
use crate::session::{Stream, SyncSession};
use crate::transfer::{recv_file, send_file};
use crate::walk::{build_transfer_list, LocalTree, RemoteTree};
use crate::wire::Frame;

type Result<T> = std::result::Result<T, SyncError>;

/// Lists one remote directory to stdout, one hex-formatted line per entry.
pub fn list<S: Stream>(sc: &mut SyncSession<S>, rpath: &str) -> Result<()> {
    if rpath.is_empty() {
        return Err(SyncError::EmptyPath);
    }
    sc.send_request(protocol::ID_LIST, rpath)?;
    loop {
        match sc.frame()? {
            Frame::Done { .. } => return Ok(()),
            Frame::Dent {
                mode,
                size,
                mtime,
                name_len,
            } => {
                let name = sc.read_string(name_len as usize)?;
                println!("{mode:08x} {size:08x} {mtime:08x} {name}");
            }
            other => return sc.unexpected("DENT or DONE", other),
        }
    }
}

/// Pushes each source to the remote destination. Directories push as whole
/// trees; files into an existing remote directory land under their own
/// basename. Returns whether every source made it.
pub fn push<S: Stream>(
    sc: &mut SyncSession<S>,
    log: &dyn Logger,
    srcs: &[String],
    dst: &str,
) -> Result<bool> {
    if dst.is_empty() {
        return Err(SyncError::EmptyPath);
    }
    let st = sc.stat(dst)?;
    let dst_isdir = st.mode != 0 && mode::is_dir(st.mode);
    if !dst_isdir && (srcs.len() > 1 || dst.ends_with('/')) {
        return Err(SyncError::NotADirectory(dst.to_string()));
    }

    let mut success = true;
    for src in srcs {
        let md = match fs::metadata(src) {
            Ok(md) => md,
            Err(e) => {
                report(sc, log, "push", src, &SyncError::local(src, e));
                success = false;
                continue;
            }
        };

        let result = if md.is_dir() {
            push_tree(sc, log, src, dst, false, false)
        } else {
            let dst_path = resolve_into_dir(dst, dst_isdir, src);
            send_file(sc, src, &dst_path, md.mtime() as u32, md.mode()).map(|()| {
                log.pushed(src, &dst_path, md.len());
            })
        };
        if let Err(err) = result {
            if sc.poisoned() {
                return Err(err);
            }
            report(sc, log, "push", src, &err);
            success = false;
        }
    }
    Ok(success)
}

/// Pulls each remote source to the local destination. A source missing on
/// the remote is reported but does not stop the batch.
pub fn pull<S: Stream>(
    sc: &mut SyncSession<S>,
    log: &dyn Logger,
    srcs: &[String],
    dst: &str,
    copy_attrs: bool,
) -> Result<bool> {
    if dst.is_empty() {
        return Err(SyncError::EmptyPath);
    }
    let dst_md = match fs::metadata(dst) {
        Ok(md) => Some(md),
        // A missing destination is fine when pulling a single file to a
        // fresh path.
        Err(e) if e.kind() == io::ErrorKind::NotFound && srcs.len() == 1 => None,
        Err(e) => return Err(SyncError::local(dst, e)),
    };
    let dst_isdir = dst_md.as_ref().is_some_and(|m| m.is_dir());
    if !dst_isdir && (srcs.len() > 1 || dst.ends_with('/')) {
        return Err(SyncError::NotADirectory(dst.to_string()));
    }

    let mut success = true;
    for src in srcs {
        let st = sc.stat(src)?;
        if st.mode == 0 {
            report(sc, log, "pull", src, &SyncError::RemoteNotFound(src.clone()));
            success = false;
            continue;
        }

        let result = if mode::is_dir(st.mode) {
            pull_tree(sc, log, src, dst, copy_attrs)
        } else if mode::is_reg(st.mode)
            || mode::is_lnk(st.mode)
            || mode::is_chr(st.mode)
            || mode::is_blk(st.mode)
        {
            let dst_path = resolve_into_dir(dst, dst_isdir, src);
            recv_file(sc, src, &dst_path).and_then(|()| {
                log.pulled(src, &dst_path, st.size as u64);
                if copy_attrs {
                    set_time_and_mode(&dst_path, st.mtime, st.mode)
                } else {
                    Ok(())
                }
            })
        } else {
            Err(SyncError::UnsupportedMode {
                path: src.clone(),
                mode: st.mode,
            })
        };
        if let Err(err) = result {
            if sc.poisoned() {
                return Err(err);
            }
            report(sc, log, "pull", src, &err);
            success = false;
        }
    }
    Ok(success)
}

/// Incremental push of one tree: only entries whose remote stat differs
/// travel. `list_only` prints the would-be pushes instead of sending.
pub fn sync<S: Stream>(
    sc: &mut SyncSession<S>,
    log: &dyn Logger,
    lpath: &str,
    rpath: &str,
    list_only: bool,
) -> Result<()> {
    push_tree(sc, log, lpath, rpath, true, list_only)
}

fn report<S: Stream>(
    sc: &mut SyncSession<S>,
    log: &dyn Logger,
    context: &str,
    path: &str,
    err: &SyncError,
) {
    sc.report(err);
    log.error(context, path, &err.to_string());
}

fn resolve_into_dir(dst: &str, dst_isdir: bool, src: &str) -> String {
    if dst_isdir {
        format!("{}/{}", dst, basename(src))
    } else {
        dst.to_string()
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Whole-tree push. Fails the tree on the first transfer error.
fn push_tree<S: Stream>(
    sc: &mut SyncSession<S>,
    log: &dyn Logger,
    lpath: &str,
    rpath: &str,
    check_timestamps: bool,
    list_only: bool,
) -> Result<()> {
    if lpath.is_empty() || rpath.is_empty() {
        return Err(SyncError::EmptyPath);
    }
    let lroot = with_trailing_slash(lpath);
    let rroot = with_trailing_slash(rpath);

    let mut records = Vec::new();
    {
        let mut tree = LocalTree { sc: &mut *sc };
        build_transfer_list(&mut tree, &lroot, &rroot, &mut records)?;
    }
    if check_timestamps {
        plan::mark_up_to_date(sc, &mut records)?;
    }

    let mut pushed: u64 = 0;
    let mut skipped: u64 = 0;
    for record in &records {
        if record.skip {
            skipped += 1;
            log.skipped(&record.src);
            continue;
        }
        if list_only {
            eprintln!("would push: {} -> {}", record.src, record.dst);
        } else {
            send_file(sc, &record.src, &record.dst, record.mtime, record.mode)?;
            log.pushed(&record.src, &record.dst, record.size);
        }
        pushed += 1;
    }

    let rate = sc.transfer_rate();
    sc.print(&format!(
        "{}: {} file{} pushed. {} file{} skipped.{}\n",
        rroot,
        pushed,
        plural(pushed),
        skipped,
        plural(skipped),
        rate
    ));
    log.done(pushed, skipped, sc.total_bytes());
    Ok(())
}

/// Whole-tree pull, the mirror of [`push_tree`]. Fails the tree on the
/// first transfer error.
fn pull_tree<S: Stream>(
    sc: &mut SyncSession<S>,
    log: &dyn Logger,
    rpath: &str,
    lpath: &str,
    copy_attrs: bool,
) -> Result<()> {
    if rpath.is_empty() || lpath.is_empty() {
        return Err(SyncError::EmptyPath);
    }
    let rroot = with_trailing_slash(rpath);
    let lroot = with_trailing_slash(lpath);

    sc.print("pull: building file list...");
    let mut records = Vec::new();
    {
        let mut tree = RemoteTree { sc: &mut *sc };
        build_transfer_list(&mut tree, &rroot, &lroot, &mut records)?;
    }

    let mut pulled: u64 = 0;
    let mut skipped: u64 = 0;
    for record in &records {
        if record.skip {
            skipped += 1;
            log.skipped(&record.src);
            continue;
        }
        sc.print(&format!("pull: {} -> {}", record.src, record.dst));
        recv_file(sc, &record.src, &record.dst)?;
        if copy_attrs {
            set_time_and_mode(&record.dst, record.mtime, record.mode)?;
        }
        log.pulled(&record.src, &record.dst, record.size);
        pulled += 1;
    }

    let rate = sc.transfer_rate();
    sc.print(&format!(
        "{}: {} file{} pulled. {} file{} skipped.{}\n",
        rroot,
        pulled,
        plural(pulled),
        skipped,
        plural(skipped),
        rate
    ));
    log.done(pulled, skipped, sc.total_bytes());
    Ok(())
}

/// Applies the pulled mtime and mode. The permission bits honor the
/// process umask, read with the set-and-restore pattern since there is no
/// read-only accessor.
fn set_time_and_mode(path: &str, mtime: u32, file_mode: u32) -> Result<()> {
    let t = FileTime::from_unix_time(mtime as i64, 0);
    filetime::set_file_times(path, t, t).map_err(|e| SyncError::local(path, e))?;

    let mask = unsafe { libc::umask(0) };
    unsafe { libc::umask(mask) };
    let perms = fs::Permissions::from_mode(file_mode & !(mask as u32));
    fs::set_permissions(path, perms).map_err(|e| SyncError::local(path, e))
}
