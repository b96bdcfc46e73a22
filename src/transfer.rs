//! Single-file transfers: upload (SEND) and download (RECV)

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::SyncError;
use crate::protocol::{self, mode};
use crate::session::{Stream, SyncSession};
use crate::wire::Frame;

type Result<T> = std::result::Result<T, SyncError>;

/// Uploads one local file to `rpath`. Symlinks travel as their target bytes
/// through the small-file path; regular files pick the small or streaming
/// strategy on size. Anything else is an unsupported mode.
pub fn send_file<S: Stream>(
    sc: &mut SyncSession<S>,
    lpath: &str,
    rpath: &str,
    mtime: u32,
    file_mode: u32,
) -> Result<()> {
    let path_and_mode = format!("{rpath},{file_mode}");

    if mode::is_lnk(file_mode) {
        return send_symlink(sc, lpath, rpath, &path_and_mode, mtime, file_mode);
    }

    if !mode::is_reg(file_mode) {
        return Err(SyncError::UnsupportedMode {
            path: lpath.to_string(),
            mode: file_mode,
        });
    }

    let md = fs::metadata(lpath).map_err(|e| SyncError::local(lpath, e))?;
    if md.len() < sc.max_chunk() as u64 {
        let data = fs::read(lpath).map_err(|e| SyncError::local(lpath, e))?;
        sc.print(rpath);
        sc.send_small_file(&path_and_mode, &data, mtime)?;
    } else {
        send_large_file(sc, lpath, rpath, &path_and_mode, mtime, md.len())?;
    }
    sc.copy_done(lpath, rpath)
}

#[cfg(unix)]
fn send_symlink<S: Stream>(
    sc: &mut SyncSession<S>,
    lpath: &str,
    rpath: &str,
    path_and_mode: &str,
    mtime: u32,
    _file_mode: u32,
) -> Result<()> {
    let target = fs::read_link(lpath).map_err(|e| SyncError::local(lpath, e))?;
    // The target travels with a trailing NUL, as the peer stores it raw.
    let mut data = target.as_os_str().as_encoded_bytes().to_vec();
    data.push(0);
    sc.print(rpath);
    sc.send_small_file(path_and_mode, &data, mtime)?;
    sc.copy_done(lpath, rpath)
}

#[cfg(not(unix))]
fn send_symlink<S: Stream>(
    _sc: &mut SyncSession<S>,
    lpath: &str,
    _rpath: &str,
    _path_and_mode: &str,
    _mtime: u32,
    file_mode: u32,
) -> Result<()> {
    Err(SyncError::UnsupportedMode {
        path: lpath.to_string(),
        mode: file_mode,
    })
}

/// Streaming upload: one SEND request, then DATA chunks read straight from
/// the file, then DONE carrying the mtime.
fn send_large_file<S: Stream>(
    sc: &mut SyncSession<S>,
    lpath: &str,
    rpath: &str,
    path_and_mode: &str,
    mtime: u32,
    total_size: u64,
) -> Result<()> {
    sc.send_request(protocol::ID_SEND, path_and_mode)?;

    let mut file = File::open(lpath).map_err(|e| SyncError::local(lpath, e))?;
    let mut buf = vec![0u8; sc.max_chunk()];
    let mut bytes_copied: u64 = 0;
    loop {
        let n = file.read(&mut buf).map_err(|e| SyncError::local(lpath, e))?;
        if n == 0 {
            break;
        }
        sc.send_data(&buf[..n])?;
        bytes_copied += n as u64;
        let percentage = bytes_copied * 100 / total_size;
        sc.print(&format!("{rpath}: {percentage}%"));
    }
    sc.send_done(mtime)
}

/// Downloads `rpath` into `lpath`. Any failure after the local file has
/// been created removes it again, so a truncated download never survives.
pub fn recv_file<S: Stream>(sc: &mut SyncSession<S>, rpath: &str, lpath: &str) -> Result<()> {
    sc.print(rpath);

    let st = sc.stat(rpath)?;
    if st.mode == 0 {
        return Err(SyncError::RemoteNotFound(rpath.to_string()));
    }

    sc.send_request(protocol::ID_RECV, rpath)?;

    let _ = fs::remove_file(lpath);
    if let Some(parent) = Path::new(lpath).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| SyncError::local(lpath, e))?;
        }
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(lpath)
        .map_err(|e| SyncError::local(lpath, e))?;

    let result = recv_body(sc, file, rpath, lpath, st.size);
    if result.is_err() {
        let _ = fs::remove_file(lpath);
    }
    result
}

fn recv_body<S: Stream>(
    sc: &mut SyncSession<S>,
    mut file: File,
    rpath: &str,
    lpath: &str,
    total_size: u32,
) -> Result<()> {
    let mut buf = vec![0u8; sc.max_chunk()];
    let mut bytes_copied: u64 = 0;
    loop {
        match sc.frame()? {
            Frame::Done { .. } => break,
            Frame::Data { len } => {
                let chunk = &mut buf[..len as usize];
                sc.read_exact(chunk)?;
                file.write_all(chunk).map_err(|e| SyncError::local(lpath, e))?;
                sc.add_bytes(len as u64);
                bytes_copied += len as u64;
                if total_size > 0 {
                    let percentage = bytes_copied * 100 / total_size as u64;
                    sc.print(&format!("{rpath}: {percentage}%"));
                }
            }
            Frame::Fail { msg_len } => {
                let msg = sc.read_fail_message(msg_len)?;
                return Err(SyncError::CopyFailed {
                    from: rpath.to_string(),
                    to: lpath.to_string(),
                    msg,
                });
            }
            other => return sc.unexpected("DATA or DONE", other),
        }
    }
    Ok(())
}
