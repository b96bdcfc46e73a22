//! End-to-end client tests against a scripted in-process protocol server.
//!
//! The server speaks the real byte protocol over a loopback socket and
//! applies wire paths literally, so each test points it at a tempdir.
//! Paths whose basename starts with "deny" stat as a plausible file but
//! fail every transfer, for exercising FAIL handling.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use std::thread::JoinHandle;

use filetime::FileTime;
use tempfile::TempDir;

use tether::commands;
use tether::logger::{Logger, NoopLogger};
use tether::printer::NullSink;
use tether::session::SyncSession;
use tether::SyncError;

mod server {
    use std::fs;
    use std::io::{self, Read, Write};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;
    use std::thread::JoinHandle;

    use tether::protocol::{
        ID_DATA, ID_DENT, ID_DONE, ID_FAIL, ID_LIST, ID_OKAY, ID_QUIT, ID_RECV, ID_SEND, ID_STAT,
    };

    pub fn spawn() -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = serve(&mut stream);
            }
        });
        (addr, handle)
    }

    fn read_u32(s: &mut TcpStream) -> io::Result<u32> {
        let mut b = [0u8; 4];
        s.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_path(s: &mut TcpStream, len: u32) -> io::Result<String> {
        let mut buf = vec![0u8; len as usize];
        s.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf).unwrap())
    }

    fn write_frame(s: &mut TcpStream, tag: u32, words: &[u32]) -> io::Result<()> {
        let mut buf = tag.to_le_bytes().to_vec();
        for w in words {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        s.write_all(&buf)
    }

    fn write_fail(s: &mut TcpStream, msg: &str) -> io::Result<()> {
        write_frame(s, ID_FAIL, &[msg.len() as u32])?;
        s.write_all(msg.as_bytes())
    }

    fn denied(path: &str) -> bool {
        path.rsplit('/')
            .next()
            .is_some_and(|name| name.starts_with("deny"))
    }

    fn serve(s: &mut TcpStream) -> io::Result<()> {
        loop {
            let tag = match read_u32(s) {
                Ok(t) => t,
                // Peer hung up without QUIT; that ends the session too.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            };
            let arg = read_u32(s)?;
            match tag {
                t if t == ID_QUIT => return Ok(()),
                t if t == ID_STAT => {
                    let path = read_path(s, arg)?;
                    answer_stat(s, &path)?;
                }
                t if t == ID_LIST => {
                    let path = read_path(s, arg)?;
                    answer_list(s, &path)?;
                }
                t if t == ID_SEND => {
                    let path_and_mode = read_path(s, arg)?;
                    handle_send(s, &path_and_mode)?;
                }
                t if t == ID_RECV => {
                    let path = read_path(s, arg)?;
                    handle_recv(s, &path)?;
                }
                t => panic!("server got unknown tag {t:#x}"),
            }
        }
    }

    fn answer_stat(s: &mut TcpStream, path: &str) -> io::Result<()> {
        if denied(path) {
            return write_frame(s, ID_STAT, &[0o100644, 6, 1]);
        }
        match fs::symlink_metadata(path) {
            Ok(md) => write_frame(
                s,
                ID_STAT,
                &[md.mode(), md.len() as u32, md.mtime() as u32],
            ),
            Err(_) => write_frame(s, ID_STAT, &[0, 0, 0]),
        }
    }

    fn answer_list(s: &mut TcpStream, path: &str) -> io::Result<()> {
        if let Ok(iter) = fs::read_dir(path) {
            // Real servers report the dot entries; clients must skip them.
            for name in [".", ".."] {
                write_frame(s, ID_DENT, &[0o040755, 0, 0, name.len() as u32])?;
                s.write_all(name.as_bytes())?;
            }
            for entry in iter.flatten() {
                let name = entry.file_name();
                let name = name.to_str().unwrap();
                let md = entry.metadata()?;
                write_frame(
                    s,
                    ID_DENT,
                    &[
                        md.mode(),
                        md.len() as u32,
                        md.mtime() as u32,
                        name.len() as u32,
                    ],
                )?;
                s.write_all(name.as_bytes())?;
            }
        }
        write_frame(s, ID_DONE, &[0])
    }

    fn handle_send(s: &mut TcpStream, path_and_mode: &str) -> io::Result<()> {
        let (path, mode) = path_and_mode.rsplit_once(',').unwrap();
        let mode: u32 = mode.parse().unwrap();

        let mut data = Vec::new();
        let mtime;
        loop {
            let tag = read_u32(s)?;
            let arg = read_u32(s)?;
            if tag == ID_DATA {
                let mut chunk = vec![0u8; arg as usize];
                s.read_exact(&mut chunk)?;
                data.extend_from_slice(&chunk);
            } else if tag == ID_DONE {
                mtime = arg;
                break;
            } else {
                panic!("server got {tag:#x} inside SEND");
            }
        }

        if denied(path) {
            return write_fail(s, "denied");
        }
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        if mode & (libc::S_IFMT as u32) == libc::S_IFLNK as u32 {
            let target = String::from_utf8(data[..data.len() - 1].to_vec()).unwrap();
            let _ = fs::remove_file(path);
            std::os::unix::fs::symlink(target, path)?;
        } else {
            fs::write(path, &data)?;
            filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime as i64, 0))?;
        }
        write_frame(s, ID_OKAY, &[0])
    }

    fn handle_recv(s: &mut TcpStream, path: &str) -> io::Result<()> {
        if denied(path) {
            return write_fail(s, "denied");
        }
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) => return write_fail(s, &e.to_string()),
        };
        for chunk in data.chunks(64 * 1024) {
            write_frame(s, ID_DATA, &[chunk.len() as u32])?;
            s.write_all(chunk)?;
        }
        write_frame(s, ID_DONE, &[0])
    }
}

/// Logger that records the per-tree summary counts.
#[derive(Default)]
struct CountingLogger {
    done: Mutex<Vec<(u64, u64)>>,
}

impl Logger for CountingLogger {
    fn done(&self, transferred: u64, skipped: u64, _bytes: u64) {
        self.done.lock().unwrap().push((transferred, skipped));
    }
}

fn connect(addr: SocketAddr) -> SyncSession<std::net::TcpStream> {
    let stream = std::net::TcpStream::connect(addr).unwrap();
    SyncSession::new(stream, Box::new(NullSink))
}

fn finish(sc: SyncSession<std::net::TcpStream>, server: JoinHandle<()>) {
    drop(sc);
    server.join().unwrap();
}

fn s(p: impl AsRef<Path>) -> String {
    p.as_ref().to_str().unwrap().to_string()
}

#[test]
fn push_small_file_to_new_remote_path() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let src = local.path().join("a.txt");
    std::fs::write(&src, b"hello").unwrap();
    filetime::set_file_mtime(&src, FileTime::from_unix_time(1000, 0)).unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let dst = s(remote.path().join("data/a.txt"));
    let ok = commands::push(&mut sc, &NoopLogger, &[s(&src)], &dst).unwrap();

    assert!(ok);
    assert_eq!(std::fs::read(remote.path().join("data/a.txt")).unwrap(), b"hello");
    let md = std::fs::metadata(remote.path().join("data/a.txt")).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&md).unix_seconds(), 1000);
    assert_eq!(sc.total_bytes(), 5);
    finish(sc, server);
}

#[test]
fn push_file_into_existing_directory_appends_basename() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let src = local.path().join("x");
    std::fs::write(&src, b"payload").unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let ok = commands::push(&mut sc, &NoopLogger, &[s(&src)], &s(remote.path())).unwrap();

    assert!(ok);
    assert_eq!(std::fs::read(remote.path().join("x")).unwrap(), b"payload");
    finish(sc, server);
}

#[test]
fn push_multiple_sources_requires_directory_target() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let a = local.path().join("a");
    let b = local.path().join("b");
    std::fs::write(&a, b"a").unwrap();
    std::fs::write(&b, b"b").unwrap();
    let target = remote.path().join("plain");
    std::fs::write(&target, b"not a dir").unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let err = commands::push(&mut sc, &NoopLogger, &[s(&a), s(&b)], &s(&target)).unwrap_err();
    assert!(matches!(err, SyncError::NotADirectory(_)));
    finish(sc, server);
}

#[test]
fn trailing_slash_target_must_exist_as_directory() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let src = local.path().join("a");
    std::fs::write(&src, b"a").unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let dst = format!("{}/missing/", remote.path().display());
    let err = commands::push(&mut sc, &NoopLogger, &[s(&src)], &dst).unwrap_err();
    assert!(matches!(err, SyncError::NotADirectory(_)));
    finish(sc, server);
}

#[test]
fn large_file_survives_chunked_push() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let src = local.path().join("big.bin");
    let contents: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&src, &contents).unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let dst = s(remote.path().join("big.bin"));
    let ok = commands::push(&mut sc, &NoopLogger, &[s(&src)], &dst).unwrap();

    assert!(ok);
    assert_eq!(std::fs::read(remote.path().join("big.bin")).unwrap(), contents);
    assert_eq!(sc.total_bytes(), contents.len() as u64);
    finish(sc, server);
}

#[test]
fn sync_pushes_once_then_skips_everything() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    std::fs::write(local.path().join("a.txt"), b"aaa").unwrap();
    std::fs::create_dir(local.path().join("sub")).unwrap();
    std::fs::write(local.path().join("sub/b.txt"), b"bbbb").unwrap();
    std::os::unix::fs::symlink("a.txt", local.path().join("ln")).unwrap();
    let dest = remote.path().join("tree");

    let log = CountingLogger::default();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    commands::sync(&mut sc, &log, &s(local.path()), &s(&dest), false).unwrap();
    finish(sc, server);

    assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"aaa");
    assert_eq!(std::fs::read(dest.join("sub/b.txt")).unwrap(), b"bbbb");
    assert_eq!(std::fs::read_link(dest.join("ln")).unwrap(), Path::new("a.txt"));

    // Second run: every entry stats equal on the remote, nothing travels.
    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    commands::sync(&mut sc, &log, &s(local.path()), &s(&dest), false).unwrap();
    assert_eq!(sc.total_bytes(), 0);
    finish(sc, server);

    let done = log.done.lock().unwrap();
    assert_eq!(done[0], (3, 0));
    assert_eq!(done[1], (0, 3));
}

#[test]
fn sync_dry_run_transfers_nothing() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    std::fs::write(local.path().join("a.txt"), b"aaa").unwrap();
    let dest = remote.path().join("tree");

    let log = CountingLogger::default();
    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    commands::sync(&mut sc, &log, &s(local.path()), &s(&dest), true).unwrap();
    finish(sc, server);

    assert!(!dest.exists());
    assert_eq!(*log.done.lock().unwrap(), vec![(1, 0)]);
}

#[test]
fn pull_file_with_attrs_round_trips() {
    use std::os::unix::fs::PermissionsExt;

    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let src = remote.path().join("conf.ini");
    std::fs::write(&src, b"[core]\nkey=1\n").unwrap();
    std::fs::set_permissions(&src, std::fs::Permissions::from_mode(0o640)).unwrap();
    filetime::set_file_mtime(&src, FileTime::from_unix_time(123_456, 0)).unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let dst = local.path().join("conf.ini");
    let ok = commands::pull(&mut sc, &NoopLogger, &[s(&src)], &s(&dst), true).unwrap();
    finish(sc, server);

    assert!(ok);
    assert_eq!(std::fs::read(&dst).unwrap(), b"[core]\nkey=1\n");
    let md = std::fs::metadata(&dst).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&md).unix_seconds(), 123_456);
    // Mode applies modulo the process umask, which can only clear bits.
    assert_eq!(md.permissions().mode() & 0o640, md.permissions().mode() & 0o777);
}

#[test]
fn pull_missing_source_reports_but_continues() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let real = remote.path().join("real.txt");
    std::fs::write(&real, b"here").unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let gone = s(remote.path().join("gone.txt"));
    let ok = commands::pull(
        &mut sc,
        &NoopLogger,
        &[gone, s(&real)],
        &s(local.path()),
        false,
    )
    .unwrap();
    finish(sc, server);

    assert!(!ok);
    assert_eq!(std::fs::read(local.path().join("real.txt")).unwrap(), b"here");
}

#[test]
fn denied_pull_leaves_no_local_file() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let src = s(remote.path().join("deny.txt"));
    let dst = local.path().join("fresh.txt");
    let ok = commands::pull(&mut sc, &NoopLogger, &[src], &s(&dst), false).unwrap();
    finish(sc, server);

    assert!(!ok);
    assert!(!dst.exists());
}

#[test]
fn pull_whole_tree() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    std::fs::write(remote.path().join("top.txt"), b"t").unwrap();
    std::fs::create_dir_all(remote.path().join("d1/d2")).unwrap();
    std::fs::write(remote.path().join("d1/d2/deep.txt"), b"deep").unwrap();
    let dest = local.path().join("mirror");
    std::fs::create_dir(&dest).unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let ok = commands::pull(
        &mut sc,
        &NoopLogger,
        &[s(remote.path())],
        &s(&dest),
        false,
    )
    .unwrap();
    finish(sc, server);

    assert!(ok);
    // A directory source pours its contents into the target root.
    assert_eq!(std::fs::read(dest.join("top.txt")).unwrap(), b"t");
    assert_eq!(std::fs::read(dest.join("d1/d2/deep.txt")).unwrap(), b"deep");
}

#[test]
fn list_drains_directory_listing() {
    let remote = TempDir::new().unwrap();
    std::fs::write(remote.path().join("x"), b"0123456789").unwrap();
    std::fs::write(remote.path().join("y"), b"").unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    commands::list(&mut sc, &s(remote.path())).unwrap();
    finish(sc, server);
}

#[test]
fn total_bytes_counts_both_directions() {
    let local = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let up = local.path().join("up.bin");
    std::fs::write(&up, b"12345").unwrap();
    let down = remote.path().join("down.bin");
    std::fs::write(&down, b"1234567").unwrap();

    let (addr, server) = server::spawn();
    let mut sc = connect(addr);
    let ok = commands::push(&mut sc, &NoopLogger, &[s(&up)], &s(remote.path().join("up.bin")))
        .unwrap();
    assert!(ok);
    let ok = commands::pull(
        &mut sc,
        &NoopLogger,
        &[s(&down)],
        &s(local.path().join("down.bin")),
        false,
    )
    .unwrap();
    assert!(ok);
    assert_eq!(sc.total_bytes(), 5 + 7);
    finish(sc, server);
}
