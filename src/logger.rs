use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Opens a log file for appending, creating missing ancestors. A log
/// destination that cannot be opened is a hard error, not a silent no-op.
fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory for {}", path.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open transfer log {}", path.display()))
}

/// Transfer log hook. Every method has a no-op default so sinks implement
/// only what they care about.
pub trait Logger: Send + Sync {
    fn pushed(&self, _src: &str, _dst: &str, _bytes: u64) {}
    fn pulled(&self, _src: &str, _dst: &str, _bytes: u64) {}
    fn skipped(&self, _src: &str) {}
    fn error(&self, _context: &str, _path: &str, _msg: &str) {}
    fn done(&self, _transferred: u64, _skipped: u64, _bytes: u64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Timestamped plain-text log, appended to a file. Lines are flushed as
/// they are written so a crashed transfer still leaves its trail.
pub struct TextLogger {
    out: Mutex<BufWriter<File>>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = open_log(path.as_ref())?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    fn line(&self, s: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        if writeln!(out, "{stamp} {s}").is_ok() {
            let _ = out.flush();
        }
    }
}

impl Logger for TextLogger {
    fn pushed(&self, src: &str, dst: &str, bytes: u64) {
        self.line(&format!("PUSH src={src} dst={dst} bytes={bytes}"));
    }
    fn pulled(&self, src: &str, dst: &str, bytes: u64) {
        self.line(&format!("PULL src={src} dst={dst} bytes={bytes}"));
    }
    fn skipped(&self, src: &str) {
        self.line(&format!("SKIP src={src}"));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} path={path} msg={msg}"));
    }
    fn done(&self, transferred: u64, skipped: u64, bytes: u64) {
        self.line(&format!(
            "DONE transferred={transferred} skipped={skipped} bytes={bytes}"
        ));
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dst: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transferred: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<u64>,
}

/// One JSON object per line, appended to a file. Machine-readable twin of
/// [`TextLogger`].
pub struct JsonLogger {
    file: Mutex<File>,
}

impl JsonLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = open_log(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn record(&self, rec: &JsonRecord<'_>) {
        if let Ok(mut f) = self.file.lock() {
            if serde_json::to_writer(&mut *f, rec).is_ok() {
                let _ = f.write_all(b"\n");
            }
        }
    }

    fn event(event: &str) -> JsonRecord<'_> {
        JsonRecord {
            timestamp: Utc::now().to_rfc3339(),
            event,
            src: None,
            dst: None,
            bytes: None,
            msg: None,
            transferred: None,
            skipped: None,
        }
    }
}

impl Logger for JsonLogger {
    fn pushed(&self, src: &str, dst: &str, bytes: u64) {
        self.record(&JsonRecord {
            src: Some(src),
            dst: Some(dst),
            bytes: Some(bytes),
            ..Self::event("push")
        });
    }
    fn pulled(&self, src: &str, dst: &str, bytes: u64) {
        self.record(&JsonRecord {
            src: Some(src),
            dst: Some(dst),
            bytes: Some(bytes),
            ..Self::event("pull")
        });
    }
    fn skipped(&self, src: &str) {
        self.record(&JsonRecord {
            src: Some(src),
            ..Self::event("skip")
        });
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.record(&JsonRecord {
            src: Some(path),
            msg: Some(msg),
            ..Self::event(context)
        });
    }
    fn done(&self, transferred: u64, skipped: u64, bytes: u64) {
        self.record(&JsonRecord {
            bytes: Some(bytes),
            transferred: Some(transferred),
            skipped: Some(skipped),
            ..Self::event("done")
        });
    }
}
