//! Terminal line printing with elide/full modes
//!
//! Progress lines render in elide mode: one terminal line, overwritten in
//! place and truncated to the terminal width. Errors and summaries render
//! in full mode and stay on screen. On dumb terminals everything falls
//! back to plain lines.

use std::io::{self, Write};

use crossterm::terminal;
use crossterm::tty::IsTty;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    /// Overwrite the previous elided line, truncating to the terminal width.
    Elide,
    /// Commit a full line of output.
    Full,
}

pub trait ProgressSink {
    fn print(&mut self, line: &str, mode: PrintMode);
    fn flush(&mut self);
}

/// Sink that drops everything. Used by tests and by embedders that render
/// progress themselves.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn print(&mut self, _line: &str, _mode: PrintMode) {}
    fn flush(&mut self) {}
}

pub struct ConsolePrinter {
    smart: bool,
    /// An elided line is on screen and has not been committed with a newline.
    pending: bool,
}

impl ConsolePrinter {
    pub fn new() -> Self {
        let smart = io::stdout().is_tty()
            && std::env::var("TERM").map_or(true, |t| t != "dumb");
        ConsolePrinter {
            smart,
            pending: false,
        }
    }

    fn width(&self) -> usize {
        terminal::size().map(|(w, _)| w as usize).unwrap_or(80)
    }

    fn elide(&self, line: &str) -> String {
        let width = self.width();
        if line.len() <= width || width < 4 {
            return line.to_string();
        }
        let mut end = width - 3;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &line[..end])
    }
}

impl Default for ConsolePrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsolePrinter {
    fn print(&mut self, line: &str, mode: PrintMode) {
        let mut out = io::stdout();
        if mode == PrintMode::Elide && self.smart {
            if line.ends_with('\n') {
                // Summary lines arrive through the elide path but must
                // persist: commit them over whatever was pending.
                let _ = write!(out, "\r\x1b[K{line}");
                self.pending = false;
            } else {
                let _ = write!(out, "\r\x1b[K{}", self.elide(line));
                self.pending = true;
            }
            let _ = out.flush();
            return;
        }
        if self.pending {
            let _ = writeln!(out);
            self.pending = false;
        }
        if line.ends_with('\n') {
            let _ = write!(out, "{line}");
        } else {
            let _ = writeln!(out, "{line}");
        }
        let _ = out.flush();
    }

    fn flush(&mut self) {
        if self.pending {
            let _ = writeln!(io::stdout());
            self.pending = false;
        }
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elide_respects_char_boundaries() {
        let p = ConsolePrinter {
            smart: false,
            pending: false,
        };
        // Multibyte names must not split mid-character.
        let line = "päth/üüüü/".repeat(40);
        let elided = p.elide(&line);
        assert!(elided.ends_with("..."));
        assert!(elided.len() <= p.width());
    }
}
