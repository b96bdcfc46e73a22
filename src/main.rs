use std::net::TcpStream;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tether::commands;
use tether::logger::{JsonLogger, Logger, NoopLogger, TextLogger};
use tether::printer::ConsolePrinter;
use tether::session::SyncSession;

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Push, pull and mirror file trees on a remote device"
)]
struct Cli {
    /// Device address (host:port)
    #[arg(long, default_value = "127.0.0.1:7171", global = true)]
    addr: String,

    /// DATA chunk size in bytes
    #[arg(long, global = true)]
    chunk: Option<usize>,

    /// Append a transfer log to this file
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Write the transfer log as JSON lines instead of text
    #[arg(long, global = true, requires = "log")]
    log_json: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a remote directory
    Ls {
        /// Remote directory path
        path: String,
    },
    /// Copy local files or trees to the remote
    Push {
        /// Sources, then the remote destination last
        #[arg(num_args = 2..)]
        paths: Vec<String>,
    },
    /// Copy remote files or trees to this host
    Pull {
        /// Also apply remote mtime and mode to pulled files
        #[arg(short = 'a', long)]
        copy_attrs: bool,
        /// Sources, then the local destination last
        #[arg(num_args = 2..)]
        paths: Vec<String>,
    },
    /// Push only the files whose remote copy is out of date
    Sync {
        /// Show what would be pushed without sending anything
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Local tree root
        local: String,
        /// Remote tree root
        remote: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let log = make_logger(&cli)?;

    let stream = TcpStream::connect(&cli.addr)
        .with_context(|| format!("connect failed: {}", cli.addr))?;
    stream.set_nodelay(true).ok();

    let mut sc = SyncSession::new(stream, Box::new(ConsolePrinter::new()));
    if let Some(chunk) = cli.chunk {
        anyhow::ensure!(chunk > 0, "chunk size must be nonzero");
        sc = sc.with_chunk_size(chunk);
    }

    let ok = match &cli.cmd {
        Command::Ls { path } => match commands::list(&mut sc, path) {
            Ok(()) => true,
            Err(e) => {
                sc.report(&e);
                false
            }
        },
        Command::Push { paths } => {
            let (dst, srcs) = split_dest(paths)?;
            match commands::push(&mut sc, log.as_ref(), srcs, dst) {
                Ok(ok) => ok,
                Err(e) => {
                    sc.report(&e);
                    false
                }
            }
        }
        Command::Pull { copy_attrs, paths } => {
            let (dst, srcs) = split_dest(paths)?;
            match commands::pull(&mut sc, log.as_ref(), srcs, dst, *copy_attrs) {
                Ok(ok) => ok,
                Err(e) => {
                    sc.report(&e);
                    false
                }
            }
        }
        Command::Sync {
            dry_run,
            local,
            remote,
        } => match commands::sync(&mut sc, log.as_ref(), local, remote, *dry_run) {
            Ok(()) => true,
            Err(e) => {
                sc.report(&e);
                false
            }
        },
    };
    Ok(ok)
}

fn make_logger(cli: &Cli) -> Result<Box<dyn Logger>> {
    Ok(match &cli.log {
        None => Box::new(NoopLogger),
        Some(path) if cli.log_json => {
            Box::new(JsonLogger::new(path).context("open transfer log")?)
        }
        Some(path) => Box::new(TextLogger::new(path).context("open transfer log")?),
    })
}

/// Clap collects `SRC... DST` as one list; the destination is the last one.
fn split_dest(paths: &[String]) -> Result<(&str, &[String])> {
    match paths.split_last() {
        Some((dst, srcs)) if !srcs.is_empty() => Ok((dst.as_str(), srcs)),
        _ => anyhow::bail!("need at least one source and a destination"),
    }
}
