//! fsprobe drives every platform-fs operation from the command line.
//!
//! Each subcommand maps onto one library call so the integration runner can
//! exercise the layer from separate processes, which is the only way to
//! observe POSIX record lock contention.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use serde::Serialize;

use platform_fs::{DirEntry, DirWalk, FileKind, Handle, LockFlags, Map, OpenFlags, Whence};

/// Exit status used when a non-blocking lock is already held elsewhere.
const EXIT_WOULD_BLOCK: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "fsprobe", version, about = "Exercise the platform-fs layer")]
struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print size, kind, modification time and read-only state
    Stat {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Map a file and copy it to stdout
    Cat { path: PathBuf },
    /// Read a byte range through an open handle
    Read {
        path: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Bytes to read (default: to the end of the file)
        #[arg(long)]
        len: Option<u64>,
    },
    /// Copy stdin into a file
    Write {
        path: PathBuf,
        #[arg(long)]
        append: bool,
        #[arg(long)]
        truncate: bool,
        #[arg(long)]
        create: bool,
        /// Fail if the file exists (only meaningful with --create)
        #[arg(long)]
        exclusive: bool,
    },
    /// Set the file length
    Truncate { path: PathBuf, len: u64 },
    /// Take a whole-file lock and hold it
    Lock {
        path: PathBuf,
        #[arg(long)]
        shared: bool,
        #[arg(long)]
        nowait: bool,
        /// Milliseconds to hold the lock after printing LOCKED
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
    },
    /// List a directory
    Ls {
        path: PathBuf,
        #[arg(long)]
        json: bool,
        /// Print batch boundaries
        #[arg(long, conflicts_with = "json")]
        batches: bool,
    },
    /// Print the working directory
    Cwd,
    /// Check that mapped bytes match the bytes read through a handle
    Verify { path: PathBuf },
    /// Connect to a TCP address and send the whole file with sendfile
    Serve { path: PathBuf, addr: String },
}

#[derive(Serialize)]
struct StatJson {
    size: u64,
    kind: &'static str,
    mtime: i64,
    readonly: bool,
}

#[derive(Serialize)]
struct EntryJson {
    name: String,
    is_dir: bool,
    mtime: i64,
}

impl From<&DirEntry> for EntryJson {
    fn from(entry: &DirEntry) -> Self {
        EntryJson {
            name: entry.name().to_string_lossy().into_owned(),
            is_dir: entry.is_dir(),
            mtime: entry.mtime(),
        }
    }
}

fn kind_name(kind: FileKind) -> &'static str {
    match kind {
        FileKind::File => "file",
        FileKind::Dir => "dir",
        FileKind::Other => "other",
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match run(args.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Stat { path, json } => cmd_stat(&path, json)?,
        Command::Cat { path } => cmd_cat(&path)?,
        Command::Read { path, offset, len } => cmd_read(&path, offset, len)?,
        Command::Write {
            path,
            append,
            truncate,
            create,
            exclusive,
        } => {
            let mut flags = OpenFlags::WRONLY;
            flags.set(OpenFlags::APPEND, append);
            flags.set(OpenFlags::TRUNC, truncate);
            flags.set(OpenFlags::CREAT, create);
            flags.set(OpenFlags::EXCL, exclusive);
            cmd_write(&path, flags)?
        }
        Command::Truncate { path, len } => {
            let file = Handle::open(&path, OpenFlags::WRONLY)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            file.truncate(len)
                .with_context(|| format!("Failed to truncate {}", path.display()))?;
            file.close()?;
        }
        Command::Lock {
            path,
            shared,
            nowait,
            hold_ms,
        } => return cmd_lock(&path, shared, nowait, hold_ms),
        Command::Ls {
            path,
            json,
            batches,
        } => cmd_ls(&path, json, batches)?,
        Command::Cwd => {
            let cwd = platform_fs::getcwd().context("Failed to get working directory")?;
            println!("{}", cwd.display());
        }
        Command::Verify { path } => cmd_verify(&path)?,
        Command::Serve { path, addr } => cmd_serve(&path, &addr)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_stat(path: &Path, json: bool) -> Result<()> {
    let st = platform_fs::stat(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    let out = StatJson {
        size: st.size(),
        kind: kind_name(st.kind()),
        mtime: st.mtime(),
        readonly: st.readonly(),
    };
    if json {
        println!("{}", serde_json::to_string(&out)?);
    } else {
        println!(
            "size={} kind={} mtime={} readonly={}",
            out.size, out.kind, out.mtime, out.readonly
        );
    }
    Ok(())
}

fn cmd_cat(path: &Path) -> Result<()> {
    let map = Map::open(path).with_context(|| format!("Failed to map {}", path.display()))?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&map)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_read(path: &Path, offset: u64, len: Option<u64>) -> Result<()> {
    let file = Handle::open(path, OpenFlags::RDONLY)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let len = match len {
        Some(len) => len,
        None => file.stat()?.size().saturating_sub(offset),
    };
    let offset = i64::try_from(offset).context("Offset out of range")?;
    file.seek(offset, Whence::Set)?;

    let mut buf = vec![0u8; usize::try_from(len).context("Length out of range")?];
    let n = file.read(&mut buf)?;
    log::debug!("read {} of {} requested bytes", n, buf.len());

    let mut stdout = io::stdout().lock();
    stdout.write_all(&buf[..n])?;
    stdout.flush()?;
    Ok(())
}

fn cmd_write(path: &Path, flags: OpenFlags) -> Result<()> {
    let mut data = Vec::new();
    io::stdin()
        .read_to_end(&mut data)
        .context("Failed to read stdin")?;

    let file =
        Handle::open(path, flags).with_context(|| format!("Failed to open {}", path.display()))?;
    let n = file.write(&data)?;
    file.close()?;
    println!("{}", n);
    Ok(())
}

fn cmd_lock(path: &Path, shared: bool, nowait: bool, hold_ms: u64) -> Result<ExitCode> {
    let file = Handle::open(path, if shared { OpenFlags::RDONLY } else { OpenFlags::RDWR })
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut flags = if shared {
        LockFlags::SHARE
    } else {
        LockFlags::EXCL
    };
    flags.set(LockFlags::NOWAIT, nowait);

    match file.lock(flags) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            println!("WOULD_BLOCK");
            return Ok(ExitCode::from(EXIT_WOULD_BLOCK));
        }
        Err(err) => return Err(err).context("Failed to lock"),
    }

    println!("LOCKED");
    io::stdout().flush()?;
    thread::sleep(Duration::from_millis(hold_ms));

    file.lock(LockFlags::UNLOCK).context("Failed to unlock")?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_ls(path: &Path, json: bool, batches: bool) -> Result<()> {
    let mut walk =
        DirWalk::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    if json {
        let mut entries = Vec::new();
        for entry in walk {
            entries.push(EntryJson::from(&entry?));
        }
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let mut stdout = io::stdout().lock();
    let mut batch = 0;
    loop {
        if batches {
            writeln!(stdout, "# batch {}", batch)?;
        }
        while let Some(entry) = walk.next_entry() {
            let marker = if entry.is_dir() { "/" } else { "" };
            writeln!(stdout, "{}{}", entry.name().to_string_lossy(), marker)?;
        }
        if !walk.buffer()? {
            break;
        }
        batch += 1;
    }
    walk.close();
    Ok(())
}

fn cmd_verify(path: &Path) -> Result<()> {
    let map = Map::open(path).with_context(|| format!("Failed to map {}", path.display()))?;

    let file = Handle::open(path, OpenFlags::RDONLY)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut buf = vec![0u8; map.len()];
    let n = file.read(&mut buf)?;
    file.close()?;

    if n != map.len() {
        bail!("Short read: {} of {} bytes", n, map.len());
    }
    if buf[..] != map[..] {
        bail!("Mapped bytes differ from read bytes");
    }
    map.unmap();
    println!("OK {}", n);
    Ok(())
}

#[cfg(unix)]
fn cmd_serve(path: &Path, addr: &str) -> Result<()> {
    use std::net::TcpStream;

    let file = Handle::open(path, OpenFlags::RDONLY)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let size = usize::try_from(file.stat()?.size()).context("File too large")?;

    let socket = TcpStream::connect(addr).with_context(|| format!("Failed to connect to {}", addr))?;
    let sent = platform_fs::sendfile(&socket, &file, size)?;
    log::info!("sent {} bytes to {}", sent, addr);

    if sent != size {
        bail!("Sent {} of {} bytes", sent, size);
    }
    println!("{}", sent);
    Ok(())
}

#[cfg(not(unix))]
fn cmd_serve(_path: &Path, _addr: &str) -> Result<()> {
    bail!("serve needs sendfile, which is only available on Unix")
}
