//! Journal module for per-unit logging.
//!
//! Every unit owns a [`Journal`]: a line-oriented sink that writes each line
//! with a timestamp and the unit's canonical name both to the console and
//! to a size-rotated file pair (`<name>.out.log` and `<name>.err.log`).

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Timestamp layout used at the start of every line.
pub const DATE_LAYOUT: &str = "%H:%M:%S%.3f";

/// Size above which a journal file is archived.
pub const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Number of archives kept per journal file before ids wrap around.
pub const MAX_FILE_COUNT: u64 = 5;

/// Current wall-clock time in the journal layout.
pub fn timestamp() -> String {
    Local::now().format(DATE_LAYOUT).to_string()
}

/// Stream a journal line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
}

/// An append-only file archived by numeric suffix once it grows too big.
///
/// `<dir>/<name>.log` is the live file, archives are `<dir>/<name>.<id>.log`.
#[derive(Debug)]
pub struct LogFile {
    dir: PathBuf,
    name: String,
    file: File,
    size: u64,
    max_size: u64,
    max_count: u64,
}

impl LogFile {
    /// Open (or create) the live file.
    pub fn open(dir: &Path, name: &str, max_size: u64, max_count: u64) -> io::Result<Self> {
        let (file, size) = open_append(&dir.join(format!("{}.log", name)))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            file,
            size,
            max_size,
            max_count,
        })
    }

    /// Path of the live file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }

    fn archive_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.{}.log", self.name, id))
    }

    /// One greater than the largest archive id on disk, wrapping to 1.
    fn next_archive_id(&self) -> io::Result<u64> {
        let prefix = format!("{}.", self.name);
        let mut id = 0;

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let current = file_name
                .strip_prefix(&prefix)
                .and_then(|s| s.strip_suffix(".log"))
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(current) = current {
                id = id.max(current);
            }
        }

        id += 1;
        if self.max_count > 0 && id > self.max_count {
            id = 1;
        }
        Ok(id)
    }

    fn reallocate(&mut self) -> io::Result<()> {
        let id = self.next_archive_id()?;
        let archive = self.archive_path(id);

        // the id may have wrapped around onto an old archive
        let _ = std::fs::remove_file(&archive);
        std::fs::rename(self.path(), &archive)?;

        let (file, size) = open_append(&self.path())?;
        self.file = file;
        self.size = size;
        Ok(())
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.size += n as u64;
        if self.size > self.max_size {
            self.reallocate()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

/// Per-unit logging sink.
#[derive(Debug)]
pub struct Journal {
    prefix: String,
    out: Mutex<LogFile>,
    err: Mutex<LogFile>,
    console: bool,
}

impl Journal {
    /// Create a journal writing `<dir>/<filename>.out.log` and
    /// `<dir>/<filename>.err.log`, prefixing every line with `[<name>]`.
    pub fn new(dir: &Path, name: &str, filename: &str) -> io::Result<Self> {
        let out = LogFile::open(
            dir,
            &format!("{}.out", filename),
            MAX_FILE_SIZE,
            MAX_FILE_COUNT,
        )?;
        let err = LogFile::open(
            dir,
            &format!("{}.err", filename),
            MAX_FILE_SIZE,
            MAX_FILE_COUNT,
        )?;
        Ok(Self {
            prefix: format!(" [{}] ", name),
            out: Mutex::new(out),
            err: Mutex::new(err),
            console: true,
        })
    }

    /// Stop mirroring lines to stdout/stderr.
    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    /// Write a standard line.
    pub fn print(&self, message: impl AsRef<str>) {
        self.append(Stream::Out, message.as_ref().as_bytes());
    }

    /// Write an error line.
    pub fn error(&self, message: impl AsRef<str>) {
        self.append(Stream::Err, message.as_ref().as_bytes());
    }

    /// Copy a child's stdout into the journal until EOF.
    pub async fn stream_out<R: AsyncRead + Unpin>(&self, reader: R) {
        self.stream(Stream::Out, reader).await
    }

    /// Copy a child's stderr into the journal until EOF.
    pub async fn stream_err<R: AsyncRead + Unpin>(&self, reader: R) {
        self.stream(Stream::Err, reader).await
    }

    async fn stream<R: AsyncRead + Unpin>(&self, stream: Stream, reader: R) {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    // a final line without newline still counts
                    if line.last() == Some(&b'\n') {
                        line.pop();
                    }
                    self.append(stream, &line);
                }
                Err(_) => break,
            }
        }
    }

    fn append(&self, stream: Stream, message: &[u8]) {
        let mut buf = Vec::with_capacity(message.len() + self.prefix.len() + 16);
        buf.extend_from_slice(timestamp().as_bytes());
        buf.extend_from_slice(self.prefix.as_bytes());
        buf.extend_from_slice(message);
        buf.push(b'\n');

        if self.console {
            let _ = match stream {
                Stream::Out => io::stdout().lock().write_all(&buf),
                Stream::Err => io::stderr().lock().write_all(&buf),
            };
        }

        let file = match stream {
            Stream::Out => &self.out,
            Stream::Err => &self.err,
        };
        let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = file.write_all(&buf) {
            tracing::warn!(error = %e, "Failed to write journal line to file");
        }
    }
}
