//! Destinations for received files.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Streaming write target for one received file.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    async fn close(self: Box<Self>) -> io::Result<()>;
}

#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, file_name: &str, expected_size: u64) -> io::Result<Box<dyn Sink>>;
}

/// Reduce a peer-supplied file name to its final path component.
pub fn sanitize_file_name(raw: &str) -> String {
    let last = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match last {
        "" | "." | ".." => "download".to_string(),
        name => name.to_string(),
    }
}

/// Writes received files into a directory, never overwriting existing ones.
#[derive(Debug, Clone)]
pub struct DirectorySinks {
    dir: PathBuf,
}

impl DirectorySinks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new file for `file_name`, appending ` (n)` to the stem until
    /// the name is free. Never opens an existing file.
    async fn create_unique(&self, file_name: &str) -> io::Result<(PathBuf, fs::File)> {
        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        let ext = path.extension().and_then(|e| e.to_str());

        let mut n = 0;
        loop {
            let name = match (n, ext) {
                (0, _) => file_name.to_string(),
                (_, Some(ext)) => format!("{stem} ({n}).{ext}"),
                (_, None) => format!("{stem} ({n})"),
            };
            let candidate = self.dir.join(name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

struct FileSink {
    path: PathBuf,
    writer: BufWriter<fs::File>,
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn close(mut self: Box<Self>) -> io::Result<()> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        debug!(path = %self.path.display(), "Closed download");
        Ok(())
    }
}

#[async_trait]
impl SinkFactory for DirectorySinks {
    async fn open(&self, file_name: &str, expected_size: u64) -> io::Result<Box<dyn Sink>> {
        fs::create_dir_all(&self.dir).await?;
        let (path, file) = self.create_unique(&sanitize_file_name(file_name)).await?;
        info!(path = %path.display(), size = expected_size, "Receiving file");
        Ok(Box::new(FileSink {
            path,
            writer: BufWriter::new(file),
        }))
    }
}

/// Keeps received files in memory, keyed by name. Closed files only.
#[derive(Debug, Clone, Default)]
pub struct MemorySinks {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(file_name).cloned())
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MemorySink {
    name: String,
    buf: Vec<u8>,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn close(self: Box<Self>) -> io::Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink poisoned"))?;
        files.insert(self.name, self.buf);
        Ok(())
    }
}

#[async_trait]
impl SinkFactory for MemorySinks {
    async fn open(&self, file_name: &str, expected_size: u64) -> io::Result<Box<dyn Sink>> {
        Ok(Box::new(MemorySink {
            name: sanitize_file_name(file_name),
            buf: Vec::with_capacity(expected_size.min(64 * 1024 * 1024) as usize),
            files: self.files.clone(),
        }))
    }
}
