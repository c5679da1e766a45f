//! Physical file storage for Cumulus.
//!
//! Mirrors tree mutations on disk under a shared root:
//! ```text
//! {root}/
//! ├── 1/                 user 1's root folder
//! │   ├── docs/
//! │   │   └── a.txt
//! │   └── photo.png
//! └── 2/
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::path::PathResolver;
use crate::{CumulusError, Result};

/// Boxed stream of file or archive bytes.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_BUFFER_CHUNKS: usize = 8;

/// Physical storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    resolver: PathResolver,
    chunk_size: usize,
    buffer_chunks: usize,
}

impl FileStorage {
    /// Create a new FileStorage with the given root.
    ///
    /// The root directory will be created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            resolver: PathResolver::new(root),
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_chunks: DEFAULT_BUFFER_CHUNKS,
        })
    }

    /// Set the chunk size and read-ahead window of outgoing streams.
    pub fn with_stream_settings(mut self, chunk_size: usize, buffer_chunks: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.buffer_chunks = buffer_chunks.max(1);
        self
    }

    /// The path resolver for this root.
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Create the user's root folder if missing.
    pub async fn ensure_user_root(&self, user_id: i64) -> Result<PathBuf> {
        let path = self.resolver.user_root(user_id);
        fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Create one directory. The parent must already exist.
    pub async fn create_directory(&self, path: &Path) -> Result<()> {
        match fs::create_dir(path).await {
            Ok(()) => {
                debug!("Created directory {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(
                CumulusError::AlreadyExists(format!("directory {}", path.display())),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a new file. Never overwrites an existing one.
    ///
    /// A partially written file is removed before the error is returned.
    pub async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(CumulusError::Conflict(format!(
                    "file {} already exists",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(content).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(path).await {
                warn!("Failed to remove partial file {:?}: {}", path, cleanup);
            }
            return Err(e.into());
        }

        debug!("Wrote {} bytes to {:?}", content.len(), path);
        Ok(())
    }

    /// Remove a file, or a directory and everything beneath it.
    ///
    /// A missing path is not an error. Returns whether anything was removed.
    pub async fn delete_recursive(&self, path: &Path) -> Result<bool> {
        let meta = match fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Nothing to delete at {:?}", path);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let result = if meta.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        };

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream a file's bytes in chunks.
    pub async fn open_stream(&self, path: &Path) -> Result<ByteStream> {
        let file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CumulusError::NotFound(format!("file {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ReaderStream::with_capacity(file, self.chunk_size).boxed())
    }

    /// Stream a zip archive of everything beneath a directory.
    ///
    /// Entries are named relative to `path`. Compression runs on a blocking
    /// thread that stays at most `buffer_chunks` chunks ahead of the reader;
    /// dropping the stream stops it and closes any open file.
    pub async fn archive_directory(&self, path: &Path) -> Result<ByteStream> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(CumulusError::Validation(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CumulusError::NotFound(format!(
                    "directory {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let (tx, rx) = mpsc::channel(self.buffer_chunks);
        let root = path.to_path_buf();
        let chunk_size = self.chunk_size;

        tokio::task::spawn_blocking(move || {
            let writer = ChannelWriter::new(tx.clone(), chunk_size);
            match write_archive(&root, writer) {
                Ok(()) => debug!("Archive of {:?} complete", root),
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("Archive reader for {:?} went away", root);
                }
                Err(e) => {
                    warn!("Archive of {:?} failed: {}", root, e);
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
}

fn zip_error(e: ZipError) -> io::Error {
    match e {
        ZipError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// Entry name of `path` inside an archive of `root`, `/`-separated.
fn entry_name(root: &Path, path: &Path) -> io::Result<String> {
    let relative = path.strip_prefix(root).map_err(io::Error::other)?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn write_archive(root: &Path, writer: ChannelWriter) -> io::Result<()> {
    let mut zip = ZipWriter::new_stream(writer);

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let name = entry_name(root, entry.path())?;

        if entry.file_type().is_dir() {
            zip.add_directory(name, entry_options()).map_err(zip_error)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, entry_options()).map_err(zip_error)?;
            let mut file = std::fs::File::open(entry.path())?;
            io::copy(&mut file, &mut zip)?;
        }
    }

    zip.finish().map_err(zip_error)?;
    Ok(())
}

/// Sync writer feeding fixed-size chunks into a bounded channel.
///
/// Blocks when the channel is full; fails with `BrokenPipe` once the
/// receiving stream is dropped.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
    chunk_size: usize,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>, chunk_size: usize) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        self.tx
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive reader closed"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= self.chunk_size {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        let _ = self.send_buffered();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_create_directory_conflict() {
        let (_temp, storage) = setup();
        let root = storage.ensure_user_root(1).await.unwrap();
        let dir = root.join("docs");

        storage.create_directory(&dir).await.unwrap();
        assert!(dir.is_dir());

        let err = storage.create_directory(&dir).await.unwrap_err();
        assert!(matches!(err, CumulusError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_create_directory_requires_parent() {
        let (_temp, storage) = setup();
        let root = storage.ensure_user_root(1).await.unwrap();

        let err = storage
            .create_directory(&root.join("missing").join("child"))
            .await
            .unwrap_err();
        assert!(matches!(err, CumulusError::Io(_)));
    }

    #[tokio::test]
    async fn test_write_file_no_overwrite() {
        let (_temp, storage) = setup();
        let root = storage.ensure_user_root(1).await.unwrap();
        let path = root.join("a.txt");

        storage.write_file(&path, b"first").await.unwrap();
        let err = storage.write_file(&path, b"second").await.unwrap_err();
        assert!(matches!(err, CumulusError::Conflict(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_delete_recursive() {
        let (_temp, storage) = setup();
        let root = storage.ensure_user_root(1).await.unwrap();
        let dir = root.join("docs");
        storage.create_directory(&dir).await.unwrap();
        storage.create_directory(&dir.join("deep")).await.unwrap();
        storage
            .write_file(&dir.join("deep").join("x.bin"), &[1, 2, 3])
            .await
            .unwrap();

        assert!(storage.delete_recursive(&dir).await.unwrap());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let (_temp, storage) = setup();
        let root = storage.ensure_user_root(1).await.unwrap();
        assert!(!storage.delete_recursive(&root.join("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_stream() {
        let (_temp, storage) = setup();
        let storage = storage.with_stream_settings(4, 2);
        let root = storage.ensure_user_root(1).await.unwrap();
        let path = root.join("data.txt");
        storage.write_file(&path, b"hello, world").await.unwrap();

        let bytes = collect(storage.open_stream(&path).await.unwrap()).await;
        assert_eq!(bytes, b"hello, world");

        let missing = storage.open_stream(&root.join("nope")).await;
        assert!(matches!(missing, Err(CumulusError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_archive_preserves_relative_paths() {
        let (_temp, storage) = setup();
        let storage = storage.with_stream_settings(512, 2);
        let root = storage.ensure_user_root(1).await.unwrap();
        let docs = root.join("docs");
        storage.create_directory(&docs).await.unwrap();
        storage.create_directory(&docs.join("sub")).await.unwrap();
        storage.create_directory(&docs.join("empty")).await.unwrap();
        storage.write_file(&docs.join("a.txt"), b"alpha").await.unwrap();
        storage
            .write_file(&docs.join("sub").join("b.txt"), &vec![7u8; 10_000])
            .await
            .unwrap();

        let bytes = collect(storage.archive_directory(&docs).await.unwrap()).await;
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "empty/", "sub/", "sub/b.txt"]);

        let mut content = String::new();
        archive
            .by_name("a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "alpha");

        let mut big = Vec::new();
        archive.by_name("sub/b.txt").unwrap().read_to_end(&mut big).unwrap();
        assert_eq!(big.len(), 10_000);
    }

    #[tokio::test]
    async fn test_archive_missing_directory() {
        let (_temp, storage) = setup();
        let root = storage.ensure_user_root(1).await.unwrap();
        let result = storage.archive_directory(&root.join("nope")).await;
        assert!(matches!(result, Err(CumulusError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_archive_of_file_rejected() {
        let (_temp, storage) = setup();
        let root = storage.ensure_user_root(1).await.unwrap();
        storage.write_file(&root.join("f"), b"x").await.unwrap();
        let result = storage.archive_directory(&root.join("f")).await;
        assert!(matches!(result, Err(CumulusError::Validation(_))));
    }

    #[tokio::test]
    async fn test_archive_dropped_early() {
        let (_temp, storage) = setup();
        let storage = storage.with_stream_settings(16, 1);
        let root = storage.ensure_user_root(1).await.unwrap();
        for i in 0..20 {
            storage
                .write_file(&root.join(format!("f{i}.bin")), &vec![i as u8; 4096])
                .await
                .unwrap();
        }

        let mut stream = storage.archive_directory(&root).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(stream);

        // The writer notices the closed channel and releases its files.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(storage.delete_recursive(&root).await.unwrap());
    }

    #[test]
    fn test_entry_name() {
        let root = Path::new("/a/b");
        assert_eq!(entry_name(root, Path::new("/a/b/c/d.txt")).unwrap(), "c/d.txt");
        assert!(entry_name(root, Path::new("/x")).is_err());
    }
}
