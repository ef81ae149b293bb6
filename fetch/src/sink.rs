//! Destinations for validated document bytes.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tempfile::TempDir;

use crate::sniff::SupportedMime;

pub type SinkFut<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Receives the body once it has passed every limit and the sniffer.
pub trait ByteSink: Send {
    fn write_document<'a>(&'a mut self, bytes: Vec<u8>, mime: SupportedMime) -> SinkFut<'a>;
}

/// Writes the document into a private temporary directory.
///
/// The file is named from the detected type (`document.pdf`, ...). Dropping
/// the sink removes the directory and everything in it, so every exit path of
/// the owning request cleans up exactly once.
#[derive(Debug)]
pub struct TempFileSink {
    dir: TempDir,
    path: Option<PathBuf>,
}

impl TempFileSink {
    const PREFIX: &'static str = "docfetch-";

    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(Self::PREFIX).tempdir()?;
        Ok(Self { dir, path: None })
    }

    /// Create the temporary directory under `root`.
    pub fn new_in(root: impl AsRef<Path>) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(Self::PREFIX)
            .tempdir_in(root)?;
        Ok(Self { dir, path: None })
    }

    /// Path of the written document, once written.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failure instead of ignoring it.
    pub fn close(self) -> io::Result<()> {
        let dir = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(dir = %dir.display(), "Temporary file cleaned up");
        Ok(())
    }
}

impl ByteSink for TempFileSink {
    /// The write runs on the blocking pool.
    fn write_document<'a>(&'a mut self, bytes: Vec<u8>, mime: SupportedMime) -> SinkFut<'a> {
        Box::pin(async move {
            let path = self.dir.path().join(format!("document{}", mime.extension()));
            let target = path.clone();
            tokio::task::spawn_blocking(move || std::fs::write(target, bytes))
                .await
                .map_err(io::Error::other)??;
            self.path = Some(path);
            Ok(())
        })
    }
}
