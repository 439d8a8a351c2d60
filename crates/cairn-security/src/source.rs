use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Where certificate material is read from. Injected into the loaders so that
/// tests never touch the filesystem.
pub trait FileSource: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads from the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl FileSource for FsSource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Fixed in-memory file map.
#[derive(Debug, Clone, Default)]
pub struct MemSource {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

impl FileSource for MemSource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}
