//! Read access to workspace files
//!
//! Documents the client never opened are read through this seam. Tests use
//! the generated `MockFileSystem` or the in-memory [`MemoryFileSystem`].

use std::io;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
pub trait FileSystem: Send + Sync {
    /// True for regular files only; directories cannot back a document
    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}


#[cfg(test)]
pub use memory::MemoryFileSystem;
