//! Byte sources a [`crate::File`] can be parsed from.
//!
//! Module images come either from disk, mapped read-only, or from a buffer the caller already
//! holds (e.g. an image embedded in another file, or one built in a test). Both expose the same
//! bounds-checked view through [`Backend`].

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::{
    Error::{Error, FileError, OutOfBounds},
    Result,
};

/// Backend trait for file data sources.
///
/// Implementors only provide [`Backend::data`]; range checks are shared. All implementations
/// must be thread-safe, a `File` is read concurrently by every thread that attaches it.
pub trait Backend: Send + Sync {
    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the buffer holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range overflows or leaves the buffer.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(OutOfBounds)?;
        self.data().get(offset..end).ok_or(OutOfBounds)
    }
}

/// An image held in an owned buffer.
#[derive(Debug)]
pub struct Memory(Vec<u8>);

impl From<Vec<u8>> for Memory {
    fn from(data: Vec<u8>) -> Self {
        Memory(data)
    }
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        &self.0
    }
}

/// An image mapped read-only from disk.
#[derive(Debug)]
pub struct Physical(Mmap);

impl Physical {
    /// Maps the image at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened and
    /// [`crate::Error::Error`] if it cannot be mapped.
    pub fn open(path: &Path) -> Result<Physical> {
        let file = fs::File::open(path).map_err(FileError)?;

        // Read-only mapping, the image is never written through it
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|error| Error(format!("cannot map {} - {error}", path.display())))?;

        Ok(Physical(mmap))
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        &self.0
    }
}
