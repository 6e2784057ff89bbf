//! Shared, read-only storage for the bytes of a Portable PDB file.

use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

#[derive(Debug)]
enum Storage<'data> {
    Borrowed(&'data [u8]),
    Owned(Vec<u8>),
    Mapped(Mmap),
}

/// An immutable byte buffer that a [`PortablePdbFile`](crate::PortablePdbFile) reads from.
///
/// The buffer is either borrowed, owned, or memory mapped from a file. Clones share the same
/// storage, and the contents never change after construction.
///
/// ```
/// use ppdb_reader::ByteView;
///
/// let view = ByteView::from_slice(b"BSJB");
/// assert_eq!(view.as_slice(), b"BSJB");
/// ```
#[derive(Clone, Debug)]
pub struct ByteView<'data> {
    storage: Arc<Storage<'data>>,
}

impl<'data> ByteView<'data> {
    fn new(storage: Storage<'data>) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    /// Borrows a byte slice.
    pub fn from_slice(buffer: &'data [u8]) -> Self {
        Self::new(Storage::Borrowed(buffer))
    }

    /// Takes ownership of a vector of bytes.
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        Self::new(Storage::Owned(buffer))
    }

    /// Opens and memory maps the file at `path`.
    ///
    /// Empty files cannot be mapped and yield an empty view instead.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self::from_vec(Vec::new()));
        }

        // SAFETY: PDB files are treated as read-only inputs. Truncating a mapped file from
        // another process is outside of what this reader can guard against.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::new(Storage::Mapped(mmap)))
    }

    /// Returns the viewed bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match *self.storage {
            Storage::Borrowed(buf) => buf,
            Storage::Owned(ref buf) => buf,
            Storage::Mapped(ref mmap) => mmap,
        }
    }
}

impl Deref for ByteView<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use similar_asserts::assert_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_empty_file() -> Result<(), io::Error> {
        let tmp = NamedTempFile::new()?;

        let view = ByteView::open(tmp.path())?;
        assert_eq!(view.as_slice(), b"");

        Ok(())
    }

    #[test]
    fn test_open_file() -> Result<(), io::Error> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"BSJB\x01\x00")?;
        tmp.flush()?;

        let view = ByteView::open(tmp.path())?;
        assert_eq!(view.as_slice(), b"BSJB\x01\x00");

        Ok(())
    }

    #[test]
    fn test_open_missing_file() {
        let err = ByteView::open("does/not/exist.pdb").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_clones_share_storage() {
        let view = ByteView::from_vec(vec![1, 2, 3]);
        let clone = view.clone();
        assert_eq!(view.as_ptr(), clone.as_ptr());
        assert_eq!(clone.len(), 3);
    }
}
