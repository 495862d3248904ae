//! Read-only memory-mapped files.
//!
//! Thin RAII wrapper over `memmap2`, used by the index cache loader so a
//! cache file can be validated and decoded without buffering it. The
//! mapping is dropped (and unmapped) when the value goes out of scope.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

/// A read-only memory mapping of a whole file.
pub struct MmapFile {
    // None for zero-length files, which cannot be mapped portably.
    map: Option<Mmap>,
}

impl MmapFile {
    /// Map `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self { map: None });
        }
        // SAFETY: the mapping is read-only; mutation of the underlying file
        // by other processes makes the view stale, which the cache layer
        // tolerates by validating content before use.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl Deref for MmapFile {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_maps_file_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"a,b,c\n").unwrap();
        let map = MmapFile::open(tmp.path()).unwrap();
        assert_eq!(&map[..], b"a,b,c\n");
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_empty_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let map = MmapFile::open(tmp.path()).unwrap();
        assert!(map.is_empty());
        assert_eq!(&map[..], b"");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(MmapFile::open("/nonexistent/vroomcsv-test").is_err());
    }
}
