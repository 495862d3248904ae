//! On-disk index cache.
//!
//! Re-reading a large file usually means re-parsing bytes that have not
//! changed. The cache persists a [`ParseIndex`] next to its source (or under
//! the XDG cache directory when the source directory is not writable),
//! stamps it with the source's mtime and size, and refuses to load it when
//! either differs. Writes go through a temp file and an atomic rename so a
//! crashed writer can never leave a half-written cache behind.
//!
//! Every cache error is recoverable: the caller falls back to parsing the
//! source. Corrupt files are deleted on sight; disk-full on save is reported
//! through the warning callback and swallowed.
//!
//! ## File format
//!
//! Fixed-width little-endian header followed by the payload:
//!
//! ```text
//! magic (4) | version (1) | reserved (3) | source_mtime (8) |
//! source_size (8) | layout (1) | reserved (1) | n_threads (2) | columns (8)
//! ```
//!
//! Interleaved payload: `n_indexes[n_threads]`, then each lane's positions
//! in lane order. Flat payloads: `count`, then the positions. Incompatible
//! versions are invalidated, never upgraded.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use thiserror::Error;

use super::{IndexLayout, ParseIndex, THREAD_PAD};
use crate::mmap::MmapFile;

/// Identifies a vroomcsv index cache file.
pub const CACHE_MAGIC: [u8; 4] = *b"VCIX";

/// Bumped on incompatible format changes; mismatches invalidate the file.
pub const CACHE_FORMAT_VERSION: u8 = 1;

/// Extension appended to the source file name (or path hash).
pub const CACHE_EXTENSION: &str = ".vcidx";

const HEADER_LEN: usize = 36;

/// Why a cache operation did not produce an index. All variants are
/// recoverable by re-parsing the source.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("caching is disabled")]
    Disabled,

    #[error("no cache file exists for this source")]
    NotCached,

    #[error("cache file is corrupted: {0}")]
    Corrupted(String),

    #[error("cache format version {found} is not supported")]
    VersionMismatch { found: u8 },

    #[error("source file changed since the cache was written")]
    SourceChanged,

    #[error("source file not found or unreadable")]
    SourceNotFound,

    #[error("no writable location for the cache file")]
    NotWritable,

    #[error("disk full while writing cache file")]
    DiskFull,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Callback invoked with human-readable warnings (corrupt cache deleted,
/// disk full, …).
pub type WarningCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Cache behavior knobs.
#[derive(Clone, Default)]
pub struct CacheOptions {
    /// Disable to make every load report [`CacheError::Disabled`].
    pub disabled: bool,
    /// Overrides the same-dir/XDG placement entirely.
    pub cache_dir: Option<PathBuf>,
    /// Receives warnings about swallowed errors.
    pub warning: Option<WarningCallback>,
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("disabled", &self.disabled)
            .field("cache_dir", &self.cache_dir)
            .field("warning", &self.warning.as_ref().map(|_| "…"))
            .finish()
    }
}

/// Persists parse indexes keyed by source path.
#[derive(Clone, Debug, Default)]
pub struct IndexCache {
    options: CacheOptions,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CacheOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn enabled(&self) -> bool {
        !self.options.disabled
    }

    /// Where the cache file for `source` lives.
    ///
    /// Preference order: explicit override directory, the source's own
    /// directory when writable, then `$XDG_CACHE_HOME/vroomcsv` (or
    /// `~/.cache/vroomcsv`) with a stable hash of the source path as the
    /// file name.
    pub fn compute_path(&self, source: &Path) -> Result<PathBuf, CacheError> {
        let file_name = source
            .file_name()
            .ok_or(CacheError::SourceNotFound)?
            .to_string_lossy();

        if let Some(dir) = &self.options.cache_dir {
            return Ok(dir.join(format!("{file_name}{CACHE_EXTENSION}")));
        }

        let source_dir = source.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = source_dir {
            if is_dir_writable(dir) {
                return Ok(dir.join(format!("{file_name}{CACHE_EXTENSION}")));
            }
        } else if is_dir_writable(Path::new(".")) {
            return Ok(PathBuf::from(format!("{file_name}{CACHE_EXTENSION}")));
        }

        let xdg = xdg_cache_dir().ok_or(CacheError::NotWritable)?;
        fs::create_dir_all(&xdg)?;
        let hash = fnv1a(source.to_string_lossy().as_bytes());
        Ok(xdg.join(format!("{hash:016x}{CACHE_EXTENSION}")))
    }

    /// Load the cached index for `source`, validating format and freshness.
    pub fn load(&self, source: &Path) -> Result<ParseIndex, CacheError> {
        if self.options.disabled {
            return Err(CacheError::Disabled);
        }
        let (mtime, size) = source_metadata(source)?;
        let path = self.compute_path(source)?;
        if !path.exists() {
            return Err(CacheError::NotCached);
        }

        let map = MmapFile::open(&path)?;
        match decode(&map) {
            Ok((cached_mtime, cached_size, index)) => {
                if cached_mtime != mtime || cached_size != size {
                    return Err(CacheError::SourceChanged);
                }
                Ok(index)
            }
            Err(err @ CacheError::Corrupted(_)) | Err(err @ CacheError::VersionMismatch { .. }) => {
                drop(map);
                self.warn(&format!(
                    "removing unusable cache file {}: {err}",
                    path.display()
                ));
                let _ = fs::remove_file(&path);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Persist `index` for `source` via temp file and atomic rename.
    ///
    /// Failures here never fail the parse; callers log the returned error as
    /// a warning at most.
    pub fn save(&self, source: &Path, index: &ParseIndex) -> Result<PathBuf, CacheError> {
        if self.options.disabled {
            return Err(CacheError::Disabled);
        }
        let (mtime, size) = source_metadata(source)?;
        let path = self.compute_path(source)?;
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        let result = (|| -> Result<(), CacheError> {
            let mut file = fs::File::create(&tmp)?;
            let bytes = encode(index, mtime, size);
            file.write_all(&bytes).map_err(map_write_error)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(path),
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                self.warn(&format!("failed to write cache file: {err}"));
                Err(err)
            }
        }
    }

    /// Delete the cache for `source`. True when it is gone afterwards.
    pub fn invalidate(&self, source: &Path) -> bool {
        match self.compute_path(source) {
            Ok(path) => fs::remove_file(&path).is_ok() || !path.exists(),
            Err(_) => false,
        }
    }

    fn warn(&self, message: &str) {
        if let Some(callback) = &self.options.warning {
            callback(message);
        }
    }
}

fn map_write_error(err: std::io::Error) -> CacheError {
    // ENOSPC is worth distinguishing: the parse still succeeds, only the
    // cache write is lost.
    if err.raw_os_error() == Some(28) {
        CacheError::DiskFull
    } else {
        CacheError::Io(err)
    }
}

fn source_metadata(source: &Path) -> Result<(u64, u64), CacheError> {
    let meta = fs::metadata(source).map_err(|_| CacheError::SourceNotFound)?;
    if !meta.is_file() {
        return Err(CacheError::SourceNotFound);
    }
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    Ok((mtime, meta.len()))
}

fn is_dir_writable(dir: &Path) -> bool {
    fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}

fn xdg_cache_dir() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CACHE_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var_os("HOME")?).join(".cache"),
    };
    Some(base.join("vroomcsv"))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const FNV_PRIME: u64 = 0x1000_0000_01b3;
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn layout_tag(layout: IndexLayout) -> u8 {
    match layout {
        IndexLayout::Interleaved => 0,
        IndexLayout::RowMajor => 1,
        IndexLayout::ColumnMajor => 2,
    }
}

fn push_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u64s(out: &mut Vec<u8>, values: &[u64]) {
    #[cfg(target_endian = "little")]
    out.extend_from_slice(bytemuck::cast_slice(values));
    #[cfg(not(target_endian = "little"))]
    for &v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn encode(index: &ParseIndex, mtime: u64, size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 8 * index.total_separators() as usize + 64);
    out.extend_from_slice(&CACHE_MAGIC);
    out.push(CACHE_FORMAT_VERSION);
    out.extend_from_slice(&[0u8; 3]);
    push_u64(&mut out, mtime);
    push_u64(&mut out, size);
    out.push(layout_tag(index.layout()));
    out.push(0);
    out.extend_from_slice(&index.n_threads().to_le_bytes());
    push_u64(&mut out, index.columns);

    match index.layout() {
        IndexLayout::Interleaved => {
            push_u64s(&mut out, index.n_indexes());
            let stride = index.n_threads() as usize;
            let slots = index.interleaved_slots();
            for (t, &count) in index.n_indexes().iter().enumerate() {
                for k in 0..count as usize {
                    push_u64(&mut out, slots[t + k * stride]);
                }
            }
        }
        IndexLayout::RowMajor | IndexLayout::ColumnMajor => {
            let positions = match index.layout() {
                IndexLayout::RowMajor => index.row_major().unwrap_or(&[]),
                _ => index.column_major_slice(),
            };
            push_u64(&mut out, positions.len() as u64);
            push_u64s(&mut out, positions);
        }
    }

    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CacheError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| CacheError::Corrupted("truncated cache file".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64, CacheError> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    fn u64s(&mut self, count: usize) -> Result<Vec<u64>, CacheError> {
        let bytes = self.take(count.checked_mul(8).ok_or_else(|| {
            CacheError::Corrupted("payload length overflow".into())
        })?)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().expect("8 bytes")))
            .collect())
    }
}

fn decode(bytes: &[u8]) -> Result<(u64, u64, ParseIndex), CacheError> {
    let mut r = Reader { bytes, pos: 0 };

    if r.take(4)? != CACHE_MAGIC {
        return Err(CacheError::Corrupted("bad magic".into()));
    }
    let version = r.take(1)?[0];
    if version != CACHE_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch { found: version });
    }
    r.take(3)?; // reserved
    let mtime = r.u64()?;
    let size = r.u64()?;
    let layout_tag = r.take(1)?[0];
    r.take(1)?; // reserved
    let n_threads = u16::from_le_bytes(r.take(2)?.try_into().expect("2 bytes"));
    let columns = r.u64()?;

    if n_threads == 0 {
        return Err(CacheError::Corrupted("zero thread count".into()));
    }

    let index = match layout_tag {
        0 => {
            let n_indexes = r.u64s(n_threads as usize)?;
            let max_count = n_indexes.iter().copied().max().unwrap_or(0) as usize;
            let stride = n_threads as usize;
            let slots = (max_count + THREAD_PAD)
                .checked_mul(stride)
                .ok_or_else(|| CacheError::Corrupted("lane count overflow".into()))?;
            let mut interleaved = vec![0u64; slots];
            for (t, &count) in n_indexes.iter().enumerate() {
                let lane = r.u64s(count as usize)?;
                for (k, pos) in lane.into_iter().enumerate() {
                    interleaved[t + k * stride] = pos;
                }
            }
            ParseIndex::from_parts(
                columns,
                n_threads,
                n_indexes,
                interleaved,
                Vec::new(),
                Vec::new(),
                IndexLayout::Interleaved,
            )
        }
        tag @ (1 | 2) => {
            let count = r.u64()? as usize;
            let positions = r.u64s(count)?;
            if tag == 1 {
                ParseIndex::from_parts(
                    columns,
                    n_threads,
                    vec![0; n_threads as usize],
                    Vec::new(),
                    positions,
                    Vec::new(),
                    IndexLayout::RowMajor,
                )
            } else {
                if columns > 0 && positions.len() as u64 % columns != 0 {
                    return Err(CacheError::Corrupted(
                        "column-major payload is not rectangular".into(),
                    ));
                }
                ParseIndex::from_parts(
                    columns,
                    n_threads,
                    vec![0; n_threads as usize],
                    Vec::new(),
                    Vec::new(),
                    positions,
                    IndexLayout::ColumnMajor,
                )
            }
        }
        tag => {
            return Err(CacheError::Corrupted(format!(
                "unknown layout descriptor {tag}"
            )))
        }
    };

    Ok((mtime, size, index))
}
