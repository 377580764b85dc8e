//! Compression for blobs and restore point payloads
//!
//! Two codecs are used:
//!
//! - **LZ4** for blob objects. Blobs are framed with a 4-byte header so that
//!   raw and compressed objects can live side by side:
//!   - `LZ4R`: LZ4 block with prepended size follows
//!   - `\0\0\0\0`: raw bytes follow
//! - **gzip** for snapshot and delta payloads, which are JSON documents and
//!   compress well with deflate.
//!
//! ## Examples
//!
//! ```rust
//! use rewind::compression::{gzip_compress, gzip_decompress, CompressionEngine, CompressionStrategy};
//! use std::path::Path;
//!
//! let mut engine = CompressionEngine::new(CompressionStrategy::Fast);
//! let data = "row,value\n".repeat(500).into_bytes();
//! let framed = engine.compress(Path::new("table.csv"), &data).unwrap();
//! assert_eq!(engine.decompress(&framed).unwrap(), data);
//!
//! let packed = gzip_compress(b"{\"files\":{}}").unwrap();
//! assert_eq!(gzip_decompress(&packed).unwrap(), b"{\"files\":{}}");
//! ```

use crate::error::{Result, RewindError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, trace};

/// When blobs are compressed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CompressionStrategy {
    /// Store every blob raw
    None,
    /// LZ4 for every blob of at least 1 KiB (default)
    #[default]
    Fast,
    /// LZ4 above a size threshold, skipping already-compressed formats
    Adaptive {
        /// Skip compression for blobs smaller than this
        min_size: usize,
        /// File extensions stored raw
        skip_extensions: Vec<String>,
    },
}

impl CompressionStrategy {
    /// Config name of the strategy
    pub fn name(&self) -> &'static str {
        match self {
            CompressionStrategy::None => "none",
            CompressionStrategy::Fast => "fast",
            CompressionStrategy::Adaptive { .. } => "adaptive",
        }
    }
}

impl FromStr for CompressionStrategy {
    type Err = RewindError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CompressionStrategy::None),
            "fast" => Ok(CompressionStrategy::Fast),
            "adaptive" => Ok(CompressionStrategy::Adaptive {
                min_size: 4096,
                skip_extensions: default_skip_extensions(),
            }),
            other => Err(RewindError::InvalidConfiguration(format!(
                "unknown compression strategy '{}'",
                other
            ))),
        }
    }
}

/// Running totals of the blob codec
#[derive(Debug, Default, Clone)]
pub struct CompressionStats {
    /// Number of blobs compressed
    pub files_compressed: usize,
    /// Number of blobs stored raw
    pub files_stored_raw: usize,
    /// Total bytes saved by compression
    pub bytes_saved: usize,
    /// Total compression time in milliseconds
    pub compression_time_ms: u64,
}

/// LZ4 blob codec
///
/// Not thread-safe; the blob store keeps it behind a mutex.
#[derive(Debug)]
pub struct CompressionEngine {
    strategy: CompressionStrategy,
    stats: CompressionStats,
}

const LZ4_MAGIC: &[u8] = b"LZ4R";
const RAW_MAGIC: &[u8] = &[0, 0, 0, 0];

impl CompressionEngine {
    /// Create a new engine with the specified strategy
    pub fn new(strategy: CompressionStrategy) -> Self {
        Self {
            strategy,
            stats: CompressionStats::default(),
        }
    }

    /// Strategy in use
    pub fn strategy(&self) -> &CompressionStrategy {
        &self.strategy
    }

    /// Get current compression statistics
    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Frame `content`, compressing it when the strategy allows and it pays off
    ///
    /// `path` is only a hint for the adaptive strategy.
    pub fn compress(&mut self, path: &Path, content: &[u8]) -> Result<Vec<u8>> {
        let start = Instant::now();

        if !self.should_compress(path, content.len()) {
            trace!("Storing {:?} raw (strategy)", path);
            return Ok(self.frame_raw(content));
        }

        let compressed = compress_prepend_size(content);
        if compressed.len() >= content.len() {
            trace!("Compression not beneficial for {:?}, storing raw", path);
            return Ok(self.frame_raw(content));
        }

        let saved = content.len() - compressed.len();
        self.stats.bytes_saved += saved;
        self.stats.files_compressed += 1;
        self.stats.compression_time_ms += start.elapsed().as_millis() as u64;
        debug!("Compressed {:?}: {} -> {} bytes", path, content.len(), compressed.len());

        let mut result = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
        result.extend_from_slice(LZ4_MAGIC);
        result.extend_from_slice(&compressed);
        Ok(result)
    }

    /// Undo [`CompressionEngine::compress`]
    pub fn decompress(&mut self, content: &[u8]) -> Result<Vec<u8>> {
        if content.len() < 4 {
            return Err(RewindError::decompression("Content too short"));
        }

        if let Some(body) = content.strip_prefix(LZ4_MAGIC) {
            decompress_size_prepended(body)
                .map_err(|e| RewindError::decompression(format!("LZ4 decompression failed: {}", e)))
        } else if let Some(body) = content.strip_prefix(RAW_MAGIC) {
            Ok(body.to_vec())
        } else {
            Err(RewindError::decompression("Unknown blob header"))
        }
    }

    fn frame_raw(&mut self, content: &[u8]) -> Vec<u8> {
        self.stats.files_stored_raw += 1;
        let mut result = Vec::with_capacity(RAW_MAGIC.len() + content.len());
        result.extend_from_slice(RAW_MAGIC);
        result.extend_from_slice(content);
        result
    }

    fn should_compress(&self, path: &Path, size: usize) -> bool {
        match &self.strategy {
            CompressionStrategy::None => false,
            CompressionStrategy::Fast => size >= 1024,
            CompressionStrategy::Adaptive { min_size, skip_extensions } => {
                if size < *min_size {
                    return false;
                }
                match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) => !skip_extensions.iter().any(|skip| skip.eq_ignore_ascii_case(ext)),
                    None => true,
                }
            }
        }
    }
}

/// gzip-compress a payload
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| RewindError::compression(format!("gzip write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| RewindError::compression(format!("gzip finish failed: {}", e)))
}

/// Decompress a gzip payload
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RewindError::decompression(format!("gzip read failed: {}", e)))?;
    Ok(out)
}

/// Extensions of formats that are already compressed
pub fn default_skip_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "gif", "webp", "mp4", "mov", "mp3", "zip", "gz", "bz2", "xz", "zst", "7z",
        "lz4", "pdf", "docx", "xlsx", "pptx",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
