//! Conversion entry points.

use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::{CacheKey, StlCache};
use crate::error::{CodecError, CodecResult};
use crate::flatten::flatten;
use crate::package::{normalize_path, PackageReader, ROOT_DOCUMENT};
use crate::stl::encode_binary;

/// Default number of encoded files kept by a [`Converter`].
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Converter settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Maximum number of cached STL buffers; `0` disables caching.
    pub cache_capacity: usize,
    /// Archive key of the document whose build items are resolved.
    pub root_document: String,
    /// Apply component and build-item transforms to vertex positions.
    pub apply_transforms: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            root_document: ROOT_DOCUMENT.to_string(),
            apply_transforms: false,
        }
    }
}

/// 3MF to binary STL converter with a per-instance cache.
///
/// `Converter` is `Sync`; share one behind an `Arc` to let concurrent
/// callers reuse each other's results. Two callers missing on the same key
/// both convert, and the later insert overwrites an identical buffer.
pub struct Converter {
    config: ConverterConfig,
    cache: StlCache,
    parses: AtomicUsize,
}

impl Converter {
    pub fn new(mut config: ConverterConfig) -> Self {
        config.root_document = normalize_path(&config.root_document);
        let cache = StlCache::new(config.cache_capacity);
        Self {
            config,
            cache,
            parses: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn cache(&self) -> &StlCache {
        &self.cache
    }

    /// Number of packages parsed so far; cache hits do not count.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    /// Convert an in-memory 3MF package. Results are not cached.
    ///
    /// Returns `Ok(None)` when the package resolves to no triangles.
    ///
    /// # Errors
    ///
    /// Returns an archive error if `bytes` is not a 3MF container and a
    /// document error if one of its model documents cannot be parsed.
    pub fn convert_bytes(&self, bytes: &[u8]) -> CodecResult<Option<Vec<u8>>> {
        self.convert_reader(Cursor::new(bytes))
    }

    /// Convert a 3MF package from any seekable reader. Results are not cached.
    ///
    /// # Errors
    ///
    /// See [`Converter::convert_bytes`].
    pub fn convert_reader<R: Read + Seek>(&self, reader: R) -> CodecResult<Option<Vec<u8>>> {
        self.parses.fetch_add(1, Ordering::Relaxed);
        let package = PackageReader::new(reader)?.read_package()?;
        let mesh = flatten(
            &package,
            &self.config.root_document,
            self.config.apply_transforms,
        )?;
        if mesh.is_empty() {
            return Ok(None);
        }

        let bytes = encode_binary(&mesh)?;
        tracing::debug!(
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            bytes = bytes.len(),
            "encoded STL"
        );
        Ok(Some(bytes))
    }

    /// Convert a 3MF file on disk, consulting the cache first.
    ///
    /// The cache key is the canonical path plus the file's modification
    /// time; a hit skips reading the archive entirely. "No mesh" results
    /// are not cached.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Source` if the file cannot be resolved or
    /// opened, otherwise see [`Converter::convert_bytes`].
    pub fn convert_path(&self, path: &Path) -> CodecResult<Option<Arc<[u8]>>> {
        let read_error = |source| CodecError::Source {
            path: path.to_path_buf(),
            source,
        };
        let absolute = fs::canonicalize(path).map_err(read_error)?;
        let modified = fs::metadata(&absolute)
            .and_then(|meta| meta.modified())
            .map_err(read_error)?;
        let key = CacheKey {
            path: absolute,
            modified,
        };

        if let Some(bytes) = self.cache.get(&key) {
            tracing::debug!(path = %key.path.display(), "STL cache hit");
            return Ok(Some(bytes));
        }

        let file = File::open(&key.path).map_err(read_error)?;
        let Some(bytes) = self.convert_reader(BufReader::new(file))? else {
            tracing::info!(path = %key.path.display(), "no mesh data in package");
            return Ok(None);
        };

        let bytes: Arc<[u8]> = Arc::from(bytes);
        tracing::info!(
            path = %key.path.display(),
            bytes = bytes.len(),
            "converted 3MF to STL"
        );
        self.cache.insert(key, Arc::clone(&bytes));
        Ok(Some(bytes))
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(ConverterConfig::default())
    }
}

/// Convert an in-memory 3MF package with default settings.
///
/// # Errors
///
/// See [`Converter::convert_bytes`].
pub fn convert_3mf(bytes: &[u8]) -> CodecResult<Option<Vec<u8>>> {
    Converter::new(ConverterConfig {
        cache_capacity: 0,
        ..ConverterConfig::default()
    })
    .convert_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ConverterConfig::default();
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.root_document, "/3D/3dmodel.model");
        assert!(!config.apply_transforms);
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: ConverterConfig = toml::from_str("apply_transforms = true").unwrap();
        assert!(config.apply_transforms);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn test_root_document_is_normalized() {
        let converter = Converter::new(ConverterConfig {
            root_document: "3D/main.model".to_string(),
            ..ConverterConfig::default()
        });
        assert_eq!(converter.config().root_document, "/3D/main.model");
    }

    #[test]
    fn test_not_a_zip_fails_without_panicking() {
        let converter = Converter::default();
        let err = converter.convert_bytes(b"not a zip").unwrap_err();
        assert!(err.is_archive_error());
        assert_eq!(converter.parse_count(), 1);
    }

    #[test]
    fn test_missing_file_is_source_error() {
        let converter = Converter::default();
        let err = converter
            .convert_path(Path::new("/nonexistent/model_12345.3mf"))
            .unwrap_err();
        assert!(matches!(err, CodecError::Source { .. }));
        assert_eq!(converter.parse_count(), 0);
    }
}
