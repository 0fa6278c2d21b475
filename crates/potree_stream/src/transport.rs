//! Byte sources.
//!
//! The loader never talks to a network or file system directly. It asks a
//! host-supplied [`ByteSource`] for a (possibly ranged) resource from a
//! worker thread and treats whatever comes back as opaque bytes.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::FetchError;

/// One fetch: a resource and an optional byte range within it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
  pub url: String,
  /// `None` fetches the whole resource.
  pub range: Option<Range<u64>>,
}

impl FetchRequest {
  pub fn whole(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      range: None,
    }
  }

  pub fn range(url: impl Into<String>, range: Range<u64>) -> Self {
    Self {
      url: url.into(),
      range: Some(range),
    }
  }
}

/// Host-supplied byte producer.
///
/// Called from worker threads; implementations may block.
pub trait ByteSource: Send + Sync {
  fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError>;
}

/// Resolve `file` against a dataset base path.
pub fn join_url(base: &str, file: &str) -> String {
  let base = base.trim_end_matches('/');
  if base.is_empty() {
    file.to_string()
  } else {
    format!("{base}/{file}")
  }
}

fn check_range(url: &str, range: &Range<u64>, len: u64) -> Result<(), FetchError> {
  if range.start > range.end || range.end > len {
    return Err(FetchError::RangeOutOfBounds {
      url: url.to_string(),
      range: range.clone(),
      len,
    });
  }
  Ok(())
}

// =============================================================================
// FileSource
// =============================================================================

/// Reads resources from a directory on the local file system.
///
/// URLs are paths relative to the root directory.
#[derive(Clone, Debug)]
pub struct FileSource {
  root: PathBuf,
}

impl FileSource {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

impl ByteSource for FileSource {
  fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
    let path = self.root.join(&request.url);
    let io_error = |source: io::Error| {
      if source.kind() == io::ErrorKind::NotFound {
        FetchError::NotFound {
          url: request.url.clone(),
        }
      } else {
        FetchError::Io {
          url: request.url.clone(),
          source,
        }
      }
    };

    let mut file = File::open(&path).map_err(io_error)?;
    let len = file.metadata().map_err(io_error)?.len();

    let Some(range) = &request.range else {
      let mut bytes = Vec::with_capacity(len as usize);
      file.read_to_end(&mut bytes).map_err(io_error)?;
      return Ok(bytes);
    };

    check_range(&request.url, range, len)?;
    let mut bytes = vec![0u8; (range.end - range.start) as usize];
    file.seek(SeekFrom::Start(range.start)).map_err(io_error)?;
    file.read_exact(&mut bytes).map_err(io_error)?;
    Ok(bytes)
  }
}

// =============================================================================
// MemorySource
// =============================================================================

/// In-memory resources, for embedding small datasets and for tests.
#[derive(Debug, Default)]
pub struct MemorySource {
  files: HashMap<String, Vec<u8>>,
  fetches: AtomicUsize,
}

impl MemorySource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
    self.files.insert(url.into(), bytes);
  }

  pub fn with(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
    self.insert(url, bytes);
    self
  }

  /// Number of fetches served so far, failed ones included.
  pub fn fetch_count(&self) -> usize {
    self.fetches.load(Ordering::Relaxed)
  }
}

impl ByteSource for MemorySource {
  fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
    self.fetches.fetch_add(1, Ordering::Relaxed);
    let bytes = self.files.get(&request.url).ok_or_else(|| FetchError::NotFound {
      url: request.url.clone(),
    })?;
    match &request.range {
      None => Ok(bytes.clone()),
      Some(range) => {
        check_range(&request.url, range, bytes.len() as u64)?;
        Ok(bytes[range.start as usize..range.end as usize].to_vec())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_join_url() {
    assert_eq!(join_url("data/cloud/", "octree.bin"), "data/cloud/octree.bin");
    assert_eq!(join_url("", "octree.bin"), "octree.bin");
  }

  #[test]
  fn test_memory_source_ranges() {
    let source = MemorySource::new().with("a.bin", (0u8..10).collect());
    assert_eq!(source.fetch(&FetchRequest::range("a.bin", 2..5)).unwrap(), vec![2, 3, 4]);
    assert_eq!(source.fetch(&FetchRequest::whole("a.bin")).unwrap().len(), 10);
    assert!(matches!(
      source.fetch(&FetchRequest::range("a.bin", 8..12)),
      Err(FetchError::RangeOutOfBounds { len: 10, .. })
    ));
    assert!(matches!(
      source.fetch(&FetchRequest::whole("b.bin")),
      Err(FetchError::NotFound { .. })
    ));
    assert_eq!(source.fetch_count(), 4);
  }

  #[test]
  fn test_file_source_reads_range() {
    let dir = std::env::temp_dir().join(format!("potree_stream_transport_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("octree.bin"), b"0123456789").unwrap();

    let source = FileSource::new(&dir);
    assert_eq!(source.fetch(&FetchRequest::range("octree.bin", 3..6)).unwrap(), b"345");
    assert_eq!(source.fetch(&FetchRequest::whole("octree.bin")).unwrap(), b"0123456789");
    assert!(matches!(
      source.fetch(&FetchRequest::range("octree.bin", 5..20)),
      Err(FetchError::RangeOutOfBounds { .. })
    ));
    assert!(matches!(
      source.fetch(&FetchRequest::whole("missing.bin")),
      Err(FetchError::NotFound { .. })
    ));

    let _ = std::fs::remove_dir_all(&dir);
  }
}
