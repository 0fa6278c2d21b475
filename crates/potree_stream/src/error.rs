//! Error taxonomy for node loading.
//!
//! Every failure here is local to a single node's load attempt. None of them
//! abort the frame loop; the scheduler reports them and the node keeps its
//! coarser ancestor's detail until a later attempt succeeds.

use std::ops::Range;

use thiserror::Error;

/// Transport failure while fetching bytes.
#[derive(Debug, Error)]
pub enum FetchError {
  /// The resource does not exist in the source.
  #[error("resource not found: {url}")]
  NotFound { url: String },

  /// Underlying I/O failed.
  #[error("i/o error reading {url}: {source}")]
  Io {
    url: String,
    #[source]
    source: std::io::Error,
  },

  /// The requested range lies (partly) outside the resource.
  #[error("range {range:?} out of bounds for {url} ({len} bytes)")]
  RangeOutOfBounds {
    url: String,
    range: Range<u64>,
    len: u64,
  },

  /// Any other transport-level failure reported by a host-supplied source.
  #[error("transport error for {url}: {message}")]
  Transport { url: String, message: String },
}

/// Malformed or truncated hierarchy chunk.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HierarchyParseError {
  /// The chunk contained no bytes at all.
  #[error("hierarchy chunk is empty")]
  Empty,

  /// Chunk length is not a multiple of the per-node record size.
  #[error("hierarchy chunk length {len} is not a multiple of {record_size}")]
  Misaligned { len: usize, record_size: usize },

  /// Child masks reference more nodes than the chunk contains.
  #[error("hierarchy chunk truncated: {expected} nodes referenced, {available} present")]
  Truncated { expected: usize, available: usize },

  /// The chunk carries records that no child mask references.
  #[error("hierarchy chunk has {available} records but only {expected} are referenced")]
  TrailingRecords { expected: usize, available: usize },

  /// Node type byte is not one of normal/leaf/proxy.
  #[error("unknown node type {node_type} for node {name}")]
  UnknownNodeType { name: String, node_type: u8 },

  /// The chunk root is itself marked as a proxy, which would never resolve.
  #[error("hierarchy chunk root {name} is a proxy")]
  ProxyRoot { name: String },

  /// `byte_offset + byte_size` does not fit in a u64.
  #[error("byte range of node {name} overflows")]
  RangeOverflow { name: String },

  /// Entry names do not line up with the node being expanded.
  #[error("hierarchy entry {found} does not belong under {expected}")]
  NameMismatch { expected: String, found: String },
}

/// Malformed geometry payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
  /// Fewer bytes than `num_points * bytes_per_point`.
  #[error("geometry payload truncated: expected {expected} bytes, got {actual}")]
  Truncated { expected: usize, actual: usize },

  /// The attribute schema lacks a required attribute.
  #[error("attribute schema has no `{0}` attribute")]
  MissingAttribute(&'static str),

  /// Decoded point count disagrees with the hierarchy metadata.
  #[error("decoded {actual} points, hierarchy declares {expected}")]
  PointCountMismatch { expected: u32, actual: u32 },

  /// Attribute element type cannot be interpreted for this role.
  #[error("attribute `{name}` has unsupported type {kind}")]
  UnsupportedAttribute { name: String, kind: String },
}

/// A decode job panicked on its worker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("worker task panicked: {message}")]
pub struct WorkerFailure {
  /// Panic payload rendered as text.
  pub message: String,
}

/// Outcome of a failed node load.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Hierarchy(#[from] HierarchyParseError),

  #[error(transparent)]
  Decode(#[from] DecodeError),

  #[error(transparent)]
  Worker(#[from] WorkerFailure),

  /// The completion channel closed without delivering a result.
  #[error("load aborted before completion")]
  Aborted,
}

impl LoadError {
  /// Whether the node may be requested again on a later frame.
  ///
  /// Malformed hierarchy data will not fix itself, so such nodes are marked
  /// unavailable for the rest of the session.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, Self::Hierarchy(_))
  }
}

/// Failure opening a point cloud's metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
  #[error("failed to fetch metadata: {0}")]
  Fetch(#[from] FetchError),

  #[error("invalid metadata json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("invalid metadata: {0}")]
  Invalid(String),
}
