//! potree_stream - Out-of-core point cloud streaming
//!
//! This crate keeps a bounded, level-of-detail aware working set of octree
//! nodes resident for point clouds far larger than memory. Every frame the
//! scheduler decides which nodes are drawn, which are fetched next and which
//! are released, under one point budget shared by all clouds.
//!
//! # Features
//!
//! - **Octree model**: arena of nodes addressed by stable ids, expanded
//!   lazily from hierarchy chunks
//! - **Visibility scheduling**: frustum and screen-size culling, global
//!   priority by projected size, replace or additive refinement
//! - **Point budget**: LRU cache that never evicts what the current frame
//!   touched
//! - **Async loading**: fetch and decode on a fixed worker pool, applied at
//!   frame boundaries, with panics isolated per node
//! - **Potree 2.0 format**: `metadata.json`, `hierarchy.bin` and uncompressed
//!   `octree.bin` out of the box; decoders and byte sources are traits
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use potree_stream::{Camera, FileSource, LoadQueue, LruCache, PointCloud, Potree, SchedulerConfig, WorkerPool};
//!
//! let source = Arc::new(FileSource::new("/data"));
//! let mut clouds = vec![PointCloud::open(source, "lion")?];
//!
//! let config = SchedulerConfig::default();
//! let mut potree = Potree::new(config);
//! let mut cache = LruCache::new(config.point_budget);
//! let mut queue = LoadQueue::new();
//! let pool = WorkerPool::with_available_parallelism()?;
//!
//! // Once per frame:
//! let result = potree.update_visibility(&mut clouds, &camera, &mut cache, &mut queue, &pool);
//! for rendered in &result.rendered {
//!   let node = clouds[rendered.cloud_index].geometry().node(rendered.node);
//!   // draw node.buffers()
//! }
//! ```

pub mod error;
pub use error::{DecodeError, FetchError, HierarchyParseError, LoadError, MetadataError, WorkerFailure};

// Octree geometry model
pub mod octree;
pub use octree::{DAabb3, LoadState, NodeId, NodeKind, NodeName, OctreeGeometry, OctreeNode};

// Potree 2.0 metadata, attribute schema and point decoding
pub mod format;
pub use format::{Metadata, PointBuffers, PointDecoder, PotreeDecoder};

// Byte sources
pub mod transport;
pub use transport::{ByteSource, FetchRequest, FileSource, MemorySource};

// Cross-platform worker pool
pub mod threading;
pub use threading::{TaskHandle, WorkerPool};

pub mod loader;
pub use loader::{LoadOutcome, LoadStart, NodeLoader};

pub mod pointcloud;
pub use pointcloud::{PointCloud, PointCloudId};

pub mod cache;
pub use cache::{CacheKey, LruCache};

pub mod camera;
pub use camera::{Camera, Frustum, Projection, Ray};

pub mod config;
pub use config::{DirtyFlags, Parameter, RefinementMode, SchedulerConfig};

pub mod scheduler;
pub use scheduler::{LoadQueue, Potree, QueueItem, RenderedNode, VisibilityUpdateResult};

pub mod picking;
pub use picking::PickHit;

pub mod metrics;

// Test utilities
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
