//! PointCloud - one streamed octree placed in the scene.
//!
//! Each cloud owns its geometry arena and loader. Clouds share the worker
//! pool, the LRU cache and the load queue, which the scheduler receives per
//! frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::DAffine3;

use crate::error::MetadataError;
use crate::format::Metadata;
use crate::loader::{LoadOutcome, LoadStart, NodeLoader};
use crate::octree::{DAabb3, NodeId, OctreeGeometry};
use crate::threading::WorkerPool;
use crate::transport::{join_url, ByteSource, FetchRequest};

// =============================================================================
// PointCloudId - unique identifier
// =============================================================================

/// Atomic counter for generating unique PointCloudIds.
static POINT_CLOUD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque point cloud identifier, unique within the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PointCloudId(u64);

impl PointCloudId {
  pub fn new() -> Self {
    Self(POINT_CLOUD_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
  }

  pub fn raw(&self) -> u64 {
    self.0
  }
}

impl Default for PointCloudId {
  fn default() -> Self {
    Self::new()
  }
}

// =============================================================================
// PointCloud
// =============================================================================

/// Per-cloud streaming state.
///
/// # Transform
///
/// `transform` maps octree space into the shared world space the camera
/// lives in. Visibility and picking test transformed boxes.
pub struct PointCloud {
  id: PointCloudId,
  pub name: String,
  pub(crate) geometry: OctreeGeometry,
  pub(crate) loader: NodeLoader,
  pub transform: DAffine3,
  /// Hidden clouds are skipped entirely by the scheduler.
  pub visible: bool,
  /// Deepest level the scheduler will refine to.
  pub max_level: u32,
}

impl PointCloud {
  pub fn new(geometry: OctreeGeometry, loader: NodeLoader) -> Self {
    Self {
      id: PointCloudId::new(),
      name: String::new(),
      geometry,
      loader,
      transform: DAffine3::IDENTITY,
      visible: true,
      max_level: u32::MAX,
    }
  }

  /// Open a Potree 2.0 dataset: fetch and validate `metadata.json` under
  /// `base`, then set up the root proxy. Blocks on the metadata fetch.
  pub fn open(source: Arc<dyn ByteSource>, base: &str) -> Result<Self, MetadataError> {
    let loader = NodeLoader::potree(Arc::clone(&source));
    Self::open_with_loader(source, base, loader)
  }

  /// Like [`PointCloud::open`], with a caller-configured loader.
  pub fn open_with_loader(source: Arc<dyn ByteSource>, base: &str, loader: NodeLoader) -> Result<Self, MetadataError> {
    let bytes = source.fetch(&FetchRequest::whole(join_url(base, "metadata.json")))?;
    let metadata = Metadata::from_json(&bytes)?;
    tracing::info!(
      base,
      name = %metadata.name,
      points = metadata.points,
      depth = metadata.hierarchy.depth,
      "opened point cloud"
    );

    let geometry = OctreeGeometry::from_metadata(&metadata, base);
    let mut cloud = Self::new(geometry, loader);
    cloud.name = metadata.name;
    Ok(cloud)
  }

  pub fn with_transform(mut self, transform: DAffine3) -> Self {
    self.transform = transform;
    self
  }

  pub fn with_max_level(mut self, max_level: u32) -> Self {
    self.max_level = max_level;
    self
  }

  pub fn id(&self) -> PointCloudId {
    self.id
  }

  pub fn geometry(&self) -> &OctreeGeometry {
    &self.geometry
  }

  pub fn loader(&self) -> &NodeLoader {
    &self.loader
  }

  /// Request a node load (idempotent).
  pub fn load(&mut self, node: NodeId, pool: &WorkerPool) -> LoadStart {
    self.loader.load(&mut self.geometry, node, pool)
  }

  /// Apply finished loads (non-blocking).
  pub fn poll_loads(&mut self) -> Vec<LoadOutcome> {
    self.loader.poll(&mut self.geometry)
  }

  /// Coarse node box in world space.
  pub fn world_bounding_box(&self, node: NodeId) -> Option<DAabb3> {
    self
      .geometry
      .node(node)
      .map(|n| n.bounding_box().transformed(&self.transform))
  }

  /// Tightest known node box in world space.
  pub fn world_tight_bounding_box(&self, node: NodeId) -> Option<DAabb3> {
    self
      .geometry
      .tight_bounding_box(node)
      .map(|b| b.transformed(&self.transform))
  }

  /// Release `node` and all of its resident descendants, returning the
  /// descendants that were released.
  pub fn unload(&mut self, node: NodeId) -> Vec<NodeId> {
    self.geometry.dispose(node);
    self.geometry.dispose_descendants(node)
  }
}

impl std::fmt::Debug for PointCloud {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PointCloud")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("nodes", &self.geometry.len())
      .field("loader", &self.loader)
      .field("visible", &self.visible)
      .field("max_level", &self.max_level)
      .finish()
  }
}
