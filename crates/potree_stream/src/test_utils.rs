//! Test utilities: synthetic Potree 2.0 datasets and misbehaving decoders.
//!
//! Used by unit tests, scenario tests and benchmarks to build point clouds
//! entirely in memory, with real `metadata.json`, `hierarchy.bin` and
//! `octree.bin` payloads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::DVec3;
use web_time::Instant;

use crate::cache::LruCache;
use crate::camera::Camera;
use crate::error::{DecodeError, MetadataError};
use crate::format::{
  encode_points, DecodeRequest, PointAttributes, PointBuffers, PointDecoder, PointLayout, PotreeDecoder,
};
use crate::loader::NodeLoader;
use crate::octree::{encode_chunk, DAabb3, HierarchyEntry, NodeKind, NodeName, PotreeHierarchyDecoder, BYTES_PER_NODE};
use crate::pointcloud::PointCloud;
use crate::scheduler::{LoadQueue, Potree, VisibilityUpdateResult};
use crate::threading::WorkerPool;
use crate::transport::{join_url, ByteSource, MemorySource};

const BYTES_PER_POINT: u64 = 18;

// =============================================================================
// Synthetic datasets
// =============================================================================

/// Builder for a complete synthetic octree.
///
/// Every node down to `depth` has all eight children. Hierarchy chunks span
/// `hierarchy_step` levels; nodes on a chunk boundary are proxies.
pub struct SyntheticCloud {
  pub base: String,
  pub bounding_box: DAabb3,
  pub depth: u32,
  pub hierarchy_step: u32,
  points: Box<dyn Fn(&NodeName) -> u32>,
}

impl SyntheticCloud {
  /// Cube of edge `size` at the origin, depth 2, one chunk, 100 points per node.
  pub fn new(base: &str, size: f64) -> Self {
    Self {
      base: base.to_string(),
      bounding_box: DAabb3::new(DVec3::ZERO, DVec3::splat(size)),
      depth: 2,
      hierarchy_step: 8,
      points: Box::new(|_| 100),
    }
  }

  pub fn at(mut self, min: DVec3) -> Self {
    let size = self.bounding_box.size();
    self.bounding_box = DAabb3::new(min, min + size);
    self
  }

  pub fn depth(mut self, depth: u32) -> Self {
    self.depth = depth;
    self
  }

  pub fn hierarchy_step(mut self, step: u32) -> Self {
    self.hierarchy_step = step.max(1);
    self
  }

  pub fn points_per_node(mut self, points: impl Fn(&NodeName) -> u32 + 'static) -> Self {
    self.points = Box::new(points);
    self
  }

  pub fn points_for(&self, name: &NodeName) -> u32 {
    (self.points)(name)
  }

  /// Breadth-first names of every node.
  pub fn node_names(&self) -> Vec<NodeName> {
    let mut names = Vec::new();
    let mut queue = VecDeque::from([NodeName::root()]);
    while let Some(name) = queue.pop_front() {
      if name.level() < self.depth {
        for octant in 0..8 {
          queue.push_back(name.child(octant));
        }
      }
      names.push(name);
    }
    names
  }

  fn node_box(&self, name: &NodeName) -> DAabb3 {
    name
      .as_str()
      .bytes()
      .skip(1)
      .fold(self.bounding_box, |b, digit| b.child(digit - b'0'))
  }

  fn layout(&self) -> PointLayout {
    PointLayout {
      attributes: PointAttributes::position_rgb(),
      scale: DVec3::splat(0.001),
      offset: self.bounding_box.min,
    }
  }

  /// Deterministic points spread through the node box.
  pub fn node_points(&self, name: &NodeName) -> Vec<DVec3> {
    let bounds = self.node_box(name);
    let size = bounds.size();
    let n = self.points_for(name);
    (0..n)
      .map(|i| {
        let i = f64::from(i) + 0.5;
        let fract = |v: f64| v - v.floor();
        let t = DVec3::new(
          fract(i * 0.618_033_988_7),
          fract(i * 0.754_877_666_2),
          fract(i * 0.569_840_290_9),
        );
        bounds.min + size * (t * 0.98 + 0.01)
      })
      .collect()
  }

  /// Entries of the chunk rooted at `root`, breadth-first, with proxy
  /// entries left at offset 0 for the caller to patch.
  fn chunk_entries(&self, root: &NodeName, geometry_ranges: &dyn Fn(&NodeName) -> (u64, u64)) -> Vec<HierarchyEntry> {
    let boundary = root.level() + self.hierarchy_step;
    let mut entries = Vec::new();
    let mut queue = VecDeque::from([root.clone()]);
    while let Some(name) = queue.pop_front() {
      let level = name.level();
      let is_proxy = level == boundary && &name != root;
      let has_children = level < self.depth;
      let kind = if is_proxy {
        NodeKind::Proxy
      } else if has_children {
        NodeKind::Normal
      } else {
        NodeKind::Leaf
      };
      let (byte_offset, byte_size) = if is_proxy { (0, 0) } else { geometry_ranges(&name) };
      entries.push(HierarchyEntry {
        name: name.clone(),
        kind,
        child_mask: if has_children { 0xFF } else { 0 },
        num_points: self.points_for(&name),
        byte_offset,
        byte_size,
      });
      if !is_proxy && has_children {
        for octant in 0..8 {
          queue.push_back(name.child(octant));
        }
      }
    }
    entries
  }

  /// Encode the dataset into `source` under `self.base`.
  pub fn write_into(&self, source: &mut MemorySource) {
    let layout = self.layout();

    // Geometry payloads, breadth-first.
    let mut octree = Vec::new();
    let mut ranges = std::collections::HashMap::new();
    for name in self.node_names() {
      let start = octree.len() as u64;
      octree.extend(encode_points(&layout, &self.node_points(&name), None));
      ranges.insert(name, (start, octree.len() as u64 - start));
    }
    let geometry_ranges = |name: &NodeName| ranges.get(name).copied().unwrap_or((0, 0));

    // Chunk roots breadth-first; offsets follow from entry counts.
    let mut chunks: Vec<(NodeName, Vec<HierarchyEntry>)> = Vec::new();
    let mut queue = VecDeque::from([NodeName::root()]);
    while let Some(root) = queue.pop_front() {
      let entries = self.chunk_entries(&root, &geometry_ranges);
      for entry in &entries {
        if entry.kind == NodeKind::Proxy {
          queue.push_back(entry.name.clone());
        }
      }
      chunks.push((root, entries));
    }
    let mut offsets = std::collections::HashMap::new();
    let mut offset = 0u64;
    for (root, entries) in &chunks {
      let size = (entries.len() * BYTES_PER_NODE) as u64;
      offsets.insert(root.clone(), (offset, size));
      offset += size;
    }

    let mut hierarchy = Vec::new();
    for (_, entries) in &mut chunks {
      for entry in entries.iter_mut() {
        if entry.kind == NodeKind::Proxy {
          let (chunk_offset, chunk_size) = offsets.get(&entry.name).copied().unwrap_or((0, 0));
          entry.byte_offset = chunk_offset;
          entry.byte_size = chunk_size;
        }
      }
      hierarchy.extend(encode_chunk(entries));
    }

    let first_chunk_size = offsets.get(&NodeName::root()).map_or(0, |(_, size)| *size);
    source.insert(join_url(&self.base, "metadata.json"), self.metadata_json(first_chunk_size).into_bytes());
    source.insert(join_url(&self.base, "hierarchy.bin"), hierarchy);
    source.insert(join_url(&self.base, "octree.bin"), octree);
  }

  fn metadata_json(&self, first_chunk_size: u64) -> String {
    let min = self.bounding_box.min;
    let max = self.bounding_box.max;
    let total: u64 = self.node_names().iter().map(|n| u64::from(self.points_for(n))).sum();
    serde_json::json!({
      "version": "2.0",
      "name": self.base,
      "description": "",
      "points": total,
      "projection": "",
      "hierarchy": { "firstChunkSize": first_chunk_size, "stepSize": self.hierarchy_step, "depth": self.depth },
      "offset": [min.x, min.y, min.z],
      "scale": [0.001, 0.001, 0.001],
      "spacing": self.bounding_box.size().x / 128.0,
      "boundingBox": { "min": [min.x, min.y, min.z], "max": [max.x, max.y, max.z] },
      "encoding": "DEFAULT",
      "attributes": [
        { "name": "position", "description": "", "size": 12, "numElements": 3, "elementSize": 4,
          "type": "int32", "min": [min.x, min.y, min.z], "max": [max.x, max.y, max.z] },
        { "name": "rgb", "description": "", "size": 6, "numElements": 3, "elementSize": 2,
          "type": "uint16", "min": [0, 0, 0], "max": [65535, 65535, 65535] }
      ]
    })
    .to_string()
  }

  /// Size of a node's payload in `octree.bin`.
  pub fn byte_size(&self, name: &NodeName) -> u64 {
    u64::from(self.points_for(name)) * BYTES_PER_POINT
  }

  /// Encode into a fresh source.
  pub fn source(&self) -> MemorySource {
    let mut source = MemorySource::new();
    self.write_into(&mut source);
    source
  }

  /// Open the dataset as a point cloud backed by `source`.
  pub fn open(&self, source: Arc<dyn ByteSource>) -> Result<PointCloud, MetadataError> {
    PointCloud::open(source, &self.base)
  }

  /// Open with a custom point decoder.
  pub fn open_with_decoder(
    &self,
    source: Arc<dyn ByteSource>,
    decoder: Arc<dyn PointDecoder>,
  ) -> Result<PointCloud, MetadataError> {
    let loader = NodeLoader::new(Arc::clone(&source), Arc::new(PotreeHierarchyDecoder), decoder);
    PointCloud::open_with_loader(source, &self.base, loader)
  }
}

// =============================================================================
// Misbehaving decoders
// =============================================================================

/// Decoder that panics for payloads with a given point count while armed.
pub struct PanickingDecoder {
  pub poison_points: u32,
  armed: AtomicBool,
}

impl PanickingDecoder {
  pub fn new(poison_points: u32) -> Self {
    Self {
      poison_points,
      armed: AtomicBool::new(true),
    }
  }

  /// Stop panicking; later decodes succeed.
  pub fn disarm(&self) {
    self.armed.store(false, Ordering::SeqCst);
  }
}

impl PointDecoder for PanickingDecoder {
  fn decode(&self, bytes: &[u8], request: &DecodeRequest<'_>) -> Result<PointBuffers, DecodeError> {
    if request.num_points == self.poison_points && self.armed.load(Ordering::SeqCst) {
      panic!("poisoned payload with {} points", request.num_points);
    }
    PotreeDecoder.decode(bytes, request)
  }
}

// =============================================================================
// Frame driving
// =============================================================================

/// Camera at `eye` looking at `target`, 800x600 viewport.
pub fn camera_looking_at(eye: DVec3, target: DVec3) -> Camera {
  Camera::look_at(eye, target, DVec3::Y, 800.0, 600.0)
}

/// Run frames until no load is in flight after a frame, or `max_frames`
/// elapse. Returns the last frame's result.
pub fn run_until_settled(
  potree: &mut Potree,
  clouds: &mut [PointCloud],
  camera: &Camera,
  cache: &mut LruCache,
  queue: &mut LoadQueue,
  pool: &WorkerPool,
  max_frames: usize,
) -> VisibilityUpdateResult {
  let mut result = potree.update_visibility(clouds, camera, cache, queue, pool);
  for _ in 1..max_frames {
    if result.loads_in_flight == 0 && result.dispatched_loads == 0 {
      break;
    }
    wait_for_loads(clouds, Duration::from_secs(5));
    result = potree.update_visibility(clouds, camera, cache, queue, pool);
  }
  result
}

/// Block until every cloud's in-flight tasks have finished on the workers,
/// without applying them.
pub fn wait_for_loads(clouds: &[PointCloud], timeout: Duration) {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if clouds.iter().all(|c| c.loader.tasks_finished()) {
      return;
    }
    std::thread::sleep(Duration::from_millis(1));
  }
}
