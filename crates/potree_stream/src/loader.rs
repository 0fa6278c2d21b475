//! Node loader - turns a node identity into resident point buffers.
//!
//! # Flow
//!
//! ```text
//! Frame thread                      Worker (pool)
//! ┌────────────────┐
//! │ load(node)     │
//! │ - Unloaded →   │
//! │   Loading      │
//! └───────┬────────┘
//!         │ pool.run()
//!         ▼
//!                                  ┌───────────────────┐
//!                                  │ fetch + parse     │
//!                                  │ hierarchy chunk   │
//!                                  │ (proxies only)    │
//!                                  └─────────┬─────────┘
//!                                            ▼
//!                                  ┌───────────────────┐
//!                                  │ fetch + decode    │
//!                                  │ geometry payload  │
//!                                  └─────────┬─────────┘
//! ┌────────────────┐                         │
//! │ poll()         │◄────────────────────────┘
//! │ - expand tree  │
//! │ - attach bufs  │
//! └────────────────┘
//! ```
//!
//! Workers only see their own copies of the node parameters. All tree
//! mutation happens in [`NodeLoader::poll`] on the frame thread.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use glam::DVec3;
use web_time::Instant;

use crate::error::LoadError;
use crate::format::{DecodeRequest, PointBuffers, PointDecoder, PointLayout, PotreeDecoder};
use crate::octree::{HierarchyDecoder, HierarchyEntry, LoadState, NodeId, NodeName, OctreeGeometry, PotreeHierarchyDecoder};
use crate::threading::{TaskHandle, WorkerPool};
use crate::transport::{ByteSource, FetchRequest};

/// Result of asking the loader to load a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStart {
  /// A new load task was queued.
  Dispatched,
  /// A task for this node is already in flight.
  AlreadyLoading,
  /// Buffers are already attached.
  AlreadyResident,
  /// The node was excluded for this session.
  Unavailable,
}

/// Completed load, applied on the frame thread.
#[derive(Debug)]
pub enum LoadOutcome {
  Loaded {
    node: NodeId,
    num_points: u32,
    /// Nodes registered by the hierarchy chunk this load carried.
    new_nodes: usize,
    elapsed: Duration,
  },
  Failed {
    node: NodeId,
    error: LoadError,
  },
}

impl LoadOutcome {
  pub fn node(&self) -> NodeId {
    match self {
      Self::Loaded { node, .. } | Self::Failed { node, .. } => *node,
    }
  }

  pub fn is_loaded(&self) -> bool {
    matches!(self, Self::Loaded { .. })
  }
}

/// Worker-side output of one load.
struct LoadedNode {
  hierarchy: Option<Vec<HierarchyEntry>>,
  buffers: PointBuffers,
}

/// Everything a worker needs, copied off the arena at dispatch time.
struct LoadJob {
  name: NodeName,
  hierarchy_url: Arc<str>,
  octree_url: Arc<str>,
  hierarchy_range: Option<Range<u64>>,
  geometry_range: Range<u64>,
  num_points: u32,
  origin: DVec3,
  layout: Arc<PointLayout>,
}

struct PendingLoad {
  node: NodeId,
  started: Instant,
  handle: TaskHandle<Result<LoadedNode, LoadError>>,
}

/// Per-cloud loader.
pub struct NodeLoader {
  source: Arc<dyn ByteSource>,
  hierarchy_decoder: Arc<dyn HierarchyDecoder>,
  point_decoder: Arc<dyn PointDecoder>,
  /// In dispatch order.
  pending: Vec<PendingLoad>,
}

impl NodeLoader {
  pub fn new(
    source: Arc<dyn ByteSource>,
    hierarchy_decoder: Arc<dyn HierarchyDecoder>,
    point_decoder: Arc<dyn PointDecoder>,
  ) -> Self {
    Self {
      source,
      hierarchy_decoder,
      point_decoder,
      pending: Vec::new(),
    }
  }

  /// Loader for Potree 2.0 data.
  pub fn potree(source: Arc<dyn ByteSource>) -> Self {
    Self::new(source, Arc::new(PotreeHierarchyDecoder), Arc::new(PotreeDecoder))
  }

  /// Start loading `id` unless it is already loading, resident or
  /// unavailable.
  pub fn load(&mut self, geometry: &mut OctreeGeometry, id: NodeId, pool: &WorkerPool) -> LoadStart {
    let Some(node) = geometry.node(id) else {
      return LoadStart::Unavailable;
    };
    match node.state() {
      LoadState::Loading => return LoadStart::AlreadyLoading,
      LoadState::Resident => return LoadStart::AlreadyResident,
      LoadState::Unavailable => return LoadStart::Unavailable,
      LoadState::Unloaded => {}
    }

    let job = LoadJob {
      name: node.name().clone(),
      hierarchy_url: Arc::clone(geometry.hierarchy_url()),
      octree_url: Arc::clone(geometry.octree_url()),
      hierarchy_range: node.hierarchy_range(),
      geometry_range: node.geometry_range(),
      num_points: node.num_points(),
      origin: node.bounding_box().min,
      layout: Arc::clone(geometry.layout()),
    };
    tracing::debug!(node = %job.name, hierarchy = job.hierarchy_range.is_some(), "dispatching load");

    let source = Arc::clone(&self.source);
    let hierarchy_decoder = Arc::clone(&self.hierarchy_decoder);
    let point_decoder = Arc::clone(&self.point_decoder);
    let handle = pool.run(move || run_job(&job, source.as_ref(), hierarchy_decoder.as_ref(), point_decoder.as_ref()));

    geometry.mark_loading(id);
    self.pending.push(PendingLoad {
      node: id,
      started: Instant::now(),
      handle,
    });
    LoadStart::Dispatched
  }

  /// Apply every finished load (non-blocking).
  ///
  /// Successful loads expand the hierarchy (if they carried a chunk) and
  /// become resident. Failed loads return the node to `Unloaded`, or mark it
  /// `Unavailable` when the hierarchy data is malformed.
  pub fn poll(&mut self, geometry: &mut OctreeGeometry) -> Vec<LoadOutcome> {
    let mut outcomes = Vec::new();
    let mut i = 0;
    while i < self.pending.len() {
      let Some(result) = self.pending[i].handle.poll() else {
        i += 1;
        continue;
      };
      let pending = self.pending.remove(i);
      let result = result.map_err(LoadError::from).and_then(|r| r);
      outcomes.push(apply(geometry, pending.node, pending.started, result));
    }
    outcomes
  }

  /// Number of loads in flight.
  pub fn in_flight(&self) -> usize {
    self.pending.len()
  }

  /// True when every in-flight task has finished on its worker, whether or
  /// not the result has been applied yet.
  pub fn tasks_finished(&self) -> bool {
    self.pending.iter().all(|p| p.handle.is_ready())
  }

  /// Poll until nothing is in flight or `timeout` elapses.
  ///
  /// Blocks the caller; meant for hosts draining at shutdown and for tests.
  pub fn wait_idle(&mut self, geometry: &mut OctreeGeometry, timeout: Duration) -> Vec<LoadOutcome> {
    let deadline = Instant::now() + timeout;
    let mut outcomes = self.poll(geometry);
    while !self.pending.is_empty() && Instant::now() < deadline {
      std::thread::sleep(Duration::from_millis(1));
      outcomes.extend(self.poll(geometry));
    }
    outcomes
  }
}

impl std::fmt::Debug for NodeLoader {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NodeLoader")
      .field("in_flight", &self.pending.len())
      .finish_non_exhaustive()
  }
}

fn apply(
  geometry: &mut OctreeGeometry,
  id: NodeId,
  started: Instant,
  result: Result<LoadedNode, LoadError>,
) -> LoadOutcome {
  let loaded = result.and_then(|loaded| {
    let new_nodes = match &loaded.hierarchy {
      Some(entries) => geometry.expand_hierarchy(id, entries)?,
      None => 0,
    };
    Ok((loaded.buffers, new_nodes))
  });

  match loaded {
    Ok((buffers, new_nodes)) => {
      geometry.attach_buffers(id, Arc::new(buffers));
      let num_points = geometry.node(id).map_or(0, |n| n.num_points());
      let elapsed = started.elapsed();
      tracing::debug!(node = id.index(), num_points, new_nodes, ?elapsed, "load complete");
      LoadOutcome::Loaded {
        node: id,
        num_points,
        new_nodes,
        elapsed,
      }
    }
    Err(error) => {
      if error.is_retryable() {
        geometry.mark_failed(id);
      } else {
        geometry.mark_unavailable(id);
      }
      let name = geometry.node(id).map(|n| n.name().to_string()).unwrap_or_default();
      tracing::warn!(node = %name, %error, retryable = error.is_retryable(), "load failed");
      LoadOutcome::Failed { node: id, error }
    }
  }
}

/// Worker body: hierarchy first, then geometry.
fn run_job(
  job: &LoadJob,
  source: &dyn ByteSource,
  hierarchy_decoder: &dyn HierarchyDecoder,
  point_decoder: &dyn PointDecoder,
) -> Result<LoadedNode, LoadError> {
  let hierarchy = match &job.hierarchy_range {
    Some(range) => {
      let bytes = source.fetch(&FetchRequest::range(job.hierarchy_url.as_ref(), range.clone()))?;
      Some(hierarchy_decoder.decode(&bytes, &job.name)?)
    }
    None => None,
  };

  // A freshly parsed chunk describes the node itself in its first entry.
  let (geometry_range, num_points) = match hierarchy.as_ref().and_then(|entries| entries.first()) {
    Some(own) => (own.byte_range(), own.num_points),
    None => (job.geometry_range.clone(), job.num_points),
  };

  let buffers = if num_points == 0 || geometry_range.is_empty() {
    PointBuffers {
      origin: job.origin,
      ..Default::default()
    }
  } else {
    let bytes = source.fetch(&FetchRequest::range(job.octree_url.as_ref(), geometry_range))?;
    point_decoder.decode(
      &bytes,
      &DecodeRequest {
        num_points,
        layout: &job.layout,
        origin: job.origin,
      },
    )?
  };

  Ok(LoadedNode { hierarchy, buffers })
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod loader_test;
