//! Visibility and priority scheduler.
//!
//! [`Potree::update_visibility`] runs once per frame and decides, across all
//! point clouds, which nodes are drawn, which are loaded next and which are
//! released.
//!
//! # Frame Phases
//!
//! 1. **Reconcile**: apply dirty configuration, advance the cache frame and
//!    poll every loader; finished loads enter the cache.
//! 2. **Traverse**: pop nodes from the global [`LoadQueue`], highest
//!    projected size first. Each node either fits the point budget (visible)
//!    or is deferred. Visible resident nodes are touched and push their
//!    children; visible unloaded nodes become load candidates.
//! 3. **Dispatch**: start candidate loads in pop order while the global
//!    in-flight count is below `max_concurrent_loads`.
//! 4. **Render decision**: select the drawn subset of visible resident nodes
//!    per [`RefinementMode`].
//! 5. **Evict**: one `free_some_space` pass on the cache.
//!
//! # Culling
//!
//! Roots are culled by the frustum only. Children are culled by the frustum,
//! by the cloud's `max_level` and by the screen size threshold. Culled nodes
//! are not visited further.

pub mod queue;

use web_time::Instant;

use crate::cache::{CacheKey, LruCache};
use crate::camera::{Camera, Frustum, Projection, Ray};
use crate::config::{DirtyFlags, Parameter, RefinementMode, SchedulerConfig};
use crate::loader::{LoadOutcome, LoadStart};
use crate::metrics::StreamingMetrics;
use crate::octree::{DAabb3, LoadState, NodeId, OctreeGeometry};
use crate::picking::{self, PickHit};
use crate::pointcloud::{PointCloud, PointCloudId};
use crate::threading::WorkerPool;

pub use queue::{LoadQueue, QueueItem};

/// A node handed to the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderedNode {
  pub cloud: PointCloudId,
  /// Index into the cloud slice of the frame update.
  pub cloud_index: usize,
  pub node: NodeId,
}

/// Output of one frame update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilityUpdateResult {
  /// Drawn nodes in traversal order.
  pub rendered: Vec<RenderedNode>,
  pub rendered_points: u64,
  /// Finest spacing among drawn nodes.
  pub lowest_spacing: Option<f64>,
  /// Points of every node that fit the budget this frame.
  pub visible_points: u64,
  /// Visible nodes that were not resident nor loading.
  pub candidates: usize,
  pub dispatched_loads: usize,
  /// Loads in flight across all clouds once dispatch is done.
  pub loads_in_flight: usize,
  /// Nodes skipped because they would have exceeded the point budget.
  pub deferred_by_budget: usize,
  pub culled: usize,
  pub completed_loads: usize,
  pub failed_loads: usize,
  pub evicted: Vec<CacheKey>,
}

impl VisibilityUpdateResult {
  pub fn rendered_nodes(&self) -> usize {
    self.rendered.len()
  }

  pub fn is_rendered(&self, cloud: PointCloudId, node: NodeId) -> bool {
    self.rendered.iter().any(|r| r.cloud == cloud && r.node == node)
  }
}

/// Per-node traversal verdict, indexed by `NodeId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Visit {
  Unvisited,
  FrustumCulled,
  Culled,
  Deferred,
  Visible,
}

/// Streaming orchestrator.
///
/// Holds configuration only; the clouds, cache, queue and worker pool are
/// passed into every frame, so several schedulers can coexist.
#[derive(Debug)]
pub struct Potree {
  config: SchedulerConfig,
  dirty: DirtyFlags,
  /// Projection the current frame works with; refreshed from the config
  /// when the projection flag is dirty.
  projection: Projection,
  metrics: StreamingMetrics,
}

impl Potree {
  pub fn new(config: SchedulerConfig) -> Self {
    Self {
      config,
      dirty: DirtyFlags {
        point_budget: true,
        projection: true,
      },
      projection: config.camera_projection,
      metrics: StreamingMetrics::new(),
    }
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  /// Pending rebuilds for the next frame.
  pub fn dirty(&self) -> DirtyFlags {
    self.dirty
  }

  pub fn metrics(&self) -> &StreamingMetrics {
    &self.metrics
  }

  /// Projection in effect for the last or current frame.
  pub fn projection(&self) -> &Projection {
    &self.projection
  }

  /// Change one tunable. Dependent state is rebuilt at the start of the
  /// next frame; the returned flags tell which.
  pub fn set_parameter(&mut self, parameter: Parameter) -> DirtyFlags {
    let dirty = self.config.apply(parameter);
    if dirty.any() {
      tracing::debug!(?parameter, ?dirty, "parameter changed");
    }
    self.dirty.merge(dirty);
    dirty
  }

  fn apply_dirty(&mut self, cache: &mut LruCache) {
    if self.dirty.point_budget {
      cache.set_point_budget(self.config.point_budget);
    }
    if self.dirty.projection {
      self.projection = self.config.camera_projection;
    }
    self.dirty = DirtyFlags::default();
  }

  /// Projected radius in pixels of `bounds`' bounding sphere.
  fn weight(&self, bounds: &DAabb3, camera: &Camera) -> f64 {
    let distance = camera.position().distance(bounds.center());
    self
      .projection
      .projected_radius(bounds.radius(), distance, camera.viewport_height)
  }

  /// Run one frame. Never blocks on loads.
  #[tracing::instrument(skip_all, name = "potree::update_visibility", fields(clouds = clouds.len()))]
  pub fn update_visibility(
    &mut self,
    clouds: &mut [PointCloud],
    camera: &Camera,
    cache: &mut LruCache,
    queue: &mut LoadQueue,
    pool: &WorkerPool,
  ) -> VisibilityUpdateResult {
    let started = Instant::now();
    let mut result = VisibilityUpdateResult::default();

    // Phase 1: Reconcile
    self.apply_dirty(cache);
    cache.advance_frame();
    for cloud in clouds.iter_mut() {
      let cloud_id = cloud.id();
      for outcome in cloud.poll_loads() {
        match outcome {
          LoadOutcome::Loaded {
            node,
            num_points,
            elapsed,
            ..
          } => {
            cache.add(CacheKey::new(cloud_id, node), u64::from(num_points));
            self.metrics.record_load(elapsed.as_micros() as u64);
            result.completed_loads += 1;
          }
          LoadOutcome::Failed { .. } => {
            self.metrics.record_failed_load();
            result.failed_loads += 1;
          }
        }
      }
    }

    // Phase 2: Traverse
    let frustum = camera.frustum(&self.projection);
    let mut visits: Vec<Vec<Visit>> = clouds
      .iter()
      .map(|c| vec![Visit::Unvisited; c.geometry.len()])
      .collect();
    let mut candidates: Vec<(usize, NodeId)> = Vec::new();
    let mut visible_resident: Vec<(usize, NodeId)> = Vec::new();
    {
      let _span = tracing::debug_span!("traverse").entered();
      queue.clear();
      for (index, cloud) in clouds.iter().enumerate() {
        if !cloud.visible {
          continue;
        }
        let root = cloud.geometry.root();
        let Some(bounds) = cloud.world_bounding_box(root) else {
          continue;
        };
        if !frustum.intersects_box(&bounds) {
          visits[index][root.index()] = Visit::FrustumCulled;
          result.culled += 1;
          continue;
        }
        queue.push(QueueItem {
          cloud_index: index,
          node: root,
          parent: None,
          weight: self.weight(&bounds, camera),
          level: 0,
        });
      }

      let point_budget = self.config.point_budget;
      while let Some(item) = queue.pop() {
        let cloud = &clouds[item.cloud_index];
        let Some(node) = cloud.geometry.node(item.node) else {
          continue;
        };
        if node.state() == LoadState::Unavailable {
          continue;
        }

        let points = u64::from(node.num_points());
        if result.visible_points + points > point_budget {
          visits[item.cloud_index][item.node.index()] = Visit::Deferred;
          result.deferred_by_budget += 1;
          continue;
        }
        result.visible_points += points;
        visits[item.cloud_index][item.node.index()] = Visit::Visible;

        match node.state() {
          LoadState::Resident => {
            cache.touch(CacheKey::new(cloud.id(), item.node));
            visible_resident.push((item.cloud_index, item.node));
            for child in node.child_ids() {
              let verdict = self.evaluate_child(cloud, child, &frustum, camera);
              match verdict {
                Ok(weight) => queue.push(QueueItem {
                  cloud_index: item.cloud_index,
                  node: child,
                  parent: Some(item.node),
                  weight,
                  level: node.level() + 1,
                }),
                Err(visit) => {
                  visits[item.cloud_index][child.index()] = visit;
                  result.culled += 1;
                }
              }
            }
          }
          LoadState::Unloaded => candidates.push((item.cloud_index, item.node)),
          LoadState::Loading | LoadState::Unavailable => {}
        }
      }
    }

    // Phase 3: Dispatch
    result.candidates = candidates.len();
    let mut in_flight: usize = clouds.iter().map(|c| c.loader.in_flight()).sum();
    for (index, node) in candidates {
      if in_flight >= self.config.max_concurrent_loads {
        break;
      }
      if clouds[index].load(node, pool) == LoadStart::Dispatched {
        in_flight += 1;
        result.dispatched_loads += 1;
      }
    }
    result.loads_in_flight = in_flight;

    // Phase 4: Render decision
    for &(index, id) in &visible_resident {
      let cloud = &clouds[index];
      let Some(node) = cloud.geometry.node(id) else {
        continue;
      };
      let drawn = match self.config.refinement {
        RefinementMode::Additive => true,
        RefinementMode::Replace => !covered_by_children(&cloud.geometry, id, &visits[index]),
      };
      if !drawn {
        continue;
      }
      result.rendered.push(RenderedNode {
        cloud: cloud.id(),
        cloud_index: index,
        node: id,
      });
      result.rendered_points += u64::from(node.num_points());
      let spacing = node.spacing();
      result.lowest_spacing = Some(result.lowest_spacing.map_or(spacing, |s| s.min(spacing)));
    }

    // Phase 5: Evict
    result.evicted = cache.free_some_space(|key| {
      let Some(cloud) = clouds.iter_mut().find(|c| c.id() == key.cloud) else {
        return Vec::new();
      };
      cloud
        .unload(key.node)
        .into_iter()
        .map(|node| CacheKey::new(key.cloud, node))
        .collect()
    });

    let elapsed = started.elapsed();
    self.metrics.record_frame(
      elapsed.as_micros() as u64,
      result.rendered.len(),
      result.rendered_points,
      cache.num_points(),
      result.loads_in_flight,
      result.evicted.len(),
    );
    tracing::trace!(
      rendered = result.rendered.len(),
      visible_points = result.visible_points,
      dispatched = result.dispatched_loads,
      deferred = result.deferred_by_budget,
      evicted = result.evicted.len(),
      ?elapsed,
      "frame updated"
    );
    result
  }

  /// Weight of a child worth visiting, or the reason it is culled.
  fn evaluate_child(&self, cloud: &PointCloud, child: NodeId, frustum: &Frustum, camera: &Camera) -> Result<f64, Visit> {
    let Some(node) = cloud.geometry.node(child) else {
      return Err(Visit::Culled);
    };
    if node.level() > cloud.max_level {
      return Err(Visit::Culled);
    }
    let bounds = node.bounding_box().transformed(&cloud.transform);
    if !frustum.intersects_box(&bounds) {
      return Err(Visit::FrustumCulled);
    }
    let weight = self.weight(&bounds, camera);
    if weight < self.config.screen_size_threshold {
      return Err(Visit::Culled);
    }
    Ok(weight)
  }

  /// Closest point near `ray` among the nodes drawn in `result`.
  pub fn pick(
    &self,
    clouds: &[PointCloud],
    camera: &Camera,
    result: &VisibilityUpdateResult,
    ray: &Ray,
    pixel_radius: f64,
  ) -> Option<PickHit> {
    picking::pick(clouds, camera, &self.projection, result, ray, pixel_radius)
  }
}

impl Default for Potree {
  fn default() -> Self {
    Self::new(SchedulerConfig::default())
  }
}

/// Whether the children of a resident node replace it on screen: every
/// child is outside the frustum or visible and resident, and at least one
/// is the latter.
fn covered_by_children(geometry: &OctreeGeometry, id: NodeId, visits: &[Visit]) -> bool {
  let Some(node) = geometry.node(id) else {
    return false;
  };
  let mut any_drawn = false;
  for child in node.child_ids() {
    match visits.get(child.index()).copied().unwrap_or(Visit::Unvisited) {
      Visit::FrustumCulled => {}
      Visit::Visible if geometry.node(child).is_some_and(|c| c.is_resident()) => any_drawn = true,
      _ => return false,
    }
  }
  any_drawn
}
