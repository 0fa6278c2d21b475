//! Ray picking over the drawn node set.
//!
//! Only nodes listed in a frame's [`VisibilityUpdateResult`] are tested, so
//! a pick always lands on something the user can see.

use glam::DVec3;

use crate::camera::{Camera, Projection, Ray};
use crate::octree::{DAabb3, NodeId};
use crate::pointcloud::{PointCloud, PointCloudId};
use crate::scheduler::{RenderedNode, VisibilityUpdateResult};

/// Closest picked point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PickHit {
  pub cloud: PointCloudId,
  pub cloud_index: usize,
  pub node: NodeId,
  /// Index into the node's point buffers.
  pub point_index: usize,
  /// World-space position.
  pub position: DVec3,
  /// Distance along the ray.
  pub distance: f64,
}

/// Closest point along `ray` lying within `pixel_radius` pixels of it,
/// among the nodes drawn in `result`.
#[tracing::instrument(skip_all, fields(rendered = result.rendered.len()))]
pub fn pick(
  clouds: &[PointCloud],
  camera: &Camera,
  projection: &Projection,
  result: &VisibilityUpdateResult,
  ray: &Ray,
  pixel_radius: f64,
) -> Option<PickHit> {
  let mut best: Option<PickHit> = None;
  for rendered in &result.rendered {
    let Some(cloud) = cloud_for(clouds, rendered) else {
      continue;
    };
    let Some(bounds) = cloud.world_tight_bounding_box(rendered.node) else {
      continue;
    };

    // Widen by the tolerance at the box's distance so edge points qualify.
    let margin = pixel_radius * projection.world_per_pixel(camera.position().distance(bounds.center()), camera.viewport_height);
    let widened = DAabb3::new(bounds.min - DVec3::splat(margin), bounds.max + DVec3::splat(margin));
    let Some(entry) = ray.intersect_box(&widened) else {
      continue;
    };
    if best.is_some_and(|b| b.distance < entry) {
      continue;
    }

    let Some(buffers) = cloud.geometry.node(rendered.node).and_then(|n| n.buffers()) else {
      continue;
    };
    for index in 0..buffers.num_points() {
      let Some(local) = buffers.world_position(index) else {
        continue;
      };
      let position = cloud.transform.transform_point3(local);
      let (t, offset) = ray.closest_approach(position);
      if t < 0.0 {
        continue;
      }
      let tolerance = pixel_radius * projection.world_per_pixel(camera.position().distance(position), camera.viewport_height);
      if offset > tolerance {
        continue;
      }
      if best.is_some_and(|b| b.distance <= t) {
        continue;
      }
      best = Some(PickHit {
        cloud: cloud.id(),
        cloud_index: rendered.cloud_index,
        node: rendered.node,
        point_index: index,
        position,
        distance: t,
      });
    }
  }
  best
}

fn cloud_for<'a>(clouds: &'a [PointCloud], rendered: &RenderedNode) -> Option<&'a PointCloud> {
  match clouds.get(rendered.cloud_index) {
    Some(cloud) if cloud.id() == rendered.cloud => Some(cloud),
    _ => clouds.iter().find(|c| c.id() == rendered.cloud),
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::cache::LruCache;
  use crate::config::SchedulerConfig;
  use crate::scheduler::{LoadQueue, Potree};
  use crate::test_utils::{camera_looking_at, run_until_settled, SyntheticCloud};
  use crate::threading::WorkerPool;
  use crate::transport::ByteSource;

  fn loaded_scene() -> (Potree, Vec<PointCloud>, Camera, VisibilityUpdateResult) {
    let synthetic = SyntheticCloud::new("scan", 10.0).depth(1);
    let source: Arc<dyn ByteSource> = Arc::new(synthetic.source());
    let cloud = synthetic.open(source).unwrap();
    let mut clouds = vec![cloud];

    let config = SchedulerConfig {
      screen_size_threshold: 0.0,
      ..SchedulerConfig::DEFAULT
    };
    let mut potree = Potree::new(config);
    let camera = camera_looking_at(DVec3::new(5.0, 5.0, 40.0), DVec3::new(5.0, 5.0, 5.0));
    let mut cache = LruCache::new(config.point_budget);
    let mut queue = LoadQueue::new();
    let pool = WorkerPool::new(2).unwrap();
    let result = run_until_settled(&mut potree, &mut clouds, &camera, &mut cache, &mut queue, &pool, 20);
    (potree, clouds, camera, result)
  }

  #[test]
  fn test_pick_hits_drawn_point() {
    let (potree, clouds, camera, result) = loaded_scene();
    assert!(!result.rendered.is_empty());

    // Aim straight at one real point.
    let target = result
      .rendered
      .iter()
      .find_map(|r| {
        let buffers = clouds[r.cloud_index].geometry().node(r.node)?.buffers()?;
        buffers.world_position(0)
      })
      .unwrap();
    let ray = Ray::new(camera.position(), target - camera.position());

    let hit = potree.pick(&clouds, &camera, &result, &ray, 2.0).unwrap();
    assert!(result.is_rendered(hit.cloud, hit.node));
    assert!(hit.distance <= camera.position().distance(target) + 1e-6);
    let (_, offset) = ray.closest_approach(hit.position);
    let tolerance = 2.0 * potree.projection().world_per_pixel(camera.position().distance(hit.position), 600.0);
    assert!(offset <= tolerance);
  }

  #[test]
  fn test_pick_miss() {
    let (potree, clouds, camera, result) = loaded_scene();
    let ray = Ray::new(camera.position(), DVec3::new(0.0, 1.0, 0.0));
    assert!(potree.pick(&clouds, &camera, &result, &ray, 2.0).is_none());
  }

  /// Nodes absent from the result are never picked.
  #[test]
  fn test_pick_ignores_undrawn_nodes() {
    let (potree, clouds, camera, _) = loaded_scene();
    let ray = camera.ray_through_pixel(potree.projection(), 400.0, 300.0);
    let empty = VisibilityUpdateResult::default();
    assert!(potree.pick(&clouds, &camera, &empty, &ray, 5.0).is_none());
  }
}
