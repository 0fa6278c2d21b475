//! Camera, projection and frustum math for visibility decisions.
//!
//! The host owns the camera; the scheduler only needs a view matrix, the
//! viewport size and the projection from its configuration.

use glam::{DMat4, DVec3, DVec4};
use serde::Deserialize;

use crate::octree::DAabb3;

/// Camera projection.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Projection {
  Perspective {
    /// Vertical field of view in radians.
    #[serde(rename = "fovY")]
    fov_y: f64,
    #[serde(default = "default_near")]
    near: f64,
    #[serde(default = "default_far")]
    far: f64,
  },
  Orthographic {
    /// Height of the view volume in world units.
    height: f64,
    #[serde(default = "default_near")]
    near: f64,
    #[serde(default = "default_far")]
    far: f64,
  },
}

fn default_near() -> f64 {
  0.1
}

fn default_far() -> f64 {
  1.0e6
}

impl Projection {
  /// 60° vertical field of view.
  pub const DEFAULT: Self = Self::Perspective {
    fov_y: std::f64::consts::FRAC_PI_3,
    near: 0.1,
    far: 1.0e6,
  };

  /// Clip-from-view matrix with depth mapped to `[0, 1]`.
  pub fn matrix(&self, aspect: f64) -> DMat4 {
    match *self {
      Self::Perspective { fov_y, near, far } => DMat4::perspective_rh(fov_y, aspect, near, far),
      Self::Orthographic { height, near, far } => {
        let half_h = height * 0.5;
        let half_w = half_h * aspect;
        DMat4::orthographic_rh(-half_w, half_w, -half_h, half_h, near, far)
      }
    }
  }

  /// Projected radius in pixels of a sphere at `distance` from the eye.
  ///
  /// Returns `f64::MAX` when the eye is inside the sphere.
  pub fn projected_radius(&self, radius: f64, distance: f64, viewport_height: f64) -> f64 {
    if distance <= radius {
      return f64::MAX;
    }
    match *self {
      Self::Perspective { fov_y, .. } => radius * 0.5 * viewport_height / ((fov_y * 0.5).tan() * distance),
      Self::Orthographic { height, .. } => radius * viewport_height / height,
    }
  }

  /// World-space length covered by one pixel at `distance`.
  pub fn world_per_pixel(&self, distance: f64, viewport_height: f64) -> f64 {
    match *self {
      Self::Perspective { fov_y, .. } => 2.0 * (fov_y * 0.5).tan() * distance / viewport_height,
      Self::Orthographic { height, .. } => height / viewport_height,
    }
  }
}

impl Default for Projection {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// Viewer pose and viewport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
  /// View-from-world.
  view: DMat4,
  position: DVec3,
  pub viewport_width: f64,
  pub viewport_height: f64,
}

impl Camera {
  pub fn new(view: DMat4, viewport_width: f64, viewport_height: f64) -> Self {
    let position = view.inverse().w_axis.truncate();
    Self {
      view,
      position,
      viewport_width,
      viewport_height,
    }
  }

  /// Right-handed camera at `eye` looking at `target`.
  pub fn look_at(eye: DVec3, target: DVec3, up: DVec3, viewport_width: f64, viewport_height: f64) -> Self {
    Self {
      view: DMat4::look_at_rh(eye, target, up),
      position: eye,
      viewport_width,
      viewport_height,
    }
  }

  pub fn view(&self) -> &DMat4 {
    &self.view
  }

  pub fn position(&self) -> DVec3 {
    self.position
  }

  pub fn aspect(&self) -> f64 {
    if self.viewport_height > 0.0 {
      self.viewport_width / self.viewport_height
    } else {
      1.0
    }
  }

  /// Clip-from-world.
  pub fn view_projection(&self, projection: &Projection) -> DMat4 {
    projection.matrix(self.aspect()) * self.view
  }

  pub fn frustum(&self, projection: &Projection) -> Frustum {
    Frustum::from_matrix(&self.view_projection(projection))
  }

  /// Ray through pixel `(x, y)`, origin at the top-left corner.
  pub fn ray_through_pixel(&self, projection: &Projection, x: f64, y: f64) -> Ray {
    let ndc_x = 2.0 * x / self.viewport_width - 1.0;
    let ndc_y = 1.0 - 2.0 * y / self.viewport_height;
    let inverse = self.view_projection(projection).inverse();
    let near = inverse.project_point3(DVec3::new(ndc_x, ndc_y, 0.0));
    let far = inverse.project_point3(DVec3::new(ndc_x, ndc_y, 1.0));
    Ray::new(near, far - near)
  }
}

/// Six clip planes, normals pointing inwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
  planes: [DVec4; 6],
}

impl Frustum {
  /// Extract planes from a clip-from-world matrix with `[0, 1]` depth.
  pub fn from_matrix(m: &DMat4) -> Self {
    let row = |i: usize| DVec4::new(m.x_axis[i], m.y_axis[i], m.z_axis[i], m.w_axis[i]);
    let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
    let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(|p| {
      let length = p.truncate().length();
      if length > 0.0 {
        p / length
      } else {
        p
      }
    });
    Self { planes }
  }

  /// Conservative box test: false only when the box is fully outside one
  /// plane.
  pub fn intersects_box(&self, aabb: &DAabb3) -> bool {
    self.planes.iter().all(|plane| {
      let normal = plane.truncate();
      let positive = DVec3::select(normal.cmpge(DVec3::ZERO), aabb.max, aabb.min);
      normal.dot(positive) + plane.w >= 0.0
    })
  }

  pub fn contains_point(&self, point: DVec3) -> bool {
    self
      .planes
      .iter()
      .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
  }
}

/// Half-line with a unit direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
  pub origin: DVec3,
  pub direction: DVec3,
}

impl Ray {
  pub fn new(origin: DVec3, direction: DVec3) -> Self {
    Self {
      origin,
      direction: direction.normalize_or_zero(),
    }
  }

  pub fn at(&self, t: f64) -> DVec3 {
    self.origin + self.direction * t
  }

  /// Entry distance into `aabb` (slab test), `None` when missed.
  pub fn intersect_box(&self, aabb: &DAabb3) -> Option<f64> {
    let inv = self.direction.recip();
    let t0 = (aabb.min - self.origin) * inv;
    let t1 = (aabb.max - self.origin) * inv;
    let near = t0.min(t1).max_element();
    let far = t0.max(t1).min_element();
    if far < near.max(0.0) || far.is_nan() {
      return None;
    }
    Some(near.max(0.0))
  }

  /// Distance along the ray of the closest approach to `point`, and the
  /// perpendicular distance at that approach.
  pub fn closest_approach(&self, point: DVec3) -> (f64, f64) {
    let t = (point - self.origin).dot(self.direction);
    (t, (point - self.at(t)).length())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn camera() -> Camera {
    Camera::look_at(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, DVec3::Y, 800.0, 600.0)
  }

  #[test]
  fn test_frustum_culls_behind_camera() {
    let frustum = camera().frustum(&Projection::DEFAULT);
    let ahead = DAabb3::from_center_half_extents(DVec3::ZERO, DVec3::ONE);
    let behind = DAabb3::from_center_half_extents(DVec3::new(0.0, 0.0, 20.0), DVec3::ONE);
    let aside = DAabb3::from_center_half_extents(DVec3::new(100.0, 0.0, 0.0), DVec3::ONE);
    assert!(frustum.intersects_box(&ahead));
    assert!(!frustum.intersects_box(&behind));
    assert!(!frustum.intersects_box(&aside));
    assert!(frustum.contains_point(DVec3::ZERO));
  }

  #[test]
  fn test_camera_position_from_view() {
    let a = camera();
    let b = Camera::new(*a.view(), 800.0, 600.0);
    assert!((b.position() - DVec3::new(0.0, 0.0, 10.0)).length() < 1e-9);
  }

  /// Perspective: radius * (h/2) / (tan(fov/2) * d).
  #[test]
  fn test_projected_radius_perspective() {
    let projection = Projection::Perspective {
      fov_y: std::f64::consts::FRAC_PI_2,
      near: 0.1,
      far: 100.0,
    };
    let r = projection.projected_radius(1.0, 10.0, 600.0);
    assert!((r - 30.0).abs() < 1e-9);
    assert_eq!(projection.projected_radius(5.0, 2.0, 600.0), f64::MAX);
    assert!(projection.projected_radius(1.0, 20.0, 600.0) < r);
  }

  #[test]
  fn test_projected_radius_orthographic() {
    let projection = Projection::Orthographic {
      height: 20.0,
      near: 0.1,
      far: 100.0,
    };
    assert_eq!(projection.projected_radius(2.0, 50.0, 600.0), 60.0);
    assert_eq!(projection.world_per_pixel(50.0, 600.0), 20.0 / 600.0);
  }

  #[test]
  fn test_center_ray_hits_target() {
    let camera = camera();
    let ray = camera.ray_through_pixel(&Projection::DEFAULT, 400.0, 300.0);
    assert!((ray.direction - DVec3::new(0.0, 0.0, -1.0)).length() < 1e-6);

    let target = DAabb3::from_center_half_extents(DVec3::ZERO, DVec3::ONE);
    let t = ray.intersect_box(&target).unwrap();
    // Ray starts on the near plane.
    assert!((t - 8.9).abs() < 1e-3);
    let miss = DAabb3::from_center_half_extents(DVec3::new(5.0, 0.0, 0.0), DVec3::ONE);
    assert!(ray.intersect_box(&miss).is_none());
  }

  #[test]
  fn test_projection_from_json() {
    let projection: Projection = serde_json::from_str(r#"{"type": "orthographic", "height": 12.5}"#).unwrap();
    assert_eq!(
      projection,
      Projection::Orthographic {
        height: 12.5,
        near: 0.1,
        far: 1.0e6
      }
    );
    let projection: Projection = serde_json::from_str(r#"{"type": "perspective", "fovY": 1.0}"#).unwrap();
    assert!(matches!(projection, Projection::Perspective { fov_y, .. } if fov_y == 1.0));
  }
}
