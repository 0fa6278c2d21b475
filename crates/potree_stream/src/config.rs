//! SchedulerConfig - tunables of the per-frame visibility pass.
//!
//! Changing a value at runtime goes through [`Parameter`]; the scheduler
//! compares old and new values and raises [`DirtyFlags`] that are consumed
//! once at the start of the next frame.

use serde::Deserialize;

use crate::camera::Projection;

/// How resident ancestors combine with their children on screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefinementMode {
  /// A node is hidden once its visible children are all resident. Until the
  /// last one lands the parent is drawn in full, overlapping the children
  /// already resident.
  #[default]
  Replace,
  /// Every visible resident node is drawn; children add density.
  Additive,
}

/// Scheduler configuration.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
  /// Maximum resident points across all clouds.
  pub point_budget: u64,
  /// Maximum loads in flight across all clouds.
  pub max_concurrent_loads: usize,
  /// Minimum projected radius in pixels for a child node to be visited.
  pub screen_size_threshold: f64,
  pub camera_projection: Projection,
  pub refinement: RefinementMode,
}

impl SchedulerConfig {
  pub const DEFAULT: Self = Self {
    point_budget: 1_000_000,
    max_concurrent_loads: 4,
    screen_size_threshold: 150.0,
    camera_projection: Projection::DEFAULT,
    refinement: RefinementMode::Replace,
  };

  /// Small budget for integrated GPUs and low-memory hosts.
  pub const LOW_END: Self = Self {
    point_budget: 500_000,
    max_concurrent_loads: 2,
    ..Self::DEFAULT
  };

  /// Large budget for desktop GPUs.
  pub const HIGH_END: Self = Self {
    point_budget: 5_000_000,
    max_concurrent_loads: 8,
    screen_size_threshold: 100.0,
    ..Self::DEFAULT
  };

  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Apply `parameter`, returning which derived state it invalidates.
  pub fn apply(&mut self, parameter: Parameter) -> DirtyFlags {
    let mut dirty = DirtyFlags::default();
    match parameter {
      Parameter::PointBudget(value) => {
        dirty.point_budget = self.point_budget != value;
        self.point_budget = value;
      }
      Parameter::MaxConcurrentLoads(value) => {
        self.max_concurrent_loads = value;
      }
      Parameter::ScreenSizeThreshold(value) => {
        self.screen_size_threshold = value;
      }
      Parameter::CameraProjection(value) => {
        dirty.projection = self.camera_projection != value;
        self.camera_projection = value;
      }
      Parameter::Refinement(value) => {
        self.refinement = value;
      }
    }
    dirty
  }
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// A single runtime configuration change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Parameter {
  PointBudget(u64),
  MaxConcurrentLoads(usize),
  ScreenSizeThreshold(f64),
  CameraProjection(Projection),
  Refinement(RefinementMode),
}

/// Derived state to rebuild at the next frame boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyFlags {
  /// Push the budget into the cache.
  pub point_budget: bool,
  /// Recompute cached projection factors.
  pub projection: bool,
}

impl DirtyFlags {
  pub fn any(&self) -> bool {
    self.point_budget || self.projection
  }

  pub fn merge(&mut self, other: DirtyFlags) {
    self.point_budget |= other.point_budget;
    self.projection |= other.projection;
  }
}
