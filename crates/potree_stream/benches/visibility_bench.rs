//! Frame update benchmarks.
//!
//! Measures `Potree::update_visibility` on fully loaded synthetic clouds, so
//! only traversal, render decision and eviction are timed:
//! - **overview**: whole cloud in view, budget covers everything
//! - **budget_bound**: budget far below the visible set
//! - **orbit**: camera moving every frame
//!
//! Run with `cargo bench --features test-utils`.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec3;
use potree_stream::{
  test_utils::{camera_looking_at, run_until_settled, SyntheticCloud},
  ByteSource, LoadQueue, LruCache, PointCloud, Potree, SchedulerConfig, WorkerPool,
};

// =============================================================================
// Setup
// =============================================================================

struct Scene {
  potree: Potree,
  clouds: Vec<PointCloud>,
  cache: LruCache,
  queue: LoadQueue,
  pool: WorkerPool,
}

fn loaded_scene(depth: u32, config: SchedulerConfig) -> Scene {
  let synthetic = SyntheticCloud::new("bench", 100.0).depth(depth).points_per_node(|_| 64);
  let source: Arc<dyn ByteSource> = Arc::new(synthetic.source());
  let clouds = vec![synthetic.open(source).expect("synthetic cloud")];

  let mut scene = Scene {
    potree: Potree::new(config),
    clouds,
    cache: LruCache::new(config.point_budget),
    queue: LoadQueue::new(),
    pool: WorkerPool::with_available_parallelism().expect("worker pool"),
  };
  let camera = camera_looking_at(DVec3::new(50.0, 50.0, 250.0), DVec3::splat(50.0));
  run_until_settled(
    &mut scene.potree,
    &mut scene.clouds,
    &camera,
    &mut scene.cache,
    &mut scene.queue,
    &scene.pool,
    500,
  );
  scene
}

fn config(point_budget: u64) -> SchedulerConfig {
  SchedulerConfig {
    point_budget,
    screen_size_threshold: 0.0,
    max_concurrent_loads: 64,
    ..SchedulerConfig::DEFAULT
  }
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_overview(c: &mut Criterion) {
  let mut group = c.benchmark_group("update_visibility/overview");
  for depth in [2u32, 3] {
    let mut scene = loaded_scene(depth, config(u64::MAX));
    let camera = camera_looking_at(DVec3::new(50.0, 50.0, 250.0), DVec3::splat(50.0));
    group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
      b.iter(|| {
        black_box(scene.potree.update_visibility(
          &mut scene.clouds,
          &camera,
          &mut scene.cache,
          &mut scene.queue,
          &scene.pool,
        ))
      })
    });
  }
  group.finish();
}

fn bench_budget_bound(c: &mut Criterion) {
  let mut scene = loaded_scene(3, config(2_000));
  let camera = camera_looking_at(DVec3::new(50.0, 50.0, 250.0), DVec3::splat(50.0));
  c.bench_function("update_visibility/budget_bound", |b| {
    b.iter(|| {
      black_box(scene.potree.update_visibility(
        &mut scene.clouds,
        &camera,
        &mut scene.cache,
        &mut scene.queue,
        &scene.pool,
      ))
    })
  });
}

fn bench_orbit(c: &mut Criterion) {
  let mut scene = loaded_scene(3, config(u64::MAX));
  let mut angle = 0.0f64;
  c.bench_function("update_visibility/orbit", |b| {
    b.iter(|| {
      angle += 0.05;
      let eye = DVec3::new(50.0 + 200.0 * angle.cos(), 80.0, 50.0 + 200.0 * angle.sin());
      let camera = camera_looking_at(eye, DVec3::splat(50.0));
      black_box(scene.potree.update_visibility(
        &mut scene.clouds,
        &camera,
        &mut scene.cache,
        &mut scene.queue,
        &scene.pool,
      ))
    })
  });
}

criterion_group!(benches, bench_overview, bench_budget_bound, bench_orbit);
criterion_main!(benches);
