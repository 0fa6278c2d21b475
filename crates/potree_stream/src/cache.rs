//! LruCache - global point budget shared by every point cloud.
//!
//! Tracks resident nodes by recency. The scheduler touches every node it
//! keeps this frame; once per frame [`LruCache::free_some_space`] evicts
//! the least recently touched nodes until the resident point count fits the
//! budget. Nodes touched in the current frame are never evicted.
//!
//! Recency is `(frame, sequence)`: the frame of the last touch (or add) and a
//! global counter that increases with every touch. Ordering is therefore
//! total and independent of hash iteration.

use std::collections::{BTreeMap, HashMap};

use crate::octree::NodeId;
use crate::pointcloud::PointCloudId;

/// Identity of a resident node across all clouds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CacheKey {
  pub cloud: PointCloudId,
  pub node: NodeId,
}

impl CacheKey {
  pub fn new(cloud: PointCloudId, node: NodeId) -> Self {
    Self { cloud, node }
  }
}

type Recency = (u64, u64);

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
  num_points: u64,
  recency: Recency,
  touched_frame: Option<u64>,
}

/// Point-budget-bounded LRU cache.
#[derive(Debug)]
pub struct LruCache {
  point_budget: u64,
  num_points: u64,
  frame: u64,
  sequence: u64,
  entries: HashMap<CacheKey, CacheEntry>,
  /// Oldest first.
  order: BTreeMap<Recency, CacheKey>,
}

impl LruCache {
  pub fn new(point_budget: u64) -> Self {
    Self {
      point_budget,
      num_points: 0,
      frame: 0,
      sequence: 0,
      entries: HashMap::new(),
      order: BTreeMap::new(),
    }
  }

  pub fn point_budget(&self) -> u64 {
    self.point_budget
  }

  /// Takes effect at the next [`free_some_space`](Self::free_some_space).
  pub fn set_point_budget(&mut self, point_budget: u64) {
    self.point_budget = point_budget;
  }

  /// Resident points across all entries.
  pub fn num_points(&self) -> u64 {
    self.num_points
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn contains(&self, key: CacheKey) -> bool {
    self.entries.contains_key(&key)
  }

  pub fn frame(&self) -> u64 {
    self.frame
  }

  /// Start a new frame; previous touches stop protecting their nodes.
  pub fn advance_frame(&mut self) -> u64 {
    self.frame += 1;
    self.frame
  }

  /// Whether `key` was touched in the current frame.
  pub fn is_protected(&self, key: CacheKey) -> bool {
    self
      .entries
      .get(&key)
      .is_some_and(|e| e.touched_frame == Some(self.frame))
  }

  fn next_recency(&mut self) -> Recency {
    self.sequence += 1;
    (self.frame, self.sequence)
  }

  /// Mark `key` most recently used and protect it for this frame.
  ///
  /// Returns false when the key is not cached.
  pub fn touch(&mut self, key: CacheKey) -> bool {
    let recency = self.next_recency();
    let frame = self.frame;
    let Some(entry) = self.entries.get_mut(&key) else {
      return false;
    };
    self.order.remove(&entry.recency);
    entry.recency = recency;
    entry.touched_frame = Some(frame);
    self.order.insert(recency, key);
    true
  }

  /// Register a freshly loaded node.
  ///
  /// The node counts as most recent but is not protected until touched.
  /// Re-adding a cached key only updates its point count.
  pub fn add(&mut self, key: CacheKey, num_points: u64) {
    if let Some(entry) = self.entries.get_mut(&key) {
      self.num_points = self.num_points - entry.num_points + num_points;
      entry.num_points = num_points;
      return;
    }
    let recency = self.next_recency();
    self.entries.insert(
      key,
      CacheEntry {
        num_points,
        recency,
        touched_frame: None,
      },
    );
    self.order.insert(recency, key);
    self.num_points += num_points;
  }

  /// Forget `key` without disposing it. Returns its point count.
  pub fn remove(&mut self, key: CacheKey) -> Option<u64> {
    let entry = self.entries.remove(&key)?;
    self.order.remove(&entry.recency);
    self.num_points -= entry.num_points;
    Some(entry.num_points)
  }

  /// Keys from least to most recently used.
  pub fn iter_lru(&self) -> impl Iterator<Item = CacheKey> + '_ {
    self.order.values().copied()
  }

  /// Evict least recently used, unprotected nodes until the resident point
  /// count fits the budget.
  ///
  /// `dispose` releases a victim's buffers and returns any other keys it
  /// released alongside (descendants); those leave the cache too. Returns
  /// every evicted key in eviction order.
  #[tracing::instrument(skip_all, fields(budget = self.point_budget, resident = self.num_points))]
  pub fn free_some_space<F>(&mut self, mut dispose: F) -> Vec<CacheKey>
  where
    F: FnMut(CacheKey) -> Vec<CacheKey>,
  {
    let mut evicted = Vec::new();
    while self.num_points > self.point_budget {
      let frame = self.frame;
      let victim = self
        .order
        .values()
        .copied()
        .find(|k| self.entries.get(k).is_some_and(|e| e.touched_frame != Some(frame)));
      let Some(victim) = victim else {
        break;
      };

      self.remove(victim);
      evicted.push(victim);
      for released in dispose(victim) {
        if self.remove(released).is_some() {
          evicted.push(released);
        }
      }
    }

    if !evicted.is_empty() {
      tracing::debug!(evicted = evicted.len(), resident = self.num_points, "freed space");
    }
    evicted
  }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
