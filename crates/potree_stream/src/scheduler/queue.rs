//! Global load priority queue shared by every point cloud in a frame.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::octree::NodeId;

/// A node waiting to be visited by the traversal.
#[derive(Clone, Copy, Debug)]
pub struct QueueItem {
  /// Index of the cloud in the slice passed to the frame update.
  pub cloud_index: usize,
  pub node: NodeId,
  pub parent: Option<NodeId>,
  /// Projected radius in pixels; larger is more urgent.
  pub weight: f64,
  pub level: u32,
}

impl PartialEq for QueueItem {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for QueueItem {
  /// "Greater" pops first: higher weight, then shallower level, then lower
  /// cloud index, then lower node id.
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .weight
      .total_cmp(&other.weight)
      .then_with(|| other.level.cmp(&self.level))
      .then_with(|| other.cloud_index.cmp(&self.cloud_index))
      .then_with(|| other.node.cmp(&self.node))
  }
}

/// Max-heap of [`QueueItem`]s, cleared at the start of every frame.
#[derive(Debug, Default)]
pub struct LoadQueue {
  heap: BinaryHeap<QueueItem>,
}

impl LoadQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, item: QueueItem) {
    self.heap.push(item);
  }

  /// Highest priority item.
  pub fn pop(&mut self) -> Option<QueueItem> {
    self.heap.pop()
  }

  pub fn peek(&self) -> Option<&QueueItem> {
    self.heap.peek()
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }

  pub fn clear(&mut self) {
    self.heap.clear();
  }
}
