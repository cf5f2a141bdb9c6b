//! Interchangeable stable in-memory sorts.
//!
//! Every strategy returns a permutation of `0..len` such that indices with equal keys keep
//! their original relative order.

use std::cmp::Ordering;

use serde::Deserialize;

/// Stable comparison sort producing a permutation.
pub trait InMemorySort: Send + Sync {
    /// Sorted permutation of `0..len` under `cmp`.
    fn sort(&self, len: usize, cmp: &dyn Fn(usize, usize) -> Ordering) -> Vec<usize>;
}

/// Strategy selector used by configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InMemorySortKind {
    /// Bottom-up k-way merge sort.
    #[default]
    Merge,
    /// The standard library's stable sort.
    Stable,
    /// Heap sort with an index tiebreaker.
    Heap,
}

impl InMemorySortKind {
    /// Boxed strategy.
    pub fn strategy(self) -> Box<dyn InMemorySort> {
        match self {
            InMemorySortKind::Merge => Box::new(MergeSort::default()),
            InMemorySortKind::Stable => Box::new(StdStableSort),
            InMemorySortKind::Heap => Box::new(HeapSort),
        }
    }
}

/// Bottom-up merge sort merging `fan_in` runs per pass.
#[derive(Clone, Copy, Debug)]
pub struct MergeSort {
    /// Runs merged at once; at least 2.
    pub fan_in: usize,
}

impl Default for MergeSort {
    fn default() -> Self {
        Self { fan_in: 4 }
    }
}

impl InMemorySort for MergeSort {
    fn sort(&self, len: usize, cmp: &dyn Fn(usize, usize) -> Ordering) -> Vec<usize> {
        let fan_in = self.fan_in.max(2);
        let mut src: Vec<usize> = (0..len).collect();
        let mut dst = Vec::with_capacity(len);
        let mut width = 1;
        while width < len {
            dst.clear();
            let group = width * fan_in;
            let mut start = 0;
            while start < len {
                let end = (start + group).min(len);
                let mut cursors: Vec<(usize, usize)> = (start..end)
                    .step_by(width)
                    .map(|run| (run, (run + width).min(end)))
                    .collect();
                loop {
                    let mut best: Option<usize> = None;
                    for (slot, (pos, stop)) in cursors.iter().enumerate() {
                        if pos == stop {
                            continue;
                        }
                        // Earlier runs win ties, which keeps the merge stable.
                        let better = match best {
                            None => true,
                            Some(b) => cmp(src[*pos], src[cursors[b].0]) == Ordering::Less,
                        };
                        if better {
                            best = Some(slot);
                        }
                    }
                    let Some(slot) = best else { break };
                    dst.push(src[cursors[slot].0]);
                    cursors[slot].0 += 1;
                }
                start = end;
            }
            std::mem::swap(&mut src, &mut dst);
            width = group;
        }
        src
    }
}

/// Delegates to `slice::sort_by`, which is stable.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdStableSort;

impl InMemorySort for StdStableSort {
    fn sort(&self, len: usize, cmp: &dyn Fn(usize, usize) -> Ordering) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        order.sort_by(|a, b| cmp(*a, *b));
        order
    }
}

/// In-place heap sort; ties are broken by original index to restore stability.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapSort;

impl InMemorySort for HeapSort {
    fn sort(&self, len: usize, cmp: &dyn Fn(usize, usize) -> Ordering) -> Vec<usize> {
        let total = |a: usize, b: usize| cmp(a, b).then(a.cmp(&b));
        let mut heap: Vec<usize> = (0..len).collect();
        for root in (0..len / 2).rev() {
            sift_down(&mut heap, root, len, &total);
        }
        for end in (1..len).rev() {
            heap.swap(0, end);
            sift_down(&mut heap, 0, end, &total);
        }
        heap
    }
}

fn sift_down(heap: &mut [usize], mut root: usize, end: usize, cmp: &dyn Fn(usize, usize) -> Ordering) {
    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            return;
        }
        if child + 1 < end && cmp(heap[child], heap[child + 1]) == Ordering::Less {
            child += 1;
        }
        if cmp(heap[root], heap[child]) != Ordering::Less {
            return;
        }
        heap.swap(root, child);
        root = child;
    }
}
