//! Ordered child list with cumulative measures.
//!
//! Every tree node keeps its children in a [`ChildList`]: child ids and a measure per child (a
//! length in global index units for the document tree, a height for cached layouts). Children
//! are stored in blocks of bounded size. Two Fenwick trees over the blocks (measure totals and
//! child counts) answer prefix sums and offset searches in O(log n); a measure change or a
//! splice inside one block only rewrites that block.

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::{Add, Range, Sub};

/// Children per block after a re-chunk.
const BLOCK_TARGET: usize = 32;

/// Largest block an in-place splice may leave behind.
const BLOCK_MAX: usize = 64;

/// Quantity summed along a [`ChildList`].
pub trait Measure: Copy + Default + PartialOrd + Add<Output = Self> + Sub<Output = Self> {}

impl<T> Measure for T where T: Copy + Default + PartialOrd + Add<Output = T> + Sub<Output = T> {}

/// Binary indexed tree over per-block values.
#[derive(Debug, Clone)]
struct Fenwick<M> {
    /// 1-based; `tree[0]` is unused.
    tree: Vec<M>,
}

impl<M: Measure> Fenwick<M> {
    fn build(values: impl IntoIterator<Item = M>) -> Self {
        let mut tree = vec![M::default()];
        tree.extend(values);
        let n = tree.len() - 1;
        for i in 1..=n {
            let parent = i + (i & i.wrapping_neg());
            if parent <= n {
                let value = tree[i];
                tree[parent] = tree[parent] + value;
            }
        }
        Self { tree }
    }

    fn len(&self) -> usize {
        self.tree.len() - 1
    }

    /// Swap value `old` at `index` for `new`.
    fn replace(&mut self, index: usize, old: M, new: M) {
        let mut i = index + 1;
        while i < self.tree.len() {
            self.tree[i] = self.tree[i] - old + new;
            i += i & i.wrapping_neg();
        }
    }

    /// Sum of the first `count` values.
    fn prefix(&self, count: usize) -> M {
        let mut i = count;
        let mut acc = M::default();
        while i > 0 {
            acc = acc + self.tree[i];
            i &= i - 1;
        }
        acc
    }

    /// Largest `count` with `keep(prefix(count))`. `keep` must hold for a prefix of the counts.
    fn search(&self, keep: impl Fn(M) -> bool) -> usize {
        let n = self.len();
        if n == 0 {
            return 0;
        }
        let mut pos = 0;
        let mut acc = M::default();
        let mut step = 1usize << (usize::BITS - 1 - n.leading_zeros());
        while step > 0 {
            let next = pos + step;
            if next <= n {
                let candidate = acc + self.tree[next];
                if keep(candidate) {
                    pos = next;
                    acc = candidate;
                }
            }
            step >>= 1;
        }
        pos
    }
}

#[derive(Debug, Clone)]
struct Block<K, M> {
    id: u32,
    keys: Vec<K>,
    lens: Vec<M>,
    /// `ends[i]` = sum of `lens[..=i]` within the block.
    ends: Vec<M>,
}

impl<K, M: Measure> Block<K, M> {
    fn total(&self) -> M {
        self.ends.last().copied().unwrap_or_default()
    }

    fn start(&self, i: usize) -> M {
        if i == 0 { M::default() } else { self.ends[i - 1] }
    }

    fn rebuild_from(&mut self, i: usize) {
        self.ends.truncate(i);
        let mut acc = self.start(i);
        for len in &self.lens[i..] {
            acc = acc + *len;
            self.ends.push(acc);
        }
    }
}

/// Children of one node, in document order.
#[derive(Debug, Clone)]
pub struct ChildList<K, M = usize> {
    blocks: Vec<Block<K, M>>,
    /// Measure total per block.
    sums: Fenwick<M>,
    /// Child count per block.
    counts: Fenwick<usize>,
    len: usize,
    /// Block id holding each key.
    homes: HashMap<K, u32>,
    /// Position of each block id in `blocks`.
    order: HashMap<u32, usize>,
    next_block: u32,
}

impl<K: Copy + Eq + Hash, M: Measure> Default for ChildList<K, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash, M: Measure> ChildList<K, M> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            sums: Fenwick::build(std::iter::empty()),
            counts: Fenwick::build(std::iter::empty()),
            len: 0,
            homes: HashMap::new(),
            order: HashMap::new(),
            next_block: 0,
        }
    }

    /// Build a list from `(key, measure)` pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (K, M)>) -> Self {
        let mut list = Self::new();
        list.blocks = list.chunk(entries.into_iter().collect());
        list.reindex();
        list
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when there are no children.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sum of all child measures.
    pub fn total(&self) -> M {
        self.sums.prefix(self.sums.len())
    }

    /// Child ids in order.
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = K> + '_ {
        self.blocks.iter().flat_map(|b| b.keys.iter().copied())
    }

    /// Child ids of the slots in `range`.
    pub fn keys_in(&self, range: Range<usize>) -> impl Iterator<Item = K> + '_ {
        let (block, skip) = if range.start < self.len {
            self.locate(range.start)
        } else {
            (self.blocks.len(), 0)
        };
        self.blocks[block..]
            .iter()
            .flat_map(|b| b.keys.iter().copied())
            .skip(skip)
            .take(range.len())
    }

    /// Child at `index`.
    pub fn get(&self, index: usize) -> Option<K> {
        if index >= self.len {
            return None;
        }
        let (block, i) = self.locate(index);
        Some(self.blocks[block].keys[i])
    }

    /// First child.
    pub fn first(&self) -> Option<K> {
        self.blocks.first().and_then(|b| b.keys.first().copied())
    }

    /// Last child.
    pub fn last(&self) -> Option<K> {
        self.blocks.last().and_then(|b| b.keys.last().copied())
    }

    /// Measure of the child at `index`.
    pub fn child_len(&self, index: usize) -> M {
        let (block, i) = self.locate(index);
        self.blocks[block].lens[i]
    }

    /// Offset of the first unit of the child at `index`.
    pub fn start_of(&self, index: usize) -> M {
        let (block, i) = self.locate(index);
        self.sums.prefix(block) + self.blocks[block].start(i)
    }

    /// Offset just past the child at `index`.
    pub fn end_of(&self, index: usize) -> M {
        let (block, i) = self.locate(index);
        self.sums.prefix(block) + self.blocks[block].ends[i]
    }

    /// Span `[start, end)` of the child at `index`.
    pub fn span(&self, index: usize) -> Range<M> {
        let (block, i) = self.locate(index);
        let base = self.sums.prefix(block);
        let b = &self.blocks[block];
        base + b.start(i)..base + b.ends[i]
    }

    /// Slot of `key`, if it is a child of this list.
    pub fn index_of(&self, key: K) -> Option<usize> {
        let id = self.homes.get(&key)?;
        let block = *self.order.get(id)?;
        let i = self.blocks[block].keys.iter().position(|k| *k == key)?;
        Some(self.counts.prefix(block) + i)
    }

    /// First child whose end offset satisfies `past`, or `len()`.
    ///
    /// `past` must be monotone along the list: false for some prefix of the children, true for
    /// the rest.
    pub fn first_end_where(&self, past: impl Fn(M) -> bool) -> usize {
        let block = self.sums.search(|sum| !past(sum));
        let Some(b) = self.blocks.get(block) else {
            return self.len;
        };
        let base = self.sums.prefix(block);
        let i = b.ends.partition_point(|&end| !past(base + end));
        self.counts.prefix(block) + i
    }

    /// First child whose start offset satisfies `past`, or `len()`. Same contract as
    /// [`ChildList::first_end_where`].
    pub fn first_start_where(&self, past: impl Fn(M) -> bool) -> usize {
        // Every block after `block` starts past the bound; the answer may still lie inside it.
        let block = self.sums.search(|sum| !past(sum));
        let Some(b) = self.blocks.get(block) else {
            return self.len;
        };
        let base = self.sums.prefix(block);
        let (mut lo, mut hi) = (0, b.keys.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if past(base + b.start(mid)) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        self.counts.prefix(block) + lo
    }

    /// Child whose span contains the unit at `offset`, with the offset inside that child.
    ///
    /// Zero-length children never contain a unit. Returns `None` for `offset >= total()`.
    pub fn find(&self, offset: M) -> Option<(usize, M)> {
        let index = self.first_end_where(|end| end > offset);
        if index < self.len {
            Some((index, offset - self.start_of(index)))
        } else {
            None
        }
    }

    /// Slots of every child whose closed span `[start, end]` intersects the closed range
    /// `[lo, hi]`.
    pub fn touching(&self, lo: M, hi: M) -> Range<usize> {
        let first = self.first_end_where(|end| end >= lo);
        let last = self.first_start_where(|start| start > hi);
        first..last.max(first)
    }

    /// Change the measure of the child at `index`.
    pub fn set_len(&mut self, index: usize, len: M) {
        let (block, i) = self.locate(index);
        let b = &mut self.blocks[block];
        if b.lens[i] == len {
            return;
        }
        let old = b.total();
        b.lens[i] = len;
        b.rebuild_from(i);
        let new = b.total();
        self.sums.replace(block, old, new);
    }

    /// Replace `remove` children starting at `index` with `insert`; returns the removed ids.
    ///
    /// Panics when `index + remove > len()`.
    pub fn splice(
        &mut self,
        index: usize,
        remove: usize,
        insert: impl IntoIterator<Item = (K, M)>,
    ) -> Vec<K> {
        assert!(index + remove <= self.len, "child splice out of bounds");
        let insert: Vec<(K, M)> = insert.into_iter().collect();
        if self.blocks.is_empty() {
            self.blocks = self.chunk(insert);
            self.reindex();
            return Vec::new();
        }

        let (first, at) = if index < self.len {
            self.locate(index)
        } else {
            let last = self.blocks.len() - 1;
            (last, self.blocks[last].keys.len())
        };
        let last = if remove == 0 {
            first
        } else {
            self.locate(index + remove - 1).0
        };

        if first == last {
            let old_count = self.blocks[first].keys.len();
            let count = old_count - remove + insert.len();
            if count > 0 && count <= BLOCK_MAX {
                let b = &mut self.blocks[first];
                let id = b.id;
                let old_total = b.total();
                let (keys, lens): (Vec<K>, Vec<M>) = insert.into_iter().unzip();
                let removed: Vec<K> = b.keys.splice(at..at + remove, keys.iter().copied()).collect();
                b.lens.splice(at..at + remove, lens);
                b.rebuild_from(at);
                let new_total = b.total();
                for key in &removed {
                    self.homes.remove(key);
                }
                for key in keys {
                    self.homes.insert(key, id);
                }
                self.sums.replace(first, old_total, new_total);
                self.counts.replace(first, old_count, count);
                self.len = self.len + count - old_count;
                return removed;
            }
        }

        let base = self.counts.prefix(first);
        let mut flat: Vec<(K, M)> = self
            .blocks
            .drain(first..=last)
            .flat_map(|b| b.keys.into_iter().zip(b.lens))
            .collect();
        let local = index - base;
        let removed: Vec<K> = flat
            .splice(local..local + remove, insert)
            .map(|(key, _)| key)
            .collect();
        for key in &removed {
            self.homes.remove(key);
        }
        let rebuilt = self.chunk(flat);
        self.blocks.splice(first..first, rebuilt);
        self.reindex();
        removed
    }

    /// Iterate `(key, measure)` pairs.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (K, M)> + '_ {
        self.blocks
            .iter()
            .flat_map(|b| b.keys.iter().copied().zip(b.lens.iter().copied()))
    }

    /// Block and in-block slot of child `index` (`index < len()`).
    fn locate(&self, index: usize) -> (usize, usize) {
        let block = self.counts.search(|count| count <= index);
        (block, index - self.counts.prefix(block))
    }

    fn chunk(&mut self, entries: Vec<(K, M)>) -> Vec<Block<K, M>> {
        let mut blocks = Vec::with_capacity(entries.len().div_ceil(BLOCK_TARGET));
        let mut entries = entries.into_iter().peekable();
        while entries.peek().is_some() {
            let id = self.next_block;
            self.next_block = self.next_block.wrapping_add(1);
            let mut block = Block {
                id,
                keys: Vec::with_capacity(BLOCK_TARGET),
                lens: Vec::with_capacity(BLOCK_TARGET),
                ends: Vec::with_capacity(BLOCK_TARGET),
            };
            for (key, len) in entries.by_ref().take(BLOCK_TARGET) {
                self.homes.insert(key, id);
                block.keys.push(key);
                block.lens.push(len);
            }
            block.rebuild_from(0);
            blocks.push(block);
        }
        blocks
    }

    fn reindex(&mut self) {
        self.sums = Fenwick::build(self.blocks.iter().map(Block::total));
        self.counts = Fenwick::build(self.blocks.iter().map(|b| b.keys.len()));
        self.len = self.blocks.iter().map(|b| b.keys.len()).sum();
        self.order = self
            .blocks
            .iter()
            .enumerate()
            .map(|(position, b)| (b.id, position))
            .collect();
    }
}
