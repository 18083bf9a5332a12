//! Average-linkage hierarchical clustering for heatmap ordering
//!
//! Merges are found with the nearest-neighbour chain algorithm over a
//! condensed Euclidean distance matrix, then sorted by height and labelled so
//! that leaves are `0..n` and the k-th merge creates cluster `n + k`.

use ndarray::ArrayView2;
use rayon::prelude::*;

/// One agglomeration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

/// Result of clustering `n` observations
#[derive(Debug, Clone, PartialEq)]
pub struct Linkage {
    n: usize,
    merges: Vec<Merge>,
}

/// Condensed upper-triangle storage of pairwise distances
struct Condensed {
    n: usize,
    d: Vec<f64>,
}

impl Condensed {
    fn index(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        self.n * i - i * (i + 1) / 2 + (j - i - 1)
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        self.d[self.index(i, j)]
    }

    fn set(&mut self, i: usize, j: usize, v: f64) {
        let idx = self.index(i, j);
        self.d[idx] = v;
    }
}

fn euclidean_distances(rows: ArrayView2<f64>) -> Condensed {
    let n = rows.nrows();
    let d: Vec<f64> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            let a = rows.row(i);
            (i + 1..n).map(move |j| {
                a.iter()
                    .zip(rows.row(j).iter())
                    .map(|(x, y)| (x - y).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
        })
        .collect();
    Condensed { n, d }
}

/// Average linkage of the rows of `data` under Euclidean distance
pub fn average_linkage(data: ArrayView2<f64>) -> Linkage {
    let n = data.nrows();
    if n < 2 {
        return Linkage { n, merges: Vec::new() };
    }
    let mut dist = euclidean_distances(data);
    let mut size = vec![1usize; n];
    let mut active = vec![true; n];
    let mut raw: Vec<(usize, usize, f64)> = Vec::with_capacity(n - 1);
    let mut chain: Vec<usize> = Vec::with_capacity(n);

    for _ in 0..n - 1 {
        if chain.is_empty() {
            if let Some(first) = active.iter().position(|&a| a) {
                chain.push(first);
            }
        }

        let (x, y, height) = loop {
            let x = chain[chain.len() - 1];
            let (mut y, mut best) = if chain.len() >= 2 {
                let prev = chain[chain.len() - 2];
                (prev, dist.get(x, prev))
            } else {
                (usize::MAX, f64::INFINITY)
            };
            for i in (0..n).filter(|&i| active[i] && i != x) {
                let d = dist.get(x, i);
                if d < best || y == usize::MAX {
                    best = d;
                    y = i;
                }
            }
            if chain.len() >= 2 && y == chain[chain.len() - 2] {
                break (x, y, best);
            }
            chain.push(y);
        };
        chain.truncate(chain.len() - 2);

        let (x, y) = if x < y { (x, y) } else { (y, x) };
        raw.push((x, y, height));
        let (sx, sy) = (size[x] as f64, size[y] as f64);
        for i in (0..n).filter(|&i| active[i] && i != x && i != y) {
            let merged = (sx * dist.get(i, x) + sy * dist.get(i, y)) / (sx + sy);
            dist.set(i, y, merged);
        }
        active[x] = false;
        size[y] += size[x];
        size[x] = 0;
    }

    raw.sort_by(|a, b| a.2.total_cmp(&b.2));
    Linkage {
        n,
        merges: label(n, &raw),
    }
}

/// Relabel merges of representative leaves into cluster ids
fn label(n: usize, raw: &[(usize, usize, f64)]) -> Vec<Merge> {
    let mut parent: Vec<usize> = (0..2 * n - 1).collect();
    let mut sizes = vec![1usize; 2 * n - 1];
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    raw.iter()
        .enumerate()
        .map(|(k, &(x, y, height))| {
            let (a, b) = (find(&mut parent, x), find(&mut parent, y));
            let id = n + k;
            parent[a] = id;
            parent[b] = id;
            sizes[id] = sizes[a] + sizes[b];
            Merge {
                left: a.min(b),
                right: a.max(b),
                height,
                size: sizes[id],
            }
        })
        .collect()
}

impl Linkage {
    pub fn n_leaves(&self) -> usize {
        self.n
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Leaves in dendrogram order: left subtree before right subtree
    pub fn leaf_order(&self) -> Vec<usize> {
        if self.merges.is_empty() {
            return (0..self.n).collect();
        }
        let mut order = Vec::with_capacity(self.n);
        let mut stack = vec![2 * self.n - 2];
        while let Some(node) = stack.pop() {
            if node < self.n {
                order.push(node);
            } else {
                let m = self.merges[node - self.n];
                stack.push(m.right);
                stack.push(m.left);
            }
        }
        order
    }

    /// U-shaped links for drawing: `(left position, left height, right
    /// position, right height, merge height)`, with leaf `k` of
    /// [`leaf_order`](Self::leaf_order) at position `k + 0.5`.
    pub fn links(&self) -> Vec<(f64, f64, f64, f64, f64)> {
        let mut position = vec![0.0; (2 * self.n).saturating_sub(1)];
        let mut height = vec![0.0; position.len()];
        for (k, leaf) in self.leaf_order().into_iter().enumerate() {
            position[leaf] = k as f64 + 0.5;
        }
        self.merges
            .iter()
            .enumerate()
            .map(|(k, m)| {
                let id = self.n + k;
                position[id] = 0.5 * (position[m.left] + position[m.right]);
                height[id] = m.height;
                (position[m.left], height[m.left], position[m.right], height[m.right], m.height)
            })
            .collect()
    }

    /// Height of the final merge
    pub fn max_height(&self) -> f64 {
        self.merges.last().map_or(0.0, |m| m.height)
    }
}
