//! Connected-component labeling of a thresholded raster.
//!
//! Two-pass union-find over an 8-connected foreground mask. Labels are
//! renumbered so that region ids follow the row-major order of each
//! region's first cell; 0 is reserved for background.

use ndarray::Array2;

/// Neighbours already visited when scanning row-major (full connectivity).
const PRIOR_NEIGHBOURS: [(isize, isize); 4] = [(-1, -1), (-1, 0), (-1, 1), (0, -1)];

/// Label array produced by [`label_regions`].
#[derive(Debug, Clone)]
pub struct LabelImage {
    /// Per-cell label; 0 for background, 1..=num_labels for regions
    pub labels: Array2<u32>,

    /// Number of distinct regions (K)
    pub num_labels: u32,
}

impl LabelImage {
    /// Number of background cells.
    pub fn background_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 0).count()
    }
}

/// Build the foreground mask: values above `threshold` whose integer part is non-zero.
///
/// NaN is never foreground.
pub fn threshold_mask(values: &Array2<f64>, threshold: f64) -> Array2<bool> {
    values.mapv(|v| v > threshold && v.trunc() != 0.0)
}

/// Label 8-connected regions of `mask`.
///
/// An all-background mask yields `num_labels == 0`.
pub fn label_regions(mask: &Array2<bool>) -> LabelImage {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));

    // parent[0] is the background slot and never participates in unions
    let mut parent: Vec<u32> = vec![0];

    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] {
                continue;
            }

            let mut current = 0u32;
            for (dr, dc) in PRIOR_NEIGHBOURS {
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if nr < 0 || nc < 0 || nc >= cols as isize {
                    continue;
                }
                let neighbour = labels[[nr as usize, nc as usize]];
                if neighbour == 0 {
                    continue;
                }
                current = if current == 0 {
                    find(&mut parent, neighbour)
                } else {
                    union(&mut parent, current, neighbour)
                };
            }

            if current == 0 {
                current = parent.len() as u32;
                parent.push(current);
            }
            labels[[r, c]] = current;
        }
    }

    // Resolve provisional labels and renumber in scan order
    let mut remap = vec![0u32; parent.len()];
    let mut next = 0u32;
    for label in labels.iter_mut() {
        if *label == 0 {
            continue;
        }
        let root = find(&mut parent, *label) as usize;
        if remap[root] == 0 {
            next += 1;
            remap[root] = next;
        }
        *label = remap[root];
    }

    tracing::debug!("Labeled {} regions in {}x{} raster", next, rows, cols);

    LabelImage {
        labels,
        num_labels: next,
    }
}

fn find(parent: &mut [u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        let grandparent = parent[parent[x as usize] as usize];
        parent[x as usize] = grandparent;
        x = grandparent;
    }
    x
}

/// Merge the sets containing `a` and `b`; the smaller root wins.
fn union(parent: &mut [u32], a: u32, b: u32) -> u32 {
    let ra = find(parent, a);
    let rb = find(parent, b);
    let (lo, hi) = if ra <= rb { (ra, rb) } else { (rb, ra) };
    parent[hi as usize] = lo;
    lo
}
