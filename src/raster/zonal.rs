//! Zonal statistics over a label image.
//!
//! Per-label vectors always carry K+1 slots, slot 0 being the background.
//! Callers index regions by origin id only after [`drop_background`].

use super::label::LabelImage;
use anyhow::{Context, Result};
use ndarray::Array2;
use rayon::prelude::*;

/// Cells per parallel work item.
const BLOCK_CELLS: usize = 64 * 1024;

/// Pixel count and index sums for one label.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub count: u64,
    pub row_sum: f64,
    pub col_sum: f64,
}

impl Moments {
    /// Arithmetic mean `(row, col)` of the label's cells.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some((self.row_sum / n, self.col_sum / n))
    }

    fn merge(mut self, other: Moments) -> Moments {
        self.count += other.count;
        self.row_sum += other.row_sum;
        self.col_sum += other.col_sum;
        self
    }
}

/// Sum `source` values per label, background included (a weighted bincount).
///
/// Returns a vector of length `num_labels + 1`.
pub fn zonal_sums(image: &LabelImage, source: &Array2<f64>) -> Result<Vec<f64>> {
    if image.labels.dim() != source.dim() {
        anyhow::bail!(
            "Label image shape {:?} does not match source shape {:?}",
            image.labels.dim(),
            source.dim()
        );
    }

    let slots = image.num_labels as usize + 1;
    let labels = image.labels.as_standard_layout();
    let values = source.as_standard_layout();
    let labels = labels.as_slice().context("label image is not contiguous")?;
    let values = values.as_slice().context("source raster is not contiguous")?;

    let sums = labels
        .par_chunks(BLOCK_CELLS)
        .zip(values.par_chunks(BLOCK_CELLS))
        .fold(
            || vec![0.0f64; slots],
            |mut acc, (label_block, value_block)| {
                for (&label, &value) in label_block.iter().zip(value_block) {
                    acc[label as usize] += value;
                }
                acc
            },
        )
        .reduce(
            || vec![0.0f64; slots],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        );

    Ok(sums)
}

/// Pixel count and centroid accumulators per label, background included.
pub fn label_moments(image: &LabelImage) -> Vec<Moments> {
    let slots = image.num_labels as usize + 1;
    let (_, cols) = image.labels.dim();
    if cols == 0 {
        return vec![Moments::default(); slots];
    }

    let labels = image.labels.as_standard_layout();
    // Parallelize over whole rows so each cell's (row, col) is recoverable
    labels
        .outer_iter()
        .enumerate()
        .collect::<Vec<_>>()
        .into_par_iter()
        .fold(
            || vec![Moments::default(); slots],
            |mut acc, (row, cells)| {
                for (col, &label) in cells.iter().enumerate() {
                    let m = &mut acc[label as usize];
                    m.count += 1;
                    m.row_sum += row as f64;
                    m.col_sum += col as f64;
                }
                acc
            },
        )
        .reduce(
            || vec![Moments::default(); slots],
            |a, b| a.into_iter().zip(b).map(|(x, y)| x.merge(y)).collect(),
        )
}

/// Drop the background slot from a per-label vector.
///
/// Fails unless `per_label.len() == num_labels + 1`; the result is indexed by
/// `origin_id - 1`.
pub fn drop_background<T: Clone>(per_label: &[T], num_labels: u32) -> Result<Vec<T>> {
    let expected = num_labels as usize + 1;
    if per_label.len() != expected {
        anyhow::bail!(
            "Per-label vector has {} slots, expected {} (K={} plus background)",
            per_label.len(),
            expected,
            num_labels
        );
    }
    Ok(per_label[1..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::label::{label_regions, threshold_mask};

    fn block_raster() -> Array2<f64> {
        // One 3x3 block of 5 inside a ring of zeros
        let mut values = Array2::<f64>::zeros((5, 5));
        for r in 1..4 {
            for c in 1..4 {
                values[[r, c]] = 5.0;
            }
        }
        values
    }

    #[test]
    fn test_single_block_sum() {
        let values = block_raster();
        let image = label_regions(&threshold_mask(&values, 1.0));
        let sums = zonal_sums(&image, &values).unwrap();
        assert_eq!(sums.len(), 2);
        assert_eq!(sums[0], 0.0);
        assert_eq!(sums[1], 45.0);

        let moments = label_moments(&image);
        assert_eq!(moments[1].count, 9);
        assert_eq!(moments[1].centroid(), Some((2.0, 2.0)));
        assert_eq!(moments[0].count, 16);
    }

    #[test]
    fn test_background_slot_carries_excluded_values() {
        // Values at or below the threshold are summed into slot 0
        let values = ndarray::array![[1.0, 0.5, 3.0], [0.0, 0.0, 2.0]];
        let image = label_regions(&threshold_mask(&values, 1.0));
        let sums = zonal_sums(&image, &values).unwrap();
        assert_eq!(sums, vec![1.5, 5.0]);
        let regions = drop_background(&sums, image.num_labels).unwrap();
        assert_eq!(regions, vec![5.0]);
    }

    #[test]
    fn test_drop_background_length_check() {
        assert!(drop_background(&[1.0, 2.0], 2).is_err());
        assert!(drop_background(&[1.0, 2.0, 3.0], 2).is_ok());
        assert!(drop_background::<f64>(&[0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_shape_mismatch() {
        let values = block_raster();
        let image = label_regions(&threshold_mask(&values, 1.0));
        let other = Array2::<f64>::zeros((4, 5));
        assert!(zonal_sums(&image, &other).is_err());
    }

    #[test]
    fn test_moments_conserve_pixels() {
        let values = ndarray::array![
            [2.0, 0.0, 0.0, 9.0],
            [2.0, 0.0, 9.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [4.0, 4.0, 4.0, 0.0],
        ];
        let image = label_regions(&threshold_mask(&values, 1.0));
        let moments = label_moments(&image);
        assert_eq!(moments.len(), image.num_labels as usize + 1);
        let total: u64 = moments.iter().map(|m| m.count).sum();
        assert_eq!(total as usize, values.len());
        assert_eq!(moments[1].centroid(), Some((0.5, 0.0)));
        assert_eq!(moments[2].centroid(), Some((0.5, 2.5)));
        assert_eq!(moments[3].centroid(), Some((3.0, 1.0)));
    }

    #[test]
    fn test_empty_raster() {
        let values = Array2::<f64>::zeros((0, 0));
        let image = label_regions(&threshold_mask(&values, 1.0));
        assert_eq!(zonal_sums(&image, &values).unwrap(), vec![0.0]);
        assert_eq!(label_moments(&image).len(), 1);
    }
}
