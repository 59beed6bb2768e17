//! Harvest raster → region extraction.
//!
//! The extraction flow is:
//! 1. Threshold the source raster into a foreground mask
//! 2. Label 8-connected regions of the mask
//! 3. Sum source values per label (zonal statistics)
//! 4. Compute per-region pixel counts and centroids
//! 5. Project centroids through the raster's affine transform

mod geotransform;
pub mod label;
pub mod zonal;

pub use geotransform::{CoordinateProjector, GeoTransform, PixelAnchor};
pub use label::{label_regions, threshold_mask, LabelImage};

use anyhow::{Context, Result};
use ndarray::Array2;

/// A single-band raster with its georeferencing.
#[derive(Debug, Clone)]
pub struct Raster {
    /// Cell values, indexed `[row, col]`
    pub data: Array2<f64>,

    /// Affine transform from (col, row) to world coordinates
    pub transform: GeoTransform,
}

impl Raster {
    pub fn new(data: Array2<f64>, transform: GeoTransform) -> Self {
        Self { data, transform }
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }
}

/// One connected foreground region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Label id in the label image (1..=K)
    pub label: u32,

    /// Number of cells
    pub count: u64,

    /// Sum of source values over the region's cells
    pub biomass: f64,

    /// Mean row index of the region's cells
    pub centroid_row: f64,

    /// Mean column index of the region's cells
    pub centroid_col: f64,
}

/// Label `raster` and compute per-region statistics, ordered by label id.
///
/// An all-background raster returns an empty vector.
pub fn extract_regions(raster: &Raster, threshold: f64) -> Result<Vec<Region>> {
    let mask = threshold_mask(&raster.data, threshold);
    let image = label_regions(&mask);

    let sums = zonal::zonal_sums(&image, &raster.data)?;
    let sums = zonal::drop_background(&sums, image.num_labels)?;
    let moments = zonal::label_moments(&image);
    let moments = zonal::drop_background(&moments, image.num_labels)?;

    sums.into_iter()
        .zip(moments)
        .enumerate()
        .map(|(i, (biomass, m))| {
            let label = i as u32 + 1;
            let (centroid_row, centroid_col) = m
                .centroid()
                .with_context(|| format!("Label {} has no cells", label))?;
            Ok(Region {
                label,
                count: m.count,
                biomass,
                centroid_row,
                centroid_col,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_block() {
        let mut data = Array2::<f64>::zeros((6, 6));
        for r in 2..5 {
            for c in 1..4 {
                data[[r, c]] = 5.0;
            }
        }
        let raster = Raster::new(data, GeoTransform::IDENTITY);
        let regions = extract_regions(&raster, 1.0).unwrap();
        assert_eq!(regions.len(), 1);
        let region = &regions[0];
        assert_eq!(region.label, 1);
        assert_eq!(region.count, 9);
        assert_eq!(region.biomass, 45.0);
        assert_eq!((region.centroid_row, region.centroid_col), (3.0, 2.0));
    }

    #[test]
    fn test_extract_all_background() {
        let raster = Raster::new(Array2::from_elem((3, 4), 0.5), GeoTransform::IDENTITY);
        assert!(extract_regions(&raster, 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_extract_sums_use_source_values() {
        // Fractional source values are summed unmodified, not truncated
        let data = ndarray::array![[2.5, 3.25, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 7.75]];
        let raster = Raster::new(data, GeoTransform::IDENTITY);
        let regions = extract_regions(&raster, 1.0).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].biomass, 5.75);
        assert_eq!(regions[0].count, 2);
        assert_eq!(regions[1].biomass, 7.75);
        assert_eq!((regions[1].centroid_row, regions[1].centroid_col), (2.0, 2.0));
    }
}
