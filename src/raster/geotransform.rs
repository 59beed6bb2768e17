//! Affine georeferencing and pixel → world projection.

use serde::{Deserialize, Serialize};

/// Affine geotransform for converting raster cell indices to world coordinates.
///
/// The transform is defined by 6 coefficients from the GDAL-style affine:
/// ```text
/// x_world = a * col + b * row + c
/// y_world = d * col + e * row + f
/// ```
///
/// For most GeoTIFFs:
/// - `a` is the pixel width (x resolution)
/// - `e` is the pixel height (y resolution, negative for top-down images)
/// - `c` is the x coordinate of the upper-left corner
/// - `f` is the y coordinate of the upper-left corner
/// - `b` and `d` are typically 0 (no rotation/shear)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Pixel width (x scale)
    pub a: f64,
    /// Row rotation (typically 0)
    pub b: f64,
    /// X origin (upper-left x coordinate)
    pub c: f64,
    /// Column rotation (typically 0)
    pub d: f64,
    /// Pixel height (y scale, negative for top-down, positive for bottom-up)
    pub e: f64,
    /// Y origin (upper-left y coordinate)
    pub f: f64,
}

impl GeoTransform {
    /// Transform of a raster without georeferencing: world == pixel space.
    pub const IDENTITY: GeoTransform = GeoTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 0.0,
        e: 1.0,
        f: 0.0,
    };

    /// Create a GeoTransform from the 16-element ModelTransformationTag matrix.
    ///
    /// The matrix is a 4x4 affine transform in row-major order:
    /// ```text
    /// | a  b  0  c |
    /// | d  e  0  f |
    /// | 0  0  0  0 |
    /// | 0  0  0  1 |
    /// ```
    pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
        if matrix.len() < 8 {
            return None;
        }
        Some(Self {
            a: matrix[0],
            b: matrix[1],
            c: matrix[3],
            d: matrix[4],
            e: matrix[5],
            f: matrix[7],
        })
    }

    /// Create a north-up GeoTransform from ModelPixelScaleTag and ModelTiepointTag.
    ///
    /// `scale` is `[sx, sy, sz]`, `tiepoint` is `[i, j, k, x, y, z]` tying raster
    /// cell `(i, j)` to world `(x, y)`. The y scale is stored positive in the tag
    /// and applied downward.
    pub fn from_scale_and_tiepoint(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        if scale.len() < 2 || tiepoint.len() < 6 {
            return None;
        }
        let (sx, sy) = (scale[0], scale[1]);
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        Some(Self {
            a: sx,
            b: 0.0,
            c: x - i * sx,
            d: 0.0,
            e: -sy,
            f: y + j * sy,
        })
    }

    /// Convert pixel coordinates to world coordinates.
    ///
    /// Takes (column, row) and returns (x, y) in the raster's native CRS.
    #[inline]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Where inside a cell a fractional cell index is anchored before projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PixelAnchor {
    /// Cell index maps to the cell's upper-left corner: `transform * (col, row)`.
    #[default]
    Corner,
    /// Cell index maps to the cell center: `transform * (col + 0.5, row + 0.5)`.
    Center,
}

impl PixelAnchor {
    fn offset(self) -> f64 {
        match self {
            PixelAnchor::Corner => 0.0,
            PixelAnchor::Center => 0.5,
        }
    }
}

/// Projects region centroids from raster cell space to the raster's CRS.
///
/// This is a pass-through: no datum or CRS conversion happens here.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateProjector {
    transform: GeoTransform,
    anchor: PixelAnchor,
}

impl CoordinateProjector {
    pub fn new(transform: GeoTransform, anchor: PixelAnchor) -> Self {
        Self { transform, anchor }
    }

    /// Project a fractional `(row, col)` centroid to `(x, y)`.
    pub fn project(&self, row: f64, col: f64) -> (f64, f64) {
        let offset = self.anchor.offset();
        self.transform.pixel_to_world(col + offset, row + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utm_like() -> GeoTransform {
        GeoTransform {
            a: 25.0,
            b: 0.0,
            c: 1_200_000.0,
            d: 0.0,
            e: -25.0,
            f: 900_000.0,
        }
    }

    #[test]
    fn test_pixel_to_world() {
        let gt = utm_like();
        let (x, y) = gt.pixel_to_world(4.0, 2.0);
        assert!((x - 1_200_100.0).abs() < 1e-9);
        assert!((y - 899_950.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_model_transformation() {
        let matrix = [
            10.0, 0.0, 0.0, 500000.0, //
            0.0, -10.0, 0.0, 4100000.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let gt = GeoTransform::from_model_transformation(&matrix).unwrap();
        assert_eq!(gt.a, 10.0);
        assert_eq!(gt.c, 500000.0);
        assert_eq!(gt.e, -10.0);
        assert_eq!(gt.f, 4100000.0);

        assert!(GeoTransform::from_model_transformation(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_from_scale_and_tiepoint() {
        let gt = GeoTransform::from_scale_and_tiepoint(
            &[30.0, 30.0, 0.0],
            &[0.0, 0.0, 0.0, 1_000_000.0, 600_000.0, 0.0],
        )
        .unwrap();
        assert_eq!(gt, GeoTransform { a: 30.0, b: 0.0, c: 1_000_000.0, d: 0.0, e: -30.0, f: 600_000.0 });

        // Tiepoint anchored away from the origin cell
        let gt = GeoTransform::from_scale_and_tiepoint(
            &[30.0, 30.0, 0.0],
            &[2.0, 1.0, 0.0, 1_000_060.0, 599_970.0, 0.0],
        )
        .unwrap();
        assert!((gt.c - 1_000_000.0).abs() < 1e-9);
        assert!((gt.f - 600_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_projector_corner_matches_affine() {
        let gt = utm_like();
        let projector = CoordinateProjector::new(gt, PixelAnchor::Corner);
        let (row, col) = (3.25, 7.5);
        let (x, y) = projector.project(row, col);
        let (ex, ey) = (gt.a * col + gt.b * row + gt.c, gt.d * col + gt.e * row + gt.f);
        assert!((x - ex).abs() < 1e-9);
        assert!((y - ey).abs() < 1e-9);
    }

    #[test]
    fn test_projector_center_offsets_half_cell() {
        let gt = utm_like();
        let corner = CoordinateProjector::new(gt, PixelAnchor::Corner).project(1.0, 1.0);
        let center = CoordinateProjector::new(gt, PixelAnchor::Center).project(1.0, 1.0);
        assert!((center.0 - corner.0 - 12.5).abs() < 1e-9);
        assert!((center.1 - corner.1 + 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_projector_sheared_transform() {
        let gt = GeoTransform { a: 2.0, b: 0.5, c: 10.0, d: 0.25, e: -3.0, f: 20.0 };
        let (x, y) = CoordinateProjector::new(gt, PixelAnchor::Corner).project(4.0, 2.0);
        assert!((x - (2.0 * 2.0 + 0.5 * 4.0 + 10.0)).abs() < 1e-12);
        assert!((y - (0.25 * 2.0 - 3.0 * 4.0 + 20.0)).abs() < 1e-12);
    }
}
