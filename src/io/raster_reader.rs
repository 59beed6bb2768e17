//! Single-band GeoTIFF reading.
//!
//! Georeferencing is taken from, in order of preference:
//! 1. ModelTransformationTag (full affine)
//! 2. ModelPixelScaleTag + ModelTiepointTag (north-up)
//! 3. Identity, with a warning (cell indices become coordinates)

use crate::raster::{GeoTransform, Raster};
use anyhow::{Context, Result};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

/// Read band 1 of a TIFF file as `f64` values plus its geotransform.
pub fn read_raster(path: &Path) -> Result<Raster> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open raster: {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("Failed to initialise TIFF decoder for {}", path.display()))?;

    let (width, height) = decoder
        .dimensions()
        .with_context(|| format!("Cannot read dimensions of {}", path.display()))?;

    let transform = read_geo_transform(&mut decoder)
        .with_context(|| format!("Cannot read georeferencing tags of {}", path.display()))?;

    let image = decoder
        .read_image()
        .with_context(|| format!("Failed to decode raster {}", path.display()))?;
    let values = decoding_result_to_f64(image);

    let cells = width as usize * height as usize;
    if cells == 0 {
        anyhow::bail!("Raster {} has no cells ({}x{})", path.display(), width, height);
    }
    if values.len() % cells != 0 {
        anyhow::bail!(
            "Raster {} decoded to {} samples, not a multiple of {}x{}",
            path.display(),
            values.len(),
            width,
            height
        );
    }

    // Interleaved samples: keep the first band only
    let samples_per_pixel = values.len() / cells;
    let band: Vec<f64> = values.into_iter().step_by(samples_per_pixel).collect();
    let data = Array2::from_shape_vec((height as usize, width as usize), band)
        .context("Decoded band does not match raster dimensions")?;

    tracing::info!(
        "Read raster {}: {}x{} cells, {} sample(s) per pixel",
        path.display(),
        width,
        height,
        samples_per_pixel
    );

    Ok(Raster::new(data, transform))
}

fn read_geo_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let matrix = value.into_f64_vec()?;
        if let Some(gt) = GeoTransform::from_model_transformation(&matrix) {
            return Ok(gt);
        }
    }

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;

    if let (Some(scale), Some(tiepoint)) = (scale, tiepoint) {
        if let Some(gt) = GeoTransform::from_scale_and_tiepoint(&scale, &tiepoint) {
            return Ok(gt);
        }
    }

    tracing::warn!("No georeferencing tags found in TIFF, using identity transform");
    Ok(GeoTransform::IDENTITY)
}

fn decoding_result_to_f64(image: DecodingResult) -> Vec<f64> {
    match image {
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    fn write_f32_tiff(path: &Path, width: u32, height: u32, data: &[f32], geo: bool) {
        let mut file = File::create(path).unwrap();
        let mut tiff = TiffEncoder::new(&mut file).unwrap();
        let mut image = tiff.new_image::<colortype::Gray32Float>(width, height).unwrap();
        if geo {
            image
                .encoder()
                .write_tag(Tag::ModelPixelScaleTag, &[10.0f64, 10.0, 0.0][..])
                .unwrap();
            image
                .encoder()
                .write_tag(
                    Tag::ModelTiepointTag,
                    &[0.0f64, 0.0, 0.0, 1_000_000.0, 500_000.0, 0.0][..],
                )
                .unwrap();
        }
        image.write_data(data).unwrap();
    }

    #[test]
    fn test_read_float_raster_without_georeferencing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tif");
        let data: Vec<f32> = (0..12).map(|v| v as f32 * 0.5).collect();
        write_f32_tiff(&path, 4, 3, &data, false);

        let raster = read_raster(&path).unwrap();
        assert_eq!((raster.height(), raster.width()), (3, 4));
        assert_eq!(raster.data[[0, 1]], 0.5);
        assert_eq!(raster.data[[2, 3]], 5.5);
        assert_eq!(raster.transform, GeoTransform::IDENTITY);
    }

    #[test]
    fn test_read_scale_and_tiepoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.tif");
        write_f32_tiff(&path, 2, 2, &[1.0, 2.0, 3.0, 4.0], true);

        let raster = read_raster(&path).unwrap();
        assert_eq!(raster.transform.a, 10.0);
        assert_eq!(raster.transform.e, -10.0);
        assert_eq!(raster.transform.c, 1_000_000.0);
        assert_eq!(raster.transform.f, 500_000.0);
    }

    #[test]
    fn test_missing_file() {
        let err = read_raster(Path::new("/nonexistent/harvest.tif")).unwrap_err();
        assert!(format!("{:#}", err).contains("Cannot open raster"));
    }
}
