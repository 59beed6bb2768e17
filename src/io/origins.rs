//! Origin and destination CSV formats.

use crate::raster::{CoordinateProjector, Region};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Versioned header layouts of the origins CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OriginSchema {
    /// `origin_id,biomass,x,y`
    V1,
    /// `origin_id,biomass,count,x,y`
    #[default]
    V2,
}

impl OriginSchema {
    pub fn header(self) -> &'static [&'static str] {
        match self {
            OriginSchema::V1 => &["origin_id", "biomass", "x", "y"],
            OriginSchema::V2 => &["origin_id", "biomass", "count", "x", "y"],
        }
    }

    /// Identify the schema from a CSV header row.
    pub fn detect(header: &csv::StringRecord) -> Result<Self> {
        let columns: Vec<&str> = header.iter().map(str::trim).collect();
        [OriginSchema::V2, OriginSchema::V1]
            .into_iter()
            .find(|schema| schema.header() == columns.as_slice())
            .with_context(|| {
                format!(
                    "Unrecognised origins header {:?}, expected {:?} or {:?}",
                    columns,
                    OriginSchema::V2.header(),
                    OriginSchema::V1.header()
                )
            })
    }
}

/// One output origin record.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    /// 1-based id, contiguous in region order
    pub origin_id: u32,
    pub biomass: f64,
    pub count: u64,
    pub x: f64,
    pub y: f64,
}

/// Number regions 1..K in label order and project their centroids.
pub fn origins_from_regions(regions: &[Region], projector: &CoordinateProjector) -> Vec<Origin> {
    regions
        .iter()
        .enumerate()
        .map(|(i, region)| {
            let (x, y) = projector.project(region.centroid_row, region.centroid_col);
            Origin {
                origin_id: i as u32 + 1,
                biomass: region.biomass,
                count: region.count,
                x,
                y,
            }
        })
        .collect()
}

/// Writes origin records under a fixed, versioned header.
pub struct OriginWriter<W: Write> {
    writer: csv::Writer<W>,
    schema: OriginSchema,
    written: usize,
}

impl OriginWriter<File> {
    /// Create (or truncate) an origins CSV at `path`.
    pub fn create(path: &Path, schema: OriginSchema) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Cannot create origins file {}", path.display()))?;
        Self::new(file, schema)
    }
}

impl<W: Write> OriginWriter<W> {
    /// Wrap `inner` and write the header row.
    pub fn new(inner: W, schema: OriginSchema) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(inner);
        writer
            .write_record(schema.header())
            .context("Failed to write origins header")?;
        Ok(Self {
            writer,
            schema,
            written: 0,
        })
    }

    pub fn write(&mut self, origin: &Origin) -> Result<()> {
        // Display formatting keeps whole numbers without a trailing ".0"
        let mut record = vec![origin.origin_id.to_string(), origin.biomass.to_string()];
        if self.schema == OriginSchema::V2 {
            record.push(origin.count.to_string());
        }
        record.push(origin.x.to_string());
        record.push(origin.y.to_string());

        self.writer
            .write_record(&record)
            .with_context(|| format!("Failed to write origin {}", origin.origin_id))?;
        self.written += 1;
        Ok(())
    }

    /// Flush and return the number of records written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush().context("Failed to flush origins file")?;
        Ok(self.written)
    }
}

/// Header layout of a destinations CSV; both carry the same four columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationHeader {
    /// `destination_id,name,x,y`
    Name,
    /// `destination_id,destination_name,x,y`
    DestinationName,
}

impl DestinationHeader {
    pub fn name_column(self) -> &'static str {
        match self {
            DestinationHeader::Name => "name",
            DestinationHeader::DestinationName => "destination_name",
        }
    }

    pub fn detect(header: &csv::StringRecord) -> Result<Self> {
        let columns: Vec<&str> = header.iter().map(str::trim).collect();
        match columns.as_slice() {
            ["destination_id", "name", "x", "y"] => Ok(DestinationHeader::Name),
            ["destination_id", "destination_name", "x", "y"] => Ok(DestinationHeader::DestinationName),
            other => anyhow::bail!(
                "Unrecognised destinations header {:?}, expected destination_id,name,x,y",
                other
            ),
        }
    }
}

/// Read only the header row of a CSV file.
pub fn read_csv_header(path: &Path) -> Result<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Cannot open CSV {}", path.display()))?;
    let header = reader
        .headers()
        .with_context(|| format!("Cannot read CSV header of {}", path.display()))?
        .clone();
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GeoTransform, PixelAnchor};

    fn region(label: u32, count: u64, biomass: f64, row: f64, col: f64) -> Region {
        Region {
            label,
            count,
            biomass,
            centroid_row: row,
            centroid_col: col,
        }
    }

    #[test]
    fn test_origin_ids_contiguous() {
        let regions = vec![
            region(1, 4, 12.0, 1.5, 1.5),
            region(2, 1, 3.0, 4.0, 0.0),
            region(3, 2, 8.5, 0.0, 3.5),
        ];
        let projector = CoordinateProjector::new(GeoTransform::IDENTITY, PixelAnchor::Corner);
        let origins = origins_from_regions(&regions, &projector);
        let ids: Vec<u32> = origins.iter().map(|o| o.origin_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(origins[2].x, 3.5);
        assert_eq!(origins[2].y, 0.0);
    }

    #[test]
    fn test_write_v2() {
        let mut buf = Vec::new();
        let mut writer = OriginWriter::new(&mut buf, OriginSchema::V2).unwrap();
        writer
            .write(&Origin { origin_id: 1, biomass: 12.0, count: 4, x: 1.5, y: -2.0 })
            .unwrap();
        assert_eq!(writer.finish().unwrap(), 1);
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "origin_id,biomass,count,x,y\n1,12,4,1.5,-2\n");
    }

    #[test]
    fn test_write_v1_omits_count() {
        let mut buf = Vec::new();
        let mut writer = OriginWriter::new(&mut buf, OriginSchema::V1).unwrap();
        writer
            .write(&Origin { origin_id: 7, biomass: 2.25, count: 9, x: 10.0, y: 20.0 })
            .unwrap();
        writer.finish().unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "origin_id,biomass,x,y\n7,2.25,10,20\n");
    }

    #[test]
    fn test_header_detection() {
        let v2 = csv::StringRecord::from(vec!["origin_id", "biomass", "count", "x", "y"]);
        assert_eq!(OriginSchema::detect(&v2).unwrap(), OriginSchema::V2);
        let v1 = csv::StringRecord::from(vec!["origin_id", "biomass", "x", "y"]);
        assert_eq!(OriginSchema::detect(&v1).unwrap(), OriginSchema::V1);
        let bad = csv::StringRecord::from(vec!["id", "x", "y"]);
        assert!(OriginSchema::detect(&bad).is_err());

        let dest = csv::StringRecord::from(vec!["destination_id", "destination_name", "x", "y"]);
        assert_eq!(DestinationHeader::detect(&dest).unwrap().name_column(), "destination_name");
        let dest = csv::StringRecord::from(vec!["destination_id", "name", "x", "y"]);
        assert_eq!(DestinationHeader::detect(&dest).unwrap(), DestinationHeader::Name);
    }

    #[test]
    fn test_create_and_read_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("origins.csv");
        let writer = OriginWriter::create(&path, OriginSchema::V2).unwrap();
        assert_eq!(writer.finish().unwrap(), 0);
        let header = read_csv_header(&path).unwrap();
        assert_eq!(OriginSchema::detect(&header).unwrap(), OriginSchema::V2);
    }
}
