//! File I/O: raster input and origin/destination CSVs.

pub mod origins;
pub mod raster_reader;

pub use origins::{
    origins_from_regions, read_csv_header, DestinationHeader, Origin, OriginSchema, OriginWriter,
};
pub use raster_reader::read_raster;
