pub use catalog::{
    Asset, CatalogClient, CatalogItem, Downloader, ItemProperties, PIXEL_CLOUD_COLLECTION,
};
pub use converter::{ConversionSummary, Converter, WriteMode, DEFAULT_LAYER};
pub use error::{SwathPixError, SwathPixResult};
pub use geo::AreaOfInterest;
pub use gpkg::{GeoPackage, GEOMETRY_COLUMN, IDENTIFIER_COLUMNS};
pub use granule::{discover_granules, Granule, GranuleInfo, PixelBatch, PixelRecord};
pub use reader::PixelTable;

/**************************************************************************************************
 * Private Implementation
 *************************************************************************************************/
mod catalog;
mod converter;
mod error;
mod geo;
mod gpkg;
mod granule;
mod reader;
