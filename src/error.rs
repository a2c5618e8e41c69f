/*! Error type shared by every module in this crate. */

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout this crate.
pub type SwathPixResult<T> = Result<T, SwathPixError>;

/// Everything that can go wrong while downloading, converting, or reading
/// pixel-cloud products.
#[derive(Error, Debug)]
pub enum SwathPixError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The granule file could not be opened at all.
    #[error("{}: unable to open granule: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    /// The granule does not have the expected pixel-cloud group.
    #[error("{}: no '{group}' group in granule", .path.display())]
    MissingGroup { path: PathBuf, group: String },

    /// A requested variable does not exist in the granule.
    #[error("{}: variable '{variable}' not found in pixel-cloud group", .path.display())]
    MissingVariable { path: PathBuf, variable: String },

    /// The variable exists but is not one-dimensional over the points dimension,
    /// so it cannot be extracted as a per-pixel column.
    #[error("{}: variable '{variable}' is not a per-point variable", .path.display())]
    NotAPointVariable { path: PathBuf, variable: String },

    /// A required global attribute is absent or has an unusable value.
    #[error("{}: missing or malformed global attribute '{attribute}'", .path.display())]
    MissingAttribute { path: PathBuf, attribute: String },

    /// Geometry input (WKT or a stored geometry blob) could not be interpreted.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Layer and column names are spliced into SQL and must be plain identifiers.
    #[error("'{0}' is not usable as a layer or column name")]
    InvalidName(String),

    #[error("layer '{0}' not found in container")]
    LayerNotFound(String),

    /// The container holds different variable columns than the caller requested.
    #[error("schema mismatch: container has columns {existing:?}, requested {requested:?}")]
    SchemaMismatch {
        existing: Vec<String>,
        requested: Vec<String>,
    },

    /// A value stored in the container could not be decoded.
    #[error("container corrupted: {0}")]
    CorruptContainer(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    /// The server closed the connection before the advertised length arrived.
    #[error("incomplete download from {url}: got {got} bytes, expected {expected}")]
    IncompleteDownload { url: String, got: u64, expected: u64 },
}
