/*!
 * Access to pixel-cloud product granules.
 *
 * A granule is one NetCDF file per satellite pass/tile. The per-pixel data
 * lives in a `pixel_cloud` group as one-dimensional variables over the
 * `points` dimension, and the orbit information that identifies the granule is
 * stored in global attributes.
 */

use crate::{
    error::{SwathPixError, SwathPixResult},
    geo::AreaOfInterest,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use std::path::{Path, PathBuf};

/// NetCDF group holding the per-pixel variables.
const PIXEL_CLOUD_GROUP: &str = "pixel_cloud";
/// The dimension every extractable variable must be defined over.
const POINTS_DIM: &str = "points";
const LONGITUDE_VAR: &str = "longitude";
const LATITUDE_VAR: &str = "latitude";
/// Timestamp format of the `time_granule_start` global attribute.
const TIME_ATTR_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Identifying information for one granule, taken from its global attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranuleInfo {
    pub cycle_number: u16,
    pub pass_number: u16,
    pub tile_number: u16,
    /// Which half of the swath this tile comes from, "L" or "R".
    pub swath_side: String,
    pub time_granule_start: DateTime<Utc>,
}

impl GranuleInfo {
    /// Short human readable label, e.g. `20230601_473_021_133L`.
    pub fn granule_label(&self) -> String {
        format!(
            "{}_{:03}_{:03}_{:03}{}",
            self.time_granule_start.format("%Y%m%d"),
            self.cycle_number,
            self.pass_number,
            self.tile_number,
            self.swath_side
        )
    }
}

/// One retained pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelRecord {
    pub longitude: f64,
    pub latitude: f64,
    /// Variable values in the same order as [`PixelBatch::variables`].
    pub values: Vec<f64>,
}

/// The pixels extracted from a single granule for a fixed variable list.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBatch {
    pub variables: Vec<String>,
    pub records: Vec<PixelRecord>,
}

/// Handle to an open granule file.
pub struct Granule {
    file: netcdf::File,
    info: GranuleInfo,
    path: PathBuf,
}

impl Granule {
    /// Open a granule and read its identifying attributes.
    pub fn open<P: AsRef<Path>>(path: P) -> SwathPixResult<Self> {
        let path = path.as_ref().to_path_buf();

        let file = netcdf::open(&path).map_err(|source| SwathPixError::Unreadable {
            path: path.clone(),
            source,
        })?;

        let info = read_info(&file, &path)?;

        Ok(Granule { file, info, path })
    }

    pub fn info(&self) -> &GranuleInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the requested variables for every point, keeping only points that
    /// intersect the area of interest when one is provided.
    ///
    /// An empty batch is not an error; it just means the granule does not
    /// overlap the area of interest.
    pub fn read_batch(
        &self,
        variables: &[String],
        area_of_interest: Option<&AreaOfInterest>,
    ) -> SwathPixResult<PixelBatch> {
        let group = self.pixel_cloud_group()?;

        let longitudes = self.point_variable(&group, LONGITUDE_VAR)?;
        let latitudes = self.point_variable(&group, LATITUDE_VAR)?;
        debug_assert_eq!(longitudes.len(), latitudes.len());

        let columns: Vec<Vec<f64>> = variables
            .iter()
            .map(|name| self.point_variable(&group, name))
            .collect::<SwathPixResult<_>>()?;

        let mut records = Vec::new();
        for (idx, (&lon, &lat)) in longitudes.iter().zip(latitudes.iter()).enumerate() {
            if let Some(aoi) = area_of_interest {
                if !aoi.contains(lon, lat) {
                    continue;
                }
            }

            let values = columns.iter().map(|column| column[idx]).collect();
            records.push(PixelRecord {
                longitude: lon,
                latitude: lat,
                values,
            });
        }

        Ok(PixelBatch {
            variables: variables.to_vec(),
            records,
        })
    }

    fn pixel_cloud_group(&self) -> SwathPixResult<netcdf::Group<'_>> {
        self.file
            .group(PIXEL_CLOUD_GROUP)?
            .ok_or_else(|| SwathPixError::MissingGroup {
                path: self.path.clone(),
                group: PIXEL_CLOUD_GROUP.to_string(),
            })
    }

    /// Load a single variable as a full column of doubles, insisting that it
    /// really is one value per point. Multi-dimensional diagnostics like the
    /// interferogram cannot be flattened into the output table.
    fn point_variable(&self, group: &netcdf::Group, name: &str) -> SwathPixResult<Vec<f64>> {
        let var = group
            .variable(name)
            .ok_or_else(|| SwathPixError::MissingVariable {
                path: self.path.clone(),
                variable: name.to_string(),
            })?;

        let dims = var.dimensions();
        if dims.len() != 1 || dims[0].name() != POINTS_DIM {
            return Err(SwathPixError::NotAPointVariable {
                path: self.path.clone(),
                variable: name.to_string(),
            });
        }

        Ok(var.get_values::<f64, _>(..)?)
    }
}

fn read_info(file: &netcdf::File, path: &Path) -> SwathPixResult<GranuleInfo> {
    let cycle_number = attr_u16(file, path, "cycle_number")?;
    let pass_number = attr_u16(file, path, "pass_number")?;
    let tile_number = attr_u16(file, path, "tile_number")?;
    let swath_side = attr_string(file, path, "swath_side")?;

    let attribute = "time_granule_start";
    let time_str = attr_string(file, path, attribute)?;
    let naive = NaiveDateTime::parse_from_str(&time_str, TIME_ATTR_FORMAT).map_err(|_| {
        SwathPixError::MissingAttribute {
            path: path.to_path_buf(),
            attribute: attribute.to_string(),
        }
    })?;
    let time_granule_start = DateTime::from_naive_utc_and_offset(naive, Utc);

    Ok(GranuleInfo {
        cycle_number,
        pass_number,
        tile_number,
        swath_side,
        time_granule_start,
    })
}

fn attr_u16(file: &netcdf::File, path: &Path, name: &str) -> SwathPixResult<u16> {
    use netcdf::AttributeValue::*;

    let missing = || SwathPixError::MissingAttribute {
        path: path.to_path_buf(),
        attribute: name.to_string(),
    };

    // Producers are not consistent about attribute types, so accept any
    // integer representation that fits.
    match file.attribute(name).ok_or_else(missing)?.value()? {
        Uchar(v) => Ok(v as u16),
        Ushort(v) => Ok(v),
        Short(v) if v >= 0 => Ok(v as u16),
        Int(v) if (0..=u16::MAX as i32).contains(&v) => Ok(v as u16),
        Uint(v) if v <= u16::MAX as u32 => Ok(v as u16),
        Str(s) => s.trim().parse().map_err(|_| missing()),
        _ => Err(missing()),
    }
}

fn attr_string(file: &netcdf::File, path: &Path, name: &str) -> SwathPixResult<String> {
    let missing = || SwathPixError::MissingAttribute {
        path: path.to_path_buf(),
        attribute: name.to_string(),
    };

    match file.attribute(name).ok_or_else(missing)?.value()? {
        netcdf::AttributeValue::Str(s) => Ok(s),
        _ => Err(missing()),
    }
}

/// Find NetCDF granules below `dir`, sorted by the acquisition timestamp
/// embedded in the standard product file name. Files without a recognizable
/// timestamp sort by plain name at the end.
pub fn discover_granules<P: AsRef<Path>>(dir: P) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|res| match res {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("granule discovery skipping entry: {err}");
                None
            }
        })
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext == "nc")
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    paths.sort_by_key(|path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        (
            file_name_time_key(&name).is_none(),
            file_name_time_key(&name),
            name,
        )
    });

    paths
}

/// Pull the first `YYYYMMDDThhmmss` stamp out of a product file name.
fn file_name_time_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    if bytes.len() < 15 {
        return None;
    }

    for start in 0..=bytes.len() - 15 {
        let window = &bytes[start..start + 15];
        if window[8] == b'T'
            && window[..8].iter().all(u8::is_ascii_digit)
            && window[9..].iter().all(u8::is_ascii_digit)
        {
            return Some(name[start..start + 15].to_string());
        }
    }

    None
}
