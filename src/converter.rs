/*!
 * The convert-and-filter pipeline: read granules, restrict them to an area of
 * interest and a variable list, and persist the result in a GeoPackage
 * container.
 */

use crate::{
    error::{SwathPixError, SwathPixResult},
    geo::AreaOfInterest,
    gpkg::GeoPackage,
    granule::Granule,
};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Layer name used when the caller does not pick one.
pub const DEFAULT_LAYER: &str = "pixel_cloud";

/// How the converter treats a pre-existing output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum WriteMode {
    /// Truncate any pre-existing container before writing.
    Overwrite,
    /// Add rows to an existing container. The layer's variable columns must
    /// equal the requested variable list, otherwise the conversion fails with
    /// the container untouched.
    Append,
}

/// What a conversion run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Granules processed.
    pub granules: usize,
    /// Rows written across all granules.
    pub rows_written: usize,
}

/// Converts a set of local granule files into one container layer.
///
/// Input order does not affect the final content (the result is a union), and
/// repeated `Append` runs over the same inputs are NOT deduplicated; avoiding
/// duplicates is the caller's responsibility.
#[derive(Debug, Clone)]
pub struct Converter {
    paths: Vec<PathBuf>,
    variables: Vec<String>,
    area_of_interest: Option<AreaOfInterest>,
    layer_name: String,
}

impl Converter {
    pub fn new<P, V>(paths: P, variables: V) -> Self
    where
        P: IntoIterator,
        P::Item: Into<PathBuf>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Converter {
            paths: paths.into_iter().map(Into::into).collect(),
            variables: variables.into_iter().map(Into::into).collect(),
            area_of_interest: None,
            layer_name: DEFAULT_LAYER.to_string(),
        }
    }

    /// Keep only pixels that intersect this area.
    pub fn with_area_of_interest(mut self, area_of_interest: AreaOfInterest) -> Self {
        self.area_of_interest = Some(area_of_interest);
        self
    }

    /// Write into a layer other than [`DEFAULT_LAYER`].
    pub fn with_layer_name<S: Into<String>>(mut self, layer_name: S) -> Self {
        self.layer_name = layer_name.into();
        self
    }

    /// Run the conversion, writing every input granule into `output`.
    ///
    /// The layer is created even when the area of interest filters out every
    /// record, so an empty result still has a valid schema. Any failure aborts
    /// the batch immediately.
    pub fn convert<P: AsRef<Path>>(
        &self,
        output: P,
        mode: WriteMode,
    ) -> SwathPixResult<ConversionSummary> {
        let output = output.as_ref();

        if mode == WriteMode::Overwrite && output.exists() {
            debug!("overwrite mode: removing {}", output.display());
            std::fs::remove_file(output)?;
        }

        let mut gpkg = GeoPackage::open_or_create(output)?;

        if gpkg.has_layer(&self.layer_name)? {
            // Appending into an existing layer. Refuse before touching
            // anything when the schema does not line up.
            let existing = gpkg.variable_columns(&self.layer_name)?;
            if existing != self.variables {
                return Err(SwathPixError::SchemaMismatch {
                    existing,
                    requested: self.variables.clone(),
                });
            }
        } else {
            gpkg.create_pixel_layer(&self.layer_name, &self.variables)?;
        }

        let mut summary = ConversionSummary::default();
        for path in &self.paths {
            let granule = Granule::open(path)?;
            let batch = granule.read_batch(&self.variables, self.area_of_interest.as_ref())?;
            let rows = gpkg.append_batch(&self.layer_name, granule.info(), &batch)?;

            let label = granule.info().granule_label();
            if rows == 0 {
                warn!("{label}: no points within the area of interest");
            } else {
                info!("{label}: wrote {rows} points");
            }

            summary.granules += 1;
            summary.rows_written += rows;
        }

        info!(
            "converted {} granules, {} rows into {}",
            summary.granules,
            summary.rows_written,
            output.display()
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn write_mode_strings() {
        assert_eq!(WriteMode::Overwrite.to_string(), "overwrite");
        assert_eq!(WriteMode::Append.to_string(), "append");
        assert_eq!(WriteMode::from_str("append").unwrap(), WriteMode::Append);
        assert_eq!(
            WriteMode::from_str("overwrite").unwrap(),
            WriteMode::Overwrite
        );
        assert!(WriteMode::from_str("truncate").is_err());
    }
}
