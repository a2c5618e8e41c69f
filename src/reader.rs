/*!
 * Loading container layers back into memory as a labeled table.
 */

use crate::{
    error::{SwathPixError, SwathPixResult},
    geo::AreaOfInterest,
    gpkg::{self, GeoPackage, GEOMETRY_COLUMN},
    granule::GranuleInfo,
};
use geo::Point;
use rustc_hash::FxHashMap as HashMap;

/// An in-memory table of pixel records: named `f64` columns, a point geometry
/// column, and per-row granule identifiers.
#[derive(Debug, Clone, Default)]
pub struct PixelTable {
    variables: Vec<String>,
    columns: HashMap<String, Vec<f64>>,
    geometry: Vec<Point<f64>>,
    granules: Vec<GranuleInfo>,
}

impl PixelTable {
    fn with_variables(variables: Vec<String>) -> Self {
        let mut columns = HashMap::default();
        for variable in &variables {
            columns.insert(variable.clone(), Vec::new());
        }

        PixelTable {
            variables,
            columns,
            geometry: Vec::new(),
            granules: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.geometry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty()
    }

    /// Variable column names, in container order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// One variable column. NULLs read back as NaN.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn geometry(&self) -> &[Point<f64>] {
        &self.geometry
    }

    /// Granule identifiers, one per row.
    pub fn granules(&self) -> &[GranuleInfo] {
        &self.granules
    }

    fn push_row(&mut self, info: GranuleInfo, point: Point<f64>, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.variables.len());
        for (variable, value) in self.variables.iter().zip(values) {
            if let Some(column) = self.columns.get_mut(variable) {
                column.push(value);
            }
        }
        self.geometry.push(point);
        self.granules.push(info);
    }

    /// Concatenate another table with the same variable columns.
    fn extend(&mut self, other: PixelTable) -> SwathPixResult<()> {
        if self.variables != other.variables {
            return Err(SwathPixError::SchemaMismatch {
                existing: self.variables.clone(),
                requested: other.variables,
            });
        }

        for variable in &self.variables {
            if let (Some(column), Some(other_column)) = (
                self.columns.get_mut(variable),
                other.columns.get(variable),
            ) {
                column.extend_from_slice(other_column);
            }
        }
        self.geometry.extend(other.geometry);
        self.granules.extend(other.granules);

        Ok(())
    }
}

impl GeoPackage {
    /// Load a single layer fully into memory, optionally keeping only rows
    /// that intersect an area of interest.
    pub fn read_layer(
        &self,
        layer: &str,
        area_of_interest: Option<&AreaOfInterest>,
    ) -> SwathPixResult<PixelTable> {
        let variables = self.variable_columns(layer)?;
        let mut table = PixelTable::with_variables(variables.clone());

        let variable_list: String = variables
            .iter()
            .map(|variable| format!(", \"{variable}\""))
            .collect();
        let select = format!(
            "SELECT {GEOMETRY_COLUMN}, cycle_number, pass_number, tile_number, swath_side, time\
             {variable_list} FROM \"{layer}\" ORDER BY fid"
        );

        let mut stmt = self.conn.prepare(&select)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(0)?;
            let (lon, lat) = gpkg::decode_point(&blob)?;

            if let Some(aoi) = area_of_interest {
                if !aoi.contains(lon, lat) {
                    continue;
                }
            }

            let time_text: String = row.get(5)?;
            let info = GranuleInfo {
                cycle_number: row.get::<_, i64>(1)? as u16,
                pass_number: row.get::<_, i64>(2)? as u16,
                tile_number: row.get::<_, i64>(3)? as u16,
                swath_side: row.get(4)?,
                time_granule_start: gpkg::parse_time_column(&time_text)?,
            };

            let mut values = Vec::with_capacity(variables.len());
            for idx in 0..variables.len() {
                let value: Option<f64> = row.get(6 + idx)?;
                values.push(value.unwrap_or(f64::NAN));
            }

            table.push_row(info, Point::new(lon, lat), values);
        }

        Ok(table)
    }

    /// Load every feature layer into one table. All layers must share the
    /// same variable columns.
    pub fn read_all(&self, area_of_interest: Option<&AreaOfInterest>) -> SwathPixResult<PixelTable> {
        let mut combined: Option<PixelTable> = None;

        for layer in self.layers()? {
            let table = self.read_layer(&layer, area_of_interest)?;
            combined = Some(match combined {
                None => table,
                Some(mut acc) => {
                    acc.extend(table)?;
                    acc
                }
            });
        }

        Ok(combined.unwrap_or_default())
    }
}
