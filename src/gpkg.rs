/*!
 * The output container: a GeoPackage file built directly on SQLite.
 *
 * Only the parts of the GeoPackage specification this crate needs are
 * implemented: the three core metadata tables, feature tables with a point
 * geometry column in standard GeoPackage binary, and content extents. The
 * result opens in desktop GIS tools.
 */

use crate::{
    error::{SwathPixError, SwathPixResult},
    granule::{GranuleInfo, PixelBatch},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// Name of the geometry column in every pixel layer.
pub const GEOMETRY_COLUMN: &str = "geom";

/// Identifying columns every pixel layer carries besides the requested
/// variables, in table order.
pub const IDENTIFIER_COLUMNS: [&str; 5] = [
    "cycle_number",
    "pass_number",
    "tile_number",
    "swath_side",
    "time",
];

/// All pixel geometry is geodetic WGS 84.
const SRS_ID: i32 = 4326;

/// Storage format for the `time` column (GeoPackage DATETIME is ISO-8601 text).
pub(crate) const TIME_COLUMN_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// An open container file.
pub struct GeoPackage {
    pub(crate) conn: Connection,
    path: PathBuf,
}

impl GeoPackage {
    /// Open a container for writing, creating the file and the GeoPackage
    /// metadata tables if they do not exist yet.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> SwathPixResult<Self> {
        let path = path.as_ref().to_path_buf();

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        const QUERY: &str = include_str!("gpkg/create_gpkg_tables.sql");
        conn.execute_batch(QUERY)?;

        Ok(GeoPackage { conn, path })
    }

    /// Open an existing container read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> SwathPixResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.is_file() {
            return Err(SwathPixError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such container: {}", path.display()),
            )));
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Ok(GeoPackage { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The feature layers registered in the container.
    pub fn layers(&self) -> SwathPixResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY table_name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(names)
    }

    pub fn has_layer(&self, layer: &str) -> SwathPixResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM gpkg_contents WHERE data_type = 'features' AND table_name = ?1",
            [layer],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    /// The variable columns of a pixel layer, in table order. The feature id,
    /// the geometry, and the identifying columns are excluded.
    pub fn variable_columns(&self, layer: &str) -> SwathPixResult<Vec<String>> {
        if !self.has_layer(layer)? {
            return Err(SwathPixError::LayerNotFound(layer.to_string()));
        }
        validate_sql_name(layer)?;

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{layer}\")"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(columns
            .into_iter()
            .filter(|name| {
                name != "fid"
                    && name != GEOMETRY_COLUMN
                    && !IDENTIFIER_COLUMNS.contains(&name.as_str())
            })
            .collect())
    }

    /// Create a pixel layer: feature id, geometry, identifying columns, and
    /// one REAL column per requested variable. The schema is fixed here and
    /// stays stable across appends.
    pub fn create_pixel_layer(&self, layer: &str, variables: &[String]) -> SwathPixResult<()> {
        validate_sql_name(layer)?;
        for variable in variables {
            validate_sql_name(variable)?;
        }

        let mut variable_defs = String::new();
        for variable in variables {
            variable_defs.push_str(&format!(",\n  \"{variable}\" REAL"));
        }

        let create = format!(
            "CREATE TABLE \"{layer}\" (\n  \
               fid INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
               {GEOMETRY_COLUMN} BLOB NOT NULL,\n  \
               cycle_number INTEGER NOT NULL,\n  \
               pass_number INTEGER NOT NULL,\n  \
               tile_number INTEGER NOT NULL,\n  \
               swath_side TEXT NOT NULL,\n  \
               time DATETIME NOT NULL{variable_defs}\n)"
        );
        self.conn.execute(&create, [])?;

        self.conn.execute(
            "INSERT INTO gpkg_contents (table_name, data_type, identifier, srs_id)
             VALUES (?1, 'features', ?1, ?2)",
            params![layer, SRS_ID],
        )?;
        self.conn.execute(
            "INSERT INTO gpkg_geometry_columns
                 (table_name, column_name, geometry_type_name, srs_id, z, m)
             VALUES (?1, ?2, 'POINT', ?3, 0, 0)",
            params![layer, GEOMETRY_COLUMN, SRS_ID],
        )?;

        Ok(())
    }

    /// Append one granule's batch inside a single transaction.
    ///
    /// The batch's variable list must equal the layer's variable columns;
    /// otherwise nothing is written. Returns the number of rows added.
    pub fn append_batch(
        &mut self,
        layer: &str,
        info: &GranuleInfo,
        batch: &PixelBatch,
    ) -> SwathPixResult<usize> {
        let existing = self.variable_columns(layer)?;
        if existing != batch.variables {
            return Err(SwathPixError::SchemaMismatch {
                existing,
                requested: batch.variables.clone(),
            });
        }

        let tx = self.conn.transaction()?;

        {
            let mut column_names = String::new();
            let mut placeholders = String::new();
            for (idx, variable) in batch.variables.iter().enumerate() {
                column_names.push_str(&format!(", \"{variable}\""));
                placeholders.push_str(&format!(", ?{}", idx + 7));
            }

            let insert = format!(
                "INSERT INTO \"{layer}\" \
                   ({GEOMETRY_COLUMN}, cycle_number, pass_number, tile_number, swath_side, time\
                   {column_names}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6{placeholders})"
            );
            let mut stmt = tx.prepare(&insert)?;

            let time_text = info
                .time_granule_start
                .format(TIME_COLUMN_FORMAT)
                .to_string();

            for record in &batch.records {
                let mut row: Vec<rusqlite::types::Value> =
                    Vec::with_capacity(6 + record.values.len());
                row.push(encode_point(record.longitude, record.latitude).into());
                row.push(i64::from(info.cycle_number).into());
                row.push(i64::from(info.pass_number).into());
                row.push(i64::from(info.tile_number).into());
                row.push(info.swath_side.clone().into());
                row.push(time_text.clone().into());
                for &value in &record.values {
                    // NaN measurements are stored as NULL.
                    if value.is_nan() {
                        row.push(rusqlite::types::Value::Null);
                    } else {
                        row.push(value.into());
                    }
                }

                stmt.execute(rusqlite::params_from_iter(row))?;
            }
        }

        if !batch.records.is_empty() {
            let mut min_x = f64::INFINITY;
            let mut min_y = f64::INFINITY;
            let mut max_x = f64::NEG_INFINITY;
            let mut max_y = f64::NEG_INFINITY;
            for record in &batch.records {
                min_x = min_x.min(record.longitude);
                min_y = min_y.min(record.latitude);
                max_x = max_x.max(record.longitude);
                max_y = max_y.max(record.latitude);
            }

            tx.execute(
                "UPDATE gpkg_contents SET
                     last_change = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                     min_x = MIN(COALESCE(min_x, ?1), ?1),
                     min_y = MIN(COALESCE(min_y, ?2), ?2),
                     max_x = MAX(COALESCE(max_x, ?3), ?3),
                     max_y = MAX(COALESCE(max_y, ?4), ?4)
                 WHERE table_name = ?5",
                params![min_x, min_y, max_x, max_y, layer],
            )?;
        }

        tx.commit()?;

        Ok(batch.records.len())
    }

    /// Number of rows in a layer.
    pub fn layer_len(&self, layer: &str) -> SwathPixResult<usize> {
        if !self.has_layer(layer)? {
            return Err(SwathPixError::LayerNotFound(layer.to_string()));
        }
        validate_sql_name(layer)?;

        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{layer}\""), [], |row| {
                    row.get(0)
                })?;

        Ok(count as usize)
    }
}

/// Parse the text stored in a `time` column.
pub(crate) fn parse_time_column(text: &str) -> SwathPixResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SwathPixError::CorruptContainer(format!("bad time value '{text}'")))
}

/// Layer and column names end up spliced into SQL, so restrict them to plain
/// identifiers.
fn validate_sql_name(name: &str) -> SwathPixResult<()> {
    let ok = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if ok {
        Ok(())
    } else {
        Err(SwathPixError::InvalidName(name.to_string()))
    }
}

/// Encode a point as a standard GeoPackage geometry blob: the "GP" header
/// followed by little-endian WKB, no envelope.
pub(crate) fn encode_point(lon: f64, lat: f64) -> Vec<u8> {
    let mut blob = Vec::with_capacity(29);
    blob.extend_from_slice(b"GP");
    blob.push(0); // version
    blob.push(0b0000_0001); // little-endian, no envelope
    blob.extend_from_slice(&SRS_ID.to_le_bytes());
    blob.push(1); // WKB little-endian
    blob.extend_from_slice(&1u32.to_le_bytes()); // WKB point
    blob.extend_from_slice(&lon.to_le_bytes());
    blob.extend_from_slice(&lat.to_le_bytes());
    blob
}

/// Decode a GeoPackage point blob, including ones written by other tools
/// (envelopes and big-endian WKB are tolerated).
pub(crate) fn decode_point(blob: &[u8]) -> SwathPixResult<(f64, f64)> {
    fn bad(msg: &str) -> SwathPixError {
        SwathPixError::InvalidGeometry(format!("geometry blob: {msg}"))
    }

    if blob.len() < 8 || &blob[0..2] != b"GP" {
        return Err(bad("missing GP header"));
    }

    let flags = blob[3];
    let envelope_len = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        _ => return Err(bad("invalid envelope indicator")),
    };

    let wkb_start = 8 + envelope_len;
    if blob.len() < wkb_start + 21 {
        return Err(bad("truncated"));
    }
    let wkb = &blob[wkb_start..];

    let little_endian = match wkb[0] {
        0 => false,
        1 => true,
        _ => return Err(bad("invalid WKB byte order")),
    };

    let geometry_type = read_u32(&wkb[1..5], little_endian);
    if geometry_type != 1 {
        return Err(bad("expected a WKB point"));
    }

    let x = read_f64(&wkb[5..13], little_endian);
    let y = read_f64(&wkb[13..21], little_endian);

    Ok((x, y))
}

fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(bytes);
    if little_endian {
        u32::from_le_bytes(arr)
    } else {
        u32::from_be_bytes(arr)
    }
}

fn read_f64(bytes: &[u8], little_endian: bool) -> f64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    if little_endian {
        f64::from_le_bytes(arr)
    } else {
        f64::from_be_bytes(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::granule::PixelRecord;

    fn test_info() -> GranuleInfo {
        GranuleInfo {
            cycle_number: 7,
            pass_number: 21,
            tile_number: 133,
            swath_side: "L".to_string(),
            time_granule_start: DateTime::parse_from_rfc3339("2023-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    fn test_batch(variables: &[&str], n: usize) -> PixelBatch {
        let variables: Vec<String> = variables.iter().map(|v| v.to_string()).collect();
        let records = (0..n)
            .map(|i| PixelRecord {
                longitude: i as f64 * 0.1,
                latitude: 45.0 + i as f64 * 0.1,
                values: variables.iter().enumerate().map(|(j, _)| j as f64).collect(),
            })
            .collect();
        PixelBatch { variables, records }
    }

    #[test]
    fn point_blob_round_trip() {
        let blob = encode_point(-120.25, 45.5);
        assert_eq!(&blob[0..2], b"GP");
        assert_eq!(decode_point(&blob).unwrap(), (-120.25, 45.5));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_point(b"not a geometry").is_err());
        assert!(decode_point(&[]).is_err());

        // Valid header but a linestring type code.
        let mut blob = encode_point(0.0, 0.0);
        blob[9] = 2;
        assert!(decode_point(&blob).is_err());
    }

    #[test]
    fn create_layer_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpkg");

        let mut gpkg = GeoPackage::open_or_create(&path).unwrap();
        let variables = vec!["height".to_string(), "sig0".to_string()];
        gpkg.create_pixel_layer("pixel_cloud", &variables).unwrap();

        assert_eq!(gpkg.layers().unwrap(), vec!["pixel_cloud".to_string()]);
        assert!(gpkg.has_layer("pixel_cloud").unwrap());
        assert!(!gpkg.has_layer("other").unwrap());
        assert_eq!(gpkg.variable_columns("pixel_cloud").unwrap(), variables);

        let rows = gpkg
            .append_batch("pixel_cloud", &test_info(), &test_batch(&["height", "sig0"], 3))
            .unwrap();
        assert_eq!(rows, 3);
        assert_eq!(gpkg.layer_len("pixel_cloud").unwrap(), 3);
    }

    #[test]
    fn nan_values_round_trip_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpkg");

        let mut gpkg = GeoPackage::open_or_create(&path).unwrap();
        gpkg.create_pixel_layer("pixel_cloud", &["height".to_string()])
            .unwrap();

        let batch = PixelBatch {
            variables: vec!["height".to_string()],
            records: vec![
                PixelRecord {
                    longitude: 0.1,
                    latitude: 45.1,
                    values: vec![f64::NAN],
                },
                PixelRecord {
                    longitude: 0.2,
                    latitude: 45.2,
                    values: vec![7.5],
                },
            ],
        };
        gpkg.append_batch("pixel_cloud", &test_info(), &batch)
            .unwrap();

        // Stored as a real SQL NULL, not some NaN encoding.
        let nulls: i64 = gpkg
            .conn
            .query_row(
                "SELECT COUNT(*) FROM \"pixel_cloud\" WHERE height IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 1);

        let table = gpkg.read_layer("pixel_cloud", None).unwrap();
        let column = table.column("height").unwrap();
        assert!(column[0].is_nan());
        assert_eq!(column[1], 7.5);
    }

    #[test]
    fn append_refuses_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpkg");

        let mut gpkg = GeoPackage::open_or_create(&path).unwrap();
        gpkg.create_pixel_layer("pixel_cloud", &["height".to_string()])
            .unwrap();
        gpkg.append_batch("pixel_cloud", &test_info(), &test_batch(&["height"], 2))
            .unwrap();

        let err = gpkg
            .append_batch("pixel_cloud", &test_info(), &test_batch(&["sig0"], 2))
            .unwrap_err();
        assert!(matches!(err, SwathPixError::SchemaMismatch { .. }));

        // Nothing was written by the failed append.
        assert_eq!(gpkg.layer_len("pixel_cloud").unwrap(), 2);
    }

    #[test]
    fn unknown_layer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpkg");

        let gpkg = GeoPackage::open_or_create(&path).unwrap();
        assert!(matches!(
            gpkg.variable_columns("nope").unwrap_err(),
            SwathPixError::LayerNotFound(_)
        ));
    }

    #[test]
    fn open_missing_container_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GeoPackage::open(dir.path().join("absent.gpkg")).is_err());
    }

    #[test]
    fn hostile_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gpkg = GeoPackage::open_or_create(dir.path().join("out.gpkg")).unwrap();

        for name in ["", "1abc", "a-b", "x\"; DROP TABLE gpkg_contents; --"] {
            let err = gpkg
                .create_pixel_layer(name, &["height".to_string()])
                .unwrap_err();
            assert!(matches!(err, SwathPixError::InvalidName(_)), "{name}");
        }
    }
}
