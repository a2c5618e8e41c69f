//! Shared helpers for the integration tests: logging setup and a writer for
//! small pixel-cloud fixture granules.

use std::path::Path;

pub fn init_logging() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}

/// Write a pixel-cloud granule with the given points and per-point variables.
///
/// Every fixture also carries an `interferogram` variable that is NOT
/// one-dimensional over `points`, mirroring the diagnostics real products
/// contain that must never end up in a converted table.
#[allow(clippy::too_many_arguments)]
pub fn write_granule(
    path: &Path,
    cycle: u16,
    pass: u16,
    tile: u16,
    side: &str,
    time: &str,
    lons: &[f64],
    lats: &[f64],
    variables: &[(&str, &[f64])],
) {
    assert_eq!(lons.len(), lats.len());

    let mut file = netcdf::create(path).unwrap();

    file.add_attribute("cycle_number", cycle).unwrap();
    file.add_attribute("pass_number", pass).unwrap();
    file.add_attribute("tile_number", tile).unwrap();
    file.add_attribute("swath_side", side).unwrap();
    file.add_attribute("time_granule_start", time).unwrap();

    let mut group = file.add_group("pixel_cloud").unwrap();
    group.add_dimension("points", lons.len()).unwrap();
    group.add_dimension("complex_depth", 2).unwrap();

    let mut lon_var = group.add_variable::<f64>("longitude", &["points"]).unwrap();
    lon_var.put_values(lons, ..).unwrap();

    let mut lat_var = group.add_variable::<f64>("latitude", &["points"]).unwrap();
    lat_var.put_values(lats, ..).unwrap();

    for (name, values) in variables {
        assert_eq!(values.len(), lons.len());
        let mut var = group.add_variable::<f64>(name, &["points"]).unwrap();
        var.put_values(values, ..).unwrap();
    }

    let mut interferogram = group
        .add_variable::<f64>("interferogram", &["points", "complex_depth"])
        .unwrap();
    interferogram
        .put_values(&vec![0.0; lons.len() * 2], ..)
        .unwrap();
}
