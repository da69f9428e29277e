use assert_cmd::Command;
use country_tiles::manifest::MANIFEST_FILE;
use country_tiles::merge::{collect_tiles, mosaic_tiles};
use country_tiles::raster::read_raster;
use country_tiles::split::tile_file_name;
use country_tiles::{merge_countries, split_countries, SkipReason, SplitOptions, TileManifest};
use gdal::raster::Buffer;
use gdal::DriverManager;
use ndarray::Array3;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const NODATA: f64 = -9999.0;

/// Creates a single-band Float64 GeoTIFF with the given geotransform.
fn create_raster(
    path: &Path,
    gt: [f64; 6],
    width: usize,
    height: usize,
    data: Vec<f64>,
    nodata: Option<f64>,
) {
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut ds = driver
        .create_with_band_type::<f64, _>(path, width, height, 1)
        .unwrap();
    ds.set_geo_transform(&gt).unwrap();
    let mut band = ds.rasterband(1).unwrap();
    if let Some(ndv) = nodata {
        band.set_no_data_value(Some(ndv)).unwrap();
    }
    let mut buffer = Buffer::new((width, height), data);
    band.write((0, 0), (width, height), &mut buffer).unwrap();
}

/// Writes polygon boundary features as GeoJSON. A `None` code leaves GID_0 null.
fn write_polygons(path: &Path, features: &[(Option<&str>, Vec<[f64; 2]>)]) {
    let features: Vec<Value> = features
        .iter()
        .map(|(code, ring)| {
            json!({
                "type": "Feature",
                "properties": { "GID_0": code },
                "geometry": { "type": "Polygon", "coordinates": [ring] }
            })
        })
        .collect();
    let collection = json!({ "type": "FeatureCollection", "features": features });
    fs::write(path, serde_json::to_string_pretty(&collection).unwrap()).unwrap();
}

/// Writes rectangular boundary features given as `[west, south, east, north]`.
fn write_boundaries(path: &Path, features: &[(Option<&str>, [f64; 4])]) {
    let polygons: Vec<(Option<&str>, Vec<[f64; 2]>)> = features
        .iter()
        .map(|&(code, [w, s, e, n])| (code, vec![[w, s], [e, s], [e, n], [w, n], [w, s]]))
        .collect();
    write_polygons(path, &polygons);
}

/// 6 x 2 source whose two rightmost columns are No Data.
fn setup_source(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    #[rustfmt::skip]
    let data = vec![
        10.0, 20.0, 50.0, 60.0, NODATA, NODATA,
        30.0, 40.0, 70.0, 80.0, NODATA, NODATA,
    ];
    create_raster(&path, [0.0, 1.0, 0.0, 2.0, 0.0, -1.0], 6, 2, data, Some(NODATA));
    path
}

fn setup_boundaries(dir: &Path) -> PathBuf {
    let path = dir.join("adm0.geojson");
    write_boundaries(
        &path,
        &[
            (Some("AAA"), [0.0, 0.0, 2.0, 2.0]),
            (Some("ZZZ"), [100.0, 40.0, 101.0, 41.0]),
            (Some("BBB"), [2.0, 0.0, 4.0, 2.0]),
            (Some("NDV"), [4.0, 0.0, 6.0, 2.0]),
            (None, [0.0, 0.0, 1.0, 1.0]),
        ],
    );
    path
}

fn plane(data: &Array3<f64>) -> Vec<f64> {
    data.iter().copied().collect()
}

fn tif_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            let path = e.as_ref().unwrap().path();
            path.extension().map_or(false, |ext| ext == "tif")
        })
        .count()
}

#[test]
fn test_split_writes_rescaled_country_tiles() {
    let temp_dir = tempdir().unwrap();
    let source = setup_source(temp_dir.path(), "Electricity_access_2019.tif");
    let admin = setup_boundaries(temp_dir.path());
    let work_dir = temp_dir.path().join("2019");

    // Leftovers from an earlier run must not survive.
    fs::create_dir_all(&work_dir).unwrap();
    fs::write(work_dir.join("stale_XXX.tif"), b"stale").unwrap();

    let outcome = split_countries(&admin, &source, &work_dir, &SplitOptions::default()).unwrap();

    assert_eq!(outcome.manifest.countries(), vec!["AAA", "BBB"]);
    assert!(!work_dir.join("stale_XXX.tif").exists());
    assert_eq!(tif_count(&work_dir), 2);

    let reasons: Vec<(String, SkipReason)> = outcome
        .skipped
        .iter()
        .map(|s| (s.label.clone(), s.reason))
        .collect();
    assert!(reasons.contains(&("ZZZ".to_string(), SkipReason::OutsideRaster)));
    assert!(reasons.contains(&("NDV".to_string(), SkipReason::AllNodata)));
    assert!(reasons
        .iter()
        .any(|(_, reason)| *reason == SkipReason::MissingCountryCode));
    assert!(!work_dir.join(tile_file_name(&source, "ZZZ")).exists());
    assert!(!work_dir.join(tile_file_name(&source, "NDV")).exists());

    let aaa_path = work_dir.join("Electricity_access_2019_AAA.tif");
    let (aaa_meta, aaa) = read_raster::<f64>(&aaa_path).unwrap();
    assert_eq!((aaa_meta.width, aaa_meta.height, aaa_meta.band_count), (2, 2, 1));
    assert_eq!(aaa_meta.geo_transform, [0.0, 1.0, 0.0, 2.0, 0.0, -1.0]);
    assert_eq!(aaa_meta.nodata, NODATA);
    assert_eq!(aaa_meta.data_type, "Int16");
    assert_eq!(plane(&aaa), vec![0.0, 33.0, 67.0, 100.0]);

    let bbb_path = work_dir.join("Electricity_access_2019_BBB.tif");
    let (bbb_meta, bbb) = read_raster::<f64>(&bbb_path).unwrap();
    assert_eq!(bbb_meta.geo_transform, [2.0, 1.0, 0.0, 2.0, 0.0, -1.0]);
    assert_eq!(plane(&bbb), vec![0.0, 33.0, 67.0, 100.0]);

    let manifest = TileManifest::load(&work_dir).unwrap().unwrap();
    assert_eq!(manifest, outcome.manifest);
    assert_eq!(manifest.nodata, NODATA);
    assert_eq!(manifest.tiles[1].geo_transform, bbb_meta.geo_transform);
}

#[test]
fn test_split_masks_pixels_outside_polygon() {
    let temp_dir = tempdir().unwrap();
    let source = temp_dir.path().join("source.tif");
    // The 1000s sit outside the L-shape and must neither be kept nor stretch the scale.
    #[rustfmt::skip]
    let data = vec![
        10.0, 1000.0, 1000.0,
        20.0, 1000.0, 1000.0,
        30.0,   40.0,   50.0,
    ];
    create_raster(&source, [0.0, 1.0, 0.0, 3.0, 0.0, -1.0], 3, 3, data, Some(NODATA));

    // Left column plus bottom row.
    let admin = temp_dir.path().join("adm0.geojson");
    let ring = vec![
        [0.0, 0.0],
        [3.0, 0.0],
        [3.0, 1.0],
        [1.0, 1.0],
        [1.0, 3.0],
        [0.0, 3.0],
        [0.0, 0.0],
    ];
    write_polygons(&admin, &[(Some("LLL"), ring)]);

    let work_dir = temp_dir.path().join("tiles");
    let outcome = split_countries(&admin, &source, &work_dir, &SplitOptions::default()).unwrap();
    assert_eq!(outcome.manifest.countries(), vec!["LLL"]);

    let (meta, tile) = read_raster::<f64>(&work_dir.join("source_LLL.tif")).unwrap();
    assert_eq!((meta.width, meta.height), (3, 3));
    #[rustfmt::skip]
    let expected = vec![
         0.0, NODATA, NODATA,
        25.0, NODATA, NODATA,
        50.0,   75.0,  100.0,
    ];
    assert_eq!(plane(&tile), expected);

    let inside: Vec<f64> = tile.iter().copied().filter(|&v| v != NODATA).collect();
    assert_eq!(inside.len(), 5);
    let (lo, hi) = inside
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    assert_eq!((lo, hi), (0.0, 100.0));
}

#[test]
fn test_split_joins_parts_of_one_country() {
    let temp_dir = tempdir().unwrap();
    let source = setup_source(temp_dir.path(), "Electricity_access_2019.tif");
    let admin = temp_dir.path().join("adm0.geojson");
    write_boundaries(
        &admin,
        &[
            (Some("AAA"), [0.0, 0.0, 1.0, 2.0]),
            (Some("BBB"), [2.0, 0.0, 4.0, 2.0]),
            (Some("AAA"), [1.0, 0.0, 2.0, 2.0]),
        ],
    );
    let work_dir = temp_dir.path().join("2019");
    let merged = temp_dir.path().join("Electricity_access_2019_merged.tif");

    let outcome = split_countries(&admin, &source, &work_dir, &SplitOptions::default()).unwrap();
    assert_eq!(outcome.manifest.countries(), vec!["AAA", "BBB"]);
    assert!(outcome.skipped.is_empty());

    // Both parts share one tile and one set of statistics.
    let (meta, aaa) =
        read_raster::<f64>(&work_dir.join("Electricity_access_2019_AAA.tif")).unwrap();
    assert_eq!((meta.width, meta.height), (2, 2));
    assert_eq!(plane(&aaa), vec![0.0, 33.0, 67.0, 100.0]);

    let summary = merge_countries(&work_dir, &merged, true).unwrap();
    assert_eq!(summary.tile_count, 2);
    assert!(summary.input_removed);
    assert!(!work_dir.exists());

    let (_, data) = read_raster::<f64>(&merged).unwrap();
    assert_eq!(
        plane(&data),
        vec![0.0, 33.0, 0.0, 33.0, 67.0, 100.0, 67.0, 100.0]
    );
}

#[test]
fn test_split_then_merge_restores_grid() {
    let temp_dir = tempdir().unwrap();
    let source = setup_source(temp_dir.path(), "Electricity_access_2019.tif");
    let admin = setup_boundaries(temp_dir.path());
    let work_dir = temp_dir.path().join("2019");
    let merged = temp_dir.path().join("out").join("Electricity_access_2019.tif");

    split_countries(&admin, &source, &work_dir, &SplitOptions::default()).unwrap();
    let summary = merge_countries(&work_dir, &merged, false).unwrap();

    assert_eq!(summary.tile_count, 2);
    assert_eq!((summary.width, summary.height), (4, 2));
    assert_eq!(summary.reference, work_dir.join("Electricity_access_2019_AAA.tif"));
    assert!(!summary.input_removed);
    assert!(work_dir.join(MANIFEST_FILE).exists());

    let (meta, data) = read_raster::<f64>(&merged).unwrap();
    assert_eq!(meta.geo_transform, [0.0, 1.0, 0.0, 2.0, 0.0, -1.0]);
    assert_eq!(meta.nodata, NODATA);
    assert_eq!(
        plane(&data),
        vec![0.0, 33.0, 0.0, 33.0, 67.0, 100.0, 67.0, 100.0]
    );

    // No temporary files are left next to the mosaic.
    assert_eq!(fs::read_dir(merged.parent().unwrap()).unwrap().count(), 1);
}

#[test]
fn test_merge_cleanup_removes_tiles() {
    let temp_dir = tempdir().unwrap();
    let source = setup_source(temp_dir.path(), "Electricity_access_2019.tif");
    let admin = setup_boundaries(temp_dir.path());
    let work_dir = temp_dir.path().join("2019");
    let merged = temp_dir.path().join("Electricity_access_2019_merged.tif");

    split_countries(&admin, &source, &work_dir, &SplitOptions::default()).unwrap();
    let summary = merge_countries(&work_dir, &merged, true).unwrap();

    assert!(summary.input_removed);
    assert!(merged.exists());
    assert!(!work_dir.exists());
}

#[test]
fn test_failed_merge_keeps_inputs() {
    let temp_dir = tempdir().unwrap();
    let source = setup_source(temp_dir.path(), "Electricity_access_2019.tif");
    let admin = setup_boundaries(temp_dir.path());
    let work_dir = temp_dir.path().join("2019");

    // A directory in the way makes the final rename fail.
    let blocked = temp_dir.path().join("blocked.tif");
    fs::create_dir_all(&blocked).unwrap();
    fs::write(blocked.join("keep"), b"x").unwrap();

    split_countries(&admin, &source, &work_dir, &SplitOptions::default()).unwrap();
    assert!(merge_countries(&work_dir, &blocked, true).is_err());

    assert!(work_dir.join("Electricity_access_2019_AAA.tif").exists());
    assert!(work_dir.join("Electricity_access_2019_BBB.tif").exists());
    assert!(work_dir.join(MANIFEST_FILE).exists());
    let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".tmp."))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left: {:?}", leftovers);
}

#[test]
fn test_merge_empty_directory_fails() {
    let temp_dir = tempdir().unwrap();
    let input = temp_dir.path().join("empty");
    fs::create_dir_all(&input).unwrap();

    let result = merge_countries(&input, &temp_dir.path().join("out.tif"), true);
    assert!(result.is_err());
    assert!(input.exists());
}

#[test]
fn test_merge_overlap_and_order() {
    let gt_a = [0.0, 1.0, 0.0, 1.0, 0.0, -1.0];
    let gt_b = [1.0, 1.0, 0.0, 1.0, 0.0, -1.0];

    // Same tiles created in opposite orders.
    let first = tempdir().unwrap();
    create_raster(&first.path().join("a_tile.tif"), gt_a, 2, 1, vec![1.0, 1.0], Some(NODATA));
    create_raster(&first.path().join("b_tile.tif"), gt_b, 2, 1, vec![2.0, 2.0], Some(NODATA));
    create_raster(&first.path().join("c_tile.tif"), gt_a, 1, 1, vec![NODATA], Some(NODATA));

    let second = tempdir().unwrap();
    create_raster(&second.path().join("c_tile.tif"), gt_a, 1, 1, vec![NODATA], Some(NODATA));
    create_raster(&second.path().join("b_tile.tif"), gt_b, 2, 1, vec![2.0, 2.0], Some(NODATA));
    create_raster(&second.path().join("a_tile.tif"), gt_a, 2, 1, vec![1.0, 1.0], Some(NODATA));

    let out_dir = tempdir().unwrap();
    let out_first = out_dir.path().join("first.tif");
    let out_second = out_dir.path().join("second.tif");
    merge_countries(first.path(), &out_first, false).unwrap();
    merge_countries(second.path(), &out_second, false).unwrap();

    let (meta_first, data_first) = read_raster::<f64>(&out_first).unwrap();
    let (meta_second, data_second) = read_raster::<f64>(&out_second).unwrap();

    // Later file name wins on valid overlap; No Data never overwrites.
    assert_eq!(plane(&data_first), vec![1.0, 2.0, 2.0]);

    // The in-memory mosaic stays Int16 end to end.
    let tiles = collect_tiles(first.path()).unwrap();
    let (meta, mosaic): (_, Array3<i16>) = mosaic_tiles(&tiles).unwrap();
    assert_eq!(meta.nodata, NODATA);
    assert_eq!(mosaic.iter().copied().collect::<Vec<i16>>(), vec![1, 2, 2]);
    assert_eq!(data_first, data_second);
    assert_eq!(meta_first.geo_transform, meta_second.geo_transform);
}

#[test]
fn test_merge_resamples_to_reference_resolution() {
    let temp_dir = tempdir().unwrap();
    create_raster(
        &temp_dir.path().join("a_coarse.tif"),
        [0.0, 1.0, 0.0, 1.0, 0.0, -1.0],
        2,
        1,
        vec![1.0, 2.0],
        Some(NODATA),
    );
    create_raster(
        &temp_dir.path().join("b_fine.tif"),
        [2.0, 0.5, 0.0, 1.0, 0.0, -0.5],
        2,
        2,
        vec![5.0, 6.0, 7.0, 8.0],
        Some(NODATA),
    );

    let merged = temp_dir.path().join("merged").join("mosaic.tif");
    let summary = merge_countries(temp_dir.path(), &merged, false).unwrap();
    assert_eq!((summary.width, summary.height), (3, 1));

    let (meta, data) = read_raster::<f64>(&merged).unwrap();
    assert_eq!(meta.geo_transform, [0.0, 1.0, 0.0, 1.0, 0.0, -1.0]);
    assert_eq!(plane(&data), vec![1.0, 2.0, 8.0]);
}

#[test]
fn test_cli_runs_year() {
    let temp_dir = tempdir().unwrap();
    let data_dir = temp_dir.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    setup_source(&data_dir, "Electricity_access_2019.tif");
    let admin = setup_boundaries(&data_dir);
    let output = temp_dir.path().join("output");

    let mut cmd = Command::cargo_bin("country-tiles").unwrap();
    cmd.arg("--source-dir")
        .arg(&data_dir)
        .arg("--admin")
        .arg(&admin)
        .arg("--output")
        .arg(&output)
        .arg("--years")
        .arg("2019")
        .arg("--keep-tiles");
    cmd.assert().success();

    let merged = output.join("Electricity_access_2019.tif");
    assert!(merged.exists());
    assert!(output.join("2019").join("Electricity_access_2019_AAA.tif").exists());

    let (_, data) = read_raster::<f64>(&merged).unwrap();
    assert_eq!(
        plane(&data),
        vec![0.0, 33.0, 0.0, 33.0, 67.0, 100.0, 67.0, 100.0]
    );
}

#[test]
fn test_cli_keep_going_reports_missing_year() {
    let temp_dir = tempdir().unwrap();
    let data_dir = temp_dir.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    setup_source(&data_dir, "Electricity_access_2019.tif");
    let admin = setup_boundaries(&data_dir);
    let output = temp_dir.path().join("output");

    let mut cmd = Command::cargo_bin("country-tiles").unwrap();
    cmd.arg("--source-dir")
        .arg(&data_dir)
        .arg("--admin")
        .arg(&admin)
        .arg("--output")
        .arg(&output)
        .arg("--years")
        .arg("2018-2019")
        .arg("--keep-going");
    cmd.assert().failure().code(1);

    assert!(!output.join("Electricity_access_2018.tif").exists());
    assert!(output.join("Electricity_access_2019.tif").exists());
    assert!(!output.join("2019").exists());
}

#[test]
fn test_cli_rejects_reversed_years() {
    let temp_dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("country-tiles").unwrap();
    cmd.arg("--output")
        .arg(temp_dir.path())
        .arg("--years")
        .arg("2019-2012");
    cmd.assert().failure().code(2);
}
