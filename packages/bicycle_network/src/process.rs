//! Upload orchestration: stage, read, filter, merge, persist, clean up.

use std::path::{Path, PathBuf};

use civic_map_bicycle_network_models::MergeOutcome;
use civic_map_database::network_db;
use civic_map_spatial::{GeometrySettings, crs_name};
use duckdb::Connection;
use serde_json::{Value, json};

use crate::filter::filter_geojson;
use crate::merge::merge_linestrings;
use crate::persist::save_network_to_db;
use crate::{BicycleNetworkError, INVALID_INPUT_MESSAGE, MERGE_FAILED_MESSAGE, MessageSink};

/// Copies an operator's file into `uploads_dir` for processing and
/// records it as the network's pending source file.
///
/// The staged copy is named `{network_id}-{file name}`; the original is
/// never touched.
///
/// # Errors
///
/// * [`BicycleNetworkError::NotFound`] if the network does not exist
/// * [`BicycleNetworkError::Io`] if the copy fails
/// * [`BicycleNetworkError::Database`] if recording the path fails
pub fn stage_upload(
    conn: &Connection,
    source: &Path,
    uploads_dir: &Path,
    network_id: i64,
) -> Result<PathBuf, BicycleNetworkError> {
    if network_db::get_network(conn, network_id)?.is_none() {
        return Err(BicycleNetworkError::NotFound { id: network_id });
    }

    let file_name = source
        .file_name()
        .map_or_else(|| "upload.geojson".into(), |n| n.to_string_lossy());
    let staged = uploads_dir.join(format!("{network_id}-{file_name}"));

    std::fs::create_dir_all(uploads_dir)?;
    std::fs::copy(source, &staged)?;
    network_db::set_source_file(conn, network_id, Some(&staged.to_string_lossy()))?;

    log::debug!("Staged {} as {}", source.display(), staged.display());

    Ok(staged)
}

/// Processes a staged upload into the network's parts.
///
/// Returns `Ok(true)` when parts were saved (possibly unmerged, with a
/// warning sent to `sink`) and `Ok(false)` when the file is not usable
/// `GeoJSON` (an error is sent to `sink` and nothing is saved). The
/// staged file is deleted and the network's pending source cleared in
/// every case.
///
/// # Errors
///
/// Returns [`BicycleNetworkError`] if the file cannot be read or
/// persisting the parts fails. Cleanup failures are logged and never
/// replace the processing result.
pub fn process_file(
    conn: &Connection,
    path: &Path,
    network_id: i64,
    settings: &GeometrySettings,
    sink: &dyn MessageSink,
) -> Result<bool, BicycleNetworkError> {
    let result = process_document(conn, path, network_id, settings, sink);

    if let Err(e) = std::fs::remove_file(path) {
        log::warn!("Failed to remove staged upload {}: {e}", path.display());
    }
    if let Err(e) = network_db::set_source_file(conn, network_id, None) {
        log::warn!("Failed to clear pending source of network {network_id}: {e}");
    }

    result
}

fn process_document(
    conn: &Connection,
    path: &Path,
    network_id: i64,
    settings: &GeometrySettings,
    sink: &dyn MessageSink,
) -> Result<bool, BicycleNetworkError> {
    let contents = std::fs::read_to_string(path)?;

    let document: Value = match serde_json::from_str(&contents) {
        Ok(document) => document,
        Err(e) => {
            log::warn!("{} is not valid JSON: {e}", path.display());
            sink.error(INVALID_INPUT_MESSAGE);
            return Ok(false);
        }
    };

    let filtered = match filter_geojson(&document, settings) {
        Ok(filtered) => filtered,
        Err(BicycleNetworkError::InvalidInput { message }) => {
            log::warn!("{}: {message}", path.display());
            sink.error(INVALID_INPUT_MESSAGE);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let collection = if filtered.single_multi_line_string {
        log::info!("Input is a single MultiLineString, skipping merge");
        filtered.collection
    } else {
        match merge_linestrings(filtered.collection) {
            MergeOutcome::Merged(collection) => collection,
            MergeOutcome::Unmerged(collection) => {
                sink.warning(MERGE_FAILED_MESSAGE);
                collection
            }
        }
    };

    save_network_to_db(conn, &collection, network_id, settings)?;

    Ok(true)
}

/// Stages `source` into `uploads_dir` and processes it into the
/// network's parts. See [`process_file`] for the return value.
///
/// # Errors
///
/// Returns [`BicycleNetworkError`] if staging, reading, or persisting
/// fails.
pub fn upload_network(
    conn: &Connection,
    source: &Path,
    uploads_dir: &Path,
    network_id: i64,
    settings: &GeometrySettings,
    sink: &dyn MessageSink,
) -> Result<bool, BicycleNetworkError> {
    let staged = stage_upload(conn, source, uploads_dir, network_id)?;
    process_file(conn, &staged, network_id, settings, sink)
}

/// Renders a network's stored parts as a `GeoJSON` `FeatureCollection`
/// in the working SRID, in the shape uploads are accepted in.
///
/// # Errors
///
/// * [`BicycleNetworkError::NotFound`] if the network does not exist
/// * [`BicycleNetworkError::Json`] if a stored geometry is not valid JSON
/// * [`BicycleNetworkError::Database`] if the query fails
pub fn export_network(
    conn: &Connection,
    network_id: i64,
    settings: &GeometrySettings,
) -> Result<Value, BicycleNetworkError> {
    let Some(network) = network_db::get_network(conn, network_id)? else {
        return Err(BicycleNetworkError::NotFound { id: network_id });
    };

    let features = network_db::get_parts(conn, network_id)?
        .into_iter()
        .enumerate()
        .map(|(index, (_, geometry))| {
            let geometry: Value = serde_json::from_str(&geometry)?;
            Ok(json!({
                "type": "Feature",
                "properties": {"part": index},
                "geometry": geometry,
            }))
        })
        .collect::<Result<Vec<_>, BicycleNetworkError>>()?;

    Ok(json!({
        "type": "FeatureCollection",
        "name": network.name.unwrap_or_else(|| format!("bicycle_network_{network_id}")),
        "crs": {"type": "name", "properties": {"name": crs_name(settings.working_srid)}},
        "features": features,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CollectedMessages, MessageLevel};
    use civic_map_database::network_db::{create_network, create_schema, get_network, get_parts};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn
    }

    fn scratch_dir(label: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "civic_map_bicycle_{label}_{}_{n}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_source(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("network.geojson");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn fragmented_document() -> String {
        json!({
            "type": "FeatureCollection",
            "name": "pyoratiet",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}},
            "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "LineString",
                    "coordinates": [[22.260, 60.450], [22.261, 60.451], [22.262, 60.452]]}},
                {"type": "Feature", "properties": {}, "geometry": {"type": "LineString",
                    "coordinates": [[22.262, 60.452], [22.263, 60.453], [22.264, 60.454]]}},
                {"type": "Feature", "properties": {}, "geometry": {"type": "LineString",
                    "coordinates": [[22.300, 60.500], [22.301, 60.501], [22.302, 60.503]]}},
            ],
        })
        .to_string()
    }

    #[test]
    fn uploads_merge_and_clean_up() {
        let conn = memory_db();
        let dir = scratch_dir("merge");
        let source = write_source(&dir, &fragmented_document());
        let uploads = dir.join("uploads");
        let id = create_network(&conn, Some("Turku")).unwrap();
        let sink = CollectedMessages::new();

        let ok = upload_network(
            &conn,
            &source,
            &uploads,
            id,
            &GeometrySettings::default(),
            &sink,
        )
        .unwrap();

        assert!(ok);
        assert!(sink.messages().is_empty());
        assert_eq!(get_parts(&conn, id).unwrap().len(), 2);
        assert!(source.exists(), "operator's original must be kept");
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
        let network = get_network(&conn, id).unwrap().unwrap();
        assert!(network.source_file.is_none());
        assert!(network.length > 0.0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn re_uploading_the_same_file_replaces_parts() {
        let conn = memory_db();
        let dir = scratch_dir("reupload");
        let source = write_source(&dir, &fragmented_document());
        let uploads = dir.join("uploads");
        let id = create_network(&conn, None).unwrap();
        let settings = GeometrySettings::default();

        upload_network(&conn, &source, &uploads, id, &settings, &CollectedMessages::new()).unwrap();
        let first_parts = get_parts(&conn, id).unwrap();
        let first_length = get_network(&conn, id).unwrap().unwrap().length;

        upload_network(&conn, &source, &uploads, id, &settings, &CollectedMessages::new()).unwrap();
        let second_parts = get_parts(&conn, id).unwrap();
        let second_length = get_network(&conn, id).unwrap().unwrap().length;

        assert_eq!(first_parts.len(), second_parts.len());
        assert_eq!(first_parts, second_parts);
        assert!((first_length - second_length).abs() < 1e-9);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn invalid_json_reports_error_and_deletes_staged_file() {
        let conn = memory_db();
        let dir = scratch_dir("invalid");
        let source = write_source(&dir, "{ not json");
        let uploads = dir.join("uploads");
        let id = create_network(&conn, None).unwrap();
        let sink = CollectedMessages::new();

        let ok = upload_network(
            &conn,
            &source,
            &uploads,
            id,
            &GeometrySettings::default(),
            &sink,
        )
        .unwrap();

        assert!(!ok);
        assert_eq!(
            sink.messages(),
            vec![(MessageLevel::Error, INVALID_INPUT_MESSAGE.to_string())]
        );
        assert!(get_parts(&conn, id).unwrap().is_empty());
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn cleanup_failure_keeps_the_processing_result() {
        let conn = memory_db();
        let dir = scratch_dir("cleanup");
        let path = write_source(&dir, "{ not json");
        let id = create_network(&conn, None).unwrap();
        conn.execute_batch("DROP TABLE bicycle_networks").unwrap();
        let sink = CollectedMessages::new();

        let ok = process_file(&conn, &path, id, &GeometrySettings::default(), &sink).unwrap();

        assert!(!ok);
        assert_eq!(
            sink.messages(),
            vec![(MessageLevel::Error, INVALID_INPUT_MESSAGE.to_string())]
        );
        assert!(!path.exists());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_keys_are_invalid_input() {
        let conn = memory_db();
        let dir = scratch_dir("keys");
        let path = write_source(&dir, r#"{"type": "FeatureCollection", "features": []}"#);
        let id = create_network(&conn, None).unwrap();
        let sink = CollectedMessages::new();

        let ok = process_file(&conn, &path, id, &GeometrySettings::default(), &sink).unwrap();

        assert!(!ok);
        assert!(!path.exists());
        assert_eq!(sink.messages()[0].0, MessageLevel::Error);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn merge_failure_saves_unmerged_with_warning() {
        let conn = memory_db();
        let dir = scratch_dir("stub");
        let document = json!({
            "type": "FeatureCollection",
            "name": "stubs",
            "crs": {"properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}},
            "features": [
                {"type": "Feature", "geometry": {"type": "LineString",
                    "coordinates": [[22.26, 60.45], [22.27, 60.46]]}},
                {"type": "Feature", "geometry": {"type": "LineString",
                    "coordinates": [[22.30, 60.50], [22.31, 60.51]]}},
            ],
        });
        let path = write_source(&dir, &document.to_string());
        let id = create_network(&conn, None).unwrap();
        let sink = CollectedMessages::new();

        let ok = process_file(&conn, &path, id, &GeometrySettings::default(), &sink).unwrap();

        assert!(ok);
        assert_eq!(
            sink.messages(),
            vec![(MessageLevel::Warning, MERGE_FAILED_MESSAGE.to_string())]
        );
        assert_eq!(get_parts(&conn, id).unwrap().len(), 2);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn exported_single_multi_line_string_re_imports_unchanged() {
        let conn = memory_db();
        let dir = scratch_dir("roundtrip");
        let settings = GeometrySettings::default();
        let document = json!({
            "type": "FeatureCollection",
            "name": "merged",
            "crs": {"properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}},
            "features": [{"type": "Feature", "geometry": {"type": "MultiLineString",
                "coordinates": [
                    [[22.26, 60.45], [22.27, 60.46]],
                    [[22.30, 60.50], [22.31, 60.51]]
                ]}}],
        });
        let path = write_source(&dir, &document.to_string());
        let id = create_network(&conn, Some("merged")).unwrap();
        let sink = CollectedMessages::new();

        assert!(process_file(&conn, &path, id, &settings, &sink).unwrap());
        let first = get_parts(&conn, id).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, "MultiLineString");

        let exported = export_network(&conn, id, &settings).unwrap();
        let path = write_source(&dir, &exported.to_string());
        assert!(process_file(&conn, &path, id, &settings, &sink).unwrap());

        assert_eq!(get_parts(&conn, id).unwrap(), first);
        assert!(sink.messages().is_empty());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn exporting_unknown_network_fails() {
        let conn = memory_db();
        let result = export_network(&conn, 7, &GeometrySettings::default());
        assert!(matches!(result, Err(BicycleNetworkError::NotFound { id: 7 })));
    }
}
