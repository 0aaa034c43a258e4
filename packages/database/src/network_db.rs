//! Bicycle network storage in `DuckDB`.
//!
//! A network row owns its parts; parts are only ever replaced as a whole
//! so a re-upload never leaves stale parts behind. Part geometry is
//! `GeoJSON` TEXT in the working SRID.

use std::path::Path;

use civic_map_bicycle_network_models::{BicycleNetwork, BicycleNetworkSummary};
use duckdb::Connection;

use crate::DbError;

/// A stored part: `(geometry_type, geometry_geojson)`.
pub type NetworkPartRow = (String, String);

/// Opens (or creates) the bicycle networks `DuckDB` and ensures the
/// schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Opens the bicycle networks DB at the default path.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_default() -> Result<Connection, DbError> {
    open(&crate::paths::network_db_path())
}

/// Creates the network tables on an existing connection.
///
/// # Errors
///
/// Returns [`DbError`] if a DDL statement fails.
pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE SEQUENCE IF NOT EXISTS bicycle_networks_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS bicycle_network_parts_id_seq START 1;

        CREATE TABLE IF NOT EXISTS bicycle_networks (
            id BIGINT PRIMARY KEY DEFAULT nextval('bicycle_networks_id_seq'),
            name TEXT,
            source_file TEXT,
            length DOUBLE NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS bicycle_network_parts (
            id BIGINT PRIMARY KEY DEFAULT nextval('bicycle_network_parts_id_seq'),
            bicycle_network_id BIGINT NOT NULL,
            geometry_type TEXT NOT NULL,
            geometry_geojson TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Creates a network row and returns its id.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn create_network(conn: &Connection, name: Option<&str>) -> Result<i64, DbError> {
    let id: i64 = conn.query_row("SELECT nextval('bicycle_networks_id_seq')", [], |row| {
        row.get(0)
    })?;

    conn.execute(
        "INSERT INTO bicycle_networks (id, name, length) VALUES (?, ?, 0)",
        duckdb::params![id, name],
    )?;

    log::debug!("Created bicycle network {id}");

    Ok(id)
}

/// Loads a network row, or `None` if it does not exist.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_network(conn: &Connection, id: i64) -> Result<Option<BicycleNetwork>, DbError> {
    let result = conn.query_row(
        "SELECT id, name, source_file, length FROM bicycle_networks WHERE id = ?",
        [id],
        |row| {
            Ok(BicycleNetwork {
                id: row.get(0)?,
                name: row.get(1)?,
                source_file: row.get(2)?,
                length: row.get(3)?,
            })
        },
    );

    match result {
        Ok(network) => Ok(Some(network)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Lists all networks with their current part counts, ordered by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn list_networks(conn: &Connection) -> Result<Vec<BicycleNetworkSummary>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.name, n.source_file, n.length, COUNT(p.id)
         FROM bicycle_networks n
         LEFT JOIN bicycle_network_parts p ON p.bicycle_network_id = n.id
         GROUP BY n.id, n.name, n.source_file, n.length
         ORDER BY n.id",
    )?;

    let rows = stmt.query_map([], |row| {
        let part_count: i64 = row.get(4)?;
        Ok(BicycleNetworkSummary {
            network: BicycleNetwork {
                id: row.get(0)?,
                name: row.get(1)?,
                source_file: row.get(2)?,
                length: row.get(3)?,
            },
            part_count: u64::try_from(part_count).unwrap_or(0),
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Records (or clears) the staged upload path for a network.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn set_source_file(conn: &Connection, id: i64, path: Option<&str>) -> Result<(), DbError> {
    conn.execute(
        "UPDATE bicycle_networks SET source_file = ? WHERE id = ?",
        duckdb::params![path, id],
    )?;
    Ok(())
}

/// Atomically replaces every part of a network and stores its new total
/// length.
///
/// Existing parts are deleted, the new parts inserted in order, and the
/// length updated inside one transaction, so either the whole upload is
/// visible or none of it is.
///
/// Returns the number of parts inserted.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails; the transaction is rolled
/// back in that case.
pub fn replace_parts(
    conn: &Connection,
    network_id: i64,
    parts: &[NetworkPartRow],
    length: f64,
) -> Result<u64, DbError> {
    let tx = conn.unchecked_transaction()?;

    let deleted = tx.execute(
        "DELETE FROM bicycle_network_parts WHERE bicycle_network_id = ?",
        [network_id],
    )?;
    log::debug!("Network {network_id}: deleted {deleted} existing parts");

    let mut inserted = 0u64;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO bicycle_network_parts (bicycle_network_id, geometry_type, geometry_geojson)
             VALUES (?, ?, ?)",
        )?;
        for (geometry_type, geometry_geojson) in parts {
            let rows = stmt.execute(duckdb::params![network_id, geometry_type, geometry_geojson])?;
            inserted += u64::try_from(rows).unwrap_or(0);
        }
    }

    tx.execute(
        "UPDATE bicycle_networks SET length = ? WHERE id = ?",
        duckdb::params![length, network_id],
    )?;

    tx.commit()?;

    Ok(inserted)
}

/// Returns a network's parts in insertion order.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_parts(conn: &Connection, network_id: i64) -> Result<Vec<NetworkPartRow>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT geometry_type, geometry_geojson
         FROM bicycle_network_parts
         WHERE bicycle_network_id = ?
         ORDER BY id",
    )?;

    let rows = stmt.query_map([network_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Deletes a network together with all of its parts.
///
/// Returns `true` if the network existed.
///
/// # Errors
///
/// Returns [`DbError`] if a delete fails.
pub fn delete_network(conn: &Connection, network_id: i64) -> Result<bool, DbError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM bicycle_network_parts WHERE bicycle_network_id = ?",
        [network_id],
    )?;
    let deleted = tx.execute("DELETE FROM bicycle_networks WHERE id = ?", [network_id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn
    }

    fn part(n: u32) -> NetworkPartRow {
        (
            "LineString".to_string(),
            format!(r#"{{"type":"LineString","coordinates":[[{n},0],[{n},1]]}}"#),
        )
    }

    #[test]
    fn creates_and_loads_network() {
        let conn = memory_db();
        let id = create_network(&conn, Some("Turku")).unwrap();
        let network = get_network(&conn, id).unwrap().unwrap();
        assert_eq!(network.name.as_deref(), Some("Turku"));
        assert!(network.length.abs() < f64::EPSILON);
        assert!(get_network(&conn, id + 100).unwrap().is_none());
    }

    #[test]
    fn replacing_parts_drops_previous_parts() {
        let conn = memory_db();
        let id = create_network(&conn, None).unwrap();

        replace_parts(&conn, id, &[part(1), part(2), part(3)], 30.0).unwrap();
        replace_parts(&conn, id, &[part(4)], 10.5).unwrap();

        let parts = get_parts(&conn, id).unwrap();
        assert_eq!(parts, vec![part(4)]);
        let network = get_network(&conn, id).unwrap().unwrap();
        assert!((network.length - 10.5).abs() < f64::EPSILON);
    }

    #[test]
    fn replacing_parts_leaves_other_networks_alone() {
        let conn = memory_db();
        let a = create_network(&conn, Some("a")).unwrap();
        let b = create_network(&conn, Some("b")).unwrap();

        replace_parts(&conn, a, &[part(1)], 1.0).unwrap();
        replace_parts(&conn, b, &[part(2), part(3)], 2.0).unwrap();
        replace_parts(&conn, a, &[part(5)], 1.0).unwrap();

        let summaries = list_networks(&conn).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].part_count, 1);
        assert_eq!(summaries[1].part_count, 2);
    }

    #[test]
    fn deleting_network_cascades_to_parts() {
        let conn = memory_db();
        let id = create_network(&conn, None).unwrap();
        replace_parts(&conn, id, &[part(1), part(2)], 2.0).unwrap();

        assert!(delete_network(&conn, id).unwrap());
        assert!(get_parts(&conn, id).unwrap().is_empty());
        assert!(!delete_network(&conn, id).unwrap());
    }

    #[test]
    fn tracks_staged_source_file() {
        let conn = memory_db();
        let id = create_network(&conn, None).unwrap();
        set_source_file(&conn, id, Some("data/uploads/1.geojson")).unwrap();
        assert_eq!(
            get_network(&conn, id).unwrap().unwrap().source_file.as_deref(),
            Some("data/uploads/1.geojson")
        );
        set_source_file(&conn, id, None).unwrap();
        assert!(get_network(&conn, id).unwrap().unwrap().source_file.is_none());
    }
}
