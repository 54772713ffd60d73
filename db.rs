use crate::error::{Error, Result};
use crate::models::{
    ExifRecord, ExportFilter, MediaReference, SightingPayload, SightingReport, SightingSource,
    StoredSighting,
};
use crate::schema;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Initializes the database connection pool and runs migrations.
pub fn init_database(db_path: &Path) -> Result<DbPool> {
    log::info!("Database path: {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = r2d2::Pool::new(manager)?;

    let mut conn = pool.get()?;
    run_migrations(&mut conn)?;

    Ok(pool)
}

/// Applies pending migrations, tracked through `PRAGMA user_version`.
/// Each migration commits together with its version bump.
fn run_migrations(connection: &mut Connection) -> Result<()> {
    let version: i64 = connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let current = version.max(0) as usize;
    if current >= schema::MIGRATIONS.len() {
        return Ok(());
    }

    log::info!("Running database migrations from version {current}...");
    for (idx, migration) in schema::MIGRATIONS.iter().enumerate().skip(current) {
        let tx = connection.transaction()?;
        tx.execute_batch(migration)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", idx + 1))?;
        tx.commit()?;
    }
    log::info!("Migrations applied successfully.");
    Ok(())
}

pub fn insert_sighting(conn: &mut Connection, payload: &SightingPayload) -> Result<i64> {
    let r = &payload.report;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO sightings (
            latitude, longitude, species, animal_count, juvenile_count, behavior, distance,
            distribution, sighting_source, sea_state, visibility, boat_drive, observed_at, notes,
            reporter_name, reporter_email, reporter_phone, reporter_address,
            privacy_consent, publication_consent
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            r.latitude,
            r.longitude,
            r.species,
            r.animal_count,
            r.juvenile_count,
            r.behavior,
            r.distance,
            r.distribution,
            r.sighting_source.map(|s| s.as_str()),
            r.sea_state,
            r.visibility,
            r.boat_drive,
            r.observed_at,
            r.notes,
            r.reporter_name,
            r.reporter_email,
            r.reporter_phone,
            r.reporter_address,
            r.privacy_consent,
            r.publication_consent,
        ],
    )?;
    let id = tx.last_insert_rowid();

    for (position, media) in payload.media.iter().enumerate() {
        let exif_json = if media.exif.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&media.exif)?)
        };
        tx.execute(
            "INSERT INTO sighting_media (
                sighting_id, position, storage_key, url, file_name, content_type,
                from_position_step, exif_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                position as i64,
                media.storage_key,
                media.url,
                media.file_name,
                media.content_type,
                media.from_position_step,
                exif_json,
            ],
        )?;
    }

    tx.commit()?;
    log::info!("Stored sighting {id} with {} media item(s)", payload.media.len());
    Ok(id)
}

const SIGHTING_COLUMNS: &str = "id, verified, created_at, latitude, longitude, species, animal_count,
    juvenile_count, behavior, distance, distribution, sighting_source, sea_state, visibility,
    boat_drive, observed_at, notes, reporter_name, reporter_email, reporter_phone,
    reporter_address, privacy_consent, publication_consent";

fn sighting_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSighting> {
    let source: Option<String> = row.get("sighting_source")?;
    Ok(StoredSighting {
        id: row.get("id")?,
        verified: row.get("verified")?,
        created_at: row.get("created_at")?,
        report: SightingReport {
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            species: row.get("species")?,
            animal_count: row.get("animal_count")?,
            juvenile_count: row.get("juvenile_count")?,
            behavior: row.get("behavior")?,
            distance: row.get("distance")?,
            distribution: row.get("distribution")?,
            sighting_source: source.as_deref().and_then(SightingSource::parse),
            sea_state: row.get("sea_state")?,
            visibility: row.get("visibility")?,
            boat_drive: row.get("boat_drive")?,
            observed_at: row.get("observed_at")?,
            notes: row.get("notes")?,
            reporter_name: row.get("reporter_name")?,
            reporter_email: row.get("reporter_email")?,
            reporter_phone: row.get("reporter_phone")?,
            reporter_address: row.get("reporter_address")?,
            privacy_consent: row.get("privacy_consent")?,
            publication_consent: row.get("publication_consent")?,
        },
        media: Vec::new(),
    })
}

fn load_media(conn: &Connection, sighting_id: i64) -> Result<Vec<MediaReference>> {
    let mut stmt = conn.prepare(
        "SELECT storage_key, url, file_name, content_type, from_position_step, exif_json
         FROM sighting_media WHERE sighting_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![sighting_id], |row| {
        let exif_json: Option<String> = row.get(5)?;
        Ok((
            MediaReference {
                storage_key: row.get(0)?,
                url: row.get(1)?,
                file_name: row.get(2)?,
                content_type: row.get(3)?,
                from_position_step: row.get(4)?,
                exif: ExifRecord::default(),
            },
            exif_json,
        ))
    })?;

    let mut media = Vec::new();
    for row in rows {
        let (mut reference, exif_json) = row?;
        if let Some(raw) = exif_json {
            reference.exif = serde_json::from_str(&raw).unwrap_or_else(|err| {
                log::warn!("Unreadable EXIF for {}: {}", reference.storage_key, err);
                ExifRecord::default()
            });
        }
        media.push(reference);
    }
    Ok(media)
}

pub fn get_sighting(conn: &Connection, id: i64) -> Result<Option<StoredSighting>> {
    let sql = format!("SELECT {SIGHTING_COLUMNS} FROM sightings WHERE id = ?1");
    let found = conn
        .query_row(&sql, params![id], sighting_from_row)
        .optional()?;
    match found {
        Some(mut sighting) => {
            sighting.media = load_media(conn, id)?;
            Ok(Some(sighting))
        }
        None => Ok(None),
    }
}

/// Sightings matching `filter`, oldest observation first. Date bounds are inclusive.
pub fn list_sightings(conn: &Connection, filter: &ExportFilter) -> Result<Vec<StoredSighting>> {
    let sql = format!(
        "SELECT {SIGHTING_COLUMNS} FROM sightings
         WHERE (?1 IS NULL OR substr(observed_at, 1, 10) >= ?1)
           AND (?2 IS NULL OR substr(observed_at, 1, 10) <= ?2)
           AND (?3 IS NULL OR verified = ?3)
         ORDER BY observed_at, id"
    );
    let from = filter.from.map(|d| d.format("%Y-%m-%d").to_string());
    let to = filter.to.map(|d| d.format("%Y-%m-%d").to_string());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![from, to, filter.verified], sighting_from_row)?;

    let mut sightings = Vec::new();
    for row in rows {
        let mut sighting = row?;
        sighting.media = load_media(conn, sighting.id)?;
        sightings.push(sighting);
    }
    Ok(sightings)
}

pub fn set_verified(conn: &Connection, id: i64, verified: bool, reviewer: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE sightings
         SET verified = ?2,
             verified_by = CASE WHEN ?2 THEN ?3 ELSE NULL END,
             verified_at = CASE WHEN ?2 THEN strftime('%s', 'now') ELSE NULL END
         WHERE id = ?1",
        params![id, verified, reviewer],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("Sighting {id}")));
    }
    Ok(())
}

/// Deletes a sighting and returns the storage keys its media used.
pub fn delete_sighting(conn: &mut Connection, id: i64) -> Result<Vec<String>> {
    let tx = conn.transaction()?;
    let keys = {
        let mut stmt = tx.prepare("SELECT storage_key FROM sighting_media WHERE sighting_id = ?1")?;
        let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()?
    };
    let changed = tx.execute("DELETE FROM sightings WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(Error::NotFound(format!("Sighting {id}")));
    }
    tx.commit()?;
    Ok(keys)
}

/// Keys still referenced by some other sighting; shared content-addressed objects must survive.
pub fn is_storage_key_used(conn: &Connection, key: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sighting_media WHERE storage_key = ?1",
        params![key],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
pub(crate) fn test_pool() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("sightings.db")).unwrap();
    (dir, pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::sample_draft;
    use chrono::NaiveDate;

    fn payload(observed_at: &str) -> SightingPayload {
        let mut report = sample_draft().report;
        report.observed_at = Some(observed_at.into());
        SightingPayload {
            report,
            media: vec![MediaReference {
                storage_key: "sightings/abc.jpg".into(),
                url: "/media/sightings/abc.jpg".into(),
                file_name: "wal.jpg".into(),
                content_type: Some("image/jpeg".into()),
                exif: ExifRecord {
                    iso: Some(200),
                    ..Default::default()
                },
                from_position_step: true,
            }],
        }
    }

    #[test]
    fn insert_then_get_round_trips_report_and_media() {
        let (_dir, pool) = test_pool();
        let mut conn = pool.get().unwrap();
        let sent = payload("2024-06-01T14:30");
        let id = insert_sighting(&mut conn, &sent).unwrap();

        let stored = get_sighting(&conn, id).unwrap().unwrap();
        assert_eq!(stored.report, sent.report);
        assert_eq!(stored.media, sent.media);
        assert!(!stored.verified);
        assert!(get_sighting(&conn, id + 1).unwrap().is_none());
    }

    #[test]
    fn migrations_are_idempotent() {
        let (_dir, pool) = test_pool();
        let mut conn = pool.get().unwrap();
        run_migrations(&mut conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version as usize, schema::MIGRATIONS.len());
    }

    #[test]
    fn failed_migration_rolls_back_entirely() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(schema::MIGRATION_0001).unwrap();
        conn.execute_batch("PRAGMA user_version = 1;").unwrap();
        // The second ALTER in 0002 collides with this column after the first one ran.
        conn.execute_batch("ALTER TABLE sightings ADD COLUMN verified_at INTEGER;")
            .unwrap();

        assert!(run_migrations(&mut conn).is_err());
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, 1);
        assert!(conn.prepare("SELECT verified_by FROM sightings").is_err());

        conn.execute_batch("ALTER TABLE sightings DROP COLUMN verified_at;")
            .unwrap();
        run_migrations(&mut conn).unwrap();
        assert!(conn.prepare("SELECT verified_by, verified_at FROM sightings").is_ok());
    }

    #[test]
    fn list_filters_by_date_and_verification() {
        let (_dir, pool) = test_pool();
        let mut conn = pool.get().unwrap();
        let a = insert_sighting(&mut conn, &payload("2024-05-30T08:00")).unwrap();
        let b = insert_sighting(&mut conn, &payload("2024-06-01T14:30")).unwrap();
        let c = insert_sighting(&mut conn, &payload("2024-06-03T19:10")).unwrap();
        set_verified(&conn, b, true, "admin@example.org").unwrap();
        set_verified(&conn, c, true, "admin@example.org").unwrap();

        let filter = ExportFilter {
            from: NaiveDate::from_ymd_opt(2024, 6, 1),
            to: NaiveDate::from_ymd_opt(2024, 6, 2),
            verified: None,
        };
        let ids: Vec<i64> = list_sightings(&conn, &filter).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b]);

        let verified = ExportFilter {
            verified: Some(true),
            ..Default::default()
        };
        let ids: Vec<i64> = list_sightings(&conn, &verified).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b, c]);

        let unverified = ExportFilter {
            verified: Some(false),
            ..Default::default()
        };
        let ids: Vec<i64> = list_sightings(&conn, &unverified).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a]);
    }

    #[test]
    fn delete_cascades_media_and_reports_keys() {
        let (_dir, pool) = test_pool();
        let mut conn = pool.get().unwrap();
        let id = insert_sighting(&mut conn, &payload("2024-06-01T14:30")).unwrap();
        let keys = delete_sighting(&mut conn, id).unwrap();
        assert_eq!(keys, vec!["sightings/abc.jpg".to_string()]);
        assert!(!is_storage_key_used(&conn, "sightings/abc.jpg").unwrap());
        assert!(matches!(delete_sighting(&mut conn, id), Err(Error::NotFound(_))));
        assert!(matches!(set_verified(&conn, id, true, "x"), Err(Error::NotFound(_))));
    }
}
