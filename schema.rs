/// MIGRATION 0001: Initial database schema.
pub const MIGRATION_0001: &str = r#"
-- Sightings Table: one row per submitted report.
CREATE TABLE IF NOT EXISTS sightings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    latitude REAL,
    longitude REAL,
    species TEXT,
    animal_count INTEGER,
    juvenile_count INTEGER,
    behavior TEXT,
    distance TEXT,
    distribution TEXT,
    sighting_source TEXT, -- 'land' or 'boat'
    sea_state INTEGER,
    visibility TEXT,
    boat_drive TEXT,
    observed_at TEXT, -- 'YYYY-MM-DDTHH:MM', local time of the observer
    notes TEXT,
    reporter_name TEXT,
    reporter_email TEXT,
    reporter_phone TEXT,
    reporter_address TEXT,
    privacy_consent BOOLEAN NOT NULL DEFAULT 0,
    publication_consent BOOLEAN NOT NULL DEFAULT 0,
    verified BOOLEAN NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Media Table: uploaded photos belonging to a sighting, in draft order.
CREATE TABLE IF NOT EXISTS sighting_media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sighting_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    storage_key TEXT NOT NULL,
    url TEXT NOT NULL,
    file_name TEXT NOT NULL,
    content_type TEXT,
    from_position_step BOOLEAN NOT NULL DEFAULT 0,
    exif_json TEXT,
    FOREIGN KEY (sighting_id) REFERENCES sightings (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sightings_observed_at ON sightings (observed_at);
CREATE INDEX IF NOT EXISTS idx_sightings_verified ON sightings (verified);
CREATE INDEX IF NOT EXISTS idx_sighting_media_sighting_id ON sighting_media (sighting_id);
"#;

pub const MIGRATION_0002: &str = r#"
-- Review trail for the admin panel
ALTER TABLE sightings ADD COLUMN verified_by TEXT;
ALTER TABLE sightings ADD COLUMN verified_at INTEGER;
"#;

pub const MIGRATIONS: &[&str] = &[MIGRATION_0001, MIGRATION_0002];
