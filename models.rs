use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SightingSource {
    Land,
    Boat,
}

impl SightingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SightingSource::Land => "land",
            SightingSource::Boat => "boat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "land" => Some(SightingSource::Land),
            "boat" => Some(SightingSource::Boat),
            _ => None,
        }
    }
}

/// The scalar fields of a report, shared by the draft, the wire payload and stored rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SightingReport {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub species: Option<String>,
    pub animal_count: Option<u32>,
    pub juvenile_count: Option<u32>,
    pub behavior: Option<String>,
    pub distance: Option<String>,
    pub distribution: Option<String>,
    pub sighting_source: Option<SightingSource>,
    pub sea_state: Option<u8>,
    pub visibility: Option<String>,
    pub boat_drive: Option<String>,
    /// Local observation time, `YYYY-MM-DDTHH:MM`.
    pub observed_at: Option<String>,
    pub notes: Option<String>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub reporter_phone: Option<String>,
    pub reporter_address: Option<String>,
    pub privacy_consent: bool,
    pub publication_consent: bool,
}

impl SightingReport {
    /// Drops everything that identifies or reaches the reporter.
    pub fn strip_contact(&mut self) {
        self.reporter_name = None;
        self.reporter_email = None;
        self.reporter_phone = None;
        self.reporter_address = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SightingDraft {
    pub report: SightingReport,
    pub media: Vec<MediaAttachment>,
}

impl SightingDraft {
    pub fn is_empty(&self) -> bool {
        *self == SightingDraft::default()
    }

    pub fn position_attachment(&self) -> Option<&MediaAttachment> {
        self.media.iter().find(|m| m.from_position_step)
    }

    pub fn apply(&mut self, patch: DraftPatch) {
        let r = &mut self.report;
        set(&mut r.latitude, patch.latitude);
        set(&mut r.longitude, patch.longitude);
        set(&mut r.species, patch.species);
        set(&mut r.animal_count, patch.animal_count);
        set(&mut r.juvenile_count, patch.juvenile_count);
        set(&mut r.behavior, patch.behavior);
        set(&mut r.distance, patch.distance);
        set(&mut r.distribution, patch.distribution);
        set(&mut r.sighting_source, patch.sighting_source);
        set(&mut r.sea_state, patch.sea_state);
        set(&mut r.visibility, patch.visibility);
        set(&mut r.boat_drive, patch.boat_drive);
        set(&mut r.observed_at, patch.observed_at);
        set(&mut r.notes, patch.notes);
        set(&mut r.reporter_name, patch.reporter_name);
        set(&mut r.reporter_email, patch.reporter_email);
        set(&mut r.reporter_phone, patch.reporter_phone);
        set(&mut r.reporter_address, patch.reporter_address);
        if let Some(v) = patch.privacy_consent {
            r.privacy_consent = v;
        }
        if let Some(v) = patch.publication_consent {
            r.publication_consent = v;
        }
    }
}

fn set<T>(slot: &mut Option<T>, change: Option<Option<T>>) {
    if let Some(value) = change {
        *slot = value;
    }
}

/// Partial draft change. Outer `None` leaves a field alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftPatch {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub latitude: Option<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub longitude: Option<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub species: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub animal_count: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub juvenile_count: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub behavior: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub distance: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub distribution: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub sighting_source: Option<Option<SightingSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub sea_state: Option<Option<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub visibility: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub boat_drive: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub observed_at: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub reporter_name: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub reporter_email: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub reporter_phone: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "::serde_with::rust::double_option")]
    pub reporter_address: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_consent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_consent: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExifRecord {
    pub gps_lat: Option<f64>,
    pub gps_lng: Option<f64>,
    pub gps_alt: Option<f64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub exposure_time: Option<f64>,
    pub fnumber: Option<f64>,
    pub iso: Option<i64>,
    pub focal_length: Option<f64>,
    pub flash: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub orientation: Option<i64>,
    pub datetime_original: Option<NaiveDateTime>,
}

impl ExifRecord {
    pub fn is_empty(&self) -> bool {
        *self == ExifRecord::default()
    }
}

/// A file handed to the media pipeline, before metadata extraction.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: content_type_for(file_name),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> crate::error::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| crate::error::Error::Path(format!("Invalid file name: {}", path.display())))?;
        Ok(Self::new(file_name, bytes))
    }

    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_lowercase()
    }
}

fn content_type_for(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|s| s.to_str())?
        .to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "heic" => "image/heic",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => return None,
    };
    Some(mime.to_string())
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: Option<String>,
    #[serde_as(as = "Base64")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub exif: ExifRecord,
    #[serde(default)]
    pub from_position_step: bool,
}

impl MediaAttachment {
    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_lowercase()
    }
}

/// An attachment after upload: where it lives, plus what was read from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaReference {
    pub storage_key: String,
    pub url: String,
    pub file_name: String,
    pub content_type: Option<String>,
    #[serde(default)]
    pub exif: ExifRecord,
    #[serde(default)]
    pub from_position_step: bool,
}

/// Body of the create request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SightingPayload {
    #[serde(flatten)]
    pub report: SightingReport,
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSighting {
    pub id: i64,
    pub verified: bool,
    pub created_at: i64,
    #[serde(flatten)]
    pub report: SightingReport,
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvExportRow {
    pub id: i64,
    pub verified: bool,
    pub created_at: i64,
    pub observed_at: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub species: Option<String>,
    pub animal_count: Option<u32>,
    pub juvenile_count: Option<u32>,
    pub behavior: Option<String>,
    pub distance: Option<String>,
    pub distribution: Option<String>,
    pub sighting_source: Option<String>,
    pub sea_state: Option<u8>,
    pub visibility: Option<String>,
    pub boat_drive: Option<String>,
    pub notes: Option<String>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub reporter_phone: Option<String>,
    pub reporter_address: Option<String>,
    pub publication_consent: bool,
    pub media: String,
}

impl From<&StoredSighting> for CsvExportRow {
    fn from(s: &StoredSighting) -> Self {
        let r = &s.report;
        Self {
            id: s.id,
            verified: s.verified,
            created_at: s.created_at,
            observed_at: r.observed_at.clone(),
            latitude: r.latitude,
            longitude: r.longitude,
            species: r.species.clone(),
            animal_count: r.animal_count,
            juvenile_count: r.juvenile_count,
            behavior: r.behavior.clone(),
            distance: r.distance.clone(),
            distribution: r.distribution.clone(),
            sighting_source: r.sighting_source.map(|s| s.as_str().to_string()),
            sea_state: r.sea_state,
            visibility: r.visibility.clone(),
            boat_drive: r.boat_drive.clone(),
            notes: r.notes.clone(),
            reporter_name: r.reporter_name.clone(),
            reporter_email: r.reporter_email.clone(),
            reporter_phone: r.reporter_phone.clone(),
            reporter_address: r.reporter_address.clone(),
            publication_consent: r.publication_consent,
            media: s
                .media
                .iter()
                .map(|m| m.url.as_str())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}
