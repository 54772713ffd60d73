use crate::error::{Error, Result};
use crate::models::{ExifRecord, MediaFile};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

pub trait MetadataReader: Send + Sync {
    fn read(&self, file: &MediaFile) -> Result<ExifRecord>;
}

/// Reads metadata by shelling out to `exiftool -json -n`.
pub struct ExifTool {
    exe: PathBuf,
}

impl ExifTool {
    pub fn new(exe: PathBuf) -> Self {
        Self { exe }
    }
}

impl MetadataReader for ExifTool {
    fn read(&self, file: &MediaFile) -> Result<ExifRecord> {
        let suffix = format!(".{}", file.extension());
        let mut tmp = tempfile::Builder::new()
            .prefix("sighting-media-")
            .suffix(&suffix)
            .tempfile()?;
        tmp.write_all(&file.bytes)?;
        tmp.flush()?;

        let output = Command::new(&self.exe)
            .args(["-json", "-n"])
            .arg(tmp.path())
            .output()
            .map_err(|e| Error::Extraction(format!("Failed to execute ExifTool: {e}")))?;

        if !output.status.success() {
            return Err(Error::Extraction(format!(
                "ExifTool returned non-zero status for {}",
                file.file_name
            )));
        }

        let entries: Vec<Value> = serde_json::from_slice(&output.stdout)?;
        Ok(entries.first().map(parse_entry).unwrap_or_default())
    }
}

/// Maps one exiftool JSON object onto an [`ExifRecord`]. Unknown or malformed keys are left unset.
pub fn parse_entry(entry: &Value) -> ExifRecord {
    let make = get_string(entry, "Make");
    let model = normalize_model(&make, get_string(entry, "Model"));

    let gps_alt = get_f64(entry, "GPSAltitude").map(|alt| {
        if get_i64(entry, "GPSAltitudeRef") == Some(1) {
            -alt.abs()
        } else {
            alt
        }
    });

    ExifRecord {
        gps_lat: get_f64(entry, "GPSLatitude"),
        gps_lng: get_f64(entry, "GPSLongitude"),
        gps_alt,
        make,
        model,
        exposure_time: get_f64(entry, "ExposureTime"),
        fnumber: get_f64(entry, "FNumber").or_else(|| get_f64(entry, "Aperture")),
        iso: get_i64(entry, "ISO"),
        focal_length: get_f64(entry, "FocalLength"),
        flash: get_i64(entry, "Flash"),
        width: get_i64(entry, "ImageWidth"),
        height: get_i64(entry, "ImageHeight"),
        orientation: get_i64(entry, "Orientation"),
        datetime_original: parse_datetime_value(entry, "DateTimeOriginal")
            .or_else(|| parse_datetime_value(entry, "CreateDate")),
    }
}

fn normalize_model(make: &Option<String>, model: Option<String>) -> Option<String> {
    let model = model?;
    let model_trim = model.trim();
    if model_trim.is_empty() {
        return None;
    }
    let Some(make) = make.as_ref().map(|m| m.trim()).filter(|m| !m.is_empty()) else {
        return Some(model_trim.to_string());
    };

    if model_trim.to_ascii_lowercase().starts_with(&make.to_ascii_lowercase()) {
        let remainder = &model_trim[make.len()..];
        let separator = |c: char| c.is_whitespace() || c == '-' || c == '_' || c == '/';
        if remainder.starts_with(separator) {
            let cleaned = remainder.trim_start_matches(separator);
            if !cleaned.is_empty() {
                return Some(cleaned.to_string());
            }
        }
    }

    Some(model_trim.to_string())
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    // Sub-second and zone suffixes are dropped; the first 19 chars carry the wall-clock time.
    let head = value.get(..19).unwrap_or(value);
    NaiveDateTime::parse_from_str(head, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

fn parse_datetime_value(entry: &Value, key: &str) -> Option<NaiveDateTime> {
    get_string(entry, key).as_deref().and_then(parse_datetime)
}

fn get_string(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn get_i64(entry: &Value, key: &str) -> Option<i64> {
    entry.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

fn get_f64(entry: &Value, key: &str) -> Option<f64> {
    entry.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
