use crate::error::Result;
use crate::models::{CsvExportRow, StoredSighting};
use serde_json::Value;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
    Kml,
    Xml,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Kml => "kml",
            ExportFormat::Xml => "xml",
        }
    }
}

pub fn render(format: ExportFormat, sightings: &[StoredSighting]) -> Result<String> {
    match format {
        ExportFormat::Json => to_json(sightings),
        ExportFormat::Csv => to_csv(sightings),
        ExportFormat::Kml => to_kml(sightings),
        ExportFormat::Xml => to_xml(sightings),
    }
}

pub fn to_json(sightings: &[StoredSighting]) -> Result<String> {
    Ok(serde_json::to_string_pretty(sightings)?)
}

pub fn to_csv(sightings: &[StoredSighting]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if sightings.is_empty() {
        // serialize() writes the header lazily, so an empty export would have none.
        writer.write_record(CSV_HEADER)?;
    }
    for sighting in sightings {
        writer.serialize(CsvExportRow::from(sighting))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| crate::error::Error::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

const CSV_HEADER: &[&str] = &[
    "id", "verified", "created_at", "observed_at", "latitude", "longitude", "species",
    "animal_count", "juvenile_count", "behavior", "distance", "distribution", "sighting_source",
    "sea_state", "visibility", "boat_drive", "notes", "reporter_name", "reporter_email",
    "reporter_phone", "reporter_address", "publication_consent", "media",
];

pub fn to_kml(sightings: &[StoredSighting]) -> Result<String> {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n<Document>\n");
    out.push_str("<name>Ostsee sightings</name>\n");
    for sighting in sightings {
        let r = &sighting.report;
        let (Some(lat), Some(lng)) = (r.latitude, r.longitude) else {
            log::debug!("Sighting {} has no position; left out of KML", sighting.id);
            continue;
        };
        let _ = writeln!(out, "<Placemark id=\"sighting-{}\">", sighting.id);
        let _ = writeln!(
            out,
            "<name>{}</name>",
            escape(r.species.as_deref().unwrap_or("Unknown species"))
        );
        if let Some(notes) = r.notes.as_deref() {
            let _ = writeln!(out, "<description>{}</description>", escape(notes));
        }
        if let Some(when) = r.observed_at.as_deref() {
            let _ = writeln!(out, "<TimeStamp><when>{}</when></TimeStamp>", escape(when));
        }
        out.push_str("<ExtendedData>\n");
        if let Value::Object(fields) = serde_json::to_value(sighting)? {
            for (key, value) in fields {
                if key == "media" {
                    continue;
                }
                if let Some(text) = scalar_text(&value) {
                    let _ = writeln!(
                        out,
                        "<Data name=\"{}\"><value>{}</value></Data>",
                        escape(&key),
                        escape(&text)
                    );
                }
            }
        }
        out.push_str("</ExtendedData>\n");
        let _ = writeln!(out, "<Point><coordinates>{lng},{lat}</coordinates></Point>");
        out.push_str("</Placemark>\n");
    }
    out.push_str("</Document>\n</kml>\n");
    Ok(out)
}

pub fn to_xml(sightings: &[StoredSighting]) -> Result<String> {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<sightings>\n");
    for sighting in sightings {
        let value = serde_json::to_value(sighting)?;
        write_element(&mut out, "sighting", &value, 1);
    }
    out.push_str("</sightings>\n");
    Ok(out)
}

/// Objects become nested elements, arrays repeat as `<item>`, nulls are omitted.
fn write_element(out: &mut String, name: &str, value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Null => {}
        Value::Object(fields) => {
            let _ = writeln!(out, "{indent}<{name}>");
            for (key, child) in fields {
                write_element(out, key, child, depth + 1);
            }
            let _ = writeln!(out, "{indent}</{name}>");
        }
        Value::Array(items) => {
            let _ = writeln!(out, "{indent}<{name}>");
            for item in items {
                write_element(out, "item", item, depth + 1);
            }
            let _ = writeln!(out, "{indent}</{name}>");
        }
        scalar => {
            let text = scalar_text(scalar).unwrap_or_default();
            let _ = writeln!(out, "{indent}<{name}>{}</{name}>", escape(&text));
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
