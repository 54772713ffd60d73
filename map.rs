use crate::db::{self, DbPool};
use crate::error::Result;
use crate::models::{ExportFilter, StoredSighting};
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Value};

/// Verified sightings as GeoJSON points, the shape the public map layer loads.
pub fn map_feed(pool: &DbPool) -> Result<FeatureCollection> {
    let conn = pool.get()?;
    let filter = ExportFilter {
        verified: Some(true),
        ..Default::default()
    };
    let sightings = db::list_sightings(&conn, &filter)?;
    Ok(feature_collection(&sightings))
}

pub fn feature_collection(sightings: &[StoredSighting]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: sightings.iter().filter_map(feature).collect(),
        foreign_members: None,
    }
}

fn feature(sighting: &StoredSighting) -> Option<Feature> {
    let r = &sighting.report;
    let (lat, lng) = (r.latitude?, r.longitude?);

    let mut properties = JsonObject::new();
    properties.insert("id".into(), sighting.id.into());
    properties.insert("species".into(), r.species.clone().into());
    properties.insert("observed_at".into(), r.observed_at.clone().into());
    properties.insert("animal_count".into(), r.animal_count.into());
    let photo = sighting
        .media
        .iter()
        .find(|m| m.from_position_step)
        .or_else(|| sighting.media.first())
        .map(|m| m.url.clone());
    properties.insert("photo".into(), photo.into());

    Some(Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![lng, lat]))),
        id: Some(Id::Number(sighting.id.into())),
        properties: Some(properties),
        foreign_members: None,
    })
}
