use crate::draft_store::{DraftStorage, DraftStore};
use crate::error::{Error, FieldError, Result};
use crate::exiftool::MetadataReader;
use crate::models::{ExifRecord, MediaAttachment, MediaFile};
use std::sync::Arc;
use uuid::Uuid;

/// Turns incoming files into draft attachments. Only the draft store is written.
pub struct MediaPipeline<S: DraftStorage> {
    reader: Arc<dyn MetadataReader>,
    store: Arc<DraftStore<S>>,
}

impl<S: DraftStorage> MediaPipeline<S> {
    pub fn new(reader: Arc<dyn MetadataReader>, store: Arc<DraftStore<S>>) -> Self {
        Self { reader, store }
    }

    /// Never fails on unreadable metadata; the attachment then carries an empty record.
    pub fn extract(&self, file: &MediaFile) -> ExifRecord {
        match self.reader.read(file) {
            Ok(record) => record,
            Err(err) => {
                log::debug!("No metadata for {}: {}", file.file_name, err);
                ExifRecord::default()
            }
        }
    }

    fn attachment(&self, file: MediaFile, from_position_step: bool) -> MediaAttachment {
        let exif = self.extract(&file);
        MediaAttachment {
            id: Uuid::new_v4(),
            file_name: file.file_name,
            content_type: file.content_type,
            payload: file.bytes,
            exif,
            from_position_step,
        }
    }

    pub fn ingest(&self, file: MediaFile) -> Result<MediaAttachment> {
        let attachment = self.attachment(file, false);
        let stored = attachment.clone();
        self.store.update_with(move |draft| {
            draft.media.push(stored);
            Ok(())
        })?;
        log::info!("Attached {}", attachment.file_name);
        Ok(attachment)
    }

    /// Attaches the photo taken on the position step, demoting any earlier one.
    pub fn ingest_from_position_step(&self, file: MediaFile) -> Result<MediaAttachment> {
        let attachment = self.attachment(file, true);
        let stored = attachment.clone();
        self.store.update_with(move |draft| {
            for existing in draft.media.iter_mut() {
                existing.from_position_step = false;
            }
            draft.media.insert(0, stored);
            Ok(())
        })?;
        log::info!("Attached position photo {}", attachment.file_name);
        Ok(attachment)
    }

    pub fn remove(&self, index: usize) -> Result<MediaAttachment> {
        let (_, removed) = self.store.update_with(|draft| {
            if index >= draft.media.len() {
                return Err(Error::validation(vec![FieldError::new(
                    "media",
                    format!("no attachment at position {index}"),
                )]));
            }
            Ok(draft.media.remove(index))
        })?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft_store::MemoryDraftStorage;
    use crate::exiftool::ExifTool;
    use std::path::PathBuf;

    struct FixedReader(ExifRecord);

    impl MetadataReader for FixedReader {
        fn read(&self, _file: &MediaFile) -> Result<ExifRecord> {
            Ok(self.0.clone())
        }
    }

    fn pipeline(reader: Arc<dyn MetadataReader>) -> MediaPipeline<MemoryDraftStorage> {
        let store = Arc::new(DraftStore::new(MemoryDraftStorage::default()));
        MediaPipeline::new(reader, store)
    }

    fn unreadable() -> Arc<dyn MetadataReader> {
        Arc::new(ExifTool::new(PathBuf::from("/nonexistent/exiftool")))
    }

    #[test]
    fn files_without_metadata_still_attach() {
        let media = pipeline(unreadable());
        let attachment = media.ingest(MediaFile::new("plain.png", vec![0x89, b'P'])).unwrap();
        assert!(attachment.exif.is_empty());
        assert!(!attachment.from_position_step);
        assert_eq!(media.store.load().media.len(), 1);
    }

    #[test]
    fn extracted_metadata_is_kept() {
        let record = ExifRecord {
            gps_lat: Some(54.1),
            gps_lng: Some(11.0),
            ..Default::default()
        };
        let media = pipeline(Arc::new(FixedReader(record.clone())));
        let attachment = media.ingest(MediaFile::new("wal.jpg", vec![1])).unwrap();
        assert_eq!(attachment.exif, record);
        assert_eq!(media.store.load().media[0].exif, record);
    }

    #[test]
    fn second_position_photo_demotes_the_first() {
        let media = pipeline(unreadable());
        media.ingest_from_position_step(MediaFile::new("a.jpg", vec![1])).unwrap();
        let draft = media.store.load();
        assert_eq!(draft.media.len(), 1);
        assert!(draft.media[0].from_position_step);

        media.ingest_from_position_step(MediaFile::new("b.jpg", vec![2])).unwrap();
        let draft = media.store.load();
        let names: Vec<_> = draft
            .media
            .iter()
            .map(|m| (m.file_name.as_str(), m.from_position_step))
            .collect();
        assert_eq!(names, vec![("b.jpg", true), ("a.jpg", false)]);
    }

    #[test]
    fn at_most_one_position_photo() {
        let media = pipeline(unreadable());
        media.ingest(MediaFile::new("x.jpg", vec![1])).unwrap();
        media.ingest_from_position_step(MediaFile::new("a.jpg", vec![2])).unwrap();
        media.ingest(MediaFile::new("y.jpg", vec![3])).unwrap();
        media.ingest_from_position_step(MediaFile::new("b.jpg", vec![4])).unwrap();
        let draft = media.store.load();
        assert_eq!(draft.media.iter().filter(|m| m.from_position_step).count(), 1);
        assert_eq!(draft.position_attachment().unwrap().file_name, "b.jpg");
    }

    #[test]
    fn remove_drops_one_attachment() {
        let media = pipeline(unreadable());
        media.ingest(MediaFile::new("x.jpg", vec![1])).unwrap();
        media.ingest(MediaFile::new("y.jpg", vec![2])).unwrap();
        let removed = media.remove(0).unwrap();
        assert_eq!(removed.file_name, "x.jpg");
        assert_eq!(media.store.load().media.len(), 1);
        assert!(matches!(media.remove(5), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn concurrent_ingests_all_land() {
        let media = Arc::new(pipeline(Arc::new(FixedReader(ExifRecord::default()))));
        let mut handles = Vec::new();
        for i in 0..8 {
            let media = media.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                media.ingest(MediaFile::new(&format!("{i}.jpg"), vec![i as u8]))
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(media.store.load().media.len(), 8);
    }
}
