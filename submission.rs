use crate::backend::SightingBackend;
use crate::draft_store::{DraftStorage, DraftStore};
use crate::error::{Error, Result};
use crate::models::{CreateResponse, MediaAttachment, MediaReference, SightingDraft, SightingPayload};
use crate::storage::{storage_key, MediaStorage};
use crate::validation::ValidationSchema;
use std::sync::Arc;

pub const GENERIC_FAILURE: &str = "The sighting could not be sent. Please try again later.";

pub struct SubmissionClient<S: DraftStorage> {
    schema: ValidationSchema,
    backend: Arc<dyn SightingBackend>,
    media: Arc<dyn MediaStorage>,
    store: Arc<DraftStore<S>>,
}

impl<S: DraftStorage> SubmissionClient<S> {
    pub fn new(
        schema: ValidationSchema,
        backend: Arc<dyn SightingBackend>,
        media: Arc<dyn MediaStorage>,
        store: Arc<DraftStore<S>>,
    ) -> Self {
        Self {
            schema,
            backend,
            media,
            store,
        }
    }

    /// Sends a finished draft and returns the new sighting id.
    ///
    /// The draft store is cleared only after the backend confirms the record. A lost
    /// response after a successful insert surfaces as a failure, so a retry can store
    /// the same report twice.
    pub async fn submit(&self, draft: &SightingDraft) -> Result<i64> {
        self.schema.validate_full(draft).map_err(Error::Validation)?;

        let storage = self.media.clone();
        let attachments = draft.media.clone();
        let media = tokio::task::spawn_blocking(move || upload_media(storage.as_ref(), &attachments))
            .await
            .map_err(|e| Error::Init(format!("Task join error: {e}")))??;
        let payload = SightingPayload {
            report: draft.report.clone(),
            media,
        };

        let response = match self.backend.create(&payload).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!("Sending sighting failed: {err}");
                return Err(Error::Submission(GENERIC_FAILURE.to_string()));
            }
        };

        match response {
            CreateResponse {
                success: true,
                id: Some(id),
                ..
            } => {
                if let Err(err) = self.store.clear() {
                    log::warn!("Sighting {id} was stored but the draft could not be cleared: {err}");
                }
                log::info!("Sighting {id} submitted");
                Ok(id)
            }
            CreateResponse { message, .. } => {
                let message = message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                log::warn!("Sighting rejected: {message}");
                Err(Error::Submission(message))
            }
        }
    }
}

fn upload_media(storage: &dyn MediaStorage, attachments: &[MediaAttachment]) -> Result<Vec<MediaReference>> {
    attachments
        .iter()
        .map(|attachment| {
            let key = storage_key(&attachment.payload, &attachment.extension());
            let url = storage
                .upload(&key, &attachment.payload, attachment.content_type.as_deref())
                .map_err(|err| {
                    log::warn!("Upload of {} failed: {}", attachment.file_name, err);
                    Error::Submission(format!("Could not upload {}", attachment.file_name))
                })?;
            Ok(MediaReference {
                storage_key: key,
                url,
                file_name: attachment.file_name.clone(),
                content_type: attachment.content_type.clone(),
                exif: attachment.exif.clone(),
                from_position_step: attachment.from_position_step,
            })
        })
        .collect()
}
