use crate::auth::{require_role, AuthUser};
use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::export::{self, ExportFormat};
use crate::models::{ExportFilter, StoredSighting};
use crate::storage::{MediaStorage, MEDIA_PREFIX};
use std::sync::Arc;

/// Review operations. Every call checks the role before it touches the database.
pub struct AdminService {
    pool: DbPool,
    media: Arc<dyn MediaStorage>,
    admin_role: String,
}

impl AdminService {
    pub fn new(pool: DbPool, media: Arc<dyn MediaStorage>, admin_role: &str) -> Self {
        Self {
            pool,
            media,
            admin_role: admin_role.to_string(),
        }
    }

    pub fn list(&self, user: Option<&AuthUser>, filter: &ExportFilter) -> Result<Vec<StoredSighting>> {
        require_role(user, &self.admin_role)?;
        let conn = self.pool.get()?;
        db::list_sightings(&conn, filter)
    }

    pub fn get(&self, user: Option<&AuthUser>, id: i64) -> Result<StoredSighting> {
        require_role(user, &self.admin_role)?;
        let conn = self.pool.get()?;
        db::get_sighting(&conn, id)?.ok_or_else(|| Error::NotFound(format!("Sighting {id}")))
    }

    pub fn set_verified(&self, user: Option<&AuthUser>, id: i64, verified: bool) -> Result<()> {
        let reviewer = require_role(user, &self.admin_role)?;
        let conn = self.pool.get()?;
        db::set_verified(&conn, id, verified, reviewer.display_name())?;
        log::info!(
            "Sighting {id} marked {} by {}",
            if verified { "verified" } else { "unverified" },
            reviewer.display_name()
        );
        Ok(())
    }

    /// Deletes the record, then any stored photo no other sighting still points at.
    pub fn delete(&self, user: Option<&AuthUser>, id: i64) -> Result<()> {
        let reviewer = require_role(user, &self.admin_role)?;
        let mut conn = self.pool.get()?;
        let keys = db::delete_sighting(&mut conn, id)?;
        for key in keys {
            if db::is_storage_key_used(&conn, &key)? {
                continue;
            }
            if let Err(err) = self.media.delete(&key) {
                log::warn!("Could not delete media {key}: {err}");
            }
        }
        log::info!("Sighting {id} deleted by {}", reviewer.display_name());
        Ok(())
    }

    /// Removes stored photos no sighting references, such as uploads from rejected submissions.
    pub fn prune_media(&self, user: Option<&AuthUser>) -> Result<Vec<String>> {
        let reviewer = require_role(user, &self.admin_role)?;
        let conn = self.pool.get()?;
        let mut removed = Vec::new();
        for key in self.media.list(MEDIA_PREFIX)? {
            if db::is_storage_key_used(&conn, &key)? {
                continue;
            }
            if self.media.delete(&key)? {
                removed.push(key);
            }
        }
        log::info!("{} orphaned photo(s) pruned by {}", removed.len(), reviewer.display_name());
        Ok(removed)
    }

    /// Verified-only exports are public but carry no reporter contact data. Anything that
    /// includes unreviewed reports needs the admin role; admins get full rows.
    pub fn export(
        &self,
        user: Option<&AuthUser>,
        filter: &ExportFilter,
        format: ExportFormat,
    ) -> Result<String> {
        let is_admin = user.is_some_and(|u| u.has_role(&self.admin_role));
        if filter.verified != Some(true) {
            require_role(user, &self.admin_role)?;
        }
        let conn = self.pool.get()?;
        let mut sightings = db::list_sightings(&conn, filter)?;
        if !is_admin {
            for sighting in &mut sightings {
                sighting.report.strip_contact();
            }
        }
        log::info!(
            "Exporting {} sighting(s) as {:?}{}",
            sightings.len(),
            format,
            if is_admin { "" } else { " without contact data" }
        );
        export::render(format, &sightings)
    }
}
