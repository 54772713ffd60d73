use crate::error::{FieldError, ValidationErrors};
use crate::models::{SightingDraft, SightingSource};
use crate::steps::FormStep;
use chrono::NaiveDateTime;

pub const OBSERVED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M";
const MAX_NOTES_CHARS: usize = 2000;
const MAX_SEA_STATE: u8 = 9;

type Check = fn(&SightingDraft) -> Option<String>;

/// A rule reports on exactly one field and reads only fields of that field's step.
#[derive(Clone, Copy)]
pub struct Rule {
    pub field: &'static str,
    check: Check,
}

#[derive(Clone)]
pub struct ValidationSchema {
    rules: Vec<Rule>,
}

impl Default for ValidationSchema {
    fn default() -> Self {
        Self {
            rules: vec![
                Rule { field: "latitude", check: check_latitude },
                Rule { field: "longitude", check: check_longitude },
                Rule { field: "species", check: check_species },
                Rule { field: "animal_count", check: check_animal_count },
                Rule { field: "juvenile_count", check: check_juvenile_count },
                Rule { field: "sighting_source", check: check_sighting_source },
                Rule { field: "sea_state", check: check_sea_state },
                Rule { field: "boat_drive", check: check_boat_drive },
                Rule { field: "observed_at", check: check_observed_at },
                Rule { field: "notes", check: check_notes },
                Rule { field: "media", check: check_media },
                Rule { field: "reporter_email", check: check_email },
                Rule { field: "privacy_consent", check: check_privacy_consent },
            ],
        }
    }
}

impl ValidationSchema {
    pub fn validate_step(
        &self,
        step: &FormStep,
        draft: &SightingDraft,
    ) -> Result<(), ValidationErrors> {
        self.run(draft, |field| step.governs(field))
    }

    pub fn validate_full(&self, draft: &SightingDraft) -> Result<(), ValidationErrors> {
        self.run(draft, |_| true)
    }

    fn run(
        &self,
        draft: &SightingDraft,
        include: impl Fn(&str) -> bool,
    ) -> Result<(), ValidationErrors> {
        let errors: Vec<FieldError> = self
            .rules
            .iter()
            .filter(|rule| include(rule.field))
            .filter_map(|rule| (rule.check)(draft).map(|reason| FieldError::new(rule.field, reason)))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

fn check_latitude(draft: &SightingDraft) -> Option<String> {
    match draft.report.latitude {
        None => Some("required".into()),
        Some(v) if !(-90.0..=90.0).contains(&v) => Some("must be between -90 and 90".into()),
        Some(_) => None,
    }
}

fn check_longitude(draft: &SightingDraft) -> Option<String> {
    match draft.report.longitude {
        None => Some("required".into()),
        Some(v) if !(-180.0..=180.0).contains(&v) => Some("must be between -180 and 180".into()),
        Some(_) => None,
    }
}

fn check_species(draft: &SightingDraft) -> Option<String> {
    is_blank(&draft.report.species).then(|| "required".into())
}

fn check_animal_count(draft: &SightingDraft) -> Option<String> {
    match draft.report.animal_count {
        Some(0) => Some("must be at least 1".into()),
        _ => None,
    }
}

fn check_juvenile_count(draft: &SightingDraft) -> Option<String> {
    let juveniles = draft.report.juvenile_count?;
    let total = draft.report.animal_count?;
    (juveniles > total).then(|| format!("cannot exceed the number of animals ({total})"))
}

fn check_sighting_source(draft: &SightingDraft) -> Option<String> {
    draft.report.sighting_source.is_none().then(|| "required".into())
}

fn check_sea_state(draft: &SightingDraft) -> Option<String> {
    let sea_state = draft.report.sea_state?;
    (sea_state > MAX_SEA_STATE).then(|| format!("must be between 0 and {MAX_SEA_STATE}"))
}

fn check_boat_drive(draft: &SightingDraft) -> Option<String> {
    let from_boat = draft.report.sighting_source == Some(SightingSource::Boat);
    (from_boat && is_blank(&draft.report.boat_drive)).then(|| "required when sighted from a boat".into())
}

fn check_observed_at(draft: &SightingDraft) -> Option<String> {
    match draft.report.observed_at.as_deref().map(str::trim) {
        None | Some("") => Some("required".into()),
        Some(value) => NaiveDateTime::parse_from_str(value, OBSERVED_AT_FORMAT)
            .err()
            .map(|_| "must look like 2024-06-01T14:30".into()),
    }
}

fn check_notes(draft: &SightingDraft) -> Option<String> {
    let notes = draft.report.notes.as_deref()?;
    (notes.chars().count() > MAX_NOTES_CHARS)
        .then(|| format!("must be at most {MAX_NOTES_CHARS} characters"))
}

fn check_media(draft: &SightingDraft) -> Option<String> {
    let flagged = draft.media.iter().filter(|m| m.from_position_step).count();
    (flagged > 1).then(|| "only one photo can belong to the position step".into())
}

fn check_email(draft: &SightingDraft) -> Option<String> {
    let email = draft.report.reporter_email.as_deref().map(str::trim)?;
    if email.is_empty() {
        return None;
    }
    (!looks_like_email(email)).then(|| "is not a valid email address".into())
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn check_privacy_consent(draft: &SightingDraft) -> Option<String> {
    (!draft.report.privacy_consent).then(|| "must be accepted".into())
}

#[cfg(test)]
pub(crate) fn sample_draft() -> SightingDraft {
    let mut draft = SightingDraft::default();
    let r = &mut draft.report;
    r.latitude = Some(54.32);
    r.longitude = Some(10.14);
    r.species = Some("Schweinswal".into());
    r.animal_count = Some(2);
    r.juvenile_count = Some(1);
    r.sighting_source = Some(SightingSource::Land);
    r.sea_state = Some(2);
    r.observed_at = Some("2024-06-01T14:30".into());
    r.privacy_consent = true;
    draft
}
