use crate::error::{Error, Result};
use crate::models::SightingDraft;
use crate::validation::ValidationSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize)]
pub struct FormStep {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub fields: &'static [&'static str],
    pub optional: bool,
}

impl FormStep {
    pub fn governs(&self, field: &str) -> bool {
        self.fields.contains(&field)
    }
}

pub fn default_steps() -> Vec<FormStep> {
    vec![
        FormStep {
            id: "position",
            title: "Position",
            description: "Where was the animal seen?",
            fields: &["latitude", "longitude"],
            optional: false,
        },
        FormStep {
            id: "animal",
            title: "Animal",
            description: "Species, group size and behavior",
            fields: &["species", "animal_count", "juvenile_count", "behavior", "distance", "distribution"],
            optional: false,
        },
        FormStep {
            id: "conditions",
            title: "Conditions",
            description: "How and when the sighting happened",
            fields: &["sighting_source", "sea_state", "visibility", "boat_drive", "observed_at"],
            optional: false,
        },
        FormStep {
            id: "details",
            title: "Photos & notes",
            description: "Attach photos and anything else worth knowing",
            fields: &["notes", "media"],
            optional: true,
        },
        FormStep {
            id: "contact",
            title: "Contact",
            description: "How we can reach you with questions",
            fields: &["reporter_name", "reporter_email", "reporter_phone", "reporter_address", "privacy_consent", "publication_consent"],
            optional: false,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "step", rename_all = "lowercase")]
pub enum FlowState {
    Active(usize),
    Complete,
}

/// Persisted navigation state: where the cursor is and which steps were passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowProgress {
    pub state: FlowState,
    #[serde(default)]
    pub completed: BTreeSet<usize>,
}

/// Cursor over the form steps. It gates navigation and submission readiness but never submits.
pub struct StepController {
    steps: Vec<FormStep>,
    schema: ValidationSchema,
    state: FlowState,
    completed: BTreeSet<usize>,
}

impl StepController {
    pub fn new(steps: Vec<FormStep>, schema: ValidationSchema) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::Init("A form needs at least one step".into()));
        }
        Ok(Self {
            steps,
            schema,
            state: FlowState::Active(0),
            completed: BTreeSet::new(),
        })
    }

    /// Rebuilds completion from a stored draft, then places the cursor on the first unfinished step.
    pub fn resume(steps: Vec<FormStep>, schema: ValidationSchema, draft: &SightingDraft) -> Result<Self> {
        let mut controller = Self::new(steps, schema)?;
        let mut cursor = 0;
        for (idx, step) in controller.steps.iter().enumerate() {
            if controller.schema.validate_step(step, draft).is_err() {
                break;
            }
            controller.completed.insert(idx);
            cursor = (idx + 1).min(controller.steps.len() - 1);
        }
        controller.state = FlowState::Active(cursor);
        Ok(controller)
    }

    /// Continues a saved flow. Completion marks the draft no longer satisfies are dropped.
    /// A cursor past the last step falls back to `resume`, and so does a finished flow
    /// once a new draft has been started.
    pub fn restore(
        steps: Vec<FormStep>,
        schema: ValidationSchema,
        progress: &FlowProgress,
        draft: &SightingDraft,
    ) -> Result<Self> {
        match progress.state {
            FlowState::Active(idx) if idx < steps.len() => {}
            FlowState::Complete if draft.is_empty() => {}
            state => {
                log::debug!("Saved flow state {state:?} does not fit the draft; resuming");
                return Self::resume(steps, schema, draft);
            }
        }
        let mut controller = Self::new(steps, schema)?;
        let completed = progress
            .completed
            .iter()
            .copied()
            .filter(|idx| {
                controller
                    .steps
                    .get(*idx)
                    .is_some_and(|step| controller.schema.validate_step(step, draft).is_ok())
            })
            .collect();
        controller.state = progress.state;
        controller.completed = completed;
        Ok(controller)
    }

    pub fn progress(&self) -> FlowProgress {
        FlowProgress {
            state: self.state,
            completed: self.completed.clone(),
        }
    }

    pub fn steps(&self) -> &[FormStep] {
        &self.steps
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn current_step(&self) -> Option<&FormStep> {
        match self.state {
            FlowState::Active(idx) => self.steps.get(idx),
            FlowState::Complete => None,
        }
    }

    pub fn is_completed(&self, idx: usize) -> bool {
        self.completed.contains(&idx)
    }

    pub fn completed(&self) -> impl Iterator<Item = usize> + '_ {
        self.completed.iter().copied()
    }

    fn active(&self) -> Result<usize> {
        match self.state {
            FlowState::Active(idx) => Ok(idx),
            FlowState::Complete => Err(Error::Navigation("The report was already submitted".into())),
        }
    }

    /// Re-checks the current step and updates its completion mark.
    pub fn revalidate(&mut self, draft: &SightingDraft) -> Result<()> {
        let idx = self.active()?;
        match self.schema.validate_step(&self.steps[idx], draft) {
            Ok(()) => {
                self.completed.insert(idx);
                Ok(())
            }
            Err(errors) => {
                self.completed.remove(&idx);
                Err(Error::Validation(errors))
            }
        }
    }

    pub fn next(&mut self, draft: &SightingDraft) -> Result<usize> {
        let idx = self.active()?;
        let last = self.steps.len() - 1;
        match self.revalidate(draft) {
            Ok(()) => {}
            Err(Error::Validation(errors)) if !self.steps[idx].optional => {
                log::debug!("Step '{}' blocked: {}", self.steps[idx].id, errors);
                return Err(Error::Validation(errors));
            }
            Err(Error::Validation(_)) => {
                log::debug!("Skipping optional step '{}'", self.steps[idx].id);
            }
            Err(other) => return Err(other),
        }
        let target = (idx + 1).min(last);
        self.state = FlowState::Active(target);
        Ok(target)
    }

    pub fn back(&mut self) -> Result<usize> {
        let idx = self.active()?;
        let target = idx.saturating_sub(1);
        self.state = FlowState::Active(target);
        Ok(target)
    }

    /// Every step before `target` must be complete, including when `target` is behind the cursor.
    pub fn go_to(&mut self, target: usize) -> Result<usize> {
        self.active()?;
        if target >= self.steps.len() {
            return Err(Error::Navigation(format!("There is no step {target}")));
        }
        if let Some(missing) = (0..target).find(|idx| !self.completed.contains(idx)) {
            return Err(Error::Navigation(format!(
                "Step '{}' must be completed first",
                self.steps[missing].id
            )));
        }
        self.state = FlowState::Active(target);
        Ok(target)
    }

    pub fn ready_to_submit(&self, draft: &SightingDraft) -> bool {
        matches!(self.state, FlowState::Active(idx) if idx == self.steps.len() - 1)
            && self.schema.validate_full(draft).is_ok()
    }

    pub fn mark_submitted(&mut self) {
        self.state = FlowState::Complete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::sample_draft;

    fn controller() -> StepController {
        StepController::new(default_steps(), ValidationSchema::default()).unwrap()
    }

    #[test]
    fn next_blocks_on_invalid_required_step() {
        let mut flow = controller();
        let draft = SightingDraft::default();
        let err = flow.next(&draft).unwrap_err();
        assert!(matches!(err, Error::Validation(ref e) if e.contains("latitude")));
        assert_eq!(flow.state(), FlowState::Active(0));
        assert!(!flow.is_completed(0));
    }

    #[test]
    fn walks_through_every_step_with_a_valid_draft() {
        let mut flow = controller();
        let draft = sample_draft();
        for expected in 1..=4 {
            assert_eq!(flow.next(&draft).unwrap(), expected);
        }
        assert_eq!(flow.next(&draft).unwrap(), 4);
        assert_eq!(flow.completed().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(flow.ready_to_submit(&draft));
    }

    #[test]
    fn optional_step_can_be_skipped_without_completing_it() {
        let mut flow = controller();
        let mut draft = sample_draft();
        draft.report.notes = Some("x".repeat(2001));
        flow.go_to(0).unwrap();
        for _ in 0..3 {
            flow.next(&draft).unwrap();
        }
        assert_eq!(flow.next(&draft).unwrap(), 4);
        assert!(!flow.is_completed(3));
        assert!(matches!(flow.go_to(4), Err(Error::Navigation(_))));
        assert_eq!(flow.go_to(3).unwrap(), 3);
        assert_eq!(flow.state(), FlowState::Active(3));
    }

    #[test]
    fn back_never_validates() {
        let mut flow = controller();
        let draft = sample_draft();
        flow.next(&draft).unwrap();
        assert_eq!(flow.back().unwrap(), 0);
        assert_eq!(flow.back().unwrap(), 0);
    }

    #[test]
    fn go_to_requires_earlier_steps_complete() {
        let mut flow = controller();
        let draft = sample_draft();
        assert!(matches!(flow.go_to(2), Err(Error::Navigation(_))));
        flow.next(&draft).unwrap();
        flow.next(&draft).unwrap();
        flow.back().unwrap();
        flow.back().unwrap();
        assert_eq!(flow.go_to(2).unwrap(), 2);
        assert!(flow.go_to(9).is_err());
    }

    #[test]
    fn revisiting_with_errors_drops_completion() {
        let mut flow = controller();
        let mut draft = sample_draft();
        flow.next(&draft).unwrap();
        flow.back().unwrap();
        draft.report.latitude = None;
        assert!(flow.revalidate(&draft).is_err());
        assert!(!flow.is_completed(0));
    }

    #[test]
    fn not_ready_before_last_step() {
        let flow = controller();
        assert!(!flow.ready_to_submit(&sample_draft()));
    }

    #[test]
    fn resume_places_cursor_after_finished_steps() {
        let mut draft = sample_draft();
        draft.report.sighting_source = None;
        let flow = StepController::resume(default_steps(), ValidationSchema::default(), &draft).unwrap();
        assert_eq!(flow.state(), FlowState::Active(2));
        assert!(flow.is_completed(1));
    }

    #[test]
    fn restore_keeps_cursor_and_drops_stale_marks() {
        let mut draft = sample_draft();
        let mut flow = controller();
        flow.next(&draft).unwrap();
        flow.next(&draft).unwrap();
        flow.back().unwrap();
        let saved = flow.progress();
        assert_eq!(saved.state, FlowState::Active(1));

        let restored =
            StepController::restore(default_steps(), ValidationSchema::default(), &saved, &draft).unwrap();
        assert_eq!(restored.state(), FlowState::Active(1));
        assert_eq!(restored.completed().collect::<Vec<_>>(), vec![0, 1]);

        draft.report.species = None;
        let restored =
            StepController::restore(default_steps(), ValidationSchema::default(), &saved, &draft).unwrap();
        assert_eq!(restored.state(), FlowState::Active(1));
        assert_eq!(restored.completed().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn restore_starts_over_when_saved_state_does_not_fit() {
        let draft = sample_draft();
        let out_of_range = FlowProgress {
            state: FlowState::Active(12),
            completed: BTreeSet::new(),
        };
        let flow =
            StepController::restore(default_steps(), ValidationSchema::default(), &out_of_range, &draft).unwrap();
        assert_eq!(flow.state(), FlowState::Active(4));

        let finished = FlowProgress {
            state: FlowState::Complete,
            completed: BTreeSet::new(),
        };
        let idle = StepController::restore(
            default_steps(),
            ValidationSchema::default(),
            &finished,
            &SightingDraft::default(),
        )
        .unwrap();
        assert_eq!(idle.state(), FlowState::Complete);
        let fresh =
            StepController::restore(default_steps(), ValidationSchema::default(), &finished, &draft).unwrap();
        assert_eq!(fresh.state(), FlowState::Active(4));
    }

    #[test]
    fn submitted_flow_refuses_navigation() {
        let mut flow = controller();
        flow.mark_submitted();
        assert_eq!(flow.state(), FlowState::Complete);
        assert!(flow.back().is_err());
        assert!(flow.current_step().is_none());
    }
}
